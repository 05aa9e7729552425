//! Sessions and the per-user subscription bus.
//!
//! Change notification is debounced twice. The bus coalesces mutations
//! from every writer into one fan-out per `store_debounce` window; each
//! session then coalesces the fan-outs it receives into one listener call
//! per `session_debounce` window. A listener only learns that the store
//! moved and how far; it pulls the actual changes itself.

use crate::scheduler::ScheduledTask;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tasksync_core::{MutationObserver, Revision, UserId};
use thiserror::Error;
use tracing::{debug, warn};

/// Identifier of one sync session, unique within a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Failure reported by a session listener. Logged, never propagated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ListenerError {
    message: String,
}

impl ListenerError {
    /// Creates a listener error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Callback invoked with the store revision when a session is notified.
pub type Listener = Arc<dyn Fn(Revision) -> Result<(), ListenerError> + Send + Sync>;

/// One subscriber of a user's store.
pub struct Session {
    id: SessionId,
    user: UserId,
    listener: Option<Listener>,
    debounce: ScheduledTask,
    latest: Mutex<Revision>,
    deliveries: AtomicU64,
    failures: AtomicU64,
    me: Weak<Session>,
}

impl Session {
    /// Creates a session. A session without a listener only holds the store
    /// open and ignores notifications.
    pub fn new(
        id: SessionId,
        user: UserId,
        listener: Option<Listener>,
        debounce: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            id,
            user,
            listener,
            debounce: ScheduledTask::new("session-notify", debounce),
            latest: Mutex::new(Revision::ZERO),
            deliveries: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            me: me.clone(),
        })
    }

    /// Returns the session id.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Returns the owning user.
    #[must_use]
    pub fn user(&self) -> &UserId {
        &self.user
    }

    /// Returns true if the session has a listener.
    #[must_use]
    pub fn has_listener(&self) -> bool {
        self.listener.is_some()
    }

    /// Number of listener calls made so far.
    #[must_use]
    pub fn deliveries(&self) -> u64 {
        self.deliveries.load(Ordering::Relaxed)
    }

    /// Number of listener calls that failed.
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Records that the store reached `revision` and schedules delivery.
    pub fn notify(&self, revision: Revision) {
        if self.listener.is_none() {
            return;
        }
        {
            let mut latest = self.latest.lock();
            *latest = (*latest).max(revision);
        }
        let me = self.me.clone();
        self.debounce.schedule(move || {
            if let Some(session) = me.upgrade() {
                session.deliver();
            }
        });
    }

    /// Stops any pending delivery.
    pub fn cancel(&self) {
        self.debounce.cancel();
    }

    fn deliver(&self) {
        let Some(listener) = &self.listener else {
            return;
        };
        let revision = *self.latest.lock();
        self.deliveries.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = listener(revision) {
            self.failures.fetch_add(1, Ordering::Relaxed);
            warn!(
                session = %self.id,
                user = %self.user,
                rev = revision.as_u64(),
                error = %e,
                "session listener failed"
            );
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("user", &self.user)
            .field("listener", &self.listener.is_some())
            .field("deliveries", &self.deliveries())
            .finish()
    }
}

/// Fan-out point for one user's store.
///
/// Installed as the store's mutation observer; every committed mutation
/// triggers it.
pub struct SubscriptionBus {
    user: UserId,
    sessions: RwLock<BTreeMap<SessionId, Arc<Session>>>,
    debounce: ScheduledTask,
    latest: Mutex<Revision>,
    fanouts: AtomicU64,
    me: Weak<SubscriptionBus>,
}

impl SubscriptionBus {
    /// Creates a bus whose fan-out is debounced by `debounce`.
    pub fn new(user: UserId, debounce: Duration) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            user,
            sessions: RwLock::new(BTreeMap::new()),
            debounce: ScheduledTask::new("store-notify", debounce),
            latest: Mutex::new(Revision::ZERO),
            fanouts: AtomicU64::new(0),
            me: me.clone(),
        })
    }

    /// Registers a session.
    pub fn register(&self, session: Arc<Session>) {
        self.sessions.write().insert(session.id(), session);
    }

    /// Removes a session, cancelling its pending delivery.
    pub fn deregister(&self, id: SessionId) -> Option<Arc<Session>> {
        let removed = self.sessions.write().remove(&id);
        if let Some(session) = &removed {
            session.cancel();
        }
        removed
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Number of fan-out passes run so far.
    #[must_use]
    pub fn fanouts(&self) -> u64 {
        self.fanouts.load(Ordering::Relaxed)
    }

    /// Returns true if a fan-out is pending.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.debounce.is_pending()
    }

    /// Notes a mutation at `revision` and schedules a fan-out unless one is
    /// already pending.
    pub fn trigger(&self, revision: Revision) {
        {
            let mut latest = self.latest.lock();
            *latest = (*latest).max(revision);
        }
        let me = self.me.clone();
        self.debounce.schedule(move || {
            if let Some(bus) = me.upgrade() {
                bus.fan_out();
            }
        });
    }

    /// Drops every pending notification. Used when the store closes.
    pub fn shutdown(&self) {
        self.debounce.cancel();
        for session in self.sessions.read().values() {
            session.cancel();
        }
    }

    fn fan_out(&self) {
        let revision = *self.latest.lock();
        let sessions: Vec<Arc<Session>> = self.sessions.read().values().cloned().collect();
        self.fanouts.fetch_add(1, Ordering::Relaxed);
        debug!(
            user = %self.user,
            rev = revision.as_u64(),
            sessions = sessions.len(),
            "fan-out"
        );
        for session in sessions {
            session.notify(revision);
        }
    }
}

impl MutationObserver for SubscriptionBus {
    fn on_mutation(&self, revision: Revision) {
        self.trigger(revision);
    }
}

impl fmt::Debug for SubscriptionBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionBus")
            .field("user", &self.user)
            .field("subscribers", &self.subscriber_count())
            .field("pending", &self.is_pending())
            .finish()
    }
}
