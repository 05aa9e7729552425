//! Per-user storage handle lifecycle.
//!
//! Each user has at most one open `StorageHandle`, shared by every session
//! of that user. The slot for a user moves through:
//!
//! ```text
//! Closed -> Opening -> Open <-> Draining -> Closed
//! ```
//!
//! Exactly one physical open runs per `Opening` phase; every `acquire`
//! arriving meanwhile waits for its outcome. Releasing (or dropping) the
//! last session starts the drain timer, and an `acquire` before it fires
//! reuses the still-open handle. When the timer fires the slot moves to
//! `Closing` and the handle is closed on the blocking pool; an `acquire`
//! during that phase waits for the close before reopening, so the new open
//! never meets the old file lock.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::scheduler::ScheduledTask;
use crate::subscription::{Listener, Session, SessionId, SubscriptionBus};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tasksync_core::{RecordStore, StorageHandle, UserId};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Lifecycle state of one user's store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No handle.
    Closed,
    /// A physical open is in progress.
    Opening,
    /// Open with at least one session.
    Open,
    /// Open with no sessions; closes when the grace period ends.
    Draining,
    /// The handle is being closed. Acquires wait, then reopen.
    Closing,
}

/// Counters for store opens and closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Successful physical opens.
    pub opens: u64,
    /// Physical closes.
    pub closes: u64,
    /// Opens that failed.
    pub failed_opens: u64,
}

/// `None` while opening or closing, then the outcome shared by every waiter.
type OpenOutcome = Option<Result<(), String>>;

/// Resources of an open user store.
struct LiveStore {
    handle: Arc<StorageHandle>,
    bus: Arc<SubscriptionBus>,
    store: RecordStore,
    drain: ScheduledTask,
}

enum Slot {
    Opening(watch::Receiver<OpenOutcome>),
    Ready(Arc<LiveStore>),
    Closing(watch::Receiver<OpenOutcome>),
}

/// An acquired session: a subscriber registration plus access to the store.
///
/// Hand it back with [`ConnectionManager::release`]. A session dropped
/// without being released is deregistered on drop, so an abandoned request
/// still lets the store drain.
#[derive(Debug)]
pub struct SyncSession {
    session: Arc<Session>,
    store: RecordStore,
    manager: Weak<ConnectionManager>,
    released: bool,
}

impl SyncSession {
    /// Returns the session id.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.session.id()
    }

    /// Returns the owning user.
    #[must_use]
    pub fn user(&self) -> &UserId {
        self.session.user()
    }

    /// Returns the user's record store.
    #[must_use]
    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Returns the subscriber registration.
    #[must_use]
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Some(manager) = self.manager.upgrade() {
            if manager.detach(self).is_ok() {
                debug!(user = %self.user(), session = %self.id(), "dropped session detached");
            }
        }
    }
}

/// Owns the shared storage handle of every user.
pub struct ConnectionManager {
    config: ServerConfig,
    slots: Mutex<HashMap<UserId, Slot>>,
    next_session: AtomicU64,
    opens: AtomicU64,
    closes: AtomicU64,
    failed_opens: AtomicU64,
    me: Weak<ConnectionManager>,
}

impl ConnectionManager {
    /// Creates a manager with no open stores.
    pub fn new(config: ServerConfig) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            config,
            slots: Mutex::new(HashMap::new()),
            next_session: AtomicU64::new(0),
            opens: AtomicU64::new(0),
            closes: AtomicU64::new(0),
            failed_opens: AtomicU64::new(0),
            me: me.clone(),
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Registers a session for `user`, opening the store if needed.
    ///
    /// Concurrent callers for a user whose store is opening share that
    /// open: all succeed together or all fail with `StorageUnavailable`.
    pub async fn acquire(
        &self,
        user: &UserId,
        listener: Option<Listener>,
    ) -> ServerResult<SyncSession> {
        loop {
            let mut opening = {
                let mut slots = self.slots.lock();
                match slots.get(user) {
                    Some(Slot::Ready(live)) => return Ok(self.attach(live, listener)),
                    Some(Slot::Opening(rx) | Slot::Closing(rx)) => rx.clone(),
                    None => {
                        let (tx, rx) = watch::channel(None);
                        slots.insert(user.clone(), Slot::Opening(rx.clone()));
                        self.spawn_open(user.clone(), tx);
                        rx
                    }
                }
            };

            let outcome = opening
                .wait_for(Option::is_some)
                .await
                .map(|outcome| (*outcome).clone())
                .map_err(|_| ServerError::Internal("store open abandoned".into()))?;
            if let Some(Err(message)) = outcome {
                return Err(ServerError::StorageUnavailable(message));
            }
            // Opened or closed: loop to attach or to start a fresh open.
        }
    }

    /// Deregisters a session. Releasing the last session of a user starts
    /// the drain timer.
    pub fn release(&self, mut session: SyncSession) -> ServerResult<()> {
        session.released = true;
        self.detach(&session)
    }

    fn detach(&self, session: &SyncSession) -> ServerResult<()> {
        let id = session.id();
        let user = session.user().clone();
        let slots = self.slots.lock();
        let live = match slots.get(&user) {
            Some(Slot::Ready(live)) if Arc::ptr_eq(&live.handle, session.store.handle()) => live,
            _ => return Err(ServerError::SessionNotFound(id)),
        };
        if live.bus.deregister(id).is_none() {
            return Err(ServerError::SessionNotFound(id));
        }
        debug!(user = %user, session = %id, "session released");
        if live.bus.subscriber_count() == 0 {
            self.start_drain(&user, live);
        }
        Ok(())
    }

    /// Returns the lifecycle state of `user`'s store.
    #[must_use]
    pub fn state(&self, user: &UserId) -> ConnectionState {
        match self.slots.lock().get(user) {
            None => ConnectionState::Closed,
            Some(Slot::Opening(_)) => ConnectionState::Opening,
            Some(Slot::Ready(live)) if live.drain.is_pending() => ConnectionState::Draining,
            Some(Slot::Ready(_)) => ConnectionState::Open,
            Some(Slot::Closing(_)) => ConnectionState::Closing,
        }
    }

    /// Number of sessions registered for `user`.
    #[must_use]
    pub fn subscriber_count(&self, user: &UserId) -> usize {
        match self.slots.lock().get(user) {
            Some(Slot::Ready(live)) => live.bus.subscriber_count(),
            _ => 0,
        }
    }

    /// Returns open and close counters.
    #[must_use]
    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            opens: self.opens.load(Ordering::Relaxed),
            closes: self.closes.load(Ordering::Relaxed),
            failed_opens: self.failed_opens.load(Ordering::Relaxed),
        }
    }

    /// Closes every open store immediately, regardless of sessions.
    ///
    /// Outstanding sessions then fail with `StorageUnavailable`. Returns the
    /// number of stores closed.
    pub fn close_all(&self) -> usize {
        let closing: Vec<_> = {
            let mut slots = self.slots.lock();
            let ready: Vec<UserId> = slots
                .iter()
                .filter(|(_, slot)| matches!(slot, Slot::Ready(_)))
                .map(|(user, _)| user.clone())
                .collect();
            ready
                .into_iter()
                .filter_map(|user| {
                    let (live, tx) = Self::begin_close(&mut slots, &user)?;
                    Some((user, live, tx))
                })
                .collect()
        };
        let count = closing.len();
        for (user, live, tx) in closing {
            self.finish_close(&user, &live, &tx);
        }
        count
    }

    fn attach(&self, live: &Arc<LiveStore>, listener: Option<Listener>) -> SyncSession {
        let id = SessionId(self.next_session.fetch_add(1, Ordering::Relaxed) + 1);
        let session = Session::new(
            id,
            live.handle.user().clone(),
            listener,
            self.config.session_debounce,
        );
        live.bus.register(Arc::clone(&session));
        if live.drain.cancel() {
            debug!(user = %live.handle.user(), "drain cancelled, reusing open store");
        }
        debug!(user = %live.handle.user(), session = %id, "session acquired");
        SyncSession {
            session,
            store: live.store.clone(),
            manager: self.me.clone(),
            released: false,
        }
    }

    fn spawn_open(&self, user: UserId, tx: watch::Sender<OpenOutcome>) {
        let manager = self.me.clone();
        let data_dir = self.config.data_dir.clone();
        let store_config = self.config.store.clone();
        debug!(user = %user, "opening user store");
        tokio::spawn(async move {
            let opening_user = user.clone();
            let opened = tokio::task::spawn_blocking(move || {
                StorageHandle::open(&data_dir, &opening_user, &store_config)
            })
            .await;
            let result = match opened {
                Ok(Ok(handle)) => Ok(handle),
                Ok(Err(e)) => Err(e.to_string()),
                Err(e) => Err(format!("open task failed: {e}")),
            };
            match manager.upgrade() {
                Some(manager) => manager.finish_open(&user, result, &tx),
                None => {
                    tx.send_replace(Some(Err("connection manager dropped".into())));
                }
            }
        });
    }

    fn finish_open(
        &self,
        user: &UserId,
        result: Result<StorageHandle, String>,
        tx: &watch::Sender<OpenOutcome>,
    ) {
        let mut slots = self.slots.lock();
        match result {
            Ok(handle) => {
                let handle = Arc::new(handle);
                let bus = SubscriptionBus::new(user.clone(), self.config.store_debounce);
                let store = RecordStore::new(Arc::clone(&handle)).with_observer(bus.clone());
                let live = Arc::new(LiveStore {
                    handle,
                    bus,
                    store,
                    drain: ScheduledTask::new("store-drain", self.config.drain_grace),
                });
                self.opens.fetch_add(1, Ordering::Relaxed);
                info!(user = %user, "user store open");
                // Waiters attach well within the grace period; if they all
                // went away the store still closes.
                self.start_drain(user, &live);
                slots.insert(user.clone(), Slot::Ready(live));
                tx.send_replace(Some(Ok(())));
            }
            Err(message) => {
                slots.remove(user);
                self.failed_opens.fetch_add(1, Ordering::Relaxed);
                warn!(user = %user, error = %message, "failed to open user store");
                tx.send_replace(Some(Err(message)));
            }
        }
    }

    fn start_drain(&self, user: &UserId, live: &Arc<LiveStore>) {
        let manager = self.me.clone();
        let target = Arc::downgrade(live);
        let expiring = user.clone();
        let scheduled = live.drain.schedule(move || {
            if let Some(manager) = manager.upgrade() {
                manager.expire(&expiring, &target);
            }
        });
        if scheduled {
            debug!(user = %user, grace = ?live.drain.delay(), "draining user store");
        }
    }

    fn expire(&self, user: &UserId, target: &Weak<LiveStore>) {
        let closing = {
            let mut slots = self.slots.lock();
            let current = match slots.get(user) {
                Some(Slot::Ready(live)) => {
                    target.upgrade().is_some_and(|t| Arc::ptr_eq(&t, live))
                        && live.bus.subscriber_count() == 0
                }
                _ => false,
            };
            if !current {
                return;
            }
            Self::begin_close(&mut slots, user)
        };
        let Some((live, tx)) = closing else {
            return;
        };
        match self.me.upgrade() {
            Some(manager) => {
                let user = user.clone();
                // The handle may be busy with a long query; wait for it off
                // the scheduler threads.
                tokio::task::spawn_blocking(move || manager.finish_close(&user, &live, &tx));
            }
            None => self.finish_close(user, &live, &tx),
        }
    }

    /// Swaps a ready slot for a closing one that acquirers wait on.
    fn begin_close(
        slots: &mut HashMap<UserId, Slot>,
        user: &UserId,
    ) -> Option<(Arc<LiveStore>, watch::Sender<OpenOutcome>)> {
        if !matches!(slots.get(user), Some(Slot::Ready(_))) {
            return None;
        }
        let (tx, rx) = watch::channel(None);
        match slots.insert(user.clone(), Slot::Closing(rx)) {
            Some(Slot::Ready(live)) => Some((live, tx)),
            _ => None,
        }
    }

    fn finish_close(&self, user: &UserId, live: &LiveStore, tx: &watch::Sender<OpenOutcome>) {
        live.drain.cancel();
        live.bus.shutdown();
        if live.handle.close() {
            self.closes.fetch_add(1, Ordering::Relaxed);
            info!(user = %user, "user store closed");
        }
        let mut slots = self.slots.lock();
        if matches!(slots.get(user), Some(Slot::Closing(_))) {
            slots.remove(user);
        }
        tx.send_replace(Some(Ok(())));
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("data_dir", &self.config.data_dir)
            .field("users", &self.slots.lock().len())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tasksync_core::{Attributes, CoreError, RecordKey, RecordKind};
    use tempfile::TempDir;

    const GRACE: Duration = Duration::from_millis(200);

    fn manager(dir: &TempDir) -> Arc<ConnectionManager> {
        ConnectionManager::new(
            ServerConfig::new(dir.path())
                .with_drain_grace(GRACE)
                .with_store_debounce(Duration::from_millis(5)),
        )
    }

    fn user(id: &str) -> UserId {
        UserId::parse(id).unwrap()
    }

    #[tokio::test]
    async fn acquire_opens_once_and_release_drains() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir);
        let alice = user("alice");
        assert_eq!(manager.state(&alice), ConnectionState::Closed);

        let session = manager.acquire(&alice, None).await.unwrap();
        assert_eq!(manager.state(&alice), ConnectionState::Open);
        assert_eq!(manager.subscriber_count(&alice), 1);

        manager.release(session).unwrap();
        assert_eq!(manager.state(&alice), ConnectionState::Draining);

        tokio::time::sleep(GRACE * 2).await;
        assert_eq!(manager.state(&alice), ConnectionState::Closed);
        assert_eq!(
            manager.stats(),
            ConnectionStats {
                opens: 1,
                closes: 1,
                failed_opens: 0
            }
        );
    }

    #[tokio::test]
    async fn dropped_session_still_drains() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir);
        let alice = user("alice");

        let session = manager.acquire(&alice, None).await.unwrap();
        drop(session);
        assert_eq!(manager.subscriber_count(&alice), 0);
        assert_eq!(manager.state(&alice), ConnectionState::Draining);

        tokio::time::sleep(GRACE * 2).await;
        assert_eq!(manager.state(&alice), ConnectionState::Closed);
        assert_eq!(manager.stats().closes, 1);
    }

    #[tokio::test]
    async fn acquire_during_close_waits_and_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir);
        let alice = user("alice");

        let session = manager.acquire(&alice, None).await.unwrap();
        manager.release(session).unwrap();
        let live = match manager.slots.lock().get(&alice) {
            Some(Slot::Ready(live)) => Arc::downgrade(live),
            _ => panic!("store should be draining"),
        };
        manager.expire(&alice, &live);
        assert!(matches!(
            manager.state(&alice),
            ConnectionState::Closing | ConnectionState::Closed
        ));

        let again = manager.acquire(&alice, None).await.unwrap();
        assert!(again.store().handle().is_open());
        assert_eq!(manager.state(&alice), ConnectionState::Open);
        assert_eq!(
            manager.stats(),
            ConnectionStats {
                opens: 2,
                closes: 1,
                failed_opens: 0
            }
        );
        manager.release(again).unwrap();
    }

    #[tokio::test]
    async fn reacquire_during_grace_reuses_handle() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir);
        let alice = user("alice");

        let first = manager.acquire(&alice, None).await.unwrap();
        let handle = Arc::clone(first.store().handle());
        manager.release(first).unwrap();

        tokio::time::sleep(GRACE / 4).await;
        let second = manager.acquire(&alice, None).await.unwrap();
        assert!(Arc::ptr_eq(&handle, second.store().handle()));
        assert_eq!(manager.state(&alice), ConnectionState::Open);

        // The cancelled drain must not close the store under the new session.
        tokio::time::sleep(GRACE * 2).await;
        assert_eq!(manager.state(&alice), ConnectionState::Open);
        assert_eq!(manager.subscriber_count(&alice), 1);
        assert!(handle.is_open());
        assert_eq!(manager.stats().opens, 1);
        assert_eq!(manager.stats().closes, 0);

        manager.release(second).unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_acquires_share_one_open() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir);
        let alice = user("alice");

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let manager = Arc::clone(&manager);
            let alice = alice.clone();
            tasks.push(tokio::spawn(async move {
                manager.acquire(&alice, None).await.unwrap()
            }));
        }
        let mut sessions = Vec::new();
        for task in tasks {
            sessions.push(task.await.unwrap());
        }

        assert_eq!(manager.stats().opens, 1);
        assert_eq!(manager.subscriber_count(&alice), 8);
        let handle = sessions[0].store().handle();
        assert!(sessions
            .iter()
            .all(|s| Arc::ptr_eq(handle, s.store().handle())));
        for session in sessions {
            manager.release(session).unwrap();
        }
    }

    #[tokio::test]
    async fn failed_open_rejects_every_waiter() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the data root should be.
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        let manager = ConnectionManager::new(ServerConfig::new(&blocker));
        let alice = user("alice");

        let (a, b) = tokio::join!(manager.acquire(&alice, None), manager.acquire(&alice, None));
        assert!(matches!(a, Err(ServerError::StorageUnavailable(_))));
        assert!(matches!(b, Err(ServerError::StorageUnavailable(_))));
        assert_eq!(manager.state(&alice), ConnectionState::Closed);
        assert_eq!(manager.stats().failed_opens, 1);
    }

    #[tokio::test]
    async fn users_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir);
        let alice = manager.acquire(&user("alice"), None).await.unwrap();
        let bob = manager.acquire(&user("bob"), None).await.unwrap();

        alice
            .store()
            .create(RecordKind::Task, RecordKey::new("T1").unwrap(), Attributes::new())
            .await
            .unwrap();
        let bob_rev = bob.store().current_revision().await.unwrap();
        assert_eq!(bob_rev.as_u64(), 0);
        assert_eq!(manager.stats().opens, 2);

        manager.release(alice).unwrap();
        manager.release(bob).unwrap();
    }

    #[tokio::test]
    async fn release_twice_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir);
        let alice = user("alice");
        let keep = manager.acquire(&alice, None).await.unwrap();
        let session = manager.acquire(&alice, None).await.unwrap();
        let id = session.id();

        // Rebuild a handle to the same registration to simulate a stale release.
        let stale = SyncSession {
            session: Arc::clone(session.session()),
            store: session.store().clone(),
            manager: Weak::new(),
            released: false,
        };
        manager.release(session).unwrap();
        assert!(matches!(
            manager.release(stale),
            Err(ServerError::SessionNotFound(found)) if found == id
        ));
        manager.release(keep).unwrap();
    }

    #[tokio::test]
    async fn close_all_invalidates_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir);
        let session = manager.acquire(&user("alice"), None).await.unwrap();

        assert_eq!(manager.close_all(), 1);
        let err = session.store().current_revision().await.unwrap_err();
        assert!(matches!(err, CoreError::StoreClosed));
    }
}
