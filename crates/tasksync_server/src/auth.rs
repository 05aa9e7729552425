//! Authentication interface.
//!
//! Resolving a caller to a user id is owned by an external collaborator;
//! this module defines the seam and an in-memory implementation for tests
//! and local tooling. Errors pass through to clients unchanged.

use parking_lot::RwLock;
use std::collections::HashMap;
use tasksync_core::UserId;
use thiserror::Error;

/// Authentication failures, with stable codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The login exists but the password does not match.
    #[error("wrong password")]
    WrongPassword,
    /// No such login.
    #[error("user not found")]
    UserNotFound,
}

impl AuthError {
    /// Returns the stable wire code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::WrongPassword => "WRONG_PASSWORD",
            AuthError::UserNotFound => "USER_NOT_FOUND",
        }
    }
}

/// Resolves credentials to the user whose store they address.
pub trait Authenticator: Send + Sync {
    /// Checks `password` for `login` and returns the user id.
    fn authenticate(&self, login: &str, password: &str) -> Result<UserId, AuthError>;
}

/// Authenticator backed by an in-memory table of logins.
#[derive(Default)]
pub struct StaticAuthenticator {
    users: RwLock<HashMap<String, (UserId, String)>>,
}

impl StaticAuthenticator {
    /// Creates an authenticator with no users.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a user, builder style.
    #[must_use]
    pub fn with_user(self, login: impl Into<String>, user: UserId, password: impl Into<String>) -> Self {
        self.add_user(login, user, password);
        self
    }

    /// Adds or replaces a user.
    pub fn add_user(&self, login: impl Into<String>, user: UserId, password: impl Into<String>) {
        self.users
            .write()
            .insert(login.into(), (user, password.into()));
    }
}

impl Authenticator for StaticAuthenticator {
    fn authenticate(&self, login: &str, password: &str) -> Result<UserId, AuthError> {
        let users = self.users.read();
        let (user, expected) = users.get(login).ok_or(AuthError::UserNotFound)?;
        if expected == password {
            Ok(user.clone())
        } else {
            Err(AuthError::WrongPassword)
        }
    }
}

impl std::fmt::Debug for StaticAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticAuthenticator")
            .field("users", &self.users.read().len())
            .finish()
    }
}
