use serde::Serialize;

use super::HashedPassword;

/// A registered user as seen by the gating layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub activated: bool,
    /// Bumped on every write; updates carrying a stale version are rejected
    #[serde(skip)]
    pub version: i32,
}

/// A user together with their password hash, for credential checks.
#[derive(Debug, Clone)]
pub struct UserAccount {
    pub user: User,
    pub password: HashedPassword,
}

/// Input for registering a user. New users start unactivated.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password: HashedPassword,
}

/// Who is making the current request.
///
/// Attached to every request by the authentication middleware as a request
/// extension. It is never replaced once attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// No credential was presented.
    Anonymous,
    /// A bearer token resolved to this user.
    User(User),
}

impl Identity {
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Identity::Anonymous)
    }

    /// The resolved user, if any.
    pub fn user(&self) -> Option<&User> {
        match self {
            Identity::Anonymous => None,
            Identity::User(user) => Some(user),
        }
    }

    /// Anonymous callers are never activated.
    pub fn is_activated(&self) -> bool {
        self.user().is_some_and(|u| u.activated)
    }
}
