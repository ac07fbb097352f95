//! Storage collaborators used by the gating layer.
//!
//! The gating layer never talks to a database directly. It asks three narrow
//! questions through [`UserStore`], [`PermissionStore`] and [`MovieStore`], so
//! any backend (SQL, cache, test double) can be plugged into
//! [`crate::AppState`]. The credential endpoints additionally write through
//! [`AccountStore`] and [`TokenStore`].
//!
//! Lookups carry no timeout of their own: if the client goes away the request
//! future is dropped and the in-flight lookup with it.

mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{
    ListQuery, Metadata, Movie, NewUser, Permission, PermissionSet, Scope, Token, TokenDigest,
    User, UserAccount,
};

pub use memory::MemoryStore;

/// Failure reported by a storage backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Optimistic-concurrency check failed while writing a record.
    #[error("edit conflict")]
    EditConflict,

    /// Another user already registered this email address.
    #[error("duplicate email")]
    DuplicateEmail,

    /// The backend could not answer (unavailable, timed out, corrupt row, ...).
    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Resolves bearer-token digests to users.
#[async_trait]
pub trait UserStore: Send + Sync + 'static {
    /// Find the owner of a token with this digest and scope whose expiry is
    /// after `now`. `Ok(None)` when no such token exists.
    async fn get_for_token(
        &self,
        scope: Scope,
        digest: &TokenDigest,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<User>>;
}

/// Registration and account updates.
#[async_trait]
pub trait AccountStore: Send + Sync + 'static {
    /// Emails compare case-insensitively.
    async fn get_by_email(&self, email: &str) -> StoreResult<Option<UserAccount>>;

    /// Store a new unactivated user; `DuplicateEmail` if the address is taken.
    async fn create_user(&self, user: NewUser) -> StoreResult<User>;

    /// Write `user` back if its version still matches the stored one.
    ///
    /// Returns the stored user with its version bumped, or `EditConflict` when
    /// the record changed (or vanished) since it was read.
    async fn update_user(&self, user: &User) -> StoreResult<User>;
}

/// Persists issued tokens. Only digests are ever stored.
#[async_trait]
pub trait TokenStore: Send + Sync + 'static {
    async fn create_token(&self, token: &Token) -> StoreResult<()>;

    async fn delete_all_for_user(&self, scope: Scope, user_id: i64) -> StoreResult<()>;
}

/// Loads the permissions granted to a user.
#[async_trait]
pub trait PermissionStore: Send + Sync + 'static {
    async fn get_all_for_user(&self, user_id: i64) -> StoreResult<PermissionSet>;

    async fn add_for_user(&self, user_id: i64, permissions: &[Permission]) -> StoreResult<()>;
}

/// Read access to the movie catalogue.
#[async_trait]
pub trait MovieStore: Send + Sync + 'static {
    async fn get(&self, id: i64) -> StoreResult<Option<Movie>>;

    /// One page of movies matching `query`, plus pagination metadata.
    async fn list(&self, query: &ListQuery) -> StoreResult<(Vec<Movie>, Metadata)>;
}

/// Every storage collaborator of [`crate::AppState`].
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserStore>,
    pub accounts: Arc<dyn AccountStore>,
    pub tokens: Arc<dyn TokenStore>,
    pub permissions: Arc<dyn PermissionStore>,
    pub movies: Arc<dyn MovieStore>,
}

impl Stores {
    /// One store serving every role.
    pub fn shared<S>(store: S) -> Self
    where
        S: UserStore + AccountStore + TokenStore + PermissionStore + MovieStore,
    {
        let store = Arc::new(store);
        Self {
            users: store.clone(),
            accounts: store.clone(),
            tokens: store.clone(),
            permissions: store.clone(),
            movies: store,
        }
    }
}
