//! In-process implementation of the storage traits.
//!
//! Used for local development and by the test-suite. Token digests are
//! compared in constant time so lookups do not leak how much of a digest
//! matched. User writes follow the same optimistic-concurrency rule a SQL
//! backend would: an update only lands if the version it read is current.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use subtle::ConstantTimeEq;

use super::{
    AccountStore, MovieStore, PermissionStore, StoreError, StoreResult, TokenStore, UserStore,
};
use crate::models::{
    HashedPassword, ListQuery, Metadata, Movie, NewUser, Permission, PermissionSet, Scope,
    SortDirection, Token, TokenDigest, User, UserAccount,
};

#[derive(Debug, Clone)]
struct TokenRecord {
    hash: TokenDigest,
    user_id: i64,
    expiry: DateTime<Utc>,
    scope: Scope,
}

#[derive(Debug, Default)]
struct Inner {
    users: HashMap<i64, User>,
    passwords: HashMap<i64, HashedPassword>,
    tokens: Vec<TokenRecord>,
    permissions: HashMap<i64, BTreeSet<String>>,
    movies: BTreeMap<i64, Movie>,
}

/// Thread-safe in-memory store. Cloning shares the underlying data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a user who has no password and so cannot log in.
    pub fn insert_user(&self, user: User) {
        self.inner.write().users.insert(user.id, user);
    }

    /// Seed a user who can log in with their password.
    pub fn insert_account(&self, account: UserAccount) {
        let mut inner = self.inner.write();
        inner.passwords.insert(account.user.id, account.password);
        inner.users.insert(account.user.id, account.user);
    }

    /// Store the record for an already generated token.
    pub fn insert_token(&self, token: &Token) {
        self.inner.write().tokens.push(TokenRecord {
            hash: token.hash,
            user_id: token.user_id,
            expiry: token.expiry,
            scope: token.scope,
        });
    }

    /// Generate, store and return a new token for `user_id`.
    pub fn issue_token(&self, user_id: i64, ttl: TimeDelta, scope: Scope) -> Token {
        let token = Token::generate(user_id, ttl, scope);
        self.insert_token(&token);
        token
    }

    /// Store a token record for a caller-chosen plaintext.
    pub fn insert_plaintext_token(
        &self,
        plaintext: &str,
        user_id: i64,
        expiry: DateTime<Utc>,
        scope: Scope,
    ) {
        self.inner.write().tokens.push(TokenRecord {
            hash: crate::models::token_digest(plaintext),
            user_id,
            expiry,
            scope,
        });
    }

    pub fn grant(&self, user_id: i64, permissions: &[Permission]) {
        self.grant_codes(user_id, permissions.iter().map(|p| p.code()));
    }

    /// Grant raw permission codes, including ones this crate does not know.
    pub fn grant_codes<'a>(&self, user_id: i64, codes: impl IntoIterator<Item = &'a str>) {
        self.inner
            .write()
            .permissions
            .entry(user_id)
            .or_default()
            .extend(codes.into_iter().map(str::to_string));
    }

    pub fn insert_movie(&self, movie: Movie) {
        self.inner.write().movies.insert(movie.id, movie);
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn get_for_token(
        &self,
        scope: Scope,
        digest: &TokenDigest,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<User>> {
        let inner = self.inner.read();

        // Every record is compared so timing does not depend on match position
        let mut owner = None;
        for record in &inner.tokens {
            let same_digest: bool = record.hash.as_slice().ct_eq(digest.as_slice()).into();
            if same_digest && record.scope == scope && record.expiry > now {
                owner = Some(record.user_id);
            }
        }

        Ok(owner.and_then(|id| inner.users.get(&id).cloned()))
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn get_by_email(&self, email: &str) -> StoreResult<Option<UserAccount>> {
        let inner = self.inner.read();
        let account = inner
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .and_then(|user| {
                let password = inner.passwords.get(&user.id)?.clone();
                Some(UserAccount {
                    user: user.clone(),
                    password,
                })
            });
        Ok(account)
    }

    async fn create_user(&self, new_user: NewUser) -> StoreResult<User> {
        let mut inner = self.inner.write();
        if inner
            .users
            .values()
            .any(|u| u.email.eq_ignore_ascii_case(&new_user.email))
        {
            return Err(StoreError::DuplicateEmail);
        }

        let id = inner.users.keys().max().copied().unwrap_or(0) + 1;
        let user = User {
            id,
            name: new_user.name,
            email: new_user.email,
            activated: false,
            version: 1,
        };
        inner.passwords.insert(id, new_user.password);
        inner.users.insert(id, user.clone());
        Ok(user)
    }

    async fn update_user(&self, user: &User) -> StoreResult<User> {
        let mut inner = self.inner.write();
        let stored = inner
            .users
            .get_mut(&user.id)
            .filter(|stored| stored.version == user.version)
            .ok_or(StoreError::EditConflict)?;

        *stored = User {
            version: user.version + 1,
            ..user.clone()
        };
        Ok(stored.clone())
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn create_token(&self, token: &Token) -> StoreResult<()> {
        self.insert_token(token);
        Ok(())
    }

    async fn delete_all_for_user(&self, scope: Scope, user_id: i64) -> StoreResult<()> {
        self.inner
            .write()
            .tokens
            .retain(|t| !(t.scope == scope && t.user_id == user_id));
        Ok(())
    }
}

#[async_trait]
impl PermissionStore for MemoryStore {
    async fn get_all_for_user(&self, user_id: i64) -> StoreResult<PermissionSet> {
        let inner = self.inner.read();
        Ok(inner
            .permissions
            .get(&user_id)
            .map(PermissionSet::from_codes)
            .unwrap_or_default())
    }

    async fn add_for_user(&self, user_id: i64, permissions: &[Permission]) -> StoreResult<()> {
        self.grant(user_id, permissions);
        Ok(())
    }
}

#[async_trait]
impl MovieStore for MemoryStore {
    async fn get(&self, id: i64) -> StoreResult<Option<Movie>> {
        Ok(self.inner.read().movies.get(&id).cloned())
    }

    async fn list(&self, query: &ListQuery) -> StoreResult<(Vec<Movie>, Metadata)> {
        let title = query.title.to_lowercase();

        let mut matches: Vec<Movie> = self
            .inner
            .read()
            .movies
            .values()
            .filter(|m| title.is_empty() || m.title.to_lowercase().contains(&title))
            .filter(|m| query.genres.iter().all(|g| m.genres.contains(g)))
            .cloned()
            .collect();

        matches.sort_by(|a, b| {
            let primary = compare_column(a, b, query.sort_column());
            let primary = match query.sort_direction() {
                SortDirection::Ascending => primary,
                SortDirection::Descending => primary.reverse(),
            };
            primary.then(a.id.cmp(&b.id))
        });

        let total = matches.len() as u64;
        let offset = usize::try_from(query.offset()).unwrap_or(usize::MAX);
        let limit = usize::try_from(query.limit()).unwrap_or(usize::MAX);
        let page: Vec<Movie> = matches.into_iter().skip(offset).take(limit).collect();

        Ok((page, Metadata::calculate(total, query.page, query.page_size)))
    }
}

fn compare_column(a: &Movie, b: &Movie, column: &str) -> Ordering {
    match column {
        "title" => a.title.cmp(&b.title),
        "year" => a.year.cmp(&b.year),
        "runtime" => a.runtime.cmp(&b.runtime),
        _ => a.id.cmp(&b.id),
    }
}
