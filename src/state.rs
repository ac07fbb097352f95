//! Shared application state for Axum handlers and middleware.
//!
//! Holds the configuration, the storage collaborators, the mailer and the
//! rate limiter registry. Everything is behind an `Arc`, so cloning the state per request
//! is cheap.
//!
//! # Structured Concurrency
//!
//! The only background task is the rate limiter's idle sweep, which is owned
//! by the limiter itself and also prunes the authentication failure throttle. Call [`AppState::shutdown`] after the server has
//! stopped to end it.

use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::mailer::{LogMailer, Mailer};
use crate::middleware::{AuthFailureThrottle, PermissionChecker, RateLimiter};
use crate::store::{
    AccountStore, MemoryStore, MovieStore, PermissionStore, Stores, TokenStore, UserStore,
};

/// Shared application state.
///
/// ```rust,ignore
/// let state = AppState::in_memory(config, MemoryStore::new())?;
/// // ... serve ...
/// state.shutdown().await;
/// ```
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Token to user lookups
    pub users: Arc<dyn UserStore>,
    pub accounts: Arc<dyn AccountStore>,
    pub tokens: Arc<dyn TokenStore>,
    pub permissions: Arc<dyn PermissionStore>,
    pub movies: Arc<dyn MovieStore>,
    /// Delivers activation tokens; logs them by default
    pub mailer: Arc<dyn Mailer>,
    /// Per-client admission registry, shared with the rate limit layer
    pub rate_limiter: Arc<RateLimiter>,
    /// Present only when `AUTH_FAILURE_LIMIT` is non-zero
    pub auth_throttle: Option<Arc<AuthFailureThrottle>>,
    /// Timestamp when the application started
    pub started_at: Instant,
}

impl AppState {
    /// Create the state and start the rate limiter sweep.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if the limiter settings are invalid.
    pub fn new(config: Config, stores: Stores) -> AppResult<Self> {
        let auth_throttle =
            AuthFailureThrottle::new(config.auth_failure_limit, config.auth_failure_burst)
                .map(Arc::new);

        let mut rate_limiter = RateLimiter::new(config.rate_limit_settings())
            .map_err(|e| AppError::ConfigError(format!("Invalid limiter settings: {e}")))?;
        if let Some(throttle) = &auth_throttle {
            rate_limiter = rate_limiter.with_auth_throttle(throttle.clone());
        }

        Ok(Self {
            config: Arc::new(config),
            users: stores.users,
            accounts: stores.accounts,
            tokens: stores.tokens,
            permissions: stores.permissions,
            movies: stores.movies,
            mailer: Arc::new(LogMailer),
            rate_limiter: rate_limiter.run(),
            auth_throttle,
            started_at: Instant::now(),
        })
    }

    /// State backed by one [`MemoryStore`] for every collaborator.
    pub fn in_memory(config: Config, store: MemoryStore) -> AppResult<Self> {
        Self::new(config, Stores::shared(store))
    }

    /// Replace the mailer used for activation tokens.
    #[must_use]
    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = mailer;
        self
    }

    pub fn permission_checker(&self) -> PermissionChecker {
        PermissionChecker::new(self.permissions.clone())
    }

    /// Stop background tasks and wait for them to finish.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of background tasks");
        self.rate_limiter.shutdown().await;
        info!("All background tasks have completed");
    }

    /// Get the application uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
