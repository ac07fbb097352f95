//! Per-client admission control using the token bucket algorithm.
//!
//! # Algorithm
//!
//! Every client key owns a bucket holding up to `burst` tokens. Tokens refill
//! continuously at `rps` per second. A request is admitted when at least one
//! whole token is available, and consumes it; otherwise it is rejected with
//! 429 immediately. New clients start with a full bucket, so a client's first
//! request is always admitted.
//!
//! # Why Not `governor`
//!
//! `governor`'s GCRA keyed limiter (still used for authentication failure
//! throttling) keeps no readable bucket level and has no notion of when a
//! client was last seen. Admission here is defined as a fractional token
//! count refilled at `rps`, and eviction as a periodic sweep over a fixed
//! idle window, so the buckets are kept explicitly.
//!
//! # Registry Lifecycle
//!
//! Buckets are created lazily and live in a single registry guarded by one
//! mutex. The critical section covers only the bucket update, never I/O. A
//! background sweep, owned by the [`RateLimiter`] and driven by its own timer,
//! drops buckets that have not been seen for the retention window so the
//! registry stays proportional to the set of recently active clients. The
//! sweep is stopped by [`RateLimiter::shutdown`] or when the limiter is
//! dropped.
//!
//! # Configuration
//!
//! - `LIMITER_ENABLED`: when false every request is admitted
//! - `LIMITER_RPS`: sustained refill rate per client
//! - `LIMITER_BURST`: bucket capacity per client
//! - `LIMITER_IDLE_SECS` / `LIMITER_SWEEP_SECS`: retention window and sweep period

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::response::IntoResponse;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower::{Layer, Service};
use tracing::{debug, trace, warn};

use super::auth::AuthFailureThrottle;
use super::ip::{ClientKey, TrustedProxyConfig, client_key};
use crate::error::AppError;
use crate::metrics;

/// Error type for rate limiter configuration.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum RateLimitError {
    #[error("RPS must be a finite number greater than 0, got {0}; disable the limiter instead")]
    InvalidRps(f64),

    #[error("burst must be at least 1")]
    ZeroBurst,

    #[error("idle timeout must be greater than 0")]
    ZeroIdleTimeout,

    #[error("sweep interval must be greater than 0")]
    ZeroSweepInterval,
}

/// Rate limiter settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitSettings {
    pub enabled: bool,
    /// Tokens added per second
    pub rps: f64,
    /// Bucket capacity
    pub burst: u32,
    /// Buckets unseen for longer than this are removed by the sweep
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            rps: 2.0,
            burst: 4,
            idle_timeout: Duration::from_secs(180),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl RateLimitSettings {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Rate bounds are only enforced on an enabled limiter. The sweep period
    /// is always checked, since the sweep also prunes other registries.
    pub fn validate(&self) -> Result<(), RateLimitError> {
        if self.sweep_interval.is_zero() {
            return Err(RateLimitError::ZeroSweepInterval);
        }
        if !self.enabled {
            return Ok(());
        }
        if !self.rps.is_finite() || self.rps <= 0.0 {
            return Err(RateLimitError::InvalidRps(self.rps));
        }
        if self.burst == 0 {
            return Err(RateLimitError::ZeroBurst);
        }
        if self.idle_timeout.is_zero() {
            return Err(RateLimitError::ZeroIdleTimeout);
        }
        Ok(())
    }
}

/// Admission state for one client.
#[derive(Debug, Clone, Copy)]
struct ClientBucket {
    tokens: f64,
    last_refill: Instant,
    last_seen: Instant,
}

impl ClientBucket {
    fn full(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
            last_seen: now,
        }
    }

    fn try_take(&mut self, rps: f64, capacity: f64, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rps).min(capacity);
        self.last_refill = now;
        self.last_seen = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Registry of client buckets.
///
/// Owned by the application state and shared with [`RateLimitLayer`] through
/// an `Arc`.
#[derive(Debug)]
pub struct RateLimiter {
    settings: RateLimitSettings,
    buckets: Mutex<HashMap<ClientKey, ClientBucket>>,
    /// Pruned on every sweep
    auth_throttle: Option<Arc<AuthFailureThrottle>>,
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl RateLimiter {
    /// Create a limiter without a background sweep.
    ///
    /// Call [`RateLimiter::sweep_at`] manually, or use [`RateLimiter::start`].
    pub fn new(settings: RateLimitSettings) -> Result<Self, RateLimitError> {
        settings.validate()?;
        Ok(Self {
            settings,
            buckets: Mutex::new(HashMap::new()),
            auth_throttle: None,
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        })
    }

    /// Create a limiter and spawn its sweep task on the current runtime.
    ///
    /// The task only holds a weak reference, so dropping the last `Arc`
    /// also ends the sweep.
    pub fn start(settings: RateLimitSettings) -> Result<Arc<Self>, RateLimitError> {
        Ok(Self::new(settings)?.run())
    }

    /// Also prune `throttle` whenever idle buckets are swept.
    pub fn with_auth_throttle(mut self, throttle: Arc<AuthFailureThrottle>) -> Self {
        self.auth_throttle = Some(throttle);
        self
    }

    /// Share the limiter and spawn its sweep task on the current runtime.
    ///
    /// A disabled limiter still sweeps when it carries an auth throttle.
    pub fn run(self) -> Arc<Self> {
        let limiter = Arc::new(self);
        if limiter.settings.enabled || limiter.auth_throttle.is_some() {
            limiter.spawn_sweep_task();
        }
        limiter
    }

    pub fn settings(&self) -> &RateLimitSettings {
        &self.settings
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    /// Decide whether a request from `key` is admitted now.
    pub fn allow(&self, key: &ClientKey) -> bool {
        self.allow_at(key, Instant::now())
    }

    /// [`RateLimiter::allow`] at an explicit instant.
    pub fn allow_at(&self, key: &ClientKey, now: Instant) -> bool {
        if !self.settings.enabled {
            return true;
        }

        let capacity = f64::from(self.settings.burst);
        let mut buckets = self.buckets.lock();
        match buckets.get_mut(key) {
            Some(bucket) => bucket.try_take(self.settings.rps, capacity, now),
            None => {
                let mut bucket = ClientBucket::full(capacity, now);
                let allowed = bucket.try_take(self.settings.rps, capacity, now);
                buckets.insert(key.clone(), bucket);
                allowed
            }
        }
    }

    /// Remove buckets idle for longer than the retention window.
    ///
    /// Returns the number of buckets removed.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let idle_timeout = self.settings.idle_timeout;
        let mut buckets = self.buckets.lock();
        let before = buckets.len();
        buckets.retain(|_, bucket| now.saturating_duration_since(bucket.last_seen) <= idle_timeout);
        let remaining = buckets.len();
        drop(buckets);

        metrics::set_rate_limiter_clients(remaining);

        if let Some(throttle) = &self.auth_throttle {
            let pruned = throttle.prune();
            if pruned > 0 {
                trace!(pruned, "Pruned recovered authentication failure records");
            }
        }

        before - remaining
    }

    /// Number of clients currently tracked.
    pub fn client_count(&self) -> usize {
        self.buckets.lock().len()
    }

    /// Stop the sweep task and wait for it to finish.
    pub async fn shutdown(&self) {
        debug!("Stopping rate limiter sweep");
        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;
        debug!("Rate limiter sweep stopped");
    }

    fn spawn_sweep_task(self: &Arc<Self>) {
        let limiter: Weak<Self> = Arc::downgrade(self);
        let cancel = self.cancellation_token.clone();
        let period = self.settings.sweep_interval;

        self.task_tracker.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await; // Skip the first immediate tick

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(limiter) = limiter.upgrade() else { break };
                        let removed = limiter.sweep_at(Instant::now());
                        if removed > 0 {
                            trace!(removed, "Swept idle rate limiter buckets");
                        }
                    }
                }
            }
        });
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}

/// Rate limiting layer for the Tower middleware stack.
///
/// Always installed; a disabled limiter admits everything. The client key is
/// stored in the request extensions for the layers that run after this one.
///
/// ```rust,ignore
/// let limiter = RateLimiter::start(RateLimitSettings::default())?;
/// let app = Router::new()
///     .route("/v1/movies", get(handler))
///     .layer(RateLimitLayer::new(limiter, TrustedProxyConfig::default()));
/// ```
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<RateLimiter>,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl RateLimitLayer {
    pub fn new(limiter: Arc<RateLimiter>, trusted_proxies: TrustedProxyConfig) -> Self {
        Self {
            limiter,
            trusted_proxies: Arc::new(trusted_proxies),
        }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
            trusted_proxies: self.trusted_proxies.clone(),
        }
    }
}

/// Rate limiting service wrapper.
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: Arc<RateLimiter>,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let key = client_key(&req, &self.trusted_proxies);
        let allowed = self.limiter.allow(&key);
        let mut inner = self.inner.clone();

        Box::pin(async move {
            if !allowed {
                warn!(
                    client = %key,
                    path = %req.uri().path(),
                    "Rate limit exceeded for client"
                );
                metrics::record_rate_limited();
                return Ok(AppError::RateLimitExceeded.into_response());
            }

            req.extensions_mut().insert(key);
            inner.call(req).await
        })
    }
}
