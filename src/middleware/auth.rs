//! Bearer token authentication middleware.
//!
//! Resolves the `Authorization` header of every request into an [`Identity`]
//! and attaches it to the request extensions. Requests without credentials
//! continue as [`Identity::Anonymous`]; whether anonymous callers may reach a
//! route is decided later by the permission checks.
//!
//! # Credential Handling
//!
//! 1. No header, or an empty one: anonymous
//! 2. Anything other than `Bearer <token>`: 401 (malformed)
//! 3. A token that does not have the issued shape: 401, storage is not consulted
//! 4. No live authentication token with that digest: 401
//! 5. Storage failure: 500
//!
//! Every response gets `Vary: Authorization`, since the credential decides
//! what the response contains.
//!
//! # Brute Force Protection
//!
//! Off unless `AUTH_FAILURE_LIMIT` is set. When enabled, credential failures
//! are counted per client with a keyed `governor` limiter ([`AuthFailureThrottle`]).
//! Once a client exceeds its failure allowance, further failed attempts are
//! answered with 429 and `Retry-After` instead of 401. Successful
//! authentications never consume the allowance. Clients whose allowance has
//! fully recovered are pruned by the rate limiter sweep.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::extract::FromRequestParts;
use axum::http::header::{AUTHORIZATION, VARY};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, Request, Response};
use axum::response::IntoResponse;
use chrono::Utc;
use governor::clock::{Clock, DefaultClock};
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use tower::{Layer, Service};
use tracing::{debug, error, warn};

use super::ip::{ClientKey, TrustedProxyConfig, client_key};
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{Identity, Scope, is_token_shaped, token_digest};
use crate::store::UserStore;

/// Type alias for the per-client auth failure limiter.
type AuthFailureLimiter = RateLimiter<ClientKey, DefaultKeyedStateStore<ClientKey>, DefaultClock>;

/// Per-client allowance of failed authentications.
pub struct AuthFailureThrottle {
    limiter: AuthFailureLimiter,
    per_minute: NonZeroU32,
    burst: NonZeroU32,
}

impl AuthFailureThrottle {
    /// `None` when `failures_per_minute` is 0, which disables throttling.
    pub fn new(failures_per_minute: u32, failure_burst: u32) -> Option<Self> {
        let per_minute = NonZeroU32::new(failures_per_minute)?;
        let burst = NonZeroU32::new(failure_burst).unwrap_or(NonZeroU32::MIN);
        Some(Self {
            limiter: RateLimiter::keyed(Quota::per_minute(per_minute).allow_burst(burst)),
            per_minute,
            burst,
        })
    }

    /// Record one failure for `client`. Returns the throttling error once the
    /// client is over its allowance.
    pub fn record_failure(&self, client: &ClientKey) -> Option<AppError> {
        let not_until = self.limiter.check_key(client).err()?;
        let wait_time = not_until.wait_time_from(DefaultClock::default().now());
        let retry_after_secs = wait_time.as_secs().max(1);

        error!(
            client = %client,
            retry_after_secs,
            "Client blocked due to excessive authentication failures"
        );
        Some(AppError::TooManyAuthFailures { retry_after_secs })
    }

    /// Forget clients whose allowance has fully recovered.
    ///
    /// Returns the number of clients removed.
    pub fn prune(&self) -> usize {
        let before = self.limiter.len();
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
        before.saturating_sub(self.limiter.len())
    }

    /// Number of clients with failures on record.
    pub fn tracked_clients(&self) -> usize {
        self.limiter.len()
    }
}

impl std::fmt::Debug for AuthFailureThrottle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthFailureThrottle")
            .field("per_minute", &self.per_minute)
            .field("burst", &self.burst)
            .field("tracked_clients", &self.tracked_clients())
            .finish()
    }
}

/// Resolves bearer credentials to identities.
#[derive(Clone)]
pub struct TokenAuthenticator {
    users: Arc<dyn UserStore>,
}

impl TokenAuthenticator {
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self { users }
    }

    /// Determine who is calling from the request headers.
    ///
    /// Tokens are never modified by authentication.
    pub async fn authenticate(&self, headers: &HeaderMap) -> AppResult<Identity> {
        let Some(value) = headers.get(AUTHORIZATION) else {
            return Ok(Identity::Anonymous);
        };
        if value.is_empty() {
            return Ok(Identity::Anonymous);
        }

        let value = value.to_str().map_err(|_| AppError::MalformedCredential)?;
        let token = parse_bearer(value)?;

        if !is_token_shaped(token) {
            return Err(AppError::InvalidCredential);
        }

        let digest = token_digest(token);
        match self
            .users
            .get_for_token(Scope::Authentication, &digest, Utc::now())
            .await?
        {
            Some(user) => {
                debug!(user_id = user.id, "Authenticated request");
                Ok(Identity::User(user))
            }
            None => Err(AppError::InvalidOrExpiredCredential),
        }
    }
}

/// Split `Bearer <token>` on single spaces; exactly two parts are accepted.
fn parse_bearer(value: &str) -> AppResult<&str> {
    let mut parts = value.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("Bearer"), Some(token), None) => Ok(token),
        _ => Err(AppError::MalformedCredential),
    }
}

/// Whether `err` is a rejected credential (as opposed to a server fault).
fn is_credential_failure(err: &AppError) -> bool {
    matches!(
        err,
        AppError::MalformedCredential
            | AppError::InvalidCredential
            | AppError::InvalidOrExpiredCredential
    )
}

/// Authentication layer.
///
/// Must run after [`super::RateLimitLayer`], whose client key it reuses for
/// failure throttling.
#[derive(Clone)]
pub struct AuthenticateLayer {
    authenticator: TokenAuthenticator,
    failure_throttle: Option<Arc<AuthFailureThrottle>>,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl AuthenticateLayer {
    /// Create the layer without failure throttling.
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self {
            authenticator: TokenAuthenticator::new(users),
            failure_throttle: None,
            trusted_proxies: Arc::new(TrustedProxyConfig::default()),
        }
    }

    /// Answer 429 once a client spends its failure allowance.
    pub fn with_failure_throttle(mut self, throttle: Arc<AuthFailureThrottle>) -> Self {
        self.failure_throttle = Some(throttle);
        self
    }

    /// Proxies honoured when no upstream layer supplied a client key.
    pub fn with_trusted_proxies(mut self, trusted_proxies: TrustedProxyConfig) -> Self {
        self.trusted_proxies = Arc::new(trusted_proxies);
        self
    }

    pub fn is_throttling_failures(&self) -> bool {
        self.failure_throttle.is_some()
    }
}

impl<S> Layer<S> for AuthenticateLayer {
    type Service = AuthenticateService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthenticateService {
            inner,
            authenticator: self.authenticator.clone(),
            failure_throttle: self.failure_throttle.clone(),
            trusted_proxies: self.trusted_proxies.clone(),
        }
    }
}

/// Authentication service wrapper.
#[derive(Clone)]
pub struct AuthenticateService<S> {
    inner: S,
    authenticator: TokenAuthenticator,
    failure_throttle: Option<Arc<AuthFailureThrottle>>,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl<S> Service<Request<Body>> for AuthenticateService<S>
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

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let authenticator = self.authenticator.clone();
        let failure_throttle = self.failure_throttle.clone();
        let trusted_proxies = self.trusted_proxies.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            if req.extensions().get::<Identity>().is_some() {
                error!(path = %req.uri().path(), "Identity attached twice to one request");
                let err = AppError::Internal("identity already attached".to_string());
                return Ok(vary_on_authorization(err.into_response()));
            }

            // `Request` is not `Sync`; only the headers are borrowed across the lookup
            let (parts, body) = req.into_parts();
            let outcome = authenticator.authenticate(&parts.headers).await;
            let mut req = Request::from_parts(parts, body);

            match outcome {
                Ok(identity) => {
                    req.extensions_mut().insert(identity);
                    let response = inner.call(req).await?;
                    Ok(vary_on_authorization(response))
                }
                Err(err) if is_credential_failure(&err) => {
                    let client = req
                        .extensions()
                        .get::<ClientKey>()
                        .cloned()
                        .unwrap_or_else(|| client_key(&req, &trusted_proxies));

                    warn!(
                        client = %client,
                        path = %req.uri().path(),
                        reason = err.kind(),
                        "Rejected credential"
                    );
                    metrics::record_auth_failure(err.kind());

                    let err = match failure_throttle {
                        Some(throttle) => throttle.record_failure(&client).unwrap_or(err),
                        None => err,
                    };
                    Ok(vary_on_authorization(err.into_response()))
                }
                Err(err) => Ok(vary_on_authorization(err.into_response())),
            }
        })
    }
}

fn vary_on_authorization(mut response: Response<Body>) -> Response<Body> {
    response
        .headers_mut()
        .append(VARY, HeaderValue::from_static("Authorization"));
    response
}

/// Handlers take the caller's identity as an argument.
///
/// Rejects with a 500 when the authentication layer did not run, since that
/// is a routing mistake rather than a client error.
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Identity>()
            .cloned()
            .ok_or_else(|| AppError::Internal("no identity attached to request".to_string()))
    }
}
