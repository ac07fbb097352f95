//! Application routing configuration with middleware stack.
//!
//! # Middleware Stack (outermost first)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │  Panic Recovery  │ ← 500 + Connection: close if anything below panics
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │   Request ID     │ ← Sets and echoes X-Request-Id
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │     Tracing      │ ← HTTP request/response logging
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Rate Limiting   │ ← 429 if the client's bucket is empty
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │      CORS        │ ← Trusted preflights answered here
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Authentication  │ ← 401 for bad credentials, anonymous otherwise
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │   Permissions    │ ← 401/403, per route group
//! └────────┬─────────┘
//!          ▼
//!      Handler
//! ```
//!
//! # Route Groups
//!
//! - `/v1/healthcheck` - Public
//! - `/v1/users`, `/v1/users/activated`, `/v1/tokens/authentication` - Public
//! - `/v1/movies`, `/v1/movies/{id}` - Require `movies:read`

use axum::Router;
use axum::body::Body;
use axum::extract::DefaultBodyLimit;
use axum::http::Request;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post, put};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, info_span};

use crate::handlers;
use crate::middleware::{
    AuthenticateLayer, CorsLayer, CorsNegotiator, PermissionGate, RateLimitLayer,
    TrustedProxyConfig, recover_layer, require_permission,
};
use crate::models::Permission;
use crate::state::AppState;

/// Build the application router with all routes and middleware configured.
///
/// The router expects to be served with
/// `into_make_service_with_connect_info::<SocketAddr>()`; without connection
/// info every caller shares the `unknown` client key.
pub fn build_router(state: AppState) -> Router {
    let config = state.config.clone();
    let trusted_proxies = TrustedProxyConfig::new(&config.trusted_proxies);

    // =========================================================================
    // Routes
    // =========================================================================
    let movies_read = PermissionGate::new(state.permission_checker(), Permission::MoviesRead);
    let movies = Router::new()
        .route("/v1/movies", get(handlers::list_movies))
        .route("/v1/movies/{id}", get(handlers::show_movie))
        .route_layer(from_fn_with_state(movies_read, require_permission));

    let mut router = Router::new()
        .route("/v1/healthcheck", get(handlers::healthcheck))
        .route("/v1/users", post(handlers::register_user))
        .route("/v1/users/activated", put(handlers::activate_user))
        .route(
            "/v1/tokens/authentication",
            post(handlers::create_authentication_token),
        )
        .merge(movies);

    // =========================================================================
    // Middleware (each layer wraps everything added before it)
    // =========================================================================

    // 1. Request body size limit
    info!(
        max_size_kb = config.max_request_body_size / 1024,
        "Request body size limit configured"
    );
    router = router.layer(DefaultBodyLimit::max(config.max_request_body_size));

    // 2. Authentication
    let mut auth =
        AuthenticateLayer::new(state.users.clone()).with_trusted_proxies(trusted_proxies.clone());
    if let Some(throttle) = &state.auth_throttle {
        auth = auth.with_failure_throttle(throttle.clone());
    }
    if auth.is_throttling_failures() {
        info!(
            per_minute = config.auth_failure_limit,
            burst = config.auth_failure_burst,
            "Authentication failure throttling enabled"
        );
    } else {
        info!("Authentication failure throttling disabled (AUTH_FAILURE_LIMIT=0)");
    }
    router = router.layer(auth);

    // 3. CORS
    info!(
        trusted_origins = config.cors_trusted_origins.len(),
        "CORS negotiation configured"
    );
    router = router.layer(CorsLayer::new(CorsNegotiator::new(
        config.cors_trusted_origins.iter().cloned(),
    )));

    // 4. Rate limiting, always installed; a disabled limiter admits everything
    if state.rate_limiter.is_enabled() {
        info!(
            rps = config.limiter_rps,
            burst = config.limiter_burst,
            trusted_proxies = config.trusted_proxies.len(),
            "Rate limiting enabled"
        );
    } else {
        info!("Rate limiting disabled (LIMITER_ENABLED=false)");
    }
    router = router.layer(RateLimitLayer::new(
        state.rate_limiter.clone(),
        trusted_proxies,
    ));

    // 5. Tracing, with the request id in every span
    router = router.layer(TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
        let request_id = req
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-");
        info_span!(
            "http_request",
            method = %req.method(),
            uri = %req.uri(),
            request_id = %request_id,
        )
    }));

    // 6. Request ID: set on the way in, copied to the response on the way out
    router = router
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    // 7. Panic recovery, outermost
    router = router.layer(recover_layer());

    router.with_state(state)
}
