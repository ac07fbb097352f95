//! Request gating middleware.
//!
//! - **Panic recovery**: a panic anywhere below becomes one 500 with `Connection: close`
//! - **Rate limiting**: per-client token buckets with an idle sweep
//! - **CORS**: trusted-origin echo and preflight short-circuit
//! - **Authentication**: bearer token to [`crate::models::Identity`]
//! - **Permissions**: activation and permission checks on route groups
//!
//! # Architecture
//!
//! ```text
//! Request → Recover → Rate Limit → CORS → Authenticate → Permission → Handler
//!              ↓           ↓          ↓          ↓             ↓
//!             500         429    preflight 200  401/429      401/403
//! ```
//!
//! A rejection at any stage produces the response and stops the chain; later
//! stages never run for that request.

pub mod auth;
pub mod cors;
pub mod ip;
pub mod permission;
pub mod rate_limit;
pub mod recover;

pub use auth::{AuthFailureThrottle, AuthenticateLayer, TokenAuthenticator};
pub use cors::{CorsLayer, CorsNegotiator, CorsOutcome};
pub use ip::{CidrRange, ClientKey, TrustedProxyConfig, UNKNOWN_CLIENT, client_key};
pub use permission::{PermissionChecker, PermissionGate, require_permission};
pub use rate_limit::{RateLimitError, RateLimitLayer, RateLimitSettings, RateLimiter};
pub use recover::{recover_from_panic, recover_layer};
