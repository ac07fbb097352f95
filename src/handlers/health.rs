//! Healthcheck endpoint.
//!
//! `GET /v1/healthcheck` is public: it passes through rate limiting and CORS
//! like every route, but requires no identity.

use axum::Json;
use axum::extract::State;
use tracing::instrument;

use crate::models::{HealthResponse, SystemInfo};
use crate::state::AppState;

/// Report availability and build information.
///
/// # Response Body
///
/// ```json
/// {
///   "status": "available",
///   "system_info": { "environment": "development", "version": "0.1.0" }
/// }
/// ```
#[instrument(skip(state))]
pub async fn healthcheck(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "available".to_string(),
        system_info: SystemInfo {
            environment: state.config.environment.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
    })
}
