//! Panic recovery.
//!
//! The outermost layer of the stack. A panic anywhere below it, in a handler
//! or in another middleware, is caught and turned into exactly one 500
//! response with `Connection: close`. The server task keeps running and other
//! connections are unaffected.
//!
//! Requires `panic = "unwind"` (the default, and set explicitly for release
//! builds in `Cargo.toml`).

use std::any::Any;

use axum::body::Body;
use axum::http::header::CONNECTION;
use axum::http::{HeaderValue, Response};
use axum::response::IntoResponse;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::error;

use crate::error::AppError;
use crate::metrics;

/// Panic handler signature used by [`recover_layer`].
pub type PanicHandler = fn(Box<dyn Any + Send + 'static>) -> Response<Body>;

/// Layer converting panics into 500 responses.
pub fn recover_layer() -> CatchPanicLayer<PanicHandler> {
    CatchPanicLayer::custom(recover_from_panic as PanicHandler)
}

/// Build the response for a caught panic.
pub fn recover_from_panic(panic: Box<dyn Any + Send + 'static>) -> Response<Body> {
    let detail = if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else {
        "non-string panic payload"
    };

    error!(panic = %detail, "Recovered from panic while serving request");
    metrics::record_panic_recovered();

    let mut response = AppError::Internal("request handler panicked".to_string()).into_response();
    response
        .headers_mut()
        .insert(CONNECTION, HeaderValue::from_static("close"));
    response
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::{Request, StatusCode};
    use axum::routing::get;
    use tower::ServiceExt;

    async fn boom() -> &'static str {
        panic!("handler exploded")
    }

    fn app() -> Router {
        Router::new()
            .route("/boom", get(boom))
            .route("/fine", get(|| async { "fine" }))
            .layer(recover_layer())
    }

    fn get_request(path: &str) -> Request<Body> {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_panic_becomes_500_with_connection_close() {
        let response = app().oneshot(get_request("/boom")).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()[CONNECTION], "close");

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["error"], "internal_error");
        assert!(!json["message"].as_str().unwrap().contains("exploded"));
    }

    #[tokio::test]
    async fn test_other_requests_unaffected() {
        let app = app();
        let _ = app.clone().oneshot(get_request("/boom")).await.unwrap();

        let response = app.oneshot(get_request("/fine")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(CONNECTION).is_none());
    }

    #[test]
    fn test_non_string_payload() {
        let response = recover_from_panic(Box::new(42_u32));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
