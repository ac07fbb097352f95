//! Cross-origin resource sharing for trusted browser origins.
//!
//! Origins are matched by exact string comparison against
//! `CORS_TRUSTED_ORIGINS`; there is no wildcard or suffix matching.
//!
//! | Request | Outcome |
//! |---|---|
//! | no `Origin` | passed through untouched |
//! | untrusted `Origin` | passed through, no CORS headers added |
//! | trusted `Origin` | passed through, origin echoed with `Vary: Origin` |
//! | trusted preflight | answered here with 200, never reaches the handler |
//!
//! A preflight is an `OPTIONS` request carrying `Access-Control-Request-Method`.
//! A plain `OPTIONS` request is an ordinary request.

use std::collections::HashSet;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_REQUEST_METHOD, ORIGIN, VARY,
};
use axum::http::{HeaderValue, Method, Request, Response, StatusCode};
use tower::{Layer, Service};
use tracing::debug;

use crate::metrics;

/// Methods advertised in a preflight response.
pub const PREFLIGHT_ALLOW_METHODS: &str = "OPTIONS, PUT, PATCH, DELETE";

/// Request headers advertised in a preflight response.
pub const PREFLIGHT_ALLOW_HEADERS: &str = "Authorization, Content-Type";

/// What the negotiator decided for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorsOutcome {
    /// `Origin` as sent, if any
    pub origin: Option<HeaderValue>,
    pub trusted: bool,
    /// `OPTIONS` with `Access-Control-Request-Method`, whatever the origin
    pub preflight: bool,
}

impl CorsOutcome {
    /// Only a trusted preflight is answered without reaching the handler.
    pub fn short_circuits(&self) -> bool {
        self.trusted && self.preflight
    }
}

/// Decides how a request is treated with respect to CORS.
#[derive(Debug, Clone, Default)]
pub struct CorsNegotiator {
    trusted_origins: Arc<HashSet<String>>,
}

impl CorsNegotiator {
    pub fn new<I, S>(trusted_origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            trusted_origins: Arc::new(trusted_origins.into_iter().map(Into::into).collect()),
        }
    }

    pub fn is_trusted(&self, origin: &str) -> bool {
        self.trusted_origins.contains(origin)
    }

    pub fn decide<B>(&self, req: &Request<B>) -> CorsOutcome {
        let origin = req.headers().get(ORIGIN).cloned();
        let trusted = origin
            .as_ref()
            .and_then(|o| o.to_str().ok())
            .is_some_and(|o| self.is_trusted(o));
        let preflight = req.method() == Method::OPTIONS
            && req.headers().contains_key(ACCESS_CONTROL_REQUEST_METHOD);

        CorsOutcome {
            origin,
            trusted,
            preflight,
        }
    }
}

/// Layer applying [`CorsNegotiator`] decisions.
#[derive(Clone)]
pub struct CorsLayer {
    negotiator: CorsNegotiator,
}

impl CorsLayer {
    pub fn new(negotiator: CorsNegotiator) -> Self {
        Self { negotiator }
    }
}

impl<S> Layer<S> for CorsLayer {
    type Service = CorsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CorsService {
            inner,
            negotiator: self.negotiator.clone(),
        }
    }
}

/// CORS service wrapper.
#[derive(Clone)]
pub struct CorsService<S> {
    inner: S,
    negotiator: CorsNegotiator,
}

impl<S> Service<Request<Body>> for CorsService<S>
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
        let outcome = self.negotiator.decide(&req);
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let allowed_origin = match outcome.origin {
                Some(ref origin) if outcome.trusted => origin.clone(),
                _ => return inner.call(req).await,
            };

            if outcome.short_circuits() {
                debug!(origin = ?allowed_origin, "Answering CORS preflight");
                metrics::record_cors_preflight();
                return Ok(preflight_response(allowed_origin));
            }

            let mut response = inner.call(req).await?;
            allow_origin(&mut response, allowed_origin);
            Ok(response)
        })
    }
}

fn allow_origin(response: &mut Response<Body>, origin: HeaderValue) {
    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    headers.append(VARY, HeaderValue::from_static("Origin"));
}

fn preflight_response(origin: HeaderValue) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    allow_origin(&mut response, origin);

    let headers = response.headers_mut();
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(PREFLIGHT_ALLOW_METHODS),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(PREFLIGHT_ALLOW_HEADERS),
    );
    response
}
