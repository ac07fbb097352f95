//! # Greenlight
//!
//! The request gating layer of the Greenlight movie API, built on Axum:
//!
//! - **Rate limiting**: per-client token buckets with an idle sweep
//! - **Authentication**: opaque bearer tokens resolved to an identity
//! - **Authorization**: activation and permission checks per route group
//! - **CORS**: exact-match trusted origins with preflight handling
//! - **Panic recovery**: one 500 per panicking request, server keeps running
//! - **Validation**: list query parameters checked before any lookup
//! - **Credentials**: registration, activation and bearer token issuance
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Middleware (Recover → Rate Limit → CORS → Auth → Perms)    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Handlers (healthcheck, users, tokens, movies)              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Store traits (User, Account, Token, Permission, Movie)     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  MemoryStore                                                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::net::SocketAddr;
//!
//! use greenlight::{AppState, Config, MemoryStore, build_router};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let state = AppState::in_memory(config.clone(), MemoryStore::new())?;
//!     let app = build_router(state.clone());
//!
//!     let listener = tokio::net::TcpListener::bind(config.server_addr()).await?;
//!     axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
//!
//!     state.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Security Configuration
//!
//! Allow a browser front end:
//! ```bash
//! CORS_TRUSTED_ORIGINS="https://app.example.com" cargo run
//! ```
//!
//! Tune rate limiting:
//! ```bash
//! LIMITER_RPS=10 LIMITER_BURST=20 cargo run
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod mailer;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod state;
pub mod store;
pub mod utils;
pub mod validation;

// Re-exports for convenience
pub use config::Config;
pub use error::{AppError, AppResult};
pub use routes::build_router;
pub use state::AppState;
pub use store::{MemoryStore, Stores};
