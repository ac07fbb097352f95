use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{Metadata, Movie, Token, User};

/// Build information reported by the healthcheck.
#[derive(Debug, Serialize)]
pub struct SystemInfo {
    pub environment: String,
    pub version: String,
}

/// Response body of `GET /v1/healthcheck`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub system_info: SystemInfo,
}

/// Response body of `GET /v1/movies/{id}`.
#[derive(Debug, Serialize)]
pub struct MovieResponse {
    pub movie: Movie,
}

/// Response body of `GET /v1/movies`.
#[derive(Debug, Serialize)]
pub struct MovieListResponse {
    pub movies: Vec<Movie>,
    pub metadata: Metadata,
}

/// Response body of `POST /v1/users` and `PUT /v1/users/activated`.
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub user: User,
}

/// A token as handed to its owner. The only place the plaintext leaves the server.
#[derive(Debug, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub expiry: DateTime<Utc>,
}

impl From<Token> for IssuedToken {
    fn from(token: Token) -> Self {
        Self {
            token: token.plaintext,
            expiry: token.expiry,
        }
    }
}

/// Response body of `POST /v1/tokens/authentication`.
#[derive(Debug, Serialize)]
pub struct AuthenticationTokenResponse {
    pub authentication_token: IssuedToken,
}
