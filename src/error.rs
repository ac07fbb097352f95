use std::collections::BTreeMap;

use axum::extract::rejection::JsonRejection;
use axum::http::header::{RETRY_AFTER, WWW_AUTHENTICATE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::models::{PasswordError, Permission};
use crate::store::StoreError;
use crate::validation::ValidationErrors;

/// Application-wide error types with appropriate HTTP status codes.
///
/// # Credential Errors
///
/// Authentication failures are split so the gating layer can log and count
/// them separately while the client always sees a 401:
///
/// - `MalformedCredential` - `Authorization` is not of the form `Bearer <token>`
/// - `InvalidCredential` - the token does not have the fixed opaque shape
/// - `InvalidOrExpiredCredential` - no live token matches the digest
/// - `AuthenticationRequired` - anonymous caller on a protected route
///
/// `InvalidCredentials` is the email/password mismatch of the token endpoint,
/// not a bearer failure, and is never throttled.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Malformed authorization header")]
    MalformedCredential,

    #[error("Invalid authentication token")]
    InvalidCredential,

    #[error("Invalid or expired authentication token")]
    InvalidOrExpiredCredential,

    #[error("Authentication required")]
    AuthenticationRequired,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Account not activated")]
    NotActivated,

    #[error("Missing permission: {0}")]
    MissingPermission(Permission),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Too many failed authentication attempts (retry after {retry_after_secs}s)")]
    TooManyAuthFailures { retry_after_secs: u64 },

    #[error("Failed validation: {0}")]
    FailedValidation(ValidationErrors),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Resource not found")]
    NotFound,

    #[error("Edit conflict")]
    EditConflict,

    #[error("Storage fault: {0}")]
    Storage(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl AppError {
    /// HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::MalformedCredential
            | AppError::InvalidCredential
            | AppError::InvalidOrExpiredCredential
            | AppError::AuthenticationRequired
            | AppError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AppError::NotActivated | AppError::MissingPermission(_) => StatusCode::FORBIDDEN,
            AppError::RateLimitExceeded | AppError::TooManyAuthFailures { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }
            AppError::FailedValidation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::EditConflict => StatusCode::CONFLICT,
            AppError::Storage(_) | AppError::Internal(_) | AppError::ConfigError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Whether the error is a server-side fault whose detail must stay in the logs.
    pub fn is_server_fault(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Short machine-readable label, used for the `error` body field and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::MalformedCredential => "malformed_credential",
            AppError::InvalidCredential => "invalid_credential",
            AppError::InvalidOrExpiredCredential => "invalid_or_expired_credential",
            AppError::AuthenticationRequired => "authentication_required",
            AppError::InvalidCredentials => "invalid_credentials",
            AppError::NotActivated => "not_activated",
            AppError::MissingPermission(_) => "missing_permission",
            AppError::RateLimitExceeded => "rate_limit_exceeded",
            AppError::TooManyAuthFailures { .. } => "too_many_auth_failures",
            AppError::FailedValidation(_) => "failed_validation",
            AppError::BadRequest(_) => "bad_request",
            AppError::NotFound => "not_found",
            AppError::EditConflict => "edit_conflict",
            AppError::Storage(_) => "storage_error",
            AppError::Internal(_) => "internal_error",
            AppError::ConfigError(_) => "config_error",
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::EditConflict => AppError::EditConflict,
            StoreError::DuplicateEmail => {
                let mut errors = ValidationErrors::default();
                errors.add("email", "a user with this email address already exists");
                AppError::FailedValidation(errors)
            }
            StoreError::Backend(detail) => AppError::Storage(detail),
        }
    }
}

impl From<PasswordError> for AppError {
    fn from(err: PasswordError) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Unreadable JSON bodies (syntax, wrong types, unknown fields, wrong content type).
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

/// Error response body for API endpoints.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<BTreeMap<String, String>>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Full detail stays server-side; clients only get the sanitized message
        if self.is_server_fault() {
            tracing::error!(error = %self, kind = self.kind(), "Request failed");
        } else {
            tracing::debug!(error = %self, kind = self.kind(), "Request rejected");
        }

        let (message, fields) = match &self {
            AppError::Storage(_) | AppError::Internal(_) | AppError::ConfigError(_) => (
                "The server encountered a problem and could not process your request".to_string(),
                None,
            ),
            AppError::MalformedCredential | AppError::InvalidCredential => {
                ("Invalid or missing authentication token".to_string(), None)
            }
            AppError::InvalidOrExpiredCredential => {
                ("Invalid or expired authentication token".to_string(), None)
            }
            AppError::AuthenticationRequired => (
                "You must be authenticated to access this resource".to_string(),
                None,
            ),
            AppError::InvalidCredentials => {
                ("Invalid authentication credentials".to_string(), None)
            }
            AppError::NotActivated => (
                "Your user account must be activated to access this resource".to_string(),
                None,
            ),
            AppError::MissingPermission(_) => (
                "Your user account doesn't have the necessary permissions to access this resource"
                    .to_string(),
                None,
            ),
            AppError::RateLimitExceeded => ("Rate limit exceeded".to_string(), None),
            AppError::TooManyAuthFailures { .. } => (
                "Too many failed authentication attempts. Please wait before retrying.".to_string(),
                None,
            ),
            AppError::FailedValidation(errors) => (
                "The request contains invalid values".to_string(),
                Some(errors.fields().clone()),
            ),
            AppError::BadRequest(msg) => (msg.clone(), None),
            AppError::NotFound => (
                "The requested resource could not be found".to_string(),
                None,
            ),
            AppError::EditConflict => (
                "Unable to update the record due to an edit conflict, please try again"
                    .to_string(),
                None,
            ),
        };

        let body = ErrorResponse {
            error: self.kind(),
            message,
            fields,
        };

        let mut response = (status, axum::Json(body)).into_response();

        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }

        if let AppError::TooManyAuthFailures { retry_after_secs } = self {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }

        response
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
