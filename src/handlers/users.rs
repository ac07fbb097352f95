//! Registration and activation endpoints.
//!
//! A new user starts unactivated with `movies:read` granted, and receives a
//! three-day activation token through the configured mailer. Presenting that
//! token to `PUT /v1/users/activated` activates the account and burns every
//! outstanding activation token for the user.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use chrono::Utc;
use serde::Deserialize;
use tracing::{info, instrument, warn};

use super::ValidatedJson;
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{HashedPassword, NewUser, Permission, Scope, Token, UserResponse, token_digest};
use crate::state::AppState;
use crate::validation::{
    Validate, ValidationErrors, validate_email, validate_name, validate_password_plaintext,
    validate_token_plaintext,
};

/// Body of `POST /v1/users`.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterUserRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

impl Validate for RegisterUserRequest {
    fn validate(&self, errors: &mut ValidationErrors) {
        validate_name(errors, &self.name);
        validate_email(errors, &self.email);
        validate_password_plaintext(errors, &self.password);
    }
}

/// Body of `PUT /v1/users/activated`.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActivateUserRequest {
    #[serde(default)]
    pub token: String,
}

impl Validate for ActivateUserRequest {
    fn validate(&self, errors: &mut ValidationErrors) {
        validate_token_plaintext(errors, &self.token);
    }
}

/// `POST /v1/users`
///
/// A taken email address is a 422 on the `email` field. Failing to deliver the
/// activation email is logged and does not fail the registration.
#[instrument(skip_all)]
pub async fn register_user(
    State(state): State<AppState>,
    ValidatedJson(body): ValidatedJson<RegisterUserRequest>,
) -> AppResult<(StatusCode, Json<UserResponse>)> {
    let password = HashedPassword::from_plaintext(body.password).await?;
    let user = state
        .accounts
        .create_user(NewUser {
            name: body.name,
            email: body.email,
            password,
        })
        .await?;

    state
        .permissions
        .add_for_user(user.id, &[Permission::MoviesRead])
        .await?;

    let token = Token::generate(user.id, Scope::Activation.lifetime(), Scope::Activation);
    state.tokens.create_token(&token).await?;
    metrics::record_token_issued(Scope::Activation.as_str());

    if let Err(e) = state.mailer.send_activation(&user, &token).await {
        warn!(user_id = user.id, error = %e, "Failed to send activation email");
    }

    info!(user_id = user.id, "User registered");
    Ok((StatusCode::CREATED, Json(UserResponse { user })))
}

/// `PUT /v1/users/activated`
///
/// An unknown or expired token is a 422 on the `token` field. A concurrent
/// write to the same user is a 409.
#[instrument(skip_all)]
pub async fn activate_user(
    State(state): State<AppState>,
    ValidatedJson(body): ValidatedJson<ActivateUserRequest>,
) -> AppResult<Json<UserResponse>> {
    let digest = token_digest(&body.token);
    let mut user = state
        .users
        .get_for_token(Scope::Activation, &digest, Utc::now())
        .await?
        .ok_or_else(|| {
            let mut errors = ValidationErrors::default();
            errors.add("token", "invalid or expired activation token");
            AppError::FailedValidation(errors)
        })?;

    user.activated = true;
    let user = state.accounts.update_user(&user).await?;
    state
        .tokens
        .delete_all_for_user(Scope::Activation, user.id)
        .await?;

    info!(user_id = user.id, "User activated");
    Ok(Json(UserResponse { user }))
}
