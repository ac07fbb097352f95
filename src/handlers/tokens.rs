//! Authentication token issuance.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Deserialize;
use tracing::{debug, info, instrument};

use super::ValidatedJson;
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{AuthenticationTokenResponse, Scope, Token};
use crate::state::AppState;
use crate::validation::{
    Validate, ValidationErrors, validate_email, validate_password_plaintext,
};

/// Body of `POST /v1/tokens/authentication`.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CredentialsRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

impl Validate for CredentialsRequest {
    fn validate(&self, errors: &mut ValidationErrors) {
        validate_email(errors, &self.email);
        validate_password_plaintext(errors, &self.password);
    }
}

/// `POST /v1/tokens/authentication`
///
/// Exchanges an email and password for a 24-hour bearer token. An unknown
/// email and a wrong password get the same 401.
#[instrument(skip_all)]
pub async fn create_authentication_token(
    State(state): State<AppState>,
    ValidatedJson(body): ValidatedJson<CredentialsRequest>,
) -> AppResult<(StatusCode, Json<AuthenticationTokenResponse>)> {
    let Some(account) = state.accounts.get_by_email(&body.email).await? else {
        debug!("Token requested for unknown email");
        return Err(AppError::InvalidCredentials);
    };

    if !account.password.matches(body.password).await? {
        debug!(user_id = account.user.id, "Token requested with wrong password");
        return Err(AppError::InvalidCredentials);
    }

    let scope = Scope::Authentication;
    let token = Token::generate(account.user.id, scope.lifetime(), scope);
    state.tokens.create_token(&token).await?;
    metrics::record_token_issued(scope.as_str());

    info!(user_id = account.user.id, expiry = %token.expiry, "Authentication token issued");
    Ok((
        StatusCode::CREATED,
        Json(AuthenticationTokenResponse {
            authentication_token: token.into(),
        }),
    ))
}
