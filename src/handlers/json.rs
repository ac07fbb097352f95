//! JSON body extraction with field validation.

use axum::Json;
use axum::extract::{FromRequest, Request};
use serde::de::DeserializeOwned;

use crate::error::AppError;
use crate::validation::{Validate, ValidationErrors};

/// Decodes a JSON body, then validates it.
///
/// Malformed JSON, a wrong content type or unknown fields are a 400; a body
/// that decodes but fails its field checks is a 422 listing every failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidatedJson<T>(pub T);

impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;

        let mut errors = ValidationErrors::default();
        value.validate(&mut errors);
        if !errors.is_empty() {
            return Err(AppError::FailedValidation(errors));
        }

        Ok(Self(value))
    }
}
