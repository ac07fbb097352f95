//! Movie catalogue endpoints.
//!
//! Both routes sit behind the `movies:read` permission gate, so by the time
//! a handler runs the caller is an activated user holding that permission.

use axum::Json;
use axum::extract::{Path, RawQuery, State};
use tracing::{debug, instrument};

use crate::error::{AppError, AppResult};
use crate::models::{Identity, MovieListResponse, MovieResponse};
use crate::state::AppState;
use crate::validation::{ListDefaults, parse_list_query};

/// `GET /v1/movies?title=&genres=&page=&page_size=&sort=`
///
/// Invalid list parameters are reported together in one 422 response.
#[instrument(skip(state, identity))]
pub async fn list_movies(
    State(state): State<AppState>,
    identity: Identity,
    RawQuery(query): RawQuery,
) -> AppResult<Json<MovieListResponse>> {
    let query = parse_list_query(query.as_deref().unwrap_or_default(), &ListDefaults::default())
        .map_err(AppError::FailedValidation)?;

    debug!(
        user_id = identity.user().map(|u| u.id),
        page = query.page,
        page_size = query.page_size,
        sort = %query.sort,
        "Listing movies"
    );

    let (movies, metadata) = state.movies.list(&query).await?;
    Ok(Json(MovieListResponse { movies, metadata }))
}

/// `GET /v1/movies/{id}`
///
/// Ids that are not positive integers cannot exist, so they are reported as
/// not found rather than as a bad request.
#[instrument(skip(state))]
pub async fn show_movie(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<MovieResponse>> {
    let id = parse_id(&id).ok_or(AppError::NotFound)?;
    let movie = state.movies.get(id).await?.ok_or(AppError::NotFound)?;
    Ok(Json(MovieResponse { movie }))
}

fn parse_id(raw: &str) -> Option<i64> {
    raw.parse::<i64>().ok().filter(|id| *id > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("42"), Some(42));
        assert_eq!(parse_id("0"), None);
        assert_eq!(parse_id("-3"), None);
        assert_eq!(parse_id("abc"), None);
        assert_eq!(parse_id("1.5"), None);
    }
}
