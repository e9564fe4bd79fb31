//! `/v1/movies` handlers.

use std::sync::Arc;

use bytes::Bytes;
use cinegate_core::{GatewayError, RequestContext};
use cinegate_middleware::{Response, ResponseExt};
use http::header::LOCATION;
use http::{HeaderValue, StatusCode};
use serde_json::json;

use crate::app::AppState;
use crate::catalog::{validate_movie, Filters, MovieInput};
use crate::error::AppResult;
use crate::validation::Validator;

fn movie_id(ctx: &RequestContext) -> AppResult<i64> {
    let raw = ctx.param("id").unwrap_or_default();
    match raw.parse::<i64>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(GatewayError::not_found(format!("/v1/movies/{raw}")).into()),
    }
}

fn not_found(id: i64) -> GatewayError {
    GatewayError::not_found(format!("/v1/movies/{id}"))
}

/// `GET /v1/movies`: one page of movies matching the query filters.
pub async fn list(state: Arc<AppState>, ctx: RequestContext, _body: Bytes) -> AppResult<Response> {
    let filters = Filters::from_query(|key| ctx.query(key))?;
    let (movies, metadata) = state.catalog.list(&filters);
    Ok(Response::json(
        StatusCode::OK,
        &json!({ "movies": movies, "metadata": metadata }),
    ))
}

/// `POST /v1/movies`: validates and stores a new movie.
pub async fn create(
    state: Arc<AppState>,
    ctx: RequestContext,
    input: MovieInput,
) -> AppResult<Response> {
    let draft = input.into_draft();
    let mut v = Validator::new();
    validate_movie(&mut v, &draft);
    v.finish()?;

    let movie = state.catalog.insert(draft);
    tracing::info!(
        request_id = %ctx.request_id(),
        movie_id = movie.id,
        "movie created"
    );

    let mut response = Response::json(StatusCode::CREATED, &json!({ "movie": movie }));
    if let Ok(location) = HeaderValue::try_from(format!("/v1/movies/{}", movie.id)) {
        response.headers_mut().insert(LOCATION, location);
    }
    Ok(response)
}

/// `GET /v1/movies/{id}`.
pub async fn show(state: Arc<AppState>, ctx: RequestContext, _body: Bytes) -> AppResult<Response> {
    let id = movie_id(&ctx)?;
    let movie = state.catalog.get(id).ok_or_else(|| not_found(id))?;
    Ok(Response::json(StatusCode::OK, &json!({ "movie": movie })))
}

/// `PATCH /v1/movies/{id}`: applies the fields present in the body.
///
/// The write only succeeds if nobody else updated the movie in between;
/// otherwise the caller gets a 409 and should re-read.
pub async fn update(
    state: Arc<AppState>,
    ctx: RequestContext,
    input: MovieInput,
) -> AppResult<Response> {
    let id = movie_id(&ctx)?;
    let mut movie = state.catalog.get(id).ok_or_else(|| not_found(id))?;

    input.apply_to(&mut movie);
    let mut v = Validator::new();
    validate_movie(&mut v, &movie);
    v.finish()?;

    let movie = state.catalog.update(&movie)?;
    Ok(Response::json(StatusCode::OK, &json!({ "movie": movie })))
}

/// `DELETE /v1/movies/{id}`.
pub async fn delete(
    state: Arc<AppState>,
    ctx: RequestContext,
    _body: Bytes,
) -> AppResult<Response> {
    let id = movie_id(&ctx)?;
    if !state.catalog.delete(id) {
        return Err(not_found(id).into());
    }
    Ok(Response::json(
        StatusCode::OK,
        &json!({ "message": "movie successfully deleted" }),
    ))
}
