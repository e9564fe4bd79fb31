//! `GET /v1/healthcheck`.

use std::sync::Arc;

use bytes::Bytes;
use cinegate_core::RequestContext;
use cinegate_middleware::{Response, ResponseExt};
use http::StatusCode;
use serde_json::json;

use crate::app::AppState;
use crate::error::AppResult;

/// Reports availability, the deployment environment and the build version.
pub async fn healthcheck(
    state: Arc<AppState>,
    _ctx: RequestContext,
    _body: Bytes,
) -> AppResult<Response> {
    Ok(Response::json(
        StatusCode::OK,
        &json!({
            "status": "available",
            "system_info": {
                "environment": state.environment,
                "version": env!("CARGO_PKG_VERSION"),
            }
        }),
    ))
}
