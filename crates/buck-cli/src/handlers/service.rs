//! Service-level handlers (ListBuckets)

use crate::xml;
use crate::{ApiError, AppState};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

/// GET / - List all buckets
pub async fn list_buckets(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let buckets = state.engine.list_buckets();
    let xml_response = xml::list_all_my_buckets_result(&state.config.owner(), &buckets)?;

    Ok((
        StatusCode::OK,
        [("Content-Type", "application/xml")],
        xml_response,
    )
        .into_response())
}

/// HEAD / - Health check
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
