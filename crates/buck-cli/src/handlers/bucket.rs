//! Bucket operation handlers

use crate::xml;
use crate::{ApiError, AppState};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::Arc;

/// Default page size of a listing
pub const DEFAULT_MAX_KEYS: usize = 1000;

/// PUT /{bucket} - Create bucket
pub async fn create_bucket(
    State(state): State<Arc<AppState>>,
    Path(bucket): Path<String>,
) -> Result<Response, ApiError> {
    let bucket = bucket.to_lowercase();
    state.engine.create_bucket(&bucket).await?;

    Ok((StatusCode::OK, [("Location", format!("/{}", bucket))], "").into_response())
}

/// DELETE /{bucket} - Delete bucket
pub async fn delete_bucket(
    State(state): State<Arc<AppState>>,
    Path(bucket): Path<String>,
) -> Result<Response, ApiError> {
    state.engine.delete_bucket(&bucket.to_lowercase()).await?;

    Ok(StatusCode::NO_CONTENT.into_response())
}

/// HEAD /{bucket} - Check if bucket exists
pub async fn head_bucket(
    State(state): State<Arc<AppState>>,
    Path(bucket): Path<String>,
) -> Result<Response, ApiError> {
    let bucket = state.engine.bucket(&bucket.to_lowercase())?;

    Ok((
        StatusCode::OK,
        [("x-amz-bucket-region", bucket.metadata().region.to_string())],
    )
        .into_response())
}

/// Query parameters for ListObjects
#[derive(Debug, Default, Deserialize)]
pub struct ListObjectsParams {
    pub prefix: Option<String>,
    #[serde(rename = "max-keys")]
    pub max_keys: Option<usize>,
}

/// GET /{bucket} - List live objects
pub async fn list_objects(
    State(state): State<Arc<AppState>>,
    Path(bucket_name): Path<String>,
    Query(params): Query<ListObjectsParams>,
) -> Result<Response, ApiError> {
    let bucket_name = bucket_name.to_lowercase();
    let bucket = state.engine.bucket(&bucket_name)?;

    let prefix = params.prefix.unwrap_or_default().to_lowercase();
    let max_keys = params.max_keys.unwrap_or(DEFAULT_MAX_KEYS);

    let mut matching = bucket
        .list_object_keys()
        .into_iter()
        .filter(|key| key.starts_with(&prefix))
        // a key deleted since the listing was taken is skipped
        .filter_map(|key| bucket.head_object(&key, None).ok().map(|v| (key, v)));

    let objects: Vec<_> = matching.by_ref().take(max_keys).collect();
    let is_truncated = matching.next().is_some();

    let xml_response =
        xml::list_bucket_result(&bucket_name, &prefix, max_keys, is_truncated, &objects)?;

    Ok((
        StatusCode::OK,
        [("Content-Type", "application/xml")],
        xml_response,
    )
        .into_response())
}

/// GET /{bucket}?location - Get bucket location
pub async fn get_bucket_location(
    State(state): State<Arc<AppState>>,
    Path(bucket): Path<String>,
) -> Result<Response, ApiError> {
    let bucket = state.engine.bucket(&bucket.to_lowercase())?;
    let xml_response = xml::location_constraint(&bucket.metadata().region)?;

    Ok((
        StatusCode::OK,
        [("Content-Type", "application/xml")],
        xml_response,
    )
        .into_response())
}
