//! Object operation handlers

use crate::{ApiError, AppState, S3ErrorCode};
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use buck_core::{Version, VersionId};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;

const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Query parameters accepted on object reads
#[derive(Debug, Default, Deserialize)]
pub struct ObjectParams {
    #[serde(rename = "versionId")]
    pub version_id: Option<String>,
}

impl ObjectParams {
    fn version_id(&self) -> Result<Option<VersionId>, ApiError> {
        self.version_id
            .as_deref()
            .map(|raw| {
                raw.parse().map_err(|_| {
                    ApiError::s3(S3ErrorCode::InvalidArgument, "Invalid version id specified")
                })
            })
            .transpose()
    }
}

fn http_date(ts: &DateTime<Utc>) -> String {
    ts.format(HTTP_DATE_FORMAT).to_string()
}

fn insert(headers: &mut HeaderMap, name: HeaderName, value: &str) -> Result<(), ApiError> {
    let value = HeaderValue::from_str(value)
        .map_err(|e| ApiError::Internal(format!("invalid {name} header: {e}")))?;
    headers.insert(name, value);
    Ok(())
}

/// Headers describing a stored version
fn version_headers(version: &Version) -> Result<HeaderMap, ApiError> {
    let mut headers = HeaderMap::new();
    if let Some(etag) = version.etag() {
        insert(&mut headers, header::ETAG, &etag)?;
    }
    insert(&mut headers, header::LAST_MODIFIED, &http_date(&version.created_at))?;
    insert(
        &mut headers,
        HeaderName::from_static("x-amz-version-id"),
        &version.id.to_string(),
    )?;
    Ok(headers)
}

/// Whether the client's cached copy is still current
fn not_modified(request: &HeaderMap, version: &Version) -> bool {
    if let Some(if_none_match) = request
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
    {
        let etag = version.etag().unwrap_or_default();
        return if_none_match
            .split(',')
            .map(str::trim)
            .any(|tag| tag == "*" || tag == etag || tag.trim_matches('"') == etag.trim_matches('"'));
    }

    request
        .get(header::IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok())
        .and_then(|since| DateTime::parse_from_rfc2822(since).ok())
        .is_some_and(|since| version.created_at.timestamp() <= since.timestamp())
}

/// PUT /{bucket}/{key} - Put object
pub async fn put_object(
    State(state): State<Arc<AppState>>,
    Path((bucket_name, key)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let bucket = state.engine.bucket(&bucket_name.to_lowercase())?;

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());

    let version = bucket.put_object_with(&key, body, content_type).await?;
    tracing::debug!(bucket = %bucket_name, %key, version = %version.id, "Stored object");

    let mut response_headers = HeaderMap::new();
    if let Some(etag) = version.etag() {
        insert(&mut response_headers, header::ETAG, &etag)?;
    }
    insert(
        &mut response_headers,
        HeaderName::from_static("x-amz-version-id"),
        &version.id.to_string(),
    )?;

    Ok((StatusCode::OK, response_headers).into_response())
}

/// GET /{bucket}/{key} - Get object with Range and conditional request support
pub async fn get_object(
    State(state): State<Arc<AppState>>,
    Path((bucket_name, key)): Path<(String, String)>,
    Query(params): Query<ObjectParams>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let bucket = state.engine.bucket(&bucket_name.to_lowercase())?;
    let version_id = params.version_id()?;

    // Conditional requests are answered from the ledger without opening the blob
    let version = bucket.head_object(&key, version_id)?;
    if not_modified(&headers, &version) {
        return Ok((StatusCode::NOT_MODIFIED, version_headers(&version)?).into_response());
    }

    let range = headers.get(header::RANGE).and_then(|v| v.to_str().ok());
    let download = bucket.download(&key, Some(version.id), range).await?;
    let reader = download.reader;

    let mut response_headers = version_headers(&download.version)?;
    insert(
        &mut response_headers,
        header::CONTENT_TYPE,
        &download.version.content_type,
    )?;
    insert(
        &mut response_headers,
        header::CONTENT_LENGTH,
        &reader.content_length().to_string(),
    )?;
    insert(&mut response_headers, header::ACCEPT_RANGES, reader.accept_ranges())?;
    if let Some(content_range) = reader.content_range() {
        insert(&mut response_headers, header::CONTENT_RANGE, &content_range)?;
    }

    let status = StatusCode::from_u16(reader.status().http_status())
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let body = Body::from_stream(reader.into_stream());

    Ok((status, response_headers, body).into_response())
}

/// HEAD /{bucket}/{key} - Head object
pub async fn head_object(
    State(state): State<Arc<AppState>>,
    Path((bucket_name, key)): Path<(String, String)>,
    Query(params): Query<ObjectParams>,
) -> Result<Response, ApiError> {
    let bucket = state.engine.bucket(&bucket_name.to_lowercase())?;
    let version = bucket.head_object(&key, params.version_id()?)?;

    let mut response_headers = version_headers(&version)?;
    insert(&mut response_headers, header::CONTENT_TYPE, &version.content_type)?;
    insert(
        &mut response_headers,
        header::CONTENT_LENGTH,
        &version.size.to_string(),
    )?;
    insert(&mut response_headers, header::ACCEPT_RANGES, "bytes")?;

    Ok((StatusCode::OK, response_headers).into_response())
}

/// DELETE /{bucket}/{key} - Delete object
pub async fn delete_object(
    State(state): State<Arc<AppState>>,
    Path((bucket_name, key)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let bucket = state.engine.bucket(&bucket_name.to_lowercase())?;
    let tombstone = bucket.delete_object(&key).await?;

    let mut response_headers = HeaderMap::new();
    insert(
        &mut response_headers,
        HeaderName::from_static("x-amz-delete-marker"),
        "true",
    )?;
    insert(
        &mut response_headers,
        HeaderName::from_static("x-amz-version-id"),
        &tombstone.id.to_string(),
    )?;

    Ok((StatusCode::NO_CONTENT, response_headers).into_response())
}
