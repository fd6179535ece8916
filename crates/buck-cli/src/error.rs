//! Error types and S3 error codes

use crate::xml;
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use buck_core::{CoreError, ErrorKind};
use thiserror::Error;

/// S3 error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum S3ErrorCode {
    BucketAlreadyExists,
    BucketNotEmpty,
    InternalError,
    InvalidArgument,
    InvalidBucketName,
    InvalidRange,
    KeyTooLong,
    NoSuchBucket,
    NoSuchKey,
    ServiceUnavailable,
}

impl S3ErrorCode {
    /// Get the error code string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BucketAlreadyExists => "BucketAlreadyExists",
            Self::BucketNotEmpty => "BucketNotEmpty",
            Self::InternalError => "InternalError",
            Self::InvalidArgument => "InvalidArgument",
            Self::InvalidBucketName => "InvalidBucketName",
            Self::InvalidRange => "InvalidRange",
            Self::KeyTooLong => "KeyTooLong",
            Self::NoSuchBucket => "NoSuchBucket",
            Self::NoSuchKey => "NoSuchKey",
            Self::ServiceUnavailable => "ServiceUnavailable",
        }
    }

    /// Get the HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BucketAlreadyExists | Self::BucketNotEmpty => StatusCode::CONFLICT,
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InvalidArgument
            | Self::InvalidBucketName
            | Self::KeyTooLong => StatusCode::BAD_REQUEST,
            Self::InvalidRange => StatusCode::RANGE_NOT_SATISFIABLE,
            Self::NoSuchBucket | Self::NoSuchKey => StatusCode::NOT_FOUND,
            Self::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Message sent to clients for this code
    pub fn default_message(&self) -> &'static str {
        match self {
            Self::BucketAlreadyExists => "The requested bucket name is not available.",
            Self::BucketNotEmpty => "The bucket you tried to delete is not empty.",
            Self::InternalError => "We encountered an internal error. Please try again.",
            Self::InvalidArgument => "Invalid Argument",
            Self::InvalidBucketName => "The specified bucket is not valid.",
            Self::InvalidRange => "The requested range is not satisfiable.",
            Self::KeyTooLong => "Your key is too long.",
            Self::NoSuchBucket => "The specified bucket does not exist.",
            Self::NoSuchKey => "The specified key does not exist.",
            Self::ServiceUnavailable => "Please reduce your request rate.",
        }
    }
}

impl From<ErrorKind> for S3ErrorCode {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::InvalidBucketName => Self::InvalidBucketName,
            ErrorKind::BucketAlreadyExists => Self::BucketAlreadyExists,
            ErrorKind::NoSuchBucket => Self::NoSuchBucket,
            ErrorKind::BucketNotEmpty => Self::BucketNotEmpty,
            ErrorKind::NoSuchKey => Self::NoSuchKey,
            ErrorKind::InvalidObjectKey => Self::KeyTooLong,
            ErrorKind::InvalidRange => Self::InvalidRange,
            ErrorKind::IoFailure => Self::ServiceUnavailable,
            ErrorKind::NoSuchBlob | ErrorKind::Internal => Self::InternalError,
        }
    }
}

/// API error type
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("S3 error: {code:?} - {message}")]
    S3Error { code: S3ErrorCode, message: String },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

impl ApiError {
    /// Create a new S3 error
    pub fn s3(code: S3ErrorCode, message: impl Into<String>) -> Self {
        Self::S3Error {
            code,
            message: message.into(),
        }
    }

    /// Get the error code
    pub fn error_code(&self) -> S3ErrorCode {
        match self {
            Self::S3Error { code, .. } => *code,
            Self::Internal(_) => S3ErrorCode::InternalError,
            Self::Core(e) => e.kind().into(),
        }
    }

    /// Message safe to show a client. Internal details stay in the logs.
    fn client_message(&self) -> String {
        match self {
            Self::S3Error { message, .. } => message.clone(),
            _ => self.error_code().default_message().to_string(),
        }
    }

    fn resource(&self) -> Option<String> {
        match self {
            Self::Core(CoreError::NoSuchBucket(bucket)) => Some(format!("/{bucket}")),
            Self::Core(CoreError::NoSuchKey { bucket, key }) => Some(format!("/{bucket}/{key}")),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.error_code();
        let status = code.status_code();
        let request_id = uuid::Uuid::new_v4().to_string();

        if status.is_server_error() {
            tracing::error!(error = %self, code = code.as_str(), %request_id, "Request failed");
        } else {
            tracing::debug!(error = %self, code = code.as_str(), "Request rejected");
        }

        let body = xml::error(
            code.as_str(),
            &self.client_message(),
            self.resource().as_deref(),
            &request_id,
        );

        // Include x-amz-error-code header for S3 compatibility
        // This is especially important for HEAD requests which have no body
        let mut response = (
            status,
            [
                ("Content-Type", "application/xml"),
                ("x-amz-request-id", request_id.as_str()),
                ("x-amz-error-code", code.as_str()),
            ],
            body,
        )
            .into_response();

        if let Self::Core(CoreError::InvalidRange {
            length: Some(length),
        }) = &self
        {
            if let Ok(value) = HeaderValue::from_str(&format!("bytes */{length}")) {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
        }

        response
    }
}
