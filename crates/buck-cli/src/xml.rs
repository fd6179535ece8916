//! S3 XML response bodies

use crate::ApiError;
use buck_core::{BucketMetadata, Owner, Region, Version};
use chrono::{DateTime, Utc};
use serde::Serialize;

const S3_NAMESPACE: &str = "http://s3.amazonaws.com/doc/2006-03-01/";
const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

/// Format a timestamp the way S3 listings do
pub fn iso8601(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

fn render<T: Serialize>(body: &T) -> Result<String, ApiError> {
    let xml = quick_xml::se::to_string(body).map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(format!("{XML_DECLARATION}\n{xml}"))
}

#[derive(Serialize)]
#[serde(rename = "ListAllMyBucketsResult")]
struct ListAllMyBucketsResult<'a> {
    #[serde(rename = "@xmlns")]
    xmlns: &'a str,
    #[serde(rename = "Owner")]
    owner: OwnerXml<'a>,
    #[serde(rename = "Buckets")]
    buckets: BucketsXml,
}

#[derive(Serialize)]
struct OwnerXml<'a> {
    #[serde(rename = "ID")]
    id: &'a str,
    #[serde(rename = "DisplayName")]
    display_name: &'a str,
}

#[derive(Serialize)]
struct BucketsXml {
    #[serde(rename = "Bucket", default)]
    bucket: Vec<BucketXml>,
}

#[derive(Serialize)]
struct BucketXml {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "CreationDate")]
    creation_date: String,
}

/// `GET /` body
pub fn list_all_my_buckets_result(
    owner: &Owner,
    buckets: &[BucketMetadata],
) -> Result<String, ApiError> {
    render(&ListAllMyBucketsResult {
        xmlns: S3_NAMESPACE,
        owner: OwnerXml {
            id: &owner.id,
            display_name: owner.display(),
        },
        buckets: BucketsXml {
            bucket: buckets
                .iter()
                .map(|b| BucketXml {
                    name: b.name.clone(),
                    creation_date: iso8601(&b.created_at),
                })
                .collect(),
        },
    })
}

#[derive(Serialize)]
#[serde(rename = "ListBucketResult")]
struct ListBucketResult<'a> {
    #[serde(rename = "@xmlns")]
    xmlns: &'a str,
    #[serde(rename = "Name")]
    name: &'a str,
    #[serde(rename = "Prefix")]
    prefix: &'a str,
    #[serde(rename = "KeyCount")]
    key_count: usize,
    #[serde(rename = "MaxKeys")]
    max_keys: usize,
    #[serde(rename = "IsTruncated")]
    is_truncated: bool,
    #[serde(rename = "Contents", default)]
    contents: Vec<ContentsXml>,
}

#[derive(Serialize)]
struct ContentsXml {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "LastModified")]
    last_modified: String,
    #[serde(rename = "ETag")]
    etag: String,
    #[serde(rename = "Size")]
    size: u64,
    #[serde(rename = "StorageClass")]
    storage_class: &'static str,
}

/// `GET /{bucket}` body. `objects` holds the live head version of each key.
pub fn list_bucket_result(
    bucket: &str,
    prefix: &str,
    max_keys: usize,
    is_truncated: bool,
    objects: &[(String, std::sync::Arc<Version>)],
) -> Result<String, ApiError> {
    render(&ListBucketResult {
        xmlns: S3_NAMESPACE,
        name: bucket,
        prefix,
        key_count: objects.len(),
        max_keys,
        is_truncated,
        contents: objects
            .iter()
            .map(|(key, version)| ContentsXml {
                key: key.clone(),
                last_modified: iso8601(&version.created_at),
                etag: version.etag().unwrap_or_default(),
                size: version.size,
                storage_class: "STANDARD",
            })
            .collect(),
    })
}

#[derive(Serialize)]
#[serde(rename = "LocationConstraint")]
struct LocationConstraint<'a> {
    #[serde(rename = "@xmlns")]
    xmlns: &'a str,
    #[serde(rename = "$text")]
    region: &'a str,
}

/// `GET /{bucket}?location` body
pub fn location_constraint(region: &Region) -> Result<String, ApiError> {
    render(&LocationConstraint {
        xmlns: S3_NAMESPACE,
        region: region.as_str(),
    })
}

#[derive(Serialize)]
#[serde(rename = "Error")]
struct ErrorXml<'a> {
    #[serde(rename = "Code")]
    code: &'a str,
    #[serde(rename = "Message")]
    message: &'a str,
    #[serde(rename = "Resource", skip_serializing_if = "Option::is_none")]
    resource: Option<&'a str>,
    #[serde(rename = "RequestId")]
    request_id: &'a str,
}

/// `<Error>` envelope for failed requests
pub fn error(code: &str, message: &str, resource: Option<&str>, request_id: &str) -> String {
    let body = ErrorXml {
        code,
        message,
        resource,
        request_id,
    };
    match quick_xml::se::to_string(&body) {
        Ok(xml) => format!("{XML_DECLARATION}\n{xml}"),
        Err(_) => format!(
            "{XML_DECLARATION}\n<Error><Code>{code}</Code><RequestId>{}</RequestId></Error>",
            quick_xml::escape::escape(request_id)
        ),
    }
}
