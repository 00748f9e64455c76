//! Object-store access seam.
//!
//! The reapers consume the narrow capability set below instead of a concrete
//! SDK client, so the cleanup logic can run against the in-memory store in
//! tests and against S3 in production.

pub mod memory;
pub mod s3;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub use memory::{InMemoryStore, StoreOp};
pub use s3::S3Store;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found: {key}")]
    NotFound { key: String },

    #[error("{operation} failed: {message}")]
    Request {
        operation: &'static str,
        message: String,
    },
}

/// One in-flight multipart upload as reported by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartUpload {
    pub key: String,
    pub upload_id: String,
    pub initiated_at: DateTime<Utc>,
}

/// One page of a delimited listing: repository prefixes plus any keys that
/// live directly at the listed level.
#[derive(Debug, Clone, Default)]
pub struct PrefixPage {
    pub common_prefixes: Vec<String>,
    pub contents: Vec<String>,
    pub is_truncated: bool,
}

#[derive(Debug, Clone, Default)]
pub struct UploadPage {
    pub uploads: Vec<MultipartUpload>,
    pub is_truncated: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ObjectPage {
    pub keys: Vec<String>,
    pub next_continuation_token: Option<String>,
    pub is_truncated: bool,
}

/// Capabilities the reapers need from an S3-compatible object store.
///
/// Pagination contract: within one listing sequence the returned
/// marker/continuation state resumes at the first item strictly after the
/// last item of the prior page, with no duplication and no gap, assuming no
/// concurrent writers.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Delimited listing used to enumerate repositories. `marker` is the key
    /// of the last content item of the prior page.
    async fn list_common_prefixes(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
        marker: Option<&str>,
        max_keys: i32,
    ) -> Result<PrefixPage, StoreError>;

    /// Lists in-flight multipart uploads under `prefix`. The two markers must
    /// be carried together: a single key may have several concurrent uploads
    /// distinguished only by upload id.
    async fn list_multipart_uploads(
        &self,
        bucket: &str,
        prefix: &str,
        key_marker: Option<&str>,
        upload_id_marker: Option<&str>,
        max_uploads: i32,
    ) -> Result<UploadPage, StoreError>;

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), StoreError>;

    /// Flat (undelimited) listing under `prefix`.
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<&str>,
        max_keys: i32,
    ) -> Result<ObjectPage, StoreError>;

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError>;

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StoreError>;
}
