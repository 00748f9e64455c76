//! Stale multipart upload cleanup.
//!
//! Registry clients that die mid-push leave multipart uploads in flight
//! indefinitely, and S3 keeps storing the parts until the upload is aborted.
//! [`MultipartUploadReaper`] walks the in-flight uploads under a prefix and
//! aborts every one older than the configured threshold.

use std::sync::Arc;

use anyhow::Result;
use common::config::CleanupConfig;

use crate::clock::{Clock, whole_hours_since};
use crate::store::StorageClient;

/// Uploads requested per ListMultipartUploads page.
const MULTIPART_PAGE_SIZE: i32 = 1000;

/// Aborts multipart uploads that have been in flight too long.
pub struct MultipartUploadReaper {
    store: Arc<dyn StorageClient>,
    clock: Arc<dyn Clock>,
    config: CleanupConfig,
}

impl MultipartUploadReaper {
    /// Create a new reaper over the given store.
    pub fn new(
        store: Arc<dyn StorageClient>,
        clock: Arc<dyn Clock>,
        config: CleanupConfig,
    ) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Walk every in-flight multipart upload under `prefix` and abort the
    /// stale ones.
    ///
    /// Pagination resumes from the key and upload id of the last upload on
    /// each page. An upload is stale when its age in whole hours exceeds the
    /// configured threshold; an upload exactly at the threshold is retained.
    ///
    /// # Returns
    ///
    /// The number of uploads actually aborted. Dry-run mode aborts nothing
    /// and counts nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if a listing call fails. Individual abort failures
    /// are logged and skipped without failing the run.
    pub async fn reap(&self, bucket: &str, prefix: &str) -> Result<u64> {
        let mut aborted = 0u64;
        let mut key_marker: Option<String> = None;
        let mut upload_id_marker: Option<String> = None;

        loop {
            let page = self
                .store
                .list_multipart_uploads(
                    bucket,
                    prefix,
                    key_marker.as_deref(),
                    upload_id_marker.as_deref(),
                    MULTIPART_PAGE_SIZE,
                )
                .await?;

            for upload in &page.uploads {
                let age_hours = whole_hours_since(self.clock.now(), upload.initiated_at);
                if !self.config.is_stale(age_hours) {
                    continue;
                }

                if self.config.dry_run {
                    tracing::info!(
                        key = %upload.key,
                        upload_id = %upload.upload_id,
                        age_hours,
                        "[DRY-RUN] Would abort multipart upload"
                    );
                    continue;
                }

                match self
                    .store
                    .abort_multipart_upload(bucket, &upload.key, &upload.upload_id)
                    .await
                {
                    Ok(()) => {
                        tracing::info!(
                            key = %upload.key,
                            upload_id = %upload.upload_id,
                            age_hours,
                            "Aborted stale multipart upload"
                        );
                        aborted += 1;
                    }
                    Err(e) => {
                        tracing::error!(
                            key = %upload.key,
                            upload_id = %upload.upload_id,
                            error = %e,
                            "Failed to abort multipart upload, skipping"
                        );
                    }
                }
            }

            // Resume after the last upload of the page; stop on an empty
            // page even if the listing claims truncation
            match page.uploads.last() {
                Some(last) if page.is_truncated => {
                    key_marker = Some(last.key.clone());
                    upload_id_marker = Some(last.upload_id.clone());
                }
                _ => break,
            }
        }

        Ok(aborted)
    }
}
