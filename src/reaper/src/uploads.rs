//! Stale upload-session folder cleanup.
//!
//! Interrupted registry pushes leave `_uploads/<session-id>/` folders behind.
//! Each session folder carries a `startedat` marker object whose body is the
//! session start time. [`UploadFolderReaper`] scans the flat key space for
//! those markers and deletes every folder whose session started too long ago.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use common::config::CleanupConfig;
use thiserror::Error;

use crate::clock::{Clock, whole_hours_since};
use crate::store::{StorageClient, StoreError};

/// Objects requested per listing page.
const LIST_PAGE_SIZE: i32 = 100;

/// Why a `startedat` marker could not be evaluated.
#[derive(Debug, Error)]
pub enum MarkerError {
    #[error(transparent)]
    Read(#[from] StoreError),
    #[error("marker body is not valid UTF-8")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("marker body {body:?} does not match time format {format:?}")]
    Parse { body: String, format: String },
}

/// Counters for one folder sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FolderStats {
    /// Session folders fully deleted.
    pub folders_removed: u64,
    /// Objects deleted across those folders, markers included.
    pub objects_deleted: u64,
    /// Markers younger than the threshold, left in place.
    pub markers_skipped: u64,
    /// Markers whose body could not be read or parsed.
    pub markers_unreadable: u64,
}

/// Deletes upload session folders whose `startedat` marker is too old.
pub struct UploadFolderReaper {
    store: Arc<dyn StorageClient>,
    clock: Arc<dyn Clock>,
    config: CleanupConfig,
}

impl UploadFolderReaper {
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

    /// Scan every object under `prefix` for upload session markers and
    /// delete the folders of sessions older than the threshold.
    ///
    /// The listing is flat (no delimiter). A marker exactly at the threshold
    /// is skipped. Dry-run mode reports would-be deletions without mutating
    /// anything and without counting.
    ///
    /// # Errors
    ///
    /// A listing failure or any deletion failure aborts the run. Markers
    /// whose body cannot be read or parsed are counted and skipped.
    pub async fn reap(&self, bucket: &str, prefix: &str) -> Result<FolderStats> {
        let mut stats = FolderStats::default();
        let mut token: Option<String> = None;

        loop {
            let page = self
                .store
                .list_objects(bucket, prefix, token.as_deref(), LIST_PAGE_SIZE)
                .await
                .with_context(|| format!("Failed to list objects under {prefix}"))?;

            for key in &page.keys {
                if !is_session_marker(key) {
                    continue;
                }

                let age_hours = match self.marker_age_hours(bucket, key).await {
                    Ok(age) => age,
                    Err(e) => {
                        tracing::warn!(
                            key = %key,
                            error = %e,
                            "Skipping unreadable upload session marker"
                        );
                        stats.markers_unreadable += 1;
                        continue;
                    }
                };

                if !self.config.is_stale(age_hours) {
                    tracing::debug!(key = %key, age_hours, "Upload session still fresh, skipping");
                    stats.markers_skipped += 1;
                    continue;
                }

                let deleted = self
                    .delete_folder(bucket, key)
                    .await
                    .with_context(|| format!("Failed to delete upload folder for marker {key}"))?;
                if self.config.dry_run {
                    continue;
                }
                tracing::info!(
                    key = %key,
                    objects = deleted,
                    age_hours,
                    "Deleted stale upload folder"
                );
                stats.folders_removed += 1;
                stats.objects_deleted += deleted;
            }

            match page.next_continuation_token {
                Some(next) if page.is_truncated => token = Some(next),
                _ => break,
            }
        }

        Ok(stats)
    }

    /// Read a `startedat` marker and return its age in whole hours.
    ///
    /// The body must match the configured time format exactly; no trimming
    /// is applied, so a trailing newline fails the parse.
    async fn marker_age_hours(&self, bucket: &str, key: &str) -> Result<i64, MarkerError> {
        let body = self.store.get_object(bucket, key).await?;
        let text = std::str::from_utf8(&body)?;
        let format = &self.config.started_at_format;
        let started_at = NaiveDateTime::parse_from_str(text, format)
            .map_err(|_| MarkerError::Parse {
                body: text.to_string(),
                format: format.clone(),
            })?
            .and_utc();
        Ok(whole_hours_since(self.clock.now(), started_at))
    }

    /// Delete every object under the marker's session folder, the marker
    /// itself included. Returns the number of objects deleted. In dry-run
    /// mode each object is reported instead of deleted and nothing counts.
    async fn delete_folder(&self, bucket: &str, marker_key: &str) -> Result<u64> {
        let Some(folder) = folder_prefix(marker_key) else {
            anyhow::bail!("upload marker {marker_key:?} has no parent folder");
        };

        let mut deleted = 0u64;
        let mut token: Option<String> = None;
        loop {
            let page = self
                .store
                .list_objects(bucket, folder, token.as_deref(), LIST_PAGE_SIZE)
                .await
                .with_context(|| format!("Failed to list upload folder {folder}"))?;

            for key in &page.keys {
                if self.config.dry_run {
                    tracing::info!(key = %key, "[DRY-RUN] Would delete object");
                    continue;
                }
                self.store
                    .delete_object(bucket, key)
                    .await
                    .with_context(|| format!("Failed to delete {key}"))?;
                deleted += 1;
            }

            if page.keys.is_empty() || !page.is_truncated {
                break;
            }
            // Deleted keys vanish from the listing, so each real round
            // restarts from the front; in dry-run nothing vanishes and the
            // token has to advance instead
            token = if self.config.dry_run {
                page.next_continuation_token
            } else {
                None
            };
        }

        Ok(deleted)
    }
}

/// Whether `key` is the start marker of an upload session folder.
fn is_session_marker(key: &str) -> bool {
    key.contains("/_uploads/") && key.ends_with("/startedat")
}

/// Parent folder of `key`, trailing slash included.
///
/// `"repo/_uploads/s1/startedat"` maps to `"repo/_uploads/s1/"`; keeping the
/// slash keeps a sibling such as `"repo/_uploads/s10/"` out of the deletion
/// prefix.
fn folder_prefix(key: &str) -> Option<&str> {
    key.rsplit_once('/')
        .map(|(parent, _)| &key[..parent.len() + 1])
}
