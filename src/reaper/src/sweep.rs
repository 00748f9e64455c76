//! Bucket-wide sweep orchestration.
//!
//! [`Sweeper`] walks the repository namespace one page of common prefixes at
//! a time, reaping stale multipart uploads per repository and stale upload
//! folders across the flat key space, and accumulates the counts.

use std::sync::Arc;

use anyhow::{Context, Result};
use common::config::CleanupConfig;

use crate::clock::Clock;
use crate::multipart::MultipartUploadReaper;
use crate::store::StorageClient;
use crate::uploads::{FolderStats, UploadFolderReaper};

/// Common prefixes requested per repository listing page.
const PREFIX_PAGE_SIZE: i32 = 100;

/// Path delimiter of the registry key layout.
const DELIMITER: &str = "/";

/// Counters accumulated over one full sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    /// Repository prefixes processed.
    pub prefixes_visited: u64,
    /// Multipart uploads aborted.
    pub multipart_uploads_aborted: u64,
    /// Upload session folders fully deleted.
    pub upload_folders_removed: u64,
    /// Objects deleted across those folders.
    pub folder_objects_deleted: u64,
    /// Markers evaluated as still fresh.
    pub markers_skipped: u64,
    /// Markers that could not be read or parsed.
    pub markers_unreadable: u64,
}

impl SweepSummary {
    fn absorb(&mut self, stats: FolderStats) {
        self.upload_folders_removed += stats.folders_removed;
        self.folder_objects_deleted += stats.objects_deleted;
        self.markers_skipped += stats.markers_skipped;
        self.markers_unreadable += stats.markers_unreadable;
    }
}

/// Drives both reapers across the whole repository namespace.
pub struct Sweeper {
    store: Arc<dyn StorageClient>,
    multipart: MultipartUploadReaper,
    folders: UploadFolderReaper,
    config: CleanupConfig,
    bucket: String,
}

impl Sweeper {
    /// Create a sweeper for `bucket`.
    pub fn new(
        store: Arc<dyn StorageClient>,
        clock: Arc<dyn Clock>,
        config: CleanupConfig,
        bucket: impl Into<String>,
    ) -> Self {
        let multipart =
            MultipartUploadReaper::new(Arc::clone(&store), Arc::clone(&clock), config.clone());
        let folders =
            UploadFolderReaper::new(Arc::clone(&store), Arc::clone(&clock), config.clone());
        Self {
            store,
            multipart,
            folders,
            config,
            bucket: bucket.into(),
        }
    }

    /// Sweep the registry namespace once.
    ///
    /// Lists common prefixes under the configured root, reaps multipart
    /// uploads per repository prefix, then reaps upload folders over the
    /// root prefix after each page. The listing marker advances to the last
    /// content key of each page; a truncated page without content keys stops
    /// the walk.
    ///
    /// # Errors
    ///
    /// Any listing failure, a multipart reap failure (wrapped with the
    /// offending repository prefix), or a folder deletion failure terminates
    /// the sweep.
    pub async fn run(&self) -> Result<SweepSummary> {
        let root = self.config.root_prefix.as_str();
        tracing::info!(
            bucket = %self.bucket,
            root_prefix = %root,
            stale_after_hours = self.config.stale_after_hours,
            dry_run = self.config.dry_run,
            "Starting registry sweep"
        );

        let mut summary = SweepSummary::default();
        let mut marker: Option<String> = None;

        loop {
            let page = self
                .store
                .list_common_prefixes(
                    &self.bucket,
                    root,
                    DELIMITER,
                    marker.as_deref(),
                    PREFIX_PAGE_SIZE,
                )
                .await
                .context("Failed to list repository prefixes")?;

            for prefix in &page.common_prefixes {
                tracing::debug!(prefix = %prefix, "Sweeping repository prefix");
                let aborted = self
                    .multipart
                    .reap(&self.bucket, prefix)
                    .await
                    .with_context(|| format!("Failed to reap multipart uploads under {prefix}"))?;
                summary.multipart_uploads_aborted += aborted;
                summary.prefixes_visited += 1;
            }

            let stats = self
                .folders
                .reap(&self.bucket, root)
                .await
                .context("Failed to reap upload folders")?;
            summary.absorb(stats);

            match page.contents.last() {
                Some(last) if page.is_truncated => marker = Some(last.clone()),
                _ => break,
            }
        }

        tracing::info!(
            prefixes = summary.prefixes_visited,
            multipart_aborted = summary.multipart_uploads_aborted,
            folders_removed = summary.upload_folders_removed,
            objects_deleted = summary.folder_objects_deleted,
            markers_skipped = summary.markers_skipped,
            markers_unreadable = summary.markers_unreadable,
            dry_run = self.config.dry_run,
            "Registry sweep complete"
        );

        Ok(summary)
    }
}
