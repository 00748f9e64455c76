//! Garbage collection for registry upload leftovers in an S3 bucket.
//!
//! The registry's blob-upload protocol leaves two kinds of debris behind when
//! a push is interrupted: in-flight multipart uploads that were never
//! completed or aborted, and `_uploads/<session>/` staging folders whose
//! `startedat` marker records when the session began. Both are reclaimed here
//! once they exceed a uniform age threshold.
//!
//! - `store`: the object-store seam (S3 adapter and an in-memory test double)
//! - `clock`: injectable time source for age computation
//! - `multipart`: aborts stale in-flight multipart uploads
//! - `uploads`: removes stale upload-session folders found via their markers
//! - `sweep`: walks repository prefixes and drives both reapers

pub mod clock;
pub mod multipart;
pub mod store;
pub mod sweep;
pub mod uploads;

// Re-export commonly used types
pub use multipart::MultipartUploadReaper;
pub use sweep::{SweepSummary, Sweeper};
pub use uploads::{FolderStats, UploadFolderReaper};
