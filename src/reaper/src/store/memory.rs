//! Deterministic in-memory store used by the test suites.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{MultipartUpload, ObjectPage, PrefixPage, StorageClient, StoreError, UploadPage};

/// Record of one store call, kept for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    ListPrefixes { prefix: String },
    ListUploads { prefix: String },
    AbortUpload { key: String, upload_id: String },
    ListObjects { prefix: String },
    Get { key: String },
    Delete { key: String },
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<String, Vec<u8>>,
    // (key, upload_id) -> initiated_at; the map keeps S3's key-then-id order
    uploads: BTreeMap<(String, String), DateTime<Utc>>,
    ops: Vec<StoreOp>,
    fail_prefixes: Vec<String>,
}

impl State {
    fn check_failure(&self, operation: &'static str, path: &str) -> Result<(), StoreError> {
        if self.fail_prefixes.iter().any(|p| path.starts_with(p.as_str())) {
            return Err(StoreError::Request {
                operation,
                message: format!("injected failure for {path}"),
            });
        }
        Ok(())
    }

    fn record(&mut self, op: StoreOp) {
        self.ops.push(op);
    }
}

/// In-memory [`StorageClient`] honoring the same pagination contracts as S3:
/// lexicographic key order, markers resuming strictly after the last-seen
/// item. Records every call and can inject failures per key prefix.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_object(&self, key: impl Into<String>, body: impl Into<Vec<u8>>) {
        self.state
            .write()
            .await
            .objects
            .insert(key.into(), body.into());
    }

    pub async fn put_multipart_upload(
        &self,
        key: impl Into<String>,
        upload_id: impl Into<String>,
        initiated_at: DateTime<Utc>,
    ) {
        self.state
            .write()
            .await
            .uploads
            .insert((key.into(), upload_id.into()), initiated_at);
    }

    /// Keys currently stored, in listing order.
    pub async fn object_keys(&self) -> Vec<String> {
        self.state.read().await.objects.keys().cloned().collect()
    }

    /// (key, upload_id) pairs of the uploads still in flight.
    pub async fn multipart_uploads(&self) -> Vec<(String, String)> {
        self.state.read().await.uploads.keys().cloned().collect()
    }

    pub async fn operations(&self) -> Vec<StoreOp> {
        self.state.read().await.ops.clone()
    }

    /// Makes any call whose key or listed prefix starts with `prefix` fail.
    pub async fn inject_failure(&self, prefix: impl Into<String>) {
        self.state.write().await.fail_prefixes.push(prefix.into());
    }
}

#[async_trait]
impl StorageClient for InMemoryStore {
    async fn list_common_prefixes(
        &self,
        _bucket: &str,
        prefix: &str,
        delimiter: &str,
        marker: Option<&str>,
        max_keys: i32,
    ) -> Result<PrefixPage, StoreError> {
        let mut state = self.state.write().await;
        state.check_failure("ListObjects", prefix)?;
        state.record(StoreOp::ListPrefixes {
            prefix: prefix.to_string(),
        });

        let mut page = PrefixPage::default();
        let mut items: i32 = 0;
        for key in state.objects.keys() {
            if !key.starts_with(prefix) {
                continue;
            }
            if let Some(m) = marker {
                if key.as_str() <= m {
                    continue;
                }
            }
            let rest = &key[prefix.len()..];
            if let Some(idx) = rest.find(delimiter) {
                let rolled_up = format!("{prefix}{}", &rest[..idx + delimiter.len()]);
                // Keys are sorted, so one common prefix forms one contiguous run
                if page.common_prefixes.last() == Some(&rolled_up) {
                    continue;
                }
                if items == max_keys {
                    page.is_truncated = true;
                    break;
                }
                page.common_prefixes.push(rolled_up);
            } else {
                if items == max_keys {
                    page.is_truncated = true;
                    break;
                }
                page.contents.push(key.clone());
            }
            items += 1;
        }
        Ok(page)
    }

    async fn list_multipart_uploads(
        &self,
        _bucket: &str,
        prefix: &str,
        key_marker: Option<&str>,
        upload_id_marker: Option<&str>,
        max_uploads: i32,
    ) -> Result<UploadPage, StoreError> {
        let mut state = self.state.write().await;
        state.check_failure("ListMultipartUploads", prefix)?;
        state.record(StoreOp::ListUploads {
            prefix: prefix.to_string(),
        });

        let mut page = UploadPage::default();
        for ((key, upload_id), initiated_at) in state.uploads.iter() {
            if !key.starts_with(prefix) {
                continue;
            }
            match (key_marker, upload_id_marker) {
                (Some(km), Some(um)) => {
                    if (key.as_str(), upload_id.as_str()) <= (km, um) {
                        continue;
                    }
                }
                (Some(km), None) => {
                    if key.as_str() <= km {
                        continue;
                    }
                }
                _ => {}
            }
            if page.uploads.len() as i32 == max_uploads {
                page.is_truncated = true;
                break;
            }
            page.uploads.push(MultipartUpload {
                key: key.clone(),
                upload_id: upload_id.clone(),
                initiated_at: *initiated_at,
            });
        }
        Ok(page)
    }

    async fn abort_multipart_upload(
        &self,
        _bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.check_failure("AbortMultipartUpload", key)?;
        state.record(StoreOp::AbortUpload {
            key: key.to_string(),
            upload_id: upload_id.to_string(),
        });
        state
            .uploads
            .remove(&(key.to_string(), upload_id.to_string()));
        Ok(())
    }

    async fn list_objects(
        &self,
        _bucket: &str,
        prefix: &str,
        continuation_token: Option<&str>,
        max_keys: i32,
    ) -> Result<ObjectPage, StoreError> {
        let mut state = self.state.write().await;
        state.check_failure("ListObjectsV2", prefix)?;
        state.record(StoreOp::ListObjects {
            prefix: prefix.to_string(),
        });

        let mut page = ObjectPage::default();
        for key in state.objects.keys() {
            if !key.starts_with(prefix) {
                continue;
            }
            if let Some(token) = continuation_token {
                if key.as_str() <= token {
                    continue;
                }
            }
            if page.keys.len() as i32 == max_keys {
                page.is_truncated = true;
                break;
            }
            page.keys.push(key.clone());
        }
        if page.is_truncated {
            page.next_continuation_token = page.keys.last().cloned();
        }
        Ok(page)
    }

    async fn get_object(&self, _bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        let mut state = self.state.write().await;
        state.check_failure("GetObject", key)?;
        state.record(StoreOp::Get {
            key: key.to_string(),
        });
        state
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                key: key.to_string(),
            })
    }

    async fn delete_object(&self, _bucket: &str, key: &str) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.check_failure("DeleteObject", key)?;
        state.record(StoreOp::Delete {
            key: key.to_string(),
        });
        state.objects.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUCKET: &str = "test-bucket";

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_flat_listing_paginates_without_gaps() {
        for count in [0usize, 1, 100, 101, 300] {
            let store = InMemoryStore::new();
            for i in 0..count {
                store.put_object(format!("data/key-{i:04}"), b"x".to_vec()).await;
            }

            let mut seen = Vec::new();
            let mut token: Option<String> = None;
            loop {
                let page = store
                    .list_objects(BUCKET, "data/", token.as_deref(), 100)
                    .await
                    .unwrap();
                seen.extend(page.keys);
                if page.is_truncated {
                    token = page.next_continuation_token;
                } else {
                    break;
                }
            }

            assert_eq!(seen, store.object_keys().await, "count={count}");
        }
    }

    #[tokio::test]
    async fn test_prefix_listing_rolls_up_common_prefixes() {
        let store = InMemoryStore::new();
        store.put_object("root/alpha/blob", b"x".to_vec()).await;
        store.put_object("root/alpha/manifest", b"x".to_vec()).await;
        store.put_object("root/beta/blob", b"x".to_vec()).await;
        store.put_object("root/loose-file", b"x".to_vec()).await;

        let page = store
            .list_common_prefixes(BUCKET, "root/", "/", None, 100)
            .await
            .unwrap();

        assert_eq!(page.common_prefixes, vec!["root/alpha/", "root/beta/"]);
        assert_eq!(page.contents, vec!["root/loose-file"]);
        assert!(!page.is_truncated);
    }

    #[tokio::test]
    async fn test_prefix_listing_truncates_at_page_size() {
        let store = InMemoryStore::new();
        for i in 0..5 {
            store.put_object(format!("root/repo-{i}/blob"), b"x".to_vec()).await;
        }

        let page = store
            .list_common_prefixes(BUCKET, "root/", "/", None, 3)
            .await
            .unwrap();

        assert_eq!(page.common_prefixes.len(), 3);
        assert!(page.contents.is_empty());
        assert!(page.is_truncated);
    }

    #[tokio::test]
    async fn test_multipart_listing_resumes_after_marker_pair() {
        let store = InMemoryStore::new();
        let when = ts("2024-03-01T00:00:00Z");
        store.put_multipart_upload("k", "u1", when).await;
        store.put_multipart_upload("k", "u2", when).await;
        store.put_multipart_upload("k", "u3", when).await;
        store.put_multipart_upload("l", "u1", when).await;

        let first = store
            .list_multipart_uploads(BUCKET, "", None, None, 2)
            .await
            .unwrap();
        assert!(first.is_truncated);
        let pairs: Vec<_> = first
            .uploads
            .iter()
            .map(|u| (u.key.as_str(), u.upload_id.as_str()))
            .collect();
        assert_eq!(pairs, vec![("k", "u1"), ("k", "u2")]);

        let second = store
            .list_multipart_uploads(BUCKET, "", Some("k"), Some("u2"), 2)
            .await
            .unwrap();
        assert!(!second.is_truncated);
        let pairs: Vec<_> = second
            .uploads
            .iter()
            .map(|u| (u.key.as_str(), u.upload_id.as_str()))
            .collect();
        assert_eq!(pairs, vec![("k", "u3"), ("l", "u1")]);
    }

    #[tokio::test]
    async fn test_abort_removes_only_the_matching_upload() {
        let store = InMemoryStore::new();
        let when = ts("2024-03-01T00:00:00Z");
        store.put_multipart_upload("k", "u1", when).await;
        store.put_multipart_upload("k", "u2", when).await;

        store.abort_multipart_upload(BUCKET, "k", "u1").await.unwrap();

        assert_eq!(
            store.multipart_uploads().await,
            vec![("k".to_string(), "u2".to_string())]
        );
    }

    #[tokio::test]
    async fn test_get_missing_object_is_not_found() {
        let store = InMemoryStore::new();
        let err = store.get_object(BUCKET, "absent").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_injected_failure_surfaces() {
        let store = InMemoryStore::new();
        store.put_object("boom/key", b"x".to_vec()).await;
        store.inject_failure("boom/").await;

        assert!(store.list_objects(BUCKET, "boom/", None, 10).await.is_err());
        assert!(store.get_object(BUCKET, "boom/key").await.is_err());
        assert!(store.delete_object(BUCKET, "boom/key").await.is_err());

        // Untouched paths keep working
        store.put_object("ok/key", b"x".to_vec()).await;
        assert!(store.get_object(BUCKET, "ok/key").await.is_ok());
    }

    #[tokio::test]
    async fn test_operations_are_recorded() {
        let store = InMemoryStore::new();
        store.put_object("a", b"x".to_vec()).await;
        store.get_object(BUCKET, "a").await.unwrap();
        store.delete_object(BUCKET, "a").await.unwrap();

        let ops = store.operations().await;
        assert_eq!(
            ops,
            vec![
                StoreOp::Get {
                    key: "a".to_string()
                },
                StoreOp::Delete {
                    key: "a".to_string()
                },
            ]
        );
    }
}
