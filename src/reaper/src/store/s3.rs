//! S3-backed [`StorageClient`] built on the AWS SDK.

use std::sync::Arc;

use async_trait::async_trait;
use aws_config::Region;
use aws_credential_types::Credentials;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_smithy_runtime::client::http::hyper_014::HyperClientBuilder;
use aws_smithy_runtime_api::client::http::SharedHttpClient;
use chrono::{DateTime, Utc};
use common::config::S3Config;

use super::{MultipartUpload, ObjectPage, PrefixPage, StorageClient, StoreError, UploadPage};

/// Client for the registry bucket.
#[derive(Debug, Clone)]
pub struct S3Store {
    client: Client,
}

impl S3Store {
    /// Builds a client from the storage section of the configuration.
    ///
    /// Static credentials take precedence when both keys are set; otherwise
    /// the SDK default chain (environment, shared profile, instance role)
    /// applies.
    pub async fn from_config(config: &S3Config) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .endpoint_url(&config.endpoint)
            .region(Region::new(config.region.clone()));

        if let (Some(access_key), Some(secret_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            loader = loader.credentials_provider(Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "registry-sweeper",
            ));
        }
        if config.skip_tls_verify {
            loader = loader.http_client(insecure_http_client());
        }

        let shared_config = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&shared_config)
            .force_path_style(config.force_path_style)
            .build();

        Self {
            client: Client::from_conf(s3_config),
        }
    }
}

/// HTTP stack that accepts any server certificate, for self-hosted endpoints
/// fronted by self-signed certificates.
fn insecure_http_client() -> SharedHttpClient {
    let tls = rustls::ClientConfig::builder()
        .with_safe_defaults()
        .with_custom_certificate_verifier(Arc::new(NoCertificateVerification))
        .with_no_client_auth();
    let connector = hyper_rustls::HttpsConnectorBuilder::new()
        .with_tls_config(tls)
        .https_or_http()
        .enable_http1()
        .enable_http2()
        .build();
    HyperClientBuilder::new().build(connector)
}

#[derive(Debug)]
struct NoCertificateVerification;

impl rustls::client::ServerCertVerifier for NoCertificateVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::Certificate,
        _intermediates: &[rustls::Certificate],
        _server_name: &rustls::ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> Result<rustls::client::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::ServerCertVerified::assertion())
    }
}

fn request_error<E: std::error::Error>(operation: &'static str, err: E) -> StoreError {
    StoreError::Request {
        operation,
        message: DisplayErrorContext(err).to_string(),
    }
}

#[async_trait]
impl StorageClient for S3Store {
    async fn list_common_prefixes(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
        marker: Option<&str>,
        max_keys: i32,
    ) -> Result<PrefixPage, StoreError> {
        let resp = self
            .client
            .list_objects()
            .bucket(bucket)
            .prefix(prefix)
            .delimiter(delimiter)
            .set_marker(marker.map(str::to_string))
            .max_keys(max_keys)
            .send()
            .await
            .map_err(|err| request_error("ListObjects", err))?;

        let common_prefixes = resp
            .common_prefixes()
            .iter()
            .filter_map(|cp| cp.prefix().map(str::to_string))
            .collect();
        let contents = resp
            .contents()
            .iter()
            .filter_map(|object| object.key().map(str::to_string))
            .collect();

        Ok(PrefixPage {
            common_prefixes,
            contents,
            is_truncated: resp.is_truncated().unwrap_or(false),
        })
    }

    async fn list_multipart_uploads(
        &self,
        bucket: &str,
        prefix: &str,
        key_marker: Option<&str>,
        upload_id_marker: Option<&str>,
        max_uploads: i32,
    ) -> Result<UploadPage, StoreError> {
        let resp = self
            .client
            .list_multipart_uploads()
            .bucket(bucket)
            .prefix(prefix)
            .set_key_marker(key_marker.map(str::to_string))
            .set_upload_id_marker(upload_id_marker.map(str::to_string))
            .max_uploads(max_uploads)
            .send()
            .await
            .map_err(|err| request_error("ListMultipartUploads", err))?;

        // Records missing a key, id, or timestamp cannot be acted on; skip them
        let uploads = resp
            .uploads()
            .iter()
            .filter_map(|upload| {
                let key = upload.key()?.to_string();
                let upload_id = upload.upload_id()?.to_string();
                let initiated = upload.initiated()?;
                let initiated_at =
                    DateTime::<Utc>::from_timestamp(initiated.secs(), initiated.subsec_nanos())?;
                Some(MultipartUpload {
                    key,
                    upload_id,
                    initiated_at,
                })
            })
            .collect();

        Ok(UploadPage {
            uploads,
            is_truncated: resp.is_truncated().unwrap_or(false),
        })
    }

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), StoreError> {
        self.client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|err| request_error("AbortMultipartUpload", err))?;
        Ok(())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<&str>,
        max_keys: i32,
    ) -> Result<ObjectPage, StoreError> {
        let resp = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .set_continuation_token(continuation_token.map(str::to_string))
            .max_keys(max_keys)
            .send()
            .await
            .map_err(|err| request_error("ListObjectsV2", err))?;

        let keys = resp
            .contents()
            .iter()
            .filter_map(|object| object.key().map(str::to_string))
            .collect();

        Ok(ObjectPage {
            keys,
            next_continuation_token: resp.next_continuation_token().map(str::to_string),
            is_truncated: resp.is_truncated().unwrap_or(false),
        })
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        let resp = match self.client.get_object().bucket(bucket).key(key).send().await {
            Ok(resp) => resp,
            Err(err) if err.as_service_error().is_some_and(|e| e.is_no_such_key()) => {
                return Err(StoreError::NotFound {
                    key: key.to_string(),
                });
            }
            Err(err) => return Err(request_error("GetObject", err)),
        };
        let body = resp
            .body
            .collect()
            .await
            .map_err(|err| request_error("GetObject", err))?;
        Ok(body.into_bytes().to_vec())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| request_error("DeleteObject", err))?;
        Ok(())
    }
}
