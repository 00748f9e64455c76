use std::path::Path;

use anyhow::bail;
use serde::{Deserialize, Serialize};
use url::Url;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "registry-sweeper.toml";

const ENV_PREFIX: &str = "REGISTRY_SWEEPER__";

/// Connection settings for the S3-compatible object store.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct S3Config {
    /// Endpoint URL, e.g. `http://localhost:9000`. The URL scheme selects
    /// plain HTTP or TLS.
    /// Env: REGISTRY_SWEEPER__S3__ENDPOINT
    #[serde(default)]
    pub endpoint: String,

    /// Bucket holding the registry tree.
    /// Env: REGISTRY_SWEEPER__S3__BUCKET
    #[serde(default)]
    pub bucket: String,

    /// Env: REGISTRY_SWEEPER__S3__REGION
    #[serde(default = "default_region")]
    pub region: String,

    /// Use path-style addressing, required by MinIO-style endpoints.
    /// Env: REGISTRY_SWEEPER__S3__FORCE_PATH_STYLE
    #[serde(default = "default_force_path_style")]
    pub force_path_style: bool,

    /// Accept any TLS certificate presented by the endpoint.
    /// Env: REGISTRY_SWEEPER__S3__SKIP_TLS_VERIFY
    #[serde(default)]
    pub skip_tls_verify: bool,

    /// Static credentials. When either half is unset the SDK provider chain
    /// applies instead (environment, shared credentials file, instance role).
    /// Env: REGISTRY_SWEEPER__S3__ACCESS_KEY_ID
    #[serde(default)]
    pub access_key_id: Option<String>,

    /// Env: REGISTRY_SWEEPER__S3__SECRET_ACCESS_KEY
    #[serde(default)]
    pub secret_access_key: Option<String>,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            bucket: String::new(),
            region: default_region(),
            force_path_style: default_force_path_style(),
            skip_tls_verify: false,
            access_key_id: None,
            secret_access_key: None,
        }
    }
}

fn default_region() -> String {
    "us-west-1".to_string()
}

fn default_force_path_style() -> bool {
    true
}

/// Cleanup policy applied uniformly to multipart uploads and upload-session
/// folders.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Age threshold in whole hours; items strictly older are removed.
    /// Env: REGISTRY_SWEEPER__CLEANUP__STALE_AFTER_HOURS
    #[serde(default = "default_stale_after_hours")]
    pub stale_after_hours: u64,

    /// Report what would be removed without issuing deletes or aborts.
    /// Env: REGISTRY_SWEEPER__CLEANUP__DRY_RUN
    #[serde(default)]
    pub dry_run: bool,

    /// Root of the registry repository tree.
    /// Env: REGISTRY_SWEEPER__CLEANUP__ROOT_PREFIX
    #[serde(default = "default_root_prefix")]
    pub root_prefix: String,

    /// chrono format string the `startedat` marker body must match exactly.
    /// Env: REGISTRY_SWEEPER__CLEANUP__STARTED_AT_FORMAT
    #[serde(default = "default_started_at_format")]
    pub started_at_format: String,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            stale_after_hours: default_stale_after_hours(),
            dry_run: false,
            root_prefix: default_root_prefix(),
            started_at_format: default_started_at_format(),
        }
    }
}

impl CleanupConfig {
    /// Age-threshold test shared by both reapers. Ages are whole truncated
    /// hours; an item exactly at the threshold is retained.
    pub fn is_stale(&self, age_hours: i64) -> bool {
        age_hours > i64::try_from(self.stale_after_hours).unwrap_or(i64::MAX)
    }
}

fn default_stale_after_hours() -> u64 {
    12
}

fn default_root_prefix() -> String {
    "docker/registry/v2/repositories/".to_string()
}

fn default_started_at_format() -> String {
    "%Y-%m-%dT%H:%M:%SZ".to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Configuration {
    /// Object store connection settings
    pub s3: S3Config,
    /// Cleanup policy
    pub cleanup: CleanupConfig,
}

impl Configuration {
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config = Figment::from(Serialized::defaults(Configuration::default()))
            .merge(Toml::file(DEFAULT_CONFIG_FILE))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, Box<figment::Error>> {
        let config = Figment::from(Serialized::defaults(Configuration::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.s3.endpoint.is_empty() {
            bail!("S3 endpoint cannot be empty (set --endpoint or REGISTRY_SWEEPER__S3__ENDPOINT)");
        }
        match Url::parse(&self.s3.endpoint) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => bail!(
                "S3 endpoint must use http or https, got {}://",
                url.scheme()
            ),
            Err(err) => bail!("S3 endpoint {:?} is not a valid URL: {err}", self.s3.endpoint),
        }
        if self.s3.bucket.is_empty() {
            bail!("S3 bucket cannot be empty (set --bucket or REGISTRY_SWEEPER__S3__BUCKET)");
        }
        if self.cleanup.stale_after_hours == 0 {
            bail!("cleanup.stale_after_hours must be at least 1");
        }
        if self.cleanup.started_at_format.is_empty() {
            bail!("cleanup.started_at_format cannot be empty");
        }
        if !self.cleanup.root_prefix.ends_with('/') {
            bail!("cleanup.root_prefix must end with '/'");
        }
        Ok(())
    }
}
