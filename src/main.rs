use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use common::cli::{CommonArgs, utils};
use common::config::Configuration;
use reaper::Sweeper;
use reaper::clock::SystemClock;
use reaper::store::S3Store;

#[derive(Parser)]
#[command(name = "registry-sweeper")]
#[command(about = "Garbage collector for S3-backed Docker registry upload debris")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[arg(long, help = "Object store endpoint URL, e.g. https://s3.example.com:9000")]
    endpoint: Option<String>,

    #[arg(long, help = "Bucket holding the registry key layout")]
    bucket: Option<String>,

    #[arg(long, help = "Report what would be removed without mutating the bucket")]
    dry_run: bool,

    #[arg(long, help = "Accept any TLS certificate presented by the endpoint")]
    skip_tls_verify: bool,

    #[arg(long, help = "Age in whole hours past which uploads are considered stale")]
    stale_after_hours: Option<u64>,
}

impl Cli {
    /// Flags override whatever the configuration file and environment set.
    fn apply_to(&self, config: &mut Configuration) {
        if let Some(endpoint) = &self.endpoint {
            config.s3.endpoint = endpoint.clone();
        }
        if let Some(bucket) = &self.bucket {
            config.s3.bucket = bucket.clone();
        }
        if self.dry_run {
            config.cleanup.dry_run = true;
        }
        if self.skip_tls_verify {
            config.s3.skip_tls_verify = true;
        }
        if let Some(hours) = self.stale_after_hours {
            config.cleanup.stale_after_hours = hours;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on CLI arguments
    utils::init_logging(&cli.common);

    // Load application configuration
    let mut config = utils::load_config(cli.common.config.as_ref())?;
    cli.apply_to(&mut config);
    config.validate()?;

    log::info!(
        "Starting registry sweeper: endpoint={}, bucket={}, dry-run={}",
        config.s3.endpoint,
        config.s3.bucket,
        config.cleanup.dry_run
    );

    let store = S3Store::from_config(&config.s3).await;
    let sweeper = Sweeper::new(
        Arc::new(store),
        Arc::new(SystemClock),
        config.cleanup.clone(),
        config.s3.bucket.clone(),
    );

    let summary = sweeper
        .run()
        .await
        .context("failed to clean multipart uploads")?;

    log::info!(
        "Sweep finished: {} multipart uploads aborted, {} upload folders removed ({} objects)",
        summary.multipart_uploads_aborted,
        summary.upload_folders_removed,
        summary.folder_objects_deleted
    );

    Ok(())
}
