//! sitepush - 将构建好的静态站点同步到 S3 存储桶

use anyhow::{Context, Result};
use clap::Parser;
use sitepush::config::{SiteConfig, TargetConfig, DEFAULT_CONFIG_FILE};
use sitepush::core::{DeployOptions, ExecutorOptions, HeaderPolicy, ScanConfig};
use sitepush::logging::init_logging;
use sitepush::{create_storage, deploy};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

const DEFAULT_ENV: &str = "staging";

#[derive(Debug, Parser)]
#[command(name = "sitepush", version, about = "Sync a built static site to an S3 bucket")]
struct Cli {
    /// Config file
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Compute and print the plan. Will NOT change the bucket.
    #[arg(short, long, conflicts_with = "deploy")]
    test: bool,

    /// Apply the plan to the bucket.
    #[arg(short, long)]
    deploy: bool,

    /// Target name from the config file
    #[arg(long, conflicts_with = "bucket")]
    env: Option<String>,

    /// Bucket name, bypassing configured targets
    #[arg(long)]
    bucket: Option<String>,

    /// Built site directory (overrides sourceDir)
    #[arg(long)]
    source: Option<PathBuf>,

    /// Keep objects that no longer exist locally
    #[arg(long)]
    no_delete: bool,

    /// Upload every local file, even unchanged ones
    #[arg(long)]
    overwrite_all: bool,

    /// Do not remove legacy `.gz` copies of deleted objects
    #[arg(long)]
    no_gzip_cleanup: bool,

    /// Max concurrent uploads/deletes
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn target(&self, config: &SiteConfig) -> Result<TargetConfig> {
        if let Some(bucket) = &self.bucket {
            return Ok(TargetConfig::for_bucket(bucket));
        }
        let env = self.env.as_deref().unwrap_or(DEFAULT_ENV);
        config.target(env).cloned()
    }

    fn deploy_options(&self, config: &SiteConfig) -> DeployOptions {
        let max_concurrent = self.jobs.unwrap_or(config.deploy.max_concurrent);
        DeployOptions {
            overwrite_all: self.overwrite_all,
            executor: ExecutorOptions {
                no_delete: self.no_delete,
                gzip_variant_cleanup: config.deploy.cleanup_gzip_variants && !self.no_gzip_cleanup,
                max_concurrent,
                dry_run: self.test,
            },
            scan: ScanConfig {
                exclude_patterns: config.deploy.exclude_patterns.clone(),
                max_concurrent,
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    if !cli.test && !cli.deploy {
        println!("Doing nothing. Type -h for help.");
        return Ok(ExitCode::SUCCESS);
    }

    let config = SiteConfig::load(&cli.config)?;
    init_logging(&config.log.clone().with_verbosity(cli.verbose));

    let target = cli.target(&config)?;
    let storage = create_storage(&target)
        .with_context(|| format!("cannot open bucket {}", target.bucket))?;
    let source_dir = cli.source.clone().unwrap_or_else(|| config.source_dir.clone());

    let cancelled = Arc::new(AtomicBool::new(false));
    {
        let cancelled = cancelled.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("收到中断信号，等待进行中的操作完成...");
                cancelled.store(true, Ordering::SeqCst);
            }
        });
    }

    if cli.test {
        info!("Test run: the bucket will not be modified");
    }

    let report = deploy(
        storage,
        &source_dir,
        HeaderPolicy::new(config.cache.clone()),
        cli.deploy_options(&config),
        cancelled,
    )
    .await
    .with_context(|| format!("deploy to {} failed", target.bucket))?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report);
    }

    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
