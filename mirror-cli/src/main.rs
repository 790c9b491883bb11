use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use mirror::{
    list_keys, prune_directory, LocalStore, MirrorEngine, MirrorReport, ObjectSource,
    ProgressChannel, PruneOptions, PruneReport, S3ObjectSource,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info};

mod config;
mod logging;

use config::MirrorConfig;
use logging::LogFormat;

#[derive(Parser)]
#[command(name = "bucket-mirror")]
#[command(about = "Mirror an object-storage bucket onto a local directory")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    /// Print the pass summary as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(flatten)]
    bucket: BucketArgs,
}

#[derive(Args)]
struct BucketArgs {
    /// Bucket name
    #[arg(long, global = true)]
    bucket: Option<String>,

    /// Bucket region
    #[arg(long, global = true)]
    region: Option<String>,

    /// Access key id
    #[arg(long, global = true)]
    access_key: Option<String>,

    /// Secret access key
    #[arg(long, global = true)]
    secret_key: Option<String>,

    /// Custom endpoint for S3-compatible services
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Only mirror keys under this prefix
    #[arg(long, global = true)]
    prefix: Option<String>,

    /// Number of concurrent fetch workers
    #[arg(short, long, global = true)]
    workers: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch every remote object that is missing or differs locally
    Mirror {
        /// Local destination directory (must exist)
        destination: PathBuf,
        /// Delete local files that were not listed remotely
        #[arg(long)]
        prune: bool,
        /// Keep fetching after a failed object instead of aborting
        #[arg(long)]
        continue_on_error: bool,
    },
    /// Delete local files that do not exist in the bucket
    Prune {
        /// Local destination directory (must exist)
        destination: PathBuf,
        /// Only report what would be deleted
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!(error = %e, "Fatal error");
        eprintln!("❌ {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => MirrorConfig::load(path)
            .await
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => MirrorConfig::default(),
    };
    apply_overrides(&mut config, &cli);

    logging::init_logging(&config.log_level, cli.log_format)?;
    config.validate().context("Invalid configuration")?;

    match cli.command {
        Commands::Mirror {
            destination,
            prune,
            continue_on_error,
        } => {
            if continue_on_error {
                config.transfer.continue_on_error = true;
            }
            let store = LocalStore::open(&destination)?;
            let source = connect(&config).await;

            let report = run_mirror(source, store.clone(), &config).await?;
            let pruned = if prune {
                Some(prune_directory(&store, &report.seen, PruneOptions::default()).await?)
            } else {
                None
            };

            print_mirror_summary(&report, pruned.as_ref(), cli.json)?;

            if !report.is_successful() {
                for failure in &report.failures {
                    error!(key = %failure.key, error = %failure.error, "Object was not mirrored");
                }
                anyhow::bail!("{} objects failed to mirror", report.failures.len());
            }
            Ok(())
        }
        Commands::Prune {
            destination,
            dry_run,
        } => {
            let store = LocalStore::open(&destination)?;
            let source = connect(&config).await;

            info!(source = %source.describe(), "Listing bucket to build the keep set");
            let keep = list_keys(source, config.list_options()).await?;
            let report = prune_directory(&store, &keep, PruneOptions { dry_run }).await?;

            if cli.json {
                println!("{}", report.deleted.to_json()?);
            } else {
                println!("{}", report.summary());
            }
            Ok(())
        }
    }
}

fn apply_overrides(config: &mut MirrorConfig, cli: &Cli) {
    let args = &cli.bucket;
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    if let Some(bucket) = &args.bucket {
        config.bucket.name = bucket.clone();
    }
    if let Some(region) = &args.region {
        config.bucket.region = region.clone();
    }
    if let Some(access_key) = &args.access_key {
        config.bucket.access_key = Some(access_key.clone());
    }
    if let Some(secret_key) = &args.secret_key {
        config.bucket.secret_key = Some(secret_key.clone());
    }
    if let Some(endpoint) = &args.endpoint {
        config.bucket.endpoint = Some(endpoint.clone());
    }
    if let Some(prefix) = &args.prefix {
        config.bucket.prefix = prefix.clone();
    }
    if let Some(workers) = args.workers {
        config.transfer.workers = workers;
    }
}

async fn connect(config: &MirrorConfig) -> Arc<dyn ObjectSource> {
    Arc::new(S3ObjectSource::connect(&config.s3_settings()).await)
}

async fn run_mirror(
    source: Arc<dyn ObjectSource>,
    store: LocalStore,
    config: &MirrorConfig,
) -> Result<MirrorReport> {
    let (reporter, mut channel) = ProgressChannel::new();
    let session_id = reporter.session_id();

    let progress_task = tokio::spawn(async move {
        while let Some(event) = channel.recv().await {
            debug!(?event, "Progress");
        }
    });

    info!(%session_id, source = %source.describe(), "Starting mirror");
    let result = {
        let mut engine =
            MirrorEngine::new(source, store, config.mirror_options()).with_progress(reporter);
        engine.run().await
    };

    // Every reporter is gone once the engine is dropped, which ends the consumer
    let _ = progress_task.await;

    Ok(result?)
}

fn print_mirror_summary(report: &MirrorReport, pruned: Option<&PruneReport>, json: bool) -> Result<()> {
    if json {
        let value = match pruned {
            Some(pruned) => serde_json::json!({
                "transfer": report.transfer,
                "deleted": pruned.deleted,
                "failures": report.failures.len(),
            }),
            None => serde_json::json!({
                "transfer": report.transfer,
                "failures": report.failures.len(),
            }),
        };
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{}", report.summary());
        if let Some(pruned) = pruned {
            println!("{}", pruned.summary());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::parse_from([
            "bucket-mirror",
            "--bucket",
            "media",
            "--workers",
            "3",
            "--prefix",
            "photos/",
            "mirror",
            "/tmp/out",
            "--prune",
        ]);
        let mut config = MirrorConfig::default();
        apply_overrides(&mut config, &cli);

        assert_eq!(config.bucket.name, "media");
        assert_eq!(config.bucket.prefix, "photos/");
        assert_eq!(config.transfer.workers, 3);
        assert!(matches!(cli.command, Commands::Mirror { prune: true, .. }));
    }

    #[test]
    fn test_prune_subcommand_parses() {
        let cli = Cli::parse_from(["bucket-mirror", "prune", "/tmp/out", "--dry-run", "--json"]);
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::Prune { dry_run: true, .. }));
    }
}
