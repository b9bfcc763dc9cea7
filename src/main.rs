use clap::Parser;
use record_harvester::harvest::formats::{create_file_sink, OutputFormat};
use record_harvester::harvest::{HarvestError, HarvestPipeline};
use record_harvester::remote::HttpFetcher;
use record_harvester::{CharacterRecord, HarvestConfig};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Harvests character records over a sampled id range into one table.
#[derive(Debug, Parser)]
#[command(name = "record-harvester", version, about)]
struct Cli {
    /// JSON configuration file; flags below override its values
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Highest key to fetch (inclusive)
    #[arg(long)]
    max_key: Option<u64>,

    /// Maximum number of concurrent fetches
    #[arg(short, long)]
    workers: Option<usize>,

    /// Distance between consecutive keys
    #[arg(short, long)]
    stride: Option<u64>,

    /// First key (defaults to the stride)
    #[arg(long)]
    start_key: Option<u64>,

    /// Number of key partitions (defaults to the worker count)
    #[arg(long)]
    partitions: Option<usize>,

    /// Per-fetch timeout in milliseconds
    #[arg(long, value_name = "MS")]
    fetch_timeout_ms: Option<u64>,

    /// Output file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format: csv or jsonl
    #[arg(short, long)]
    format: Option<OutputFormat>,

    /// Root URL of the record service
    #[arg(long)]
    base_url: Option<String>,
}

impl Cli {
    fn into_config(self) -> Result<HarvestConfig, HarvestError> {
        let mut config = match &self.config {
            Some(path) => HarvestConfig::from_json_file(path)?,
            None => HarvestConfig::default(),
        };

        if let Some(max_key) = self.max_key {
            config.max_key = max_key;
        }
        if let Some(workers) = self.workers {
            config.worker_count = workers;
        }
        if let Some(stride) = self.stride {
            config.stride = stride;
        }
        if self.start_key.is_some() {
            config.start_key = self.start_key;
        }
        if self.partitions.is_some() {
            config.partition_count = self.partitions;
        }
        if self.fetch_timeout_ms.is_some() {
            config.fetch_timeout_ms = self.fetch_timeout_ms;
        }
        if let Some(output) = self.output {
            config.output = output;
        }
        if let Some(format) = self.format {
            config.format = format;
        }
        if let Some(base_url) = self.base_url {
            config.base_url = base_url;
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<(), HarvestError> {
    init_logging();

    let config = Cli::parse().into_config()?;
    let source = config.task_source()?;

    info!(
        max_key = config.max_key,
        workers = config.worker_count,
        stride = config.stride,
        partitions = config.partition_count(),
        output = %config.output.display(),
        format = %config.format,
        "Configuration loaded"
    );

    let pipeline = HarvestPipeline::new(HttpFetcher::new(&config.base_url), config.worker_count)
        .with_fetch_timeout(config.fetch_timeout());

    let shutdown = pipeline.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight fetches");
            shutdown.cancel();
        }
    });

    // The output file is only created once the run has produced a result.
    let result = pipeline
        .harvest_into(&source, || {
            create_file_sink::<CharacterRecord>(config.format, &config.output)
        })
        .await?;

    if result.cancelled {
        warn!(
            skipped = result.stats.keys_skipped,
            "Run was interrupted; output contains a partial harvest"
        );
    }

    match serde_json::to_string(&result.stats) {
        Ok(summary) => info!(stats = %summary, "Run summary"),
        Err(e) => warn!(error = %e, "Could not encode run summary"),
    }

    Ok(())
}
