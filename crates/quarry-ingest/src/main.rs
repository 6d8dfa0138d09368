//! quarry command-line interface.
//!
//! # Usage
//!
//! ```bash
//! # Find datasets on the collection listing and initialise one store each
//! quarry discover --config collection.toml --root /data/crcns
//!
//! # Crawl one dataset with the template recorded in its .quarry/crawl.toml
//! quarry crawl /data/crcns/pvc-1
//!
//! # Show branches and whether the working tree has uncommitted changes
//! quarry status /data/crcns/pvc-1
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use quarry_core::metrics::init_metrics;
use quarry_ingest::{
    AnnexConfig, CachedFetcher, CollectionConfig, CrawlConfig, FetchConfig, Fetcher, HttpFetcher,
    RunContext, Template, collection_pipeline,
};
use quarry_store::{ContentStore, LocalStore, METADATA_DIR};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// Crawl published datasets into versioned, content-addressed stores.
#[derive(Parser, Debug)]
#[command(name = "quarry")]
#[command(about = "Branch-staged dataset crawler")]
#[command(version)]
struct Cli {
    /// Metrics HTTP server port (0 to disable)
    #[arg(long, env = "QUARRY_METRICS_PORT", default_value = "0", global = true)]
    metrics_port: u16,

    /// HTTP request timeout in seconds
    #[arg(long, default_value = "60", global = true)]
    timeout_secs: u64,

    /// Always go to the network instead of the local page cache
    #[arg(long, default_value = "false", global = true)]
    no_cache: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Discover datasets on a collection listing and initialise them
    Discover {
        /// Collection configuration (defaults describe the CRCNS listing)
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Directory new datasets are created under
        #[arg(long, default_value = ".")]
        root: PathBuf,
    },

    /// Run the crawl pipeline recorded in a dataset
    Crawl {
        /// Dataset directory
        dataset: PathBuf,

        /// Abort on the first failed download instead of skipping it
        #[arg(long, default_value = "false")]
        fail_fast: bool,

        /// Re-download files even when the remote reports them unchanged
        #[arg(long, default_value = "false")]
        no_statusdb: bool,
    },

    /// Show branches, heads and pending changes of a dataset
    Status {
        /// Dataset directory
        dataset: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("info".parse().context("invalid log directive")?)
                .add_directive("quarry_ingest=debug".parse().context("invalid log directive")?),
        )
        .init();

    let cli = Cli::parse();

    if cli.metrics_port > 0 {
        init_metrics(cli.metrics_port).context("Failed to start metrics server")?;
    }

    match &cli.command {
        Command::Discover { config, root } => discover(&cli, config.as_deref(), root),
        Command::Crawl {
            dataset,
            fail_fast,
            no_statusdb,
        } => crawl(
            &cli,
            dataset,
            AnnexConfig {
                continue_on_error: !fail_fast,
                use_statusdb: !no_statusdb,
            },
        ),
        Command::Status { dataset } => status(dataset),
    }
}

/// HTTP fetcher, behind the page cache kept under `metadata_root` unless
/// caching is disabled.
fn fetcher(cli: &Cli, metadata_root: &Path) -> Result<Arc<dyn Fetcher>> {
    let http = HttpFetcher::new(FetchConfig {
        timeout: Duration::from_secs(cli.timeout_secs),
        ..FetchConfig::default()
    })
    .context("Failed to build HTTP client")?;
    if cli.no_cache {
        return Ok(Arc::new(http));
    }
    let path = metadata_root.join(METADATA_DIR).join("cache").join("fetch.db");
    let cached = CachedFetcher::open(http, &path)
        .with_context(|| format!("Failed to open page cache at {}", path.display()))?;
    Ok(Arc::new(cached))
}

fn discover(cli: &Cli, config: Option<&Path>, root: &Path) -> Result<()> {
    let config = match config {
        Some(path) => CollectionConfig::load(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => CollectionConfig::default(),
    };
    std::fs::create_dir_all(root)
        .with_context(|| format!("Failed to create {}", root.display()))?;

    tracing::info!(url = %config.url, root = %root.display(), "Discovering datasets");
    let start = Instant::now();
    let pipeline = collection_pipeline::<LocalStore>(&config, root, fetcher(cli, root)?)?;
    let stats = pipeline.run(&RunContext::new()).context("Discovery failed")?;

    tracing::info!(
        datasets = stats.records_out,
        elapsed = ?start.elapsed(),
        "Discovery complete"
    );
    Ok(())
}

fn crawl(cli: &Cli, dataset: &Path, annex_config: AnnexConfig) -> Result<()> {
    // Validate the configuration before touching the network or the store
    let config = CrawlConfig::load(dataset)?;
    let template = Template::from_config(&config)?;

    let store = LocalStore::open(dataset)
        .with_context(|| format!("Failed to open dataset at {}", dataset.display()))?;
    let fetcher = fetcher(cli, dataset)?;

    tracing::info!(
        dataset = %dataset.display(),
        template = %config.crawl.template,
        "Starting crawl"
    );
    let start = Instant::now();
    let pipeline = template.build(store, fetcher, annex_config)?;
    pipeline.run(&RunContext::new()).context("Crawl failed")?;

    tracing::info!(elapsed = ?start.elapsed(), "Crawl complete");
    Ok(())
}

fn status(dataset: &Path) -> Result<()> {
    let store = LocalStore::open(dataset)
        .with_context(|| format!("Failed to open dataset at {}", dataset.display()))?;

    println!("dataset: {}", dataset.display());
    println!("backend: {}", store.backend().as_str());
    for branch in store.branches()? {
        let marker = if branch == store.active_branch() { "*" } else { " " };
        let head = store.head(&branch)?;
        let head = head.as_deref().map_or("(no commits)", |id| &id[..12.min(id.len())]);
        let commits = store.log(&branch)?.len();
        println!("{} {:<20} {} ({} commits)", marker, branch, head, commits);
    }
    println!(
        "working tree: {}",
        if store.is_dirty() { "dirty" } else { "clean" }
    );
    Ok(())
}
