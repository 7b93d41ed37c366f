//! CLI surface: spec.md §6, ported from
//! `original_source/anacsync/cli.py`'s command handlers, argument parsing
//! rebuilt on `clap` derive in the style of `foiacquire`'s
//! `cli::commands::Cli`/`Commands`.
//!
//! Six verbs over one `Config`: `crawl`, `scan`, `plan`, `download`,
//! `sort`, `report`. Exit codes follow spec.md §7 — only a fatal
//! configuration or I/O error returns `Err`; per-item fetch failures are
//! summarized but never change the exit code.

use clap::{Parser, Subcommand};
use tracing::info;

use crate::config::Config;
use crate::http::Transport;
use crate::state::StateDir;

#[derive(Parser)]
#[command(name = "anacsync")]
#[command(about = "Resilient mirror of a public open-data catalog to a local filesystem")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled, for logging setup that must happen
/// before `Cli::parse()` has run.
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Discover datasets and resources from the catalog
    Crawl,

    /// Scan the local filesystem and rebuild the inventory
    Scan,

    /// Diff the catalog against the inventory and write a plan
    Plan {
        /// Only plan items that are entirely missing locally
        #[arg(long)]
        only_missing: bool,
        /// Restrict to datasets whose slug contains this substring
        #[arg(long)]
        slug: Option<String>,
    },

    /// Execute the latest plan's transfers
    Download,

    /// Move downloaded files into their configured locations
    Sort,

    /// Show a summary of catalog, inventory and configuration state
    Report,
}

/// Parse `argv`, build a `Config`, and dispatch to the matching phase.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    config.ensure_state_layout()?;

    match cli.command {
        Commands::Crawl => run_crawl(&config).await?,
        Commands::Scan => run_scan(&config)?,
        Commands::Plan { only_missing, slug } => run_plan_cmd(&config, only_missing, slug.as_deref())?,
        Commands::Download => run_download(&config).await?,
        Commands::Sort => run_sort(&config)?,
        Commands::Report => run_report(&config)?,
    }

    Ok(())
}

async fn run_crawl(config: &Config) -> anyhow::Result<()> {
    let transport = Transport::new(config)?;
    let stats = crate::crawler::crawl_all(config, &transport).await?;
    info!("crawl complete: {:?}", stats);
    println!(
        "Crawled {} pages: {} datasets ({} new), {} resources ({} new)",
        stats.pages_crawled, stats.datasets_found, stats.datasets_new, stats.resources_new
    );
    Ok(())
}

fn run_scan(config: &Config) -> anyhow::Result<()> {
    let stats = crate::inventory::scan_local(config)?;
    println!(
        "Scanned {} files: {} new, {} updated, {} removed",
        stats.files_scanned, stats.files_new, stats.files_updated, stats.files_removed
    );
    Ok(())
}

fn run_plan_cmd(config: &Config, only_missing: bool, slug: Option<&str>) -> anyhow::Result<()> {
    let outcome = crate::planner::make_plan(config, only_missing, slug)?;
    match &outcome.path {
        Some(path) => println!("Wrote {} items to {}", outcome.items.len(), path.display()),
        None => println!("Nothing to plan — everything is up to date"),
    }
    println!(
        "missing={} size_changed={} corrupted={} up_to_date={}",
        outcome.stats.missing, outcome.stats.size_changed, outcome.stats.corrupted, outcome.stats.up_to_date
    );
    Ok(())
}

async fn run_download(config: &Config) -> anyhow::Result<()> {
    let state = StateDir::new(&config.state_dir);
    let Some(plan_path) = state.latest_plan_path()? else {
        println!("No plan found — run `anacsync plan` first");
        return Ok(());
    };
    let items: Vec<crate::state::PlanItem> = crate::state::Table::new(&plan_path).read_all()?;
    let transport = Transport::new(config)?;
    let stats = crate::fetch::run_plan(config, &transport, &items).await?;
    println!(
        "Downloaded {}/{} items ({} bytes); {} failed",
        stats.successful, stats.total_items, stats.total_bytes, stats.failed
    );
    Ok(())
}

fn run_sort(config: &Config) -> anyhow::Result<()> {
    let stats = crate::sorter::sort_all(config)?;
    println!(
        "Moved {} files, {} already sorted, {} unsorted, {} failed",
        stats.files_moved, stats.files_already_sorted, stats.files_unsorted, stats.files_failed
    );
    Ok(())
}

fn run_report(config: &Config) -> anyhow::Result<()> {
    let state = StateDir::new(&config.state_dir);
    let datasets: usize = state.datasets().read_all::<crate::state::Dataset>()?.len();
    let resources: usize = state.resources().read_all::<crate::state::Resource>()?.len();
    let local_files: usize = state.inventory().read_all::<crate::state::LocalFile>()?.len();

    println!("Sync Status Report");
    println!("  Datasets in catalog:  {datasets}");
    println!("  Resources in catalog: {resources}");
    println!("  Local files:          {local_files}");
    println!();
    println!("Configuration:");
    println!("  Root directory:  {}", config.root_dir.display());
    println!("  State directory: {}", config.state_dir.display());
    println!("  Rate limit:      {} req/s", config.downloader.rate_limit_rps);
    println!(
        "  Download strategies: {}",
        config
            .downloader
            .strategies
            .iter()
            .map(|s| s.name())
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(())
}
