//! Fetch Engine: spec.md §4.6, ported from
//! `original_source/anacsync/downloader/manager.py`'s `DownloadManager`.
//!
//! Runs a plan's items through the strategy cascade — S1 through S5 by
//! default — abandoning a strategy on error, on exhausting
//! `retries_per_strategy`, or after `switch_after_seconds_without_progress`
//! passes without the `.part` file growing. Every attempt is appended to
//! the history table regardless of outcome.

mod common;
mod strategies;

use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;

use tracing::{info, warn};

use crate::config::Config;
use crate::http::Transport;
use crate::state::{HistoryRecord, PlanItem, StateDir};
use crate::util::now_utc;

/// Outcome of one strategy attempt against one plan item.
#[derive(Debug, Clone)]
pub struct DownloadResult {
    pub ok: bool,
    pub strategy: String,
    pub bytes_written: u64,
    pub etag: Option<String>,
    pub error: Option<String>,
}

impl DownloadResult {
    fn success(strategy: &str, bytes_written: u64, etag: Option<String>) -> Self {
        Self {
            ok: true,
            strategy: strategy.to_string(),
            bytes_written,
            etag,
            error: None,
        }
    }

    fn failure(strategy: &str, error: impl Into<String>) -> Self {
        Self::failure_with_bytes(strategy, 0, error)
    }

    fn failure_with_bytes(strategy: &str, bytes_written: u64, error: impl Into<String>) -> Self {
        Self {
            ok: false,
            strategy: strategy.to_string(),
            bytes_written,
            etag: None,
            error: Some(error.into()),
        }
    }
}

/// Aggregate counters for one `run_plan` call.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct FetchStats {
    pub total_items: usize,
    pub successful: usize,
    pub failed: usize,
    pub total_bytes: u64,
    pub by_strategy: HashMap<String, usize>,
}

/// Run every item in `items` through the strategy cascade, appending one
/// `HistoryRecord` per attempt to the history table.
pub async fn run_plan(config: &Config, transport: &Transport, items: &[PlanItem]) -> crate::error::Result<FetchStats> {
    let state = StateDir::new(&config.state_dir);
    let history = state.history();

    let mut stats = FetchStats {
        total_items: items.len(),
        ..Default::default()
    };

    for item in items {
        let result = fetch_one(config, transport, item, &history).await;
        if result.ok {
            stats.successful += 1;
            stats.total_bytes += result.bytes_written;
            *stats.by_strategy.entry(result.strategy.clone()).or_insert(0) += 1;
        } else {
            stats.failed += 1;
            warn!(
                "giving up on {} after trying all strategies: {}",
                item.resource_url,
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    Ok(stats)
}

/// Run the strategy cascade for a single item, stopping at the first
/// success. Per spec.md §4.6, a strategy is abandoned when it errors, when
/// `retries_per_strategy` attempts are exhausted, or when
/// `switch_after_seconds_without_progress` elapses without the transfer
/// growing.
async fn fetch_one(
    config: &Config,
    transport: &Transport,
    item: &PlanItem,
    history: &crate::state::Table,
) -> DownloadResult {
    let mut last_result = DownloadResult::failure("none", "no strategies configured");

    for kind in &config.downloader.strategies {
        let deadline = Instant::now();
        let switch_after = std::time::Duration::from_secs(config.downloader.switch_after_seconds_without_progress);
        let mut best_bytes = 0u64;

        for attempt in 0..config.downloader.retries_per_strategy.max(1) {
            let start = now_utc();
            let result = strategies::run(*kind, transport, config, item).await;
            let end = now_utc();

            append_history(history, item, &result, start, end);

            if result.ok {
                return result;
            }

            if result.bytes_written > best_bytes {
                best_bytes = result.bytes_written;
            }

            last_result = result;

            let attempts_exhausted = attempt + 1 >= config.downloader.retries_per_strategy;
            let stalled = deadline.elapsed() >= switch_after && best_bytes == 0;
            if attempts_exhausted || stalled {
                break;
            }
        }

        info!(
            "abandoning strategy {} for {} after {:?}, trying next",
            kind.name(),
            item.resource_url,
            last_result.error
        );
    }

    last_result
}

fn append_history(
    history: &crate::state::Table,
    item: &PlanItem,
    result: &DownloadResult,
    start: chrono::DateTime<chrono::Utc>,
    end: chrono::DateTime<chrono::Utc>,
) {
    let record = HistoryRecord {
        resource_url: item.resource_url.clone(),
        strategy: result.strategy.clone(),
        start,
        end,
        bytes: result.bytes_written,
        ok: result.ok,
        error: result.error.clone(),
        dest_path: item.dest_path.clone(),
    };
    if let Err(e) = history.append(&record) {
        warn!("failed to append history record for {}: {e}", item.resource_url);
    }
}

/// Remove a destination's `.part` and `.meta.json` sidecar, used by
/// callers that want to force a clean re-download of one item.
pub fn reset_item(dest_path: &str) {
    let dest = Path::new(dest_path);
    let _ = std::fs::remove_file(common::part_path(dest));
    let _ = std::fs::remove_file(common::sidecar_path(dest));
}
