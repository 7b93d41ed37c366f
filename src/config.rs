//! Configuration surface: spec.md §6.
//!
//! Reading a config *file* is explicitly out of scope (spec.md §1); this
//! module only assembles a `Config` value from built-in defaults overlaid
//! with `ANACSYNC_*` environment variables, the way `foiacquire`'s CLI
//! overlays `clap(env = "...")` flags onto defaults. A host application
//! that wants file-backed configuration builds its own `Config` and passes
//! it straight to the library entry points in this crate.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AnacsyncError, Result};

/// Default refresh cadence mentioned in the original config (kept for
/// parity with `original_source/anacsync/config.py`'s `empty_page_stop_after`
/// neighbourhood; unused beyond documentation since the core itself does
/// not schedule recurring runs).
pub const DEFAULT_STATE_DIRNAME: &str = ".anacsync";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    pub page_start: u32,
    pub empty_page_stop_after: u32,
    pub delay_ms_min: u64,
    pub delay_ms_max: u64,
    pub max_concurrency: usize,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            page_start: 1,
            empty_page_stop_after: 2,
            delay_ms_min: 300,
            delay_ms_max: 700,
            max_concurrency: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub timeout_connect_s: u64,
    pub timeout_read_s: u64,
    pub http2: bool,
    pub headers: HashMap<String, String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        let mut headers = HashMap::new();
        headers.insert(
            "Accept".to_string(),
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".to_string(),
        );
        headers.insert("Accept-Language".to_string(), "en-US,en;q=0.8".to_string());
        headers.insert("Cache-Control".to_string(), "no-cache".to_string());
        Self {
            timeout_connect_s: 10,
            timeout_read_s: 60,
            http2: false,
            headers,
        }
    }
}

impl HttpConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_connect_s)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_read_s)
    }
}

/// The five strategy identifiers, matching the spec's S1..S5 names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    S1Dynamic,
    S2Sparse,
    S3Curl,
    S4ShortConn,
    S5TailFirst,
}

impl StrategyKind {
    pub fn name(&self) -> &'static str {
        match self {
            StrategyKind::S1Dynamic => "S1",
            StrategyKind::S2Sparse => "S2",
            StrategyKind::S3Curl => "S3",
            StrategyKind::S4ShortConn => "S4",
            StrategyKind::S5TailFirst => "S5",
        }
    }

    pub fn default_order() -> Vec<StrategyKind> {
        vec![
            StrategyKind::S1Dynamic,
            StrategyKind::S2Sparse,
            StrategyKind::S3Curl,
            StrategyKind::S4ShortConn,
            StrategyKind::S5TailFirst,
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloaderConfig {
    pub retries_per_strategy: u32,
    pub switch_after_seconds_without_progress: u64,
    pub strategies: Vec<StrategyKind>,
    pub dynamic_chunks_mb: [u64; 3],
    pub sparse_segment_mb: u64,
    pub snail_chunks_kb: u64,
    pub overlap_bytes: u64,
    pub enable_curl: bool,
    pub curl_path: String,
    pub rate_limit_rps: f64,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            retries_per_strategy: 3,
            switch_after_seconds_without_progress: 300,
            strategies: StrategyKind::default_order(),
            dynamic_chunks_mb: [2, 6, 12],
            sparse_segment_mb: 4,
            snail_chunks_kb: 1024,
            overlap_bytes: 32 * 1024,
            enable_curl: true,
            curl_path: "curl".to_string(),
            rate_limit_rps: 1.0,
        }
    }
}

/// One `{if, move_to, default?}` sorting rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortingRule {
    #[serde(rename = "if")]
    pub condition: String,
    pub move_to: String,
    #[serde(default)]
    pub default: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SortingConfig {
    pub rules: Vec<SortingRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub root_dir: PathBuf,
    pub state_dir: PathBuf,
    pub base_url: String,

    pub crawler: CrawlerConfig,
    pub http: HttpConfig,
    pub downloader: DownloaderConfig,
    pub sorting: SortingConfig,

    /// Extensions the Inventory walks (default `{.json,.ndjson}`): the
    /// catalog's actual payload, per spec.md §4.4.
    pub inventory_extensions: Vec<String>,
    /// Extensions the Sorter walks — intentionally a separate,
    /// independently configurable set (spec.md §9 Open Question 2).
    pub sort_extensions: Vec<String>,
    /// Dataset-slug regex patterns the Inventory tries when no sidecar is
    /// present (spec.md §4.4 step 2).
    pub slug_patterns: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        let state_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(DEFAULT_STATE_DIRNAME);
        Self {
            root_dir: PathBuf::from("./data"),
            state_dir,
            base_url: String::new(),
            crawler: CrawlerConfig::default(),
            http: HttpConfig::default(),
            downloader: DownloaderConfig::default(),
            sorting: SortingConfig::default(),
            inventory_extensions: vec![".json".into(), ".ndjson".into()],
            sort_extensions: vec![
                ".json".into(),
                ".ndjson".into(),
                ".csv".into(),
                ".xlsx".into(),
                ".xml".into(),
                ".zip".into(),
            ],
            slug_patterns: Vec::new(),
        }
    }
}

impl Config {
    /// Build a `Config` from defaults overlaid with `ANACSYNC_*` environment
    /// variables. No config file is read (non-goal, spec.md §1).
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();

        if let Ok(v) = std::env::var("ANACSYNC_ROOT_DIR") {
            config.root_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ANACSYNC_STATE_DIR") {
            config.state_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ANACSYNC_BASE_URL") {
            config.base_url = v;
        }
        if let Ok(v) = std::env::var("ANACSYNC_RATE_LIMIT_RPS") {
            config.downloader.rate_limit_rps = v
                .parse()
                .map_err(|_| AnacsyncError::Config(format!("invalid ANACSYNC_RATE_LIMIT_RPS: {v}")))?;
        }
        if let Ok(v) = std::env::var("ANACSYNC_ENABLE_CURL") {
            config.downloader.enable_curl = v == "1" || v.eq_ignore_ascii_case("true");
        }

        Ok(config)
    }

    pub fn ensure_state_layout(&self) -> Result<()> {
        #[cfg(unix)]
        log_directory_diagnostics(&self.state_dir, "state_dir");
        #[cfg(unix)]
        log_directory_diagnostics(&self.root_dir, "root_dir");

        for sub in ["catalog", "local", "plans", "downloads"] {
            std::fs::create_dir_all(self.state_dir.join(sub)).map_err(|e| {
                AnacsyncError::Filesystem {
                    path: self.state_dir.join(sub),
                    source: e,
                }
            })?;
        }
        std::fs::create_dir_all(&self.root_dir).map_err(|e| AnacsyncError::Filesystem {
            path: self.root_dir.clone(),
            source: e,
        })?;
        Ok(())
    }
}

/// Log ownership/permission diagnostics for a directory we're about to
/// create or write into (Unix only).
#[cfg(unix)]
fn log_directory_diagnostics(path: &std::path::Path, label: &str) {
    use std::os::unix::fs::MetadataExt;
    let uid = unsafe { libc::getuid() };
    let gid = unsafe { libc::getgid() };
    tracing::debug!("{} check: path={}, running as uid={} gid={}", label, path.display(), uid, gid);

    match std::fs::metadata(path) {
        Ok(meta) => tracing::debug!(
            "{} exists: owner={}:{}, mode={:o}, is_dir={}",
            label,
            meta.uid(),
            meta.gid(),
            meta.mode() & 0o7777,
            meta.is_dir()
        ),
        Err(_) => tracing::debug!("{} does not exist yet, will attempt to create", label),
    }
}
