//! Inventory: spec.md §4.4, ported from
//! `original_source/anacsync/inventory.py`'s `InventoryScanner`.
//!
//! Walks `root_dir` recursively, restricted to `config.inventory_extensions`,
//! and for every file computes a streaming SHA-256 and attempts identity
//! reconciliation: sidecar first, then a configurable slug-regex list
//! cross-referenced against the resource table, otherwise the file is left
//! an orphan. Every file is rehashed on every scan; a prior record is kept
//! in place only if `(sha256, size, mtime)` all still match the freshly
//! computed values. Paths that vanished since the last scan are dropped.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::warn;
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::Result;
use crate::state::{LocalFile, Resource, Sidecar, StateDir};
use crate::util::sha256_file;

/// Summary counters for one scan run, mirroring the original's stats dict.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ScanStats {
    pub files_scanned: usize,
    pub files_found: usize,
    pub files_new: usize,
    pub files_updated: usize,
    pub files_removed: usize,
}

/// Walk `config.root_dir` and rewrite the local inventory table in place.
pub fn scan_local(config: &Config) -> Result<ScanStats> {
    std::fs::create_dir_all(&config.root_dir).map_err(|e| crate::error::AnacsyncError::Filesystem {
        path: config.root_dir.clone(),
        source: e,
    })?;

    let state = StateDir::new(&config.state_dir);
    let inventory_table = state.inventory();
    let mut existing: HashMap<String, LocalFile> = inventory_table
        .read_all::<LocalFile>()?
        .into_iter()
        .map(|r| (r.path.clone(), r))
        .collect();

    let resources: Vec<Resource> = state.resources().read_all::<Resource>().unwrap_or_default();
    let slug_patterns: Vec<Regex> = config
        .slug_patterns
        .iter()
        .filter_map(|p| Regex::new(&format!("(?i){p}")).ok())
        .collect();

    let mut stats = ScanStats::default();
    let mut seen_paths = std::collections::HashSet::new();

    for entry in WalkDir::new(&config.root_dir).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if !is_supported_file(path, &config.inventory_extensions) {
            continue;
        }

        stats.files_scanned += 1;
        let path_str = path.to_string_lossy().to_string();
        seen_paths.insert(path_str.clone());

        let metadata = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(e) => {
                warn!("could not stat {}: {e}", path.display());
                continue;
            }
        };
        let size = metadata.len();
        let mtime = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        let sha256 = match sha256_file(path) {
            Ok(h) => h,
            Err(e) => {
                warn!("could not hash {}: {e}", path.display());
                continue;
            }
        };

        let (dataset_slug, url) = reconcile(path, &resources, &slug_patterns);

        stats.files_found += 1;
        let record = LocalFile {
            path: path_str.clone(),
            sha256,
            size,
            mtime,
            dataset_slug,
            url,
            extra: HashMap::new(),
        };

        match existing.get(&path_str) {
            Some(prev) if prev.sha256 == record.sha256 && prev.size == record.size && same_instant(prev.mtime, record.mtime) => {
                // Unchanged: keep the existing record rather than overwrite
                // it with a freshly reconciled one.
            }
            Some(_) => {
                existing.insert(path_str, record);
                stats.files_updated += 1;
            }
            None => {
                existing.insert(path_str, record);
                stats.files_new += 1;
            }
        }
    }

    let before = existing.len();
    existing.retain(|path, _| seen_paths.contains(path));
    stats.files_removed = before - existing.len();

    let all: Vec<LocalFile> = existing.into_values().collect();
    inventory_table.replace_all(&all)?;

    Ok(stats)
}

fn same_instant(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    // File-system mtimes often only resolve to the second; compare at that
    // granularity the way the inventory's rescan policy is meant to.
    (a.timestamp() - b.timestamp()).abs() == 0
}

fn is_supported_file(path: &Path, extensions: &[String]) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    let with_dot = format!(".{}", ext.to_ascii_lowercase());
    extensions.iter().any(|e| e.eq_ignore_ascii_case(&with_dot))
}

fn sidecar_path(path: &Path) -> PathBuf {
    crate::util::sibling_with_suffix(path, ".meta.json")
}

/// Three-tier identity reconciliation, per spec.md §4.4: sidecar, then
/// slug-pattern regex cross-referenced against the resource table, else
/// orphan (both fields empty).
fn reconcile(
    path: &Path,
    resources: &[Resource],
    slug_patterns: &[Regex],
) -> (Option<String>, Option<String>) {
    let meta_path = sidecar_path(path);
    if meta_path.exists() {
        if let Ok(contents) = std::fs::read_to_string(&meta_path) {
            if let Ok(sidecar) = serde_json::from_str::<Sidecar>(&contents) {
                return (Some(sidecar.dataset_slug), Some(sidecar.url));
            }
        }
    }

    let path_str = path.to_string_lossy();
    let filename = path.file_name().and_then(|n| n.to_str()).unwrap_or("");

    for pattern in slug_patterns {
        if let Some(m) = pattern.find(&path_str) {
            let slug = m.as_str().to_string();
            let url = resources
                .iter()
                .find(|r| r.dataset_slug == slug && (filename.contains(&r.name) || r.name.contains(filename)))
                .map(|r| r.url.clone());
            return (Some(slug), url);
        }
    }

    (None, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn cfg(root: &Path, state: &Path) -> Config {
        let mut cfg = Config::default();
        cfg.root_dir = root.to_path_buf();
        cfg.state_dir = state.to_path_buf();
        cfg
    }

    #[test]
    fn scan_finds_new_files_and_hashes_them() {
        let root = tempdir().unwrap();
        let state = tempdir().unwrap();
        std::fs::write(root.path().join("a.json"), b"{\"x\":1}").unwrap();
        std::fs::write(root.path().join("skip.txt"), b"ignore me").unwrap();

        let stats = scan_local(&cfg(root.path(), state.path())).unwrap();
        assert_eq!(stats.files_found, 1);
        assert_eq!(stats.files_new, 1);

        let table = StateDir::new(state.path()).inventory();
        let records: Vec<LocalFile> = table.read_all().unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].path.ends_with("a.json"));
    }

    #[test]
    fn scan_removes_vanished_files() {
        let root = tempdir().unwrap();
        let state = tempdir().unwrap();
        let file_path = root.path().join("a.json");
        std::fs::write(&file_path, b"{}").unwrap();
        scan_local(&cfg(root.path(), state.path())).unwrap();

        std::fs::remove_file(&file_path).unwrap();
        let stats = scan_local(&cfg(root.path(), state.path())).unwrap();
        assert_eq!(stats.files_removed, 1);

        let table = StateDir::new(state.path()).inventory();
        let records: Vec<LocalFile> = table.read_all().unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn reconcile_prefers_sidecar_over_slug_pattern() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(&path, b"{}").unwrap();
        let sidecar = Sidecar {
            sha256: "deadbeef".into(),
            downloaded_at: Utc::now(),
            strategy: "S1".into(),
            etag: None,
            content_length: None,
            url: "https://example.com/data.json".into(),
            dataset_slug: "appalti-2024".into(),
            resource_name: None,
            segments: None,
        };
        std::fs::write(sidecar_path(&path), serde_json::to_string(&sidecar).unwrap()).unwrap();

        let (slug, url) = reconcile(&path, &[], &[]);
        assert_eq!(slug.as_deref(), Some("appalti-2024"));
        assert_eq!(url.as_deref(), Some("https://example.com/data.json"));
    }
}
