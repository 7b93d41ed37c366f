//! Sorter: spec.md §4.7, ported from
//! `original_source/anacsync/sorter.py`'s `FileSorter`.
//!
//! Walks `root_dir` restricted to `config.sort_extensions`, evaluates each
//! file against the configured rules in order, and moves it to the first
//! matching rule's destination. The in-memory inventory is updated as
//! files move and flushed once at the end, rather than once per file.

mod condition;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::{Config, SortingRule};
use crate::error::Result;
use crate::state::{LocalFile, StateDir};

use condition::{Context, Value};

/// Summary counters for one `sort_all` run, mirroring the original's
/// `stats` dict.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SortStats {
    pub files_processed: usize,
    pub files_moved: usize,
    pub files_already_sorted: usize,
    pub files_unsorted: usize,
    pub files_failed: usize,
}

/// Sort every matching file under `config.root_dir`, moving it per the
/// first rule whose condition holds, then flush the updated inventory.
pub fn sort_all(config: &Config) -> Result<SortStats> {
    let state = StateDir::new(&config.state_dir);
    let inventory_table = state.inventory();
    let mut inventory: HashMap<String, LocalFile> = inventory_table
        .read_all::<LocalFile>()?
        .into_iter()
        .map(|r| (r.path.clone(), r))
        .collect();

    let mut stats = SortStats::default();

    let files_to_sort: Vec<PathBuf> = WalkDir::new(&config.root_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| is_sortable(p, &config.sort_extensions))
        .collect();

    for file_path in files_to_sort {
        stats.files_processed += 1;
        match sort_file(config, &file_path, &mut inventory) {
            Ok(SortOutcome::AlreadySorted) => stats.files_already_sorted += 1,
            Ok(SortOutcome::Moved(dest)) => {
                stats.files_moved += 1;
                info!("moved {} -> {}", file_path.display(), dest.display());
            }
            Ok(SortOutcome::NoRuleMatched) => {
                stats.files_unsorted += 1;
                warn!("no sorting rule matched {}", file_path.display());
            }
            Err(e) => {
                stats.files_failed += 1;
                warn!("failed to sort {}: {e}", file_path.display());
            }
        }
    }

    let all: Vec<LocalFile> = inventory.into_values().collect();
    inventory_table.replace_all(&all)?;

    Ok(stats)
}

enum SortOutcome {
    AlreadySorted,
    Moved(PathBuf),
    NoRuleMatched,
}

fn sort_file(config: &Config, file_path: &Path, inventory: &mut HashMap<String, LocalFile>) -> Result<SortOutcome> {
    let path_str = file_path.to_string_lossy().to_string();
    let record = inventory.get(&path_str).cloned();
    let context = file_context(file_path, record.as_ref())?;

    for rule in &config.sorting.rules {
        let Some(dest) = apply_rule(config, file_path, rule, &context) else {
            continue;
        };
        if paths_equivalent(&dest, file_path) {
            return Ok(SortOutcome::AlreadySorted);
        }
        move_file(file_path, &dest, inventory)?;
        return Ok(SortOutcome::Moved(dest));
    }

    Ok(SortOutcome::NoRuleMatched)
}

fn is_sortable(path: &Path, extensions: &[String]) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    let with_dot = format!(".{}", ext.to_ascii_lowercase());
    extensions.iter().any(|e| e.eq_ignore_ascii_case(&with_dot))
}

/// Build the field context for one file: path metadata plus, when known,
/// inventory-derived identity fields, per spec.md §4.7.
fn file_context(file_path: &Path, record: Option<&LocalFile>) -> Result<Context> {
    let mut context = Context::new();
    context.insert("path".into(), Value::Text(file_path.to_string_lossy().to_string()));
    context.insert(
        "filename".into(),
        Value::Text(file_path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default()),
    );
    context.insert(
        "stem".into(),
        Value::Text(file_path.file_stem().map(|n| n.to_string_lossy().to_string()).unwrap_or_default()),
    );
    context.insert(
        "suffix".into(),
        Value::Text(file_path.extension().map(|e| format!(".{}", e.to_string_lossy())).unwrap_or_default()),
    );
    context.insert(
        "parent".into(),
        Value::Text(file_path.parent().map(|p| p.to_string_lossy().to_string()).unwrap_or_default()),
    );

    let size = std::fs::metadata(file_path).map(|m| m.len()).unwrap_or(0);
    context.insert("size".into(), Value::Number(size));

    if let Some(record) = record {
        context.insert("dataset_slug".into(), Value::Text(record.dataset_slug.clone().unwrap_or_default()));
        context.insert("url".into(), Value::Text(record.url.clone().unwrap_or_default()));
        context.insert("sha256".into(), Value::Text(record.sha256.clone()));
        context.insert("mtime".into(), Value::Text(record.mtime.to_rfc3339()));
    }

    // `slug` defaults to the inventory's dataset_slug; an orphan file with
    // no reconciled record (or an empty slug) falls back to scanning the
    // path for an `ocds`/`appalti` segment, same as the original.
    let mut slug = record.and_then(|r| r.dataset_slug.clone()).unwrap_or_default();
    if slug.is_empty() {
        for part in file_path.iter() {
            let part = part.to_string_lossy();
            let lower = part.to_ascii_lowercase();
            if lower.contains("ocds") || lower.contains("appalti") {
                slug = part.to_string();
                break;
            }
        }
    }
    context.insert("slug".into(), Value::Text(slug));

    let format = match file_path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()) {
        Some(ref e) if e == "json" => "JSON",
        Some(ref e) if e == "ndjson" => "NDJSON",
        Some(ref e) if e == "csv" => "CSV",
        Some(ref e) if e == "xlsx" => "XLSX",
        Some(ref e) if e == "xml" => "XML",
        Some(ref e) if e == "zip" => "ZIP",
        _ => "UNKNOWN",
    };
    context.insert("format".into(), Value::Text(format.to_string()));

    Ok(context)
}

/// Resolve one rule's destination, if its condition holds. A destination
/// without an extension is treated as a directory (the file keeps its
/// name); one with an extension is the literal destination file path.
fn apply_rule(config: &Config, file_path: &Path, rule: &SortingRule, context: &Context) -> Option<PathBuf> {
    if !condition::matches(&rule.condition, context) {
        return None;
    }

    let raw = if !rule.move_to.is_empty() {
        &rule.move_to
    } else {
        rule.default.as_ref()?
    };

    let dest = Path::new(raw);
    let dest = if dest.is_absolute() {
        dest.to_path_buf()
    } else {
        config.root_dir.join(dest)
    };

    if dest.extension().is_none() {
        Some(dest.join(file_path.file_name().unwrap_or_default()))
    } else {
        Some(dest)
    }
}

fn paths_equivalent(a: &Path, b: &Path) -> bool {
    let canon_a = std::fs::canonicalize(a).unwrap_or_else(|_| a.to_path_buf());
    let canon_b = std::fs::canonicalize(b).unwrap_or_else(|_| b.to_path_buf());
    canon_a == canon_b
}

/// Atomically rename the file and keep the inventory's key in sync.
fn move_file(src: &Path, dest: &Path, inventory: &mut HashMap<String, LocalFile>) -> Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|e| crate::error::AnacsyncError::Filesystem {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    std::fs::rename(src, dest).map_err(|e| crate::error::AnacsyncError::Filesystem {
        path: dest.to_path_buf(),
        source: e,
    })?;

    let old_key = src.to_string_lossy().to_string();
    if let Some(mut record) = inventory.remove(&old_key) {
        record.path = dest.to_string_lossy().to_string();
        inventory.insert(record.path.clone(), record);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SortingRule;
    use chrono::Utc;
    use tempfile::tempdir;

    fn cfg_with_rules(root: &Path, state: &Path, rules: Vec<SortingRule>) -> Config {
        let mut cfg = Config::default();
        cfg.root_dir = root.to_path_buf();
        cfg.state_dir = state.to_path_buf();
        cfg.sorting.rules = rules;
        cfg
    }

    #[test]
    fn moves_file_matching_rule_to_directory() {
        let root = tempdir().unwrap();
        let state = tempdir().unwrap();
        std::fs::write(root.path().join("ocds-data.json"), b"{}").unwrap();

        let rule = SortingRule {
            condition: "filename contains \"ocds\"".to_string(),
            move_to: "ocds".to_string(),
            default: None,
        };
        let config = cfg_with_rules(root.path(), state.path(), vec![rule]);

        let stats = sort_all(&config).unwrap();
        assert_eq!(stats.files_moved, 1);
        assert!(root.path().join("ocds").join("ocds-data.json").exists());
        assert!(!root.path().join("ocds-data.json").exists());
    }

    #[test]
    fn leaves_unmatched_file_in_place_and_counts_unsorted() {
        let root = tempdir().unwrap();
        let state = tempdir().unwrap();
        std::fs::write(root.path().join("mystery.json"), b"{}").unwrap();

        let rule = SortingRule {
            condition: "filename contains \"nomatch\"".to_string(),
            move_to: "elsewhere".to_string(),
            default: None,
        };
        let config = cfg_with_rules(root.path(), state.path(), vec![rule]);

        let stats = sort_all(&config).unwrap();
        assert_eq!(stats.files_unsorted, 1);
        assert!(root.path().join("mystery.json").exists());
    }

    #[test]
    fn updates_inventory_path_after_move() {
        let root = tempdir().unwrap();
        let state = tempdir().unwrap();
        std::fs::write(root.path().join("data.csv"), b"a,b").unwrap();

        let state_dir = StateDir::new(state.path());
        let src_path = root.path().join("data.csv").to_string_lossy().to_string();
        state_dir
            .inventory()
            .append(&LocalFile {
                path: src_path.clone(),
                sha256: "abc".into(),
                size: 3,
                mtime: Utc::now(),
                dataset_slug: Some("appalti-2024".into()),
                url: Some("https://x/data.csv".into()),
                extra: HashMap::new(),
            })
            .unwrap();

        let rule = SortingRule {
            condition: "true".to_string(),
            move_to: "csv-files".to_string(),
            default: None,
        };
        let config = cfg_with_rules(root.path(), state.path(), vec![rule]);

        sort_all(&config).unwrap();

        let records: Vec<LocalFile> = state_dir.inventory().read_all().unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].path.ends_with("csv-files/data.csv") || records[0].path.contains("csv-files"));
        assert_ne!(records[0].path, src_path);
    }
}
