//! The State Store: append-only JSON-lines tables plus atomic whole-file
//! replace, per spec.md §4.2. Each table is addressed by path under
//! `state_dir`; callers key records however their component needs to
//! (dataset slug, `(dataset_slug, url)`, local path, ...) — the store
//! itself only knows how to append, read-all, and atomically replace.

mod records;

pub use records::{
    Dataset, Format, HistoryRecord, LocalFile, PlanItem, PlanReason, Resource, Segments, Sidecar,
};

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::error::{AnacsyncError, Result};
use crate::util::{append_line, atomic_write};

/// A single JSON-lines table backed by a file on disk.
#[derive(Debug, Clone)]
pub struct Table {
    path: PathBuf,
}

impl Table {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every well-formed record. A malformed or truncated trailing
    /// line is dropped rather than failing the whole read, per spec.md
    /// §4.2's "readers tolerate partial trailing lines" contract.
    pub fn read_all<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = std::fs::read_to_string(&self.path).map_err(|e| AnacsyncError::Filesystem {
            path: self.path.clone(),
            source: e,
        })?;
        let mut records = Vec::new();
        for line in contents.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<T>(trimmed) {
                Ok(record) => records.push(record),
                Err(e) => warn!("dropping undecodable record in {}: {}", self.path.display(), e),
            }
        }
        Ok(records)
    }

    /// Append one record as a compact, `\n`-terminated JSON line, with
    /// per-line flush and fsync.
    pub fn append<T: Serialize>(&self, record: &T) -> Result<()> {
        let line = serde_json::to_string(record)?;
        append_line(&self.path, &line)
    }

    /// Atomically replace the table's entire contents with `records`.
    pub fn replace_all<T: Serialize>(&self, records: &[T]) -> Result<()> {
        let mut body = String::new();
        for record in records {
            body.push_str(&serde_json::to_string(record)?);
            body.push('\n');
        }
        atomic_write(&self.path, body.as_bytes())
    }
}

/// Layout of the state directory, per spec.md §6.
#[derive(Debug, Clone)]
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn datasets(&self) -> Table {
        Table::new(self.root.join("catalog").join("datasets.jsonl"))
    }

    pub fn resources(&self) -> Table {
        Table::new(self.root.join("catalog").join("resources.jsonl"))
    }

    pub fn inventory(&self) -> Table {
        Table::new(self.root.join("local").join("inventory.jsonl"))
    }

    pub fn plans_dir(&self) -> PathBuf {
        self.root.join("plans")
    }

    pub fn history(&self) -> Table {
        Table::new(self.root.join("downloads").join("history.jsonl"))
    }

    /// The newest `plan-*.jsonl` file, by filename — the embedded
    /// `YYYYMMDD-HHMMSS` timestamp sorts identically to mtime order, so
    /// spec.md §4.5's either-or latest-plan rule is satisfied by a plain
    /// lexicographic scan.
    pub fn latest_plan_path(&self) -> Result<Option<PathBuf>> {
        let dir = self.plans_dir();
        if !dir.exists() {
            return Ok(None);
        }
        let mut candidates: Vec<PathBuf> = std::fs::read_dir(&dir)
            .map_err(|e| AnacsyncError::Filesystem {
                path: dir.clone(),
                source: e,
            })?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with("plan-") && n.ends_with(".jsonl"))
                    .unwrap_or(false)
            })
            .collect();
        candidates.sort();
        Ok(candidates.pop())
    }

    pub fn new_plan_path(&self, timestamp: &str) -> PathBuf {
        self.plans_dir().join(format!("plan-{timestamp}.jsonl"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
    struct Rec {
        id: u32,
        name: String,
    }

    #[test]
    fn append_then_read_all_round_trips() {
        let dir = tempdir().unwrap();
        let table = Table::new(dir.path().join("t.jsonl"));
        table.append(&Rec { id: 1, name: "a".into() }).unwrap();
        table.append(&Rec { id: 2, name: "b".into() }).unwrap();
        let records: Vec<Rec> = table.read_all().unwrap();
        assert_eq!(records, vec![Rec { id: 1, name: "a".into() }, Rec { id: 2, name: "b".into() }]);
    }

    #[test]
    fn read_all_drops_malformed_trailing_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.jsonl");
        std::fs::write(&path, "{\"id\":1,\"name\":\"a\"}\n{\"id\":2,\"nam") .unwrap();
        let table = Table::new(path);
        let records: Vec<Rec> = table.read_all().unwrap();
        assert_eq!(records, vec![Rec { id: 1, name: "a".into() }]);
    }

    #[test]
    fn replace_all_overwrites_contents_atomically() {
        let dir = tempdir().unwrap();
        let table = Table::new(dir.path().join("t.jsonl"));
        table.append(&Rec { id: 1, name: "a".into() }).unwrap();
        table
            .replace_all(&[Rec { id: 2, name: "b".into() }, Rec { id: 3, name: "c".into() }])
            .unwrap();
        let records: Vec<Rec> = table.read_all().unwrap();
        assert_eq!(
            records,
            vec![Rec { id: 2, name: "b".into() }, Rec { id: 3, name: "c".into() }]
        );
    }

    #[test]
    fn latest_plan_path_picks_lexicographically_newest() {
        let dir = tempdir().unwrap();
        let state = StateDir::new(dir.path());
        std::fs::create_dir_all(state.plans_dir()).unwrap();
        std::fs::write(state.plans_dir().join("plan-20240101-000000.jsonl"), "").unwrap();
        std::fs::write(state.plans_dir().join("plan-20240615-120000.jsonl"), "").unwrap();
        let latest = state.latest_plan_path().unwrap().unwrap();
        assert_eq!(latest.file_name().unwrap(), "plan-20240615-120000.jsonl");
    }
}
