//! The persistent data model: §3 of the specification.
//!
//! Every table is a flat, `serde`-derived struct stored one JSON object per
//! line. Fields unknown to this build are preserved via `extra` so a newer
//! writer's fields survive a round trip through an older reader, the same
//! "unknown fields are preserved on merge" contract the spec requires.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Known resource payload formats. Anything else is `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Format {
    Json,
    Csv,
    Xlsx,
    Xml,
    Zip,
    Ndjson,
    Unknown,
}

impl Format {
    /// Infer a format from a URL or filename's extension.
    pub fn from_extension(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".json") {
            Format::Json
        } else if lower.ends_with(".ndjson") {
            Format::Ndjson
        } else if lower.ends_with(".csv") {
            Format::Csv
        } else if lower.ends_with(".xlsx") {
            Format::Xlsx
        } else if lower.ends_with(".xml") {
            Format::Xml
        } else if lower.ends_with(".zip") {
            Format::Zip
        } else {
            Format::Unknown
        }
    }
}

/// A logical collection, keyed by `slug`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub slug: String,
    pub title: String,
    pub url: String,
    pub last_seen_at: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// A downloadable artifact belonging to one dataset, keyed by
/// `(dataset_slug, url)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub dataset_slug: String,
    pub url: String,
    pub name: String,
    pub format: Format,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accept_ranges: Option<bool>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// Inventory record for one local file, keyed by `path`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalFile {
    pub path: String,
    pub sha256: String,
    pub size: u64,
    pub mtime: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// Why the planner decided a resource needs fetching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanReason {
    Missing,
    SizeChanged,
    Corrupted,
    EtagChanged,
}

impl PlanReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanReason::Missing => "missing",
            PlanReason::SizeChanged => "size_changed",
            PlanReason::Corrupted => "corrupted",
            PlanReason::EtagChanged => "etag_changed",
        }
    }
}

/// One pending transfer, as emitted into `plans/plan-<timestamp>.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanItem {
    pub dataset_slug: String,
    pub resource_url: String,
    pub dest_path: String,
    pub reason: PlanReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_name: Option<String>,
}

/// Per-file sidecar metadata, written atomically to `<file>.meta.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sidecar {
    pub sha256: String,
    pub downloaded_at: DateTime<Utc>,
    pub strategy: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_length: Option<u64>,
    pub url: String,
    pub dataset_slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segments: Option<Segments>,
}

/// Sparse-strategy segment bitmap, persisted between S2 attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segments {
    pub size: u64,
    pub bitmap: String,
}

impl Segments {
    pub fn all_complete(num_segments: usize) -> String {
        "1".repeat(num_segments)
    }

    pub fn is_complete(&self) -> bool {
        !self.bitmap.contains('0')
    }
}

/// One strategy attempt, appended to `downloads/history.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub resource_url: String,
    pub strategy: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub bytes: u64,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub dest_path: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_infers_from_extension_case_insensitively() {
        assert_eq!(Format::from_extension("report.JSON"), Format::Json);
        assert_eq!(Format::from_extension("data.ndjson"), Format::Ndjson);
        assert_eq!(Format::from_extension("archive.zip"), Format::Zip);
        assert_eq!(Format::from_extension("notes.txt"), Format::Unknown);
    }

    #[test]
    fn segments_bitmap_completeness() {
        let seg = Segments {
            size: 4 * 1024 * 1024,
            bitmap: "111".to_string(),
        };
        assert!(seg.is_complete());
        let seg = Segments {
            size: 4 * 1024 * 1024,
            bitmap: "101".to_string(),
        };
        assert!(!seg.is_complete());
    }

    #[test]
    fn local_file_round_trips_with_unknown_fields() {
        let json = r#"{"path":"/a/b.json","sha256":"x","size":10,"mtime":"2024-01-01T00:00:00Z","future_field":42}"#;
        let record: LocalFile = serde_json::from_str(json).unwrap();
        assert_eq!(record.extra.get("future_field").unwrap(), 42);
        let back = serde_json::to_string(&record).unwrap();
        assert!(back.contains("future_field"));
    }
}
