//! Planner: spec.md §4.5, ported from
//! `original_source/anacsync/planner.py`'s `DownloadPlanner`.
//!
//! Diffs the catalog (Dataset + Resource tables) against the local
//! Inventory and emits an ordered, timestamped `PlanItem` list. Matching
//! and reason precedence follow the spec exactly; `etag_changed` is a
//! reachable enum variant but this planner never emits it, per
//! DESIGN.md's resolution of spec.md §9 Open Question 1.

use crate::config::Config;
use crate::error::Result;
use crate::state::{Dataset, LocalFile, PlanItem, PlanReason, Resource, StateDir};
use crate::util::{filename_from_url, sanitize_filename};

/// Summary counters for one planning run, mirroring the original's
/// printed breakdown by reason.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PlanStats {
    pub total_resources: usize,
    pub missing: usize,
    pub size_changed: usize,
    pub etag_changed: usize,
    pub corrupted: usize,
    pub up_to_date: usize,
    pub filtered_out: usize,
}

pub struct PlanOutcome {
    pub items: Vec<PlanItem>,
    pub stats: PlanStats,
    pub path: Option<std::path::PathBuf>,
}

/// Generate a plan. `only_missing` drops every reason but `missing`, per
/// spec.md §4.5 step 4. `filter_slug` keeps only datasets whose slug
/// contains the given substring.
pub fn make_plan(config: &Config, only_missing: bool, filter_slug: Option<&str>) -> Result<PlanOutcome> {
    let state = StateDir::new(&config.state_dir);
    let datasets: Vec<Dataset> = state.datasets().read_all()?;
    let resources: Vec<Resource> = state.resources().read_all()?;
    let inventory: Vec<LocalFile> = state.inventory().read_all()?;

    let mut stats = PlanStats {
        total_resources: resources.len(),
        ..Default::default()
    };

    let dataset_by_slug: std::collections::HashMap<&str, &Dataset> =
        datasets.iter().map(|d| (d.slug.as_str(), d)).collect();

    let mut items = Vec::new();

    for resource in &resources {
        if let Some(filter) = filter_slug {
            if !resource.dataset_slug.contains(filter) {
                stats.filtered_out += 1;
                continue;
            }
        }

        let Some(dataset) = dataset_by_slug.get(resource.dataset_slug.as_str()) else {
            continue;
        };

        let local_file = find_matching_local_file(resource, &inventory);
        let reason = decide_reason(resource, local_file);

        let Some(reason) = reason else {
            stats.up_to_date += 1;
            continue;
        };

        if only_missing && reason != PlanReason::Missing {
            match reason {
                PlanReason::Missing => unreachable!(),
                PlanReason::SizeChanged => stats.size_changed += 1,
                PlanReason::Corrupted => stats.corrupted += 1,
                PlanReason::EtagChanged => stats.etag_changed += 1,
            }
            continue;
        }

        match reason {
            PlanReason::Missing => stats.missing += 1,
            PlanReason::SizeChanged => stats.size_changed += 1,
            PlanReason::Corrupted => stats.corrupted += 1,
            PlanReason::EtagChanged => stats.etag_changed += 1,
        }

        let dest_path = dest_path(config, dataset, resource);
        items.push(PlanItem {
            dataset_slug: resource.dataset_slug.clone(),
            resource_url: resource.url.clone(),
            dest_path,
            reason,
            size: resource.content_length,
            etag: resource.etag.clone(),
            resource_name: Some(resource.name.clone()),
        });
    }

    let path = if items.is_empty() {
        None
    } else {
        let timestamp = plan_timestamp();
        let plan_path = state.new_plan_path(&timestamp);
        std::fs::create_dir_all(state.plans_dir()).map_err(|e| crate::error::AnacsyncError::Filesystem {
            path: state.plans_dir(),
            source: e,
        })?;
        crate::state::Table::new(&plan_path).replace_all(&items)?;
        Some(plan_path)
    };

    Ok(PlanOutcome { items, stats, path })
}

/// `YYYYMMDD-HHMMSS`, matching the plan filename format in spec.md §6.
fn plan_timestamp() -> String {
    crate::util::now_utc().format("%Y%m%d-%H%M%S").to_string()
}

/// Destination path, per spec.md §4.5 step 3: `root / sanitize(slug) /
/// sanitize(filename)`.
fn dest_path(config: &Config, dataset: &Dataset, resource: &Resource) -> String {
    let _ = dataset;
    let filename = if resource.name.is_empty() {
        filename_from_url(&resource.url)
    } else {
        resource.name.clone()
    };
    config
        .root_dir
        .join(sanitize_filename(&resource.dataset_slug))
        .join(sanitize_filename(&filename))
        .to_string_lossy()
        .to_string()
}

/// Three-tier local-file matching, per spec.md §4.5 step 1: sidecar URL
/// equality, then `dataset_slug` + filename substring, then resource URL
/// filename substring.
fn find_matching_local_file<'a>(resource: &Resource, inventory: &'a [LocalFile]) -> Option<&'a LocalFile> {
    if let Some(found) = inventory.iter().find(|f| f.url.as_deref() == Some(resource.url.as_str())) {
        return Some(found);
    }

    if !resource.name.is_empty() {
        if let Some(found) = inventory.iter().find(|f| {
            f.dataset_slug.as_deref() == Some(resource.dataset_slug.as_str())
                && f.path.contains(&resource.name)
        }) {
            return Some(found);
        }
    }

    let filename = filename_from_url(&resource.url);
    inventory.iter().find(|f| f.path.contains(&filename))
}

/// Decide whether `resource` needs fetching, per spec.md §4.5 step 2's
/// precedence. Returns `None` for `up_to_date`.
fn decide_reason(resource: &Resource, local_file: Option<&LocalFile>) -> Option<PlanReason> {
    let Some(local) = local_file else {
        return Some(PlanReason::Missing);
    };

    if local.size == 0 && resource.content_length.unwrap_or(0) > 0 {
        return Some(PlanReason::Corrupted);
    }

    if let Some(remote_size) = resource.content_length {
        if remote_size != local.size {
            return Some(PlanReason::SizeChanged);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Format;
    use chrono::Utc;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn make_resource(slug: &str, url: &str, size: Option<u64>) -> Resource {
        Resource {
            dataset_slug: slug.to_string(),
            url: url.to_string(),
            name: "data.json".to_string(),
            format: Format::Json,
            content_length: size,
            etag: None,
            last_modified: None,
            accept_ranges: Some(true),
            first_seen_at: Utc::now(),
            last_seen_at: Utc::now(),
            extra: HashMap::new(),
        }
    }

    #[test]
    fn missing_when_no_local_file_matches() {
        let resource = make_resource("appalti-2024", "https://x/data.json", Some(100));
        assert_eq!(decide_reason(&resource, None), Some(PlanReason::Missing));
    }

    #[test]
    fn size_changed_when_sizes_disagree() {
        let resource = make_resource("appalti-2024", "https://x/data.json", Some(100));
        let local = LocalFile {
            path: "/root/appalti-2024/data.json".into(),
            sha256: "abc".into(),
            size: 80,
            mtime: Utc::now(),
            dataset_slug: Some("appalti-2024".into()),
            url: Some("https://x/data.json".into()),
            extra: HashMap::new(),
        };
        assert_eq!(decide_reason(&resource, Some(&local)), Some(PlanReason::SizeChanged));
    }

    #[test]
    fn corrupted_when_local_is_empty_but_remote_is_not() {
        let resource = make_resource("appalti-2024", "https://x/data.json", Some(100));
        let local = LocalFile {
            path: "/root/appalti-2024/data.json".into(),
            sha256: "abc".into(),
            size: 0,
            mtime: Utc::now(),
            dataset_slug: Some("appalti-2024".into()),
            url: Some("https://x/data.json".into()),
            extra: HashMap::new(),
        };
        assert_eq!(decide_reason(&resource, Some(&local)), Some(PlanReason::Corrupted));
    }

    #[test]
    fn up_to_date_when_sizes_match() {
        let resource = make_resource("appalti-2024", "https://x/data.json", Some(100));
        let local = LocalFile {
            path: "/root/appalti-2024/data.json".into(),
            sha256: "abc".into(),
            size: 100,
            mtime: Utc::now(),
            dataset_slug: Some("appalti-2024".into()),
            url: Some("https://x/data.json".into()),
            extra: HashMap::new(),
        };
        assert_eq!(decide_reason(&resource, Some(&local)), None);
    }

    #[test]
    fn planner_is_deterministic_given_fixed_catalog_and_inventory() {
        let root = tempdir().unwrap();
        let state = tempdir().unwrap();
        let mut config = Config::default();
        config.root_dir = root.path().to_path_buf();
        config.state_dir = state.path().to_path_buf();

        let state_dir = StateDir::new(&config.state_dir);
        state_dir
            .datasets()
            .append(&Dataset {
                slug: "appalti-2024".into(),
                title: "Appalti 2024".into(),
                url: "https://x/dataset/appalti-2024".into(),
                last_seen_at: Utc::now(),
                extra: HashMap::new(),
            })
            .unwrap();
        state_dir
            .resources()
            .append(&make_resource("appalti-2024", "https://x/data.json", Some(100)))
            .unwrap();

        let outcome1 = make_plan(&config, true, None).unwrap();
        // Remove plan file so a second run doesn't just see it as noise.
        if let Some(p) = &outcome1.path {
            std::fs::remove_file(p).unwrap();
        }
        let outcome2 = make_plan(&config, true, None).unwrap();

        assert_eq!(outcome1.items.len(), outcome2.items.len());
        assert_eq!(outcome1.items[0].dest_path, outcome2.items[0].dest_path);
        assert_eq!(outcome1.items[0].reason, outcome2.items[0].reason);
    }

    #[test]
    fn only_missing_drops_size_changed_items() {
        let root = tempdir().unwrap();
        let state = tempdir().unwrap();
        let mut config = Config::default();
        config.root_dir = root.path().to_path_buf();
        config.state_dir = state.path().to_path_buf();

        let state_dir = StateDir::new(&config.state_dir);
        state_dir
            .datasets()
            .append(&Dataset {
                slug: "appalti-2024".into(),
                title: "Appalti 2024".into(),
                url: "https://x/dataset/appalti-2024".into(),
                last_seen_at: Utc::now(),
                extra: HashMap::new(),
            })
            .unwrap();
        state_dir
            .resources()
            .append(&make_resource("appalti-2024", "https://x/data.json", Some(100)))
            .unwrap();
        state_dir
            .inventory()
            .append(&LocalFile {
                path: "/root/appalti-2024/data.json".into(),
                sha256: "abc".into(),
                size: 80,
                mtime: Utc::now(),
                dataset_slug: Some("appalti-2024".into()),
                url: Some("https://x/data.json".into()),
                extra: HashMap::new(),
            })
            .unwrap();

        let outcome = make_plan(&config, true, None).unwrap();
        assert!(outcome.items.is_empty());
        assert_eq!(outcome.stats.size_changed, 1);

        let outcome_all = make_plan(&config, false, None).unwrap();
        assert_eq!(outcome_all.items.len(), 1);
        assert_eq!(outcome_all.items[0].reason, PlanReason::SizeChanged);
    }
}
