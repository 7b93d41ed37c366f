//! Catalog Crawler: spec.md §4.3, ported from
//! `original_source/anacsync/crawler.py`'s `ANACCrawler`.
//!
//! Paginates the dataset listing, then visits each dataset page to
//! enumerate its resources, probing each resource URL for size/etag/
//! last-modified/accept-ranges. Existing catalog records are merged by
//! key so `first_seen_at` survives across runs and unrecognized fields
//! written by a newer build round-trip through `extra`.

mod parse;

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::http::Transport;
use crate::state::{Dataset, Resource, StateDir};
use crate::util::{now_utc, sleep_with_jitter};

pub use parse::{extract_dataset_slug, parse_dataset_page, parse_resource_page, DatasetLink, ResourceLink};

/// Summary counters for one crawl run, mirroring the original's printed
/// stats dict.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CrawlStats {
    pub pages_crawled: u32,
    pub datasets_found: usize,
    pub datasets_new: usize,
    pub datasets_updated: usize,
    pub resources_found: usize,
    pub resources_new: usize,
    pub resources_updated: usize,
}

/// Crawl the whole catalog: dataset pages, then resources per dataset.
/// Per-page and per-dataset failures are logged and skipped rather than
/// aborting the whole run, per spec.md's resilience stance.
pub async fn crawl_all(config: &Config, transport: &Transport) -> Result<CrawlStats> {
    info!("starting catalog crawl of {}", config.base_url);
    let state = StateDir::new(&config.state_dir);
    let datasets_table = state.datasets();
    let resources_table = state.resources();

    let mut existing_datasets: HashMap<String, Dataset> = datasets_table
        .read_all::<Dataset>()?
        .into_iter()
        .map(|d| (d.slug.clone(), d))
        .collect();
    let mut existing_resources: HashMap<(String, String), Resource> = resources_table
        .read_all::<Resource>()?
        .into_iter()
        .map(|r| ((r.dataset_slug.clone(), r.url.clone()), r))
        .collect();

    let mut stats = CrawlStats::default();

    let mut page_num = config.crawler.page_start;
    let mut empty_pages = 0u32;
    let mut discovered: Vec<DatasetLink> = Vec::new();

    while empty_pages < config.crawler.empty_page_stop_after {
        match crawl_dataset_page(config, transport, page_num).await {
            Ok(links) if !links.is_empty() => {
                debug!("page {page_num}: found {} datasets", links.len());
                discovered.extend(links);
                empty_pages = 0;
            }
            Ok(_) => {
                empty_pages += 1;
            }
            Err(e) => {
                warn!("error crawling page {page_num}: {e}");
                empty_pages += 1;
            }
        }
        stats.pages_crawled += 1;
        page_num += 1;
        sleep_with_jitter(config.crawler.delay_ms_min, config.crawler.delay_ms_max.saturating_sub(config.crawler.delay_ms_min)).await;
    }
    stats.datasets_found = discovered.len();

    let mut touched_slugs = Vec::with_capacity(discovered.len());
    for link in discovered {
        let now = now_utc();
        touched_slugs.push(link.slug.clone());
        match existing_datasets.get_mut(&link.slug) {
            Some(existing) => {
                existing.title = link.title;
                existing.url = link.url;
                existing.last_seen_at = now;
                stats.datasets_updated += 1;
            }
            None => {
                existing_datasets.insert(
                    link.slug.clone(),
                    Dataset {
                        slug: link.slug,
                        title: link.title,
                        url: link.url,
                        last_seen_at: now,
                        extra: HashMap::new(),
                    },
                );
                stats.datasets_new += 1;
            }
        }
    }

    let all_datasets: Vec<Dataset> = existing_datasets.values().cloned().collect();
    datasets_table.replace_all(&all_datasets)?;

    info!("crawling resources for {} datasets", touched_slugs.len());
    for (i, slug) in touched_slugs.iter().enumerate() {
        let Some(dataset) = existing_datasets.get(slug).cloned() else { continue };
        debug!("dataset {}/{}: {}", i + 1, touched_slugs.len(), slug);

        let resource_links = match crawl_dataset_resources(config, transport, &dataset).await {
            Ok(links) => links,
            Err(e) => {
                warn!("error crawling resources for {slug}: {e}");
                continue;
            }
        };
        stats.resources_found += resource_links.len();

        for (link, probe) in resource_links {
            let now = now_utc();
            let key = (dataset.slug.clone(), link.url.clone());
            match existing_resources.get_mut(&key) {
                Some(existing) => {
                    existing.name = link.name;
                    existing.format = link.format;
                    existing.content_length = probe.content_length;
                    existing.etag = probe.etag;
                    existing.last_modified = probe.last_modified;
                    existing.accept_ranges = probe.accept_ranges;
                    existing.last_seen_at = now;
                    stats.resources_updated += 1;
                }
                None => {
                    existing_resources.insert(
                        key,
                        Resource {
                            dataset_slug: dataset.slug.clone(),
                            url: link.url,
                            name: link.name,
                            format: link.format,
                            content_length: probe.content_length,
                            etag: probe.etag,
                            last_modified: probe.last_modified,
                            accept_ranges: probe.accept_ranges,
                            first_seen_at: now,
                            last_seen_at: now,
                            extra: HashMap::new(),
                        },
                    );
                    stats.resources_new += 1;
                }
            }
        }

        sleep_with_jitter(config.crawler.delay_ms_min, config.crawler.delay_ms_max.saturating_sub(config.crawler.delay_ms_min)).await;
    }

    let all_resources: Vec<Resource> = existing_resources.values().cloned().collect();
    resources_table.replace_all(&all_resources)?;

    info!(
        "crawl complete: {} pages, {} datasets ({} new, {} updated), {} resources ({} new, {} updated)",
        stats.pages_crawled,
        stats.datasets_found,
        stats.datasets_new,
        stats.datasets_updated,
        stats.resources_found,
        stats.resources_new,
        stats.resources_updated,
    );

    Ok(stats)
}

async fn crawl_dataset_page(config: &Config, transport: &Transport, page_num: u32) -> Result<Vec<DatasetLink>> {
    let url = format!("{}/dataset?page={page_num}", config.base_url.trim_end_matches('/'));
    let (body, _) = transport.get(&url).await?;
    let html = String::from_utf8_lossy(&body);
    Ok(parse_dataset_page(&html, &config.base_url))
}

async fn crawl_dataset_resources(
    config: &Config,
    transport: &Transport,
    dataset: &Dataset,
) -> Result<Vec<(ResourceLink, crate::http::ProbeInfo)>> {
    let (body, _) = transport.get(&dataset.url).await?;
    let html = String::from_utf8_lossy(&body);
    let links = parse_resource_page(&html, &config.base_url);

    let mut out = Vec::with_capacity(links.len());
    for link in links {
        let probe = transport.probe(&link.url).await.unwrap_or_default();
        out.push((link, probe));
    }
    Ok(out)
}
