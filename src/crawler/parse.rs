//! HTML parsing for the catalog pages, ported from
//! `original_source/anacsync/crawler.py`'s `parse_dataset_page` /
//! `parse_resource_page`, using `scraper`'s CSS-selector API (the
//! teacher's HTML parsing crate) in place of selectolax.

use scraper::{Html, Selector};
use url::Url;

use crate::state::Format;

/// One dataset link discovered on a listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetLink {
    pub slug: String,
    pub title: String,
    pub url: String,
}

/// One resource link discovered on a dataset page, before probing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLink {
    pub name: String,
    pub format: Format,
    pub url: String,
}

const SKIP_TITLES: &[&str] = &["JSON", "CSV", "XML"];
const SKIP_RESOURCE_NAMES: &[&str] = &["Altre informazioni", "Vai alla risorsa"];
const DATASET_PATH_MARKER: &str = "/opendata/dataset/";

/// Extract the dataset slug from a `/opendata/dataset/<slug>` URL.
pub fn extract_dataset_slug(url: &str) -> Option<String> {
    let idx = url.find(DATASET_PATH_MARKER)?;
    let rest = &url[idx + DATASET_PATH_MARKER.len()..];
    let slug = rest.split('/').next().unwrap_or("");
    if slug.is_empty() {
        None
    } else {
        Some(slug.to_string())
    }
}

fn resolve(base_url: &str, href: &str) -> Option<String> {
    let base = Url::parse(base_url).ok()?;
    base.join(href).ok().map(|u| u.to_string())
}

/// Parse a dataset listing page, preferring `.dataset-item` blocks and
/// falling back to a bare anchor scan when none are present, mirroring the
/// original's two-pass strategy.
pub fn parse_dataset_page(html: &str, base_url: &str) -> Vec<DatasetLink> {
    let document = Html::parse_document(html);
    let anchor_selector = Selector::parse("a").expect("static selector");

    let mut datasets = Vec::new();
    let mut seen_slugs = std::collections::HashSet::new();

    if let Ok(item_selector) = Selector::parse(".dataset-item") {
        for item in document.select(&item_selector) {
            for link in item.select(&anchor_selector) {
                let Some(href) = link.value().attr("href") else { continue };
                if !href.contains(DATASET_PATH_MARKER) {
                    continue;
                }
                let Some(url) = resolve(base_url, href) else { continue };
                let Some(slug) = extract_dataset_slug(&url) else { continue };
                if seen_slugs.contains(&slug) {
                    continue;
                }

                let mut title: String = link.text().collect::<String>().trim().to_string();
                if title.is_empty() {
                    if let Ok(heading_selector) = Selector::parse(".dataset-heading") {
                        if let Some(heading) = item.select(&heading_selector).next() {
                            title = heading.text().collect::<String>().trim().to_string();
                        }
                    }
                }

                if !title.is_empty() && !SKIP_TITLES.contains(&title.as_str()) {
                    seen_slugs.insert(slug.clone());
                    datasets.push(DatasetLink { slug, title, url });
                }
            }
        }
    }

    if datasets.is_empty() {
        for link in document.select(&anchor_selector) {
            let Some(href) = link.value().attr("href") else { continue };
            if !href.contains(DATASET_PATH_MARKER) {
                continue;
            }
            let Some(url) = resolve(base_url, href) else { continue };
            let Some(slug) = extract_dataset_slug(&url) else { continue };
            if seen_slugs.contains(&slug) {
                continue;
            }
            let title = link.text().collect::<String>().trim().to_string();
            if title.is_empty() || SKIP_TITLES.contains(&title.as_str()) {
                continue;
            }
            seen_slugs.insert(slug.clone());
            datasets.push(DatasetLink { slug, title, url });
        }
    }

    datasets
}

/// Parse a dataset detail page for its downloadable resources.
pub fn parse_resource_page(html: &str, base_url: &str) -> Vec<ResourceLink> {
    let document = Html::parse_document(html);
    let anchor_selector = Selector::parse("a").expect("static selector");

    let mut resources = Vec::new();
    let mut seen_urls = std::collections::HashSet::new();

    for link in document.select(&anchor_selector) {
        let Some(href) = link.value().attr("href") else { continue };
        let Some(url) = resolve(base_url, href) else { continue };
        if seen_urls.contains(&url) {
            continue;
        }

        let is_download_link = url.contains("/download/")
            && [".json", ".csv", ".xlsx", ".xml", ".zip"]
                .iter()
                .any(|ext| url.to_ascii_lowercase().ends_with(ext));
        let is_resource_link = url.contains("/resource/");
        if !is_download_link && !is_resource_link {
            continue;
        }

        let mut name = link.text().collect::<String>().trim().to_string();
        if name.is_empty() || SKIP_RESOURCE_NAMES.contains(&name.as_str()) {
            name = crate::util::filename_from_url(&url);
        }

        let format = Format::from_extension(&url);
        if !name.is_empty() && format != Format::Unknown {
            seen_urls.insert(url.clone());
            resources.push(ResourceLink { name, format, url });
        }
    }

    resources
}
