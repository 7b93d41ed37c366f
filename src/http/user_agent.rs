//! Rotating User-Agent pool, ported from
//! `scrapers/http_client/user_agent.rs`. The spec calls for "rotating
//! User-Agent values from a configurable pool" (spec.md §6); we keep the
//! teacher's pool of real browser strings and the same `"impersonate"`
//! escape hatch.

pub const DEFAULT_USER_AGENT: &str = "anacsync/0.1 (open-data mirror; +https://example.invalid)";

pub const BROWSER_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.1 Safari/605.1.15",
];

/// Pick a pool entry by round-robining on a counter rather than wall-clock
/// entropy, so behavior stays deterministic under test.
pub fn pick(pool: &[&'static str], counter: usize) -> &'static str {
    if pool.is_empty() {
        DEFAULT_USER_AGENT
    } else {
        pool[counter % pool.len()]
    }
}
