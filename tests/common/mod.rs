//! A tiny in-process HTTP origin for the end-to-end fetch-engine tests,
//! standing in for the real ANAC servers. Handles exactly what the
//! Transport needs: HEAD (size/etag/accept-ranges) and ranged GET.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

/// What to do with a ranged GET whose window isn't explicitly allowed.
pub enum RangePolicy {
    /// Serve every range request with 206 and the matching bytes.
    AlwaysPartial,
    /// Serve 206 only for windows in this exact `[start, end]` allowlist
    /// (inclusive); any other range gets a 500, simulating an origin that
    /// only tolerates segment-aligned requests.
    OnlyWindows(Vec<(u64, u64)>),
}

pub struct MockOrigin {
    pub base_url: String,
    pub ranges_seen: Arc<Mutex<Vec<(u64, u64)>>>,
}

pub fn start(body: Vec<u8>, etag: &str, policy: RangePolicy) -> MockOrigin {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock origin");
    let port = listener.local_addr().unwrap().port();
    let ranges_seen = Arc::new(Mutex::new(Vec::new()));
    let ranges_seen_thread = ranges_seen.clone();
    let etag = etag.to_string();

    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { continue };
            let body = body.clone();
            let etag = etag.clone();
            let ranges_seen = ranges_seen_thread.clone();
            let policy_allows: Option<Vec<(u64, u64)>> = match &policy {
                RangePolicy::AlwaysPartial => None,
                RangePolicy::OnlyWindows(w) => Some(w.clone()),
            };
            thread::spawn(move || handle_connection(stream, &body, &etag, policy_allows, ranges_seen));
        }
    });

    MockOrigin {
        base_url: format!("http://127.0.0.1:{port}"),
        ranges_seen,
    }
}

fn handle_connection(
    stream: TcpStream,
    body: &[u8],
    etag: &str,
    allowed_windows: Option<Vec<(u64, u64)>>,
    ranges_seen: Arc<Mutex<Vec<(u64, u64)>>>,
) {
    let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).unwrap_or(0) == 0 {
        return;
    }
    let method = request_line.split_whitespace().next().unwrap_or("").to_string();

    let mut range_header: Option<String> = None;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).unwrap_or(0) == 0 {
            break;
        }
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            break;
        }
        if let Some(value) = trimmed.strip_prefix("Range:").or_else(|| trimmed.strip_prefix("range:")) {
            range_header = Some(value.trim().to_string());
        }
    }

    let mut stream = stream;
    if method == "HEAD" {
        let headers = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nAccept-Ranges: bytes\r\nETag: \"{}\"\r\nConnection: close\r\n\r\n",
            body.len(),
            etag
        );
        let _ = stream.write_all(headers.as_bytes());
        return;
    }

    let Some(range) = range_header else {
        let headers = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        let _ = stream.write_all(headers.as_bytes());
        let _ = stream.write_all(body);
        return;
    };

    let (start, end) = parse_range(&range, body.len() as u64);
    ranges_seen.lock().unwrap().push((start, end));

    let allowed = match &allowed_windows {
        None => true,
        Some(windows) => windows.contains(&(start, end)),
    };
    if !allowed {
        let msg = b"mock origin: range not allowed";
        let headers = format!(
            "HTTP/1.1 500 Internal Server Error\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            msg.len()
        );
        let _ = stream.write_all(headers.as_bytes());
        let _ = stream.write_all(msg);
        return;
    }

    let slice = &body[start as usize..=(end as usize).min(body.len() - 1)];
    let headers = format!(
        "HTTP/1.1 206 Partial Content\r\nContent-Length: {}\r\nContent-Range: bytes {}-{}/{}\r\nConnection: close\r\n\r\n",
        slice.len(),
        start,
        end,
        body.len()
    );
    let _ = stream.write_all(headers.as_bytes());
    let _ = stream.write_all(slice);
}

/// A `Config` pointed at fresh scratch directories, with curl disabled and
/// the rate limiter opened up so the test runs fast.
pub fn test_config(root: &std::path::Path, state: &std::path::Path, strategies: Vec<anacsync::config::StrategyKind>) -> anacsync::Config {
    let mut cfg = anacsync::Config::default();
    cfg.root_dir = root.to_path_buf();
    cfg.state_dir = state.to_path_buf();
    cfg.downloader.strategies = strategies;
    cfg.downloader.retries_per_strategy = 1;
    cfg.downloader.rate_limit_rps = 1000.0;
    cfg.downloader.enable_curl = false;
    cfg
}

pub fn plan_item(url: &str, dest: &std::path::Path) -> anacsync::state::PlanItem {
    anacsync::state::PlanItem {
        dataset_slug: "test-dataset".to_string(),
        resource_url: url.to_string(),
        dest_path: dest.to_string_lossy().to_string(),
        reason: anacsync::state::PlanReason::Missing,
        size: None,
        etag: None,
        resource_name: None,
    }
}

fn parse_range(value: &str, total_len: u64) -> (u64, u64) {
    let spec = value.trim_start_matches("bytes=");
    let mut parts = spec.splitn(2, '-');
    let start: u64 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
    let end: u64 = parts
        .next()
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse().ok())
        .unwrap_or(total_len.saturating_sub(1));
    (start, end.min(total_len.saturating_sub(1)))
}
