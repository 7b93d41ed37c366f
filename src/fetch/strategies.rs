//! The five download strategies, per spec.md §4.6, ported from
//! `original_source/anacsync/downloader/strategies.py`'s `S1DynamicStrategy`
//! .. `S5TailFirstStrategy`. Each is a free function rather than a class
//! hierarchy, matching spec.md §9's explicit call for tagged-union
//! dispatch over deep inheritance.

use std::fs;
use std::path::Path;
use std::process::Command;

use tracing::debug;

use crate::config::{Config, StrategyKind};
use crate::error::Result;
use crate::http::Transport;
use crate::state::{PlanItem, Segments};

use super::common::{
    discard_part, dynamic_chunk_size, ensure_parent, finalize_download, part_path, precheck,
    prepare_part_for_resume, read_sidecar, stream_fill, write_sidecar, Precheck,
};
use super::DownloadResult;

/// Dispatch one strategy attempt. Never returns `Err`: any failure is
/// captured as a failed `DownloadResult`, per spec.md §7's "per-item
/// errors are captured as structured results" requirement.
pub(crate) async fn run(kind: StrategyKind, transport: &Transport, config: &Config, item: &PlanItem) -> DownloadResult {
    let name = kind.name();
    let outcome = match kind {
        StrategyKind::S1Dynamic => fetch_s1(transport, config, item).await,
        StrategyKind::S2Sparse => fetch_s2(transport, config, item).await,
        StrategyKind::S3Curl => fetch_s3(config, item).await,
        StrategyKind::S4ShortConn => fetch_s4(transport, config, item).await,
        StrategyKind::S5TailFirst => fetch_s5(transport, config, item).await,
    };
    match outcome {
        Ok(result) => result,
        Err(e) => DownloadResult::failure(name, e.to_string()),
    }
}

/// S1 — Dynamic Range Streaming: sequential range requests with a
/// size-tiered chunk, resuming from the existing `.part` length minus
/// `overlap_bytes`.
async fn fetch_s1(transport: &Transport, config: &Config, item: &PlanItem) -> Result<DownloadResult> {
    let dest = Path::new(&item.dest_path);
    let probe = match precheck(transport, &item.resource_url, dest).await? {
        Precheck::AlreadyComplete { bytes } => return Ok(DownloadResult::success("S1", bytes, None)),
        Precheck::Proceed(probe) => probe,
    };

    let part = part_path(dest);
    ensure_parent(&part)?;
    let chunk_size = dynamic_chunk_size(probe.content_length, &config.downloader.dynamic_chunks_mb);
    let overlap = config.downloader.overlap_bytes;

    let start_offset = if part.exists() {
        fs::metadata(&part)
            .map(|m| m.len())
            .unwrap_or(0)
            .saturating_sub(overlap)
    } else {
        0
    };
    prepare_part_for_resume(&part, start_offset)?;

    // A transient failure here leaves `part` on disk untouched: the next
    // attempt (same strategy, or the next one in the cascade) resumes from
    // it rather than restarting at byte 0.
    let final_len = stream_fill(
        transport,
        &item.resource_url,
        &part,
        start_offset,
        probe.content_length,
        chunk_size,
        &[],
        (100, 200),
    )
    .await?;

    let sidecar = finalize_download(
        dest,
        &part,
        "S1",
        &item.resource_url,
        &item.dataset_slug,
        item.resource_name.as_deref(),
        probe.etag,
        probe.content_length.or(Some(final_len)),
        None,
    )?;
    Ok(DownloadResult::success("S1", final_len, sidecar.etag))
}

/// S2 — Sparse Segments with Bitmap. Requires a known `content_length`.
/// Segment fetch order: first, last, middle, then remaining ascending.
async fn fetch_s2(transport: &Transport, config: &Config, item: &PlanItem) -> Result<DownloadResult> {
    let dest = Path::new(&item.dest_path);
    let probe = match precheck(transport, &item.resource_url, dest).await? {
        Precheck::AlreadyComplete { bytes } => return Ok(DownloadResult::success("S2", bytes, None)),
        Precheck::Proceed(probe) => probe,
    };
    let Some(content_length) = probe.content_length else {
        return Ok(DownloadResult::failure("S2", "file size unknown, cannot use sparse strategy"));
    };

    let segment_size = config.downloader.sparse_segment_mb * 1024 * 1024;
    let num_segments = content_length.div_ceil(segment_size) as usize;

    let part = part_path(dest);
    ensure_parent(&part)?;

    let mut bitmap: Vec<u8> = read_sidecar(dest)
        .and_then(|s| s.segments)
        .filter(|s| s.bitmap.len() == num_segments)
        .map(|s| s.bitmap.into_bytes())
        .unwrap_or_else(|| vec![b'0'; num_segments]);

    let needs_preallocate = !part.exists() || fs::metadata(&part).map(|m| m.len()).unwrap_or(0) != content_length;
    if needs_preallocate {
        crate::util::preallocate(&part, content_length)?;
        bitmap = vec![b'0'; num_segments];
    }

    let mut bytes_written = 0u64;
    for idx in segment_order(num_segments) {
        if bitmap[idx] == b'1' {
            continue;
        }
        let start = idx as u64 * segment_size;
        let end = (start + segment_size - 1).min(content_length - 1);

        let resp = transport.get_range(&item.resource_url, start, Some(end)).await?;
        if !resp.partial {
            return Ok(DownloadResult::failure("S2", "server does not support range requests"));
        }
        if resp.bytes.is_empty() {
            continue;
        }
        crate::util::write_at(&part, start, &resp.bytes)?;
        bytes_written += resp.bytes.len() as u64;
        bitmap[idx] = b'1';

        let partial_sidecar = partial_sparse_sidecar(item, &probe, segment_size, &bitmap);
        write_sidecar(dest, &partial_sidecar)?;

        crate::util::sleep_with_jitter(100, 200).await;
    }

    if bitmap.contains(&b'0') {
        return Ok(DownloadResult::failure_with_bytes(
            "S2",
            bytes_written,
            "not all segments downloaded successfully",
        ));
    }

    let bitmap_str = String::from_utf8(bitmap).expect("bitmap is ASCII");
    let segments = Segments {
        size: segment_size,
        bitmap: bitmap_str,
    };
    let sidecar = finalize_download(
        dest,
        &part,
        "S2",
        &item.resource_url,
        &item.dataset_slug,
        item.resource_name.as_deref(),
        probe.etag,
        Some(content_length),
        Some(segments),
    )?;
    debug!("S2 completed {} with bitmap {:?}", item.resource_url, sidecar.segments);
    Ok(DownloadResult::success("S2", content_length, sidecar.etag))
}

fn partial_sparse_sidecar(
    item: &PlanItem,
    probe: &crate::http::ProbeInfo,
    segment_size: u64,
    bitmap: &[u8],
) -> crate::state::Sidecar {
    crate::state::Sidecar {
        sha256: String::new(),
        downloaded_at: crate::util::now_utc(),
        strategy: "S2".to_string(),
        etag: probe.etag.clone(),
        content_length: probe.content_length,
        url: item.resource_url.clone(),
        dataset_slug: item.dataset_slug.clone(),
        resource_name: item.resource_name.clone(),
        segments: Some(Segments {
            size: segment_size,
            bitmap: String::from_utf8_lossy(bitmap).to_string(),
        }),
    }
}

/// Non-linear segment order: 0, last, middle, then the rest ascending.
fn segment_order(num_segments: usize) -> Vec<usize> {
    if num_segments <= 1 {
        return vec![0];
    }
    let mut order = Vec::with_capacity(num_segments);
    order.push(0);
    order.push(num_segments - 1);
    if num_segments > 2 {
        let middle = num_segments / 2;
        if !order.contains(&middle) {
            order.push(middle);
        }
    }
    for i in 1..num_segments - 1 {
        if !order.contains(&i) {
            order.push(i);
        }
    }
    order
}

/// S3 — delegate to an external `curl` binary, resuming natively.
async fn fetch_s3(config: &Config, item: &PlanItem) -> Result<DownloadResult> {
    if !config.downloader.enable_curl {
        return Ok(DownloadResult::failure("S3", "curl strategy disabled in configuration"));
    }
    let curl_path = config.downloader.curl_path.clone();
    if which::which(&curl_path).is_err() {
        return Ok(DownloadResult::failure("S3", format!("curl not found at {curl_path}")));
    }

    let dest = Path::new(&item.dest_path).to_path_buf();
    let part = part_path(&dest);
    ensure_parent(&part)?;
    let url = item.resource_url.clone();

    let output = tokio::task::spawn_blocking(move || {
        Command::new(&curl_path)
            .arg("--location")
            .arg("--retry")
            .arg("3")
            .arg("--retry-delay")
            .arg("2")
            .arg("--continue-at")
            .arg("-")
            .arg("--output")
            .arg(&part)
            .arg("--write-out")
            .arg("%{http_code}:%{size_download}")
            .arg(&url)
            .output()
    })
    .await
    .map_err(|e| crate::error::AnacsyncError::Config(format!("curl task join error: {e}")))?
    .map_err(|e| crate::error::AnacsyncError::Config(format!("failed to spawn curl: {e}")))?;

    if !output.status.success() {
        return Ok(DownloadResult::failure(
            "S3",
            format!("curl exited with {}: {}", output.status, String::from_utf8_lossy(&output.stderr)),
        ));
    }

    let trailer = String::from_utf8_lossy(&output.stdout);
    let mut parts = trailer.trim().splitn(2, ':');
    let http_code: u16 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
    let reported_size: u64 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);

    if http_code != 200 && http_code != 206 {
        discard_part(&part);
        return Ok(DownloadResult::failure("S3", format!("HTTP {http_code}")));
    }
    if !part.exists() {
        return Ok(DownloadResult::failure("S3", "no file created by curl"));
    }

    let bytes_written = fs::metadata(&part).map(|m| m.len()).unwrap_or(reported_size);
    let sidecar = finalize_download(
        &dest,
        &part,
        "S3",
        &item.resource_url,
        &item.dataset_slug,
        item.resource_name.as_deref(),
        item.etag.clone(),
        Some(bytes_written),
        None,
    )?;
    Ok(DownloadResult::success("S3", bytes_written, sidecar.etag))
}

/// S4 — Short Connections: same sequencing as S1, with very small chunks
/// and `Connection: close` on every request, for origins that penalize
/// long-lived connections.
async fn fetch_s4(transport: &Transport, config: &Config, item: &PlanItem) -> Result<DownloadResult> {
    let dest = Path::new(&item.dest_path);
    let probe = match precheck(transport, &item.resource_url, dest).await? {
        Precheck::AlreadyComplete { bytes } => return Ok(DownloadResult::success("S4", bytes, None)),
        Precheck::Proceed(probe) => probe,
    };

    let part = part_path(dest);
    ensure_parent(&part)?;
    let chunk_size = config.downloader.snail_chunks_kb * 1024;

    let start_offset = if part.exists() {
        fs::metadata(&part).map(|m| m.len()).unwrap_or(0)
    } else {
        0
    };
    prepare_part_for_resume(&part, start_offset)?;

    // As in S1, a transient failure leaves `part` intact for resume.
    let final_len = stream_fill(
        transport,
        &item.resource_url,
        &part,
        start_offset,
        probe.content_length,
        chunk_size,
        &[("Connection", "close")],
        (50, 100),
    )
    .await?;

    let sidecar = finalize_download(
        dest,
        &part,
        "S4",
        &item.resource_url,
        &item.dataset_slug,
        item.resource_name.as_deref(),
        probe.etag,
        probe.content_length.or(Some(final_len)),
        None,
    )?;
    Ok(DownloadResult::success("S4", final_len, sidecar.etag))
}

/// S5 — Tail-First: download the final `min(1MiB, content_length)` bytes
/// first to pin the file's end, then fill the head with S1's chunking.
async fn fetch_s5(transport: &Transport, config: &Config, item: &PlanItem) -> Result<DownloadResult> {
    let dest = Path::new(&item.dest_path);
    let probe = match precheck(transport, &item.resource_url, dest).await? {
        Precheck::AlreadyComplete { bytes } => return Ok(DownloadResult::success("S5", bytes, None)),
        Precheck::Proceed(probe) => probe,
    };
    let Some(content_length) = probe.content_length else {
        return Ok(DownloadResult::failure("S5", "file size unknown, cannot use tail-first strategy"));
    };

    let part = part_path(dest);
    ensure_parent(&part)?;
    crate::util::preallocate(&part, content_length)?;

    let tail_size = content_length.min(1024 * 1024);
    let tail_start = content_length - tail_size;
    let tail_resp = transport
        .get_range(&item.resource_url, tail_start, Some(content_length - 1))
        .await?;
    if !tail_resp.partial {
        discard_part(&part);
        return Ok(DownloadResult::failure("S5", "server does not support range requests"));
    }
    crate::util::write_at(&part, tail_start, &tail_resp.bytes)?;
    let mut bytes_written = tail_resp.bytes.len() as u64;

    // Transient failure filling the head leaves the already-pinned tail and
    // whatever head bytes landed on disk for the next attempt to resume.
    let chunk_size = dynamic_chunk_size(Some(content_length), &config.downloader.dynamic_chunks_mb);
    let head_len = stream_fill(transport, &item.resource_url, &part, 0, Some(tail_start), chunk_size, &[], (100, 200)).await?;
    bytes_written += head_len.min(tail_start);

    let sidecar = finalize_download(
        dest,
        &part,
        "S5",
        &item.resource_url,
        &item.dataset_slug,
        item.resource_name.as_deref(),
        probe.etag,
        Some(content_length),
        None,
    )?;
    Ok(DownloadResult::success("S5", content_length, sidecar.etag))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_order_starts_first_last_middle() {
        let order = segment_order(6);
        assert_eq!(&order[..3], &[0, 5, 3]);
        let mut sorted = order.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn segment_order_handles_trivial_sizes() {
        assert_eq!(segment_order(1), vec![0]);
        assert_eq!(segment_order(2), vec![0, 1]);
    }
}
