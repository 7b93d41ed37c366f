//! Shared steps every strategy goes through, per spec.md §4.6 "Common
//! steps for all strategies": probe, short-circuit, write into `.part`,
//! fsync+rename+hash+sidecar on success.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::error::Result;
use crate::http::{ProbeInfo, Transport};
use crate::state::{Segments, Sidecar};
use crate::util::{now_utc, sha256_file, sibling_with_suffix, sleep_with_jitter, write_at};

pub(crate) enum Precheck {
    /// Destination already exists, matches the probed size and the
    /// sidecar's recorded hash: no network needed (spec.md §4.6 step 2).
    AlreadyComplete { bytes: u64 },
    Proceed(ProbeInfo),
}

pub(crate) async fn precheck(transport: &Transport, url: &str, dest: &Path) -> Result<Precheck> {
    let probe = transport.probe(url).await?;
    if let Some(len) = probe.content_length {
        if dest.exists() {
            if let Ok(metadata) = fs::metadata(dest) {
                if metadata.len() == len {
                    if let Some(sidecar) = read_sidecar(dest) {
                        if let Ok(hash) = sha256_file(dest) {
                            if hash == sidecar.sha256 {
                                return Ok(Precheck::AlreadyComplete { bytes: len });
                            }
                        }
                    }
                }
            }
        }
    }
    Ok(Precheck::Proceed(probe))
}

pub(crate) fn sidecar_path(dest: &Path) -> std::path::PathBuf {
    sibling_with_suffix(dest, ".meta.json")
}

pub(crate) fn part_path(dest: &Path) -> std::path::PathBuf {
    sibling_with_suffix(dest, ".part")
}

pub(crate) fn read_sidecar(dest: &Path) -> Option<Sidecar> {
    let contents = fs::read_to_string(sidecar_path(dest)).ok()?;
    serde_json::from_str(&contents).ok()
}

pub(crate) fn write_sidecar(dest: &Path, sidecar: &Sidecar) -> Result<()> {
    let pretty = serde_json::to_string_pretty(sidecar)?;
    crate::util::atomic_write(&sidecar_path(dest), pretty.as_bytes())
}

/// Create `part` if missing, or truncate it to `len` bytes — used both to
/// start a fresh growing download at offset 0 and to drop an overlap tail
/// before resuming (spec.md §4.6 S1).
pub(crate) fn prepare_part_for_resume(part: &Path, len: u64) -> Result<()> {
    if let Some(parent) = part.parent() {
        fs::create_dir_all(parent).map_err(|e| fs_err(parent, e))?;
    }
    let f = OpenOptions::new()
        .create(true)
        .write(true)
        .open(part)
        .map_err(|e| fs_err(part, e))?;
    f.set_len(len).map_err(|e| fs_err(part, e))?;
    Ok(())
}

fn fs_err(path: &Path, source: std::io::Error) -> crate::error::AnacsyncError {
    crate::error::AnacsyncError::Filesystem {
        path: path.to_path_buf(),
        source,
    }
}

/// Chunk size for S1/S4/S5's linear fill, per spec.md §4.6 S1's tiering:
/// `<50MiB` -> tier 0, `<300MiB` -> tier 1, else tier 2. Unknown size
/// falls back to tier 0.
pub(crate) fn dynamic_chunk_size(content_length: Option<u64>, tiers_mb: &[u64; 3]) -> u64 {
    const MIB: u64 = 1024 * 1024;
    let tier = match content_length {
        Some(len) if len < 50 * MIB => tiers_mb[0],
        Some(len) if len < 300 * MIB => tiers_mb[1],
        Some(_) => tiers_mb[2],
        None => tiers_mb[0],
    };
    tier * MIB
}

/// Request successive ranges starting at `offset` until `stop_at` (if
/// known) is reached or the server returns an empty body, writing each
/// chunk at its true offset. If the origin ignores the Range header and
/// answers with a full 200 body, the whole response replaces the file
/// (spec.md §7: "S1/S4 degrade to full-body download"). Returns the final
/// length of `part`.
pub(crate) async fn stream_fill(
    transport: &Transport,
    url: &str,
    part: &Path,
    mut offset: u64,
    stop_at: Option<u64>,
    chunk_size: u64,
    extra_headers: &[(&str, &str)],
    jitter: (u64, u64),
) -> Result<u64> {
    loop {
        if let Some(stop) = stop_at {
            if offset >= stop {
                break;
            }
        }
        let mut end = offset + chunk_size.max(1) - 1;
        if let Some(stop) = stop_at {
            end = end.min(stop - 1);
        }
        let resp = transport
            .get_range_with_headers(url, offset, Some(end), extra_headers)
            .await?;
        if resp.bytes.is_empty() {
            break;
        }
        if !resp.partial {
            write_full_body(part, &resp.bytes)?;
            return Ok(resp.bytes.len() as u64);
        }
        write_at(part, offset, &resp.bytes)?;
        offset += resp.bytes.len() as u64;
        sleep_with_jitter(jitter.0, jitter.1).await;
    }
    Ok(offset)
}

fn write_full_body(part: &Path, body: &[u8]) -> Result<()> {
    if let Some(parent) = part.parent() {
        fs::create_dir_all(parent).map_err(|e| fs_err(parent, e))?;
    }
    let mut f = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(part)
        .map_err(|e| fs_err(part, e))?;
    f.write_all(body).map_err(|e| fs_err(part, e))?;
    f.flush().map_err(|e| fs_err(part, e))?;
    f.sync_all().map_err(|e| fs_err(part, e))?;
    Ok(())
}

/// Rename `part` over `dest` after fsyncing it, compute the final
/// SHA-256 and write the sidecar, per spec.md §4.6 step 4.
///
/// If a prior sidecar for this `dest` already recorded an expected hash
/// (the file was downloaded before and is now being re-fetched), the
/// freshly computed hash is checked against it. A mismatch is the only
/// genuine Integrity failure in this engine, per spec.md §7 — the newly
/// written file is discarded and the attempt fails instead of silently
/// overwriting an expectation the rest of the system may still rely on.
#[allow(clippy::too_many_arguments)]
pub(crate) fn finalize_download(
    dest: &Path,
    part: &Path,
    strategy: &str,
    url: &str,
    dataset_slug: &str,
    resource_name: Option<&str>,
    etag: Option<String>,
    content_length: Option<u64>,
    segments: Option<Segments>,
) -> Result<Sidecar> {
    let expected = read_sidecar(dest).map(|s| s.sha256);

    let f = OpenOptions::new().read(true).open(part).map_err(|e| fs_err(part, e))?;
    f.sync_all().map_err(|e| fs_err(part, e))?;
    drop(f);
    fs::rename(part, dest).map_err(|e| fs_err(dest, e))?;
    let sha256 = sha256_file(dest)?;

    if let Some(expected) = expected {
        if !expected.is_empty() && expected != sha256 {
            let _ = fs::remove_file(dest);
            return Err(crate::error::AnacsyncError::Integrity {
                path: dest.to_path_buf(),
                expected,
                actual: sha256,
            });
        }
    }

    let sidecar = Sidecar {
        sha256,
        downloaded_at: now_utc(),
        strategy: strategy.to_string(),
        etag,
        content_length,
        url: url.to_string(),
        dataset_slug: dataset_slug.to_string(),
        resource_name: resource_name.map(|s| s.to_string()),
        segments,
    };
    write_sidecar(dest, &sidecar)?;
    Ok(sidecar)
}

/// Discard a `.part` left by a failed or integrity-mismatched attempt, per
/// spec.md §7's Integrity error handling.
pub(crate) fn discard_part(part: &Path) {
    let _ = fs::remove_file(part);
}

pub(crate) fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| fs_err(parent, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dynamic_chunk_size_picks_tier_by_total_size() {
        let tiers = [2, 6, 12];
        assert_eq!(dynamic_chunk_size(Some(10 * 1024 * 1024), &tiers), 2 * 1024 * 1024);
        assert_eq!(dynamic_chunk_size(Some(100 * 1024 * 1024), &tiers), 6 * 1024 * 1024);
        assert_eq!(dynamic_chunk_size(Some(500 * 1024 * 1024), &tiers), 12 * 1024 * 1024);
        assert_eq!(dynamic_chunk_size(None, &tiers), 2 * 1024 * 1024);
    }
}
