//! Small shared helpers: atomic file writes, streaming SHA-256, filename
//! sanitization and jittered sleeps. Ported from
//! `original_source/anacsync/utils.py`, kept dependency-light the way the
//! teacher keeps its own `scrapers/http_client` helpers free of heavy
//! abstractions.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::error::{AnacsyncError, Result};

const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// Current UTC timestamp in RFC 3339 form (`...Z`), matching
/// `get_timestamp()` in the original implementation.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

/// Current UTC instant, for fields typed as `DateTime<Utc>`.
pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

/// Write `content` atomically: write to `<path>.tmp`, fsync, then rename
/// over `path`. Mirrors `atomic_write()` in the original and the
/// State Store's `atomic-replace` contract in spec.md §4.2.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| fs_err(parent, e))?;
    }
    let tmp_path = sibling_with_suffix(path, ".tmp");
    let result = (|| -> Result<()> {
        let mut f = File::create(&tmp_path).map_err(|e| fs_err(&tmp_path, e))?;
        f.write_all(content).map_err(|e| fs_err(&tmp_path, e))?;
        f.flush().map_err(|e| fs_err(&tmp_path, e))?;
        f.sync_all().map_err(|e| fs_err(&tmp_path, e))?;
        fs::rename(&tmp_path, path).map_err(|e| fs_err(path, e))?;
        Ok(())
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

/// Append one `\n`-terminated line to `path`, flushing and fsyncing the
/// write. Creates the file and its parent directory if needed.
pub fn append_line(path: &Path, line: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| fs_err(parent, e))?;
    }
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| fs_err(path, e))?;
    f.write_all(line.as_bytes()).map_err(|e| fs_err(path, e))?;
    f.write_all(b"\n").map_err(|e| fs_err(path, e))?;
    f.flush().map_err(|e| fs_err(path, e))?;
    f.sync_all().map_err(|e| fs_err(path, e))?;
    Ok(())
}

fn fs_err(path: &Path, source: std::io::Error) -> AnacsyncError {
    AnacsyncError::Filesystem {
        path: path.to_path_buf(),
        source,
    }
}

/// Build `<path>` with an extra suffix appended to the filename, e.g.
/// `report.json` + `.part` -> `report.json.part`.
pub fn sibling_with_suffix(path: &Path, suffix: &str) -> std::path::PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(suffix);
    std::path::PathBuf::from(os)
}

/// Streaming SHA-256 over a file's current contents, in fixed-size chunks.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut f = File::open(path).map_err(|e| fs_err(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_CHUNK_SIZE];
    loop {
        let n = f.read(&mut buf).map_err(|e| fs_err(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Pre-allocate `path` to `size` bytes by seeking to `size - 1` and writing
/// a single zero byte, matching the sparse/tail-first strategies' use of
/// `f.seek(file_size - 1); f.write(b'\0')` in the original.
pub fn preallocate(path: &Path, size: u64) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| fs_err(parent, e))?;
    }
    let mut f = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .map_err(|e| fs_err(path, e))?;
    if size == 0 {
        return Ok(());
    }
    f.seek(SeekFrom::Start(size - 1))
        .map_err(|e| fs_err(path, e))?;
    f.write_all(&[0u8]).map_err(|e| fs_err(path, e))?;
    f.flush().map_err(|e| fs_err(path, e))?;
    f.sync_all().map_err(|e| fs_err(path, e))?;
    Ok(())
}

/// Write `content` at `offset` within an already-preallocated file, then
/// fsync, so partial progress is always durable before bookkeeping (bitmap,
/// offset) advances.
pub fn write_at(path: &Path, offset: u64, content: &[u8]) -> Result<()> {
    let mut f = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| fs_err(path, e))?;
    f.seek(SeekFrom::Start(offset)).map_err(|e| fs_err(path, e))?;
    f.write_all(content).map_err(|e| fs_err(path, e))?;
    f.flush().map_err(|e| fs_err(path, e))?;
    f.sync_all().map_err(|e| fs_err(path, e))?;
    Ok(())
}

/// Sleep for `base_ms` plus a uniform `[0, jitter_ms)` jitter.
pub async fn sleep_with_jitter(base_ms: u64, jitter_ms: u64) {
    let jitter = if jitter_ms == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..jitter_ms)
    };
    tokio::time::sleep(Duration::from_millis(base_ms + jitter)).await;
}

/// Uniform delay in `[min_ms, max_ms]`, used by the crawler between pages.
pub async fn sleep_uniform(min_ms: u64, max_ms: u64) {
    let delay = if max_ms <= min_ms {
        min_ms
    } else {
        rand::thread_rng().gen_range(min_ms..=max_ms)
    };
    tokio::time::sleep(Duration::from_millis(delay)).await;
}

/// Make a filename filesystem-safe: replace `<>:"/\|?*`, trim leading and
/// trailing dots/spaces, clamp to 200 chars while preserving the extension,
/// and fall back to `"unnamed"` for an empty result. Ported verbatim from
/// `safe_filename()` in the original implementation.
pub fn sanitize_filename(name: &str) -> String {
    const UNSAFE: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
    let mut out: String = name
        .chars()
        .map(|c| if UNSAFE.contains(&c) { '_' } else { c })
        .collect();
    out = out.trim_matches(|c: char| c == '.' || c == ' ').to_string();

    if out.is_empty() {
        return "unnamed".to_string();
    }

    if out.len() > 200 {
        let path = Path::new(&out);
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{e}"))
            .unwrap_or_default();
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&out)
            .to_string();
        let keep = 200usize.saturating_sub(ext.len());
        let truncated_stem: String = stem.chars().take(keep).collect();
        out = format!("{truncated_stem}{ext}");
    }

    out
}

/// Extract the filename component from a URL, ignoring query string and
/// fragment, falling back to `"download"` for a trailing slash or empty
/// path. Mirrors `extract_filename_from_url()`.
pub fn filename_from_url(url: &str) -> String {
    let without_fragment = url.split('#').next().unwrap_or(url);
    let without_query = without_fragment.split('?').next().unwrap_or(without_fragment);
    let name = without_query.rsplit('/').next().unwrap_or("");
    if name.is_empty() {
        "download".to_string()
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn sanitize_replaces_unsafe_chars() {
        assert_eq!(sanitize_filename("file/with:bad*chars?"), "file_with_bad_chars");
    }

    #[test]
    fn sanitize_empty_falls_back() {
        assert_eq!(sanitize_filename(""), "unnamed");
        assert_eq!(sanitize_filename("..."), "unnamed");
    }

    #[test]
    fn sanitize_clamps_length_preserving_extension() {
        let long_name = format!("{}.json", "a".repeat(250));
        let sanitized = sanitize_filename(&long_name);
        assert!(sanitized.len() <= 200);
        assert!(sanitized.ends_with(".json"));
    }

    #[test]
    fn filename_from_url_strips_query_and_fragment() {
        assert_eq!(
            filename_from_url("https://example.com/data/report.json?x=1#frag"),
            "report.json"
        );
        assert_eq!(filename_from_url("https://example.com/"), "download");
    }

    #[test]
    fn sha256_matches_known_vector() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, b"abc").unwrap();
        let digest = sha256_file(&path).unwrap();
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn atomic_write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("out.json");
        atomic_write(&path, b"{\"a\":1}").unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "{\"a\":1}");
        assert!(!sibling_with_suffix(&path, ".tmp").exists());
    }

    #[test]
    fn preallocate_and_write_at_produce_expected_bytes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sparse.part");
        preallocate(&path, 10).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 10);
        write_at(&path, 4, b"XYZ").unwrap();
        let data = std::fs::read(&path).unwrap();
        assert_eq!(&data[4..7], b"XYZ");
    }
}
