//! E3 — Resume. A `.part` already holds the first 512 bytes of a
//! 2,048-byte resource; S1 must resume from `512 - overlap_bytes` rather
//! than restarting at byte 0, and the finished file must hash identically
//! to an uninterrupted download.

mod common;

use anacsync::config::StrategyKind;
use tempfile::tempdir;

#[tokio::test]
async fn s1_resumes_from_existing_part_minus_overlap() {
    let content_length = 2048u64;
    let body: Vec<u8> = (0..content_length).map(|i| (i % 251) as u8).collect();
    let origin = common::start(body.clone(), "etag-e3", common::RangePolicy::AlwaysPartial);

    let root = tempdir().unwrap();
    let state = tempdir().unwrap();
    let mut config = common::test_config(root.path(), state.path(), vec![StrategyKind::S1Dynamic]);
    config.downloader.overlap_bytes = 64;

    let dest = root.path().join("small.json");
    let part = anacsync::util::sibling_with_suffix(&dest, ".part");
    std::fs::write(&part, &body[..512]).unwrap();

    let transport = anacsync::http::Transport::new(&config).unwrap();
    let item = common::plan_item(&format!("{}/small.json", origin.base_url), &dest);

    let stats = anacsync::fetch::run_plan(&config, &transport, std::slice::from_ref(&item))
        .await
        .unwrap();
    assert_eq!(stats.successful, 1);

    let expected_hash = {
        use sha2::{Digest, Sha256};
        hex::encode(Sha256::digest(&body))
    };
    assert_eq!(anacsync::util::sha256_file(&dest).unwrap(), expected_hash);

    let ranges = origin.ranges_seen.lock().unwrap();
    let first_range = ranges.first().expect("at least one range request");
    assert_eq!(first_range.0, 512 - 64, "expected resume to start at 512 - overlap_bytes");
}
