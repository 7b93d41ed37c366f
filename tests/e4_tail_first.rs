//! E4 — Tail-first. S5 must request the final MiB before anything in the
//! head, and the tail bytes must land on disk before the head does.

mod common;

use anacsync::config::StrategyKind;
use tempfile::tempdir;

#[tokio::test]
async fn s5_fetches_tail_before_head() {
    let content_length = 5 * 1024 * 1024u64;
    let body: Vec<u8> = (0..content_length).map(|i| (i % 233) as u8).collect();
    let origin = common::start(body.clone(), "etag-e4", common::RangePolicy::AlwaysPartial);

    let root = tempdir().unwrap();
    let state = tempdir().unwrap();
    let config = common::test_config(root.path(), state.path(), vec![StrategyKind::S5TailFirst]);

    let transport = anacsync::http::Transport::new(&config).unwrap();
    let dest = root.path().join("big.json");
    let item = common::plan_item(&format!("{}/big.json", origin.base_url), &dest);

    let stats = anacsync::fetch::run_plan(&config, &transport, std::slice::from_ref(&item))
        .await
        .unwrap();
    assert_eq!(stats.successful, 1);

    let expected_hash = {
        use sha2::{Digest, Sha256};
        hex::encode(Sha256::digest(&body))
    };
    assert_eq!(anacsync::util::sha256_file(&dest).unwrap(), expected_hash);

    let tail_start = content_length - 1024 * 1024;
    let ranges = origin.ranges_seen.lock().unwrap();
    let first_range = ranges.first().expect("at least one range request");
    assert_eq!(first_range.0, tail_start, "the first observed range must be the tail window");
    assert_eq!(first_range.1, content_length - 1);

    assert!(
        ranges.iter().skip(1).all(|r| r.1 < tail_start),
        "every subsequent range request must stay below the tail window: {ranges:?}"
    );
}
