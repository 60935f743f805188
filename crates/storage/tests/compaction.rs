use storage::{Store, StoreConfig};

/// Each commit in this engine supersedes its map roots wholesale (there is
/// no incremental page update), so a string of small commits leaves behind
/// a trail of fully-dead chunks next to one fully-live one. That should
/// drag the global fill rate down and give `compact_file` something to do.
#[test]
fn repeated_commits_lower_fill_rate_and_compaction_recovers_it() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");
    let store = Store::open(
        StoreConfig::builder()
            .file_name(path.to_str().unwrap())
            // Zero retention so newly-dead chunks are reclaimable the moment
            // compaction's own consolidating commit makes them dead, instead
            // of waiting out the real 45s grace period in a test.
            .retention_time_ms(0)
            .build()
            .unwrap(),
    )
    .unwrap();
    let map = store.open_map("widgets").unwrap();

    for i in 0..20u32 {
        store.put(map, format!("key{i}").into_bytes(), vec![b'x'; 256]).unwrap();
        store.commit().unwrap();
    }

    let fill_rate_before = store.chunks_fill_rate();
    assert!(fill_rate_before < 90, "expected fill rate to degrade after many commits, got {fill_rate_before}");

    let compacted = store.compact_file(u64::MAX).unwrap();
    assert!(compacted, "compact_file should find work to do when fill rate is low");

    // A chunk a consolidating commit just orphaned is only booked as dead
    // once a later commit's occupancy pass processes it, so recovering to a
    // high fill rate can take a few rounds of "compact, let the next commit
    // settle the books" rather than a single call.
    let mut rounds = 0;
    while store.chunks_fill_rate() < 90 && rounds < 10 {
        store.compact_file(u64::MAX).unwrap();
        rounds += 1;
    }
    assert!(
        store.chunks_fill_rate() >= 90,
        "expected fill rate to recover after repeated compaction, got {}",
        store.chunks_fill_rate()
    );
    for i in 0..20u32 {
        assert_eq!(store.get(map, format!("key{i}").as_bytes()).unwrap(), Some(vec![b'x'; 256]));
    }

    store.close().unwrap();
}

/// `auto_compact_fill_rate(0)` disables compaction entirely.
#[test]
fn zero_fill_rate_disables_compaction() {
    let store = Store::open(
        StoreConfig::builder()
            .in_memory()
            .auto_compact_fill_rate(0)
            .build()
            .unwrap(),
    )
    .unwrap();
    let map = store.open_map("widgets").unwrap();
    for i in 0..10u32 {
        store.put(map, format!("key{i}").into_bytes(), vec![b'x'; 64]).unwrap();
        store.commit().unwrap();
    }
    assert!(!store.compact_file(u64::MAX).unwrap());
}
