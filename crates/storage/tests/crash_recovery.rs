use std::fs::OpenOptions;

use storage::{Store, StoreConfig};

/// A clean close/reopen preserves every committed key.
#[test]
fn reopen_after_clean_close_preserves_data() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");

    {
        let store = Store::open(StoreConfig::builder().file_name(path.to_str().unwrap()).build().unwrap()).unwrap();
        let map = store.open_map("widgets").unwrap();
        store.put(map, b"a".to_vec(), b"1".to_vec()).unwrap();
        store.commit().unwrap();
        store.put(map, b"b".to_vec(), b"2".to_vec()).unwrap();
        store.commit().unwrap();
        store.close().unwrap();
    }

    let store = Store::open(StoreConfig::builder().file_name(path.to_str().unwrap()).build().unwrap()).unwrap();
    let map = store.open_map("widgets").unwrap();
    assert_eq!(store.get(map, b"a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(store.get(map, b"b").unwrap(), Some(b"2".to_vec()));
    assert!(store.current_version() >= 2);
}

/// Truncating the tail of the file (simulating a crash that landed mid-write
/// on the newest chunk) does NOT fail reopen outright: the store falls back
/// to a backward scan and recovers to the prior committed version instead,
/// since that chunk's own footer still checksums and everything it needs —
/// the whole chunk registry, free-space map and map roots — was re-snapshot
/// into it at commit time.
#[test]
fn truncated_tail_recovers_to_the_prior_committed_version() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");

    {
        let store = Store::open(StoreConfig::builder().file_name(path.to_str().unwrap()).build().unwrap()).unwrap();
        let map = store.open_map("widgets").unwrap();
        store.put(map, b"a".to_vec(), b"1".to_vec()).unwrap();
        store.commit().unwrap();
        store.put(map, b"b".to_vec(), b"2".to_vec()).unwrap();
        store.commit().unwrap();
        store.close().unwrap();
    }

    // Chop off a whole block from the tail: the newest chunk's header block
    // is at least that long on its own, so this reliably destroys its
    // footer (and any padding after it) without touching the chunk before
    // it, which is wholly contained in earlier blocks.
    let full_len = std::fs::metadata(&path).unwrap().len();
    let file = OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(full_len.saturating_sub(4096)).unwrap();
    drop(file);

    let store = Store::open(StoreConfig::builder().file_name(path.to_str().unwrap()).build().unwrap()).unwrap();
    let map = store.open_map("widgets").unwrap();
    assert_eq!(store.get(map, b"a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(store.get(map, b"b").unwrap(), None);
    assert_eq!(store.current_version(), 1);
    store.put(map, b"c".to_vec(), b"3".to_vec()).unwrap();
    store.commit().unwrap();
    store.close().unwrap();
}

/// A header-referenced chunk that is simply gone (file truncated well past
/// its start) with no earlier chunk to fall back to is unrecoverable without
/// `recovery_mode`.
#[test]
fn truncation_with_no_recoverable_chunk_is_rejected_without_recovery_mode() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");

    {
        let store = Store::open(StoreConfig::builder().file_name(path.to_str().unwrap()).build().unwrap()).unwrap();
        let map = store.open_map("widgets").unwrap();
        store.put(map, b"a".to_vec(), b"1".to_vec()).unwrap();
        store.commit().unwrap();
        store.close().unwrap();
    }

    // Leave only the two header blocks; every chunk is gone.
    let file = OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(2 * 4096).unwrap();
    drop(file);

    let result = Store::open(StoreConfig::builder().file_name(path.to_str().unwrap()).build().unwrap());
    assert!(result.is_err());
}

/// ...while `recovery_mode(true)` degrades gracefully instead of panicking
/// or returning an error, opening an empty, writable store.
#[test]
fn truncated_tail_degrades_to_empty_store_in_recovery_mode() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");

    {
        let store = Store::open(StoreConfig::builder().file_name(path.to_str().unwrap()).build().unwrap()).unwrap();
        let map = store.open_map("widgets").unwrap();
        store.put(map, b"a".to_vec(), b"1".to_vec()).unwrap();
        store.commit().unwrap();
        store.put(map, b"b".to_vec(), b"2".to_vec()).unwrap();
        store.commit().unwrap();
        store.close().unwrap();
    }

    let full_len = std::fs::metadata(&path).unwrap().len();
    let file = OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(full_len.saturating_sub(64)).unwrap();
    drop(file);

    let store = Store::open(
        StoreConfig::builder()
            .file_name(path.to_str().unwrap())
            .recovery_mode(true)
            .build()
            .unwrap(),
    )
    .unwrap();

    let map = store.open_map("widgets").unwrap();
    assert_eq!(store.get(map, b"a").unwrap(), None);
    store.put(map, b"c".to_vec(), b"3".to_vec()).unwrap();
    store.commit().unwrap();
    assert_eq!(store.get(map, b"c").unwrap(), Some(b"3".to_vec()));
    store.close().unwrap();
}

/// A rollback stamps a clean header immediately, so reopening right after it
/// (simulating a crash before the next commit) still reflects the rollback
/// instead of resurrecting the discarded version.
#[test]
fn rollback_survives_reopen_without_a_further_commit() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");

    {
        let store = Store::open(StoreConfig::builder().file_name(path.to_str().unwrap()).build().unwrap()).unwrap();
        let map = store.open_map("widgets").unwrap();
        store.put(map, b"a".to_vec(), b"1".to_vec()).unwrap();
        store.commit().unwrap();
        store.put(map, b"b".to_vec(), b"2".to_vec()).unwrap();
        store.commit().unwrap();
        store.rollback_to(1).unwrap();
        // No `close()`: the rollback's own header stamp is what must survive.
    }

    let store = Store::open(StoreConfig::builder().file_name(path.to_str().unwrap()).build().unwrap()).unwrap();
    assert_eq!(store.current_version(), 1);
    let map = store.open_map("widgets").unwrap();
    assert_eq!(store.get(map, b"a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(store.get(map, b"b").unwrap(), None);
}

/// A zero-byte (freshly created) file opens as a brand-new empty store
/// rather than being treated as corrupt.
#[test]
fn brand_new_file_opens_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");
    let store = Store::open(StoreConfig::builder().file_name(path.to_str().unwrap()).build().unwrap()).unwrap();
    assert_eq!(store.current_version(), 0);
    store.close().unwrap();
}
