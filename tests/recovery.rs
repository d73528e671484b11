//! # Recovery and Durability Tests
//!
//! Close/reopen cycles over the same pool file: committed data must
//! survive verbatim, split boundaries must be preserved, emptied leaves
//! must come back as preallocated capacity, and the analysis counters must
//! describe the persistent chain accurately.
//!
//! Crash-mid-transaction rollback is covered by the pool's unit tests,
//! which can leave a transaction unfinished through crate-private access;
//! here we exercise the clean-session path an embedder sees.

use tempfile::tempdir;

use nvkv::{Config, Db, TREE_ENGINE};

const LEAF_CAPACITY: usize = 48;

fn config_for(path: &std::path::Path) -> Config {
    let mut config = Config::new();
    config.put_string("path", path.to_str().unwrap());
    config
}

#[test]
fn single_key_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("kv.pool");

    {
        let db = Db::open(TREE_ENGINE, &config_for(&path)).unwrap();
        db.put(b"k1", b"v1").unwrap();
    }

    let db = Db::open(TREE_ENGINE, &config_for(&path)).unwrap();
    assert_eq!(db.get_value(b"k1").unwrap(), b"v1");
    assert_eq!(db.count_all().unwrap(), 1);
}

#[test]
fn count_after_reopen_matches_distinct_keys_at_close() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("kv.pool");

    {
        let db = Db::open(TREE_ENGINE, &config_for(&path)).unwrap();
        for i in 0..200 {
            db.put(format!("key{:04}", i).as_bytes(), b"v").unwrap();
        }
        // overwrites must not inflate the count
        for i in 0..50 {
            db.put(format!("key{:04}", i).as_bytes(), b"w").unwrap();
        }
        for i in 150..200 {
            db.remove(format!("key{:04}", i).as_bytes()).unwrap();
        }
        assert_eq!(db.count_all().unwrap(), 150);
    }

    let db = Db::open(TREE_ENGINE, &config_for(&path)).unwrap();
    assert_eq!(db.count_all().unwrap(), 150);
    assert_eq!(db.get_value(b"key0000").unwrap(), b"w");
    assert_eq!(db.get_value(b"key0100").unwrap(), b"v");
    assert!(!db.exists(b"key0175").unwrap());
}

#[test]
fn split_boundary_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("kv.pool");

    {
        let db = Db::open(TREE_ENGINE, &config_for(&path)).unwrap();
        for i in 0..=LEAF_CAPACITY {
            let key = format!("key{:03}", i);
            db.put(key.as_bytes(), key.as_bytes()).unwrap();
        }
        assert_eq!(db.analyze().unwrap().leaf_total, 2);
    }

    let db = Db::open(TREE_ENGINE, &config_for(&path)).unwrap();
    assert_eq!(db.analyze().unwrap().leaf_total, 2);
    assert_eq!(db.count_all().unwrap(), LEAF_CAPACITY + 1);

    for i in 0..=LEAF_CAPACITY {
        let key = format!("key{:03}", i);
        assert_eq!(db.get_value(key.as_bytes()).unwrap(), key.as_bytes());
    }

    let pairs = db.get_all_vec().unwrap();
    assert!(pairs.windows(2).all(|w| w[0].0 < w[1].0));
}

#[test]
fn many_leaves_reassemble_in_order() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("kv.pool");

    {
        let db = Db::open(TREE_ENGINE, &config_for(&path)).unwrap();
        // interleaved insertion order so chain order and key order diverge
        for i in (0..600).step_by(2) {
            db.put(format!("key{:04}", i).as_bytes(), b"even").unwrap();
        }
        for i in (1..600).step_by(2) {
            db.put(format!("key{:04}", i).as_bytes(), b"odd").unwrap();
        }
    }

    let db = Db::open(TREE_ENGINE, &config_for(&path)).unwrap();
    assert_eq!(db.count_all().unwrap(), 600);

    let pairs = db.get_all_vec().unwrap();
    assert_eq!(pairs.len(), 600);
    assert!(pairs.windows(2).all(|w| w[0].0 < w[1].0));

    assert_eq!(db.get_value(b"key0042").unwrap(), b"even");
    assert_eq!(db.get_value(b"key0043").unwrap(), b"odd");
    assert!(db.upper_bound(b"key0599").unwrap().is_none());
}

#[test]
fn emptied_leaves_return_as_preallocated_capacity() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("kv.pool");

    {
        let db = Db::open(TREE_ENGINE, &config_for(&path)).unwrap();
        for i in 0..=LEAF_CAPACITY {
            db.put(format!("key{:03}", i).as_bytes(), b"v").unwrap();
        }
        for i in 0..=LEAF_CAPACITY {
            db.remove(format!("key{:03}", i).as_bytes()).unwrap();
        }
        assert_eq!(db.count_all().unwrap(), 0);
    }

    let db = Db::open(TREE_ENGINE, &config_for(&path)).unwrap();
    let analysis = db.analyze().unwrap();
    assert_eq!(analysis.leaf_total, 2);
    assert_eq!(analysis.leaf_empty, 2);
    assert_eq!(analysis.leaf_prealloc, 2);

    // new inserts consume the preallocated leaves instead of allocating
    db.put(b"reborn", b"yes").unwrap();
    let analysis = db.analyze().unwrap();
    assert_eq!(analysis.leaf_total, 2);
    assert_eq!(analysis.leaf_prealloc, 1);
    assert_eq!(db.get_value(b"reborn").unwrap(), b"yes");
}

#[test]
fn force_create_discards_previous_contents() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("kv.pool");

    {
        let db = Db::open(TREE_ENGINE, &config_for(&path)).unwrap();
        db.put(b"old", b"world").unwrap();
    }

    let mut config = config_for(&path);
    config.put_uint64("force_create", 1);
    let db = Db::open(TREE_ENGINE, &config).unwrap();

    assert_eq!(db.count_all().unwrap(), 0);
    assert!(!db.exists(b"old").unwrap());
}

#[test]
fn values_of_varied_sizes_survive_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("kv.pool");

    let sizes = [0usize, 1, 7, 64, 333, 4096];
    {
        let db = Db::open(TREE_ENGINE, &config_for(&path)).unwrap();
        for (i, &size) in sizes.iter().enumerate() {
            let key = format!("size{:02}", i);
            let value = vec![b'a' + i as u8; size];
            db.put(key.as_bytes(), &value).unwrap();
        }
    }

    let db = Db::open(TREE_ENGINE, &config_for(&path)).unwrap();
    for (i, &size) in sizes.iter().enumerate() {
        let key = format!("size{:02}", i);
        let expected = vec![b'a' + i as u8; size];
        assert_eq!(db.get_value(key.as_bytes()).unwrap(), expected, "{key}");
    }
}

#[test]
fn repeated_reopen_cycles_are_stable() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("kv.pool");

    for cycle in 0..5 {
        let db = Db::open(TREE_ENGINE, &config_for(&path)).unwrap();
        assert_eq!(db.count_all().unwrap(), cycle * 10);
        for i in 0..10 {
            let key = format!("cycle{}key{}", cycle, i);
            db.put(key.as_bytes(), b"v").unwrap();
        }
        drop(db);
    }

    let db = Db::open(TREE_ENGINE, &config_for(&path)).unwrap();
    assert_eq!(db.count_all().unwrap(), 50);
}
