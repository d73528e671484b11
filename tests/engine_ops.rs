//! # Engine Operation Tests
//!
//! End-to-end coverage of the public surface: engine dispatch, config
//! handling, point operations, counts, range scans in both callback and
//! copy forms, ordered navigation and defrag validation. Everything here
//! goes through `Db`, the way an embedder would.

use tempfile::tempdir;

use nvkv::{errormsg, Config, Db, KvError, Status, BLACKHOLE_ENGINE, TREE_ENGINE};

fn open_db(dir: &tempfile::TempDir) -> Db {
    let mut config = Config::new();
    config.put_string("path", dir.path().join("kv.pool").to_str().unwrap());
    Db::open(TREE_ENGINE, &config).unwrap()
}

fn put_keys(db: &Db, count: usize) {
    for i in 1..=count {
        let key = format!("key{:02}", i);
        let value = format!("value{:02}", i);
        db.put(key.as_bytes(), value.as_bytes()).unwrap();
    }
}

mod dispatch_tests {
    use super::*;

    #[test]
    fn unknown_engine_name() {
        let err = Db::open("tree9", &Config::new()).unwrap_err();
        assert_eq!(err.status(), Status::WrongEngineName);
        assert!(errormsg().contains("tree9"));
    }

    #[test]
    fn blackhole_engine_is_available() {
        let db = Db::open(BLACKHOLE_ENGINE, &Config::new()).unwrap();
        assert_eq!(db.engine_name(), BLACKHOLE_ENGINE);

        db.put(b"k", b"v").unwrap();
        assert!(!db.exists(b"k").unwrap());
        assert_eq!(db.count_all().unwrap(), 0);
        assert_eq!(
            db.get_value(b"k").unwrap_err().status(),
            Status::NotFound
        );
        // ordered queries are not part of the blackhole's repertoire
        assert_eq!(
            db.get_begin().unwrap_err().status(),
            Status::NotSupported
        );
    }

    #[test]
    fn tree_engine_reports_its_name() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);
        assert_eq!(db.engine_name(), TREE_ENGINE);
    }
}

mod config_tests {
    use super::*;

    #[test]
    fn missing_path_is_invalid_argument() {
        let err = Db::open(TREE_ENGINE, &Config::new()).unwrap_err();
        assert_eq!(err.status(), Status::InvalidArgument);
        assert!(errormsg().contains("path"));
    }

    #[test]
    fn wrong_typed_size_is_config_type_error() {
        let dir = tempdir().unwrap();
        let mut config = Config::new();
        config
            .put_string("path", dir.path().join("kv.pool").to_str().unwrap())
            .put_string("size", "lots");

        let err = Db::open(TREE_ENGINE, &config).unwrap_err();
        assert_eq!(err.status(), Status::ConfigTypeError);
    }

    #[test]
    fn malformed_option_string_is_parsing_error() {
        let err = Config::parse("path=/x,size").unwrap_err();
        assert_eq!(err.status(), Status::ConfigParsingError);
    }

    #[test]
    fn option_string_opens_a_database() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kv.pool");
        let text = format!("path={},size=1048576,force_create=1", path.display());
        let config = Config::parse(&text).unwrap();

        let db = Db::open(TREE_ENGINE, &config).unwrap();
        db.put(b"k", b"v").unwrap();
        assert_eq!(db.count_all().unwrap(), 1);
    }
}

mod point_op_tests {
    use super::*;

    #[test]
    fn put_get_count_roundtrip() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);

        db.put(b"k1", b"v1").unwrap();
        assert_eq!(db.get_value(b"k1").unwrap(), b"v1");
        assert_eq!(db.count_all().unwrap(), 1);
    }

    #[test]
    fn exists_and_get_agree() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);
        put_keys(&db, 10);
        db.remove(b"key05").unwrap();

        for i in 1..=10 {
            let key = format!("key{:02}", i);
            let via_exists = db.exists(key.as_bytes()).unwrap();
            let via_get = db.get_value(key.as_bytes()).is_ok();
            assert_eq!(via_exists, via_get, "{key}");
        }
    }

    #[test]
    fn remove_is_idempotent_and_updates_count() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);
        put_keys(&db, 18);

        db.get_all(|_k, _v| 0).unwrap();

        db.remove(b"key01").unwrap();
        assert!(!db.exists(b"key01").unwrap());
        assert_eq!(db.count_all().unwrap(), 17);

        // second remove of the same key still reports success
        db.remove(b"key01").unwrap();
        assert_eq!(db.count_all().unwrap(), 17);
    }

    #[test]
    fn put_remove_put_reads_latest_value() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);

        db.put(b"key", b"first").unwrap();
        db.remove(b"key").unwrap();
        db.put(b"key", b"second").unwrap();

        assert_eq!(db.get_value(b"key").unwrap(), b"second");

        let analysis = db.analyze().unwrap();
        assert_eq!(analysis.leaf_total, 1);
        assert_eq!(analysis.leaf_empty, 0);
    }
}

mod range_tests {
    use super::*;

    #[test]
    fn counts_partition_around_a_pivot() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);
        put_keys(&db, 18);

        assert_eq!(db.count_above(b"key09").unwrap(), 9);
        assert_eq!(db.count_equal_above(b"key09").unwrap(), 10);
        assert_eq!(db.count_below(b"key09").unwrap(), 8);
        assert_eq!(db.count_equal_below(b"key09").unwrap(), 9);
        assert_eq!(db.count_between(b"key03", b"key09").unwrap(), 5);

        // above and equal_below partition the key space
        assert_eq!(
            db.count_above(b"key09").unwrap() + db.count_equal_below(b"key09").unwrap(),
            db.count_all().unwrap()
        );
        // a pivot that is not present partitions too
        assert_eq!(
            db.count_above(b"key095").unwrap() + db.count_equal_below(b"key095").unwrap(),
            db.count_all().unwrap()
        );
    }

    #[test]
    fn get_all_visits_in_ascending_order() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);
        put_keys(&db, 18);

        let mut visited = Vec::new();
        db.get_all(|k, v| {
            visited.push((k.to_vec(), v.to_vec()));
            0
        })
        .unwrap();

        assert_eq!(visited.len(), 18);
        assert!(visited.windows(2).all(|w| w[0].0 < w[1].0));
        assert_eq!(visited[0].0, b"key01");
        assert_eq!(visited[17].1, b"value18");
    }

    #[test]
    fn bounded_scans_respect_their_bounds() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);
        put_keys(&db, 18);

        let above = db.get_above_vec(b"key15").unwrap();
        assert_eq!(
            above.iter().map(|(k, _)| k.as_slice()).collect::<Vec<_>>(),
            vec![&b"key16"[..], &b"key17"[..], &b"key18"[..]]
        );

        let equal_below = db.get_equal_below_vec(b"key03").unwrap();
        assert_eq!(equal_below.len(), 3);
        assert_eq!(equal_below.last().unwrap().0, b"key03");

        let between = db.get_between_vec(b"key10", b"key13").unwrap();
        assert_eq!(
            between.iter().map(|(k, _)| k.as_slice()).collect::<Vec<_>>(),
            vec![&b"key11"[..], &b"key12"[..]]
        );

        // inverted range is empty
        assert!(db.get_between_vec(b"key13", b"key10").unwrap().is_empty());
    }

    #[test]
    fn callback_stop_on_third_visit() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);
        put_keys(&db, 18);

        let mut visited = 0;
        let err = db
            .get_all(|_k, _v| {
                visited += 1;
                if visited == 3 {
                    1
                } else {
                    0
                }
            })
            .unwrap_err();

        assert_eq!(err, KvError::StoppedByCallback);
        assert_eq!(visited, 3);
        // read-only: the store is unchanged
        assert_eq!(db.count_all().unwrap(), 18);
    }
}

mod navigation_tests {
    use super::*;

    #[test]
    fn begin_upper_lower() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);
        put_keys(&db, 18);

        let (k, v) = db.get_begin().unwrap().unwrap();
        assert_eq!((k.as_slice(), v.as_slice()), (&b"key01"[..], &b"value01"[..]));

        let (k, v) = db.upper_bound(b"key06").unwrap().unwrap();
        assert_eq!((k.as_slice(), v.as_slice()), (&b"key07"[..], &b"value07"[..]));

        let (k, v) = db.lower_bound(b"key09").unwrap().unwrap();
        assert_eq!((k.as_slice(), v.as_slice()), (&b"key09"[..], &b"value09"[..]));

        assert!(db.upper_bound(b"key18").unwrap().is_none());
    }

    #[test]
    fn next_prev_nearest_neighbor_semantics() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);
        db.put(b"b", b"2").unwrap();
        db.put(b"d", b"4").unwrap();
        db.put(b"f", b"6").unwrap();

        // present probe key
        assert_eq!(db.get_next(b"d").unwrap().unwrap().0, b"f");
        assert_eq!(db.get_prev(b"d").unwrap().unwrap().0, b"b");

        // absent probe key: nearest neighbors still resolve
        assert_eq!(db.get_next(b"c").unwrap().unwrap().0, b"d");
        assert_eq!(db.get_prev(b"c").unwrap().unwrap().0, b"b");

        // past the ends
        assert!(db.get_next(b"f").unwrap().is_none());
        assert!(db.get_prev(b"b").unwrap().is_none());
    }

    #[test]
    fn empty_store_navigation() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);

        assert!(db.get_begin().unwrap().is_none());
        assert!(db.upper_bound(b"x").unwrap().is_none());
        assert!(db.lower_bound(b"x").unwrap().is_none());
        assert!(db.get_next(b"x").unwrap().is_none());
        assert!(db.get_prev(b"x").unwrap().is_none());
    }
}

mod defrag_tests {
    use super::*;

    #[test]
    fn defrag_is_a_safe_no_op() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);
        put_keys(&db, 18);

        db.defrag(0.0, 100.0).unwrap();
        assert_eq!(db.count_all().unwrap(), 18);
        assert_eq!(db.get_value(b"key07").unwrap(), b"value07");
    }

    #[test]
    fn defrag_rejects_bad_arguments() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);

        assert_eq!(
            db.defrag(-5.0, 50.0).unwrap_err().status(),
            Status::InvalidArgument
        );
        assert_eq!(
            db.defrag(10.0, 150.0).unwrap_err().status(),
            Status::InvalidArgument
        );
        assert!(errormsg().contains("amount_percent"));
    }
}
