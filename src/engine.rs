//! # Engine Trait and Dispatch
//!
//! The operation surface every storage engine exposes, plus the name-based
//! factory that the public [`crate::db::Db`] boundary calls. Engines are
//! object-safe so the boundary can hold `Box<dyn Engine>`; provided method
//! bodies return NOT_SUPPORTED, which keeps partial engines honest without
//! forcing stubs everywhere.
//!
//! ## Engines
//!
//! | Name        | Engine                                              |
//! |-------------|-----------------------------------------------------|
//! | `nvtree`    | Hybrid persistent-leaf B+-tree (the real engine)    |
//! | `blackhole` | Accepts all writes, remembers nothing (plumbing)    |
//!
//! ## Callbacks
//!
//! Scan operations take `&mut dyn FnMut(&[u8], &[u8]) -> i32`; a nonzero
//! return stops the scan and surfaces as STOPPED_BY_CB. The borrowed
//! slices point into engine memory and are only valid for the duration of
//! the call — callers that need to retain data copy it (the `Db` boundary
//! offers ready-made copying forms).

use std::ops::Bound;

use crate::config::Config;
use crate::status::{error_from_report, KvError, KvResult};
use crate::tree::{KvTree, ScanOutcome, TreeAnalysis};

/// Visitor for key/value scans; nonzero return stops the scan.
pub type ScanCallback<'a> = &'a mut dyn FnMut(&[u8], &[u8]) -> i32;

/// Visitor for single-value reads.
pub type ValueCallback<'a> = &'a mut dyn FnMut(&[u8]);

pub const TREE_ENGINE: &str = "nvtree";
pub const BLACKHOLE_ENGINE: &str = "blackhole";

const AVAILABLE_ENGINES: &str = "nvtree, blackhole";

pub trait Engine: Send + Sync {
    fn name(&self) -> &'static str;

    fn count_all(&self) -> KvResult<usize> {
        Err(KvError::NotSupported)
    }
    fn count_above(&self, _key: &[u8]) -> KvResult<usize> {
        Err(KvError::NotSupported)
    }
    fn count_equal_above(&self, _key: &[u8]) -> KvResult<usize> {
        Err(KvError::NotSupported)
    }
    fn count_below(&self, _key: &[u8]) -> KvResult<usize> {
        Err(KvError::NotSupported)
    }
    fn count_equal_below(&self, _key: &[u8]) -> KvResult<usize> {
        Err(KvError::NotSupported)
    }
    fn count_between(&self, _key1: &[u8], _key2: &[u8]) -> KvResult<usize> {
        Err(KvError::NotSupported)
    }

    fn get_all(&self, _callback: ScanCallback<'_>) -> KvResult<()> {
        Err(KvError::NotSupported)
    }
    fn get_above(&self, _key: &[u8], _callback: ScanCallback<'_>) -> KvResult<()> {
        Err(KvError::NotSupported)
    }
    fn get_equal_above(&self, _key: &[u8], _callback: ScanCallback<'_>) -> KvResult<()> {
        Err(KvError::NotSupported)
    }
    fn get_below(&self, _key: &[u8], _callback: ScanCallback<'_>) -> KvResult<()> {
        Err(KvError::NotSupported)
    }
    fn get_equal_below(&self, _key: &[u8], _callback: ScanCallback<'_>) -> KvResult<()> {
        Err(KvError::NotSupported)
    }
    fn get_between(
        &self,
        _key1: &[u8],
        _key2: &[u8],
        _callback: ScanCallback<'_>,
    ) -> KvResult<()> {
        Err(KvError::NotSupported)
    }

    fn get_begin(&self) -> KvResult<Option<(Vec<u8>, Vec<u8>)>> {
        Err(KvError::NotSupported)
    }
    fn upper_bound(&self, _key: &[u8]) -> KvResult<Option<(Vec<u8>, Vec<u8>)>> {
        Err(KvError::NotSupported)
    }
    fn lower_bound(&self, _key: &[u8]) -> KvResult<Option<(Vec<u8>, Vec<u8>)>> {
        Err(KvError::NotSupported)
    }
    fn get_next(&self, _key: &[u8]) -> KvResult<Option<(Vec<u8>, Vec<u8>)>> {
        Err(KvError::NotSupported)
    }
    fn get_prev(&self, _key: &[u8]) -> KvResult<Option<(Vec<u8>, Vec<u8>)>> {
        Err(KvError::NotSupported)
    }

    fn exists(&self, key: &[u8]) -> KvResult<bool>;
    fn get(&self, key: &[u8], callback: ValueCallback<'_>) -> KvResult<()>;
    fn put(&mut self, key: &[u8], value: &[u8]) -> KvResult<()>;
    fn remove(&mut self, key: &[u8]) -> KvResult<()>;

    fn defrag(&mut self, _start_percent: f64, _amount_percent: f64) -> KvResult<()> {
        Err(KvError::NotSupported)
    }

    fn analyze(&self) -> KvResult<TreeAnalysis> {
        Err(KvError::NotSupported)
    }
}

impl std::fmt::Debug for dyn Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").field("name", &self.name()).finish()
    }
}

/// Resolves an engine by name.
pub fn open_engine(name: &str, config: &Config) -> KvResult<Box<dyn Engine>> {
    match name {
        TREE_ENGINE => {
            let path = config.path()?;
            let size = config.size()?;
            let force_create = config.force_create()?;
            let tree =
                KvTree::open(path, size, force_create).map_err(error_from_report)?;
            Ok(Box::new(tree))
        }
        BLACKHOLE_ENGINE => Ok(Box::new(Blackhole)),
        other => Err(KvError::WrongEngineName(format!(
            "{other} (available engines: {AVAILABLE_ENGINES})"
        ))),
    }
}

impl Engine for KvTree {
    fn name(&self) -> &'static str {
        TREE_ENGINE
    }

    fn count_all(&self) -> KvResult<usize> {
        self.count_in(Bound::Unbounded, Bound::Unbounded)
            .map_err(error_from_report)
    }

    fn count_above(&self, key: &[u8]) -> KvResult<usize> {
        self.count_in(Bound::Excluded(key), Bound::Unbounded)
            .map_err(error_from_report)
    }

    fn count_equal_above(&self, key: &[u8]) -> KvResult<usize> {
        self.count_in(Bound::Included(key), Bound::Unbounded)
            .map_err(error_from_report)
    }

    fn count_below(&self, key: &[u8]) -> KvResult<usize> {
        self.count_in(Bound::Unbounded, Bound::Excluded(key))
            .map_err(error_from_report)
    }

    fn count_equal_below(&self, key: &[u8]) -> KvResult<usize> {
        self.count_in(Bound::Unbounded, Bound::Included(key))
            .map_err(error_from_report)
    }

    fn count_between(&self, key1: &[u8], key2: &[u8]) -> KvResult<usize> {
        self.count_in(Bound::Excluded(key1), Bound::Excluded(key2))
            .map_err(error_from_report)
    }

    fn get_all(&self, callback: ScanCallback<'_>) -> KvResult<()> {
        scan_to_status(self, Bound::Unbounded, Bound::Unbounded, callback)
    }

    fn get_above(&self, key: &[u8], callback: ScanCallback<'_>) -> KvResult<()> {
        scan_to_status(self, Bound::Excluded(key), Bound::Unbounded, callback)
    }

    fn get_equal_above(&self, key: &[u8], callback: ScanCallback<'_>) -> KvResult<()> {
        scan_to_status(self, Bound::Included(key), Bound::Unbounded, callback)
    }

    fn get_below(&self, key: &[u8], callback: ScanCallback<'_>) -> KvResult<()> {
        scan_to_status(self, Bound::Unbounded, Bound::Excluded(key), callback)
    }

    fn get_equal_below(&self, key: &[u8], callback: ScanCallback<'_>) -> KvResult<()> {
        scan_to_status(self, Bound::Unbounded, Bound::Included(key), callback)
    }

    fn get_between(&self, key1: &[u8], key2: &[u8], callback: ScanCallback<'_>) -> KvResult<()> {
        scan_to_status(self, Bound::Excluded(key1), Bound::Excluded(key2), callback)
    }

    fn get_begin(&self) -> KvResult<Option<(Vec<u8>, Vec<u8>)>> {
        KvTree::get_begin(self).map_err(error_from_report)
    }

    fn upper_bound(&self, key: &[u8]) -> KvResult<Option<(Vec<u8>, Vec<u8>)>> {
        KvTree::upper_bound(self, key).map_err(error_from_report)
    }

    fn lower_bound(&self, key: &[u8]) -> KvResult<Option<(Vec<u8>, Vec<u8>)>> {
        KvTree::lower_bound(self, key).map_err(error_from_report)
    }

    fn get_next(&self, key: &[u8]) -> KvResult<Option<(Vec<u8>, Vec<u8>)>> {
        KvTree::get_next(self, key).map_err(error_from_report)
    }

    fn get_prev(&self, key: &[u8]) -> KvResult<Option<(Vec<u8>, Vec<u8>)>> {
        KvTree::get_prev(self, key).map_err(error_from_report)
    }

    fn exists(&self, key: &[u8]) -> KvResult<bool> {
        Ok(KvTree::exists(self, key))
    }

    fn get(&self, key: &[u8], callback: ValueCallback<'_>) -> KvResult<()> {
        match KvTree::get(self, key).map_err(error_from_report)? {
            Some(value) => {
                callback(value);
                Ok(())
            }
            None => Err(KvError::NotFound),
        }
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> KvResult<()> {
        KvTree::put(self, key, value).map_err(error_from_report)
    }

    fn remove(&mut self, key: &[u8]) -> KvResult<()> {
        KvTree::remove(self, key).map_err(error_from_report)
    }

    fn defrag(&mut self, start_percent: f64, amount_percent: f64) -> KvResult<()> {
        if !(0.0..100.0).contains(&start_percent) {
            return Err(KvError::InvalidArgument(format!(
                "defrag start_percent {start_percent} outside [0, 100)"
            )));
        }
        if !(0.0..=100.0).contains(&amount_percent) || amount_percent == 0.0 {
            return Err(KvError::InvalidArgument(format!(
                "defrag amount_percent {amount_percent} outside (0, 100]"
            )));
        }
        // Relocation hint only: freed buffers are already reused first-fit,
        // so there is nothing profitable to move. Data is never touched.
        Ok(())
    }

    fn analyze(&self) -> KvResult<TreeAnalysis> {
        KvTree::analyze(self).map_err(error_from_report)
    }
}

fn scan_to_status(
    tree: &KvTree,
    lo: Bound<&[u8]>,
    hi: Bound<&[u8]>,
    callback: ScanCallback<'_>,
) -> KvResult<()> {
    match tree.scan(lo, hi, callback).map_err(error_from_report)? {
        ScanOutcome::Completed => Ok(()),
        ScanOutcome::Stopped => Err(KvError::StoppedByCallback),
    }
}

/// Accepts everything, remembers nothing. Useful for exercising boundary
/// plumbing without touching storage.
pub struct Blackhole;

impl Engine for Blackhole {
    fn name(&self) -> &'static str {
        BLACKHOLE_ENGINE
    }

    fn count_all(&self) -> KvResult<usize> {
        Ok(0)
    }

    fn get_all(&self, _callback: ScanCallback<'_>) -> KvResult<()> {
        Ok(())
    }

    fn exists(&self, _key: &[u8]) -> KvResult<bool> {
        Ok(false)
    }

    fn get(&self, _key: &[u8], _callback: ValueCallback<'_>) -> KvResult<()> {
        Err(KvError::NotFound)
    }

    fn put(&mut self, _key: &[u8], _value: &[u8]) -> KvResult<()> {
        Ok(())
    }

    fn remove(&mut self, _key: &[u8]) -> KvResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::Status;
    use tempfile::tempdir;

    #[test]
    fn unknown_engine_name_is_rejected() {
        let config = Config::new();
        let err = open_engine("btree9000", &config).unwrap_err();
        assert_eq!(err.status(), Status::WrongEngineName);
        assert!(err.to_string().contains("btree9000"));
    }

    #[test]
    fn tree_engine_requires_a_path() {
        let config = Config::new();
        let err = open_engine(TREE_ENGINE, &config).unwrap_err();
        assert_eq!(err.status(), Status::InvalidArgument);
    }

    #[test]
    fn blackhole_accepts_and_forgets() {
        let config = Config::new();
        let mut engine = open_engine(BLACKHOLE_ENGINE, &config).unwrap();

        engine.put(b"k", b"v").unwrap();
        assert_eq!(engine.exists(b"k").unwrap(), false);
        assert_eq!(engine.count_all().unwrap(), 0);
        assert_eq!(
            engine.get(b"k", &mut |_v| {}).unwrap_err().status(),
            Status::NotFound
        );
    }

    #[test]
    fn blackhole_reports_not_supported_for_ordered_queries() {
        let engine = Blackhole;
        assert_eq!(
            engine.get_begin().unwrap_err().status(),
            Status::NotSupported
        );
        assert_eq!(
            engine.count_above(b"k").unwrap_err().status(),
            Status::NotSupported
        );
        assert_eq!(
            engine.analyze().unwrap_err().status(),
            Status::NotSupported
        );
    }

    #[test]
    fn tree_engine_end_to_end_through_trait() {
        let dir = tempdir().unwrap();
        let mut config = Config::new();
        config.put_string("path", dir.path().join("kv.pool").to_str().unwrap());

        let mut engine = open_engine(TREE_ENGINE, &config).unwrap();
        engine.put(b"alpha", b"1").unwrap();
        engine.put(b"bravo", b"2").unwrap();

        let mut value = Vec::new();
        engine.get(b"alpha", &mut |v| value = v.to_vec()).unwrap();
        assert_eq!(value, b"1");

        assert_eq!(engine.count_all().unwrap(), 2);
        assert_eq!(engine.count_above(b"alpha").unwrap(), 1);

        let (k, _) = engine.get_begin().unwrap().unwrap();
        assert_eq!(k, b"alpha");

        engine.remove(b"alpha").unwrap();
        assert_eq!(engine.exists(b"alpha").unwrap(), false);
    }

    #[test]
    fn defrag_validates_percentages() {
        let dir = tempdir().unwrap();
        let mut config = Config::new();
        config.put_string("path", dir.path().join("kv.pool").to_str().unwrap());
        let mut engine = open_engine(TREE_ENGINE, &config).unwrap();

        assert_eq!(
            engine.defrag(-1.0, 50.0).unwrap_err().status(),
            Status::InvalidArgument
        );
        assert_eq!(
            engine.defrag(0.0, 0.0).unwrap_err().status(),
            Status::InvalidArgument
        );
        assert_eq!(
            engine.defrag(100.0, 10.0).unwrap_err().status(),
            Status::InvalidArgument
        );
        engine.defrag(0.0, 100.0).unwrap();
        engine.defrag(25.0, 10.0).unwrap();
    }
}
