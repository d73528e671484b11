//! # Database Boundary
//!
//! `Db` is the public handle: it owns one engine behind a reader-writer
//! guard, converts every failure to the closed status-code set, and keeps
//! the thread-local last-error message that [`errormsg`] reads.
//!
//! ## Concurrency
//!
//! One `parking_lot::RwLock` around the engine realizes the scheduling
//! model: reads share the lock, writes exclude readers and each other, and
//! no operation suspends while holding it. `Db` is `Send + Sync`; clone-
//! free sharing via `Arc<Db>` is the expected pattern for multi-threaded
//! embedders.
//!
//! ## Callback and Copy Forms
//!
//! Every scan exists in two shapes:
//!
//! - callback form (`get_all`, `get_above`, …) — borrowed key/value slices
//!   handed to a closure, zero copies, nonzero return stops the scan;
//! - copy form (`get_all_vec`, …, `get_value`, `get_copy`) — owned data
//!   for callers that outlive the lock.
//!
//! The closure form also covers foreign-interop uses: a bare function plus
//! an opaque argument is just a closure capturing that pair.

use std::cell::RefCell;

use parking_lot::RwLock;
use tracing::debug;

use crate::config::Config;
use crate::engine::{open_engine, Engine};
use crate::status::{KvError, KvResult};
use crate::tree::TreeAnalysis;

thread_local! {
    static LAST_ERRMSG: RefCell<String> = const { RefCell::new(String::new()) };
}

/// Human-readable message of the last failed operation on this thread.
pub fn errormsg() -> String {
    LAST_ERRMSG.with(|msg| msg.borrow().clone())
}

fn track<T>(result: KvResult<T>) -> KvResult<T> {
    if let Err(err) = &result {
        LAST_ERRMSG.with(|msg| *msg.borrow_mut() = err.to_string());
    }
    result
}

pub struct Db {
    engine: RwLock<Box<dyn Engine>>,
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db").finish_non_exhaustive()
    }
}

impl Db {
    /// Opens a database with the named engine; see [`crate::engine`] for
    /// recognized names and [`Config`] for options.
    pub fn open(engine_name: &str, config: &Config) -> KvResult<Self> {
        debug!(engine = engine_name, "opening database");
        let engine = track(open_engine(engine_name, config))?;
        Ok(Self {
            engine: RwLock::new(engine),
        })
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine.read().name()
    }

    // ----- point operations ------------------------------------------------

    pub fn put(&self, key: &[u8], value: &[u8]) -> KvResult<()> {
        track(self.engine.write().put(key, value))
    }

    pub fn remove(&self, key: &[u8]) -> KvResult<()> {
        track(self.engine.write().remove(key))
    }

    pub fn exists(&self, key: &[u8]) -> KvResult<bool> {
        track(self.engine.read().exists(key))
    }

    /// Callback form of get; the value slice is only valid inside `f`.
    pub fn get(&self, key: &[u8], f: impl FnMut(&[u8])) -> KvResult<()> {
        let mut f = f;
        track(self.engine.read().get(key, &mut f))
    }

    /// Copy form of get.
    pub fn get_value(&self, key: &[u8]) -> KvResult<Vec<u8>> {
        let mut value = Vec::new();
        self.get(key, |v| value = v.to_vec())?;
        Ok(value)
    }

    /// Copies the value into `buffer`, returning the value length.
    pub fn get_copy(&self, key: &[u8], buffer: &mut [u8]) -> KvResult<usize> {
        let mut copied: KvResult<usize> = Ok(0);
        let result = self.get(key, |v| {
            if v.len() <= buffer.len() {
                buffer[..v.len()].copy_from_slice(v);
                copied = Ok(v.len());
            } else {
                copied = Err(KvError::Unknown(format!(
                    "value of {} bytes exceeds buffer of {}",
                    v.len(),
                    buffer.len()
                )));
            }
        });
        result.and(track(copied))
    }

    // ----- counts ----------------------------------------------------------

    pub fn count_all(&self) -> KvResult<usize> {
        track(self.engine.read().count_all())
    }

    pub fn count_above(&self, key: &[u8]) -> KvResult<usize> {
        track(self.engine.read().count_above(key))
    }

    pub fn count_equal_above(&self, key: &[u8]) -> KvResult<usize> {
        track(self.engine.read().count_equal_above(key))
    }

    pub fn count_below(&self, key: &[u8]) -> KvResult<usize> {
        track(self.engine.read().count_below(key))
    }

    pub fn count_equal_below(&self, key: &[u8]) -> KvResult<usize> {
        track(self.engine.read().count_equal_below(key))
    }

    pub fn count_between(&self, key1: &[u8], key2: &[u8]) -> KvResult<usize> {
        track(self.engine.read().count_between(key1, key2))
    }

    // ----- range scans, callback form --------------------------------------

    pub fn get_all(&self, f: impl FnMut(&[u8], &[u8]) -> i32) -> KvResult<()> {
        let mut f = f;
        track(self.engine.read().get_all(&mut f))
    }

    pub fn get_above(&self, key: &[u8], f: impl FnMut(&[u8], &[u8]) -> i32) -> KvResult<()> {
        let mut f = f;
        track(self.engine.read().get_above(key, &mut f))
    }

    pub fn get_equal_above(&self, key: &[u8], f: impl FnMut(&[u8], &[u8]) -> i32) -> KvResult<()> {
        let mut f = f;
        track(self.engine.read().get_equal_above(key, &mut f))
    }

    pub fn get_below(&self, key: &[u8], f: impl FnMut(&[u8], &[u8]) -> i32) -> KvResult<()> {
        let mut f = f;
        track(self.engine.read().get_below(key, &mut f))
    }

    pub fn get_equal_below(&self, key: &[u8], f: impl FnMut(&[u8], &[u8]) -> i32) -> KvResult<()> {
        let mut f = f;
        track(self.engine.read().get_equal_below(key, &mut f))
    }

    pub fn get_between(
        &self,
        key1: &[u8],
        key2: &[u8],
        f: impl FnMut(&[u8], &[u8]) -> i32,
    ) -> KvResult<()> {
        let mut f = f;
        track(self.engine.read().get_between(key1, key2, &mut f))
    }

    // ----- range scans, copy form ------------------------------------------

    pub fn get_all_vec(&self) -> KvResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut pairs = Vec::new();
        self.get_all(|k, v| {
            pairs.push((k.to_vec(), v.to_vec()));
            0
        })?;
        Ok(pairs)
    }

    pub fn get_above_vec(&self, key: &[u8]) -> KvResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut pairs = Vec::new();
        self.get_above(key, |k, v| {
            pairs.push((k.to_vec(), v.to_vec()));
            0
        })?;
        Ok(pairs)
    }

    pub fn get_equal_above_vec(&self, key: &[u8]) -> KvResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut pairs = Vec::new();
        self.get_equal_above(key, |k, v| {
            pairs.push((k.to_vec(), v.to_vec()));
            0
        })?;
        Ok(pairs)
    }

    pub fn get_below_vec(&self, key: &[u8]) -> KvResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut pairs = Vec::new();
        self.get_below(key, |k, v| {
            pairs.push((k.to_vec(), v.to_vec()));
            0
        })?;
        Ok(pairs)
    }

    pub fn get_equal_below_vec(&self, key: &[u8]) -> KvResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut pairs = Vec::new();
        self.get_equal_below(key, |k, v| {
            pairs.push((k.to_vec(), v.to_vec()));
            0
        })?;
        Ok(pairs)
    }

    pub fn get_between_vec(&self, key1: &[u8], key2: &[u8]) -> KvResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut pairs = Vec::new();
        self.get_between(key1, key2, |k, v| {
            pairs.push((k.to_vec(), v.to_vec()));
            0
        })?;
        Ok(pairs)
    }

    // ----- ordered navigation ----------------------------------------------

    pub fn get_begin(&self) -> KvResult<Option<(Vec<u8>, Vec<u8>)>> {
        track(self.engine.read().get_begin())
    }

    pub fn upper_bound(&self, key: &[u8]) -> KvResult<Option<(Vec<u8>, Vec<u8>)>> {
        track(self.engine.read().upper_bound(key))
    }

    pub fn lower_bound(&self, key: &[u8]) -> KvResult<Option<(Vec<u8>, Vec<u8>)>> {
        track(self.engine.read().lower_bound(key))
    }

    pub fn get_next(&self, key: &[u8]) -> KvResult<Option<(Vec<u8>, Vec<u8>)>> {
        track(self.engine.read().get_next(key))
    }

    pub fn get_prev(&self, key: &[u8]) -> KvResult<Option<(Vec<u8>, Vec<u8>)>> {
        track(self.engine.read().get_prev(key))
    }

    // ----- maintenance -----------------------------------------------------

    pub fn defrag(&self, start_percent: f64, amount_percent: f64) -> KvResult<()> {
        track(self.engine.write().defrag(start_percent, amount_percent))
    }

    pub fn analyze(&self) -> KvResult<TreeAnalysis> {
        track(self.engine.read().analyze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TREE_ENGINE;
    use crate::status::Status;
    use tempfile::tempdir;

    fn tree_config(dir: &tempfile::TempDir) -> Config {
        let mut config = Config::new();
        config.put_string("path", dir.path().join("kv.pool").to_str().unwrap());
        config
    }

    #[test]
    fn open_failure_populates_errormsg() {
        let err = Db::open("not-an-engine", &Config::new()).unwrap_err();
        assert_eq!(err.status(), Status::WrongEngineName);
        assert!(errormsg().contains("not-an-engine"));
    }

    #[test]
    fn get_miss_populates_errormsg() {
        let dir = tempdir().unwrap();
        let db = Db::open(TREE_ENGINE, &tree_config(&dir)).unwrap();

        let err = db.get_value(b"absent").unwrap_err();
        assert_eq!(err.status(), Status::NotFound);
        assert_eq!(errormsg(), "key not found");
    }

    #[test]
    fn get_copy_respects_buffer_capacity() {
        let dir = tempdir().unwrap();
        let db = Db::open(TREE_ENGINE, &tree_config(&dir)).unwrap();
        db.put(b"k", b"0123456789").unwrap();

        let mut big = [0u8; 32];
        assert_eq!(db.get_copy(b"k", &mut big).unwrap(), 10);
        assert_eq!(&big[..10], b"0123456789");

        let mut small = [0u8; 4];
        let err = db.get_copy(b"k", &mut small).unwrap_err();
        assert_eq!(err.status(), Status::UnknownError);
    }

    #[test]
    fn copy_forms_match_callback_forms() {
        let dir = tempdir().unwrap();
        let db = Db::open(TREE_ENGINE, &tree_config(&dir)).unwrap();
        for i in 0..20 {
            db.put(format!("key{:02}", i).as_bytes(), b"v").unwrap();
        }

        let all = db.get_all_vec().unwrap();
        assert_eq!(all.len(), 20);

        let above = db.get_above_vec(b"key09").unwrap();
        assert_eq!(above.len(), 10);
        assert_eq!(above[0].0, b"key10");

        let between = db.get_between_vec(b"key04", b"key08").unwrap();
        assert_eq!(between.len(), 3);

        let below = db.get_below_vec(b"key03").unwrap();
        assert_eq!(below.len(), 3);

        assert_eq!(db.get_equal_above_vec(b"key10").unwrap().len(), 10);
        assert_eq!(db.get_equal_below_vec(b"key10").unwrap().len(), 11);
    }

    #[test]
    fn callback_stop_surfaces_stopped_by_cb() {
        let dir = tempdir().unwrap();
        let db = Db::open(TREE_ENGINE, &tree_config(&dir)).unwrap();
        for i in 0..5 {
            db.put(format!("k{}", i).as_bytes(), b"v").unwrap();
        }

        let mut seen = 0;
        let err = db
            .get_all(|_k, _v| {
                seen += 1;
                1
            })
            .unwrap_err();
        assert_eq!(err.status(), Status::StoppedByCb);
        assert_eq!(seen, 1);
    }

    #[test]
    fn concurrent_readers_share_the_lock() {
        let dir = tempdir().unwrap();
        let db = std::sync::Arc::new(Db::open(TREE_ENGINE, &tree_config(&dir)).unwrap());
        for i in 0..100 {
            db.put(format!("key{:03}", i).as_bytes(), b"v").unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let db = db.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..100 {
                    let key = format!("key{:03}", i);
                    assert!(db.exists(key.as_bytes()).unwrap());
                }
                db.count_all().unwrap()
            }));
        }
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 100);
        }
    }
}
