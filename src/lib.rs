//! # nvkv - Persistent Ordered Key-Value Engine
//!
//! nvkv is an embedded key-value store for byte-addressable persistent
//! memory: a single memory-mapped pool file carries crash-durable B+-tree
//! leaves, while the ordering index above them is volatile and rebuilt on
//! every open. This Rust implementation prioritizes:
//!
//! - **Zero-copy reads**: values are handed out as slices into the mapped
//!   pool, no intermediate buffers
//! - **Slot-level crash atomicity**: every persistent mutation runs in an
//!   undo-logged pool transaction
//! - **Cheap recovery**: no inner-node format on disk; open sorts the leaf
//!   chain by maximum key and replays the split-promotion step
//!
//! ## Quick Start
//!
//! ```ignore
//! use nvkv::{Config, Db};
//!
//! let mut config = Config::new();
//! config.put_string("path", "/tmp/example.pool");
//!
//! let db = Db::open("nvtree", &config)?;
//! db.put(b"key1", b"value1")?;
//! let value = db.get_value(b"key1")?;
//! db.get_all(|key, value| { println!("{key:?} = {value:?}"); 0 })?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────┐
//! │        Public API (Db, Status)        │
//! ├───────────────────────────────────────┤
//! │   Engine trait + dispatch (by name)   │
//! ├───────────────────────────────────────┤
//! │  TreeEngine: search/split/scan/nav    │
//! ├───────────────────┬───────────────────┤
//! │ Volatile index    │ Persistent leaves │
//! │ (arena, rebuilt)  │ (48-slot chain)   │
//! ├───────────────────┴───────────────────┤
//! │  Pool: mmap + undo log + allocator    │
//! └───────────────────────────────────────┘
//! ```
//!
//! ## Durability Model
//!
//! Committed operations are durable before they return: slot writes,
//! buffer allocations and chain splices execute inside one pool
//! transaction whose undo log is flushed before data is touched. A crash
//! at any point leaves the file in the pre- or post-operation state; the
//! next open rolls back interrupted transactions and rebuilds the
//! volatile index from the leaf chain.
//!
//! ## Concurrency
//!
//! Single writer, shared readers, enforced by one reader-writer guard at
//! the database boundary. `Db` is `Send + Sync`.
//!
//! ## Module Overview
//!
//! - [`pool`]: memory-mapped pool, undo-log transactions, allocator
//! - [`tree`]: hybrid B+-tree engine (persistent leaves, volatile index)
//! - [`engine`]: engine trait, name dispatch, blackhole engine
//! - [`db`]: public boundary, status conversion, errormsg
//! - [`config`]: typed engine configuration
//! - [`status`]: closed status-code set and error types

pub mod config;
pub mod db;
pub mod engine;
pub mod pool;
pub mod status;
pub mod tree;

pub use config::Config;
pub use db::{errormsg, Db};
pub use engine::{open_engine, Engine, BLACKHOLE_ENGINE, TREE_ENGINE};
pub use status::{KvError, KvResult, Status};
pub use tree::{KvTree, TreeAnalysis};
