//! # Hybrid B+-Tree Engine
//!
//! This module implements the ordered key-value engine: persistent leaves
//! in the pool, a volatile index above them, rebuilt from the leaf chain on
//! every open.
//!
//! ## Architecture Overview
//!
//! ```text
//!            TreeTop (volatile)
//!                 │
//!         [ InnerNode  k1 k2 ]          volatile, rebuilt on open
//!          /        |       \
//!   [LeafNode]  [LeafNode]  [LeafNode]  volatile shadows: hashes + keys
//!       │           │           │
//!   ┌───▼───────────▼───────────▼────┐
//!   │ PLeaf ──► PLeaf ──► PLeaf ──►0 │  persistent chain (unsorted)
//!   └──────────────────────────────--┘
//! ```
//!
//! The persistent side is a singly linked chain of fixed-capacity leaves
//! anchored at the pool root; insertion order, not key order. The volatile
//! side gives the chain its ordering: leaf nodes cache per-slot hashes and
//! keys, inner nodes route descents by separator keys with a `<=`
//! predicate (equal keys go left).
//!
//! ## Durability Split
//!
//! Only leaf contents are durable. Splits rearrange persistent slots inside
//! one pool transaction, but the separator bookkeeping above the leaves is
//! volatile and reconstructed by recovery: walk the chain, sort leaves by
//! their maximum key, and replay the split-promotion step pairwise. That
//! makes crash handling independent of index shape — there is no inner-node
//! format to keep consistent on disk.
//!
//! ## Module Organization
//!
//! - `hash`: Pearson hash (slot-lookup acceleration)
//! - `leaf`: persistent slot/leaf records and their transactional mutators
//! - `node`: volatile arena — leaf shadows and inner routing nodes
//! - `tree`: search, insert, split, remove, scans, recovery, stats

mod hash;
mod leaf;
mod node;
mod tree;

pub use hash::pearson_hash;
pub use leaf::{PLeaf, PSlot, LEAF_SLOTS, PLEAF_SIZE, PSLOT_SIZE};
pub use node::{InnerNode, LeafNode, Node, NodeArena, NodeId, INNER_KEYS};
pub use tree::{KvTree, ScanOutcome, TreeAnalysis, LEAF_SPLIT_MIDPOINT};
