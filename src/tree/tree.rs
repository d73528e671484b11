//! # Tree Operations
//!
//! Search, insert, split, remove, range scans and recovery for the hybrid
//! tree. This is the coordination point between the volatile arena and the
//! persistent pool: every durable mutation runs inside one pool
//! transaction, and the volatile mirrors are only updated after that
//! transaction commits, so an aborted operation leaves both sides exactly
//! as they were.
//!
//! ## Search
//!
//! Descents route with `key <= separator` (equal keys go left); within a
//! leaf, lookup scans the hash mirror from the highest slot down and only
//! compares full keys on a hash hit.
//!
//! ## Split Protocol
//!
//! A full leaf splits around the median of its 48 cached keys plus the
//! incoming one. Slots whose key sorts above the median swap — same slot
//! index — into the new persistent leaf inside the transaction, which
//! keeps the slot↔mirror correspondence intact on both leaves. The
//! separator insertion above is purely volatile and may cascade into inner
//! splits at the fixed midpoint.
//!
//! ## Recovery
//!
//! Open rolls back any interrupted transaction (pool layer), then walks
//! the leaf chain, rebuilds one shadow node per non-empty leaf, sorts the
//! shadows by maximum key and rejoins neighbors through the same
//! separator-promotion routine the split path uses. All-empty leaves are
//! parked in the preallocated pool for reuse.

use std::ops::Bound;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use eyre::Result;
use smallvec::{smallvec, SmallVec};
use tracing::{debug, info};

use super::hash::pearson_hash;
use super::leaf::{
    leaf_alloc_at_head, slot_clear, slot_key, slot_set, slot_swap, slot_value, PLeaf, LEAF_SLOTS,
};
use super::node::{InnerNode, LeafNode, Node, NodeArena, NodeId, INNER_KEYS};
use crate::pool::{PAddr, Pool};

/// Median position in the 49-key sequence a leaf split sorts.
pub const LEAF_SPLIT_MIDPOINT: usize = (LEAF_SLOTS + 1) / 2;

/// Separator keys kept in the left node after an inner split; the key at
/// this position is promoted.
const INNER_SPLIT_MIDPOINT: usize = (INNER_KEYS + 1) / 2;

/// Statistics gathered by walking the persistent leaf chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeAnalysis {
    pub path: PathBuf,
    pub size: u64,
    pub leaf_total: usize,
    pub leaf_empty: usize,
    pub leaf_prealloc: usize,
}

enum Stop {
    Callback,
    PastUpperBound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    Completed,
    Stopped,
}

pub struct KvTree {
    pool: Pool,
    arena: NodeArena,
    top: Option<NodeId>,
    prealloc: Vec<PAddr>,
}

impl KvTree {
    /// Opens or creates the pool at `path` and rebuilds the volatile index.
    pub fn open<P: AsRef<Path>>(path: P, size: u64, force_create: bool) -> Result<Self> {
        let pool = Pool::open_or_create(path, size, force_create)?;
        let mut tree = Self {
            pool,
            arena: NodeArena::new(),
            top: None,
            prealloc: Vec::new(),
        };
        tree.recover()?;
        Ok(tree)
    }

    // ------------------------------------------------------------------
    // point operations
    // ------------------------------------------------------------------

    pub fn get(&self, key: &[u8]) -> Result<Option<&[u8]>> {
        let Some((id, slot_idx)) = self.find_slot(key) else {
            return Ok(None);
        };
        let leaf = self.arena.leaf(id)?;
        let pleaf = self.pool.object::<PLeaf>(leaf.leaf)?;
        Ok(Some(slot_value(&self.pool, pleaf.slot(slot_idx))?))
    }

    pub fn exists(&self, key: &[u8]) -> bool {
        self.find_slot(key).is_some()
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        debug!(key_len = key.len(), value_len = value.len(), "put");
        let hash = pearson_hash(key);
        match self.leaf_search(key) {
            None => self.put_into_empty_tree(hash, key, value),
            Some(id) => {
                if self.leaf_fill_slot_for_key(id, hash, key, value)? {
                    Ok(())
                } else {
                    self.leaf_split_full(id, hash, key, value)
                }
            }
        }
    }

    /// Removes `key`; removing an absent key is a no-op.
    pub fn remove(&mut self, key: &[u8]) -> Result<()> {
        let Some((id, slot_idx)) = self.find_slot(key) else {
            debug!(key_len = key.len(), "remove of absent key");
            return Ok(());
        };
        let leaf_addr = self.arena.leaf(id)?.leaf;
        self.pool
            .transaction(|tx| slot_clear(tx, leaf_addr, slot_idx))?;

        let leaf = self.arena.leaf_mut(id)?;
        leaf.hashes[slot_idx] = 0;
        leaf.keys[slot_idx] = None;
        Ok(())
    }

    // ------------------------------------------------------------------
    // search
    // ------------------------------------------------------------------

    fn leaf_search(&self, key: &[u8]) -> Option<NodeId> {
        let mut id = self.top?;
        loop {
            match self.arena.get(id) {
                Node::Leaf(_) => return Some(id),
                Node::Inner(inner) => {
                    // equal keys route left
                    let mut chosen = inner.children[inner.keycount()];
                    for (idx, separator) in inner.keys.iter().enumerate() {
                        if key <= &separator[..] {
                            chosen = inner.children[idx];
                            break;
                        }
                    }
                    id = chosen;
                }
            }
        }
    }

    fn find_slot(&self, key: &[u8]) -> Option<(NodeId, usize)> {
        let id = self.leaf_search(key)?;
        let Node::Leaf(leaf) = self.arena.get(id) else {
            return None;
        };
        let hash = pearson_hash(key);
        for slot in (0..LEAF_SLOTS).rev() {
            if leaf.hashes[slot] == hash && leaf.keys[slot].as_deref() == Some(key) {
                return Some((id, slot));
            }
        }
        None
    }

    // ------------------------------------------------------------------
    // insert paths
    // ------------------------------------------------------------------

    fn put_into_empty_tree(&mut self, hash: u8, key: &[u8], value: &[u8]) -> Result<()> {
        let reused = self.prealloc.pop();
        let result = self.pool.transaction(|tx| {
            let leaf = match reused {
                Some(addr) => addr,
                None => leaf_alloc_at_head(tx)?,
            };
            slot_set(tx, leaf, 0, hash, key, value)?;
            Ok(leaf)
        });
        let leaf_addr = match result {
            Ok(addr) => addr,
            Err(err) => {
                if let Some(addr) = reused {
                    self.prealloc.push(addr);
                }
                return Err(err);
            }
        };

        let mut node = LeafNode::new(leaf_addr);
        node.hashes[0] = hash;
        node.keys[0] = Some(key.into());
        let id = self.arena.insert(Node::Leaf(node));
        self.top = Some(id);
        Ok(())
    }

    /// Single scan for the key's own slot or the last empty one; the key
    /// match wins. Returns false when the leaf is full of other keys.
    fn leaf_fill_slot_for_key(
        &mut self,
        id: NodeId,
        hash: u8,
        key: &[u8],
        value: &[u8],
    ) -> Result<bool> {
        let (leaf_addr, slot_idx, was_empty) = {
            let leaf = self.arena.leaf(id)?;
            let mut last_empty = None;
            let mut key_match = None;
            for slot in (0..LEAF_SLOTS).rev() {
                let slot_hash = leaf.hashes[slot];
                if slot_hash == 0 {
                    last_empty = Some(slot);
                } else if slot_hash == hash && leaf.keys[slot].as_deref() == Some(key) {
                    key_match = Some(slot);
                    break; // keys are unique within the tree
                }
            }
            match key_match.or(last_empty) {
                None => return Ok(false),
                Some(slot) => (leaf.leaf, slot, leaf.hashes[slot] == 0),
            }
        };

        self.pool
            .transaction(|tx| slot_set(tx, leaf_addr, slot_idx, hash, key, value))?;

        if was_empty {
            let leaf = self.arena.leaf_mut(id)?;
            leaf.hashes[slot_idx] = hash;
            leaf.keys[slot_idx] = Some(key.into());
        }
        Ok(true)
    }

    fn leaf_split_full(&mut self, id: NodeId, hash: u8, key: &[u8], value: &[u8]) -> Result<()> {
        let (leaf_addr, parent, split_key, moved) = {
            let leaf = self.arena.leaf(id)?;
            let mut all: Vec<&[u8]> = Vec::with_capacity(LEAF_SLOTS + 1);
            for slot in 0..LEAF_SLOTS {
                let cached = leaf.keys[slot]
                    .as_deref()
                    .ok_or_else(|| eyre::eyre!("split of a leaf that is not full"))?;
                all.push(cached);
            }
            all.push(key);
            all.sort_unstable();
            let split_key: Box<[u8]> = all[LEAF_SPLIT_MIDPOINT].into();

            // slots whose key sorts strictly above the median move right
            let moved: Vec<usize> = (0..LEAF_SLOTS)
                .filter(|&slot| {
                    leaf.keys[slot]
                        .as_deref()
                        .is_some_and(|k| k > &split_key[..])
                })
                .collect();
            (leaf.leaf, leaf.parent, split_key, moved)
        };

        debug!(moved = moved.len(), "splitting full leaf");

        let new_goes_right = key > &split_key[..];
        // After the swaps the right leaf occupies exactly `moved`, the left
        // leaf everything else; the insert lands in the first empty slot
        // found scanning from the top.
        let fill_slot = if new_goes_right {
            (0..LEAF_SLOTS).rev().find(|slot| !moved.contains(slot))
        } else {
            moved.last().copied()
        }
        .ok_or_else(|| eyre::eyre!("no empty slot in split target"))?;

        let reused = self.prealloc.pop();
        let tx_result = self.pool.transaction(|tx| {
            let new_leaf = match reused {
                Some(addr) => addr,
                None => leaf_alloc_at_head(tx)?,
            };
            for &slot in &moved {
                slot_swap(tx, leaf_addr, new_leaf, slot)?;
            }
            let target = if new_goes_right { new_leaf } else { leaf_addr };
            slot_set(tx, target, fill_slot, hash, key, value)?;
            Ok(new_leaf)
        });
        let new_leaf_addr = match tx_result {
            Ok(addr) => addr,
            Err(err) => {
                if let Some(addr) = reused {
                    self.prealloc.push(addr);
                }
                return Err(err);
            }
        };

        // persistent state committed; mirror the move on the volatile side
        let mut new_node = LeafNode::new(new_leaf_addr);
        new_node.parent = parent;
        {
            let left = self.arena.leaf_mut(id)?;
            for &slot in &moved {
                new_node.hashes[slot] = left.hashes[slot];
                new_node.keys[slot] = left.keys[slot].take();
                left.hashes[slot] = 0;
            }
            if !new_goes_right {
                left.hashes[fill_slot] = hash;
                left.keys[fill_slot] = Some(key.into());
            }
        }
        if new_goes_right {
            new_node.hashes[fill_slot] = hash;
            new_node.keys[fill_slot] = Some(key.into());
        }
        let new_id = self.arena.insert(Node::Leaf(new_node));

        self.inner_update_after_split(id, new_id, &split_key)
    }

    /// Promotes `split_key` into the parent of `node`, splitting inner
    /// nodes upward as needed. Purely volatile. The caller has already set
    /// `new_node`'s parent to `node`'s parent.
    fn inner_update_after_split(
        &mut self,
        node: NodeId,
        new_node: NodeId,
        split_key: &[u8],
    ) -> Result<()> {
        let Some(parent_id) = self.arena.get(node).parent() else {
            let top = InnerNode {
                keys: smallvec![split_key.into()],
                children: smallvec![node, new_node],
                parent: None,
            };
            let top_id = self.arena.insert(Node::Inner(top));
            self.arena.get_mut(node).set_parent(Some(top_id));
            self.arena.get_mut(new_node).set_parent(Some(top_id));
            self.top = Some(top_id);
            return Ok(());
        };

        let keycount = {
            let parent = self.arena.inner_mut(parent_id)?;
            let idx = parent
                .keys
                .iter()
                .position(|k| &k[..] > split_key)
                .unwrap_or(parent.keycount());
            parent.keys.insert(idx, split_key.into());
            parent.children.insert(idx + 1, new_node);
            parent.keycount()
        };
        if keycount <= INNER_KEYS {
            return Ok(());
        }

        // overflowed: split the parent at the fixed midpoint
        let (upper_keys, upper_children, promote, grandparent) = {
            let parent = self.arena.inner_mut(parent_id)?;
            let upper_keys: SmallVec<[Box<[u8]>; INNER_KEYS + 1]> =
                parent.keys.drain(INNER_SPLIT_MIDPOINT + 1..).collect();
            let upper_children: SmallVec<[NodeId; INNER_KEYS + 2]> =
                parent.children.drain(INNER_SPLIT_MIDPOINT + 1..).collect();
            let promote = parent
                .keys
                .pop()
                .ok_or_else(|| eyre::eyre!("inner split underflow"))?;
            (upper_keys, upper_children, promote, parent.parent)
        };

        let moved_children: SmallVec<[NodeId; INNER_KEYS + 2]> = upper_children.clone();
        let new_inner_id = self.arena.insert(Node::Inner(InnerNode {
            keys: upper_keys,
            children: upper_children,
            parent: grandparent,
        }));
        for child in moved_children {
            self.arena.get_mut(child).set_parent(Some(new_inner_id));
        }

        self.inner_update_after_split(parent_id, new_inner_id, &promote)
    }

    // ------------------------------------------------------------------
    // ordered scans
    // ------------------------------------------------------------------

    /// In-order traversal of `[lo, hi]`, invoking `visit` per pair. A
    /// nonzero callback return stops the scan.
    pub fn scan(
        &self,
        lo: Bound<&[u8]>,
        hi: Bound<&[u8]>,
        visit: &mut dyn FnMut(&[u8], &[u8]) -> i32,
    ) -> Result<ScanOutcome> {
        let Some(top) = self.top else {
            return Ok(ScanOutcome::Completed);
        };
        match self.scan_node(top, lo, hi, visit)? {
            ControlFlow::Continue(()) => Ok(ScanOutcome::Completed),
            ControlFlow::Break(Stop::PastUpperBound) => Ok(ScanOutcome::Completed),
            ControlFlow::Break(Stop::Callback) => Ok(ScanOutcome::Stopped),
        }
    }

    fn scan_node(
        &self,
        id: NodeId,
        lo: Bound<&[u8]>,
        hi: Bound<&[u8]>,
        visit: &mut dyn FnMut(&[u8], &[u8]) -> i32,
    ) -> Result<ControlFlow<Stop>> {
        match self.arena.get(id) {
            Node::Inner(inner) => {
                for (idx, child) in inner.children.iter().enumerate() {
                    // children[idx] only reaches keys <= keys[idx]; skip
                    // subtrees that end below the lower bound
                    if idx < inner.keycount() && below_lower(&inner.keys[idx], lo) {
                        continue;
                    }
                    if let ControlFlow::Break(stop) = self.scan_node(*child, lo, hi, visit)? {
                        return Ok(ControlFlow::Break(stop));
                    }
                }
                Ok(ControlFlow::Continue(()))
            }
            Node::Leaf(leaf) => {
                let mut entries: Vec<(usize, &[u8])> = leaf
                    .occupied()
                    .filter_map(|slot| leaf.keys[slot].as_deref().map(|k| (slot, k)))
                    .collect();
                entries.sort_unstable_by(|a, b| a.1.cmp(b.1));

                let pleaf = self.pool.object::<PLeaf>(leaf.leaf)?;
                for (slot_idx, key) in entries {
                    if below_lower(key, lo) {
                        continue;
                    }
                    if above_upper(key, hi) {
                        return Ok(ControlFlow::Break(Stop::PastUpperBound));
                    }
                    let value = slot_value(&self.pool, pleaf.slot(slot_idx))?;
                    if visit(key, value) != 0 {
                        return Ok(ControlFlow::Break(Stop::Callback));
                    }
                }
                Ok(ControlFlow::Continue(()))
            }
        }
    }

    pub fn count_in(&self, lo: Bound<&[u8]>, hi: Bound<&[u8]>) -> Result<usize> {
        let mut count = 0;
        self.scan(lo, hi, &mut |_k, _v| {
            count += 1;
            0
        })?;
        Ok(count)
    }

    fn first_in(&self, lo: Bound<&[u8]>, hi: Bound<&[u8]>) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let mut found = None;
        self.scan(lo, hi, &mut |k, v| {
            found = Some((k.to_vec(), v.to_vec()));
            1
        })?;
        Ok(found)
    }

    fn last_in(&self, lo: Bound<&[u8]>, hi: Bound<&[u8]>) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let mut found = None;
        self.scan(lo, hi, &mut |k, v| {
            found = Some((k.to_vec(), v.to_vec()));
            0
        })?;
        Ok(found)
    }

    /// Least key in the store.
    pub fn get_begin(&self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        self.first_in(Bound::Unbounded, Bound::Unbounded)
    }

    /// Least key strictly greater than `key`.
    pub fn upper_bound(&self, key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        self.first_in(Bound::Excluded(key), Bound::Unbounded)
    }

    /// Least key greater than or equal to `key`.
    pub fn lower_bound(&self, key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        self.first_in(Bound::Included(key), Bound::Unbounded)
    }

    /// Nearest successor of `key`, present or not.
    pub fn get_next(&self, key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        self.upper_bound(key)
    }

    /// Nearest predecessor of `key`, present or not.
    pub fn get_prev(&self, key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        self.last_in(Bound::Unbounded, Bound::Excluded(key))
    }

    // ------------------------------------------------------------------
    // lifecycle
    // ------------------------------------------------------------------

    fn recover(&mut self) -> Result<()> {
        let mut recovered: Vec<(NodeId, Box<[u8]>)> = Vec::new();

        let mut addr = self.pool.root_head()?;
        while !addr.is_null() {
            let (next, shadow) = {
                let pleaf = self.pool.object::<PLeaf>(addr)?;
                let mut node = LeafNode::new(addr);
                let mut max_key: Option<Box<[u8]>> = None;
                for slot_idx in 0..LEAF_SLOTS {
                    let slot = pleaf.slot(slot_idx);
                    node.hashes[slot_idx] = slot.hash();
                    if slot.is_empty() {
                        continue;
                    }
                    let key = slot_key(&self.pool, slot)?;
                    if max_key.as_deref().map_or(true, |current| current < key) {
                        max_key = Some(key.into());
                    }
                    node.keys[slot_idx] = Some(key.into());
                }
                (pleaf.next(), max_key.map(|mk| (node, mk)))
            };

            match shadow {
                None => self.prealloc.push(addr),
                Some((node, max_key)) => {
                    let id = self.arena.insert(Node::Leaf(node));
                    recovered.push((id, max_key));
                }
            }
            addr = next;
        }

        // stable sort: equal max keys keep chain order, which the `<=`
        // routing predicate tolerates
        recovered.sort_by(|a, b| a.1.cmp(&b.1));

        self.top = recovered.first().map(|(id, _)| *id);
        for i in 0..recovered.len().saturating_sub(1) {
            let current = recovered[i].0;
            let next_id = recovered[i + 1].0;
            let split_key = recovered[i].1.clone();
            let parent = self.arena.get(current).parent();
            self.arena.get_mut(next_id).set_parent(parent);
            self.inner_update_after_split(current, next_id, &split_key)?;
        }

        info!(
            leaves = recovered.len(),
            prealloc = self.prealloc.len(),
            path = %self.pool.path().display(),
            "recovered index"
        );
        Ok(())
    }

    /// Walks the persistent leaf chain for statistics.
    pub fn analyze(&self) -> Result<TreeAnalysis> {
        let mut leaf_total = 0;
        let mut leaf_empty = 0;
        let mut addr = self.pool.root_head()?;
        while !addr.is_null() {
            let pleaf = self.pool.object::<PLeaf>(addr)?;
            leaf_total += 1;
            if pleaf.is_all_empty() {
                leaf_empty += 1;
            }
            addr = pleaf.next();
        }
        Ok(TreeAnalysis {
            path: self.pool.path().to_path_buf(),
            size: self.pool.size(),
            leaf_total,
            leaf_empty,
            leaf_prealloc: self.prealloc.len(),
        })
    }

    pub fn path(&self) -> &Path {
        self.pool.path()
    }

    pub fn pool_size(&self) -> u64 {
        self.pool.size()
    }
}

impl Drop for KvTree {
    fn drop(&mut self) {
        // committed state is already durable; this only helps the OS along
        let _ = self.pool.sync();
        self.arena.clear();
    }
}

fn below_lower(key: &[u8], lo: Bound<&[u8]>) -> bool {
    match lo {
        Bound::Unbounded => false,
        Bound::Included(bound) => key < bound,
        Bound::Excluded(bound) => key <= bound,
    }
}

fn above_upper(key: &[u8], hi: Bound<&[u8]>) -> bool {
    match hi {
        Bound::Unbounded => false,
        Bound::Included(bound) => key > bound,
        Bound::Excluded(bound) => key >= bound,
    }
}
