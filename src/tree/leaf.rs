//! # Persistent Leaves and Slots
//!
//! On-pool representation of the durable half of the tree. A leaf is a
//! fixed array of [`LEAF_SLOTS`] slots plus a link to the next leaf in the
//! unsorted persistent chain; a slot either is empty (`hash == 0`) or owns
//! one exactly-sized buffer holding its key and value.
//!
//! ## Slot Record (20 bytes)
//!
//! ```text
//! +------+---------+---------+---------+----------+
//! | hash | pad[3]  | key_len | val_len | buf PAddr|
//! | u8   |         | u32     | u32     | u64      |
//! +------+---------+---------+---------+----------+
//! ```
//!
//! ## Buffer Layout
//!
//! `key_len + val_len + 2` bytes: key, one unused separator byte, value,
//! one unused trailing byte. The buffer is allocated exactly-sized on every
//! write; overwriting a slot frees the previous buffer first (deferred to
//! commit by the transaction layer).
//!
//! ## Mutation Discipline
//!
//! Every mutating helper here takes a [`Tx`]: slot state and buffer
//! allocation must move together or not at all, and only the transaction
//! can guarantee that. Read helpers take the [`Pool`] directly.
//!
//! Slot order inside a leaf is not significant; only the multiset of
//! non-empty slots carries meaning. The same-index `slot_swap` used by the
//! leaf split relies on exactly that.

use eyre::{ensure, Result};
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::pool::{PAddr, Pool, Tx};

/// Slots per persistent leaf.
pub const LEAF_SLOTS: usize = 48;

pub const PSLOT_SIZE: usize = 20;
pub const PLEAF_SIZE: usize = PSLOT_SIZE * LEAF_SLOTS + 8;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct PSlot {
    hash: u8,
    _pad: [u8; 3],
    key_len: U32,
    val_len: U32,
    buf: U64,
}

const _: () = assert!(std::mem::size_of::<PSlot>() == PSLOT_SIZE);

impl PSlot {
    pub fn is_empty(&self) -> bool {
        self.hash == 0
    }

    pub fn hash(&self) -> u8 {
        self.hash
    }

    pub fn key_len(&self) -> usize {
        self.key_len.get() as usize
    }

    pub fn val_len(&self) -> usize {
        self.val_len.get() as usize
    }

    pub fn buf(&self) -> PAddr {
        PAddr::new(self.buf.get())
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct PLeaf {
    slots: [PSlot; LEAF_SLOTS],
    next: U64,
}

const _: () = assert!(std::mem::size_of::<PLeaf>() == PLEAF_SIZE);

impl PLeaf {
    pub fn slot(&self, idx: usize) -> &PSlot {
        &self.slots[idx]
    }

    pub fn next(&self) -> PAddr {
        PAddr::new(self.next.get())
    }

    pub fn is_all_empty(&self) -> bool {
        self.slots.iter().all(PSlot::is_empty)
    }
}

fn slot_offset(leaf: PAddr, idx: usize) -> u64 {
    debug_assert!(idx < LEAF_SLOTS);
    leaf.get() + (idx * PSLOT_SIZE) as u64
}

fn next_offset(leaf: PAddr) -> u64 {
    leaf.get() + (PSLOT_SIZE * LEAF_SLOTS) as u64
}

/// Allocates a zeroed leaf and splices it at the head of the chain.
pub fn leaf_alloc_at_head(tx: &mut Tx<'_>) -> Result<PAddr> {
    let addr = tx.alloc(PLEAF_SIZE)?;
    tx.write(addr.get(), &[0u8; PLEAF_SIZE])?;

    let old_head = tx.root_head()?;
    tx.write(next_offset(addr), &old_head.get().to_le_bytes())?;
    tx.set_root_head(addr)?;
    Ok(addr)
}

/// Writes `(hash, key, value)` into one slot, releasing any buffer the slot
/// held before.
pub fn slot_set(
    tx: &mut Tx<'_>,
    leaf: PAddr,
    idx: usize,
    hash: u8,
    key: &[u8],
    value: &[u8],
) -> Result<()> {
    ensure!(hash != 0, "zero hash is reserved for empty slots");

    let old = *tx.object::<PLeaf>(leaf)?.slot(idx);
    if !old.buf().is_null() {
        tx.free(old.buf());
    }

    let buf = tx.alloc(key.len() + value.len() + 2)?;
    tx.write(buf.get(), key)?;
    tx.write(buf.get() + key.len() as u64 + 1, value)?;

    let slot = PSlot {
        hash,
        _pad: [0; 3],
        key_len: U32::new(key.len() as u32),
        val_len: U32::new(value.len() as u32),
        buf: U64::new(buf.get()),
    };
    tx.write(slot_offset(leaf, idx), slot.as_bytes())
}

/// Empties one slot, releasing its buffer.
pub fn slot_clear(tx: &mut Tx<'_>, leaf: PAddr, idx: usize) -> Result<()> {
    let old = *tx.object::<PLeaf>(leaf)?.slot(idx);
    if !old.buf().is_null() {
        tx.free(old.buf());
    }
    tx.write(slot_offset(leaf, idx), PSlot::new_zeroed().as_bytes())
}

/// Swaps the slot records at the same index of two leaves. Buffers are not
/// touched; ownership moves with the records.
pub fn slot_swap(tx: &mut Tx<'_>, leaf_a: PAddr, leaf_b: PAddr, idx: usize) -> Result<()> {
    let a = *tx.object::<PLeaf>(leaf_a)?.slot(idx);
    let b = *tx.object::<PLeaf>(leaf_b)?.slot(idx);
    tx.write(slot_offset(leaf_a, idx), b.as_bytes())?;
    tx.write(slot_offset(leaf_b, idx), a.as_bytes())
}

/// Key bytes of a non-empty slot, borrowed from pool memory.
pub fn slot_key<'p>(pool: &'p Pool, slot: &PSlot) -> Result<&'p [u8]> {
    ensure!(!slot.is_empty(), "key of empty slot");
    pool.read_bytes(slot.buf(), slot.key_len())
}

/// Value bytes of a non-empty slot, borrowed from pool memory.
pub fn slot_value<'p>(pool: &'p Pool, slot: &PSlot) -> Result<&'p [u8]> {
    ensure!(!slot.is_empty(), "value of empty slot");
    let value_off = slot.buf().get() + slot.key_len() as u64 + 1;
    pool.read_bytes(PAddr::new(value_off), slot.val_len())
}
