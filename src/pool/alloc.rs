//! # Pool Heap Allocator
//!
//! First-fit allocation of variable-size blocks inside the pool heap. Every
//! block carries an 8-byte size header; freed blocks keep that header and
//! thread a `next` offset through their payload, forming a singly linked
//! free list anchored at the pool header's `free_head`.
//!
//! ## Block Layout
//!
//! ```text
//! Allocated:  [ size: u64 ][ payload … ]
//! Free:       [ size: u64 ][ next: u64 ][ unused … ]
//! ```
//!
//! `size` counts the whole block including its header; payload addresses
//! (what [`super::PAddr`] values point to) are `block + 8`.
//!
//! ## Allocation Strategy
//!
//! 1. Walk the free list; take the first block large enough, splitting off
//!    the remainder as a new free block when it can stand on its own
//! 2. Otherwise bump `heap_top`; exhaustion of the region behind it is the
//!    engine's OUT_OF_MEMORY condition
//!
//! ## Crash Consistency
//!
//! All allocator metadata (pool header fields, block headers, free-list
//! links) is mutated through the enclosing transaction's logged writes, so
//! an aborted or crashed transaction restores the allocator exactly along
//! with everything else. Frees requested during a transaction are deferred
//! to commit time (see [`Tx::free`]); the blocks they name keep their prior
//! contents until the transaction is past the point of rollback.

use eyre::{ensure, Result};
use zerocopy::little_endian::U64;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::layout::POOL_HEADER_SIZE;
use super::{align8, PAddr, Tx};
use crate::status::KvError;

pub(crate) const BLOCK_HEADER_SIZE: u64 = 8;

/// Smallest viable block: header plus room for the free-list link.
const MIN_BLOCK_SIZE: u64 = 16;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct FreeBlock {
    size: U64,
    next: U64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct BlockHeader {
    size: U64,
}

fn block_span(payload_len: usize) -> u64 {
    BLOCK_HEADER_SIZE + align8((payload_len.max(8)) as u64)
}

impl Tx<'_> {
    /// Allocates `len` payload bytes, returning the payload address.
    pub fn alloc(&mut self, len: usize) -> Result<PAddr> {
        let need = block_span(len);

        if let Some(addr) = self.alloc_from_free_list(need)? {
            return Ok(addr);
        }

        let header = self.pool().header()?;
        let top = header.heap_top();
        let pool_size = header.pool_size();
        if !top.checked_add(need).is_some_and(|end| end <= pool_size) {
            return Err(KvError::OutOfMemory.into());
        }

        self.set_heap_top(top + need)?;
        // the whole block is above the pre-transaction heap_top, so writes
        // into it need no undo entries
        self.mark_fresh(top, need);
        self.write_block_header(top, need)?;
        Ok(PAddr::new(top + BLOCK_HEADER_SIZE))
    }

    /// Schedules the block holding `addr` for release at commit.
    pub fn free(&mut self, addr: PAddr) {
        if !addr.is_null() {
            self.push_pending_free(addr);
        }
    }

    /// Applies deferred frees; runs at commit, still inside the logged scope.
    pub(crate) fn apply_frees(&mut self) -> Result<()> {
        for addr in self.take_pending_frees() {
            let block = addr
                .get()
                .checked_sub(BLOCK_HEADER_SIZE)
                .ok_or_else(|| eyre::eyre!("free of invalid address {:#x}", addr.get()))?;
            let size = self
                .object::<BlockHeader>(PAddr::new(block))?
                .size
                .get();
            ensure!(
                size >= MIN_BLOCK_SIZE,
                "free of corrupt block at {:#x} (size {})",
                block,
                size
            );

            let free_head = self.pool().header()?.free_head();
            let entry = FreeBlock {
                size: U64::new(size),
                next: U64::new(free_head),
            };
            self.write(block, entry.as_bytes())?;
            self.set_free_head(block)?;
        }
        Ok(())
    }

    fn alloc_from_free_list(&mut self, need: u64) -> Result<Option<PAddr>> {
        let mut prev: Option<u64> = None;
        let mut cursor = self.pool().header()?.free_head();

        while cursor != 0 {
            let block = *self.object::<FreeBlock>(PAddr::new(cursor))?;
            let size = block.size.get();
            let next = block.next.get();

            if size >= need {
                // unlink
                match prev {
                    Some(prev_block) => {
                        let mut updated = *self.object::<FreeBlock>(PAddr::new(prev_block))?;
                        updated.next = U64::new(next);
                        self.write(prev_block, updated.as_bytes())?;
                    }
                    None => self.set_free_head(next)?,
                }

                let used = if size - need >= MIN_BLOCK_SIZE {
                    let remainder_addr = cursor + need;
                    let remainder = FreeBlock {
                        size: U64::new(size - need),
                        next: U64::new(self.pool().header()?.free_head()),
                    };
                    self.write(remainder_addr, remainder.as_bytes())?;
                    self.set_free_head(remainder_addr)?;
                    need
                } else {
                    size
                };

                self.write_block_header(cursor, used)?;
                return Ok(Some(PAddr::new(cursor + BLOCK_HEADER_SIZE)));
            }

            prev = Some(cursor);
            cursor = next;
        }

        Ok(None)
    }

    fn write_block_header(&mut self, block: u64, size: u64) -> Result<()> {
        let header = BlockHeader {
            size: U64::new(size),
        };
        self.write(block, header.as_bytes())
    }

    fn set_heap_top(&mut self, top: u64) -> Result<()> {
        self.snapshot(0, POOL_HEADER_SIZE as u64)?;
        self.pool_mut()
            .object_mut_unlogged::<super::PoolHeader>(0)?
            .set_heap_top(top);
        Ok(())
    }

    fn set_free_head(&mut self, head: u64) -> Result<()> {
        self.snapshot(0, POOL_HEADER_SIZE as u64)?;
        self.pool_mut()
            .object_mut_unlogged::<super::PoolHeader>(0)?
            .set_free_head(head);
        Ok(())
    }
}
