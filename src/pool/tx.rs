//! # Undo-Log Transactions
//!
//! Scoped all-or-nothing mutation of pool memory. A [`Tx`] is handed to the
//! closure passed to [`Pool::transaction`]; every mutation helper snapshots
//! the prior bytes of the touched range into the pool's undo log before the
//! first write lands, giving the following guarantee:
//!
//! - closure returns `Ok`    → data flushed, log truncated, changes durable
//! - closure returns `Err`   → snapshots restored, pool as if nothing ran
//! - process dies in between → next open finds the log populated and rolls
//!   the transaction back before any user operation
//!
//! ## Write Protocol (per snapshot)
//!
//! 1. Copy the old bytes and compute CRC-64/ECMA-182 over (addr, len, data)
//! 2. Write the entry at the log tail and flush that range
//! 3. Publish it by incrementing `entry_count` in the log header and
//!    flushing the header
//!
//! Because publication is ordered after the entry flush, every counted
//! entry is complete; rollback additionally verifies the CRC to catch
//! media corruption.
//!
//! ## Deferred Frees
//!
//! `Tx::free` only records the block; the free-list insertion happens at
//! commit time, still inside the logged scope. An aborted transaction must
//! never recycle a block the pre-transaction state still references, and
//! deferring achieves that without snapshotting buffer payloads.

use crc::{Crc, CRC_64_ECMA_182};
use eyre::{ensure, Result};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::layout::{
    LogHeader, RootRecord, UndoEntryHeader, LOG_DATA_OFFSET, LOG_END, LOG_HEADER_SIZE, LOG_OFFSET,
    ROOT_OFFSET, UNDO_ENTRY_HEADER_SIZE,
};
use super::{align8, PAddr, Pool};
use crate::status::KvError;

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

fn entry_crc(addr: u64, len: u32, data: &[u8]) -> u64 {
    let mut digest = CRC64.digest();
    digest.update(&addr.to_le_bytes());
    digest.update(&len.to_le_bytes());
    digest.update(data);
    digest.finalize()
}

fn entry_span(len: u32) -> u64 {
    UNDO_ENTRY_HEADER_SIZE as u64 + align8(len as u64)
}

pub struct Tx<'p> {
    pool: &'p mut Pool,
    /// Ranges already snapshotted this transaction (addr, len).
    logged: Vec<(u64, u64)>,
    /// Blocks bump-allocated this transaction (addr, len). Writes into
    /// them need no undo entry: rolling back `heap_top` already makes them
    /// unreachable. Free-list reuses are NOT listed here — their payload
    /// holds the free-list link that a rollback must restore.
    fresh: Vec<(u64, u64)>,
    /// Blocks to return to the free list at commit.
    pending_frees: Vec<PAddr>,
}

impl Pool {
    /// Runs `f` inside a persistent transaction. All pool mutations made
    /// through the provided [`Tx`] become visible atomically; on error the
    /// pool is restored to its pre-transaction state.
    pub fn transaction<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Tx<'_>) -> Result<T>,
    {
        if self.log_header()?.entry_count() != 0 {
            return Err(KvError::TransactionScope("transaction already in progress".into()).into());
        }
        self.log_tail = LOG_DATA_OFFSET;

        let result = {
            let mut tx = Tx {
                pool: self,
                logged: Vec::new(),
                fresh: Vec::new(),
                pending_frees: Vec::new(),
            };
            match f(&mut tx) {
                Ok(value) => tx.apply_frees().map(|()| value),
                Err(err) => Err(err),
            }
        };

        match result {
            Ok(value) => {
                self.file().flush()?;
                self.clear_log()?;
                Ok(value)
            }
            Err(err) => {
                self.rollback_log()?;
                Err(err)
            }
        }
    }

    /// Restores all published undo entries, newest first, and truncates the
    /// log. Called on abort and on open after a crash.
    pub(crate) fn rollback_log(&mut self) -> Result<usize> {
        let count = self.log_header()?.entry_count();
        if count == 0 {
            self.log_tail = LOG_DATA_OFFSET;
            return Ok(0);
        }

        let mut entries = Vec::with_capacity(count as usize);
        let mut offset = LOG_DATA_OFFSET;
        for _ in 0..count {
            let header_bytes = self.file().bytes(offset, UNDO_ENTRY_HEADER_SIZE)?;
            let header = UndoEntryHeader::ref_from_bytes(header_bytes)
                .map_err(|e| eyre::eyre!("failed to view undo entry header: {:?}", e))?;
            entries.push((
                header.addr(),
                header.len(),
                offset + UNDO_ENTRY_HEADER_SIZE as u64,
                header.crc(),
            ));
            offset += entry_span(header.len());
        }

        for &(addr, len, data_offset, crc) in entries.iter().rev() {
            let data = self.file().bytes(data_offset, len as usize)?.to_vec();
            ensure!(
                entry_crc(addr, len, &data) == crc,
                "undo entry for {:#x} failed checksum validation",
                addr
            );
            self.file_mut()
                .bytes_mut(addr, len as usize)?
                .copy_from_slice(&data);
        }

        self.file().flush()?;
        self.clear_log()?;
        Ok(entries.len())
    }

    fn clear_log(&mut self) -> Result<()> {
        self.log_header_mut()?.set_entry_count(0);
        self.file().flush_range(LOG_OFFSET, LOG_HEADER_SIZE)?;
        self.log_tail = LOG_DATA_OFFSET;
        Ok(())
    }

    pub(crate) fn log_header(&self) -> Result<&LogHeader> {
        let bytes = self.file().bytes(LOG_OFFSET, LOG_HEADER_SIZE)?;
        LogHeader::ref_from_bytes(bytes)
            .map_err(|e| eyre::eyre!("failed to view log header: {:?}", e))
    }

    fn log_header_mut(&mut self) -> Result<&mut LogHeader> {
        self.object_mut_unlogged::<LogHeader>(LOG_OFFSET)
    }
}

impl Tx<'_> {
    /// Preserves the current contents of `[addr, addr+len)` in the undo log.
    /// Ranges already covered this transaction are skipped.
    pub fn snapshot(&mut self, addr: u64, len: u64) -> Result<()> {
        if len == 0 {
            return Ok(());
        }
        ensure!(len <= u32::MAX as u64, "snapshot range too large: {}", len);
        let covered = |ranges: &[(u64, u64)]| {
            ranges
                .iter()
                .any(|&(a, l)| addr >= a && addr + len <= a + l)
        };
        if covered(&self.logged) || covered(&self.fresh) {
            return Ok(());
        }

        let span = entry_span(len as u32);
        let entry_offset = self.pool.log_tail;
        if entry_offset + span > LOG_END {
            return Err(KvError::TransactionScope(format!(
                "undo log full: need {} bytes at offset {}",
                span, entry_offset
            ))
            .into());
        }

        let data = self.pool.file().bytes(addr, len as usize)?.to_vec();
        let header = UndoEntryHeader::new(addr, len as u32, entry_crc(addr, len as u32, &data));

        self.pool
            .file_mut()
            .bytes_mut(entry_offset, UNDO_ENTRY_HEADER_SIZE)?
            .copy_from_slice(header.as_bytes());
        self.pool
            .file_mut()
            .bytes_mut(entry_offset + UNDO_ENTRY_HEADER_SIZE as u64, len as usize)?
            .copy_from_slice(&data);
        self.pool
            .file()
            .flush_range(entry_offset, span as usize)?;

        let count = self.pool.log_header()?.entry_count();
        self.pool.log_header_mut()?.set_entry_count(count + 1);
        self.pool.file().flush_range(LOG_OFFSET, LOG_HEADER_SIZE)?;

        self.pool.log_tail += span;
        self.logged.push((addr, len));
        Ok(())
    }

    /// Logged write of raw bytes.
    pub fn write(&mut self, addr: u64, bytes: &[u8]) -> Result<()> {
        self.snapshot(addr, bytes.len() as u64)?;
        self.pool
            .file_mut()
            .bytes_mut(addr, bytes.len())?
            .copy_from_slice(bytes);
        Ok(())
    }

    /// Logged mutable view of a zerocopy struct.
    pub fn object_mut<T>(&mut self, addr: PAddr) -> Result<&mut T>
    where
        T: FromBytes + IntoBytes + KnownLayout + Unaligned,
    {
        ensure!(!addr.is_null(), "null address dereference");
        self.snapshot(addr.get(), std::mem::size_of::<T>() as u64)?;
        self.pool.object_mut_unlogged::<T>(addr.get())
    }

    pub fn read_bytes(&self, addr: PAddr, len: usize) -> Result<&[u8]> {
        self.pool.read_bytes(addr, len)
    }

    pub fn object<T>(&self, addr: PAddr) -> Result<&T>
    where
        T: FromBytes + KnownLayout + Immutable + Unaligned,
    {
        self.pool.object::<T>(addr)
    }

    pub fn root_head(&self) -> Result<PAddr> {
        self.pool.root_head()
    }

    pub fn set_root_head(&mut self, head: PAddr) -> Result<()> {
        self.snapshot(ROOT_OFFSET, std::mem::size_of::<RootRecord>() as u64)?;
        self.pool
            .object_mut_unlogged::<RootRecord>(ROOT_OFFSET)?
            .set_head(head);
        Ok(())
    }

    pub(crate) fn pool(&self) -> &Pool {
        self.pool
    }

    pub(crate) fn pool_mut(&mut self) -> &mut Pool {
        self.pool
    }

    pub(crate) fn take_pending_frees(&mut self) -> Vec<PAddr> {
        std::mem::take(&mut self.pending_frees)
    }

    pub(crate) fn push_pending_free(&mut self, addr: PAddr) {
        self.pending_frees.push(addr);
    }

    pub(crate) fn mark_fresh(&mut self, addr: u64, len: u64) {
        self.fresh.push((addr, len));
    }
}
