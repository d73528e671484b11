//! # Persistent Pool
//!
//! This module implements the persistent memory pool backing the key-value
//! engine: a single file, memory-mapped for its whole lifetime, holding a
//! root record, an undo log and a heap of variable-size allocations.
//!
//! ## Architecture Overview
//!
//! The pool is the only allocator of persistent memory and the only source
//! of durability. Everything stored in it is addressed by [`PAddr`] byte
//! offsets, so the structures survive reopen without relocation.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ Pool                                         │
//! │  ├── PoolFile      mmap of the backing file  │
//! │  ├── PoolHeader    heap_top / free_head      │
//! │  ├── Undo log      crash-atomic transactions │
//! │  ├── RootRecord    head of the leaf chain    │
//! │  └── Heap          first-fit block allocator │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Transaction Model
//!
//! Every persistent mutation — allocation, free, object write — happens
//! inside [`Pool::transaction`]. The transaction snapshots the prior bytes
//! of each mutated range into the undo log before the first write touches
//! it. Commit syncs the data and truncates the log; abort (closure error)
//! restores the snapshots. A crash between those points leaves a populated
//! log that the next open rolls back, so the file always reflects either
//! the pre- or the post-transaction state, never a mix.
//!
//! ## Allocation
//!
//! Heap blocks carry an 8-byte size header. Freed blocks are threaded onto
//! a singly linked free list (offset links) and handed out first-fit with
//! splitting; exhaustion of both the list and the bump region is the
//! engine's OUT_OF_MEMORY condition.
//!
//! ## Thread Safety
//!
//! `Pool` is `Send` but not `Sync`; the database boundary serializes
//! writers and readers with a reader-writer guard, so the pool itself
//! needs no internal locking.

mod alloc;
mod file;
mod layout;
mod tx;

pub use file::PoolFile;
pub use layout::{
    PAddr, PoolHeader, RootRecord, HEAP_OFFSET, LOG_DATA_OFFSET, LOG_END, LOG_HEADER_SIZE,
    LOG_OFFSET, MIN_POOL_SIZE, POOL_HEADER_SIZE, ROOT_OFFSET, ROOT_RECORD_SIZE,
    UNDO_ENTRY_HEADER_SIZE,
};
pub use tx::Tx;

use std::path::{Path, PathBuf};

use eyre::{ensure, Result, WrapErr};
use tracing::{debug, info};
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout, Unaligned};

use layout::{LogHeader, PoolHeader as Header};

pub(crate) fn align8(n: u64) -> u64 {
    (n + 7) & !7
}

#[derive(Debug)]
pub struct Pool {
    file: PoolFile,
    path: PathBuf,
    /// Offset of the next free byte in the undo-log region.
    log_tail: u64,
}

impl Pool {
    /// Creates a fresh pool file of `size` bytes, truncating any existing one.
    pub fn create<P: AsRef<Path>>(path: P, size: u64) -> Result<Self> {
        let path = path.as_ref();
        ensure!(
            size >= MIN_POOL_SIZE,
            "pool size {} below minimum {}",
            size,
            MIN_POOL_SIZE
        );

        let mut file = PoolFile::create(path, size)
            .wrap_err_with(|| format!("failed to create pool at '{}'", path.display()))?;

        let header = Header::new(size);
        file.bytes_mut(0, POOL_HEADER_SIZE)?
            .copy_from_slice(header.as_bytes());

        let log = LogHeader::new_zeroed();
        file.bytes_mut(LOG_OFFSET, LOG_HEADER_SIZE)?
            .copy_from_slice(log.as_bytes());

        let root = RootRecord::new_zeroed();
        file.bytes_mut(ROOT_OFFSET, ROOT_RECORD_SIZE)?
            .copy_from_slice(root.as_bytes());

        file.flush()?;

        info!(path = %path.display(), size, "created pool");

        Ok(Self {
            file,
            path: path.to_path_buf(),
            log_tail: LOG_DATA_OFFSET,
        })
    }

    /// Opens an existing pool, rolling back any transaction that was in
    /// flight when the previous session ended.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file = PoolFile::open(path)
            .wrap_err_with(|| format!("failed to open pool at '{}'", path.display()))?;

        let mut pool = Self {
            file,
            path: path.to_path_buf(),
            log_tail: LOG_DATA_OFFSET,
        };

        let header = pool.header()?;
        header.validate()?;
        ensure!(
            header.pool_size() == pool.file.len(),
            "pool header size {} does not match file size {}",
            header.pool_size(),
            pool.file.len()
        );

        let undone = pool.rollback_log()?;
        if undone > 0 {
            tracing::warn!(entries = undone, "rolled back interrupted transaction");
        }

        debug!(path = %path.display(), size = pool.file.len(), "opened pool");

        Ok(pool)
    }

    pub fn open_or_create<P: AsRef<Path>>(path: P, size: u64, force_create: bool) -> Result<Self> {
        let path = path.as_ref();
        if force_create || !path.exists() {
            Self::create(path, size)
        } else {
            Self::open(path)
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.file.len()
    }

    /// Head of the persistent leaf chain.
    pub fn root_head(&self) -> Result<PAddr> {
        Ok(self.root()?.head())
    }

    pub fn read_bytes(&self, addr: PAddr, len: usize) -> Result<&[u8]> {
        ensure!(!addr.is_null(), "null address dereference");
        self.file.bytes(addr.get(), len)
    }

    /// Views a zerocopy struct stored at `addr`.
    pub fn object<T>(&self, addr: PAddr) -> Result<&T>
    where
        T: FromBytes + KnownLayout + Immutable + Unaligned,
    {
        let bytes = self.read_bytes(addr, std::mem::size_of::<T>())?;
        T::ref_from_bytes(bytes).map_err(|e| {
            eyre::eyre!(
                "failed to view {} at {:#x}: {:?}",
                std::any::type_name::<T>(),
                addr.get(),
                e
            )
        })
    }

    pub fn sync(&self) -> Result<()> {
        self.file.flush()
    }

    pub(crate) fn header(&self) -> Result<&Header> {
        let bytes = self.file.bytes(0, POOL_HEADER_SIZE)?;
        Header::ref_from_bytes(bytes).map_err(|e| eyre::eyre!("failed to view pool header: {:?}", e))
    }

    pub(crate) fn root(&self) -> Result<&RootRecord> {
        let bytes = self.file.bytes(ROOT_OFFSET, ROOT_RECORD_SIZE)?;
        RootRecord::ref_from_bytes(bytes)
            .map_err(|e| eyre::eyre!("failed to view root record: {:?}", e))
    }

    /// Unlogged struct view; only the transaction and rollback machinery may
    /// use this, everything else mutates through [`Tx`].
    pub(crate) fn object_mut_unlogged<T>(&mut self, offset: u64) -> Result<&mut T>
    where
        T: FromBytes + IntoBytes + KnownLayout + Unaligned,
    {
        let bytes = self.file.bytes_mut(offset, std::mem::size_of::<T>())?;
        T::mut_from_bytes(bytes).map_err(|e| {
            eyre::eyre!(
                "failed to view {} at {:#x}: {:?}",
                std::any::type_name::<T>(),
                offset,
                e
            )
        })
    }

    pub(crate) fn file(&self) -> &PoolFile {
        &self.file
    }

    pub(crate) fn file_mut(&mut self) -> &mut PoolFile {
        &mut self.file
    }
}
