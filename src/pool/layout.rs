//! # Persistent Pool Layout
//!
//! On-file structures for the pool: header, undo-log records and the root
//! record. All structs are `#[repr(C)]` zerocopy types with little-endian
//! fields so they can be viewed directly inside the memory map.
//!
//! ## File Layout
//!
//! ```text
//! Offset      Size       Contents
//! ---------   --------   ------------------------------------------
//! 0           64         PoolHeader (magic, version, heap state)
//! 64          256 KiB    Undo log: LogHeader + UndoEntry records
//! 64+256Ki    16         RootRecord (head of the leaf chain)
//! +16         …          Heap (allocator blocks, grows via heap_top)
//! ```
//!
//! ## Addressing
//!
//! A [`PAddr`] is a byte offset from the start of the file; offset 0 is the
//! null address (it would point into the header, which is never handed out).
//! Offsets survive reopen because the file is always mapped as one region
//! and all persistent references are stored as offsets, never as pointers.
//!
//! ## Undo Log Records
//!
//! Each entry preserves the prior contents of one mutated range:
//!
//! ```text
//! +-----------------------------+------------------+
//! | UndoEntryHeader (24 bytes)  | old data [len]   |
//! +-----------------------------+------------------+
//! | addr u64 | len u32 | pad    | crc u64          |
//! ```
//!
//! The crc covers addr, len and the preserved bytes. Entries are only
//! counted in `LogHeader::entry_count` after their bytes are flushed, so
//! every counted entry is fully written; the crc guards against latent
//! media corruption on the rollback path.

use eyre::{ensure, Result};
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

pub const POOL_MAGIC: &[u8; 16] = b"nvkv pool v1\x00\x00\x00\x00";
pub const POOL_VERSION: u32 = 1;

pub const POOL_HEADER_SIZE: usize = 64;
pub const LOG_OFFSET: u64 = POOL_HEADER_SIZE as u64;
pub const LOG_SIZE: u64 = 256 * 1024;
pub const LOG_HEADER_SIZE: usize = 8;
pub const LOG_DATA_OFFSET: u64 = LOG_OFFSET + LOG_HEADER_SIZE as u64;
pub const LOG_END: u64 = LOG_OFFSET + LOG_SIZE;
pub const ROOT_OFFSET: u64 = LOG_END;
pub const ROOT_RECORD_SIZE: usize = 16;
pub const HEAP_OFFSET: u64 = ROOT_OFFSET + ROOT_RECORD_SIZE as u64;
pub const UNDO_ENTRY_HEADER_SIZE: usize = 24;

/// Smallest pool that still leaves useful heap behind the fixed regions.
pub const MIN_POOL_SIZE: u64 = 512 * 1024;

const _: () = assert!(HEAP_OFFSET < MIN_POOL_SIZE);

/// Byte offset into the pool file; 0 is null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PAddr(u64);

impl PAddr {
    pub const NULL: PAddr = PAddr(0);

    pub fn new(offset: u64) -> Self {
        PAddr(offset)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct PoolHeader {
    magic: [u8; 16],
    version: U32,
    flags: U32,
    pool_size: U64,
    heap_top: U64,
    free_head: U64,
    reserved: [u8; 16],
}

const _: () = assert!(std::mem::size_of::<PoolHeader>() == POOL_HEADER_SIZE);

impl PoolHeader {
    pub fn new(pool_size: u64) -> Self {
        Self {
            magic: *POOL_MAGIC,
            version: U32::new(POOL_VERSION),
            flags: U32::new(0),
            pool_size: U64::new(pool_size),
            heap_top: U64::new(HEAP_OFFSET),
            free_head: U64::new(0),
            reserved: [0u8; 16],
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(&self.magic == POOL_MAGIC, "invalid magic bytes in pool file");
        ensure!(
            self.version.get() == POOL_VERSION,
            "unsupported pool version: {} (expected {})",
            self.version.get(),
            POOL_VERSION
        );
        Ok(())
    }

    pub fn pool_size(&self) -> u64 {
        self.pool_size.get()
    }

    pub fn heap_top(&self) -> u64 {
        self.heap_top.get()
    }

    pub fn set_heap_top(&mut self, top: u64) {
        self.heap_top = U64::new(top);
    }

    pub fn free_head(&self) -> u64 {
        self.free_head.get()
    }

    pub fn set_free_head(&mut self, head: u64) {
        self.free_head = U64::new(head);
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct LogHeader {
    entry_count: U32,
    _pad: U32,
}

const _: () = assert!(std::mem::size_of::<LogHeader>() == LOG_HEADER_SIZE);

impl LogHeader {
    pub fn entry_count(&self) -> u32 {
        self.entry_count.get()
    }

    pub fn set_entry_count(&mut self, count: u32) {
        self.entry_count = U32::new(count);
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct UndoEntryHeader {
    addr: U64,
    len: U32,
    _pad: U32,
    crc: U64,
}

const _: () = assert!(std::mem::size_of::<UndoEntryHeader>() == UNDO_ENTRY_HEADER_SIZE);

impl UndoEntryHeader {
    pub fn new(addr: u64, len: u32, crc: u64) -> Self {
        Self {
            addr: U64::new(addr),
            len: U32::new(len),
            _pad: U32::new(0),
            crc: U64::new(crc),
        }
    }

    pub fn addr(&self) -> u64 {
        self.addr.get()
    }

    pub fn len(&self) -> u32 {
        self.len.get()
    }

    pub fn crc(&self) -> u64 {
        self.crc.get()
    }
}

/// Singleton root: head pointer of the persistent leaf chain.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct RootRecord {
    head: U64,
    reserved: U64,
}

const _: () = assert!(std::mem::size_of::<RootRecord>() == ROOT_RECORD_SIZE);

impl RootRecord {
    pub fn head(&self) -> PAddr {
        PAddr::new(self.head.get())
    }

    pub fn set_head(&mut self, head: PAddr) {
        self.head = U64::new(head.get());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrips_through_bytes() {
        let header = PoolHeader::new(1 << 20);
        let bytes = header.as_bytes().to_vec();

        let view = PoolHeader::ref_from_bytes(&bytes).unwrap();
        view.validate().unwrap();
        assert_eq!(view.pool_size(), 1 << 20);
        assert_eq!(view.heap_top(), HEAP_OFFSET);
        assert_eq!(view.free_head(), 0);
    }

    #[test]
    fn validate_rejects_bad_magic() {
        let mut header = PoolHeader::new(1 << 20);
        header.magic[0] ^= 0xFF;
        assert!(header.validate().is_err());
    }

    #[test]
    fn paddr_null_semantics() {
        assert!(PAddr::NULL.is_null());
        assert!(!PAddr::new(HEAP_OFFSET).is_null());
        assert_eq!(PAddr::new(42).get(), 42);
    }

    #[test]
    fn regions_do_not_overlap() {
        assert!(LOG_DATA_OFFSET > LOG_OFFSET);
        assert!(ROOT_OFFSET >= LOG_END);
        assert!(HEAP_OFFSET >= ROOT_OFFSET + ROOT_RECORD_SIZE as u64);
    }
}
