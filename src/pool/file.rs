//! # Memory-Mapped Pool File
//!
//! `PoolFile` maps the single backing file into the process address space
//! and exposes bounds-checked byte ranges. It is the only place that talks
//! to the OS; everything above it works in offsets ([`super::PAddr`]).
//!
//! ## Safety Considerations
//!
//! The map is created once at open/create time and never remapped: the pool
//! has a fixed size chosen at creation, so the usual grow/remap hazard of
//! mmap-backed storage does not arise here. Range accessors take `&self` /
//! `&mut self`, so the borrow checker prevents overlapping mutable views.
//!
//! ## Durability
//!
//! `flush_range` issues a targeted msync for small regions (undo-log
//! entries, headers); `flush` syncs the whole map and is used at
//! transaction commit. No write is considered durable until one of these
//! returns.

use std::fs::OpenOptions;
use std::path::Path;

use eyre::{ensure, Result, WrapErr};
use memmap2::MmapMut;

#[derive(Debug)]
pub struct PoolFile {
    mmap: MmapMut,
    len: u64,
}

impl PoolFile {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .wrap_err_with(|| format!("failed to open pool file '{}'", path.display()))?;

        let len = file
            .metadata()
            .wrap_err_with(|| format!("failed to stat pool file '{}'", path.display()))?
            .len();

        ensure!(len > 0, "cannot open empty pool file '{}'", path.display());

        // SAFETY: MmapMut::map_mut is unsafe because externally-modified
        // mappings lead to undefined behavior. This is safe because:
        // 1. The file is opened read+write by this process for its lifetime
        // 2. Pool files are single-writer by contract (§ concurrency model)
        // 3. The mmap lifetime is tied to PoolFile, preventing use-after-unmap
        // 4. All access goes through bytes()/bytes_mut() which bounds-check
        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        Ok(Self { mmap, len })
    }

    pub fn create<P: AsRef<Path>>(path: P, size: u64) -> Result<Self> {
        let path = path.as_ref();

        ensure!(size > 0, "pool size must be nonzero");

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .wrap_err_with(|| format!("failed to create pool file '{}'", path.display()))?;

        file.set_len(size)
            .wrap_err_with(|| format!("failed to size pool file to {} bytes", size))?;

        // SAFETY: see open(); additionally the file was just created with
        // truncate=true and sized before mapping.
        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        Ok(Self { mmap, len: size })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn bytes(&self, offset: u64, len: usize) -> Result<&[u8]> {
        self.check_range(offset, len)?;
        let start = offset as usize;
        Ok(&self.mmap[start..start + len])
    }

    pub fn bytes_mut(&mut self, offset: u64, len: usize) -> Result<&mut [u8]> {
        self.check_range(offset, len)?;
        let start = offset as usize;
        Ok(&mut self.mmap[start..start + len])
    }

    pub fn flush_range(&self, offset: u64, len: usize) -> Result<()> {
        self.check_range(offset, len)?;
        self.mmap
            .flush_range(offset as usize, len)
            .wrap_err("failed to sync pool range to disk")
    }

    pub fn flush(&self) -> Result<()> {
        self.mmap.flush().wrap_err("failed to sync pool to disk")
    }

    fn check_range(&self, offset: u64, len: usize) -> Result<()> {
        ensure!(
            offset
                .checked_add(len as u64)
                .is_some_and(|end| end <= self.len),
            "range {:#x}+{} out of pool bounds (size {})",
            offset,
            len,
            self.len
        );
        Ok(())
    }
}
