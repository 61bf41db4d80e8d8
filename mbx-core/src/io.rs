//! Memory-mapped access to named shared regions

#![allow(unsafe_code)]

use std::fs::{File, OpenOptions};
use std::path::Path;

use memmap2::{Mmap, MmapMut, MmapOptions};

use crate::error::{Error, Result};

/// Read-only memory-mapped region for zero-copy access
pub struct MemoryMappedFile {
    /// The memory map
    mmap: Mmap,

    /// Number of mapped bytes
    size: usize,
}

impl MemoryMappedFile {
    /// Open an existing region and map exactly `len` bytes of it.
    ///
    /// Fails if the region is shorter than `len`; mapping past the end of the
    /// backing object would fault on first access instead of failing here.
    pub fn open_exact<P: AsRef<Path>>(path: P, len: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = open_existing(&path)?;
        let actual = file_len(&file)?;

        if actual < len {
            return Err(Error::MappingTooSmall {
                path,
                expected: len,
                actual,
            });
        }

        Self::map(&file, &path, len)
    }

    fn map(file: &File, path: &Path, size: usize) -> Result<Self> {
        // Safety: the mapping is read-only; concurrent writers are the other
        // process, whose writes are observed through volatile reads
        let mmap = unsafe { MmapOptions::new().len(size).map(file).map_err(Error::Io)? };

        tracing::debug!(path = %path.display(), size, "mapped shared region");

        Ok(Self { mmap, size })
    }

    /// Get a subslice of the mapped region
    pub fn slice(&self, offset: usize, length: usize) -> Result<&[u8]> {
        let end = offset.checked_add(length).filter(|end| *end <= self.size).ok_or(
            Error::IndexOutOfBounds {
                index: offset.saturating_add(length),
                len: self.size,
            },
        )?;

        Ok(&self.mmap[offset..end])
    }

    /// Read a little-endian `u32` that another process may have rewritten
    /// since the last read
    pub fn read_u32_le(&self, offset: usize) -> Result<u32> {
        let bytes = self.slice(offset, 4)?;
        // Safety: `bytes` is in bounds and `[u8; 4]` has alignment 1
        let raw = unsafe { std::ptr::read_volatile(bytes.as_ptr().cast::<[u8; 4]>()) };
        Ok(u32::from_le_bytes(raw))
    }
}

/// Writable memory-mapped region, used by the producing side
pub struct MemoryMappedFileMut {
    /// The mutable memory map
    mmap: MmapMut,

    /// Number of mapped bytes
    size: usize,
}

impl MemoryMappedFileMut {
    /// Create (or truncate) a region of the given size
    pub fn create<P: AsRef<Path>>(path: P, size: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(Error::Io)?;

        file.set_len(size as u64).map_err(Error::Io)?;

        // Safety: the file was just sized to `size`; the consuming process only
        // maps it read-only
        let mmap = unsafe { MmapOptions::new().len(size).map_mut(&file).map_err(Error::Io)? };

        Ok(Self { mmap, size })
    }

    /// Get a mutable subslice of the mapped region
    pub fn slice_mut(&mut self, offset: usize, length: usize) -> Result<&mut [u8]> {
        let end = offset.checked_add(length).filter(|end| *end <= self.size).ok_or(
            Error::IndexOutOfBounds {
                index: offset.saturating_add(length),
                len: self.size,
            },
        )?;

        Ok(&mut self.mmap[offset..end])
    }

    /// Write a little-endian `u32` so the other process observes it
    pub fn write_u32_le(&mut self, offset: usize, value: u32) -> Result<()> {
        let bytes = self.slice_mut(offset, 4)?;
        // Safety: `bytes` is in bounds and `[u8; 4]` has alignment 1
        unsafe { std::ptr::write_volatile(bytes.as_mut_ptr().cast::<[u8; 4]>(), value.to_le_bytes()) };
        Ok(())
    }
}

fn open_existing(path: &Path) -> Result<File> {
    File::open(path).map_err(|source| Error::MappingUnavailable {
        path: path.to_path_buf(),
        source,
    })
}

fn file_len(file: &File) -> Result<usize> {
    let len = file.metadata().map_err(Error::Io)?.len();
    usize::try_from(len).map_err(|_| Error::LayoutError(format!("Region of {len} bytes is not addressable")))
}
