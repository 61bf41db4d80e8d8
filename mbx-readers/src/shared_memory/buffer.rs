//! Read-only view of one stream's shared buffer

use std::io::Write;
use std::path::Path;

use mbx_core::io::MemoryMappedFile;
use mbx_core::layout::{self, BufferLayout, ROWS_WRITTEN_OFFSET, VERSION_OFFSET};

use crate::error::{Error, Result};

/// A named, fixed-capacity region holding a row-major matrix of `f32` rows
/// behind a version counter and a rows-written counter.
///
/// The consumer maps the region read-only and tracks the version it expects
/// the producer to publish next.
pub struct SharedBuffer {
    name: String,
    region: MemoryMappedFile,
    layout: BufferLayout,
    expected_version: u32,
}

impl SharedBuffer {
    /// Open the existing buffer `name` under `dir`, mapping exactly the bytes
    /// of `reserved_rows` rows of `row_width` values.
    ///
    /// The producer stamps the reserved row count into the rows-written field
    /// on creation; a different value means the region belongs to another run.
    pub fn open(dir: &Path, name: &str, row_width: usize, reserved_rows: usize) -> Result<Self> {
        let layout = BufferLayout::new(row_width, reserved_rows)?;
        let region = MemoryMappedFile::open_exact(dir.join(name), layout.capacity_bytes())?;

        let found = region.read_u32_le(ROWS_WRITTEN_OFFSET)?;
        if usize::try_from(found).ok() != Some(reserved_rows) {
            return Err(Error::ReservedRowsMismatch {
                name: name.to_string(),
                found,
                expected: reserved_rows,
            });
        }

        Ok(Self {
            name: name.to_string(),
            region,
            layout,
            expected_version: 0,
        })
    }

    /// Number of values per row
    pub fn row_width(&self) -> usize {
        self.layout.row_width()
    }

    /// Number of rows the buffer can hold
    pub fn reserved_rows(&self) -> usize {
        self.layout.reserved_rows()
    }

    /// Version the next round is expected to start from
    pub fn expected_version(&self) -> u32 {
        self.expected_version
    }

    /// Version currently published by the producer
    pub fn version(&self) -> Result<u32> {
        Ok(self.region.read_u32_le(VERSION_OFFSET)?)
    }

    /// Rows currently published by the producer
    pub fn rows_written(&self) -> Result<u32> {
        Ok(self.region.read_u32_le(ROWS_WRITTEN_OFFSET)?)
    }

    /// Check that the producer is at the expected version, then expect the
    /// next one.
    ///
    /// A mismatch means a round was missed or duplicated.
    pub fn check_and_increment_expected_version(&mut self) -> Result<()> {
        let actual = self.version()?;
        if actual != self.expected_version {
            return Err(Error::VersionMismatch {
                name: self.name.clone(),
                expected: self.expected_version,
                actual,
            });
        }

        self.expected_version = self.expected_version.wrapping_add(1);
        Ok(())
    }

    /// Check the published row count against capacity and against the count
    /// agreed by the buffers read earlier in the same round.
    ///
    /// The first buffer of a round sets `agreed`; later buffers must match it.
    pub fn verify_rows_written(&self, agreed: &mut Option<u32>) -> Result<u32> {
        let written = self.rows_written()?;

        if usize::try_from(written).map_or(true, |rows| rows > self.reserved_rows()) {
            return Err(Error::CapacityOverrun {
                name: self.name.clone(),
                written,
                capacity: self.reserved_rows(),
            });
        }

        match *agreed {
            None => *agreed = Some(written),
            Some(expected) if expected != written => {
                return Err(Error::RowCountDisagreement {
                    name: self.name.clone(),
                    written,
                    expected,
                });
            }
            Some(_) => {}
        }

        Ok(written)
    }

    fn row_bytes(&self, n: usize) -> Result<&[u8]> {
        let range = self.layout.row_range(n)?;
        Ok(self.region.slice(range.start, range.len())?)
    }

    /// Borrow row `n` straight from the mapped region.
    ///
    /// The view is only meaningful until the producer is asked for the next
    /// round; it requires a little-endian host.
    pub fn row(&self, n: usize) -> Result<&[f32]> {
        if cfg!(target_endian = "big") {
            return Err(Error::Unsupported(
                "Zero-copy rows require a little-endian host".into(),
            ));
        }

        let bytes = self.row_bytes(n)?;
        bytemuck::try_cast_slice(bytes).map_err(|e| {
            Error::Core(mbx_core::Error::LayoutError(format!(
                "Row {n} of buffer [{}] is not f32-aligned: {e:?}",
                self.name
            )))
        })
    }

    /// Copy row `n` out of the mapped region
    pub fn row_copy(&self, n: usize) -> Result<Vec<f32>> {
        Ok(layout::decode_row(self.row_bytes(n)?))
    }

    /// Print row `n` as space-separated values
    pub fn write_row_text<W: Write>(&self, n: usize, out: &mut W) -> Result<()> {
        for value in self.row_copy(n)? {
            write!(out, "{value:.6} ")?;
        }
        Ok(())
    }
}
