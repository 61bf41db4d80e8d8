//! Byte layout of a shared channel buffer
//!
//! A channel buffer is a fixed-capacity region holding a small header followed
//! by a row-major matrix of `f32` values:
//!
//! ```text
//! [version: u32][rows_written: u32][row 0: row_width x f32] ... [row reserved_rows - 1]
//! ```
//!
//! All fields are little-endian. The producer writes the reserved row count
//! into `rows_written` when it creates the region, so a consumer can detect a
//! stale region left behind by a run with a different minibatch size.

use std::mem::size_of;
use std::ops::Range;

use serde::{Deserialize, Serialize};
use static_assertions::const_assert_eq;

use crate::error::{Error, Result};

/// Offset of the version counter
pub const VERSION_OFFSET: usize = 0;

/// Offset of the rows-written counter
pub const ROWS_WRITTEN_OFFSET: usize = size_of::<u32>();

/// Size of the header preceding the row data
pub const HEADER_SIZE: usize = 2 * size_of::<u32>();

/// Size of a single row value
pub const VALUE_SIZE: usize = size_of::<f32>();

const_assert_eq!(HEADER_SIZE, 8);
const_assert_eq!(VALUE_SIZE, 4);
// Row data must start on an f32 boundary for zero-copy views
const_assert_eq!(HEADER_SIZE % VALUE_SIZE, 0);

/// Geometry of a channel buffer: row width and number of reserved rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BufferLayout {
    row_width: usize,
    reserved_rows: usize,
}

impl BufferLayout {
    /// Create a layout, rejecting empty geometries and sizes that overflow
    /// the 32-bit header or the address space
    pub fn new(row_width: usize, reserved_rows: usize) -> Result<Self> {
        if row_width == 0 {
            return Err(Error::InvalidArgument("Row width must not be zero".into()));
        }
        if reserved_rows == 0 {
            return Err(Error::InvalidArgument("Reserved rows must not be zero".into()));
        }
        if u32::try_from(reserved_rows).is_err() {
            return Err(Error::InvalidArgument(format!(
                "Reserved rows {reserved_rows} do not fit the 32-bit header"
            )));
        }

        row_width
            .checked_mul(reserved_rows)
            .and_then(|values| values.checked_mul(VALUE_SIZE))
            .and_then(|bytes| bytes.checked_add(HEADER_SIZE))
            .ok_or_else(|| {
                Error::LayoutError(format!(
                    "Buffer of {reserved_rows} rows x {row_width} values overflows"
                ))
            })?;

        Ok(Self {
            row_width,
            reserved_rows,
        })
    }

    /// Number of `f32` values per row
    pub fn row_width(&self) -> usize {
        self.row_width
    }

    /// Number of rows the region can hold
    pub fn reserved_rows(&self) -> usize {
        self.reserved_rows
    }

    /// Size of one row in bytes
    pub fn row_bytes(&self) -> usize {
        self.row_width * VALUE_SIZE
    }

    /// Total size of the region in bytes, header included
    pub fn capacity_bytes(&self) -> usize {
        HEADER_SIZE + self.row_bytes() * self.reserved_rows
    }

    /// Byte range of row `n` within the region
    pub fn row_range(&self, n: usize) -> Result<Range<usize>> {
        if n >= self.reserved_rows {
            return Err(Error::IndexOutOfBounds {
                index: n,
                len: self.reserved_rows,
            });
        }

        let start = HEADER_SIZE + n * self.row_bytes();
        Ok(start..start + self.row_bytes())
    }
}

/// Decode a row of little-endian `f32` values into an owned vector
pub fn decode_row(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(VALUE_SIZE)
        .map(|chunk| {
            let mut raw = [0u8; VALUE_SIZE];
            raw.copy_from_slice(chunk);
            f32::from_le_bytes(raw)
        })
        .collect()
}

/// Encode `values` as little-endian `f32` into `out`
pub fn encode_row(values: &[f32], out: &mut [u8]) -> Result<()> {
    if out.len() != values.len() * VALUE_SIZE {
        return Err(Error::InvalidArgument(format!(
            "Row of {} values does not fit {} bytes",
            values.len(),
            out.len()
        )));
    }

    for (value, chunk) in values.iter().zip(out.chunks_exact_mut(VALUE_SIZE)) {
        chunk.copy_from_slice(&value.to_le_bytes());
    }

    Ok(())
}
