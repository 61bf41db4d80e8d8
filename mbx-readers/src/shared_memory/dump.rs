//! Plain-text dump of received rows, for debugging a producer

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::buffer::SharedBuffer;
use crate::error::Result;

/// Dump file owned by one reader, recreated at every epoch start
pub struct DiagnosticDump {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl DiagnosticDump {
    /// A dump writing to `path`; nothing is created until an epoch starts
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: None,
        }
    }

    /// Path of the dump file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether an epoch is being dumped
    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    /// Truncate the dump file for a new epoch
    pub fn begin_epoch(&mut self) -> Result<()> {
        self.end_epoch()?;
        self.writer = Some(BufWriter::new(File::create(&self.path)?));
        tracing::debug!(path = %self.path.display(), "diagnostic dump opened");
        Ok(())
    }

    /// Append one line per row: each stream's tagged values, in buffer order
    pub fn write_round<'b>(
        &mut self,
        buffers: impl Iterator<Item = (&'b str, &'b SharedBuffer)> + Clone,
        rows: usize,
    ) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };

        for row in 0..rows {
            for (alias, buffer) in buffers.clone() {
                write!(writer, "|{alias} ")?;
                buffer.write_row_text(row, writer)?;
            }
            writeln!(writer)?;
        }

        writer.flush()?;
        Ok(())
    }

    /// Flush and close the dump file
    pub fn end_epoch(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }
}
