//! In-process producer side of the minibatch channel
//!
//! Signals are condition variables registered in a [`LocalSignalHub`] under the
//! channel's names, and buffers are regular writable mappings. Together they
//! let the full handshake run inside one process, on any platform.

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::atomic::{fence, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use mbx_core::io::MemoryMappedFileMut;
use mbx_core::layout::{self, BufferLayout, ROWS_WRITTEN_OFFSET, VERSION_OFFSET};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::shared_memory::{
    ChannelNames, CrossProcessSignal, SharedMemoryReaderOptions, SignalOpener,
};

/// A fresh channel namespace
pub fn unique_namespace() -> String {
    format!("mbx-{}", Uuid::new_v4().simple())
}

/// Binary signal shared between threads of one process
#[derive(Clone)]
pub struct LocalSignal {
    name: String,
    state: Arc<(Mutex<bool>, Condvar)>,
}

impl LocalSignal {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    /// Whether the signal is raised and not yet observed
    pub fn is_raised(&self) -> Result<bool> {
        Ok(*self.lock("IsRaised")?)
    }

    fn lock(&self, operation: &'static str) -> Result<MutexGuard<'_, bool>> {
        self.state.0.lock().map_err(|_| self.poisoned(operation))
    }

    fn poisoned(&self, operation: &'static str) -> Error {
        Error::SignalFailed {
            name: self.name.clone(),
            operation,
            source: io::Error::new(io::ErrorKind::Other, "signal lock poisoned"),
        }
    }
}

impl CrossProcessSignal for LocalSignal {
    fn set_signal(&self) -> Result<()> {
        *self.lock("SetSignal")? = true;
        self.state.1.notify_one();
        Ok(())
    }

    fn wait_for_signal(&self) -> Result<()> {
        let mut raised = self.lock("WaitForSignal")?;
        while !*raised {
            raised = self
                .state
                .1
                .wait(raised)
                .map_err(|_| self.poisoned("WaitForSignal"))?;
        }
        *raised = false;
        Ok(())
    }
}

/// Registry of in-process signals, shared by producer and consumer
#[derive(Clone, Default)]
pub struct LocalSignalHub {
    signals: Arc<Mutex<HashMap<String, LocalSignal>>>,
}

impl LocalSignalHub {
    /// Create an empty hub
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or replace) the signal `name` in the lowered state
    pub fn create(&self, name: &str) -> Result<LocalSignal> {
        let signal = LocalSignal::new(name);
        self.registry(name)?.insert(name.to_string(), signal.clone());
        Ok(signal)
    }

    fn registry(&self, name: &str) -> Result<MutexGuard<'_, HashMap<String, LocalSignal>>> {
        self.signals.lock().map_err(|_| Error::SignalFailed {
            name: name.to_string(),
            operation: "Open",
            source: io::Error::new(io::ErrorKind::Other, "signal registry poisoned"),
        })
    }
}

impl SignalOpener for LocalSignalHub {
    fn open(&self, name: &str) -> Result<Box<dyn CrossProcessSignal>> {
        match self.registry(name)?.get(name) {
            Some(signal) => Ok(Box::new(signal.clone())),
            None => Err(Error::SignalUnavailable {
                name: name.to_string(),
                source: io::Error::from(io::ErrorKind::NotFound),
            }),
        }
    }
}

/// The four signals of a channel, as created by the producer
#[derive(Clone)]
pub struct ProducerSignals {
    /// Round request, raised by the consumer
    pub request: LocalSignal,

    /// Round response, raised by the producer
    pub response: LocalSignal,

    /// Epoch start, raised by the consumer
    pub reset_announce: LocalSignal,

    /// Reset acknowledgement, raised by the producer
    pub reset_done: LocalSignal,
}

impl ProducerSignals {
    /// Create the channel's signals in `hub`
    pub fn create(hub: &LocalSignalHub, names: &ChannelNames) -> Result<Self> {
        Ok(Self {
            request: hub.create(&names.request)?,
            response: hub.create(&names.response)?,
            reset_announce: hub.create(&names.reset_announce)?,
            reset_done: hub.create(&names.reset_done)?,
        })
    }
}

/// Writable side of one stream's shared buffer
pub struct ProducerBuffer {
    name: String,
    region: MemoryMappedFileMut,
    layout: BufferLayout,
    version: u32,
}

impl ProducerBuffer {
    /// Create the buffer `name` under `dir` at version 0, stamped with its
    /// reserved row count
    pub fn create(dir: &Path, name: &str, row_width: usize, reserved_rows: usize) -> Result<Self> {
        let layout = BufferLayout::new(row_width, reserved_rows)?;
        let mut region = MemoryMappedFileMut::create(dir.join(name), layout.capacity_bytes())?;

        let stamp = u32::try_from(reserved_rows).map_err(|_| {
            Error::InvalidOptions(format!("Reserved rows {reserved_rows} do not fit the header"))
        })?;
        region.write_u32_le(VERSION_OFFSET, 0)?;
        region.write_u32_le(ROWS_WRITTEN_OFFSET, stamp)?;

        Ok(Self {
            name: name.to_string(),
            region,
            layout,
            version: 0,
        })
    }

    /// Last published version
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Write `values` into row `n`
    pub fn write_row(&mut self, n: usize, values: &[f32]) -> Result<()> {
        if values.len() != self.layout.row_width() {
            return Err(Error::InvalidOptions(format!(
                "Row of {} values written into buffer [{}] of width {}",
                values.len(),
                self.name,
                self.layout.row_width()
            )));
        }

        let range = self.layout.row_range(n)?;
        let out = self.region.slice_mut(range.start, range.len())?;
        layout::encode_row(values, out)?;
        Ok(())
    }

    /// Publish a round of `rows` rows under the next version
    pub fn publish(&mut self, rows: u32) -> Result<()> {
        self.set_header(self.version.wrapping_add(1), rows)
    }

    /// Write both header fields as-is
    pub fn set_header(&mut self, version: u32, rows: u32) -> Result<()> {
        fence(Ordering::Release);
        self.region.write_u32_le(ROWS_WRITTEN_OFFSET, rows)?;
        self.region.write_u32_le(VERSION_OFFSET, version)?;
        self.version = version;
        Ok(())
    }
}

/// Rows of one minibatch: one row set per stream, in stream order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Minibatch {
    /// Per-stream rows
    pub streams: Vec<Vec<Vec<f32>>>,
}

impl Minibatch {
    /// Wrap per-stream rows
    pub fn new(streams: Vec<Vec<Vec<f32>>>) -> Self {
        Self { streams }
    }

    /// `rows` rows per stream of the given widths, each value derived from
    /// `seed`, stream, row and column
    #[allow(clippy::cast_precision_loss)]
    pub fn synthetic(widths: &[usize], rows: usize, seed: usize) -> Self {
        let streams = widths
            .iter()
            .enumerate()
            .map(|(stream, &width)| {
                (0..rows)
                    .map(|row| {
                        (0..width)
                            .map(|col| (seed * 1000 + stream * 100 + row * 10 + col) as f32)
                            .collect()
                    })
                    .collect()
            })
            .collect();
        Self { streams }
    }

    /// Rows of the first stream
    pub fn num_rows(&self) -> usize {
        self.streams.first().map_or(0, Vec::len)
    }
}

/// Producer serving whole epochs of minibatches over a channel
pub struct LoopbackProducer {
    names: ChannelNames,
    signals: ProducerSignals,
    buffers: Vec<ProducerBuffer>,
}

impl LoopbackProducer {
    /// Create the signals and buffers a reader built from `options` expects,
    /// sized for `minibatch_size` rows
    pub fn create(
        hub: &LocalSignalHub,
        options: &SharedMemoryReaderOptions,
        minibatch_size: usize,
    ) -> Result<Self> {
        let names = options.names();
        let signals = ProducerSignals::create(hub, &names)?;
        let buffers = options
            .streams
            .iter()
            .map(|stream| {
                ProducerBuffer::create(
                    &options.mapping_dir,
                    &names.mapping(&stream.alias),
                    stream.sample_dimension,
                    minibatch_size,
                )
            })
            .collect::<Result<_>>()?;

        Ok(Self {
            names,
            signals,
            buffers,
        })
    }

    /// Names of the channel
    pub fn names(&self) -> &ChannelNames {
        &self.names
    }

    /// The channel's signals
    pub fn signals(&self) -> &ProducerSignals {
        &self.signals
    }

    /// The channel's buffers, in stream order
    pub fn buffers_mut(&mut self) -> &mut [ProducerBuffer] {
        &mut self.buffers
    }

    /// Wait for the consumer to announce an epoch, then acknowledge it
    pub fn accept_epoch_start(&self) -> Result<()> {
        self.signals.reset_announce.wait_for_signal()?;
        self.signals.reset_done.set_signal()
    }

    /// Answer one request with `minibatch`
    pub fn serve_round(&mut self, minibatch: &Minibatch) -> Result<()> {
        self.signals.request.wait_for_signal()?;

        for (buffer, rows) in self.buffers.iter_mut().zip(&minibatch.streams) {
            for (n, row) in rows.iter().enumerate() {
                buffer.write_row(n, row)?;
            }
            let count = u32::try_from(rows.len()).map_err(|_| {
                Error::InvalidOptions(format!("{} rows do not fit the header", rows.len()))
            })?;
            buffer.publish(count)?;
        }

        self.signals.response.set_signal()
    }

    /// Answer one request with an empty round, then wait for the consumer to
    /// report the channel drained
    pub fn serve_end_of_epoch(&mut self) -> Result<()> {
        self.serve_round(&Minibatch::new(vec![Vec::new(); self.buffers.len()]))?;
        self.signals.request.wait_for_signal()
    }

    /// Serve one epoch from reset to drain
    pub fn serve_epoch(&mut self, minibatches: &[Minibatch]) -> Result<()> {
        self.accept_epoch_start()?;
        for minibatch in minibatches {
            self.serve_round(minibatch)?;
        }
        self.serve_end_of_epoch()?;

        tracing::debug!(
            namespace = %self.names.namespace(),
            minibatches = minibatches.len(),
            "loopback epoch served"
        );
        Ok(())
    }

    /// Serve `epochs` on a new thread, handing the producer back when done
    pub fn spawn(mut self, epochs: Vec<Vec<Minibatch>>) -> JoinHandle<Result<Self>> {
        thread::spawn(move || {
            for epoch in &epochs {
                self.serve_epoch(epoch)?;
            }
            Ok(self)
        })
    }
}
