//! Consumer side of the shared-memory minibatch channel

use std::sync::atomic::{fence, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mbx_core::{
    EpochConfiguration, EpochSize, ReaderConfiguration, SequenceData, SequenceEnumerator, Sequences,
    StopWatch, StreamDescription,
};

use super::buffer::SharedBuffer;
use super::dump::DiagnosticDump;
use super::options::{ChannelNames, DataAccess, SharedMemoryReaderOptions};
use super::signal::{CrossProcessSignal, SignalOpener};
use crate::error::{Error, Result};

/// Version of the reader reported at construction
pub const READER_VERSION: &str = "0.1";

/// Lifecycle of a [`SharedMemoryReader`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    /// Signals are open; buffers wait for a known minibatch size
    Uninitialized,

    /// Buffers are open; no epoch is running
    AwaitingEpochStart,

    /// An epoch is running
    EpochActive,

    /// A fatal error occurred; every call fails
    Terminal,
}

/// Instrumentation of one finished epoch
#[derive(Debug, Clone, PartialEq)]
pub struct EpochStats {
    /// Index of the epoch
    pub epoch_index: usize,

    /// Samples received
    pub samples: usize,

    /// Non-empty minibatches received
    pub minibatches: usize,

    /// Wall-clock time from epoch start to end of epoch
    pub total: Duration,

    /// Time spent in retrievals, including the wait on the producer
    pub reader_inclusive: Duration,

    /// Time spent in retrievals excluding the wait on the producer
    pub reader_exclusive: Duration,
}

impl EpochStats {
    /// Time spent waiting on the producer
    pub fn producer(&self) -> Duration {
        self.reader_inclusive.saturating_sub(self.reader_exclusive)
    }

    /// Share of the epoch spent in retrievals, in percent
    pub fn reader_inclusive_percent(&self) -> f64 {
        percent(self.reader_inclusive, self.total)
    }

    /// Share of the epoch spent in local conversion, in percent
    pub fn reader_exclusive_percent(&self) -> f64 {
        percent(self.reader_exclusive, self.total)
    }
}

fn percent(part: Duration, whole: Duration) -> f64 {
    if whole.is_zero() {
        0.0
    } else {
        part.as_secs_f64() / whole.as_secs_f64() * 100.0
    }
}

#[derive(Debug)]
struct Lifecycle {
    state: ReaderState,
    failure: Option<String>,
}

impl Lifecycle {
    fn check(&self) -> Result<()> {
        match &self.failure {
            Some(failure) => Err(Error::Terminated(failure.clone())),
            None => Ok(()),
        }
    }

    /// Record `error`, terminating the reader if it is fatal
    fn fail(&mut self, error: Error) -> Error {
        if matches!(error, Error::Terminated(_)) {
            return error;
        }

        if error.is_fatal() {
            tracing::error!(category = %error.category(), "{error}");
            self.state = ReaderState::Terminal;
            self.failure = Some(error.to_string());
        } else {
            tracing::warn!("{error}");
        }
        error
    }
}

#[derive(Debug, Default)]
struct EpochTimers {
    epoch: StopWatch,
    reader_inclusive: StopWatch,
    reader_exclusive: StopWatch,
}

impl EpochTimers {
    fn restart(&mut self) {
        self.epoch.reset();
        self.reader_inclusive.reset();
        self.reader_exclusive.reset();
        self.epoch.start();
    }

    fn stop_round(&mut self) {
        self.reader_inclusive.stop();
        self.reader_exclusive.stop();
    }
}

struct Signals {
    request: Box<dyn CrossProcessSignal>,
    response: Box<dyn CrossProcessSignal>,
    reset_announce: Box<dyn CrossProcessSignal>,
    reset_done: Box<dyn CrossProcessSignal>,
}

impl Signals {
    fn open(opener: &dyn SignalOpener, names: &ChannelNames) -> Result<Self> {
        Ok(Self {
            request: opener.open(&names.request)?,
            response: opener.open(&names.response)?,
            reset_announce: opener.open(&names.reset_announce)?,
            reset_done: opener.open(&names.reset_done)?,
        })
    }
}

/// Sequence source fed by an external producer over shared memory.
///
/// Each retrieval is one request/response round trip with the producer. A
/// round reporting zero rows ends the epoch. Every protocol violation is fatal:
/// the reader logs it, enters [`ReaderState::Terminal`] and refuses further
/// work.
pub struct SharedMemoryReader {
    options: SharedMemoryReaderOptions,
    names: ChannelNames,
    streams: Vec<Arc<StreamDescription>>,
    signals: Signals,
    buffers: Vec<SharedBuffer>,
    dump: Option<DiagnosticDump>,

    config: EpochConfiguration,
    samples_per_epoch: Option<usize>,
    samples_sent: usize,
    minibatches_sent: usize,

    timers: EpochTimers,
    next_progress_log: Instant,
    last_epoch_stats: Option<EpochStats>,
    lifecycle: Lifecycle,
}

impl SharedMemoryReader {
    /// Open the channel's POSIX named semaphores
    #[cfg(unix)]
    pub fn new(options: SharedMemoryReaderOptions) -> Result<Self> {
        Self::with_signal_opener(options, &super::signal::NamedSemaphoreOpener)
    }

    /// Open the channel's signals through `opener`.
    ///
    /// Buffers stay closed until the minibatch size is known.
    pub fn with_signal_opener(
        options: SharedMemoryReaderOptions,
        opener: &dyn SignalOpener,
    ) -> Result<Self> {
        Self::open(options, opener).map_err(|error| {
            tracing::error!(category = %error.category(), "{error}");
            error
        })
    }

    fn open(options: SharedMemoryReaderOptions, opener: &dyn SignalOpener) -> Result<Self> {
        options.validate()?;

        let names = options.names();
        let signals = Signals::open(opener, &names)?;
        let streams = options
            .streams
            .iter()
            .enumerate()
            .map(|(id, descriptor)| Arc::new(StreamDescription::from_descriptor(id, descriptor)))
            .collect();
        let dump = options.diagnostic_dump.clone().map(DiagnosticDump::new);

        tracing::info!(
            version = READER_VERSION,
            data_access = %options.data_access,
            namespace = %names.namespace(),
            streams = options.streams.len(),
            "initializing shared-memory reader"
        );

        Ok(Self {
            options,
            names,
            streams,
            signals,
            buffers: Vec::new(),
            dump,
            config: ReaderConfiguration::default().into(),
            samples_per_epoch: None,
            samples_sent: 0,
            minibatches_sent: 0,
            timers: EpochTimers::default(),
            next_progress_log: Instant::now(),
            last_epoch_stats: None,
            lifecycle: Lifecycle {
                state: ReaderState::Uninitialized,
                failure: None,
            },
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> ReaderState {
        self.lifecycle.state
    }

    /// Options the reader was built with
    pub fn options(&self) -> &SharedMemoryReaderOptions {
        &self.options
    }

    /// Names of the channel's signals and mappings
    pub fn names(&self) -> &ChannelNames {
        &self.names
    }

    /// Rows per buffer, once the buffers are open
    pub fn minibatch_size(&self) -> Option<usize> {
        self.buffers.first().map(SharedBuffer::reserved_rows)
    }

    /// Samples per epoch, once learned from the first epoch
    pub fn samples_per_epoch(&self) -> Option<usize> {
        self.samples_per_epoch
    }

    /// Configuration of the current (or last) epoch
    pub fn epoch_configuration(&self) -> &EpochConfiguration {
        &self.config
    }

    /// Instrumentation of the last finished epoch
    pub fn last_epoch_stats(&self) -> Option<&EpochStats> {
        self.last_epoch_stats.as_ref()
    }

    /// Run `op`, terminating the reader if it fails fatally
    fn guarded<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.lifecycle.check()?;
        op(self).map_err(|error| self.lifecycle.fail(error))
    }

    fn apply_configuration(&mut self, config: &ReaderConfiguration) -> Result<()> {
        if config.number_of_workers > 1 {
            return Err(Error::MultipleWorkers {
                workers: config.number_of_workers,
            });
        }

        self.open_buffers_if_needed(config.minibatch_size_in_samples)?;
        self.config = config.clone().into();
        Ok(())
    }

    fn open_buffers_if_needed(&mut self, minibatch_size: usize) -> Result<()> {
        if let Some(current) = self.minibatch_size() {
            if minibatch_size != 0 && minibatch_size != current {
                tracing::debug!(
                    requested = minibatch_size,
                    current,
                    "buffers are already sized; ignoring new minibatch size"
                );
            }
            return Ok(());
        }

        if minibatch_size == 0 {
            return Ok(());
        }

        self.buffers = self
            .streams
            .iter()
            .map(|stream| {
                SharedBuffer::open(
                    &self.options.mapping_dir,
                    &self.names.mapping(&stream.alias),
                    stream.sample_layout.num_elements(),
                    minibatch_size,
                )
            })
            .collect::<Result<_>>()?;

        tracing::debug!(minibatch_size, buffers = self.buffers.len(), "shared buffers opened");

        if self.lifecycle.state == ReaderState::Uninitialized {
            self.lifecycle.state = ReaderState::AwaitingEpochStart;
        }
        Ok(())
    }

    fn start_epoch_inner(&mut self, config: &EpochConfiguration) -> Result<()> {
        self.apply_configuration(&config.reader_configuration())?;
        if self.buffers.is_empty() {
            return Err(Error::InvalidState {
                operation: "start epoch",
                reason: "minibatch size is not known yet".into(),
            });
        }

        self.config = config.clone();
        if let (EpochSize::FullSweep, Some(total)) = (self.config.total_epoch_size, self.samples_per_epoch) {
            self.config.total_epoch_size = EpochSize::Samples(total);
        }

        self.samples_sent = 0;
        self.minibatches_sent = 0;
        self.timers.restart();
        self.next_progress_log = Instant::now() + self.options.progress_log_interval;

        if let Some(dump) = self.dump.as_mut() {
            dump.begin_epoch()?;
        }

        tracing::info!(epoch = self.config.epoch_index, "next epoch started");

        // Producer resets its cursors before any data is requested
        self.signals.reset_announce.set_signal()?;
        self.signals.reset_done.wait_for_signal()?;

        self.lifecycle.state = ReaderState::EpochActive;
        Ok(())
    }

    fn reposition(&mut self, position: usize) -> Result<()> {
        self.config.epoch_index = match (position, self.samples_per_epoch) {
            (0, _) => 0,
            (_, Some(total)) if total != 0 && position % total == 0 => position / total,
            (_, total) => {
                return Err(Error::MisalignedPosition {
                    position,
                    epoch_size: total.unwrap_or(0),
                })
            }
        };

        let config = self.config.clone();
        self.start_epoch_inner(&config)
    }

    /// One round trip; `None` once the epoch has ended
    fn receive_round(&mut self, global_sample_count: usize, local_sample_count: usize) -> Result<Option<usize>> {
        self.lifecycle.check()?;

        if global_sample_count == 0 {
            return Err(Error::ZeroSampleCount { which: "Global" });
        }
        if local_sample_count == 0 {
            return Err(Error::ZeroSampleCount { which: "Local" });
        }
        if self.lifecycle.state != ReaderState::EpochActive {
            return Err(Error::InvalidState {
                operation: "retrieve sequences",
                reason: format!("reader is {:?}", self.lifecycle.state),
            });
        }

        self.timers.reader_inclusive.start();
        self.timers.reader_exclusive.start();

        for buffer in &mut self.buffers {
            buffer.check_and_increment_expected_version()?;
        }

        self.timers.reader_exclusive.stop();
        self.signals.request.set_signal()?;
        self.signals.response.wait_for_signal()?;
        fence(Ordering::Acquire);
        self.timers.reader_exclusive.start();

        let mut agreed = None;
        for buffer in &self.buffers {
            buffer.verify_rows_written(&mut agreed)?;
        }
        let rows = agreed.map_or(0, |rows| rows as usize);
        self.samples_sent += rows;

        if rows == 0 {
            self.finish_epoch()?;
            return Ok(None);
        }

        if let Some(dump) = self.dump.as_mut() {
            let buffers = self
                .streams
                .iter()
                .map(|stream| stream.alias.as_str())
                .zip(self.buffers.iter());
            dump.write_round(buffers, rows)?;
        }

        self.log_progress(rows);
        self.minibatches_sent += 1;
        Ok(Some(rows))
    }

    fn finish_epoch(&mut self) -> Result<()> {
        self.timers.stop_round();
        self.timers.epoch.stop();
        self.lifecycle.state = ReaderState::AwaitingEpochStart;

        if let Some(dump) = self.dump.as_mut() {
            dump.end_epoch()?;
        }

        let stats = EpochStats {
            epoch_index: self.config.epoch_index,
            samples: self.samples_sent,
            minibatches: self.minibatches_sent,
            total: self.timers.epoch.elapsed(),
            reader_inclusive: self.timers.reader_inclusive.elapsed(),
            reader_exclusive: self.timers.reader_exclusive.elapsed(),
        };
        tracing::info!(
            epoch = stats.epoch_index,
            samples = stats.samples,
            minibatches = stats.minibatches,
            total_secs = stats.total.as_secs_f64(),
            reader_inclusive_secs = stats.reader_inclusive.as_secs_f64(),
            reader_inclusive_percent = stats.reader_inclusive_percent(),
            reader_exclusive_secs = stats.reader_exclusive.as_secs_f64(),
            reader_exclusive_percent = stats.reader_exclusive_percent(),
            "next epoch finished"
        );
        self.last_epoch_stats = Some(stats);

        let sent = self.samples_sent;
        match self.samples_per_epoch {
            None | Some(0) => {
                tracing::debug!(samples_per_epoch = sent, "learned epoch size");
                self.samples_per_epoch = Some(sent);
            }
            Some(baseline) if baseline != sent => {
                tracing::warn!(
                    observed = sent,
                    baseline,
                    "unexpected divergence in number of samples sent in this epoch compared to the first epoch"
                );

                let tolerance = self.options.epoch_size_tolerance;
                #[allow(clippy::cast_precision_loss)]
                let exceeded = sent.abs_diff(baseline) as f64 > tolerance * baseline as f64;
                if exceeded {
                    return Err(Error::EpochSizeDivergence {
                        observed: sent,
                        baseline,
                        tolerance_percent: tolerance * 100.0,
                    });
                }
            }
            Some(_) => {}
        }

        // Tell the producer the channel is drained
        self.signals.request.set_signal()
    }

    fn log_progress(&mut self, rows: usize) {
        let now = Instant::now();
        let short = self.minibatch_size().is_some_and(|size| rows < size);

        if now >= self.next_progress_log || short {
            tracing::debug!(
                minibatch = self.minibatches_sent,
                records = rows,
                "next minibatch received and translated"
            );
            self.next_progress_log = now + self.options.progress_log_interval;
        }
    }
}

/// Wrap the first `rows` rows of every buffer as sequence entries
fn convert_rows<'a>(
    streams: &[Arc<StreamDescription>],
    buffers: &'a [SharedBuffer],
    data_access: DataAccess,
    rows: usize,
) -> Result<Sequences<'a>> {
    let data = streams
        .iter()
        .zip(buffers)
        .map(|(stream, buffer)| {
            (0..rows)
                .map(|n| {
                    let layout = Arc::clone(&stream.sample_layout);
                    Ok(match data_access {
                        DataAccess::Borrowed => SequenceData::borrowed(layout, buffer.row(n)?),
                        DataAccess::Copied => SequenceData::owned(layout, buffer.row_copy(n)?),
                    })
                })
                .collect::<Result<Vec<_>>>()
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Sequences {
        data,
        end_of_epoch: false,
    })
}

impl SequenceEnumerator for SharedMemoryReader {
    type Error = Error;

    fn stream_descriptions(&self) -> Vec<Arc<StreamDescription>> {
        self.streams.clone()
    }

    fn start_epoch(&mut self, config: &EpochConfiguration) -> Result<()> {
        self.guarded(|reader| reader.start_epoch_inner(config))
    }

    fn set_configuration(&mut self, config: &ReaderConfiguration) -> Result<()> {
        self.guarded(|reader| reader.apply_configuration(config))
    }

    fn next_sequences(
        &mut self,
        global_sample_count: usize,
        local_sample_count: usize,
    ) -> Result<Sequences<'_>> {
        let rows = match self.receive_round(global_sample_count, local_sample_count) {
            Ok(Some(rows)) => rows,
            Ok(None) => return Ok(Sequences::end_of_epoch()),
            Err(error) => return Err(self.lifecycle.fail(error)),
        };

        let sequences = convert_rows(&self.streams, &self.buffers, self.options.data_access, rows);
        self.timers.stop_round();

        match sequences {
            Ok(sequences) => Ok(sequences),
            Err(error) => Err(self.lifecycle.fail(error)),
        }
    }

    fn set_current_sample_position(&mut self, position: usize) -> Result<()> {
        self.guarded(|reader| reader.reposition(position))
    }

    fn current_sample_position(&self) -> usize {
        self.samples_per_epoch
            .unwrap_or(0)
            .saturating_mul(self.config.epoch_index)
            .saturating_add(self.samples_sent)
    }
}

impl Drop for SharedMemoryReader {
    fn drop(&mut self) {
        if let Some(dump) = self.dump.as_mut() {
            if let Err(error) = dump.end_epoch() {
                tracing::warn!(path = %dump.path().display(), "closing diagnostic dump failed: {error}");
            }
        }
    }
}
