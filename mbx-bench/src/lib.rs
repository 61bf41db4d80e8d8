//! Loopback benchmarks for the shared-memory minibatch exchange

use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use mbx_core::{EpochConfiguration, ReaderConfiguration, SequenceEnumerator, StreamDescriptor};
use mbx_readers::loopback::{unique_namespace, LocalSignalHub, LoopbackProducer, Minibatch};
use mbx_readers::{DataAccess, SharedMemoryReader, SharedMemoryReaderOptions};

/// Benchmark configuration
#[derive(Debug, Clone)]
pub struct BenchConfig {
    /// Number of measured epochs
    pub iterations: usize,

    /// Warmup epochs
    pub warmup_iterations: usize,

    /// Rows per minibatch (the reserved rows of every buffer)
    pub minibatch_size: usize,

    /// Full minibatches per epoch
    pub minibatches_per_epoch: usize,

    /// Row width of every stream
    pub stream_widths: Vec<usize>,

    /// Borrowed or copied rows
    pub data_access: DataAccess,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            iterations: 10,
            warmup_iterations: 2,
            minibatch_size: 256,
            minibatches_per_epoch: 64,
            stream_widths: vec![128, 1],
            data_access: DataAccess::Borrowed,
        }
    }
}

/// Benchmark result
#[derive(Debug, Clone)]
pub struct BenchResult {
    /// Name of the benchmark
    pub name: String,

    /// Total time taken
    pub total_time: Duration,

    /// Average time per epoch
    pub avg_time: Duration,

    /// Min time per epoch
    pub min_time: Duration,

    /// Max time per epoch
    pub max_time: Duration,

    /// Throughput (rows/second)
    pub throughput: f64,
}

/// Run `func` once per warmup and measured iteration; `func` returns the rows
/// it moved
pub fn run_benchmark<F>(name: &str, config: &BenchConfig, mut func: F) -> Result<BenchResult>
where
    F: FnMut() -> Result<usize>,
{
    for _ in 0..config.warmup_iterations {
        func()?;
    }

    let mut times = Vec::with_capacity(config.iterations);
    let mut total_rows = 0;
    let start_total = Instant::now();

    for _ in 0..config.iterations {
        let start = Instant::now();
        total_rows += func()?;
        times.push(start.elapsed());
    }

    let total_time = start_total.elapsed();
    let min_time = times.iter().min().copied().ok_or_else(|| anyhow!("no iterations measured"))?;
    let max_time = times.iter().max().copied().unwrap_or(min_time);
    let avg_time = total_time / u32::try_from(times.len()).context("too many iterations")?;

    #[allow(clippy::cast_precision_loss)]
    let throughput = total_rows as f64 / total_time.as_secs_f64();

    Ok(BenchResult {
        name: name.to_string(),
        total_time,
        avg_time,
        min_time,
        max_time,
        throughput,
    })
}

/// One reader and one in-process producer sharing a channel
pub struct LoopbackChannel {
    /// Holds the channel's mappings
    _dir: tempfile::TempDir,

    /// Signal registry of the channel
    pub hub: LocalSignalHub,

    /// Options the reader is built from
    pub options: SharedMemoryReaderOptions,
}

impl LoopbackChannel {
    /// A fresh channel in a temporary mapping directory
    pub fn new(stream_widths: &[usize], data_access: DataAccess) -> Result<Self> {
        let dir = tempfile::tempdir().context("creating mapping directory")?;
        let streams = stream_widths
            .iter()
            .enumerate()
            .map(|(i, &width)| StreamDescriptor::dense(format!("stream{i}"), format!("S{i}"), width))
            .collect();
        let options = SharedMemoryReaderOptions::new(unique_namespace(), streams)
            .with_mapping_dir(dir.path())
            .with_data_access(data_access);

        Ok(Self {
            _dir: dir,
            hub: LocalSignalHub::new(),
            options,
        })
    }

    /// Create the producer side, sized for `minibatch_size` rows
    pub fn producer(&self, minibatch_size: usize) -> Result<LoopbackProducer> {
        LoopbackProducer::create(&self.hub, &self.options, minibatch_size)
            .context("creating loopback producer")
    }

    /// Open the reader and size its buffers
    pub fn reader(&self, minibatch_size: usize) -> Result<SharedMemoryReader> {
        let mut reader = SharedMemoryReader::with_signal_opener(self.options.clone(), &self.hub)
            .context("opening shared-memory reader")?;
        reader.set_configuration(&ReaderConfiguration {
            minibatch_size_in_samples: minibatch_size,
            ..Default::default()
        })?;
        Ok(reader)
    }
}

/// Read one epoch to its end, returning the rows received
pub fn read_epoch(reader: &mut SharedMemoryReader, epoch_index: usize) -> Result<usize> {
    let minibatch_size = reader
        .minibatch_size()
        .ok_or_else(|| anyhow!("reader buffers are not open"))?;
    reader.start_epoch(&EpochConfiguration::full_sweep(minibatch_size, epoch_index))?;

    let mut rows = 0;
    loop {
        let batch = reader.next_sequences(minibatch_size, minibatch_size)?;
        if batch.end_of_epoch {
            return Ok(rows);
        }
        rows += batch.num_rows();
    }
}

/// Move epochs of synthetic minibatches through a loopback channel
pub fn bench_loopback(config: &BenchConfig) -> Result<BenchResult> {
    let channel = LoopbackChannel::new(&config.stream_widths, config.data_access)?;
    let epoch: Vec<Minibatch> = (0..config.minibatches_per_epoch)
        .map(|seed| Minibatch::synthetic(&config.stream_widths, config.minibatch_size, seed))
        .collect();
    let epochs = vec![epoch; config.warmup_iterations + config.iterations];

    let producer = channel.producer(config.minibatch_size)?.spawn(epochs);
    let mut reader = channel.reader(config.minibatch_size)?;

    let mut epoch_index = 0;
    let name = format!("Loopback epoch ({})", config.data_access);
    let result = run_benchmark(&name, config, || {
        let rows = read_epoch(&mut reader, epoch_index)?;
        epoch_index += 1;
        Ok(rows)
    })?;

    producer
        .join()
        .map_err(|_| anyhow!("loopback producer panicked"))?
        .context("loopback producer failed")?;

    tracing::debug!(epochs = epoch_index, "loopback benchmark finished");
    Ok(result)
}

/// Compare borrowed and copied row access under the same load
pub fn compare_data_access(config: &BenchConfig) -> Result<Vec<BenchResult>> {
    [DataAccess::Borrowed, DataAccess::Copied]
        .into_iter()
        .map(|data_access| {
            bench_loopback(&BenchConfig {
                data_access,
                ..config.clone()
            })
        })
        .collect()
}
