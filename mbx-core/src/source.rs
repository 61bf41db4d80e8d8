//! Sequence source contract consumed by the minibatch packer

use std::borrow::Cow;
use std::sync::Arc;

use crate::schema::StreamDescription;
use crate::tensor::TensorShape;

/// Reader-level configuration handed down by the training loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderConfiguration {
    /// Number of distributed workers reading the same data
    pub number_of_workers: usize,

    /// Rank of this worker
    pub worker_rank: usize,

    /// Minibatch size in samples; 0 while unknown
    pub minibatch_size_in_samples: usize,
}

impl Default for ReaderConfiguration {
    fn default() -> Self {
        Self {
            number_of_workers: 1,
            worker_rank: 0,
            minibatch_size_in_samples: 0,
        }
    }
}

/// Number of samples an epoch is expected to span
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochSize {
    /// One full sweep over the data, whatever its size turns out to be
    FullSweep,

    /// No limit
    Unbounded,

    /// An explicit sample count
    Samples(usize),
}

/// Epoch-level configuration: reader configuration plus epoch bounds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpochConfiguration {
    /// Number of distributed workers reading the same data
    pub number_of_workers: usize,

    /// Rank of this worker
    pub worker_rank: usize,

    /// Minibatch size in samples; 0 while unknown
    pub minibatch_size_in_samples: usize,

    /// Expected size of the epoch
    pub total_epoch_size: EpochSize,

    /// Zero-based index of the epoch
    pub epoch_index: usize,
}

impl EpochConfiguration {
    /// Configuration for a full sweep at `epoch_index`
    pub fn full_sweep(minibatch_size_in_samples: usize, epoch_index: usize) -> Self {
        Self {
            number_of_workers: 1,
            worker_rank: 0,
            minibatch_size_in_samples,
            total_epoch_size: EpochSize::FullSweep,
            epoch_index,
        }
    }

    /// The reader-level part of this configuration
    pub fn reader_configuration(&self) -> ReaderConfiguration {
        ReaderConfiguration {
            number_of_workers: self.number_of_workers,
            worker_rank: self.worker_rank,
            minibatch_size_in_samples: self.minibatch_size_in_samples,
        }
    }
}

impl From<ReaderConfiguration> for EpochConfiguration {
    fn from(config: ReaderConfiguration) -> Self {
        Self {
            number_of_workers: config.number_of_workers,
            worker_rank: config.worker_rank,
            minibatch_size_in_samples: config.minibatch_size_in_samples,
            total_epoch_size: EpochSize::Unbounded,
            epoch_index: 0,
        }
    }
}

/// One dense sample of one stream.
///
/// The values are either borrowed from the channel's shared region, valid
/// until the next retrieval, or an owned copy that outlives it.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceData<'a> {
    sample_layout: Arc<TensorShape>,
    number_of_samples: usize,
    data: Cow<'a, [f32]>,
}

impl<'a> SequenceData<'a> {
    /// Wrap a borrowed row
    pub fn borrowed(sample_layout: Arc<TensorShape>, data: &'a [f32]) -> Self {
        Self {
            sample_layout,
            number_of_samples: 1,
            data: Cow::Borrowed(data),
        }
    }

    /// Wrap an owned copy of a row
    pub fn owned(sample_layout: Arc<TensorShape>, data: Vec<f32>) -> Self {
        Self {
            sample_layout,
            number_of_samples: 1,
            data: Cow::Owned(data),
        }
    }

    /// Layout of the sample
    pub fn sample_layout(&self) -> &Arc<TensorShape> {
        &self.sample_layout
    }

    /// Number of samples in this sequence
    pub fn number_of_samples(&self) -> usize {
        self.number_of_samples
    }

    /// The sample values
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Whether the values still point into the shared region
    pub fn is_borrowed(&self) -> bool {
        matches!(self.data, Cow::Borrowed(_))
    }

    /// Detach from the shared region, copying if necessary
    pub fn into_owned(self) -> SequenceData<'static> {
        SequenceData {
            sample_layout: self.sample_layout,
            number_of_samples: self.number_of_samples,
            data: Cow::Owned(self.data.into_owned()),
        }
    }
}

/// Result of one retrieval: per-stream rows plus the end-of-epoch flag
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Sequences<'a> {
    /// One vector per stream, each holding one entry per row
    pub data: Vec<Vec<SequenceData<'a>>>,

    /// Whether the epoch ended with this retrieval
    pub end_of_epoch: bool,
}

impl<'a> Sequences<'a> {
    /// An empty result marking the end of the epoch
    pub fn end_of_epoch() -> Self {
        Self {
            data: Vec::new(),
            end_of_epoch: true,
        }
    }

    /// Number of rows per stream
    pub fn num_rows(&self) -> usize {
        self.data.first().map_or(0, Vec::len)
    }

    /// Rows of stream `id`
    pub fn stream(&self, id: usize) -> Option<&[SequenceData<'a>]> {
        self.data.get(id).map(Vec::as_slice)
    }

    /// Detach every row from the shared region
    pub fn into_owned(self) -> Sequences<'static> {
        Sequences {
            data: self
                .data
                .into_iter()
                .map(|rows| rows.into_iter().map(SequenceData::into_owned).collect())
                .collect(),
            end_of_epoch: self.end_of_epoch,
        }
    }
}

/// A source of sequences driven by the packer, one epoch at a time
pub trait SequenceEnumerator {
    /// The error type produced by this source
    type Error: std::error::Error + Send + Sync + 'static;

    /// Describe the streams this source produces
    fn stream_descriptions(&self) -> Vec<Arc<StreamDescription>>;

    /// Start a new epoch
    fn start_epoch(&mut self, config: &EpochConfiguration) -> Result<(), Self::Error>;

    /// Apply a reader configuration
    fn set_configuration(&mut self, config: &ReaderConfiguration) -> Result<(), Self::Error>;

    /// Retrieve the next sequences, up to the given sample counts.
    ///
    /// Global counts cover all distributed workers; local counts cover this one.
    fn next_sequences(
        &mut self,
        global_sample_count: usize,
        local_sample_count: usize,
    ) -> Result<Sequences<'_>, Self::Error>;

    /// Move to a position in the global sample timeline
    fn set_current_sample_position(&mut self, position: usize) -> Result<(), Self::Error>;

    /// Current position in the global sample timeline
    fn current_sample_position(&self) -> usize;
}
