//! Error types for shared-memory channel readers

use std::fmt;
use std::io;

use thiserror::Error;

/// Error type for shared-memory channel readers.
///
/// Every protocol variant is fatal: once returned, the reader that produced
/// it refuses further work.
#[derive(Error, Debug)]
pub enum Error {
    /// Core library error
    #[error("Core error: {0}")]
    Core(#[from] mbx_core::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid reader options
    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    /// Unsupported stream or platform
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// A named signal does not exist
    #[error("Opening signal [{name}] failed: {source}")]
    SignalUnavailable {
        /// Signal name
        name: String,
        /// Underlying OS error
        source: io::Error,
    },

    /// Raising or waiting on a signal failed
    #[error("{operation} on signal [{name}] failed: {source}")]
    SignalFailed {
        /// Signal name
        name: String,
        /// The failing operation
        operation: &'static str,
        /// Underlying OS error
        source: io::Error,
    },

    /// A buffer was left behind by a run with a different minibatch size
    #[error("Shared buffer [{name}] has unexpected size info: {found}, expected: {expected}")]
    ReservedRowsMismatch {
        /// Buffer name
        name: String,
        /// Reserved rows found in the header
        found: u32,
        /// Reserved rows expected by this reader
        expected: usize,
    },

    /// A round was missed or duplicated
    #[error("Expected version of buffer [{name}]: {expected}. Actual: {actual}")]
    VersionMismatch {
        /// Buffer name
        name: String,
        /// Version the reader expected
        expected: u32,
        /// Version found in the buffer
        actual: u32,
    },

    /// The producer wrote more rows than the buffer holds
    #[error("Lines written into buffer [{name}]: {written}. Max capacity: {capacity}")]
    CapacityOverrun {
        /// Buffer name
        name: String,
        /// Rows reported by the producer
        written: u32,
        /// Reserved rows of the buffer
        capacity: usize,
    },

    /// Buffers of one round report different row counts
    #[error("Lines written into [{name}] buffer: {written}. Expected (other buffer read): {expected}")]
    RowCountDisagreement {
        /// Buffer name
        name: String,
        /// Rows reported by this buffer
        written: u32,
        /// Rows reported by the buffers read before it
        expected: u32,
    },

    /// Distributed reading was requested
    #[error("Number of workers: {workers}. Only single-worker reading is supported")]
    MultipleWorkers {
        /// Requested number of workers
        workers: usize,
    },

    /// A retrieval asked for zero samples
    #[error("{which} sample count must not be zero")]
    ZeroSampleCount {
        /// Which count was zero ("Global" or "Local")
        which: &'static str,
    },

    /// A reposition does not fall on an epoch boundary
    #[error("Attempt to set sample position to [{position}]. This is not aligned to samples count in single epoch: {epoch_size}")]
    MisalignedPosition {
        /// Requested position
        position: usize,
        /// Latched samples per epoch (0 if not yet known)
        epoch_size: usize,
    },

    /// The epoch size drifted beyond tolerance from the first epoch
    #[error("Unexpected divergence (over {tolerance_percent:.0}%) in number of samples sent in this epoch ({observed}) compared to number of samples sent in first epoch ({baseline})")]
    EpochSizeDivergence {
        /// Samples sent this epoch
        observed: usize,
        /// Samples sent in the first epoch
        baseline: usize,
        /// Allowed divergence in percent
        tolerance_percent: f64,
    },

    /// The operation is not valid in the reader's current state
    #[error("Cannot {operation}: {reason}")]
    InvalidState {
        /// The rejected operation
        operation: &'static str,
        /// Why it was rejected
        reason: String,
    },

    /// The reader already failed
    #[error("Reader is terminated after a fatal error: {0}")]
    Terminated(String),
}

/// Classification of errors by the stage at which they arise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// A named object or mapping cannot be opened, or has the wrong size
    Setup,

    /// Producer and consumer disagree about the protocol state
    Desync,

    /// The request itself is not allowed; checked before any I/O
    Policy,

    /// The per-epoch sample total drifted from the latched baseline
    Divergence,

    /// Failure of an underlying OS primitive or file
    Io,

    /// Operation out of order, or reader already terminated
    State,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::Setup => "setup",
            ErrorCategory::Desync => "desync",
            ErrorCategory::Policy => "policy",
            ErrorCategory::Divergence => "divergence",
            ErrorCategory::Io => "io",
            ErrorCategory::State => "state",
        };
        f.write_str(name)
    }
}

impl Error {
    /// Stage at which this error arose
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Core(
                mbx_core::Error::MappingUnavailable { .. }
                | mbx_core::Error::MappingTooSmall { .. }
                | mbx_core::Error::InvalidArgument(_)
                | mbx_core::Error::Unsupported(_),
            )
            | Error::InvalidOptions(_)
            | Error::Unsupported(_)
            | Error::SignalUnavailable { .. }
            | Error::ReservedRowsMismatch { .. } => ErrorCategory::Setup,
            Error::VersionMismatch { .. }
            | Error::CapacityOverrun { .. }
            | Error::RowCountDisagreement { .. } => ErrorCategory::Desync,
            Error::MultipleWorkers { .. }
            | Error::ZeroSampleCount { .. }
            | Error::MisalignedPosition { .. } => ErrorCategory::Policy,
            Error::EpochSizeDivergence { .. } => ErrorCategory::Divergence,
            Error::Core(_) | Error::Io(_) | Error::SignalFailed { .. } => ErrorCategory::Io,
            Error::InvalidState { .. } | Error::Terminated(_) => ErrorCategory::State,
        }
    }

    /// Whether the error ends the reader's run.
    ///
    /// Only an out-of-order call is refused without terminating the reader.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::InvalidState { .. })
    }
}

/// Result type for shared-memory channel readers
pub type Result<T> = std::result::Result<T, Error>;
