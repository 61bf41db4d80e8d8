//! Shared-memory channel readers for minibatch exchange
//!
//! This crate implements the consumer side of a request/response protocol that
//! moves dense minibatches from an external producer process over named
//! memory-mapped buffers, coordinated by named cross-process signals. The
//! reader exposes the channel as a [`mbx_core::SequenceEnumerator`].

mod error;

pub mod loopback;
pub mod shared_memory;

pub use error::{Error, ErrorCategory, Result};
pub use shared_memory::{
    ChannelNames, CrossProcessSignal, DataAccess, EpochStats, ReaderState, SharedBuffer,
    SharedMemoryReader, SharedMemoryReaderOptions, SignalOpener,
};

#[cfg(unix)]
pub use shared_memory::{NamedSemaphore, NamedSemaphoreOpener};

// Re-export core types
pub use mbx_core::{
    EpochConfiguration, EpochSize, ReaderConfiguration, SequenceData, SequenceEnumerator,
    Sequences, StreamDescription, StreamDescriptor,
};
