//! Core traits, data structures, and abstractions for minibatch exchange
//!
//! This crate provides the foundational pieces shared by the producer and
//! consumer sides of a shared-memory minibatch channel: stream descriptions,
//! the byte layout of a channel buffer, read-only and writable memory
//! mappings, the sequence source contract, and timing instrumentation.

#![warn(missing_docs)]

pub mod error;
pub mod io;
pub mod layout;
pub mod schema;
pub mod source;
pub mod stopwatch;
pub mod tensor;

// Re-export key types for convenience
pub use error::{Error, Result};
pub use layout::BufferLayout;
pub use schema::{ElementType, StorageFormat, StreamDescription, StreamDescriptor};
pub use source::{
    EpochConfiguration, EpochSize, ReaderConfiguration, SequenceData, SequenceEnumerator, Sequences,
};
pub use stopwatch::StopWatch;
pub use tensor::TensorShape;
