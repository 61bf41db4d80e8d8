//! Stream descriptors: one per data column carried over a channel

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::tensor::TensorShape;

/// Element type of stream values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    /// 32-bit floating point
    Float32,

    /// 64-bit floating point
    Float64,
}

/// Storage format of stream samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageFormat {
    /// Dense row of values
    Dense,

    /// Compressed sparse column format
    SparseCsc,
}

impl fmt::Display for StorageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageFormat::Dense => write!(f, "dense"),
            StorageFormat::SparseCsc => write!(f, "sparse_csc"),
        }
    }
}

/// Configured description of a stream
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Stream name as seen by the network
    pub name: String,

    /// Short alias, used to name the stream's shared region
    pub alias: String,

    /// Number of values in one sample (the row width)
    pub sample_dimension: usize,

    /// Element type of the values
    #[serde(default = "default_element_type")]
    pub element_type: ElementType,

    /// Storage format of samples
    #[serde(default = "default_storage")]
    pub storage: StorageFormat,
}

fn default_element_type() -> ElementType {
    ElementType::Float32
}

fn default_storage() -> StorageFormat {
    StorageFormat::Dense
}

impl StreamDescriptor {
    /// Describe a dense float32 stream
    pub fn dense(name: impl Into<String>, alias: impl Into<String>, sample_dimension: usize) -> Self {
        Self {
            name: name.into(),
            alias: alias.into(),
            sample_dimension,
            element_type: ElementType::Float32,
            storage: StorageFormat::Dense,
        }
    }

    /// Check that the stream can be carried over a shared channel
    pub fn validate(&self) -> Result<()> {
        if self.alias.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "Stream [{}] has an empty alias",
                self.name
            )));
        }
        if self.sample_dimension == 0 {
            return Err(Error::InvalidArgument(format!(
                "Stream [{}] has zero sample dimension",
                self.alias
            )));
        }
        if self.storage != StorageFormat::Dense {
            return Err(Error::Unsupported(format!(
                "Stream [{}] uses {} storage; only dense samples are supported",
                self.alias, self.storage
            )));
        }
        if self.element_type != ElementType::Float32 {
            return Err(Error::Unsupported(format!(
                "Stream [{}] uses {:?} elements; only Float32 is supported",
                self.alias, self.element_type
            )));
        }
        Ok(())
    }
}

/// Immutable description of a stream produced by a sequence source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescription {
    /// Position of the stream in the source's output
    pub id: usize,

    /// Stream name
    pub name: String,

    /// Stream alias
    pub alias: String,

    /// Layout of a single sample
    pub sample_layout: Arc<TensorShape>,

    /// Element type of the values
    pub element_type: ElementType,

    /// Storage format of samples
    pub storage: StorageFormat,
}

impl StreamDescription {
    /// Derive the description of stream `id` from its descriptor
    pub fn from_descriptor(id: usize, descriptor: &StreamDescriptor) -> Self {
        Self {
            id,
            name: descriptor.name.clone(),
            alias: descriptor.alias.clone(),
            sample_layout: Arc::new(TensorShape::vector(descriptor.sample_dimension)),
            element_type: descriptor.element_type,
            storage: descriptor.storage,
        }
    }
}
