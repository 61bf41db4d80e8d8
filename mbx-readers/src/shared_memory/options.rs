//! Options and naming for shared-memory channels

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use mbx_core::StreamDescriptor;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Prefix of the signal raised by the consumer to request a round
pub const REQUEST_SIGNAL_PREFIX: &str = "bufferRequestEvent_";

/// Prefix of the signal raised by the producer once a round is published
pub const RESPONSE_SIGNAL_PREFIX: &str = "bufferResponseEvent_";

/// Prefix of the signal raised by the consumer at epoch start
pub const RESET_ANNOUNCE_SIGNAL_PREFIX: &str = "resetAnnounceEvent_";

/// Prefix of the signal raised by the producer once it has reset
pub const RESET_DONE_SIGNAL_PREFIX: &str = "resetDoneEvent_";

/// Prefix of per-stream mapping names
pub const MAPPING_PREFIX: &str = "mmf_";

/// How rows are handed to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataAccess {
    /// Rows borrow the mapped region and are valid until the next retrieval
    #[default]
    Borrowed,

    /// Rows are copied out and outlive the round
    Copied,
}

impl fmt::Display for DataAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataAccess::Borrowed => f.write_str("zero-copy"),
            DataAccess::Copied => f.write_str("copy"),
        }
    }
}

/// Options for the shared-memory channel reader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SharedMemoryReaderOptions {
    /// Channel namespace shared with the producer
    pub namespace: String,

    /// Streams carried by the channel, in buffer order
    pub streams: Vec<StreamDescriptor>,

    /// Borrowed or copied rows
    pub data_access: DataAccess,

    /// Directory holding the named mappings
    pub mapping_dir: PathBuf,

    /// Plain-text dump of every row received, if set
    pub diagnostic_dump: Option<PathBuf>,

    /// Minimum interval between progress log lines
    pub progress_log_interval: Duration,

    /// Allowed relative drift of the per-epoch sample total
    pub epoch_size_tolerance: f64,
}

impl Default for SharedMemoryReaderOptions {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            streams: Vec::new(),
            data_access: DataAccess::default(),
            mapping_dir: default_mapping_dir(),
            diagnostic_dump: None,
            progress_log_interval: Duration::from_secs(5),
            epoch_size_tolerance: 0.10,
        }
    }
}

impl SharedMemoryReaderOptions {
    /// Options for `streams` on channel `namespace`, everything else default
    pub fn new(namespace: impl Into<String>, streams: Vec<StreamDescriptor>) -> Self {
        Self {
            namespace: namespace.into(),
            streams,
            ..Default::default()
        }
    }

    /// Set the data access mode
    pub fn with_data_access(mut self, data_access: DataAccess) -> Self {
        self.data_access = data_access;
        self
    }

    /// Set the mapping directory
    pub fn with_mapping_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.mapping_dir = dir.into();
        self
    }

    /// Enable the diagnostic dump
    pub fn with_diagnostic_dump(mut self, path: impl Into<PathBuf>) -> Self {
        self.diagnostic_dump = Some(path.into());
        self
    }

    /// Channel object names derived from the namespace
    pub fn names(&self) -> ChannelNames {
        ChannelNames::new(&self.namespace)
    }

    /// Reject options the reader cannot serve
    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(Error::InvalidOptions("Channel namespace must not be empty".into()));
        }

        check_name_part("Channel namespace", &self.namespace)?;

        if self.streams.is_empty() {
            return Err(Error::InvalidOptions("At least one stream is required".into()));
        }

        let mut aliases = HashSet::new();
        for stream in &self.streams {
            stream.validate()?;
            check_name_part("Stream alias", &stream.alias)?;
            if !aliases.insert(stream.alias.as_str()) {
                return Err(Error::InvalidOptions(format!(
                    "Stream alias [{}] is used more than once",
                    stream.alias
                )));
            }
        }

        if !(0.0..=1.0).contains(&self.epoch_size_tolerance) {
            return Err(Error::InvalidOptions(format!(
                "Epoch size tolerance must be within [0, 1], got {}",
                self.epoch_size_tolerance
            )));
        }

        if self.data_access == DataAccess::Borrowed && cfg!(target_endian = "big") {
            return Err(Error::Unsupported(
                "Zero-copy access requires a little-endian host".into(),
            ));
        }

        Ok(())
    }
}

/// Names become semaphore names and file names under the mapping directory
fn check_name_part(what: &str, value: &str) -> Result<()> {
    if value.contains(['/', '\0']) {
        return Err(Error::InvalidOptions(format!(
            "{what} [{}] must not contain '/' or NUL",
            value.escape_debug()
        )));
    }
    Ok(())
}

/// Default directory of named mappings
pub fn default_mapping_dir() -> PathBuf {
    if cfg!(target_os = "linux") {
        PathBuf::from("/dev/shm")
    } else {
        std::env::temp_dir()
    }
}

/// Names of the objects making up one channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelNames {
    namespace: String,

    /// Consumer-to-producer round request
    pub request: String,

    /// Producer-to-consumer round response
    pub response: String,

    /// Consumer-to-producer epoch start
    pub reset_announce: String,

    /// Producer-to-consumer reset acknowledgement
    pub reset_done: String,
}

impl ChannelNames {
    /// Names for channel `namespace`
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            request: format!("{REQUEST_SIGNAL_PREFIX}{namespace}"),
            response: format!("{RESPONSE_SIGNAL_PREFIX}{namespace}"),
            reset_announce: format!("{RESET_ANNOUNCE_SIGNAL_PREFIX}{namespace}"),
            reset_done: format!("{RESET_DONE_SIGNAL_PREFIX}{namespace}"),
        }
    }

    /// Mapping name of the stream with `alias`
    pub fn mapping(&self, alias: &str) -> String {
        format!("{MAPPING_PREFIX}{alias}_{}", self.namespace)
    }

    /// The channel namespace
    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}
