//! Error taxonomy for ring attach and the packet protocols.

use std::io;
use std::path::{Path, PathBuf};

/// Result type alias for ring operations
pub type Result<T> = std::result::Result<T, RingError>;

#[derive(Debug, thiserror::Error)]
pub enum RingError {
    /// The backing file could not be created, opened, sized or mapped.
    #[error("ring file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A structural header field disagrees with what this process was built/configured for.
    /// Nothing may be read or written through a ring that fails this check.
    #[error("ring integrity check failed on {field}: expected {expected:#x}, found {found:#x}")]
    Integrity {
        field: &'static str,
        expected: u64,
        found: u64,
    },

    /// The consumer did not drain within the flow-control timeout. The ring is unchanged.
    #[error("ring drain timeout after {waited_ns} ns (limit {timeout_ns} ns)")]
    BackpressureTimeout { waited_ns: u64, timeout_ns: u64 },

    #[error("payload of {len} bytes exceeds slot capacity of {capacity} bytes")]
    PayloadTooLarge { len: usize, capacity: usize },

    /// Receive storage cannot hold the pending record. The record stays queued.
    #[error("receive buffer of {len} bytes cannot hold {required} payload bytes")]
    BufferTooSmall { len: usize, required: usize },

    #[error("invalid ring configuration: {0}")]
    Config(String),
}

impl RingError {
    pub fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn integrity(field: &'static str, expected: u64, found: u64) -> Self {
        Self::Integrity {
            field,
            expected,
            found,
        }
    }

    /// True when two attached processes disagree about memory layout.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Integrity { .. })
    }
}
