//! Error types returned by memory resources.

use std::io;
use std::time::Duration;

use thiserror::Error;

use super::config::SegmentName;
use crate::runtime::RuntimeError;

/// Why an allocation failed.
///
/// A zero-byte request is never an error; it returns `Ok(None)`.
#[derive(Debug, Error)]
pub enum AllocError {
    /// The device runtime refused an allocation or registration.
    #[error("device runtime {op} failed: {source}")]
    Runtime {
        op: &'static str,
        #[source]
        source: RuntimeError,
    },

    /// The leader could not create the named segment.
    #[error("failed to create shared segment {name}: {source}")]
    SegmentCreate {
        name: SegmentName,
        #[source]
        source: io::Error,
    },

    /// The leader found the name already taken.
    #[error("shared segment {name} already exists")]
    SegmentExists { name: SegmentName },

    /// A follower failed to open the segment for a reason other than absence.
    #[error("failed to open shared segment {name}: {source}")]
    SegmentOpen {
        name: SegmentName,
        #[source]
        source: io::Error,
    },

    /// The leader could not size the segment.
    #[error("failed to size shared segment {name} to {bytes} bytes: {source}")]
    SegmentResize {
        name: SegmentName,
        bytes: usize,
        #[source]
        source: io::Error,
    },

    /// Mapping the segment failed.
    #[error("failed to map {bytes} bytes of shared segment {name}: {source}")]
    SegmentMap {
        name: SegmentName,
        bytes: usize,
        #[source]
        source: io::Error,
    },

    /// The request plus the control header does not fit in the address space.
    #[error("allocation of {bytes} bytes overflows the address space")]
    SizeOverflow { bytes: usize },

    /// A follower gave up waiting for the leader to publish the segment.
    #[error("timed out after {waited:?} waiting for rank 0 to publish shared segment {name}")]
    BootstrapTimeout { name: SegmentName, waited: Duration },

    /// A follower asked for a different length than the leader published.
    #[error("shared segment {name} holds {found} bytes but {expected} were requested")]
    SizeMismatch {
        name: SegmentName,
        expected: usize,
        found: usize,
    },
}

impl AllocError {
    pub(crate) fn runtime(op: &'static str, source: RuntimeError) -> Self {
        AllocError::Runtime { op, source }
    }
}

/// A memory-info query failed.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("memory info query failed: {0}")]
    Runtime(#[from] RuntimeError),
}

/// Invalid configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid shared segment name {name:?}: {reason}")]
    InvalidSegmentName { name: String, reason: &'static str },

    #[error("environment variable {0} is not set")]
    MissingEnv(&'static str),

    #[error("environment variable {var} has invalid value {value:?}")]
    InvalidEnv { var: &'static str, value: String },
}
