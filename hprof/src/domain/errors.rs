//! Structured error types for hprof
//!
//! Using thiserror for automatic Display implementation and error chaining.

use super::types::{StackTraceId, ThreadId};
use thiserror::Error;

/// Configuration errors, protocol violations and lifecycle misuse.
#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("interval < 1: {0}ms")]
    InvalidInterval(u64),

    #[error("depth < 1: {0}")]
    InvalidDepth(u32),

    #[error("depth too large for binary hprof: {0} > {max}", max = i16::MAX)]
    DepthTooLarge(u32),

    #[error("ThreadEvent already registered for id {0}")]
    DuplicateThreadStart(ThreadId),

    #[error("Duplicate ThreadEvent.end for id {0}")]
    DuplicateThreadEnd(ThreadId),

    #[error("Unknown thread id {0}")]
    UnknownThread(ThreadId),

    #[error("StackTrace already registered for id {0}")]
    DuplicateStackTrace(StackTraceId),

    #[error("Thread {0:?} is not tracked by the sampler")]
    UntrackedThread(String),

    #[error("Sample count overflow: total exceeds {max}", max = u32::MAX)]
    SampleCountOverflow,

    #[error("Failed to spawn sampler timer thread")]
    TimerSpawn(#[source] std::io::Error),

    #[error("{0}")]
    IllegalState(&'static str),
}

/// Failures while encoding or decoding a binary hprof stream.
#[derive(Error, Debug)]
pub enum HprofError {
    #[error("malformed hprof: {0}")]
    Malformed(String),

    #[error("Expected to skip {expected} bytes but only skipped {skipped} bytes")]
    Truncated { expected: u64, skipped: u64 },

    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl HprofError {
    /// Returns true for the malformed-input category
    #[must_use]
    pub fn is_malformed(&self) -> bool {
        matches!(self, HprofError::Malformed(_))
    }
}
