//! Domain model for hprof
//!
//! This module contains core domain types and errors that provide:
//! - Compile-time safety via newtype pattern
//! - Self-documenting function signatures
//! - Structured error handling

pub mod errors;
pub mod types;

pub(crate) use types::IdCounter;
pub use types::{ObjectId, StackTraceId, ThreadId};

pub use errors::{HprofError, ProfileError};
