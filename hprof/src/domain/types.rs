//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers prevent common bugs like passing a stack trace id
//! where a thread id is expected. All three are 4-byte identifiers on the wire.

use std::fmt;

/// Synthetic thread id
///
/// Assigned by the sampler when a thread is first seen (or read back from a
/// START_THREAD record). This is NOT the OS thread id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(pub u32);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Synthetic object id of a thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u32);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stack trace serial number
///
/// Identifies one unique (thread, frames) stack. Two traces with the same
/// thread and frames but different ids are the same stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StackTraceId(pub u32);

impl fmt::Display for StackTraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic id allocator starting at a fixed seed
///
/// The seeds only make ids easy to tell apart in reports.
#[derive(Debug, Clone)]
pub(crate) struct IdCounter(u32);

impl IdCounter {
    pub(crate) const fn starting_at(seed: u32) -> Self {
        Self(seed)
    }

    pub(crate) fn next_id(&mut self) -> u32 {
        let id = self.0;
        self.0 = self.0.wrapping_add(1);
        id
    }
}
