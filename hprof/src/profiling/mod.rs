//! Stack sampling
//!
//! - `thread_set`: where the threads to sample come from
//! - `registry`: an in-process thread group with shadow stacks
//! - `sampler`: per-tick capture and the timer-driven profiler

pub mod registry;
pub mod sampler;
pub mod thread_set;

pub use registry::{FrameGuard, RegisteredThread, ThreadRegistration, ThreadRegistry};
pub use sampler::{SamplerCore, SamplingProfiler};
pub use thread_set::{
    ArrayThreadSet, GroupThreadSet, SampledThread, ThreadGroup, ThreadRef, ThreadSet,
    MAX_ENUMERATION_CAPACITY,
};
