//! Profile data model
//!
//! Value types for frames, traces and thread events, plus the [`HprofData`]
//! aggregator the sampler fills and the writers consume.

pub mod event;
pub mod frame;
pub mod hprof_data;

pub use event::ThreadEvent;
pub use frame::{StackFrame, StackTrace, TraceKey, NATIVE_METHOD_LINE};
pub use hprof_data::{CountCell, HprofData, Sample};
