//! # hprof - In-Process Sampling Profiler with hprof Output
//!
//! A statistical call-stack sampler that periodically snapshots the stacks of
//! a set of threads, aggregates identical stacks into counted traces, and
//! serializes the result either as a binary `JAVA PROFILE 1.0.2` CPU-sampling
//! stream or as the classic hprof ASCII report.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                 Sampled threads (ThreadSet)                  │
//! │   ArrayThreadSet  |  GroupThreadSet<ThreadRegistry>          │
//! └──────────────────────────┬───────────────────────────────────┘
//!                            │ stacks, every tick
//!                            ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │  SamplingProfiler ── timer thread ──▶ SamplerCore::sample()  │
//! └──────────────────────────┬───────────────────────────────────┘
//!                            │ thread events, traces, counts
//!                            ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      HprofData (model)                       │
//! └──────┬──────────────────────────────────┬────────────────────┘
//!        ▼                                  ▼
//! ┌──────────────────┐  BinaryHprofReader  ┌──────────────────────┐
//! │ BinaryHprofWriter│ ◀─────────────────▶ │  AsciiHprofWriter    │
//! │  (binary)        │   (binary → model)  │  (export)            │
//! └──────────────────┘                     └──────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`domain`]: id newtypes and the error taxonomy
//! - [`model`]: frames, traces, thread events and the [`model::HprofData`] aggregator
//! - [`profiling`]: thread sources, the shadow-stack registry and the sampler
//! - [`binary`]: record tag table, binary writer and strict/lenient reader
//! - [`export`]: ASCII report
//! - [`cli`]: arguments for the `hprof` binary-to-ASCII converter
//!
//! ## Typical Usage
//!
//! ```rust,ignore
//! let registry = ThreadRegistry::new("main");
//! let mut profiler = SamplingProfiler::new(4, GroupThreadSet::new(registry.clone()))?;
//! profiler.start(10)?;
//! // ... instrumented work ...
//! profiler.stop()?;
//! BinaryHprofWriter::new(File::create("cpu.hprof")?).write(profiler.hprof_data()?)?;
//! ```

pub mod binary;
pub mod cli;
pub mod domain;
pub mod export;
pub mod model;
pub mod profiling;
