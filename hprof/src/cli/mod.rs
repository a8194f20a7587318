//! Command-line interface of the converter

pub mod args;

pub use args::Args;
