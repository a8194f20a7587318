//! Report export
//!
//! Human-readable renderings of profile data. The binary format lives in
//! [`crate::binary`].

pub mod ascii;

pub use ascii::AsciiHprofWriter;
