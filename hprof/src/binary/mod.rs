//! # Binary hprof format
//!
//! Stream layout:
//!
//! ```text
//! "JAVA PROFILE 1.0.2\0"   magic + version, NUL terminated
//! u32                      identifier size (always 4 here)
//! i64                      start time, epoch millis
//! record*                  until EOF
//!
//! record:
//!   u8   tag
//!   u32  time delta in microseconds (written as 0, ignored on read)
//!   u32  payload length
//!   ...  payload
//! ```
//!
//! All integers are big-endian. Strings, classes and stack frames are
//! interned: each is written once under a fresh id and referenced by id
//! afterwards. Id 0 means "absent".
//!
//! Record size bounds are data, not control flow: see [`RECORD_SIZES`].

pub mod reader;
pub mod writer;

use std::fmt;
use std::io::Read;

use crate::domain::HprofError;

pub use reader::BinaryHprofReader;
pub use writer::BinaryHprofWriter;

/// Prefix every supported header starts with
pub const MAGIC: &str = "JAVA PROFILE ";

/// Version written by [`BinaryHprofWriter`]
pub const VERSION: &str = "1.0.2";

/// Size in bytes of every identifier in the stream
pub const ID_SIZE: u32 = 4;

/// Longest header string scanned for before giving up
pub const MAX_MAGIC_LENGTH: usize = 512;

/// CONTROL_SETTINGS flag bits
pub struct ControlSettings;

impl ControlSettings {
    pub const ALLOC_TRACES: u32 = 0x01;
    pub const CPU_SAMPLING: u32 = 0x02;
}

/// Record tags understood by the codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Tag {
    StringInUtf8 = 0x01,
    LoadClass = 0x02,
    UnloadClass = 0x03,
    StackFrame = 0x04,
    StackTrace = 0x05,
    AllocSites = 0x06,
    HeapSummary = 0x07,
    StartThread = 0x0a,
    EndThread = 0x0b,
    HeapDump = 0x0c,
    CpuSamples = 0x0d,
    ControlSettings = 0x0e,
    HeapDumpSegment = 0x1c,
    HeapDumpEnd = 0x2c,
}

/// Allowed payload length of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordSize {
    /// Fixed-shape record
    Exact(u32),
    /// Variable-length record with a fixed prefix
    AtLeast(u32),
}

impl RecordSize {
    #[must_use]
    pub fn minimum(self) -> u32 {
        match self {
            RecordSize::Exact(n) | RecordSize::AtLeast(n) => n,
        }
    }
}

/// Size bounds per tag. Adding a tag only means adding a row here.
pub const RECORD_SIZES: [(Tag, RecordSize); 14] = [
    (Tag::StringInUtf8, RecordSize::AtLeast(ID_SIZE)),
    (Tag::LoadClass, RecordSize::Exact(4 + ID_SIZE + 4 + ID_SIZE)),
    (Tag::UnloadClass, RecordSize::Exact(4)),
    (Tag::StackFrame, RecordSize::Exact(ID_SIZE * 4 + 4 + 4)),
    (Tag::StackTrace, RecordSize::AtLeast(4 + 4 + 4)),
    (Tag::AllocSites, RecordSize::AtLeast(0)),
    (Tag::HeapSummary, RecordSize::Exact(4 + 4 + 8 + 8)),
    (Tag::StartThread, RecordSize::Exact(4 + ID_SIZE + 4 + ID_SIZE * 3)),
    (Tag::EndThread, RecordSize::Exact(4)),
    (Tag::HeapDump, RecordSize::AtLeast(0)),
    (Tag::HeapDumpSegment, RecordSize::AtLeast(0)),
    (Tag::HeapDumpEnd, RecordSize::AtLeast(0)),
    (Tag::CpuSamples, RecordSize::AtLeast(4 + 4)),
    (Tag::ControlSettings, RecordSize::Exact(4 + 2)),
];

impl Tag {
    /// Look up a tag byte; `None` for tags this codec does not know
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Tag> {
        RECORD_SIZES.iter().map(|(tag, _)| *tag).find(|tag| *tag as u8 == byte)
    }

    #[must_use]
    pub fn size(self) -> RecordSize {
        RECORD_SIZES
            .iter()
            .find(|(tag, _)| *tag == self)
            .map_or(RecordSize::AtLeast(0), |(_, size)| *size)
    }

    /// Payload length for a fixed-shape record, or the fixed prefix of a
    /// variable one
    #[must_use]
    pub fn base_length(self) -> u32 {
        self.size().minimum()
    }

    /// Validate a record length against this tag's bounds.
    ///
    /// # Errors
    /// Returns a description of the expected vs. actual length
    pub fn check_size(self, length: u32) -> Result<(), String> {
        let size = self.size();
        if length < size.minimum() {
            return Err(format!(
                "Expected {self} record length to be at least {} but was {length}",
                size.minimum()
            ));
        }
        match size {
            RecordSize::Exact(max) if length > max => Err(format!(
                "Expected {self} record length to be at most {max} but was {length}"
            )),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tag::StringInUtf8 => "STRING_IN_UTF8",
            Tag::LoadClass => "LOAD_CLASS",
            Tag::UnloadClass => "UNLOAD_CLASS",
            Tag::StackFrame => "STACK_FRAME",
            Tag::StackTrace => "STACK_TRACE",
            Tag::AllocSites => "ALLOC_SITES",
            Tag::HeapSummary => "HEAP_SUMMARY",
            Tag::StartThread => "START_THREAD",
            Tag::EndThread => "END_THREAD",
            Tag::HeapDump => "HEAP_DUMP",
            Tag::CpuSamples => "CPU_SAMPLES",
            Tag::ControlSettings => "CONTROL_SETTINGS",
            Tag::HeapDumpSegment => "HEAP_DUMP_SEGMENT",
            Tag::HeapDumpEnd => "HEAP_DUMP_END",
        };
        f.write_str(name)
    }
}

/// Read the NUL-terminated header string.
///
/// Scans at most [`MAX_MAGIC_LENGTH`] bytes and requires the [`MAGIC`] prefix.
///
/// # Errors
/// [`HprofError::Malformed`] if no terminator is found or the prefix is wrong,
/// [`HprofError::Io`] if the stream ends first.
pub fn read_magic<R: Read>(input: &mut R) -> Result<String, HprofError> {
    let mut bytes = Vec::with_capacity(32);
    let mut byte = [0u8; 1];
    loop {
        if bytes.len() == MAX_MAGIC_LENGTH {
            return Err(HprofError::Malformed(format!(
                "Could not find HPROF magic within {MAX_MAGIC_LENGTH} bytes"
            )));
        }
        input.read_exact(&mut byte)?;
        if byte[0] == 0 {
            break;
        }
        bytes.push(byte[0]);
    }
    let magic = String::from_utf8(bytes)
        .map_err(|_| HprofError::Malformed("HPROF magic is not valid UTF-8".to_string()))?;
    if !magic.starts_with(MAGIC) {
        return Err(HprofError::Malformed(format!("Unexpected HPROF magic: {magic:?}")));
    }
    Ok(magic)
}
