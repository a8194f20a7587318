//! Stack frames and stack traces
//!
//! A [`StackTrace`] is identified by its serial number but compared by
//! content: two captures of the same thread with the same frames are the same
//! stack. Lookups go through a [`TraceKey`], which the sampler owns and reuses
//! between ticks so that a hit costs no allocation.

use std::borrow::Borrow;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::domain::{StackTraceId, ThreadId};

/// Line number marking a native method
pub const NATIVE_METHOD_LINE: i32 = -2;

/// One call-stack frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StackFrame {
    pub class_name: String,
    pub method_name: String,
    pub file_name: Option<String>,
    pub line_number: i32,
}

impl StackFrame {
    pub fn new(
        class_name: impl Into<String>,
        method_name: impl Into<String>,
        file_name: Option<&str>,
        line_number: i32,
    ) -> Self {
        Self {
            class_name: class_name.into(),
            method_name: method_name.into(),
            file_name: file_name.map(str::to_string),
            line_number,
        }
    }

    #[must_use]
    pub fn is_native(&self) -> bool {
        self.line_number == NATIVE_METHOD_LINE
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.class_name, self.method_name)?;
        if self.is_native() {
            return f.write_str("(Native Method)");
        }
        match &self.file_name {
            Some(file) if self.line_number >= 0 => write!(f, "({file}:{})", self.line_number),
            Some(file) => write!(f, "({file})"),
            None => f.write_str("(Unknown Source)"),
        }
    }
}

/// Content of a stack trace: the thread it was captured on and its frames,
/// innermost first.
///
/// Equality and hashing cover both fields, which is what deduplication keys on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TraceKey {
    pub thread_id: ThreadId,
    pub frames: Vec<StackFrame>,
}

impl TraceKey {
    #[must_use]
    pub fn new(thread_id: ThreadId, frames: Vec<StackFrame>) -> Self {
        Self { thread_id, frames }
    }
}

/// A registered stack trace.
///
/// Compared and hashed by its [`TraceKey`] only, never by `stack_trace_id`,
/// so a `HashMap<StackTrace, _>` can be queried with a `&TraceKey`.
#[derive(Debug, Clone)]
pub struct StackTrace {
    pub stack_trace_id: StackTraceId,
    key: TraceKey,
}

impl StackTrace {
    #[must_use]
    pub fn new(stack_trace_id: StackTraceId, thread_id: ThreadId, frames: Vec<StackFrame>) -> Self {
        Self { stack_trace_id, key: TraceKey::new(thread_id, frames) }
    }

    /// Build an owned trace from a lookup key (clone-on-insert)
    #[must_use]
    pub fn from_key(stack_trace_id: StackTraceId, key: &TraceKey) -> Self {
        Self { stack_trace_id, key: key.clone() }
    }

    #[must_use]
    pub fn thread_id(&self) -> ThreadId {
        self.key.thread_id
    }

    #[must_use]
    pub fn frames(&self) -> &[StackFrame] {
        &self.key.frames
    }

    #[must_use]
    pub fn key(&self) -> &TraceKey {
        &self.key
    }

    /// The innermost frame, if any
    #[must_use]
    pub fn top_frame(&self) -> Option<&StackFrame> {
        self.key.frames.first()
    }
}

impl PartialEq for StackTrace {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for StackTrace {}

impl Hash for StackTrace {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl Borrow<TraceKey> for StackTrace {
    fn borrow(&self) -> &TraceKey {
        &self.key
    }
}

impl fmt::Display for StackTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "StackTrace[id={}, thread={}]", self.stack_trace_id, self.key.thread_id)?;
        for frame in &self.key.frames {
            writeln!(f, "\t{frame}")?;
        }
        Ok(())
    }
}
