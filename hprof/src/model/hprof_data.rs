//! Sample aggregation
//!
//! [`HprofData`] is the aggregate root shared by the sampler, the binary codec
//! and the ASCII report. It owns:
//!
//! - the thread event history, in the order events were recorded
//! - one [`CountCell`] per unique stack trace
//!
//! ## Count cells
//!
//! Counts live in a dense `Vec<u32>`; a [`CountCell`] is an index into it.
//! Whoever registers a trace keeps the cell and bumps it directly, so a
//! repeated stack costs one lookup on first sight per tick and no rehashing
//! on increment. One allocation per *unique* stack, not per sample.
//!
//! ## Thread safety
//!
//! None internally. The sampler owns the data on its timer thread while
//! running and hands it back on stop; readers only see it while stopped.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use super::event::ThreadEvent;
use super::frame::{StackTrace, TraceKey};
use crate::domain::{ProfileError, ThreadId};

/// Handle to the sample counter of one registered stack trace.
///
/// Only valid for the [`HprofData`] that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CountCell(usize);

/// A stack trace paired with its sample count at snapshot time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample<'a> {
    pub stack_trace: &'a StackTrace,
    pub count: u32,
}

/// Aggregated profile: header fields, thread history and per-stack counts.
#[derive(Debug, Clone, Default)]
pub struct HprofData {
    start_millis: i64,
    flags: u32,
    depth: u32,
    thread_history: Vec<ThreadEvent>,
    /// Last event seen per thread id: `true` for START, `false` for END.
    thread_state: HashMap<ThreadId, bool>,
    stack_traces: HashMap<StackTrace, CountCell>,
    counts: Vec<u32>,
}

impl HprofData {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn start_millis(&self) -> i64 {
        self.start_millis
    }

    pub fn set_start_millis(&mut self, start_millis: i64) {
        self.start_millis = start_millis;
    }

    /// CONTROL_SETTINGS flags (see [`crate::binary::ControlSettings`])
    #[must_use]
    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn set_flags(&mut self, flags: u32) {
        self.flags = flags;
    }

    #[must_use]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn set_depth(&mut self, depth: u32) {
        self.depth = depth;
    }

    #[must_use]
    pub fn thread_history(&self) -> &[ThreadEvent] {
        &self.thread_history
    }

    /// Append a thread event to the history.
    ///
    /// A START while the same id is still started fails, as does an END
    /// directly following another END. An END with no START on record is
    /// accepted: threads may already be running when profiling begins.
    ///
    /// # Errors
    /// [`ProfileError::DuplicateThreadStart`] or [`ProfileError::DuplicateThreadEnd`]
    pub fn add_thread_event(&mut self, event: ThreadEvent) -> Result<(), ProfileError> {
        let thread_id = event.thread_id();
        let is_start = event.is_start();
        match (self.thread_state.get(&thread_id), is_start) {
            (Some(true), true) => return Err(ProfileError::DuplicateThreadStart(thread_id)),
            (Some(false), false) => return Err(ProfileError::DuplicateThreadEnd(thread_id)),
            _ => {}
        }
        self.thread_state.insert(thread_id, is_start);
        self.thread_history.push(event);
        Ok(())
    }

    /// Register a new unique stack trace with a zero count.
    ///
    /// # Errors
    /// [`ProfileError::UnknownThread`] if no event was recorded for the
    /// trace's thread, [`ProfileError::DuplicateStackTrace`] if a trace with
    /// the same thread and frames is already registered.
    pub fn add_stack_trace(&mut self, stack_trace: StackTrace) -> Result<CountCell, ProfileError> {
        if !self.thread_state.contains_key(&stack_trace.thread_id()) {
            return Err(ProfileError::UnknownThread(stack_trace.thread_id()));
        }
        let id = stack_trace.stack_trace_id;
        match self.stack_traces.entry(stack_trace) {
            Entry::Occupied(_) => Err(ProfileError::DuplicateStackTrace(id)),
            Entry::Vacant(slot) => {
                let cell = CountCell(self.counts.len());
                self.counts.push(0);
                slot.insert(cell);
                Ok(cell)
            }
        }
    }

    /// Find the count cell of an already registered stack
    #[must_use]
    pub fn lookup(&self, key: &TraceKey) -> Option<CountCell> {
        self.stack_traces.get(key).copied()
    }

    /// Current count of a cell.
    ///
    /// # Panics
    /// If `cell` was issued by a different [`HprofData`] with fewer traces
    #[must_use]
    pub fn count(&self, cell: CountCell) -> u32 {
        self.counts[cell.0]
    }

    /// # Panics
    /// If `cell` was issued by a different [`HprofData`] with fewer traces
    pub fn set_count(&mut self, cell: CountCell, count: u32) {
        self.counts[cell.0] = count;
    }

    /// Add `by` samples to a cell.
    ///
    /// # Errors
    /// [`ProfileError::SampleCountOverflow`] if the count would exceed `u32::MAX`
    ///
    /// # Panics
    /// If `cell` was issued by a different [`HprofData`] with fewer traces
    pub fn increment(&mut self, cell: CountCell, by: u32) -> Result<u32, ProfileError> {
        let slot = &mut self.counts[cell.0];
        *slot = slot.checked_add(by).ok_or(ProfileError::SampleCountOverflow)?;
        Ok(*slot)
    }

    /// Number of unique stack traces registered
    #[must_use]
    pub fn stack_trace_count(&self) -> usize {
        self.stack_traces.len()
    }

    /// Snapshot of every registered trace with its current count.
    ///
    /// Order is unspecified.
    #[must_use]
    pub fn samples(&self) -> Vec<Sample<'_>> {
        self.stack_traces
            .iter()
            .map(|(stack_trace, cell)| Sample { stack_trace, count: self.count(*cell) })
            .collect()
    }

    /// Sum of all sample counts, as written to CPU_SAMPLES and the ASCII summary.
    ///
    /// # Errors
    /// [`ProfileError::SampleCountOverflow`] if the sum does not fit in 4 bytes
    pub fn total_samples(&self) -> Result<u32, ProfileError> {
        self.counts.iter().try_fold(0u32, |total, &count| {
            total.checked_add(count).ok_or(ProfileError::SampleCountOverflow)
        })
    }
}

/// Structural equality: header fields, history, and the multiset of
/// (thread, frames, count). Stack trace ids are ignored.
impl PartialEq for HprofData {
    fn eq(&self, other: &Self) -> bool {
        self.start_millis == other.start_millis
            && self.flags == other.flags
            && self.depth == other.depth
            && self.thread_history == other.thread_history
            && self.stack_traces.len() == other.stack_traces.len()
            && self.stack_traces.iter().all(|(trace, cell)| {
                other.lookup(trace.key()).is_some_and(|theirs| other.count(theirs) == self.count(*cell))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ObjectId, StackTraceId};
    use crate::model::StackFrame;

    #[test]
    #[should_panic(expected = "index out of bounds")]
    fn test_cell_from_other_data_panics() {
        let mut other = HprofData::new();
        other
            .add_thread_event(ThreadEvent::start(ObjectId(1), ThreadId(1), None, None, None))
            .unwrap();
        let cell = other
            .add_stack_trace(StackTrace::new(
                StackTraceId(1),
                ThreadId(1),
                vec![StackFrame::new("Main", "main", None, 1)],
            ))
            .unwrap();

        let _ = HprofData::new().count(cell);
    }

    fn started(thread_id: u32) -> HprofData {
        let mut data = HprofData::new();
        data.add_thread_event(ThreadEvent::start(
            ObjectId(1),
            ThreadId(thread_id),
            Some("worker".to_string()),
            Some("main".to_string()),
            None,
        ))
        .unwrap();
        data
    }

    fn trace(id: u32, thread_id: u32) -> StackTrace {
        StackTrace::new(
            StackTraceId(id),
            ThreadId(thread_id),
            vec![StackFrame::new("Foo", "bar", Some("Foo.java"), 12)],
        )
    }

    #[test]
    fn test_duplicate_start_fails() {
        let mut data = started(1);
        let err = data
            .add_thread_event(ThreadEvent::start(ObjectId(2), ThreadId(1), None, None, None))
            .unwrap_err();
        assert!(matches!(err, ProfileError::DuplicateThreadStart(ThreadId(1))));
        assert_eq!(data.thread_history().len(), 1);
    }

    #[test]
    fn test_unmatched_end_is_allowed_but_duplicate_end_fails() {
        let mut data = HprofData::new();
        data.add_thread_event(ThreadEvent::end(ThreadId(9))).unwrap();
        let err = data.add_thread_event(ThreadEvent::end(ThreadId(9))).unwrap_err();
        assert!(matches!(err, ProfileError::DuplicateThreadEnd(ThreadId(9))));
    }

    #[test]
    fn test_restart_after_end_is_allowed() {
        let mut data = started(1);
        data.add_thread_event(ThreadEvent::end(ThreadId(1))).unwrap();
        data.add_thread_event(ThreadEvent::start(ObjectId(3), ThreadId(1), None, None, None))
            .unwrap();
        assert_eq!(data.thread_history().len(), 3);
    }

    #[test]
    fn test_stack_trace_requires_known_thread() {
        let mut data = HprofData::new();
        let err = data.add_stack_trace(trace(1, 42)).unwrap_err();
        assert!(matches!(err, ProfileError::UnknownThread(ThreadId(42))));
    }

    #[test]
    fn test_identical_stack_resolves_to_same_cell_and_rejects_reinsert() {
        let mut data = started(1);
        let cell = data.add_stack_trace(trace(10, 1)).unwrap();
        assert_eq!(data.lookup(trace(11, 1).key()), Some(cell));

        let err = data.add_stack_trace(trace(11, 1)).unwrap_err();
        assert!(matches!(err, ProfileError::DuplicateStackTrace(StackTraceId(11))));
        assert_eq!(data.stack_trace_count(), 1);
    }

    #[test]
    fn test_samples_snapshot_counts() {
        let mut data = started(1);
        let cell = data.add_stack_trace(trace(10, 1)).unwrap();
        data.increment(cell, 1).unwrap();
        data.increment(cell, 2).unwrap();

        let samples = data.samples();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].count, 3);
        assert_eq!(samples[0].stack_trace.stack_trace_id, StackTraceId(10));
        assert_eq!(data.total_samples().unwrap(), 3);
    }

    #[test]
    fn test_increment_overflow() {
        let mut data = started(1);
        let cell = data.add_stack_trace(trace(10, 1)).unwrap();
        data.set_count(cell, u32::MAX);
        assert!(matches!(data.increment(cell, 1), Err(ProfileError::SampleCountOverflow)));
    }

    #[test]
    fn test_equality_ignores_stack_trace_ids() {
        let mut a = started(1);
        let cell = a.add_stack_trace(trace(10, 1)).unwrap();
        a.set_count(cell, 4);

        let mut b = started(1);
        let cell = b.add_stack_trace(trace(99, 1)).unwrap();
        b.set_count(cell, 4);
        assert_eq!(a, b);

        b.set_count(cell, 5);
        assert_ne!(a, b);
    }
}
