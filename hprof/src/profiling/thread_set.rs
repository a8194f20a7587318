//! Thread enumeration
//!
//! The sampler does not know how to find threads or walk their stacks. A
//! [`ThreadSet`] hands it the threads to sample on every tick:
//!
//! - [`ArrayThreadSet`]: a fixed list
//! - [`GroupThreadSet`]: a live walk of a [`ThreadGroup`], retrying into a
//!   larger buffer whenever the enumeration fills it

use std::sync::Arc;

use log::{debug, warn};

use crate::model::StackFrame;

/// Upper bound on the enumeration buffer of a [`GroupThreadSet`]
pub const MAX_ENUMERATION_CAPACITY: usize = 1 << 16;

/// A thread the sampler can observe
pub trait SampledThread: Send + Sync {
    fn name(&self) -> Option<String>;

    fn group_name(&self) -> Option<String>;

    fn parent_group_name(&self) -> Option<String>;

    /// Current call stack, innermost frame first
    fn stack_trace(&self) -> Vec<StackFrame>;

    /// OS thread backing this thread, used to skip the sampler's own thread
    fn os_thread_id(&self) -> Option<std::thread::ThreadId> {
        None
    }
}

/// Shared handle to a sampled thread. Identity is the allocation.
pub type ThreadRef = Arc<dyn SampledThread>;

/// Source of the threads to sample.
///
/// The returned slice may be longer than the live thread count; the first
/// `None` ends the list.
pub trait ThreadSet: Send {
    fn threads(&mut self) -> &[Option<ThreadRef>];
}

/// A fixed set of threads
pub struct ArrayThreadSet {
    threads: Vec<Option<ThreadRef>>,
}

impl ArrayThreadSet {
    pub fn new(threads: impl IntoIterator<Item = ThreadRef>) -> Self {
        Self { threads: threads.into_iter().map(Some).collect() }
    }
}

impl ThreadSet for ArrayThreadSet {
    fn threads(&mut self) -> &[Option<ThreadRef>] {
        &self.threads
    }
}

/// A dynamic collection of threads that can be enumerated into a buffer
pub trait ThreadGroup: Send {
    /// Estimate of the live thread count
    fn active_count(&self) -> usize;

    /// Copy up to `buffer.len()` threads into `buffer`; returns how many
    /// were written
    fn enumerate(&self, buffer: &mut [Option<ThreadRef>]) -> usize;
}

/// Live walk of a [`ThreadGroup`]
pub struct GroupThreadSet<G: ThreadGroup> {
    group: G,
    threads: Vec<Option<ThreadRef>>,
    last_count: usize,
}

impl<G: ThreadGroup> GroupThreadSet<G> {
    pub fn new(group: G) -> Self {
        let mut set = Self { group, threads: Vec::new(), last_count: 0 };
        set.grow();
        set
    }

    /// Replace the buffer with one at least twice as large
    fn grow(&mut self) {
        let capacity = (self.group.active_count() * 2)
            .max(self.threads.len() * 2)
            .max(4)
            .min(MAX_ENUMERATION_CAPACITY);
        debug!("thread enumeration buffer: {} -> {capacity}", self.threads.len());
        self.threads = vec![None; capacity];
        self.last_count = 0;
    }
}

impl<G: ThreadGroup> ThreadSet for GroupThreadSet<G> {
    fn threads(&mut self) -> &[Option<ThreadRef>] {
        let count = loop {
            let count = self.group.enumerate(&mut self.threads);
            if count < self.threads.len() {
                break count;
            }
            if self.threads.len() >= MAX_ENUMERATION_CAPACITY {
                warn!("thread enumeration capped at {MAX_ENUMERATION_CAPACITY} threads");
                break count;
            }
            self.grow();
        };

        // Drop references to threads that were in the previous, longer list
        if count < self.last_count {
            self.threads[count..self.last_count].fill(None);
        }
        self.last_count = count;
        &self.threads
    }
}
