//! In-process thread registry with shadow stacks
//!
//! Rust cannot walk another thread's stack portably, so instrumented threads
//! publish their own: a thread registers once, then every instrumented scope
//! pushes a frame with an RAII [`FrameGuard`] that pops it on any exit path.
//! The sampler reads each registered thread's shadow stack through
//! [`SampledThread::stack_trace`].
//!
//! ```rust,ignore
//! let registry = ThreadRegistry::new("workers");
//! let registration = registry.register("worker-1");
//! let _frame = registration.enter(StackFrame::new("app::Worker", "run", Some("worker.rs"), 42));
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::debug;

use super::thread_set::{SampledThread, ThreadGroup, ThreadRef};
use crate::model::StackFrame;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A named group of registered threads. Cloning shares the group.
#[derive(Clone)]
pub struct ThreadRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    name: String,
    parent_name: Option<String>,
    threads: Mutex<Vec<Arc<RegisteredThread>>>,
}

impl ThreadRegistry {
    pub fn new(name: impl Into<String>) -> Self {
        Self::build(name.into(), None)
    }

    /// Group nested under a parent group of the given name
    pub fn with_parent(name: impl Into<String>, parent_name: impl Into<String>) -> Self {
        Self::build(name.into(), Some(parent_name.into()))
    }

    fn build(name: String, parent_name: Option<String>) -> Self {
        Self {
            inner: Arc::new(RegistryInner { name, parent_name, threads: Mutex::new(Vec::new()) }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Register the calling thread. It stays visible until the returned
    /// registration is dropped.
    pub fn register(&self, thread_name: impl Into<String>) -> ThreadRegistration {
        let thread = Arc::new(RegisteredThread {
            name: thread_name.into(),
            group_name: self.inner.name.clone(),
            parent_group_name: self.inner.parent_name.clone(),
            os_thread_id: std::thread::current().id(),
            stack: Mutex::new(Vec::new()),
        });
        debug!("registered thread {:?} in group {:?}", thread.name, self.inner.name);
        lock(&self.inner.threads).push(Arc::clone(&thread));
        ThreadRegistration { registry: Arc::clone(&self.inner), thread }
    }

    /// Number of registered threads
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.inner.threads).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ThreadGroup for ThreadRegistry {
    fn active_count(&self) -> usize {
        self.len()
    }

    fn enumerate(&self, buffer: &mut [Option<ThreadRef>]) -> usize {
        let threads = lock(&self.inner.threads);
        let count = threads.len().min(buffer.len());
        for (slot, thread) in buffer.iter_mut().zip(threads.iter()) {
            *slot = Some(Arc::clone(thread) as ThreadRef);
        }
        count
    }
}

/// One registered thread and its shadow stack (outermost frame first)
pub struct RegisteredThread {
    name: String,
    group_name: String,
    parent_group_name: Option<String>,
    os_thread_id: std::thread::ThreadId,
    stack: Mutex<Vec<StackFrame>>,
}

impl SampledThread for RegisteredThread {
    fn name(&self) -> Option<String> {
        Some(self.name.clone())
    }

    fn group_name(&self) -> Option<String> {
        Some(self.group_name.clone())
    }

    fn parent_group_name(&self) -> Option<String> {
        self.parent_group_name.clone()
    }

    fn stack_trace(&self) -> Vec<StackFrame> {
        lock(&self.stack).iter().rev().cloned().collect()
    }

    fn os_thread_id(&self) -> Option<std::thread::ThreadId> {
        Some(self.os_thread_id)
    }
}

/// Membership of one thread in a [`ThreadRegistry`]; deregisters on drop
pub struct ThreadRegistration {
    registry: Arc<RegistryInner>,
    thread: Arc<RegisteredThread>,
}

impl ThreadRegistration {
    /// Push a frame onto this thread's shadow stack until the guard drops
    #[must_use = "the frame is popped as soon as the guard is dropped"]
    pub fn enter(&self, frame: StackFrame) -> FrameGuard<'_> {
        lock(&self.thread.stack).push(frame);
        FrameGuard { thread: &self.thread }
    }

    /// Shared handle, e.g. for an [`ArrayThreadSet`](super::ArrayThreadSet)
    #[must_use]
    pub fn thread(&self) -> ThreadRef {
        Arc::clone(&self.thread) as ThreadRef
    }
}

impl Drop for ThreadRegistration {
    fn drop(&mut self) {
        lock(&self.registry.threads).retain(|thread| !Arc::ptr_eq(thread, &self.thread));
        debug!("deregistered thread {:?}", self.thread.name);
    }
}

/// Pops its frame when dropped
pub struct FrameGuard<'a> {
    thread: &'a RegisteredThread,
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        lock(&self.thread.stack).pop();
    }
}
