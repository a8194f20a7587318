//! Sampling engine
//!
//! [`SamplerCore`] holds everything one tick needs: the thread source, the
//! aggregator, the thread id mapping and the id counters. [`SamplingProfiler`]
//! moves the core onto a dedicated timer thread for each sampling period and
//! takes it back on `stop()`, so the aggregator is only ever touched by one
//! thread at a time.
//!
//! ```text
//!   caller thread                      timer thread
//!   -------------                      ------------
//!   start(ms) ── Start{core} ────────▶ sample() now, then every tick
//!   stop()    ── Stop{reply} ────────▶ stop ticking
//!             ◀─────────── (core, tick failure)
//!   shutdown() drops the channel ────▶ thread exits, joined
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, never, select, tick, Receiver, Sender};
use log::{debug, error, info, warn};

use super::thread_set::{ThreadRef, ThreadSet};
use crate::binary::ControlSettings;
use crate::domain::{IdCounter, ObjectId, ProfileError, StackTraceId, ThreadId};
use crate::model::{HprofData, StackTrace, ThreadEvent, TraceKey};

const OBJECT_ID_SEED: u32 = 1;
const THREAD_ID_SEED: u32 = 200_001;
const STACK_TRACE_ID_SEED: u32 = 300_001;

/// Identity of a sampled thread: the address of its shared allocation
fn identity(thread: &ThreadRef) -> usize {
    Arc::as_ptr(thread).cast::<()>() as usize
}

fn untracked(thread: &ThreadRef) -> ProfileError {
    ProfileError::UntrackedThread(thread.name().unwrap_or_else(|| "<unnamed>".to_string()))
}

/// Capture state driven once per tick
pub struct SamplerCore {
    depth: usize,
    thread_set: Box<dyn ThreadSet>,
    hprof_data: HprofData,
    current_threads: Vec<ThreadRef>,
    thread_ids: HashMap<usize, ThreadId>,
    /// Reused lookup key, only cloned when a new trace is registered
    scratch_key: TraceKey,
    next_object_id: IdCounter,
    next_thread_id: IdCounter,
    next_stack_trace_id: IdCounter,
    carrier: Option<std::thread::ThreadId>,
}

impl SamplerCore {
    /// # Errors
    /// Returns [`ProfileError::InvalidDepth`] if `depth < 1`
    pub fn new(depth: u32, thread_set: impl ThreadSet + 'static) -> Result<Self, ProfileError> {
        if depth < 1 {
            return Err(ProfileError::InvalidDepth(depth));
        }
        let mut hprof_data = HprofData::new();
        hprof_data.set_flags(ControlSettings::CPU_SAMPLING);
        hprof_data.set_depth(depth);

        Ok(Self {
            depth: depth as usize,
            thread_set: Box::new(thread_set),
            hprof_data,
            current_threads: Vec::new(),
            thread_ids: HashMap::new(),
            scratch_key: TraceKey::default(),
            next_object_id: IdCounter::starting_at(OBJECT_ID_SEED),
            next_thread_id: IdCounter::starting_at(THREAD_ID_SEED),
            next_stack_trace_id: IdCounter::starting_at(STACK_TRACE_ID_SEED),
            carrier: None,
        })
    }

    #[must_use]
    pub fn hprof_data(&self) -> &HprofData {
        &self.hprof_data
    }

    #[must_use]
    pub fn into_hprof_data(self) -> HprofData {
        self.hprof_data
    }

    /// OS thread that runs the ticks; it is never recorded
    pub fn set_carrier(&mut self, carrier: Option<std::thread::ThreadId>) {
        self.carrier = carrier;
    }

    fn is_carrier(&self, thread: &ThreadRef) -> bool {
        self.carrier.is_some() && thread.os_thread_id() == self.carrier
    }

    /// One tick: refresh the thread list, then record every tracked
    /// thread's current stack.
    ///
    /// # Errors
    /// Returns an error if a tracked thread has no id mapping, a thread
    /// event is rejected by the aggregator, or a count overflows
    pub fn sample(&mut self) -> Result<(), ProfileError> {
        let threads: Vec<ThreadRef> =
            self.thread_set.threads().iter().map_while(Clone::clone).collect();
        self.update_thread_history(threads)?;

        for thread in &self.current_threads {
            if self.carrier.is_some() && thread.os_thread_id() == self.carrier {
                continue;
            }
            let mut frames = thread.stack_trace();
            if frames.is_empty() {
                continue;
            }
            frames.truncate(self.depth);

            let thread_id = *self.thread_ids.get(&identity(thread)).ok_or_else(|| untracked(thread))?;
            self.scratch_key.thread_id = thread_id;
            self.scratch_key.frames = frames;

            let cell = match self.hprof_data.lookup(&self.scratch_key) {
                Some(cell) => cell,
                None => {
                    let id = StackTraceId(self.next_stack_trace_id.next_id());
                    debug!("new stack trace {id} on thread {thread_id}");
                    self.hprof_data.add_stack_trace(StackTrace::from_key(id, &self.scratch_key))?
                }
            };
            self.hprof_data.increment(cell, 1)?;
        }
        Ok(())
    }

    /// Emit START/END events for the difference between the previous and
    /// the new thread list. Nothing changes if a removed thread has no id.
    fn update_thread_history(&mut self, threads: Vec<ThreadRef>) -> Result<(), ProfileError> {
        let mut current_ids = HashSet::with_capacity(threads.len());
        let threads: Vec<ThreadRef> =
            threads.into_iter().filter(|thread| current_ids.insert(identity(thread))).collect();

        let unchanged = threads.len() == self.current_threads.len()
            && threads.iter().zip(&self.current_threads).all(|(a, b)| Arc::ptr_eq(a, b));
        if unchanged {
            return Ok(());
        }

        let previous_ids: HashSet<usize> = self.current_threads.iter().map(identity).collect();
        let added: Vec<&ThreadRef> = threads
            .iter()
            .filter(|t| !previous_ids.contains(&identity(t)) && !self.is_carrier(t))
            .collect();
        let removed = self
            .current_threads
            .iter()
            .filter(|t| !current_ids.contains(&identity(t)) && !self.is_carrier(t))
            .map(|t| {
                let key = identity(t);
                self.thread_ids.get(&key).map(|id| (key, *id)).ok_or_else(|| untracked(t))
            })
            .collect::<Result<Vec<_>, _>>()?;

        for thread in added {
            let thread_id = ThreadId(self.next_thread_id.next_id());
            let object_id = ObjectId(self.next_object_id.next_id());
            self.thread_ids.insert(identity(thread), thread_id);
            debug!("thread {:?} started as {thread_id}", thread.name());
            self.hprof_data.add_thread_event(ThreadEvent::start(
                object_id,
                thread_id,
                thread.name(),
                thread.group_name(),
                thread.parent_group_name(),
            ))?;
        }

        for (key, thread_id) in removed {
            self.thread_ids.remove(&key);
            debug!("thread {thread_id} ended");
            self.hprof_data.add_thread_event(ThreadEvent::end(thread_id))?;
        }

        self.current_threads = threads;
        Ok(())
    }

    fn reset_start(&mut self) {
        self.hprof_data.set_start_millis(chrono::Utc::now().timestamp_millis());
    }
}

/// Core handed back by the timer thread, with the failure that ended the
/// period's ticks early, if any
type Stopped = (Box<SamplerCore>, Option<ProfileError>);

enum Command {
    Start { core: Box<SamplerCore>, interval: Duration },
    Stop { reply: Sender<Stopped> },
}

/// Periodic sampler with a dedicated timer thread.
///
/// Idle → running (`start`) → idle (`stop`) → shut down (`shutdown`).
/// Collected data survives `stop` and `shutdown`, and may be read only while
/// not running.
pub struct SamplingProfiler {
    /// `None` while the timer thread owns the core
    core: Option<Box<SamplerCore>>,
    running: bool,
    commands: Option<Sender<Command>>,
    timer: Option<JoinHandle<()>>,
}

impl SamplingProfiler {
    /// Create an idle profiler sampling at most `depth` frames per stack.
    ///
    /// # Errors
    /// Returns an error if `depth < 1` or the timer thread cannot be spawned
    pub fn new(depth: u32, thread_set: impl ThreadSet + 'static) -> Result<Self, ProfileError> {
        let core = SamplerCore::new(depth, thread_set)?;
        let (commands, inbox) = bounded(1);
        let timer = std::thread::Builder::new()
            .name("hprof-sampler".to_string())
            .spawn(move || run_timer(&inbox))
            .map_err(ProfileError::TimerSpawn)?;

        Ok(Self {
            core: Some(Box::new(core)),
            running: false,
            commands: Some(commands),
            timer: Some(timer),
        })
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Begin a sampling period, taking the first sample immediately.
    ///
    /// # Errors
    /// Returns [`ProfileError::InvalidInterval`] if `interval_millis < 1`,
    /// or [`ProfileError::IllegalState`] if already running or shut down
    pub fn start(&mut self, interval_millis: u64) -> Result<(), ProfileError> {
        if interval_millis < 1 {
            return Err(ProfileError::InvalidInterval(interval_millis));
        }
        let Some(commands) = &self.commands else {
            return Err(ProfileError::IllegalState("profiler has been shut down"));
        };
        if self.running {
            return Err(ProfileError::IllegalState("profiling already started"));
        }
        let mut core = self.core.take().ok_or(ProfileError::IllegalState(LOST))?;
        core.reset_start();

        let interval = Duration::from_millis(interval_millis);
        if let Err(rejected) = commands.send(Command::Start { core, interval }) {
            if let Command::Start { core, .. } = rejected.into_inner() {
                self.core = Some(core);
            }
            return Err(ProfileError::IllegalState("sampler timer thread has exited"));
        }
        self.running = true;
        info!("Sampling started every {interval_millis}ms");
        Ok(())
    }

    /// End the current sampling period. A no-op when not running.
    ///
    /// # Errors
    /// Returns the failure that stopped a tick during the period, or
    /// [`ProfileError::IllegalState`] if the timer thread died
    pub fn stop(&mut self) -> Result<(), ProfileError> {
        if !self.running {
            return Ok(());
        }
        self.running = false;

        let (reply, stopped) = bounded(1);
        let sent = self.commands.as_ref().is_some_and(|c| c.send(Command::Stop { reply }).is_ok());
        let returned = if sent { stopped.recv().ok() } else { None };
        let (core, failure) =
            returned.ok_or(ProfileError::IllegalState("sampler timer thread has exited"))?;
        self.core = Some(core);
        info!("Sampling stopped");
        failure.map_or(Ok(()), Err)
    }

    /// Stop sampling and release the timer thread. No further `start` is
    /// possible. Idempotent.
    ///
    /// # Errors
    /// Returns the error from [`stop`](Self::stop), or
    /// [`ProfileError::IllegalState`] if the timer thread panicked
    pub fn shutdown(&mut self) -> Result<(), ProfileError> {
        let stopped = self.stop();
        drop(self.commands.take());
        if let Some(timer) = self.timer.take() {
            timer.join().map_err(|_| ProfileError::IllegalState("sampler timer thread panicked"))?;
            debug!("Sampler timer thread joined");
        }
        stopped
    }

    /// Data collected so far.
    ///
    /// # Errors
    /// Returns [`ProfileError::IllegalState`] while sampling
    pub fn hprof_data(&self) -> Result<&HprofData, ProfileError> {
        if self.running {
            return Err(ProfileError::IllegalState("cannot access hprof data while sampling"));
        }
        self.core.as_deref().map(SamplerCore::hprof_data).ok_or(ProfileError::IllegalState(LOST))
    }

    /// Shut down and return the collected data
    ///
    /// # Errors
    /// Returns an error if shutdown fails
    pub fn into_hprof_data(mut self) -> Result<HprofData, ProfileError> {
        self.shutdown()?;
        self.core.take().map(|core| core.into_hprof_data()).ok_or(ProfileError::IllegalState(LOST))
    }
}

const LOST: &str = "sampler state was lost with the timer thread";

impl Drop for SamplingProfiler {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Sampler shutdown failed: {e}");
        }
    }
}

fn run_timer(inbox: &Receiver<Command>) {
    let carrier = std::thread::current().id();
    while let Ok(command) = inbox.recv() {
        let Command::Start { mut core, interval } = command else {
            continue;
        };
        core.set_carrier(Some(carrier));
        let mut failure = None;
        let Some(reply) = run_period(&mut core, interval, inbox, &mut failure) else {
            return;
        };
        if reply.send((core, failure)).is_err() {
            warn!("Sampler stop requester went away");
        }
    }
    debug!("Sampler timer thread exiting");
}

/// Sample now and then at a fixed rate until a stop request arrives.
/// Returns the reply channel, or `None` once the profiler is gone.
fn run_period(
    core: &mut SamplerCore,
    interval: Duration,
    inbox: &Receiver<Command>,
    failure: &mut Option<ProfileError>,
) -> Option<Sender<Stopped>> {
    let mut ticker = if sample_once(core, failure) { tick(interval) } else { never() };
    loop {
        let mut keep_ticking = true;
        select! {
            recv(ticker) -> _ => keep_ticking = sample_once(core, failure),
            recv(inbox) -> command => match command {
                Ok(Command::Stop { reply }) => return Some(reply),
                Ok(Command::Start { .. }) => warn!("Ignoring start request while sampling"),
                Err(_) => return None,
            },
        }
        if !keep_ticking {
            ticker = never();
        }
    }
}

/// Returns false once a tick has failed
fn sample_once(core: &mut SamplerCore, failure: &mut Option<ProfileError>) -> bool {
    match core.sample() {
        Ok(()) => true,
        Err(e) => {
            error!("Sampling tick failed, cancelling remaining ticks: {e}");
            *failure = Some(e);
            false
        }
    }
}
