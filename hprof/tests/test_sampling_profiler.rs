use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use hprof::binary::{BinaryHprofReader, BinaryHprofWriter};
use hprof::domain::ProfileError;
use hprof::model::{StackFrame, ThreadEvent, TraceKey};
use hprof::profiling::{
    ArrayThreadSet, GroupThreadSet, SampledThread, SamplerCore, SamplingProfiler, ThreadRef,
    ThreadRegistry,
};

fn frame(method: &str) -> StackFrame {
    StackFrame::new("app.Worker", method, Some("Worker.java"), 10)
}

#[test]
fn test_registered_threads_are_sampled() {
    let registry = ThreadRegistry::with_parent("workers", "main");
    let ready = Arc::new(Barrier::new(2));
    let done = Arc::new(Barrier::new(2));

    let worker = {
        let registry = registry.clone();
        let (ready, done) = (Arc::clone(&ready), Arc::clone(&done));
        thread::spawn(move || {
            let registration = registry.register("worker-1");
            let _run = registration.enter(frame("run"));
            let _step = registration.enter(frame("step"));
            ready.wait();
            done.wait();
        })
    };
    ready.wait();

    let mut profiler = SamplingProfiler::new(8, GroupThreadSet::new(registry.clone())).unwrap();
    profiler.start(1).unwrap();
    thread::sleep(Duration::from_millis(20));
    profiler.stop().unwrap();
    done.wait();
    worker.join().unwrap();

    let data = profiler.hprof_data().unwrap();
    assert!(data.start_millis() > 0);
    assert_eq!(data.stack_trace_count(), 1);
    assert!(data.total_samples().unwrap() >= 1);

    let samples = data.samples();
    let methods: Vec<&str> =
        samples[0].stack_trace.frames().iter().map(|f| f.method_name.as_str()).collect();
    assert_eq!(methods, ["step", "run"]);
    assert!(matches!(
        &data.thread_history()[0],
        ThreadEvent::Start { thread_name: Some(name), group_name: Some(group), parent_group_name: Some(parent), .. }
            if name == "worker-1" && group == "workers" && parent == "main"
    ));
}

#[test]
fn test_thread_end_is_recorded_after_deregistration() {
    let registry = ThreadRegistry::new("main");
    let registration = registry.register("short-lived");
    let guard = registration.enter(frame("run"));

    let mut core = SamplerCore::new(4, GroupThreadSet::new(registry.clone())).unwrap();
    core.sample().unwrap();
    drop(guard);
    drop(registration);
    core.sample().unwrap();

    let history = core.hprof_data().thread_history();
    assert_eq!(history.len(), 2);
    assert!(history[0].is_start());
    assert_eq!(history[1], ThreadEvent::end(history[0].thread_id()));
}

#[test]
fn test_sampler_dedups_through_lookup_key() {
    let registry = ThreadRegistry::new("main");
    let registration = registry.register("busy");
    let _frame = registration.enter(frame("spin"));

    let mut core =
        SamplerCore::new(4, ArrayThreadSet::new([registration.thread()])).unwrap();
    for _ in 0..10 {
        core.sample().unwrap();
    }

    let data = core.hprof_data();
    assert_eq!(data.stack_trace_count(), 1);
    let thread_id = data.thread_history()[0].thread_id();
    let cell = data.lookup(&TraceKey::new(thread_id, vec![frame("spin")])).unwrap();
    assert_eq!(data.count(cell), 10);
}

#[test]
fn test_depth_truncation_keeps_top_of_stack() {
    let registry = ThreadRegistry::new("main");
    let registration = registry.register("deep");
    let _guards: Vec<_> = (0..6).map(|i| registration.enter(frame(&format!("f{i}")))).collect();

    let mut core = SamplerCore::new(3, ArrayThreadSet::new([registration.thread()])).unwrap();
    core.sample().unwrap();

    let samples = core.hprof_data().samples();
    let methods: Vec<&str> =
        samples[0].stack_trace.frames().iter().map(|f| f.method_name.as_str()).collect();
    assert_eq!(methods, ["f5", "f4", "f3"]);
}

#[test]
fn test_lifecycle_misuse() {
    assert!(matches!(
        SamplingProfiler::new(0, ArrayThreadSet::new(Vec::<ThreadRef>::new())),
        Err(ProfileError::InvalidDepth(0))
    ));

    let mut profiler = SamplingProfiler::new(2, ArrayThreadSet::new(Vec::<ThreadRef>::new())).unwrap();
    assert!(matches!(profiler.start(0), Err(ProfileError::InvalidInterval(0))));
    assert!(!profiler.is_running());

    profiler.start(5).unwrap();
    assert!(matches!(profiler.start(5), Err(ProfileError::IllegalState(_))));
    assert!(matches!(profiler.hprof_data(), Err(ProfileError::IllegalState(_))));
    profiler.shutdown().unwrap();

    assert!(matches!(profiler.start(5), Err(ProfileError::IllegalState(_))));
    assert!(profiler.hprof_data().is_ok());
}

#[test]
fn test_restart_keeps_collected_data() {
    let registry = ThreadRegistry::new("main");
    let registration = registry.register("main");
    let _frame = registration.enter(frame("loop"));
    let threads: Vec<ThreadRef> = vec![registration.thread()];

    let mut profiler = SamplingProfiler::new(4, ArrayThreadSet::new(threads)).unwrap();
    profiler.start(50).unwrap();
    profiler.stop().unwrap();
    let first = profiler.hprof_data().unwrap().total_samples().unwrap();
    profiler.start(50).unwrap();
    profiler.stop().unwrap();
    let second = profiler.hprof_data().unwrap().total_samples().unwrap();

    assert!(first >= 1);
    assert!(second > first);
    assert_eq!(profiler.hprof_data().unwrap().thread_history().len(), 1);
}

#[test]
fn test_profile_survives_binary_round_trip() {
    let registry = ThreadRegistry::new("main");
    let registration = registry.register("main");
    let _frame = registration.enter(frame("work"));

    let mut profiler =
        SamplingProfiler::new(4, ArrayThreadSet::new([registration.thread()])).unwrap();
    profiler.start(1).unwrap();
    thread::sleep(Duration::from_millis(5));
    let data = profiler.into_hprof_data().unwrap();

    let mut bytes = Vec::new();
    BinaryHprofWriter::new(&mut bytes).write(&data).unwrap();
    let mut reader = BinaryHprofReader::new(&bytes[..]);
    reader.read().unwrap();
    assert_eq!(reader.into_hprof_data().unwrap(), data);
}

/// A thread whose stack is whatever the test says
struct Scripted(Vec<StackFrame>);

impl SampledThread for Scripted {
    fn name(&self) -> Option<String> {
        None
    }
    fn group_name(&self) -> Option<String> {
        None
    }
    fn parent_group_name(&self) -> Option<String> {
        None
    }
    fn stack_trace(&self) -> Vec<StackFrame> {
        self.0.clone()
    }
}

#[test]
fn test_unnamed_thread_start_event() {
    let thread: ThreadRef = Arc::new(Scripted(vec![frame("x")]));
    let mut core = SamplerCore::new(1, ArrayThreadSet::new([thread])).unwrap();
    core.sample().unwrap();
    assert_eq!(
        core.hprof_data().thread_history()[0].to_string(),
        "THREAD START (obj=1, id = 200001, name=\"null\", group=\"null\")"
    );
}

/// Reports the thread it is first queried from as its OS thread, then none,
/// so the sampler skips it when it appears and cannot find its id afterwards
struct Migrating {
    queries: AtomicUsize,
}

impl SampledThread for Migrating {
    fn name(&self) -> Option<String> {
        Some("migrating".to_string())
    }
    fn group_name(&self) -> Option<String> {
        None
    }
    fn parent_group_name(&self) -> Option<String> {
        None
    }
    fn stack_trace(&self) -> Vec<StackFrame> {
        vec![frame("hop")]
    }
    fn os_thread_id(&self) -> Option<thread::ThreadId> {
        (self.queries.fetch_add(1, Ordering::SeqCst) == 0).then(|| thread::current().id())
    }
}

#[test]
fn test_tick_failure_is_returned_from_stop() {
    let migrating = Arc::new(Migrating { queries: AtomicUsize::new(0) });
    let threads: Vec<ThreadRef> = vec![Arc::clone(&migrating) as ThreadRef];
    let mut profiler = SamplingProfiler::new(4, ArrayThreadSet::new(threads)).unwrap();

    profiler.start(1).unwrap();
    thread::sleep(Duration::from_millis(30));
    let err = profiler.stop().unwrap_err();
    assert!(matches!(err, ProfileError::UntrackedThread(ref name) if name == "migrating"));
    // The first tick failed and no later tick ran
    assert_eq!(migrating.queries.load(Ordering::SeqCst), 2);

    let data = profiler.hprof_data().unwrap();
    assert!(data.thread_history().is_empty());
    assert_eq!(data.stack_trace_count(), 0);

    // A new period starts ticking again
    profiler.start(1).unwrap();
    thread::sleep(Duration::from_millis(10));
    assert!(matches!(profiler.stop(), Err(ProfileError::UntrackedThread(_))));
    assert_eq!(migrating.queries.load(Ordering::SeqCst), 3);

    profiler.shutdown().unwrap();
}
