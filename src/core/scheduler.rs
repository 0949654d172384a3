//! Cooperative interval workers
//!
//! Each worker is one dedicated thread running a [`WorkerCycle`] over and over:
//! - a *wanted* state set by commands (`start`/`pause`/`resume`/`stop`)
//! - an *actual* state reached by the loop at cycle boundaries
//! - a minimum interval between cycle starts (monotonic deadline)
//! - a shared [`CancellationToken`] checked at every boundary
//!
//! Errors and panics inside a cycle go to `WorkerCycle::on_cycle_error`; the
//! loop keeps going. Only `stop()` or cancellation ends it.
//!
//! There is no global timer thread. A [`SchedulerContext`] is built by the
//! owner (the engine) and handed to everything that spawns workers; its
//! `shutdown()` cancels every worker spawned through it.

use anyhow::anyhow;
use log::{debug, error, trace};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Worker loop states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Running = 0,
    Paused = 1,
    Stopped = 2,
}

impl WorkerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => WorkerState::Running,
            1 => WorkerState::Paused,
            _ => WorkerState::Stopped,
        }
    }
}

/// Cooperative cancellation flag; child tokens also observe their ancestors
#[derive(Debug, Clone)]
pub struct CancellationToken {
    // [own, parent, grandparent, ...]
    flags: Vec<Arc<AtomicBool>>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            flags: vec![Arc::new(AtomicBool::new(false))],
        }
    }

    /// Token cancelled by its own `cancel()` or by any ancestor's
    pub fn child(&self) -> Self {
        let mut flags = Vec::with_capacity(self.flags.len() + 1);
        flags.push(Arc::new(AtomicBool::new(false)));
        flags.extend(self.flags.iter().cloned());
        Self { flags }
    }

    pub fn cancel(&self) {
        self.flags[0].store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flags.iter().any(|f| f.load(Ordering::Acquire))
    }
}

/// Per-cycle logic run by an [`IntervalWorker`]
pub trait WorkerCycle: Send + 'static {
    /// Short name used for the thread and log lines
    fn name(&self) -> &'static str;

    /// One pass of work. Inner loops must check `ctx.should_continue()`.
    fn execute_cycle(&mut self, ctx: &CycleContext<'_>) -> anyhow::Result<()>;

    /// Called with anything a cycle returned or panicked with
    fn on_cycle_error(&mut self, err: &anyhow::Error) {
        error!("{}: worker cycle failed: {:#}", self.name(), err);
    }
}

/// Shared command/ack state between a worker thread and its handle
#[derive(Debug)]
struct WorkerControl {
    wanted: AtomicU8,
    actual: AtomicU8,
    cycles: AtomicU64,
    lock: Mutex<()>,
    changed: Condvar,
}

impl WorkerControl {
    fn new() -> Self {
        Self {
            wanted: AtomicU8::new(WorkerState::Paused as u8),
            actual: AtomicU8::new(WorkerState::Paused as u8),
            cycles: AtomicU64::new(0),
            lock: Mutex::new(()),
            changed: Condvar::new(),
        }
    }

    fn wanted(&self) -> WorkerState {
        WorkerState::from_u8(self.wanted.load(Ordering::Acquire))
    }

    fn actual(&self) -> WorkerState {
        WorkerState::from_u8(self.actual.load(Ordering::Acquire))
    }

    fn set_wanted(&self, state: WorkerState) {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        // Stopped is terminal
        if self.wanted() == WorkerState::Stopped {
            return;
        }
        self.wanted.store(state as u8, Ordering::Release);
        self.changed.notify_all();
    }

    /// Caller holds `lock`
    fn set_actual_locked(&self, state: WorkerState) {
        self.actual.store(state as u8, Ordering::Release);
        self.changed.notify_all();
    }
}

/// View of the worker handed to each cycle
pub struct CycleContext<'a> {
    token: &'a CancellationToken,
    control: &'a WorkerControl,
}

impl CycleContext<'_> {
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Keep looping: not cancelled and no pending pause/stop command
    pub fn should_continue(&self) -> bool {
        !self.token.is_cancelled() && self.control.wanted() == self.control.actual()
    }

    pub fn token(&self) -> &CancellationToken {
        self.token
    }
}

#[derive(Debug)]
struct ContextInner {
    name: String,
    period: Duration,
    root: CancellationToken,
    spawned: AtomicU64,
}

/// Owned scheduling context shared by every worker of one engine
#[derive(Debug, Clone)]
pub struct SchedulerContext {
    inner: Arc<ContextInner>,
}

impl SchedulerContext {
    /// `period` is the minimum interval between cycle starts
    pub fn new(name: impl Into<String>, period: Duration) -> Self {
        let name = name.into();
        debug!("SchedulerContext '{}' created: period={:?}", name, period);
        Self {
            inner: Arc::new(ContextInner {
                name,
                period,
                root: CancellationToken::new(),
                spawned: AtomicU64::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn period(&self) -> Duration {
        self.inner.period
    }

    /// Fresh token cancelled by `shutdown()` as well as by its own `cancel()`
    pub fn token(&self) -> CancellationToken {
        self.inner.root.child()
    }

    /// Spawn a paused worker running `cycle`; call `start()` to run it
    pub fn spawn<C: WorkerCycle>(
        &self,
        cycle: C,
        token: CancellationToken,
    ) -> std::io::Result<IntervalWorker> {
        IntervalWorker::spawn(cycle, token, self.inner.period, &self.inner.name).inspect(|_| {
            self.inner.spawned.fetch_add(1, Ordering::Relaxed);
        })
    }

    /// Workers spawned through this context so far
    pub fn spawned(&self) -> u64 {
        self.inner.spawned.load(Ordering::Relaxed)
    }

    /// Cancel every token handed out by this context
    pub fn shutdown(&self) {
        debug!("SchedulerContext '{}' shutting down", self.inner.name);
        self.inner.root.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.root.is_cancelled()
    }
}

/// Handle to one interval worker thread
#[derive(Debug)]
pub struct IntervalWorker {
    name: &'static str,
    control: Arc<WorkerControl>,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl IntervalWorker {
    fn spawn<C: WorkerCycle>(
        cycle: C,
        token: CancellationToken,
        period: Duration,
        prefix: &str,
    ) -> std::io::Result<Self> {
        let name = cycle.name();
        let control = Arc::new(WorkerControl::new());

        let handle = {
            let control = Arc::clone(&control);
            let token = token.clone();
            thread::Builder::new()
                .name(format!("{}-{}", prefix, name))
                .spawn(move || run_loop(cycle, &control, &token, period))?
        };

        Ok(Self {
            name,
            control,
            token,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Begin (or resume) cycling
    pub fn start(&self) {
        self.control.set_wanted(WorkerState::Running);
    }

    pub fn resume(&self) {
        self.start();
    }

    /// Takes effect at the next cycle boundary
    pub fn pause(&self) {
        self.control.set_wanted(WorkerState::Paused);
    }

    /// Stop the loop and join the thread. Idempotent.
    pub fn stop(&mut self) {
        self.control.set_wanted(WorkerState::Stopped);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("{}: worker thread panicked outside a cycle", self.name);
            }
            trace!("{}: joined", self.name);
        }
    }

    /// State reached by the loop
    pub fn worker_state(&self) -> WorkerState {
        self.control.actual()
    }

    /// State last requested by a command
    pub fn wanted_state(&self) -> WorkerState {
        self.control.wanted()
    }

    /// Block until the loop reaches `state`; false on timeout
    pub fn wait_for_state(&self, state: WorkerState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.control.lock.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if self.control.actual() == state {
                return true;
            }
            // A finished thread can never reach anything but Stopped
            if self.handle.as_ref().is_none_or(|h| h.is_finished()) {
                return self.control.actual() == state;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            guard = self
                .control
                .changed
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
    }

    /// Completed cycles since spawn
    pub fn cycle_count(&self) -> u64 {
        self.control.cycles.load(Ordering::Relaxed)
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for IntervalWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn run_loop<C: WorkerCycle>(
    mut cycle: C,
    control: &WorkerControl,
    token: &CancellationToken,
    period: Duration,
) {
    let name = cycle.name();
    trace!("{}: worker started", name);

    'outer: loop {
        // Park while paused; wake on commands or every period to poll cancellation
        {
            let mut guard = control.lock.lock().unwrap_or_else(|e| e.into_inner());
            loop {
                if token.is_cancelled() || control.wanted() == WorkerState::Stopped {
                    break 'outer;
                }
                if control.wanted() == WorkerState::Running {
                    control.set_actual_locked(WorkerState::Running);
                    break;
                }
                if control.actual() != WorkerState::Paused {
                    control.set_actual_locked(WorkerState::Paused);
                    trace!("{}: paused", name);
                }
                guard = control
                    .changed
                    .wait_timeout(guard, period)
                    .unwrap_or_else(|e| e.into_inner())
                    .0;
            }
        }

        let deadline = Instant::now() + period;
        let ctx = CycleContext { token, control };
        match panic::catch_unwind(AssertUnwindSafe(|| cycle.execute_cycle(&ctx))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => cycle.on_cycle_error(&err),
            Err(payload) => {
                let err = anyhow!("cycle panicked: {}", panic_message(payload.as_ref()));
                cycle.on_cycle_error(&err);
            }
        }
        control.cycles.fetch_add(1, Ordering::Relaxed);

        // Cadence: sleep out the rest of the period unless a command arrives
        let now = Instant::now();
        if now < deadline {
            let guard = control.lock.lock().unwrap_or_else(|e| e.into_inner());
            let _ = control
                .changed
                .wait_timeout_while(guard, deadline - now, |_| {
                    control.wanted() == WorkerState::Running && !token.is_cancelled()
                })
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    let _guard = control.lock.lock().unwrap_or_else(|e| e.into_inner());
    control.set_actual_locked(WorkerState::Stopped);
    trace!("{}: worker stopped", name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Counts cycles, optionally failing or panicking on a given cycle
    struct Counter {
        runs: Arc<AtomicUsize>,
        errors: Arc<AtomicUsize>,
        fail_on: Option<usize>,
        panic_on: Option<usize>,
    }

    impl Counter {
        fn new(runs: &Arc<AtomicUsize>, errors: &Arc<AtomicUsize>) -> Self {
            Self {
                runs: Arc::clone(runs),
                errors: Arc::clone(errors),
                fail_on: None,
                panic_on: None,
            }
        }
    }

    impl WorkerCycle for Counter {
        fn name(&self) -> &'static str {
            "counter"
        }

        fn execute_cycle(&mut self, _ctx: &CycleContext<'_>) -> anyhow::Result<()> {
            let n = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on == Some(n) {
                anyhow::bail!("cycle {} failed", n);
            }
            if self.panic_on == Some(n) {
                panic!("cycle {} panicked", n);
            }
            Ok(())
        }

        fn on_cycle_error(&mut self, _err: &anyhow::Error) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn wait_until(timeout: Duration, f: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if f() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        f()
    }

    #[test]
    fn test_token_hierarchy() {
        let root = CancellationToken::new();
        let child = root.child();
        let grandchild = child.child();
        child.cancel();
        assert!(!root.is_cancelled());
        assert!(child.is_cancelled());
        assert!(grandchild.is_cancelled());

        let root = CancellationToken::new();
        let child = root.child();
        root.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn test_spawned_worker_starts_paused() {
        let ctx = SchedulerContext::new("test", Duration::from_millis(1));
        let runs = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));
        let mut worker = ctx.spawn(Counter::new(&runs, &errors), ctx.token()).unwrap();

        thread::sleep(Duration::from_millis(20));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(worker.worker_state(), WorkerState::Paused);

        worker.start();
        assert!(wait_until(Duration::from_secs(2), || runs.load(Ordering::SeqCst) >= 3));
        assert_eq!(worker.worker_state(), WorkerState::Running);

        worker.stop();
        assert_eq!(worker.worker_state(), WorkerState::Stopped);
        assert_eq!(ctx.spawned(), 1);
    }

    #[test]
    fn test_pause_resume() {
        let ctx = SchedulerContext::new("test", Duration::from_millis(1));
        let runs = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));
        let worker = ctx.spawn(Counter::new(&runs, &errors), ctx.token()).unwrap();

        worker.start();
        assert!(wait_until(Duration::from_secs(2), || runs.load(Ordering::SeqCst) >= 1));

        worker.pause();
        assert!(worker.wait_for_state(WorkerState::Paused, Duration::from_secs(2)));
        let frozen = runs.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(runs.load(Ordering::SeqCst), frozen);

        worker.resume();
        assert!(wait_until(Duration::from_secs(2), || runs.load(Ordering::SeqCst) > frozen));
    }

    #[test]
    fn test_cycle_errors_do_not_kill_worker() {
        let ctx = SchedulerContext::new("test", Duration::from_millis(1));
        let runs = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));
        let mut cycle = Counter::new(&runs, &errors);
        cycle.fail_on = Some(2);
        cycle.panic_on = Some(4);
        let worker = ctx.spawn(cycle, ctx.token()).unwrap();

        worker.start();
        assert!(wait_until(Duration::from_secs(2), || runs.load(Ordering::SeqCst) >= 6));
        assert_eq!(errors.load(Ordering::SeqCst), 2);
        assert_eq!(worker.worker_state(), WorkerState::Running);
    }

    #[test]
    fn test_shutdown_cancels_workers() {
        let ctx = SchedulerContext::new("test", Duration::from_millis(1));
        let runs = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));
        let worker = ctx.spawn(Counter::new(&runs, &errors), ctx.token()).unwrap();
        worker.start();

        ctx.shutdown();
        assert!(ctx.is_shut_down());
        assert!(worker.wait_for_state(WorkerState::Stopped, Duration::from_secs(2)));
    }

    #[test]
    fn test_interval_cadence() {
        let ctx = SchedulerContext::new("test", Duration::from_millis(20));
        let runs = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));
        let mut worker = ctx.spawn(Counter::new(&runs, &errors), ctx.token()).unwrap();

        worker.start();
        thread::sleep(Duration::from_millis(110));
        worker.stop();
        // ~5 cycles at 20ms; generous bounds for loaded CI machines
        let n = runs.load(Ordering::SeqCst);
        assert!(n >= 1 && n <= 8, "unexpected cycle count {}", n);
    }
}
