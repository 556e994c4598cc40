//! The cooperative scheduling engine.
//!
//! One [`Engine`] multiplexes every coroutine of a run onto the simulator
//! thread. It owns the ready queue, the pending-write queue, and the phase
//! state machine that decides when queued writes may reach the simulator:
//!
//! ```text
//!             IDLE ──request_rw()──► RW_ARMED ──readwrite cb──► RUNNING_RW
//!               │                                                  │
//!               │ readonly cb                                      ▼
//!               ▼                                                IDLE
//!          IN_READONLY ──request_rw() sets need_rw_after_ro;
//!               │         on return registers a nexttime callback,
//!               └──────── which re-requests the read-write phase.
//! ```
//!
//! Writes enqueued at any time are flushed exactly at the entry of the
//! read-write trampoline, before any continuation observes the resulting
//! values. Requesting a read-write callback inside the read-only phase is
//! deferred to the next time step, which keeps write activity out of the
//! simulator's settled window.
//!
//! The engine is created at start-of-simulation and installed in a
//! thread-local slot for the duration of the run; triggers and handles
//! reach it through that slot or through weak backlinks, so there is no
//! process-wide mutable singleton.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use std::task::Poll;

use kairos_gpi::{Edge, SimCallback, SimObject, Simulator};

use crate::config::EnvConfig;
use crate::error::{panic_message, TestError};
use crate::handle::Handle;
use crate::log::Logger;
use crate::runner::{TestFactory, TestRecord, TestRunner};
use crate::task::{Task, TestFuture};

const LOG: Logger = Logger::new("kairos.scheduler");

thread_local! {
    static CURRENT_ENGINE: RefCell<Option<Rc<Engine>>> = const { RefCell::new(None) };
}

struct WriteRequest {
    signal: SimObject,
    value: i64,
}

/// The scheduler and test orchestrator for one simulation run.
pub struct Engine {
    sim: Rc<dyn Simulator>,
    config: EnvConfig,
    exit_on_failure: Cell<bool>,
    ready: RefCell<VecDeque<Rc<Task>>>,
    rw_waiters: RefCell<Vec<Rc<Task>>>,
    ro_waiters: RefCell<Vec<Rc<Task>>>,
    pending_writes: RefCell<VecDeque<WriteRequest>>,
    rw_cb_pending: Cell<bool>,
    in_readonly: Cell<bool>,
    need_rw_after_ro: Cell<bool>,
    active: RefCell<HashMap<u64, Rc<Task>>>,
    current: RefCell<Option<Rc<Task>>>,
    next_task_id: Cell<u64>,
    root: Cell<Option<SimObject>>,
    runner: RefCell<TestRunner>,
}

impl Engine {
    /// Creates an engine on top of a simulator gateway.
    pub fn new(sim: Rc<dyn Simulator>, config: EnvConfig) -> Rc<Self> {
        Rc::new(Self {
            sim,
            config,
            exit_on_failure: Cell::new(false),
            ready: RefCell::new(VecDeque::new()),
            rw_waiters: RefCell::new(Vec::new()),
            ro_waiters: RefCell::new(Vec::new()),
            pending_writes: RefCell::new(VecDeque::new()),
            rw_cb_pending: Cell::new(false),
            in_readonly: Cell::new(false),
            need_rw_after_ro: Cell::new(false),
            active: RefCell::new(HashMap::new()),
            current: RefCell::new(None),
            next_task_id: Cell::new(1),
            root: Cell::new(None),
            runner: RefCell::new(TestRunner::new()),
        })
    }

    /// Installs this engine as the thread's current engine.
    pub fn install(self: &Rc<Self>) {
        CURRENT_ENGINE.with(|slot| *slot.borrow_mut() = Some(self.clone()));
    }

    /// Clears the thread's current engine.
    pub fn uninstall() {
        CURRENT_ENGINE.with(|slot| slot.borrow_mut().take());
    }

    /// Returns the thread's current engine, if one is installed.
    pub fn current() -> Option<Rc<Engine>> {
        CURRENT_ENGINE.with(|slot| slot.borrow().clone())
    }

    /// Current simulation time in native ticks.
    pub fn sim_time(&self) -> u64 {
        self.sim.sim_time()
    }

    /// The simulator's precision exponent.
    pub fn sim_precision(&self) -> i32 {
        self.sim.sim_precision()
    }

    pub(crate) fn debug_enabled(&self) -> bool {
        self.config.debug
    }

    /// Exit the process with status 1 after reporting if any test failed.
    pub fn set_exit_on_failure(&self, exit: bool) {
        self.exit_on_failure.set(exit);
    }

    /// Records the design root object received from the entry point.
    pub fn set_root(&self, root: SimObject) {
        self.root.set(Some(root));
    }

    /// Returns a handle to the design root.
    pub fn dut(self: &Rc<Self>) -> Handle {
        match self.root.get() {
            Some(root) => Handle::new(self, root),
            None => {
                LOG.error("no design root has been set");
                Handle::invalid(Rc::downgrade(self))
            }
        }
    }

    pub(crate) fn lookup_child(&self, parent: SimObject, name: &str) -> Option<SimObject> {
        self.sim.handle_by_name(parent, name)
    }

    pub(crate) fn read_signal(&self, signal: SimObject) -> i64 {
        // Read-your-writes: a queued deposit is observable before the
        // read-write phase applies it, so a zero-delay await between a
        // write and a read still sees the written value.
        match self.pending_value(signal) {
            Some(value) => value,
            None => self.sim.signal_value(signal),
        }
    }

    pub(crate) fn read_signal_real(&self, signal: SimObject) -> f64 {
        match self.pending_value(signal) {
            Some(value) => value as f64,
            None => self.sim.signal_value_real(signal),
        }
    }

    fn pending_value(&self, signal: SimObject) -> Option<i64> {
        self.pending_writes
            .borrow()
            .iter()
            .rev()
            .find(|write| write.signal == signal)
            .map(|write| write.value)
    }

    // ----- test registration and orchestration -------------------------

    /// Registers a named test.
    pub fn register_test<F>(&self, name: &str, factory: F)
    where
        F: Fn(Handle) -> TestFuture + 'static,
    {
        self.register_test_case(name, Rc::new(factory));
    }

    /// Registers a named test from a pre-built factory.
    pub fn register_test_case(&self, name: &str, factory: TestFactory) {
        self.runner.borrow_mut().register(name, factory);
    }

    /// Runs every registered test in order, then reports and finishes.
    pub fn start_all(self: &Rc<Self>) {
        {
            let mut runner = self.runner.borrow_mut();
            runner.reset();
            Logger::new("kairos.regression").info("running tests");
        }
        self.run_next_test();
    }

    /// Results recorded so far.
    pub fn results(&self) -> Vec<TestRecord> {
        self.runner.borrow().results().to_vec()
    }

    /// True if every recorded test passed.
    pub fn all_passed(&self) -> bool {
        self.runner.borrow().all_passed()
    }

    fn run_next_test(self: &Rc<Self>) {
        let log = Logger::new("kairos.regression");
        loop {
            let next = { self.runner.borrow_mut().take_next() };
            let Some((name, factory, seq, total)) = next else {
                self.finish_run();
                return;
            };
            log.info(format!("\x1b[34mrunning\x1b[0m {name} ({seq}/{total})"));
            let started = std::time::Instant::now();
            let dut = self.dut();
            match catch_unwind(AssertUnwindSafe(|| factory(dut))) {
                Ok(future) => {
                    let task = self.new_task(future);
                    task.set_detached();
                    {
                        self.runner.borrow_mut().begin(&name, task.clone(), started);
                    }
                    // The first resume happens inside the next read-write
                    // trampoline, never from this call stack.
                    self.schedule(task);
                    self.request_readwrite_callback();
                    return;
                }
                Err(payload) => {
                    // Construction itself blew up; record and move on.
                    let error = TestError::Panicked(panic_message(payload));
                    let sim_time = self.sim.sim_time();
                    self.runner.borrow_mut().record_construction_failure(
                        &name, started, error, sim_time, &log,
                    );
                }
            }
        }
    }

    /// Invoked when the current test's frame finishes.
    ///
    /// `in_readwrite` is true when the completing drain is the read-write
    /// trampoline; only then may the cleanup sweep flush pending writes
    /// itself. Otherwise the writes stay queued for the read-write
    /// callback that was armed when they were enqueued.
    pub(crate) fn on_test_complete(self: &Rc<Self>, in_readwrite: bool) {
        let Some(current) = ({ self.runner.borrow().current_task() }) else {
            return;
        };
        // Capture the failure before any cleanup can disturb the frame.
        let failure = current.take_failure();
        let sim_time = self.sim.sim_time();
        // Cancel every sibling, then drain once so cancelled frames that
        // are already in the ready queue are released.
        self.cancel_all();
        self.run_ready(in_readwrite);
        if !self.pending_writes.borrow().is_empty() {
            self.request_readwrite_callback();
        }
        current.release();
        {
            let mut runner = self.runner.borrow_mut();
            runner.finish_current(failure, sim_time, &Logger::new("kairos.regression"));
        }
        self.run_next_test();
    }

    fn finish_run(self: &Rc<Self>) {
        let log = Logger::new("kairos.regression");
        let all_passed = { self.runner.borrow().report(&log) };
        if let Some(path) = &self.config.results_file {
            if let Err(e) = self.runner.borrow().write_results(path) {
                log.error(format!("failed to write results file: {e}"));
            }
        }
        if !all_passed && self.exit_on_failure.get() {
            std::process::exit(1);
        }
        self.sim.finish();
    }

    // ----- scheduling --------------------------------------------------

    pub(crate) fn new_task(self: &Rc<Self>, future: TestFuture) -> Rc<Task> {
        let id = self.next_task_id.get();
        self.next_task_id.set(id + 1);
        Task::new(id, Rc::downgrade(self), future)
    }

    /// Transfers a freshly created frame into the ready queue and the
    /// active set. Does not request a read-write callback.
    pub(crate) fn schedule(&self, task: Rc<Task>) {
        self.active.borrow_mut().insert(task.id(), task.clone());
        self.ready.borrow_mut().push_back(task);
    }

    /// Pushes a continuation onto the ready queue, requesting a read-write
    /// callback so pending writes clear before it runs.
    pub(crate) fn enqueue_ready(self: &Rc<Self>, task: Rc<Task>) {
        if !task.is_live() {
            return;
        }
        self.ready.borrow_mut().push_back(task);
        self.request_readwrite_callback();
    }

    /// Installs a one-shot timer; its trampoline enqueues the continuation
    /// into a read-write phase so writes are applied first.
    pub(crate) fn schedule_after_time(self: &Rc<Self>, task: Rc<Task>, ticks: u64) {
        let engine = Rc::downgrade(self);
        let cont = task.clone();
        let cb: SimCallback = Box::new(move || {
            if let Some(engine) = engine.upgrade() {
                engine.enqueue_ready(cont);
            }
        });
        if self.sim.register_timed_callback(ticks, cb).is_none() {
            LOG.error("failed to register timed callback");
            self.enqueue_ready(task);
        }
    }

    /// Installs a one-shot edge callback; its trampoline pushes the
    /// continuation directly and drains the ready queue without re-entering
    /// the read-write trampoline (edges fire between phases).
    pub(crate) fn schedule_on_edge(self: &Rc<Self>, task: Rc<Task>, signal: SimObject, edge: Edge) {
        let engine = Rc::downgrade(self);
        let cont = task.clone();
        let cb: SimCallback = Box::new(move || {
            let Some(engine) = engine.upgrade() else {
                return;
            };
            if !cont.is_live() {
                // The frame was torn down while the callback was pending.
                return;
            }
            engine.ready.borrow_mut().push_back(cont);
            engine.run_ready(false);
        });
        if self.sim.register_edge_callback(signal, edge, cb).is_none() {
            LOG.error("failed to register value change callback");
            self.enqueue_ready(task);
        }
    }

    /// Parks a task until the next read-write phase.
    pub(crate) fn schedule_readwrite_waiter(self: &Rc<Self>, task: Rc<Task>) {
        self.rw_waiters.borrow_mut().push(task);
        self.request_readwrite_callback();
    }

    /// Parks a task until the read-only phase of the current time step.
    pub(crate) fn schedule_readonly_waiter(self: &Rc<Self>, task: Rc<Task>) {
        self.ro_waiters.borrow_mut().push(task);
        let engine = Rc::downgrade(self);
        let cb: SimCallback = Box::new(move || {
            if let Some(engine) = engine.upgrade() {
                engine.readonly_phase();
            }
        });
        if self.sim.register_readonly_callback(cb).is_none() {
            LOG.error("failed to register read-only callback");
        }
    }

    /// Appends a pending write and requests a read-write callback.
    pub(crate) fn queue_write(self: &Rc<Self>, signal: SimObject, value: i64) {
        self.pending_writes
            .borrow_mut()
            .push_back(WriteRequest { signal, value });
        self.request_readwrite_callback();
    }

    /// Requests a read-write callback. Idempotent within a phase; inside
    /// the read-only phase the request is deferred to the next time step.
    pub(crate) fn request_readwrite_callback(self: &Rc<Self>) {
        if self.in_readonly.get() {
            self.need_rw_after_ro.set(true);
            return;
        }
        if self.rw_cb_pending.get() {
            return;
        }
        self.rw_cb_pending.set(true);
        let engine = Rc::downgrade(self);
        let cb: SimCallback = Box::new(move || {
            if let Some(engine) = engine.upgrade() {
                engine.run_ready(true);
            }
        });
        if self.sim.register_readwrite_callback(cb).is_none() {
            self.rw_cb_pending.set(false);
            LOG.error("failed to register read-write callback");
        }
    }

    fn flush_pending_writes(&self) {
        loop {
            let next = self.pending_writes.borrow_mut().pop_front();
            let Some(write) = next else { break };
            self.sim.set_signal_value(write.signal, write.value);
        }
        self.rw_cb_pending.set(false);
    }

    fn readonly_phase(self: &Rc<Self>) {
        {
            let mut waiters = self.ro_waiters.borrow_mut();
            let mut ready = self.ready.borrow_mut();
            ready.extend(waiters.drain(..));
        }
        self.in_readonly.set(true);
        self.run_ready(false);
        self.in_readonly.set(false);
        if self.need_rw_after_ro.get() {
            self.need_rw_after_ro.set(false);
            let engine = Rc::downgrade(self);
            let cb: SimCallback = Box::new(move || {
                if let Some(engine) = engine.upgrade() {
                    engine.request_readwrite_callback();
                }
            });
            if self.sim.register_nexttime_callback(cb).is_none() {
                LOG.error("failed to register next-time callback");
                self.request_readwrite_callback();
            }
        }
    }

    /// Drains the ready queue, resuming each frame once.
    ///
    /// With `flush_writes` set (the read-write trampoline), pending writes
    /// are applied before any continuation runs and tasks parked for the
    /// read-write phase join the drain.
    pub(crate) fn run_ready(self: &Rc<Self>, flush_writes: bool) {
        if flush_writes {
            {
                let mut waiters = self.rw_waiters.borrow_mut();
                let mut ready = self.ready.borrow_mut();
                ready.extend(waiters.drain(..));
            }
            self.flush_pending_writes();
        }
        loop {
            let next = self.ready.borrow_mut().pop_front();
            let Some(task) = next else { break };
            if !task.is_live() {
                continue;
            }
            if task.is_cancelled() {
                task.release();
                self.active.borrow_mut().remove(&task.id());
                continue;
            }
            if !self.poll_task(&task) {
                continue;
            }
            // The frame ran to completion.
            task.set_completed();
            self.active.borrow_mut().remove(&task.id());
            let is_current_test = { self.runner.borrow().is_current(task.id()) };
            if let Some(waiter) = task.take_join_waiter() {
                if flush_writes && !self.pending_writes.borrow().is_empty() {
                    // The completed frame enqueued writes inside this
                    // read-write phase. Flush them now and bounce the
                    // waiter through a zero-tick timer so the simulator
                    // observes the writes before the waiter resumes.
                    self.flush_pending_writes();
                    self.schedule_after_time(waiter, 0);
                } else {
                    self.enqueue_ready(waiter);
                }
                task.release();
            } else if is_current_test {
                // The runner owns destruction so it can inspect the
                // failure slot first.
                self.on_test_complete(flush_writes);
            } else {
                task.release();
            }
        }
    }

    fn poll_task(self: &Rc<Self>, task: &Rc<Task>) -> bool {
        let previous = self.current.replace(Some(task.clone()));
        let outcome = catch_unwind(AssertUnwindSafe(|| task.poll_future()));
        self.current.replace(previous);
        match outcome {
            Ok(Some(Poll::Pending)) => false,
            Ok(Some(Poll::Ready(result))) => {
                if let Err(error) = result {
                    task.set_failure(error);
                }
                true
            }
            // The frame was released out from under us; nothing to run.
            Ok(None) => true,
            Err(payload) => {
                task.set_failure(TestError::Panicked(panic_message(payload)));
                true
            }
        }
    }

    /// The task currently being polled, if any.
    pub(crate) fn current_task(&self) -> Option<Rc<Task>> {
        self.current.borrow().clone()
    }

    /// Marks every active coroutine except the current test cancelled.
    ///
    /// Cancellation is lazy: frames are released when the scheduler next
    /// pops them, and trampolines for their still-pending triggers become
    /// no-ops once the frame is gone.
    pub fn cancel_all(&self) {
        let current_test = self.runner.borrow().current_task_id();
        for (id, task) in self.active.borrow().iter() {
            if Some(*id) != current_test {
                task.cancel();
            }
        }
    }
}
