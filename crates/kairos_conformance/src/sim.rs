//! Instrumented in-process stub simulator.
//!
//! [`StubSim`] implements the gateway contract with an event-driven loop:
//! a min-heap of timed callbacks, one-shot value-change callbacks,
//! FIFO read-write / read-only / next-time queues, and behavioral
//! processes for modeling small DUTs. Signal propagation runs in delta
//! cycles with a configurable limit so a combinational loop fails loudly
//! instead of hanging.
//!
//! Every deposit outside a read-write window is recorded in an
//! illegal-write log, which the conformance suite asserts empty: the
//! scheduler must never mutate signals outside the read-write trampoline.
//!
//! Within one time step the loop fires next-time callbacks, then due timed
//! callbacks, then iterates read-write activity and signal propagation to
//! a fixed point, then the read-only phase. Value-change callbacks fire
//! before behavioral processes react to the same transition, so a
//! testbench woken by a clock edge observes the design's pre-edge state.

use std::cell::RefCell;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::rc::Rc;

use kairos_gpi::{Edge, SimCallback, SimCallbackId, SimObject, Simulator};

/// Errors raised while driving the stub simulator.
#[derive(Debug, thiserror::Error)]
pub enum StubError {
    /// Signal propagation did not settle within the delta limit.
    #[error("delta cycle limit exceeded at tick {tick} (max {max} deltas)")]
    DeltaCycleLimit {
        /// Tick at which the limit was hit.
        tick: u64,
        /// The configured per-step delta limit.
        max: u32,
    },

    /// A single time step fired more callbacks than the activity limit.
    #[error("callback activity limit exceeded at tick {tick} (max {max} callbacks)")]
    ActivityLimit {
        /// Tick at which the limit was hit.
        tick: u64,
        /// The configured per-step callback limit.
        max: u32,
    },
}

/// A deposit that happened outside a read-write window.
#[derive(Debug, Clone)]
pub struct IllegalWrite {
    /// Name of the written signal.
    pub signal: String,
    /// Tick at which the write happened.
    pub tick: u64,
}

/// Summary of one [`StubSim::run_until`] invocation.
#[derive(Debug, Clone, Copy)]
pub struct StubRunSummary {
    /// Simulation time when the run stopped.
    pub final_time: u64,
    /// True if the run stopped because `finish` was called.
    pub finished: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SimPhase {
    Outside,
    Timed,
    ReadWrite,
    ReadOnly,
    NextTime,
}

struct SignalSlot {
    name: String,
    value: i64,
    prev: i64,
}

struct TimedCb {
    due: u64,
    seq: u64,
    cb: SimCallback,
}

impl PartialEq for TimedCb {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for TimedCb {}

impl PartialOrd for TimedCb {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimedCb {
    fn cmp(&self, other: &Self) -> Ordering {
        // Deadline first, then registration order for FIFO at equal times.
        self.due.cmp(&other.due).then(self.seq.cmp(&other.seq))
    }
}

struct EdgeCb {
    signal: SimObject,
    edge: Edge,
    cb: SimCallback,
}

/// Mutable view of the signal array handed to behavioral processes.
///
/// Processes must interact with the design only through this view; calling
/// back into the gateway from a process is not supported.
pub struct SignalView<'a> {
    slots: &'a mut Vec<SignalSlot>,
    dirty: &'a mut Vec<usize>,
}

impl SignalView<'_> {
    /// Reads a signal's current value.
    pub fn get(&self, signal: SimObject) -> i64 {
        index_of(signal)
            .and_then(|idx| self.slots.get(idx))
            .map(|slot| slot.value)
            .unwrap_or(0)
    }

    /// Updates a signal, scheduling propagation in the next delta cycle.
    pub fn set(&mut self, signal: SimObject, value: i64) {
        let Some(idx) = index_of(signal) else { return };
        let Some(slot) = self.slots.get_mut(idx) else {
            return;
        };
        if slot.value != value {
            slot.value = value;
            self.dirty.push(idx);
        }
    }
}

type ProcessFn = Box<dyn FnMut(&mut SignalView<'_>)>;

struct ProcessEntry {
    signal: SimObject,
    edge: Edge,
    action: ProcessFn,
}

struct StubState {
    time: u64,
    precision: i32,
    signals: Vec<SignalSlot>,
    by_name: HashMap<String, SimObject>,
    timed: BinaryHeap<Reverse<TimedCb>>,
    next_seq: u64,
    edge_cbs: Vec<EdgeCb>,
    rw_cbs: VecDeque<SimCallback>,
    ro_cbs: VecDeque<SimCallback>,
    nexttime_cbs: VecDeque<SimCallback>,
    dirty: Vec<usize>,
    phase: SimPhase,
    illegal_writes: Vec<IllegalWrite>,
    finished: bool,
    max_delta: u32,
    max_activity: u32,
}

const ROOT_RAW: usize = 1;
const SIGNAL_BASE: usize = 2;

fn index_of(signal: SimObject) -> Option<usize> {
    signal.as_raw().checked_sub(SIGNAL_BASE)
}

fn object_for(index: usize) -> SimObject {
    SimObject::from_raw(index + SIGNAL_BASE)
}

/// The instrumented stub simulator.
pub struct StubSim {
    state: RefCell<StubState>,
    processes: RefCell<Vec<ProcessEntry>>,
}

impl StubSim {
    /// Creates a stub with the given precision exponent (e.g. -12 for ps).
    pub fn new(precision: i32) -> Rc<Self> {
        Rc::new(Self {
            state: RefCell::new(StubState {
                time: 0,
                precision,
                signals: Vec::new(),
                by_name: HashMap::new(),
                timed: BinaryHeap::new(),
                next_seq: 0,
                edge_cbs: Vec::new(),
                rw_cbs: VecDeque::new(),
                ro_cbs: VecDeque::new(),
                nexttime_cbs: VecDeque::new(),
                dirty: Vec::new(),
                phase: SimPhase::Outside,
                illegal_writes: Vec::new(),
                finished: false,
                max_delta: 10_000,
                max_activity: 100_000,
            }),
            processes: RefCell::new(Vec::new()),
        })
    }

    /// The design root object.
    pub fn root(&self) -> SimObject {
        SimObject::from_raw(ROOT_RAW)
    }

    /// Registers a named signal with an initial value.
    pub fn add_signal(&self, name: &str, init: i64) -> SimObject {
        let mut state = self.state.borrow_mut();
        let obj = object_for(state.signals.len());
        state.signals.push(SignalSlot {
            name: name.to_string(),
            value: init,
            prev: init,
        });
        state.by_name.insert(name.to_string(), obj);
        obj
    }

    /// Registers a behavioral process sensitive to an edge of `signal`.
    pub fn add_process(
        &self,
        signal: SimObject,
        edge: Edge,
        action: impl FnMut(&mut SignalView<'_>) + 'static,
    ) {
        self.processes.borrow_mut().push(ProcessEntry {
            signal,
            edge,
            action: Box::new(action),
        });
    }

    /// Drives a signal from outside the simulation (test stimulus).
    ///
    /// The change propagates at the start of the next run step.
    pub fn drive(&self, signal: SimObject, value: i64) {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        if let Some(idx) = index_of(signal) {
            if let Some(slot) = state.signals.get_mut(idx) {
                if slot.value != value {
                    slot.value = value;
                    state.dirty.push(idx);
                }
            }
        }
    }

    /// Deposits recorded outside read-write windows.
    pub fn illegal_writes(&self) -> Vec<IllegalWrite> {
        self.state.borrow().illegal_writes.clone()
    }

    /// Runs the event loop until `finish`, event exhaustion, or `limit`.
    pub fn run_until(&self, limit: u64) -> Result<StubRunSummary, StubError> {
        loop {
            if self.state.borrow().finished {
                break;
            }
            self.step_phases()?;
            if self.state.borrow().finished {
                break;
            }
            let next_due = {
                let state = self.state.borrow();
                state.timed.peek().map(|Reverse(t)| t.due)
            };
            match next_due {
                Some(due) if due <= limit => {
                    {
                        let mut state = self.state.borrow_mut();
                        state.time = state.time.max(due);
                    }
                    self.fire_nexttime();
                }
                _ => break,
            }
        }
        let state = self.state.borrow();
        Ok(StubRunSummary {
            final_time: state.time,
            finished: state.finished,
        })
    }

    /// Runs one time step's phases to a fixed point.
    fn step_phases(&self) -> Result<(), StubError> {
        let now = self.state.borrow().time;
        let mut deltas: u32 = 0;
        let mut activity: u32 = 0;
        let max_activity = self.state.borrow().max_activity;

        // Settle any externally driven changes first.
        self.propagate(now, &mut deltas)?;

        loop {
            if self.state.borrow().finished {
                return Ok(());
            }
            activity += 1;
            if activity > max_activity {
                return Err(StubError::ActivityLimit {
                    tick: now,
                    max: max_activity,
                });
            }
            if let Some(cb) = self.pop_due_timer(now) {
                self.with_phase(SimPhase::Timed, cb);
                self.propagate(now, &mut deltas)?;
                continue;
            }
            if let Some(cb) = self.pop_front_rw() {
                self.with_phase(SimPhase::ReadWrite, cb);
                self.propagate(now, &mut deltas)?;
                continue;
            }
            break;
        }

        // Read-only phase: signals are settled for this time step.
        loop {
            let cb = self.state.borrow_mut().ro_cbs.pop_front();
            let Some(cb) = cb else { break };
            self.with_phase(SimPhase::ReadOnly, cb);
        }
        Ok(())
    }

    fn with_phase(&self, phase: SimPhase, cb: SimCallback) {
        self.state.borrow_mut().phase = phase;
        cb();
        self.state.borrow_mut().phase = SimPhase::Outside;
    }

    fn pop_due_timer(&self, now: u64) -> Option<SimCallback> {
        let mut state = self.state.borrow_mut();
        let due = state.timed.peek().map(|Reverse(t)| t.due)?;
        if due <= now {
            state.timed.pop().map(|Reverse(t)| t.cb)
        } else {
            None
        }
    }

    fn pop_front_rw(&self) -> Option<SimCallback> {
        self.state.borrow_mut().rw_cbs.pop_front()
    }

    fn fire_nexttime(&self) {
        loop {
            let cb = self.state.borrow_mut().nexttime_cbs.pop_front();
            let Some(cb) = cb else { break };
            self.with_phase(SimPhase::NextTime, cb);
        }
    }

    /// Applies pending signal transitions in delta cycles: value-change
    /// callbacks fire for each transition, then edge-sensitive processes
    /// react, until nothing changes.
    fn propagate(&self, now: u64, deltas: &mut u32) -> Result<(), StubError> {
        loop {
            let transitions: Vec<(SimObject, i64, i64)> = {
                let mut state = self.state.borrow_mut();
                let mut dirty = std::mem::take(&mut state.dirty);
                dirty.sort_unstable();
                dirty.dedup();
                let mut out = Vec::new();
                for idx in dirty {
                    let Some(slot) = state.signals.get_mut(idx) else {
                        continue;
                    };
                    if slot.value != slot.prev {
                        out.push((object_for(idx), slot.prev, slot.value));
                        slot.prev = slot.value;
                    }
                }
                out
            };
            if transitions.is_empty() {
                return Ok(());
            }
            *deltas += 1;
            let max_delta = self.state.borrow().max_delta;
            if *deltas > max_delta {
                return Err(StubError::DeltaCycleLimit {
                    tick: now,
                    max: max_delta,
                });
            }

            // One-shot value-change callbacks, in registration order.
            let fired: Vec<SimCallback> = {
                let mut state = self.state.borrow_mut();
                let entries = std::mem::take(&mut state.edge_cbs);
                let mut fired = Vec::new();
                let mut kept = Vec::new();
                for entry in entries {
                    let hit = transitions.iter().any(|(obj, prev, curr)| {
                        *obj == entry.signal && entry.edge.matches(*prev, *curr)
                    });
                    if hit {
                        fired.push(entry.cb);
                    } else {
                        kept.push(entry);
                    }
                }
                state.edge_cbs = kept;
                fired
            };
            for cb in fired {
                cb();
            }

            // Behavioral processes react after the testbench has seen the
            // transition.
            {
                let mut processes = self.processes.borrow_mut();
                let mut state = self.state.borrow_mut();
                let state = &mut *state;
                for entry in processes.iter_mut() {
                    let hit = transitions.iter().any(|(obj, prev, curr)| {
                        *obj == entry.signal && entry.edge.matches(*prev, *curr)
                    });
                    if hit {
                        let mut view = SignalView {
                            slots: &mut state.signals,
                            dirty: &mut state.dirty,
                        };
                        (entry.action)(&mut view);
                    }
                }
            }
        }
    }
}

impl Simulator for StubSim {
    fn root_handle(&self, _name: Option<&str>) -> Option<SimObject> {
        Some(self.root())
    }

    fn handle_by_name(&self, _parent: SimObject, path: &str) -> Option<SimObject> {
        self.state.borrow().by_name.get(path).copied()
    }

    fn sim_time(&self) -> u64 {
        self.state.borrow().time
    }

    fn sim_precision(&self) -> i32 {
        self.state.borrow().precision
    }

    fn register_timed_callback(&self, ticks: u64, cb: SimCallback) -> Option<SimCallbackId> {
        let mut state = self.state.borrow_mut();
        let seq = state.next_seq;
        state.next_seq += 1;
        let due = state.time.saturating_add(ticks);
        state.timed.push(Reverse(TimedCb { due, seq, cb }));
        Some(SimCallbackId::from_raw(seq as usize))
    }

    fn register_edge_callback(
        &self,
        signal: SimObject,
        edge: Edge,
        cb: SimCallback,
    ) -> Option<SimCallbackId> {
        let mut state = self.state.borrow_mut();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.edge_cbs.push(EdgeCb { signal, edge, cb });
        Some(SimCallbackId::from_raw(seq as usize))
    }

    fn register_readwrite_callback(&self, cb: SimCallback) -> Option<SimCallbackId> {
        let mut state = self.state.borrow_mut();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.rw_cbs.push_back(cb);
        Some(SimCallbackId::from_raw(seq as usize))
    }

    fn register_readonly_callback(&self, cb: SimCallback) -> Option<SimCallbackId> {
        let mut state = self.state.borrow_mut();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.ro_cbs.push_back(cb);
        Some(SimCallbackId::from_raw(seq as usize))
    }

    fn register_nexttime_callback(&self, cb: SimCallback) -> Option<SimCallbackId> {
        let mut state = self.state.borrow_mut();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.nexttime_cbs.push_back(cb);
        Some(SimCallbackId::from_raw(seq as usize))
    }

    fn set_signal_value(&self, signal: SimObject, value: i64) {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        if state.phase != SimPhase::ReadWrite {
            let name = index_of(signal)
                .and_then(|idx| state.signals.get(idx))
                .map(|slot| slot.name.clone())
                .unwrap_or_else(|| format!("{signal:?}"));
            let tick = state.time;
            state.illegal_writes.push(IllegalWrite { signal: name, tick });
        }
        if let Some(idx) = index_of(signal) {
            if let Some(slot) = state.signals.get_mut(idx) {
                if slot.value != value {
                    slot.value = value;
                    state.dirty.push(idx);
                }
            }
        }
    }

    fn signal_value(&self, signal: SimObject) -> i64 {
        index_of(signal)
            .and_then(|idx| self.state.borrow().signals.get(idx).map(|s| s.value))
            .unwrap_or(0)
    }

    fn signal_value_real(&self, signal: SimObject) -> f64 {
        self.signal_value(signal) as f64
    }

    fn finish(&self) {
        self.state.borrow_mut().finished = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn signals_resolve_by_name() {
        let sim = StubSim::new(-12);
        let clk = sim.add_signal("clk", 0);
        assert_eq!(sim.handle_by_name(sim.root(), "clk"), Some(clk));
        assert_eq!(sim.handle_by_name(sim.root(), "nope"), None);
        assert_eq!(sim.signal_value(clk), 0);
    }

    #[test]
    fn timed_callbacks_fire_in_deadline_then_fifo_order() {
        let sim = StubSim::new(-12);
        let order = Rc::new(RefCell::new(Vec::new()));
        for (tag, ticks) in [('b', 20u64), ('a', 10), ('c', 20)] {
            let order = order.clone();
            let _ = sim.register_timed_callback(ticks, Box::new(move || order.borrow_mut().push(tag)));
        }
        let summary = sim.run_until(100).expect("run");
        assert_eq!(*order.borrow(), vec!['a', 'b', 'c']);
        assert_eq!(summary.final_time, 20);
        assert!(!summary.finished);
    }

    #[test]
    fn edge_callbacks_are_one_shot() {
        let sim = StubSim::new(-12);
        let clk = sim.add_signal("clk", 0);
        let hits = Rc::new(Cell::new(0u32));
        {
            let hits = hits.clone();
            let _ = sim
                .register_edge_callback(clk, Edge::Rising, Box::new(move || hits.set(hits.get() + 1)));
        }
        sim.drive(clk, 1);
        sim.run_until(10).expect("run");
        assert_eq!(hits.get(), 1);
        sim.drive(clk, 0);
        sim.drive(clk, 1);
        sim.run_until(20).expect("run");
        // The registration was consumed by the first firing.
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn processes_cascade_through_delta_cycles() {
        let sim = StubSim::new(-12);
        let a = sim.add_signal("a", 0);
        let b = sim.add_signal("b", 0);
        let c = sim.add_signal("c", 0);
        sim.add_process(a, Edge::Any, move |view| {
            let v = view.get(a);
            view.set(b, v);
        });
        sim.add_process(b, Edge::Any, move |view| {
            let v = view.get(b);
            view.set(c, v);
        });
        sim.drive(a, 1);
        sim.run_until(10).expect("run");
        assert_eq!(sim.signal_value(b), 1);
        assert_eq!(sim.signal_value(c), 1);
    }

    #[test]
    fn combinational_loop_hits_the_delta_limit() {
        let sim = StubSim::new(-12);
        let a = sim.add_signal("a", 0);
        sim.add_process(a, Edge::Any, move |view| {
            let v = view.get(a);
            view.set(a, 1 - v);
        });
        sim.drive(a, 1);
        let err = sim.run_until(10).expect_err("must not settle");
        assert!(matches!(err, StubError::DeltaCycleLimit { .. }));
    }

    #[test]
    fn writes_outside_readwrite_are_recorded() {
        let sim = StubSim::new(-12);
        let clk = sim.add_signal("clk", 0);
        sim.set_signal_value(clk, 1);
        let illegal = sim.illegal_writes();
        assert_eq!(illegal.len(), 1);
        assert_eq!(illegal[0].signal, "clk");
    }

    #[test]
    fn writes_inside_readwrite_are_legal() {
        let sim = StubSim::new(-12);
        let clk = sim.add_signal("clk", 0);
        {
            let sim2 = Rc::downgrade(&sim);
            let _ = sim.register_timed_callback(
                5,
                Box::new(move || {
                    // Request a read-write window, then write from inside it.
                    let sim = sim2.upgrade().expect("sim alive");
                    let sim3 = Rc::downgrade(&sim);
                    let _ = sim.register_readwrite_callback(Box::new(move || {
                        let sim = sim3.upgrade().expect("sim alive");
                        sim.set_signal_value(clk, 1);
                    }));
                }),
            );
        }
        sim.run_until(10).expect("run");
        assert_eq!(sim.signal_value(clk), 1);
        assert!(sim.illegal_writes().is_empty());
    }

    #[test]
    fn finish_stops_the_run() {
        let sim = StubSim::new(-12);
        {
            let weak = Rc::downgrade(&sim);
            let _ = sim.register_timed_callback(
                5,
                Box::new(move || {
                    weak.upgrade().expect("sim alive").finish();
                }),
            );
        }
        let _ = sim.register_timed_callback(50, Box::new(|| panic!("must not fire")));
        let summary = sim.run_until(100).expect("run");
        assert!(summary.finished);
        assert_eq!(summary.final_time, 5);
    }

    #[test]
    fn nexttime_fires_at_the_start_of_the_next_step() {
        let sim = StubSim::new(-12);
        let order = Rc::new(RefCell::new(Vec::new()));
        {
            let order = order.clone();
            let _ =
                sim.register_nexttime_callback(Box::new(move || order.borrow_mut().push("nexttime")));
        }
        {
            let order = order.clone();
            let _ = sim.register_timed_callback(5, Box::new(move || order.borrow_mut().push("timed")));
        }
        sim.run_until(10).expect("run");
        assert_eq!(*order.borrow(), vec!["nexttime", "timed"]);
    }
}
