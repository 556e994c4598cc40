//! Conformance harness for the kairos scheduler.
//!
//! Provides [`Bench`], which wires an instrumented [`StubSim`] to a fresh
//! engine so integration tests can register signals, behavioral processes,
//! and tests, then drive the whole stack without a real simulator. The
//! scenario suite lives in this crate's `tests/` directory.

#![warn(missing_docs)]

pub mod sim;

pub use sim::{IllegalWrite, SignalView, StubError, StubRunSummary, StubSim};

use std::rc::Rc;

use kairos_core::{Engine, EnvConfig, Handle, TestFuture, TestRecord};
use kairos_gpi::{Edge, SimObject};

/// Outcome of driving a bench to completion.
#[derive(Debug, Clone)]
pub struct BenchRun {
    /// Per-test records from the runner.
    pub records: Vec<TestRecord>,
    /// Simulation time in ticks when the run stopped.
    pub final_time: u64,
    /// True if the runner asked the simulator to finish.
    pub finished: bool,
}

impl BenchRun {
    /// True when every recorded test passed.
    pub fn all_passed(&self) -> bool {
        !self.records.is_empty() && self.records.iter().all(|r| r.passed)
    }
}

/// A stub simulator and engine pair ready to run tests.
pub struct Bench {
    /// The instrumented simulator.
    pub sim: Rc<StubSim>,
    /// The engine under test.
    pub engine: Rc<Engine>,
}

impl Bench {
    /// Builds a bench with picosecond precision and default configuration.
    pub fn new() -> Self {
        Self::with_config(EnvConfig::default())
    }

    /// Builds a bench with an explicit engine configuration.
    pub fn with_config(config: EnvConfig) -> Self {
        let sim = StubSim::new(-12);
        let engine = Engine::new(sim.clone(), config);
        engine.set_root(sim.root());
        engine.install();
        Bench { sim, engine }
    }

    /// Registers a named signal on the stub.
    pub fn signal(&self, name: &str, init: i64) -> SimObject {
        self.sim.add_signal(name, init)
    }

    /// Registers a behavioral process sensitive to an edge of `signal`.
    pub fn process(
        &self,
        signal: SimObject,
        edge: Edge,
        action: impl FnMut(&mut SignalView<'_>) + 'static,
    ) {
        self.sim.add_process(signal, edge, action);
    }

    /// Adds a D flip-flop: on each rising edge of `clk`, `q` takes `d`.
    pub fn dff(&self, clk: SimObject, d: SimObject, q: SimObject) {
        self.process(clk, Edge::Rising, move |view| {
            let value = view.get(d);
            view.set(q, value);
        });
    }

    /// Registers a named test on the engine.
    pub fn test<F>(&self, name: &str, factory: F)
    where
        F: Fn(Handle) -> TestFuture + 'static,
    {
        self.engine.register_test(name, factory);
    }

    /// Starts every registered test and drives the simulator to `limit`
    /// ticks. Panics on a stub error (combinational loop or runaway
    /// activity), which always indicates a broken bench.
    pub fn run(&self, limit: u64) -> BenchRun {
        self.engine.start_all();
        let summary = self.sim.run_until(limit).expect("stub simulator error");
        BenchRun {
            records: self.engine.results(),
            final_time: summary.final_time,
            finished: summary.finished,
        }
    }

    /// Asserts that no deposit ever happened outside a read-write window.
    pub fn assert_phase_legality(&self) {
        let illegal = self.sim.illegal_writes();
        assert!(
            illegal.is_empty(),
            "writes outside the read-write phase: {illegal:?}"
        );
    }
}

impl Default for Bench {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Bench {
    fn drop(&mut self) {
        Engine::uninstall();
    }
}
