//! Cooperative coroutine scheduler and test runner for simulator
//! testbenches.
//!
//! Tests are plain `async fn`s that await triggers (elapsed simulation
//! time, signal edges, phase rendezvous) while the engine
//! multiplexes them onto the single simulator thread and sequences signal
//! writes against the simulator's callback phases. Signal assignment is
//! deferred: [`Handle::set`] enqueues a write that the engine applies in
//! the next read-write phase, so every write issued during one resumption
//! batch becomes visible together.
//!
//! ```ignore
//! async fn test_dff(dut: Handle) -> TestResult {
//!     dut.child("d").set(0);
//!     let _clk = spawn(clock(dut.clone(), 10, TimeUnit::Us));
//!     rising_edge(&dut.child("clk")).await;
//!     tb_assert!(dut.child("q").get() == 0, "q must start low");
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub mod bridge;
mod clock;
mod config;
mod engine;
mod error;
mod handle;
mod join;
mod log;
mod runner;
mod task;
mod trigger;

#[cfg(feature = "vpi")]
pub mod entry;

pub use clock::clock;
pub use config::EnvConfig;
pub use engine::Engine;
pub use error::{fail, TestError, TestResult};
pub use handle::Handle;
pub use join::{spawn, JoinHandle};
pub use log::{LogLevel, Logger};
pub use runner::{TestFactory, TestRecord};
pub use task::TestFuture;
pub use trigger::{
    any_edge, falling_edge, read_only, read_write, rising_edge, EdgeTrigger, ReadOnly, ReadWrite,
    Timer,
};

pub use kairos_gpi::{Edge, TimeUnit};

/// Current simulation time in native ticks, or zero outside a run.
pub fn sim_time() -> u64 {
    Engine::current().map(|engine| engine.sim_time()).unwrap_or(0)
}

/// The simulator's precision exponent, or zero outside a run.
pub fn sim_precision() -> i32 {
    Engine::current()
        .map(|engine| engine.sim_precision())
        .unwrap_or(0)
}
