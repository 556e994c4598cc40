//! Typed gateway over a simulator's generic programming interface (GPI).
//!
//! Event-driven logic simulators expose a C-ABI surface for registering
//! one-shot callbacks, querying simulation time, and reading or depositing
//! signal values. This crate wraps that surface in a small vocabulary of
//! value types and the object-safe [`Simulator`] trait, so the scheduler
//! core can be driven by a real simulator process (the `vpi` feature) or by
//! an instrumented in-process stand-in during tests.

#![warn(missing_docs)]

pub mod interface;
pub mod time;
#[cfg(feature = "vpi")]
pub mod vpi;

pub use interface::{Edge, SimCallback, SimCallbackId, SimObject, Simulator};
pub use time::{ParseTimeUnitError, TimeUnit};
