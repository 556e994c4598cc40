//! The simulator gateway contract.
//!
//! [`Simulator`] is the typed façade the scheduler core drives: one-shot
//! callback registration for the simulator's phase hooks, time and
//! precision queries, handle navigation, and signal access. The `vpi`
//! feature provides the C-ABI backed implementation; the conformance
//! harness provides an instrumented in-process one.

use std::fmt;

/// A non-owning reference to a simulator design object.
///
/// In the FFI backend this is the raw handle pointer's address; in-process
/// backends are free to use it as an index. The gateway never frees the
/// underlying object.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SimObject(usize);

impl SimObject {
    /// Wraps a raw object value.
    pub fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    /// Returns the raw object value.
    pub fn as_raw(self) -> usize {
        self.0
    }
}

impl fmt::Debug for SimObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SimObject({:#x})", self.0)
    }
}

/// Identifier of a registered one-shot callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SimCallbackId(usize);

impl SimCallbackId {
    /// Wraps a raw callback id.
    pub fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    /// Returns the raw callback id.
    pub fn as_raw(self) -> usize {
        self.0
    }
}

/// The signal transition a value-change callback waits for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Edge {
    /// Zero to nonzero.
    Rising,
    /// Nonzero to zero.
    Falling,
    /// Any value change.
    Any,
}

impl Edge {
    /// Returns true if a transition from `prev` to `curr` matches this edge.
    pub fn matches(self, prev: i64, curr: i64) -> bool {
        match self {
            Edge::Rising => prev == 0 && curr != 0,
            Edge::Falling => prev != 0 && curr == 0,
            Edge::Any => prev != curr,
        }
    }
}

/// A one-shot callback closure handed to the simulator.
///
/// Each firing consumes its registration; the backend releases the closure
/// after invoking it exactly once.
pub type SimCallback = Box<dyn FnOnce()>;

/// Typed façade over the simulator's generic programming interface.
///
/// All methods take `&self`: backends use interior mutability, and the
/// whole system is single-threaded by construction. Every `register_*`
/// method returns `None` on registration failure, in which case the backend
/// has already released the callback and the caller is expected to fall
/// back to a direct ready-queue insertion.
pub trait Simulator {
    /// Resolves the design root, preferring an explicit name.
    fn root_handle(&self, name: Option<&str>) -> Option<SimObject>;

    /// Looks up a child of `parent` by (possibly dotted) hierarchical name.
    fn handle_by_name(&self, parent: SimObject, path: &str) -> Option<SimObject>;

    /// Returns the current simulation time in native ticks.
    fn sim_time(&self) -> u64;

    /// Returns the simulator's precision exponent (ticks per second as a
    /// power of ten, e.g. -12 for picoseconds).
    fn sim_precision(&self) -> i32;

    /// Registers a callback to fire after `ticks` native ticks.
    fn register_timed_callback(&self, ticks: u64, cb: SimCallback) -> Option<SimCallbackId>;

    /// Registers a callback to fire on the given edge of `signal`.
    fn register_edge_callback(
        &self,
        signal: SimObject,
        edge: Edge,
        cb: SimCallback,
    ) -> Option<SimCallbackId>;

    /// Registers a callback for the next read-write phase of the current
    /// time step.
    fn register_readwrite_callback(&self, cb: SimCallback) -> Option<SimCallbackId>;

    /// Registers a callback for the read-only phase, after all writes for
    /// the current time step have settled.
    fn register_readonly_callback(&self, cb: SimCallback) -> Option<SimCallbackId>;

    /// Registers a callback for the start of the next time step.
    fn register_nexttime_callback(&self, cb: SimCallback) -> Option<SimCallbackId>;

    /// Deposits a value on a signal. Only legal during a read-write phase.
    fn set_signal_value(&self, signal: SimObject, value: i64);

    /// Reads a signal's current value as an integer.
    fn signal_value(&self, signal: SimObject) -> i64;

    /// Reads a signal's current value as a real number.
    fn signal_value_real(&self, signal: SimObject) -> f64;

    /// Asks the simulator to end the simulation.
    fn finish(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sim_object_roundtrip() {
        let obj = SimObject::from_raw(0xdead);
        assert_eq!(obj.as_raw(), 0xdead);
        assert_eq!(obj, SimObject::from_raw(0xdead));
    }

    #[test]
    fn edge_matching() {
        assert!(Edge::Rising.matches(0, 1));
        assert!(!Edge::Rising.matches(1, 0));
        assert!(!Edge::Rising.matches(1, 2));

        assert!(Edge::Falling.matches(1, 0));
        assert!(!Edge::Falling.matches(0, 1));

        assert!(Edge::Any.matches(0, 1));
        assert!(Edge::Any.matches(1, 0));
        assert!(Edge::Any.matches(3, 7));
        assert!(!Edge::Any.matches(5, 5));
    }

    #[test]
    fn sim_object_debug_is_hex() {
        assert_eq!(format!("{:?}", SimObject::from_raw(255)), "SimObject(0xff)");
    }
}
