//! C-ABI backed gateway implementation.
//!
//! This module binds the `gpi_*` symbols a simulator bridge library exports
//! and implements [`Simulator`] on top of them. Callback closures are boxed
//! into heap records whose raw pointers travel through the GPI as userdata;
//! the trampoline reclaims the record, runs the closure, and frees it after
//! exactly one firing.
//!
//! # Safety
//!
//! Everything here assumes the process was loaded by a simulator that
//! provides the declared symbols and calls the registered callbacks from a
//! single thread. A panic escaping a trampoline would unwind across the C
//! boundary, so every trampoline catches panics and aborts the process
//! instead.

use std::ffi::{c_char, c_int, c_long, c_void, CString};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::process;

use crate::interface::{Edge, SimCallback, SimCallbackId, SimObject, Simulator};

/// Raw GPI object handle.
type GpiHdl = *mut c_void;

/// GPI callback signature: `int (*cb)(void* userdata)`.
type GpiCallback = extern "C" fn(*mut c_void) -> c_int;

/// Deposit write mode (apply the value without forcing).
const GPI_DEPOSIT: c_int = 0;
/// Automatic handle discovery when navigating by name.
const GPI_AUTO: c_int = 0;

/// GPI edge encodings for value-change registration.
const GPI_RISING: c_int = 1;
const GPI_FALLING: c_int = 2;
const GPI_VALUE_CHANGE: c_int = 3;

extern "C" {
    fn gpi_has_registered_impl() -> c_int;
    fn gpi_get_root_handle(name: *const c_char) -> GpiHdl;
    fn gpi_get_handle_by_name(parent: GpiHdl, name: *const c_char, method: c_int) -> GpiHdl;
    fn gpi_get_sim_time(high: *mut u32, low: *mut u32);
    fn gpi_get_sim_precision(precision: *mut i32);
    fn gpi_register_timed_callback(cb: GpiCallback, userdata: *mut c_void, ticks: u64) -> GpiHdl;
    fn gpi_register_value_change_callback(
        cb: GpiCallback,
        userdata: *mut c_void,
        signal: GpiHdl,
        edge: c_int,
    ) -> GpiHdl;
    fn gpi_register_readwrite_callback(cb: GpiCallback, userdata: *mut c_void) -> GpiHdl;
    fn gpi_register_readonly_callback(cb: GpiCallback, userdata: *mut c_void) -> GpiHdl;
    fn gpi_register_nexttime_callback(cb: GpiCallback, userdata: *mut c_void) -> GpiHdl;
    fn gpi_set_signal_value_int(signal: GpiHdl, value: i32, mode: c_int);
    fn gpi_get_signal_value_long(signal: GpiHdl) -> c_long;
    fn gpi_get_signal_value_real(signal: GpiHdl) -> f64;
    fn gpi_register_start_of_sim_time_callback(
        cb: extern "C" fn(*mut c_void, c_int, *const *const c_char) -> c_int,
        userdata: *mut c_void,
    ) -> c_int;
    fn gpi_register_end_of_sim_time_callback(
        cb: extern "C" fn(*mut c_void),
        userdata: *mut c_void,
    ) -> c_int;
    fn gpi_finish();
}

/// Heap record carrying a one-shot closure across the C boundary.
struct CallbackRecord {
    cb: SimCallback,
}

/// Trampoline for every one-shot GPI callback.
///
/// Reclaims the record allocated at registration, runs the closure, and
/// returns 0. The record is freed on return regardless of the outcome.
extern "C" fn callback_trampoline(userdata: *mut c_void) -> c_int {
    // Safety: userdata is the Box::into_raw pointer produced by register().
    let record = unsafe { Box::from_raw(userdata as *mut CallbackRecord) };
    if catch_unwind(AssertUnwindSafe(move || (record.cb)())).is_err() {
        // A panic must not unwind into the simulator.
        eprintln!("fatal: panic escaped a simulator callback");
        process::abort();
    }
    0
}

fn into_userdata(cb: SimCallback) -> *mut c_void {
    Box::into_raw(Box::new(CallbackRecord { cb })) as *mut c_void
}

/// Releases a record whose registration the GPI rejected.
///
/// # Safety
///
/// `userdata` must come from [`into_userdata`] and must not have been
/// handed to a successful registration.
unsafe fn discard_userdata(userdata: *mut c_void) {
    drop(Box::from_raw(userdata as *mut CallbackRecord));
}

fn registration_result(hdl: GpiHdl, userdata: *mut c_void) -> Option<SimCallbackId> {
    if hdl.is_null() {
        // Safety: the GPI rejected the registration, so it never saw the
        // record and we still own it.
        unsafe { discard_userdata(userdata) };
        None
    } else {
        Some(SimCallbackId::from_raw(hdl as usize))
    }
}

/// [`Simulator`] backed by the `gpi_*` C ABI.
#[derive(Debug, Default)]
pub struct VpiSimulator;

impl VpiSimulator {
    /// Creates the gateway. The simulator bridge must already be loaded.
    pub fn new() -> Self {
        Self
    }

    /// Returns true if a GPI implementation has registered itself.
    pub fn has_registered_impl() -> bool {
        // Safety: plain query with no arguments.
        unsafe { gpi_has_registered_impl() != 0 }
    }
}

impl Simulator for VpiSimulator {
    fn root_handle(&self, name: Option<&str>) -> Option<SimObject> {
        let cname = name.and_then(|n| CString::new(n).ok());
        let ptr = cname
            .as_ref()
            .map_or(std::ptr::null(), |c| c.as_ptr());
        // Safety: ptr is null or a live NUL-terminated string.
        let hdl = unsafe { gpi_get_root_handle(ptr) };
        if hdl.is_null() {
            None
        } else {
            Some(SimObject::from_raw(hdl as usize))
        }
    }

    fn handle_by_name(&self, parent: SimObject, path: &str) -> Option<SimObject> {
        let cname = CString::new(path).ok()?;
        // Safety: parent wraps a handle the simulator returned earlier.
        let hdl = unsafe {
            gpi_get_handle_by_name(parent.as_raw() as GpiHdl, cname.as_ptr(), GPI_AUTO)
        };
        if hdl.is_null() {
            None
        } else {
            Some(SimObject::from_raw(hdl as usize))
        }
    }

    fn sim_time(&self) -> u64 {
        let mut high: u32 = 0;
        let mut low: u32 = 0;
        // Safety: out-pointers reference live stack slots.
        unsafe { gpi_get_sim_time(&mut high, &mut low) };
        (u64::from(high) << 32) | u64::from(low)
    }

    fn sim_precision(&self) -> i32 {
        let mut precision: i32 = 0;
        // Safety: out-pointer references a live stack slot.
        unsafe { gpi_get_sim_precision(&mut precision) };
        precision
    }

    fn register_timed_callback(&self, ticks: u64, cb: SimCallback) -> Option<SimCallbackId> {
        let userdata = into_userdata(cb);
        // Safety: trampoline/userdata pairing is the contract of this module.
        let hdl = unsafe { gpi_register_timed_callback(callback_trampoline, userdata, ticks) };
        registration_result(hdl, userdata)
    }

    fn register_edge_callback(
        &self,
        signal: SimObject,
        edge: Edge,
        cb: SimCallback,
    ) -> Option<SimCallbackId> {
        let gpi_edge = match edge {
            Edge::Rising => GPI_RISING,
            Edge::Falling => GPI_FALLING,
            Edge::Any => GPI_VALUE_CHANGE,
        };
        let userdata = into_userdata(cb);
        // Safety: signal wraps a handle the simulator returned earlier.
        let hdl = unsafe {
            gpi_register_value_change_callback(
                callback_trampoline,
                userdata,
                signal.as_raw() as GpiHdl,
                gpi_edge,
            )
        };
        registration_result(hdl, userdata)
    }

    fn register_readwrite_callback(&self, cb: SimCallback) -> Option<SimCallbackId> {
        let userdata = into_userdata(cb);
        // Safety: trampoline/userdata pairing is the contract of this module.
        let hdl = unsafe { gpi_register_readwrite_callback(callback_trampoline, userdata) };
        registration_result(hdl, userdata)
    }

    fn register_readonly_callback(&self, cb: SimCallback) -> Option<SimCallbackId> {
        let userdata = into_userdata(cb);
        // Safety: trampoline/userdata pairing is the contract of this module.
        let hdl = unsafe { gpi_register_readonly_callback(callback_trampoline, userdata) };
        registration_result(hdl, userdata)
    }

    fn register_nexttime_callback(&self, cb: SimCallback) -> Option<SimCallbackId> {
        let userdata = into_userdata(cb);
        // Safety: trampoline/userdata pairing is the contract of this module.
        let hdl = unsafe { gpi_register_nexttime_callback(callback_trampoline, userdata) };
        registration_result(hdl, userdata)
    }

    fn set_signal_value(&self, signal: SimObject, value: i64) {
        // Safety: signal wraps a handle the simulator returned earlier.
        unsafe { gpi_set_signal_value_int(signal.as_raw() as GpiHdl, value as i32, GPI_DEPOSIT) };
    }

    fn signal_value(&self, signal: SimObject) -> i64 {
        // Safety: signal wraps a handle the simulator returned earlier.
        unsafe { gpi_get_signal_value_long(signal.as_raw() as GpiHdl) as i64 }
    }

    fn signal_value_real(&self, signal: SimObject) -> f64 {
        // Safety: signal wraps a handle the simulator returned earlier.
        unsafe { gpi_get_signal_value_real(signal.as_raw() as GpiHdl) }
    }

    fn finish(&self) {
        // Safety: plain request with no arguments.
        unsafe { gpi_finish() };
    }
}

extern "C" fn start_of_sim_trampoline(
    userdata: *mut c_void,
    _argc: c_int,
    _argv: *const *const c_char,
) -> c_int {
    callback_trampoline(userdata)
}

extern "C" fn end_of_sim_trampoline(userdata: *mut c_void) {
    callback_trampoline(userdata);
}

/// Registers a closure to run when the simulator reaches start-of-sim.
///
/// Returns false if the GPI rejected the registration.
pub fn register_start_of_sim(cb: SimCallback) -> bool {
    let userdata = into_userdata(cb);
    // Safety: trampoline/userdata pairing is the contract of this module.
    let rc = unsafe { gpi_register_start_of_sim_time_callback(start_of_sim_trampoline, userdata) };
    if rc != 0 {
        // Safety: the GPI rejected the registration.
        unsafe { discard_userdata(userdata) };
        false
    } else {
        true
    }
}

/// Registers a closure to run when the simulator reaches end-of-sim.
///
/// Returns false if the GPI rejected the registration.
pub fn register_end_of_sim(cb: SimCallback) -> bool {
    let userdata = into_userdata(cb);
    // Safety: trampoline/userdata pairing is the contract of this module.
    let rc = unsafe { gpi_register_end_of_sim_time_callback(end_of_sim_trampoline, userdata) };
    if rc != 0 {
        // Safety: the GPI rejected the registration.
        unsafe { discard_userdata(userdata) };
        false
    } else {
        true
    }
}
