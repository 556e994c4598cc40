//! Trigger awaitables.
//!
//! A trigger is a one-shot future describing why a coroutine is
//! suspending: elapsed simulation time, a signal edge, or a phase
//! rendezvous. The first poll registers the currently running task as the
//! continuation under the trigger's condition; the poll after the wakeup
//! resolves. Triggers are not reusable across multiple awaits.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use kairos_gpi::{Edge, TimeUnit};

use crate::engine::Engine;
use crate::handle::Handle;
use crate::log::Logger;

const LOG: Logger = Logger::new("kairos.trigger");

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TriggerState {
    Armed,
    Waiting,
    Fired,
}

/// Suspends the awaiting coroutine for a span of simulation time.
///
/// The delay is converted into native ticks using the simulator's
/// precision; a delay of exactly zero skips suspension entirely. The
/// continuation resumes inside a read-write phase, so writes issued before
/// the await are applied first.
#[derive(Debug)]
pub struct Timer {
    delay: u64,
    unit: TimeUnit,
    state: TriggerState,
}

impl Timer {
    /// A timer for `delay` expressed in `unit`.
    pub fn new(delay: u64, unit: TimeUnit) -> Self {
        Self {
            delay,
            unit,
            state: TriggerState::Armed,
        }
    }

    /// A timer expressed directly in native simulator ticks.
    pub fn steps(delay: u64) -> Self {
        Self::new(delay, TimeUnit::Step)
    }
}

impl Future for Timer {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        match this.state {
            TriggerState::Armed => {
                if this.delay == 0 {
                    this.state = TriggerState::Fired;
                    return Poll::Ready(());
                }
                let Some((engine, task)) = current_continuation() else {
                    LOG.error("timer awaited outside a running testbench");
                    this.state = TriggerState::Fired;
                    return Poll::Ready(());
                };
                let ticks = this.unit.to_ticks(this.delay, engine.sim_precision());
                engine.schedule_after_time(task, ticks);
                this.state = TriggerState::Waiting;
                Poll::Pending
            }
            TriggerState::Waiting => {
                this.state = TriggerState::Fired;
                Poll::Ready(())
            }
            TriggerState::Fired => Poll::Ready(()),
        }
    }
}

/// Suspends the awaiting coroutine until a signal edge.
///
/// Built by [`rising_edge`], [`falling_edge`], or [`any_edge`]. The
/// continuation resumes directly from the value-change trampoline, between
/// simulator phases. An invalid signal is reported and degrades to a
/// best-effort ready-queue resumption.
#[derive(Debug)]
pub struct EdgeTrigger {
    signal: Handle,
    edge: Edge,
    state: TriggerState,
}

/// Awaits a zero-to-nonzero transition of `signal`.
pub fn rising_edge(signal: &Handle) -> EdgeTrigger {
    edge_trigger(signal, Edge::Rising)
}

/// Awaits a nonzero-to-zero transition of `signal`.
pub fn falling_edge(signal: &Handle) -> EdgeTrigger {
    edge_trigger(signal, Edge::Falling)
}

/// Awaits any value change of `signal`.
pub fn any_edge(signal: &Handle) -> EdgeTrigger {
    edge_trigger(signal, Edge::Any)
}

fn edge_trigger(signal: &Handle, edge: Edge) -> EdgeTrigger {
    EdgeTrigger {
        signal: signal.clone(),
        edge,
        state: TriggerState::Armed,
    }
}

impl Future for EdgeTrigger {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        match this.state {
            TriggerState::Armed => {
                let Some((engine, task)) = current_continuation() else {
                    LOG.error("edge trigger awaited outside a running testbench");
                    this.state = TriggerState::Fired;
                    return Poll::Ready(());
                };
                match this.signal.raw() {
                    Some(signal) => engine.schedule_on_edge(task, signal, this.edge),
                    None => {
                        LOG.error("edge trigger on an invalid handle");
                        engine.enqueue_ready(task);
                    }
                }
                this.state = TriggerState::Waiting;
                Poll::Pending
            }
            TriggerState::Waiting => {
                this.state = TriggerState::Fired;
                Poll::Ready(())
            }
            TriggerState::Fired => Poll::Ready(()),
        }
    }
}

/// Suspends the awaiting coroutine until the next read-write phase.
#[derive(Debug)]
pub struct ReadWrite {
    state: TriggerState,
}

/// Awaits the next read-write phase of the current time step.
pub fn read_write() -> ReadWrite {
    ReadWrite {
        state: TriggerState::Armed,
    }
}

impl Future for ReadWrite {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        match this.state {
            TriggerState::Armed => {
                let Some((engine, task)) = current_continuation() else {
                    LOG.error("read-write trigger awaited outside a running testbench");
                    this.state = TriggerState::Fired;
                    return Poll::Ready(());
                };
                engine.schedule_readwrite_waiter(task);
                this.state = TriggerState::Waiting;
                Poll::Pending
            }
            TriggerState::Waiting => {
                this.state = TriggerState::Fired;
                Poll::Ready(())
            }
            TriggerState::Fired => Poll::Ready(()),
        }
    }
}

/// Suspends the awaiting coroutine until the read-only phase, when all
/// writes of the current time step have settled.
#[derive(Debug)]
pub struct ReadOnly {
    state: TriggerState,
}

/// Awaits the read-only phase of the current time step.
pub fn read_only() -> ReadOnly {
    ReadOnly {
        state: TriggerState::Armed,
    }
}

impl Future for ReadOnly {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        match this.state {
            TriggerState::Armed => {
                let Some((engine, task)) = current_continuation() else {
                    LOG.error("read-only trigger awaited outside a running testbench");
                    this.state = TriggerState::Fired;
                    return Poll::Ready(());
                };
                engine.schedule_readonly_waiter(task);
                this.state = TriggerState::Waiting;
                Poll::Pending
            }
            TriggerState::Waiting => {
                this.state = TriggerState::Fired;
                Poll::Ready(())
            }
            TriggerState::Fired => Poll::Ready(()),
        }
    }
}

fn current_continuation() -> Option<(std::rc::Rc<Engine>, std::rc::Rc<crate::task::Task>)> {
    let engine = Engine::current()?;
    let task = engine.current_task()?;
    Some((engine, task))
}
