//! Spawning and structured joins.
//!
//! [`spawn`] transfers a coroutine to the scheduler for concurrent
//! execution and returns a [`JoinHandle`]. Awaiting the handle yields the
//! child's result (re-raising a stored failure); dropping it unawaited
//! requests cancellation, which the scheduler honors the next time it pops
//! the frame. The handle is consumed by `.await`, so a task cannot be
//! joined twice.

use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use crate::engine::Engine;
use crate::error::{fail, TestResult};
use crate::log::Logger;
use crate::task::Task;

const LOG: Logger = Logger::new("kairos.scheduler");

/// Handle to a spawned coroutine.
#[must_use = "dropping a join handle cancels the spawned coroutine"]
pub struct JoinHandle {
    task: Option<Rc<Task>>,
}

/// Spawns a coroutine onto the scheduler and returns its join handle.
///
/// The child is marked detached: if nothing ever joins it, the scheduler
/// releases the frame itself once it completes.
pub fn spawn(future: impl Future<Output = TestResult> + 'static) -> JoinHandle {
    match Engine::current() {
        Some(engine) => {
            let task = engine.new_task(Box::pin(future));
            task.set_detached();
            engine.schedule(task.clone());
            JoinHandle { task: Some(task) }
        }
        None => {
            LOG.error("spawn called outside a running testbench");
            JoinHandle { task: None }
        }
    }
}

impl Future for JoinHandle {
    type Output = TestResult;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<TestResult> {
        let this = self.get_mut();
        let Some(task) = this.task.clone() else {
            return Poll::Ready(Err(fail("join handle has no task")));
        };
        if task.is_completed() {
            // Disarm the drop-cancel path before resolving.
            this.task = None;
            let result = match task.take_failure() {
                Some(error) => Err(error),
                None => Ok(()),
            };
            task.release();
            return Poll::Ready(result);
        }
        let waiter = Engine::current().and_then(|engine| engine.current_task());
        match waiter {
            Some(waiter) => {
                if task.set_join_waiter(&waiter) {
                    Poll::Pending
                } else {
                    this.task = None;
                    Poll::Ready(Err(fail("task is already being joined")))
                }
            }
            None => {
                this.task = None;
                Poll::Ready(Err(fail("join awaited outside a running testbench")))
            }
        }
    }
}

impl Drop for JoinHandle {
    fn drop(&mut self) {
        // An unawaited handle signals cancellation; the scheduler releases
        // the frame when it next sees it.
        if let Some(task) = self.task.take() {
            task.cancel();
        }
    }
}
