//! Task frames.
//!
//! A [`Task`] is the scheduler-visible shell of one coroutine: the boxed
//! future plus the lifecycle flags the engine inspects. "Releasing" a frame
//! drops the future (and everything it captured) while the reference-counted
//! shell keeps `completed` and the failure slot observable, so a join handle
//! that outlives the scheduler's bookkeeping can still resolve and nothing
//! is ever freed twice. Stale simulator callbacks detect released frames and
//! exit without enqueuing.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::mem::ManuallyDrop;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

use crate::engine::Engine;
use crate::error::{TestError, TestResult};

/// The boxed coroutine type every task frame carries.
pub type TestFuture = Pin<Box<dyn Future<Output = TestResult>>>;

pub(crate) struct Task {
    id: u64,
    engine: Weak<Engine>,
    future: RefCell<Option<TestFuture>>,
    detached: Cell<bool>,
    completed: Cell<bool>,
    cancelled: Cell<bool>,
    join_waiter: RefCell<Option<Rc<Task>>>,
    failure: RefCell<Option<TestError>>,
}

impl Task {
    pub(crate) fn new(id: u64, engine: Weak<Engine>, future: TestFuture) -> Rc<Self> {
        Rc::new(Self {
            id,
            engine,
            future: RefCell::new(Some(future)),
            detached: Cell::new(false),
            completed: Cell::new(false),
            cancelled: Cell::new(false),
            join_waiter: RefCell::new(None),
            failure: RefCell::new(None),
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// True while the frame still holds its future.
    pub(crate) fn is_live(&self) -> bool {
        self.future.borrow().is_some()
    }

    /// Drops the future, releasing everything the coroutine captured.
    pub(crate) fn release(&self) {
        self.future.borrow_mut().take();
    }

    pub(crate) fn is_completed(&self) -> bool {
        self.completed.get()
    }

    pub(crate) fn set_completed(&self) {
        self.completed.set(true);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }

    /// Marks the frame for lazy destruction. Honored at the next point the
    /// scheduler inspects it; a completed frame is never cancelled.
    pub(crate) fn cancel(&self) {
        if !self.completed.get() {
            self.cancelled.set(true);
        }
    }

    pub(crate) fn set_detached(&self) {
        self.detached.set(true);
    }

    pub(crate) fn set_failure(&self, error: TestError) {
        *self.failure.borrow_mut() = Some(error);
    }

    pub(crate) fn take_failure(&self) -> Option<TestError> {
        self.failure.borrow_mut().take()
    }

    /// Installs `waiter` as the single continuation to resume on
    /// completion. Returns false if a different waiter is already
    /// installed; re-installing the same waiter is a no-op.
    pub(crate) fn set_join_waiter(&self, waiter: &Rc<Task>) -> bool {
        let mut slot = self.join_waiter.borrow_mut();
        match slot.as_ref() {
            None => {
                *slot = Some(waiter.clone());
                true
            }
            Some(existing) => Rc::ptr_eq(existing, waiter),
        }
    }

    pub(crate) fn take_join_waiter(&self) -> Option<Rc<Task>> {
        self.join_waiter.borrow_mut().take()
    }

    /// Polls the future once. Returns `None` if the frame was already
    /// released.
    pub(crate) fn poll_future(self: &Rc<Self>) -> Option<Poll<TestResult>> {
        let waker = waker_for(self.clone());
        let mut cx = Context::from_waker(&waker);
        let mut slot = self.future.borrow_mut();
        slot.as_mut().map(|future| future.as_mut().poll(&mut cx))
    }

    /// Re-enqueues the task on its engine's ready queue. This is what a
    /// foreign waker invocation degrades to.
    fn wake(self: Rc<Self>) {
        if let Some(engine) = self.engine.upgrade() {
            engine.enqueue_ready(self);
        }
    }
}

const VTABLE: RawWakerVTable = RawWakerVTable::new(clone_raw, wake_raw, wake_by_ref_raw, drop_raw);

fn waker_for(task: Rc<Task>) -> Waker {
    let raw = RawWaker::new(Rc::into_raw(task) as *const (), &VTABLE);
    // Safety: the vtable functions uphold the Rc refcount contract below.
    unsafe { Waker::from_raw(raw) }
}

// Safety: `ptr` always originates from `Rc::into_raw` in `waker_for` or
// `clone_raw`, and the whole system is single-threaded, so manipulating the
// non-atomic refcount here is sound.

unsafe fn clone_raw(ptr: *const ()) -> RawWaker {
    Rc::increment_strong_count(ptr as *const Task);
    RawWaker::new(ptr, &VTABLE)
}

unsafe fn wake_raw(ptr: *const ()) {
    Rc::from_raw(ptr as *const Task).wake();
}

unsafe fn wake_by_ref_raw(ptr: *const ()) {
    let task = ManuallyDrop::new(Rc::from_raw(ptr as *const Task));
    ManuallyDrop::into_inner(task.clone()).wake();
}

unsafe fn drop_raw(ptr: *const ()) {
    drop(Rc::from_raw(ptr as *const Task));
}
