//! Navigable design-under-test handles.
//!
//! A [`Handle`] wraps a simulator object reference together with a
//! memoizing name-to-child map. Navigation is pure lookup; handles are
//! cheap to clone and never own the simulator object. Reads go straight to
//! the gateway, but assignment is deferred: [`Handle::set`] enqueues a
//! write request on the engine, which applies it in the next read-write
//! phase. There is no direct-write escape hatch.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use kairos_gpi::SimObject;

use crate::engine::Engine;
use crate::log::Logger;

const LOG: Logger = Logger::new("kairos.handle");

struct HandleInner {
    raw: Option<SimObject>,
    engine: Weak<Engine>,
    // name -> resolved child; misses are memoized as None so repeated bad
    // names don't re-query the simulator.
    children: RefCell<HashMap<String, Option<Handle>>>,
}

/// A reference into the simulated design hierarchy.
#[derive(Clone)]
pub struct Handle {
    inner: Rc<HandleInner>,
}

impl Handle {
    pub(crate) fn new(engine: &Rc<Engine>, raw: SimObject) -> Self {
        Self::build(Some(raw), Rc::downgrade(engine))
    }

    pub(crate) fn invalid(engine: Weak<Engine>) -> Self {
        Self::build(None, engine)
    }

    fn build(raw: Option<SimObject>, engine: Weak<Engine>) -> Self {
        Self {
            inner: Rc::new(HandleInner {
                raw,
                engine,
                children: RefCell::new(HashMap::new()),
            }),
        }
    }

    /// Returns true if this handle refers to a real simulator object.
    pub fn valid(&self) -> bool {
        self.inner.raw.is_some()
    }

    pub(crate) fn raw(&self) -> Option<SimObject> {
        self.inner.raw
    }

    /// Indexes a child by hierarchical name.
    ///
    /// Lookups are memoized, including failed ones. A missing child is
    /// reported once on the error log and yields an invalid handle.
    pub fn child(&self, name: &str) -> Handle {
        let Some(parent) = self.inner.raw else {
            LOG.error(format!("indexed an invalid handle with '{name}'"));
            return Handle::invalid(self.inner.engine.clone());
        };

        if let Some(cached) = self.inner.children.borrow().get(name) {
            return match cached {
                Some(handle) => handle.clone(),
                None => Handle::invalid(self.inner.engine.clone()),
            };
        }

        let resolved = self
            .inner
            .engine
            .upgrade()
            .and_then(|engine| engine.lookup_child(parent, name))
            .map(|obj| Self::build(Some(obj), self.inner.engine.clone()));
        if resolved.is_none() {
            LOG.error(format!("failed to find child '{name}'"));
        }
        self.inner
            .children
            .borrow_mut()
            .insert(name.to_string(), resolved.clone());
        resolved.unwrap_or_else(|| Handle::invalid(self.inner.engine.clone()))
    }

    /// Walks a dotted path such as `"core.regs.status"` through [`child`].
    ///
    /// [`child`]: Handle::child
    pub fn path(&self, path: &str) -> Handle {
        path.split('.')
            .fold(self.clone(), |handle, segment| handle.child(segment))
    }

    /// Reads the current simulator value as an integer.
    ///
    /// An invalid handle yields zero.
    pub fn get(&self) -> i64 {
        match (self.inner.raw, self.inner.engine.upgrade()) {
            (Some(raw), Some(engine)) => engine.read_signal(raw),
            _ => {
                LOG.error("attempted to read an invalid handle");
                0
            }
        }
    }

    /// Reads the current simulator value as a real number.
    pub fn get_real(&self) -> f64 {
        match (self.inner.raw, self.inner.engine.upgrade()) {
            (Some(raw), Some(engine)) => engine.read_signal_real(raw),
            _ => {
                LOG.error("attempted to read an invalid handle");
                0.0
            }
        }
    }

    /// Returns the value interpreted as a boolean (nonzero is true).
    pub fn is_set(&self) -> bool {
        self.get() != 0
    }

    /// Enqueues a deferred write of `value` to this signal.
    ///
    /// The write is applied in the next read-write phase together with all
    /// other writes issued during the same resumption batch. Writes to an
    /// invalid handle are dropped with an error log.
    pub fn set(&self, value: i64) {
        let Some(raw) = self.inner.raw else {
            LOG.error("attempted to drive an invalid handle");
            return;
        };
        match self.inner.engine.upgrade() {
            Some(engine) => engine.queue_write(raw, value),
            None => LOG.error("attempted to drive a handle after engine shutdown"),
        }
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.inner.raw {
            Some(raw) => write!(f, "Handle({raw:?})"),
            None => write!(f, "Handle(invalid)"),
        }
    }
}
