//! Deferred, exactly-once construction of the resource a render needs.
//!
//! [`DeferredResource::schedule_if_needed`] races an idle callback against a
//! fallback timer of [`DEFERRED_INIT_MAX_WAIT`]. Both call the same
//! [`construct_if_needed`](DeferredResource::construct_if_needed) entry point:
//! the first one claims the factory and builds the value, the other finds the
//! state settled and does nothing. The loser is not cancelled.
//!
//! Construction may fail: the state then settles on
//! [`ResourceState::Unavailable`] and the settle listeners are told so, instead
//! of staying `Scheduled` forever.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::errors::ResourceUnavailable;
use crate::event_loop::{IdleId, LoopHandle, TimerId};

/// Upper bound between the first scheduling call and construction.
pub const DEFERRED_INIT_MAX_WAIT: Duration = Duration::from_millis(2000);

/// Monotonic lifecycle; never regresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResourceState {
    Uninitialized,
    Scheduled,
    Ready,
    Unavailable,
}

impl ResourceState {
    pub fn is_settled(self) -> bool {
        matches!(self, ResourceState::Ready | ResourceState::Unavailable)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResourceOutcome {
    Ready,
    Unavailable(ResourceUnavailable),
}

/// Read by the throttler before every delivery.
pub trait ResourceGate {
    fn is_ready(&self) -> bool;
}

impl ResourceGate for bool {
    fn is_ready(&self) -> bool {
        *self
    }
}

type Factory<R> = Box<dyn FnOnce() -> Result<R, ResourceUnavailable>>;
type SettleListener = Box<dyn FnOnce(&ResourceOutcome)>;

struct Slot<R> {
    state: Cell<ResourceState>,
    factory: RefCell<Option<Factory<R>>>,
    value: RefCell<Option<R>>,
    outcome: RefCell<Option<ResourceOutcome>>,
    listeners: RefCell<Vec<SettleListener>>,
    opportunities: RefCell<Option<(LoopHandle, IdleId, TimerId)>>,
    constructions: Cell<u32>,
}

/// Shared handle on one lazily constructed value.
pub struct DeferredResource<R> {
    slot: Rc<Slot<R>>,
}

impl<R> Clone for DeferredResource<R> {
    fn clone(&self) -> Self {
        Self {
            slot: Rc::clone(&self.slot),
        }
    }
}

impl<R> std::fmt::Debug for DeferredResource<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredResource")
            .field("state", &self.slot.state.get())
            .field("constructions", &self.slot.constructions.get())
            .finish()
    }
}

impl<R: 'static> DeferredResource<R> {
    pub fn new(factory: impl FnOnce() -> Result<R, ResourceUnavailable> + 'static) -> Self {
        Self {
            slot: Rc::new(Slot {
                state: Cell::new(ResourceState::Uninitialized),
                factory: RefCell::new(Some(Box::new(factory))),
                value: RefCell::new(None),
                outcome: RefCell::new(None),
                listeners: RefCell::new(Vec::new()),
                opportunities: RefCell::new(None),
                constructions: Cell::new(0),
            }),
        }
    }

    pub fn state(&self) -> ResourceState {
        self.slot.state.get()
    }

    pub fn is_ready(&self) -> bool {
        self.slot.state.get() == ResourceState::Ready
    }

    /// Number of times the factory ran (0 or 1).
    pub fn construction_count(&self) -> u32 {
        self.slot.constructions.get()
    }

    /// Arms the idle callback and the fallback timer unless already done.
    ///
    /// Returns true when this call did the scheduling.
    pub fn schedule_if_needed(&self, handle: &LoopHandle) -> bool {
        if self.slot.state.get() != ResourceState::Uninitialized {
            return false;
        }
        if !handle.is_alive() {
            warn!("cannot schedule deferred resource, event loop is stopped");
            return false;
        }
        self.slot.state.set(ResourceState::Scheduled);

        let weak = Rc::downgrade(&self.slot);
        let idle_weak = weak.clone();
        let idle = handle.post_idle(move || Self::construct_from(&idle_weak, "idle"));
        let timer = handle.post_delayed(DEFERRED_INIT_MAX_WAIT, move || {
            Self::construct_from(&weak, "fallback-timer")
        });
        *self.slot.opportunities.borrow_mut() = Some((handle.clone(), idle, timer));

        debug!(
            max_wait_ms = DEFERRED_INIT_MAX_WAIT.as_millis() as u64,
            "deferred resource scheduled"
        );
        true
    }

    fn construct_from(weak: &Weak<Slot<R>>, trigger: &'static str) {
        // The owner is gone: nothing to build for.
        let Some(slot) = weak.upgrade() else {
            return;
        };
        DeferredResource { slot }.construct(trigger);
    }

    /// Builds the value if nobody did yet. Returns true for the caller that
    /// performed the construction.
    pub fn construct_if_needed(&self) -> bool {
        self.construct("direct")
    }

    fn construct(&self, trigger: &'static str) -> bool {
        if self.slot.state.get().is_settled() {
            trace!(trigger, "deferred resource already settled");
            return false;
        }
        // Taking the factory is the claim: a second caller finds it empty.
        let factory = self.slot.factory.borrow_mut().take();
        let Some(factory) = factory else {
            return false;
        };

        self.slot.constructions.set(self.slot.constructions.get() + 1);
        let outcome = match factory() {
            Ok(value) => {
                *self.slot.value.borrow_mut() = Some(value);
                self.slot.state.set(ResourceState::Ready);
                info!(trigger, "deferred resource ready");
                ResourceOutcome::Ready
            }
            Err(err) => {
                self.slot.state.set(ResourceState::Unavailable);
                warn!(trigger, error = %err, "deferred resource unavailable");
                ResourceOutcome::Unavailable(err)
            }
        };
        *self.slot.outcome.borrow_mut() = Some(outcome.clone());

        let listeners = std::mem::take(&mut *self.slot.listeners.borrow_mut());
        for listener in listeners {
            listener(&outcome);
        }
        true
    }

    /// Calls `listener` once the resource settles, immediately if it already
    /// has.
    pub fn on_settled(&self, listener: impl FnOnce(&ResourceOutcome) + 'static) {
        let settled = self.slot.outcome.borrow().clone();
        match settled {
            Some(outcome) => listener(&outcome),
            None => self.slot.listeners.borrow_mut().push(Box::new(listener)),
        }
    }

    /// Borrows the constructed value.
    pub fn with<T>(&self, f: impl FnOnce(&R) -> T) -> Option<T> {
        self.slot.value.borrow().as_ref().map(f)
    }

    /// Withdraws the idle registration and the fallback timer, and drops the
    /// settle listeners. Used on teardown.
    pub fn cancel_pending(&self) {
        if let Some((handle, idle, timer)) = self.slot.opportunities.borrow_mut().take() {
            handle.cancel_idle(idle);
            handle.cancel(timer);
        }
        let listeners = std::mem::take(&mut *self.slot.listeners.borrow_mut());
        drop(listeners);
    }
}

impl<R: 'static> ResourceGate for DeferredResource<R> {
    fn is_ready(&self) -> bool {
        DeferredResource::is_ready(self)
    }
}
