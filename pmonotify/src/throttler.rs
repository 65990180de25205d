//! Rate-limited publisher.
//!
//! Turns an arbitrarily frequent stream of [`Snapshot`]s into at most one
//! delivery per [`THROTTLE_INTERVAL`]. The first snapshot of a quiet period is
//! delivered immediately and opens a window; everything queued during the
//! window collapses into a single pending slot (last write wins) that is
//! delivered when the window's timer fires, which opens the next window.
//!
//! # Invariants
//!
//! - At most one timer is armed at any time.
//! - `pending` is only kept while a window is open, or while the resource
//!   gate is closed.
//! - The last accepted snapshot is never dropped while the throttler lives;
//!   intermediate ones may be.

use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::deferred::ResourceGate;
use crate::event_loop::{LoopHandle, TimerId};
use crate::snapshot::Snapshot;

/// Minimum spacing between two deliveries.
pub const THROTTLE_INTERVAL: Duration = Duration::from_millis(500);

/// Receives the snapshots the throttler lets through.
pub trait Publish {
    fn publish(&mut self, snapshot: &Snapshot);
}

impl<F: FnMut(&Snapshot)> Publish for F {
    fn publish(&mut self, snapshot: &Snapshot) {
        self(snapshot)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThrottleState {
    Idle,
    Scheduled,
}

/// Why a snapshot was dropped without being considered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Same value as the last accepted snapshot.
    Duplicate,
    /// Paused snapshot from another session than the active one.
    StaleSession,
    /// No supported action yet: the producer is not ready to be displayed.
    NotReady,
}

impl IgnoreReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            IgnoreReason::Duplicate => "duplicate",
            IgnoreReason::StaleSession => "stale-session",
            IgnoreReason::NotReady => "not-ready",
        }
    }
}

/// Applies the suppression rules in order.
///
/// Only paused snapshots are checked for cross-session staleness; an unpaused
/// snapshot from another session always takes over.
pub fn ignore_reason(old: Option<&Snapshot>, new: &Snapshot) -> Option<IgnoreReason> {
    if let Some(old) = old {
        if new == old {
            return Some(IgnoreReason::Duplicate);
        }
        if new.is_paused() && new.session_id() != old.session_id() {
            return Some(IgnoreReason::StaleSession);
        }
    }
    if new.supported_actions().is_empty() {
        return Some(IgnoreReason::NotReady);
    }
    None
}

pub fn should_ignore(old: Option<&Snapshot>, new: &Snapshot) -> bool {
    ignore_reason(old, new).is_some()
}

/// What [`Throttler::queue`] did with a snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueOutcome {
    Ignored(IgnoreReason),
    /// Stored; will be delivered when the open window closes.
    Pending,
    /// Stored; the resource gate is closed.
    Deferred,
    Delivered,
}

pub struct Throttler {
    handle: LoopHandle,
    tick: Rc<dyn Fn()>,
    interval: Duration,
    timer: Option<TimerId>,
    pending: Option<Snapshot>,
    latest: Option<Snapshot>,
    deliveries: u64,
}

impl std::fmt::Debug for Throttler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Throttler")
            .field("state", &self.state())
            .field("pending", &self.pending)
            .field("deliveries", &self.deliveries)
            .finish()
    }
}

impl Throttler {
    /// `tick` is what the armed timer calls; the owner routes it back into
    /// [`on_timer`](Self::on_timer).
    pub fn new(handle: LoopHandle, tick: impl Fn() + 'static) -> Self {
        Self {
            handle,
            tick: Rc::new(tick),
            interval: THROTTLE_INTERVAL,
            timer: None,
            pending: None,
            latest: None,
            deliveries: 0,
        }
    }

    pub fn state(&self) -> ThrottleState {
        if self.timer.is_some() {
            ThrottleState::Scheduled
        } else {
            ThrottleState::Idle
        }
    }

    pub fn is_scheduled(&self) -> bool {
        self.timer.is_some()
    }

    pub fn pending(&self) -> Option<&Snapshot> {
        self.pending.as_ref()
    }

    /// Most recently delivered-or-pending snapshot.
    pub fn latest(&self) -> Option<&Snapshot> {
        self.latest.as_ref()
    }

    pub fn deliveries(&self) -> u64 {
        self.deliveries
    }

    pub fn queue(
        &mut self,
        snapshot: Snapshot,
        gate: &dyn ResourceGate,
        out: &mut impl Publish,
    ) -> QueueOutcome {
        if let Some(reason) = ignore_reason(self.latest.as_ref(), &snapshot) {
            debug!(
                reason = reason.as_str(),
                session = %snapshot.session_id(),
                "snapshot ignored"
            );
            return QueueOutcome::Ignored(reason);
        }

        self.latest = Some(snapshot.clone());
        if self.timer.is_some() {
            trace!(session = %snapshot.session_id(), "window open, snapshot kept pending");
            self.pending = Some(snapshot);
            return QueueOutcome::Pending;
        }
        self.deliver_or_defer(snapshot, gate, out)
    }

    /// Called by the owner when the window timer fires.
    pub fn on_timer(&mut self, gate: &dyn ResourceGate, out: &mut impl Publish) -> Option<QueueOutcome> {
        // A tick for a timer that was cleared meanwhile.
        self.timer.take()?;
        let snapshot = self.pending.take()?;
        Some(self.deliver_or_defer(snapshot, gate, out))
    }

    /// Forgets the duplicate memory and queues `snapshot` again, still subject
    /// to the window.
    pub fn republish(
        &mut self,
        snapshot: Snapshot,
        gate: &dyn ResourceGate,
        out: &mut impl Publish,
    ) -> QueueOutcome {
        self.latest = None;
        self.queue(snapshot, gate, out)
    }

    /// Delivers a snapshot held back by a closed gate, if the gate opened and
    /// no window is open.
    pub fn resume(&mut self, gate: &dyn ResourceGate, out: &mut impl Publish) -> Option<QueueOutcome> {
        if self.timer.is_some() {
            return None;
        }
        let snapshot = self.pending.take()?;
        Some(self.deliver_or_defer(snapshot, gate, out))
    }

    /// Cancels the open window and drops the pending snapshot, without a
    /// final delivery.
    pub fn clear_pending_notifications(&mut self) {
        if let Some(timer) = self.timer.take() {
            self.handle.cancel(timer);
        }
        self.pending = None;
    }

    /// Full reset: also forgets the last accepted snapshot.
    pub fn reset(&mut self) {
        self.clear_pending_notifications();
        self.latest = None;
    }

    fn deliver_or_defer(
        &mut self,
        snapshot: Snapshot,
        gate: &dyn ResourceGate,
        out: &mut impl Publish,
    ) -> QueueOutcome {
        if !gate.is_ready() {
            debug!(session = %snapshot.session_id(), "resource not ready, delivery deferred");
            self.pending = Some(snapshot);
            return QueueOutcome::Deferred;
        }

        self.pending = None;
        out.publish(&snapshot);
        self.deliveries += 1;

        let tick = Rc::clone(&self.tick);
        self.timer = Some(self.handle.post_delayed(self.interval, move || tick()));
        QueueOutcome::Delivered
    }
}

impl Drop for Throttler {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            self.handle.cancel(timer);
        }
    }
}
