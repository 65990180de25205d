//! Update coordination core for media playback notifications.
//!
//! Producers publish [`Snapshot`]s at any cadence; a [`Controller`] per
//! notification surface suppresses redundant ones, rate-limits the rest
//! through a [`Throttler`], waits for a lazily built resource and drives the
//! lifecycle of the host task. Everything runs on one [`EventLoop`]; other
//! threads go through a [`NotifierHandle`].

pub mod action;
pub mod controller;
pub mod deferred;
pub mod errors;
pub mod event_loop;
pub mod manager;
pub mod runtime;
pub mod snapshot;
pub mod throttler;

pub use action::{ActionKind, ActionSource, ActionToken, MediaAction};
pub use controller::{Controller, ControllerState, NotificationHost, TaskHandle, TaskPriority};
pub use deferred::{
    DEFERRED_INIT_MAX_WAIT, DeferredResource, ResourceGate, ResourceOutcome, ResourceState,
};
pub use errors::{NotifyError, RenderError, ResourceUnavailable};
pub use event_loop::{EventLoop, IdleId, LoopHandle, TimerId};
pub use manager::{ControllerId, NotificationManager};
pub use runtime::{Command, NotificationRuntime, NotifierHandle};
pub use snapshot::{
    ActionListener, IconRef, ListenerRef, PositionState, SessionInstanceId, Snapshot,
    SnapshotBuilder, TrackMetadata,
};
pub use throttler::{
    IgnoreReason, Publish, QueueOutcome, THROTTLE_INTERVAL, ThrottleState, Throttler,
    ignore_reason, should_ignore,
};
