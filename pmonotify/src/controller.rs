//! Orchestrator of one notification surface.
//!
//! A [`Controller`] owns the session lifecycle: it decides when the host task
//! must be launched, promoted, downgraded or stopped, it forwards snapshots to
//! its [`Throttler`] and it dispatches inbound action tokens to the listener
//! of the current snapshot.
//!
//! ```text
//! Inactive --bind(task)--> Bound
//! Bound --delivery--> Foreground
//! Foreground --hide, paused && dismissible--> Background
//! Foreground | Background --hide, otherwise--> Inactive (task stopped)
//! any --unbind--> Inactive
//! ```
//!
//! Every deferred callback (throttle tick, resource settlement) holds a weak
//! reference to the controller and checks the torn-down flag before touching
//! state.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tracing::{debug, info, trace, warn};

use crate::action::{ActionSource, ActionToken, MediaAction};
use crate::deferred::{DeferredResource, ResourceOutcome, ResourceState};
use crate::errors::{RenderError, ResourceUnavailable};
use crate::event_loop::LoopHandle;
use crate::manager::ControllerId;
use crate::snapshot::{ListenerRef, SessionInstanceId, Snapshot};
use crate::throttler::{Publish, ThrottleState, Throttler, ignore_reason};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ControllerState {
    Inactive,
    Bound,
    Foreground,
    Background,
}

impl ControllerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControllerState::Inactive => "inactive",
            ControllerState::Bound => "bound",
            ControllerState::Foreground => "foreground",
            ControllerState::Background => "background",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskPriority {
    Foreground,
    Background,
}

/// The host's long-running execution unit.
pub trait TaskHandle {
    fn set_priority(&mut self, priority: TaskPriority);
    fn stop(&mut self);
}

/// Everything the controller needs from the platform.
///
/// Methods are called on the loop thread. They must not call back into the
/// same controller synchronously: such calls are dropped with a warning.
pub trait NotificationHost: 'static {
    /// Value required before any render (a media session, a channel...).
    type Resource: 'static;

    fn create_resource(&self) -> Result<Self::Resource, ResourceUnavailable>;

    fn render(&self, snapshot: &Snapshot, resource: &Self::Resource) -> Result<(), RenderError>;

    /// Removes everything this controller rendered.
    fn cancel_all(&self);

    /// Asks the platform to start the host task. The platform answers later
    /// with [`Controller::on_task_started`].
    fn launch_task(&self);

    /// The resource could not be created; the controller stays silent from
    /// now on.
    fn on_degraded(&self, _reason: &ResourceUnavailable) {}
}

/// Render side of the controller: what a throttler delivery touches.
struct Presenter<H: NotificationHost> {
    id: ControllerId,
    host: Rc<H>,
    resource: DeferredResource<H::Resource>,
    state: ControllerState,
    task: Option<Box<dyn TaskHandle>>,
    renders: u64,
}

impl<H: NotificationHost> Presenter<H> {
    fn promote(&mut self) {
        self.state = ControllerState::Foreground;
        if let Some(task) = self.task.as_mut() {
            task.set_priority(TaskPriority::Foreground);
        }
        info!(controller = %self.id, "notification in foreground");
    }
}

impl<H: NotificationHost> Publish for Presenter<H> {
    fn publish(&mut self, snapshot: &Snapshot) {
        if self.state == ControllerState::Inactive {
            debug!(controller = %self.id, "no task bound, render skipped");
            return;
        }

        let host = &self.host;
        match self.resource.with(|resource| host.render(snapshot, resource)) {
            Some(Ok(())) => {
                self.renders += 1;
                trace!(
                    controller = %self.id,
                    session = %snapshot.session_id(),
                    paused = snapshot.is_paused(),
                    "rendered"
                );
            }
            Some(Err(err)) => {
                warn!(controller = %self.id, error = %err, "render failed");
            }
            None => {
                warn!(controller = %self.id, "render requested without a resource");
            }
        }

        match self.state {
            ControllerState::Bound => self.promote(),
            ControllerState::Background if !snapshot.is_paused() => self.promote(),
            _ => {}
        }
    }
}

struct ControllerCore<H: NotificationHost> {
    handle: LoopHandle,
    presenter: Presenter<H>,
    throttler: Throttler,
    last: Option<Snapshot>,
    launch_requested: bool,
    degraded: bool,
    torn_down: bool,
}

impl<H: NotificationHost> ControllerCore<H> {
    fn id(&self) -> &ControllerId {
        &self.presenter.id
    }

    fn is_dismissible(&self) -> bool {
        self.last
            .as_ref()
            .is_some_and(|s| s.is_paused() && s.swipe_dismissible())
    }

    /// Returns the host when a task launch must be requested.
    fn show(&mut self, snapshot: Snapshot) -> Option<Rc<H>> {
        if self.torn_down {
            return None;
        }
        if self.degraded {
            debug!(controller = %self.id(), "resource unavailable, show ignored");
            return None;
        }
        if let Some(reason) = ignore_reason(self.last.as_ref(), &snapshot) {
            debug!(
                controller = %self.id(),
                reason = reason.as_str(),
                session = %snapshot.session_id(),
                "show ignored"
            );
            return None;
        }

        self.presenter.resource.schedule_if_needed(&self.handle);
        self.last = Some(snapshot.clone());

        if self.presenter.state == ControllerState::Inactive {
            if self.launch_requested {
                trace!(controller = %self.id(), "task launch already requested");
                return None;
            }
            self.launch_requested = true;
            info!(controller = %self.id(), "requesting task launch");
            return Some(Rc::clone(&self.presenter.host));
        }

        let gate = self.presenter.resource.clone();
        self.throttler.queue(snapshot, &gate, &mut self.presenter);
        None
    }

    fn hide(&mut self) {
        if self.torn_down {
            return;
        }
        match self.presenter.state {
            ControllerState::Foreground if self.is_dismissible() => {
                self.presenter.state = ControllerState::Background;
                if let Some(task) = self.presenter.task.as_mut() {
                    task.set_priority(TaskPriority::Background);
                }
                info!(controller = %self.id(), "notification moved to background");
            }
            ControllerState::Background if self.is_dismissible() => {
                debug!(controller = %self.id(), "already in background");
            }
            _ => self.stop("hide"),
        }
    }

    /// Full teardown of the displayed state. The controller stays usable.
    fn stop(&mut self, reason: &'static str) {
        self.throttler.reset();
        self.presenter.host.cancel_all();
        if let Some(mut task) = self.presenter.task.take() {
            task.stop();
        }
        self.last = None;
        self.launch_requested = false;
        self.presenter.state = ControllerState::Inactive;
        info!(controller = %self.id(), reason, "notification stopped");
    }

    /// Attaches `task`. Returns true when the controller left `Inactive`.
    fn attach(&mut self, mut task: Box<dyn TaskHandle>) -> bool {
        let was_inactive = self.presenter.state == ControllerState::Inactive;
        match self.presenter.state {
            ControllerState::Inactive | ControllerState::Bound => {
                self.presenter.state = ControllerState::Bound;
            }
            ControllerState::Foreground => task.set_priority(TaskPriority::Foreground),
            ControllerState::Background => task.set_priority(TaskPriority::Background),
        }
        self.presenter.task = Some(task);
        self.launch_requested = false;
        debug!(controller = %self.id(), state = self.presenter.state.as_str(), "task bound");
        was_inactive
    }

    /// Queues the last accepted snapshot again, bypassing the duplicate
    /// memory. It may never have been rendered.
    fn redisplay(&mut self) {
        let Some(last) = self.last.clone() else {
            debug!(controller = %self.id(), "nothing to display yet");
            return;
        };
        self.presenter.resource.schedule_if_needed(&self.handle);
        let gate = self.presenter.resource.clone();
        self.throttler.republish(last, &gate, &mut self.presenter);
    }

    fn bind(&mut self, task: Box<dyn TaskHandle>) {
        if self.attach(task) {
            self.redisplay();
        }
    }

    fn on_task_started(&mut self, mut task: Box<dyn TaskHandle>) {
        if self.torn_down {
            return;
        }
        if self.degraded {
            debug!(controller = %self.id(), "resource unavailable, task stopped at start");
            task.stop();
            return;
        }

        self.attach(task);
        self.redisplay();
    }

    fn unbind(&mut self) {
        if self.torn_down {
            return;
        }
        self.throttler.clear_pending_notifications();
        self.presenter.task = None;
        self.presenter.state = ControllerState::Inactive;
        self.launch_requested = false;
        debug!(controller = %self.id(), "task unbound");
    }

    fn on_task_destroyed(&mut self) {
        if self.torn_down {
            return;
        }
        self.presenter.task = None;
        self.presenter.state = ControllerState::Inactive;
        self.launch_requested = false;
        info!(
            controller = %self.id(),
            retained = self.last.is_some(),
            "task destroyed"
        );
    }

    fn resolve_action(
        &self,
        raw: &str,
        source: ActionSource,
    ) -> Option<(ListenerRef, MediaAction, ActionSource)> {
        if self.torn_down {
            return None;
        }
        let Some(token) = ActionToken::parse(raw) else {
            debug!(controller = %self.id(), token = raw, "unknown action token ignored");
            return None;
        };
        let Some(snapshot) = self.last.as_ref() else {
            debug!(controller = %self.id(), token = raw, "no snapshot, action dropped");
            return None;
        };
        let Some(listener) = snapshot.listener() else {
            debug!(controller = %self.id(), token = raw, "snapshot has no listener");
            return None;
        };
        let Some((action, source)) = token.resolve(source, snapshot.is_paused()) else {
            debug!(controller = %self.id(), token = raw, "action has no effect in current state");
            return None;
        };
        Some((listener.clone(), action, source))
    }

    /// Returns the host and the reason when the controller just degraded.
    fn on_resource_settled(&mut self, outcome: &ResourceOutcome) -> Option<(Rc<H>, ResourceUnavailable)> {
        if self.torn_down {
            return None;
        }
        match outcome {
            ResourceOutcome::Ready => {
                let gate = self.presenter.resource.clone();
                self.throttler.resume(&gate, &mut self.presenter);
                None
            }
            ResourceOutcome::Unavailable(reason) => {
                warn!(controller = %self.id(), reason = %reason, "entering degraded mode");
                self.degraded = true;
                self.stop("resource-unavailable");
                Some((Rc::clone(&self.presenter.host), reason.clone()))
            }
        }
    }

    fn on_throttle_tick(&mut self) {
        if self.torn_down {
            return;
        }
        let gate = self.presenter.resource.clone();
        self.throttler.on_timer(&gate, &mut self.presenter);
    }

    fn destroy(&mut self) {
        if self.torn_down {
            return;
        }
        self.throttler.reset();
        self.presenter.resource.cancel_pending();
        self.presenter.host.cancel_all();
        if let Some(mut task) = self.presenter.task.take() {
            task.stop();
        }
        self.last = None;
        self.presenter.state = ControllerState::Inactive;
        self.torn_down = true;
        info!(controller = %self.id(), "controller destroyed");
    }
}

fn with_core<H: NotificationHost, T>(
    core: &RefCell<ControllerCore<H>>,
    op: &'static str,
    f: impl FnOnce(&mut ControllerCore<H>) -> T,
) -> Option<T> {
    match core.try_borrow_mut() {
        Ok(mut core) => Some(f(&mut core)),
        Err(_) => {
            warn!(op, "reentrant call into controller ignored");
            None
        }
    }
}

fn settle<H: NotificationHost>(core: &RefCell<ControllerCore<H>>, outcome: &ResourceOutcome) {
    let degraded = with_core(core, "on_resource_settled", |core| core.on_resource_settled(outcome)).flatten();
    // Outside of the borrow: the host may call back.
    if let Some((host, reason)) = degraded {
        host.on_degraded(&reason);
    }
}

/// Handle on one orchestrator. Lives on the loop thread.
///
/// While a host callback runs (`render`, `cancel_all`...) the controller is
/// busy: mutations are dropped with a warning and the accessors answer with
/// their resting value (`Inactive`, `None`, `false`, `0`).
pub struct Controller<H: NotificationHost> {
    id: ControllerId,
    core: Rc<RefCell<ControllerCore<H>>>,
}

impl<H: NotificationHost> std::fmt::Debug for Controller<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.core.try_borrow() {
            Ok(core) => f
                .debug_struct("Controller")
                .field("id", core.id())
                .field("state", &core.presenter.state)
                .field("degraded", &core.degraded)
                .field("torn_down", &core.torn_down)
                .finish(),
            Err(_) => f.write_str("Controller(<busy>)"),
        }
    }
}

impl<H: NotificationHost> Controller<H> {
    pub fn new(id: ControllerId, host: Rc<H>, handle: LoopHandle) -> Self {
        let controller_id = id.clone();
        let core = Rc::new_cyclic(|weak: &Weak<RefCell<ControllerCore<H>>>| {
            let tick = weak.clone();
            let throttler = Throttler::new(handle.clone(), move || {
                if let Some(core) = tick.upgrade() {
                    with_core(&*core, "on_throttle_tick", |core| core.on_throttle_tick());
                }
            });

            let factory_host = Rc::clone(&host);
            let resource = DeferredResource::new(move || factory_host.create_resource());
            let settled = weak.clone();
            resource.on_settled(move |outcome| {
                if let Some(core) = settled.upgrade() {
                    settle(&*core, outcome);
                }
            });

            RefCell::new(ControllerCore {
                handle,
                presenter: Presenter {
                    id,
                    host,
                    resource,
                    state: ControllerState::Inactive,
                    task: None,
                    renders: 0,
                },
                throttler,
                last: None,
                launch_requested: false,
                degraded: false,
                torn_down: false,
            })
        });
        Self {
            id: controller_id,
            core,
        }
    }

    fn with_core<T>(&self, op: &'static str, f: impl FnOnce(&mut ControllerCore<H>) -> T) -> Option<T> {
        with_core(&*self.core, op, f)
    }

    fn peek<T>(&self, f: impl FnOnce(&ControllerCore<H>) -> T) -> Option<T> {
        match self.core.try_borrow() {
            Ok(core) => Some(f(&core)),
            Err(_) => {
                debug!(controller = %self.id, "controller busy, read skipped");
                None
            }
        }
    }

    /// Displays `snapshot`, subject to suppression and rate limiting.
    pub fn show(&self, snapshot: Snapshot) {
        if let Some(host) = self.with_core("show", |core| core.show(snapshot)).flatten() {
            host.launch_task();
        }
    }

    pub fn hide(&self) {
        self.with_core("hide", |core| core.hide());
    }

    /// Hides only if `session` owns the current snapshot.
    pub fn hide_for_session(&self, session: &SessionInstanceId) {
        self.with_core("hide_for_session", |core| {
            let owned = core
                .last
                .as_ref()
                .is_some_and(|s| s.session_id() == session);
            if owned {
                core.hide();
            } else {
                debug!(controller = %core.id(), session = %session, "hide for another session ignored");
            }
        });
    }

    /// Unconditional teardown of the displayed notification.
    pub fn clear(&self) {
        self.with_core("clear", |core| {
            if !core.torn_down {
                core.stop("clear");
            }
        });
    }

    pub fn bind(&self, task: Box<dyn TaskHandle>) {
        self.with_core("bind", |core| {
            if !core.torn_down {
                core.bind(task);
            }
        });
    }

    /// Drops the task binding without stopping the task.
    pub fn unbind(&self) {
        self.with_core("unbind", |core| core.unbind());
    }

    /// Binds the started task and redisplays the last snapshot, if any.
    pub fn on_task_started(&self, task: Box<dyn TaskHandle>) {
        self.with_core("on_task_started", |core| core.on_task_started(task));
    }

    /// Forgets the task; the last snapshot is kept for the next start.
    pub fn on_task_destroyed(&self) {
        self.with_core("on_task_destroyed", |core| core.on_task_destroyed());
    }

    /// Forwards an inbound token to the listener of the current snapshot.
    ///
    /// Returns the action that reached the listener.
    pub fn process_action(&self, token: &str, source: ActionSource) -> Option<MediaAction> {
        let resolved = self
            .with_core("process_action", |core| core.resolve_action(token, source))
            .flatten();
        let (listener, action, source) = resolved?;
        debug!(action = %action.kind(), source = source.as_str(), "dispatching action");
        // Outside of the borrow: the listener may queue a new snapshot.
        listener.notify(action, source);
        Some(action)
    }

    /// Cancels every timer and idle registration and stops the task. Every
    /// later call is a no-op.
    pub fn destroy(&self) {
        self.with_core("destroy", |core| core.destroy());
    }

    pub fn id(&self) -> &ControllerId {
        &self.id
    }

    pub fn state(&self) -> ControllerState {
        self.peek(|core| core.presenter.state)
            .unwrap_or(ControllerState::Inactive)
    }

    pub fn last_snapshot(&self) -> Option<Snapshot> {
        self.peek(|core| core.last.clone()).flatten()
    }

    pub fn is_degraded(&self) -> bool {
        self.peek(|core| core.degraded).unwrap_or(false)
    }

    pub fn is_torn_down(&self) -> bool {
        self.peek(|core| core.torn_down).unwrap_or(false)
    }

    pub fn is_launch_requested(&self) -> bool {
        self.peek(|core| core.launch_requested).unwrap_or(false)
    }

    pub fn resource_state(&self) -> ResourceState {
        self.peek(|core| core.presenter.resource.state())
            .unwrap_or(ResourceState::Uninitialized)
    }

    pub fn throttle_state(&self) -> ThrottleState {
        self.peek(|core| core.throttler.state())
            .unwrap_or(ThrottleState::Idle)
    }

    /// Successful renders so far.
    pub fn render_count(&self) -> u64 {
        self.peek(|core| core.presenter.renders).unwrap_or(0)
    }
}
