//! Routing table from external identifiers to controllers.
//!
//! The manager is built explicitly at startup and passed by reference. It only
//! forwards calls: every piece of throttling or lifecycle state lives in the
//! [`Controller`] it routes to.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use tracing::{info, warn};

use crate::action::{ActionSource, MediaAction};
use crate::controller::{Controller, NotificationHost, TaskHandle};
use crate::errors::NotifyError;
use crate::event_loop::LoopHandle;
use crate::snapshot::{SessionInstanceId, Snapshot};

/// External identifier of a controller.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ControllerId(pub String);

impl ControllerId {
    pub fn new(id: impl Into<String>) -> Self {
        ControllerId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ControllerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ControllerId {
    fn from(id: &str) -> Self {
        ControllerId::new(id)
    }
}

pub struct NotificationManager<H: NotificationHost> {
    handle: LoopHandle,
    controllers: HashMap<ControllerId, Controller<H>>,
}

impl<H: NotificationHost> fmt::Debug for NotificationManager<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationManager")
            .field("controllers", &self.ids())
            .finish()
    }
}

impl<H: NotificationHost> NotificationManager<H> {
    pub fn new(handle: LoopHandle) -> Self {
        Self {
            handle,
            controllers: HashMap::new(),
        }
    }

    pub fn register(&mut self, id: impl Into<ControllerId>, host: Rc<H>) -> Result<(), NotifyError> {
        let id = id.into();
        if !self.handle.is_alive() {
            return Err(NotifyError::LoopStopped);
        }
        if self.controllers.contains_key(&id) {
            return Err(NotifyError::AlreadyRegistered(id.0));
        }
        let controller = Controller::new(id.clone(), host, self.handle.clone());
        info!(controller = %id, "controller registered");
        self.controllers.insert(id, controller);
        Ok(())
    }

    /// Destroys and forgets a controller. Returns false for an unknown id.
    pub fn unregister(&mut self, id: &ControllerId) -> bool {
        match self.controllers.remove(id) {
            Some(controller) => {
                controller.destroy();
                info!(controller = %id, "controller unregistered");
                true
            }
            None => false,
        }
    }

    pub fn controller(&self, id: &ControllerId) -> Option<&Controller<H>> {
        self.controllers.get(id)
    }

    pub fn try_controller(&self, id: &ControllerId) -> Result<&Controller<H>, NotifyError> {
        self.controllers
            .get(id)
            .ok_or_else(|| NotifyError::UnknownController(id.0.clone()))
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<ControllerId> {
        let mut ids: Vec<ControllerId> = self.controllers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    fn route(&self, id: &ControllerId, op: &'static str) -> Option<&Controller<H>> {
        let controller = self.controllers.get(id);
        if controller.is_none() {
            warn!(controller = %id, op, "unknown controller");
        }
        controller
    }

    pub fn queue_notification(&self, id: &ControllerId, snapshot: Snapshot) {
        if let Some(controller) = self.route(id, "queue_notification") {
            controller.show(snapshot);
        }
    }

    pub fn clear_notification(&self, id: &ControllerId) {
        if let Some(controller) = self.route(id, "clear_notification") {
            controller.clear();
        }
    }

    pub fn hide_notification(&self, id: &ControllerId, session: &SessionInstanceId) {
        if let Some(controller) = self.route(id, "hide_notification") {
            controller.hide_for_session(session);
        }
    }

    pub fn process_action(&self, id: &ControllerId, token: &str, source: ActionSource) -> Option<MediaAction> {
        self.route(id, "process_action")
            .and_then(|controller| controller.process_action(token, source))
    }

    pub fn on_task_started(&self, id: &ControllerId, task: Box<dyn TaskHandle>) {
        match self.route(id, "on_task_started") {
            Some(controller) => controller.on_task_started(task),
            None => {
                // Nobody will ever stop it otherwise.
                let mut task = task;
                task.stop();
            }
        }
    }

    pub fn on_task_destroyed(&self, id: &ControllerId) {
        if let Some(controller) = self.route(id, "on_task_destroyed") {
            controller.on_task_destroyed();
        }
    }

    /// Destroys every controller.
    pub fn shutdown(&mut self) {
        for (id, controller) in self.controllers.drain() {
            controller.destroy();
            info!(controller = %id, "controller shut down");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use super::*;
    use crate::action::ActionKind;
    use crate::controller::ControllerState;
    use crate::errors::{RenderError, ResourceUnavailable};
    use crate::event_loop::EventLoop;
    use crate::snapshot::TrackMetadata;

    #[derive(Default)]
    struct CountingHost {
        renders: Cell<u32>,
        launches: Cell<u32>,
    }

    impl NotificationHost for CountingHost {
        type Resource = ();

        fn create_resource(&self) -> Result<(), ResourceUnavailable> {
            Ok(())
        }

        fn render(&self, _snapshot: &Snapshot, _resource: &()) -> Result<(), RenderError> {
            self.renders.set(self.renders.get() + 1);
            Ok(())
        }

        fn cancel_all(&self) {}

        fn launch_task(&self) {
            self.launches.set(self.launches.get() + 1);
        }
    }

    struct StopFlag(Rc<RefCell<bool>>);

    impl TaskHandle for StopFlag {
        fn set_priority(&mut self, _priority: crate::controller::TaskPriority) {}

        fn stop(&mut self) {
            *self.0.borrow_mut() = true;
        }
    }

    fn snapshot(title: &str) -> Snapshot {
        Snapshot::builder(SessionInstanceId::new("s1"))
            .action(ActionKind::Play)
            .metadata(TrackMetadata::new(title, "", ""))
            .build()
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let event_loop = EventLoop::manual();
        let mut manager = NotificationManager::new(event_loop.handle());

        assert!(manager.register("a", Rc::new(CountingHost::default())).is_ok());
        assert_eq!(
            manager.register("a", Rc::new(CountingHost::default())),
            Err(NotifyError::AlreadyRegistered("a".to_string()))
        );
        manager.register("b", Rc::new(CountingHost::default())).unwrap();
        assert_eq!(manager.ids(), vec![ControllerId::from("a"), ControllerId::from("b")]);
    }

    #[test]
    fn test_register_after_loop_shutdown() {
        let event_loop = EventLoop::manual();
        let mut manager: NotificationManager<CountingHost> = NotificationManager::new(event_loop.handle());
        event_loop.shutdown();
        assert_eq!(
            manager.register("a", Rc::new(CountingHost::default())),
            Err(NotifyError::LoopStopped)
        );
    }

    #[test]
    fn test_routes_to_the_right_controller() {
        let event_loop = EventLoop::manual();
        let mut manager = NotificationManager::new(event_loop.handle());
        let first = Rc::new(CountingHost::default());
        let second = Rc::new(CountingHost::default());
        manager.register("first", Rc::clone(&first)).unwrap();
        manager.register("second", Rc::clone(&second)).unwrap();

        manager.queue_notification(&"first".into(), snapshot("A"));
        assert_eq!(first.launches.get(), 1);
        assert_eq!(second.launches.get(), 0);

        // Unknown ids are dropped.
        manager.queue_notification(&"third".into(), snapshot("A"));
        manager.clear_notification(&"third".into());
        assert_eq!(
            manager.try_controller(&"third".into()).err(),
            Some(NotifyError::UnknownController("third".to_string()))
        );
    }

    #[test]
    fn test_unknown_controller_task_is_stopped() {
        let event_loop = EventLoop::manual();
        let manager: NotificationManager<CountingHost> = NotificationManager::new(event_loop.handle());
        let stopped = Rc::new(RefCell::new(false));
        manager.on_task_started(&"ghost".into(), Box::new(StopFlag(Rc::clone(&stopped))));
        assert!(*stopped.borrow());
    }

    #[test]
    fn test_unregister_and_shutdown_destroy_controllers() {
        let event_loop = EventLoop::manual();
        let mut manager = NotificationManager::new(event_loop.handle());
        let host = Rc::new(CountingHost::default());
        manager.register("a", Rc::clone(&host)).unwrap();
        manager.register("b", Rc::new(CountingHost::default())).unwrap();

        manager.queue_notification(&"a".into(), snapshot("A"));
        manager.on_task_started(&"a".into(), Box::new(StopFlag(Rc::new(RefCell::new(false)))));
        event_loop.run_idle();
        assert_eq!(
            manager.controller(&"a".into()).map(|c| c.state()),
            Some(ControllerState::Foreground)
        );

        assert!(manager.unregister(&"a".into()));
        assert!(!manager.unregister(&"a".into()));
        assert_eq!(manager.len(), 1);

        manager.shutdown();
        assert!(manager.is_empty());
        assert!(event_loop.is_quiescent());
        assert_eq!(host.renders.get(), 1);
    }
}
