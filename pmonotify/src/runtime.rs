//! Cross-thread boundary.
//!
//! Producers live on arbitrary threads; every controller lives on the loop
//! thread. A [`NotifierHandle`] turns producer calls into [`Command`]s sent
//! over a crossbeam channel, and the [`NotificationRuntime`] applies them on
//! the loop thread, between loop callbacks.

use std::fmt;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, unbounded};
use tracing::{debug, info, trace};

use crate::action::ActionSource;
use crate::controller::{NotificationHost, TaskHandle};
use crate::event_loop::EventLoop;
use crate::manager::{ControllerId, NotificationManager};
use crate::snapshot::{SessionInstanceId, Snapshot};

/// A producer call, marshalled onto the loop thread.
pub enum Command {
    Queue {
        controller: ControllerId,
        snapshot: Snapshot,
    },
    Clear {
        controller: ControllerId,
    },
    Hide {
        controller: ControllerId,
        session: SessionInstanceId,
    },
    Action {
        controller: ControllerId,
        token: String,
        source: ActionSource,
    },
    TaskStarted {
        controller: ControllerId,
        task: Box<dyn TaskHandle + Send>,
    },
    TaskDestroyed {
        controller: ControllerId,
    },
    Shutdown,
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Queue { .. } => "queue",
            Command::Clear { .. } => "clear",
            Command::Hide { .. } => "hide",
            Command::Action { .. } => "action",
            Command::TaskStarted { .. } => "task-started",
            Command::TaskDestroyed { .. } => "task-destroyed",
            Command::Shutdown => "shutdown",
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Queue {
                controller,
                snapshot,
            } => f
                .debug_struct("Queue")
                .field("controller", controller)
                .field("snapshot", snapshot)
                .finish(),
            Command::Clear { controller } | Command::TaskDestroyed { controller } => f
                .debug_struct(self.name())
                .field("controller", controller)
                .finish(),
            Command::Hide {
                controller,
                session,
            } => f
                .debug_struct("Hide")
                .field("controller", controller)
                .field("session", session)
                .finish(),
            Command::Action {
                controller,
                token,
                source,
            } => f
                .debug_struct("Action")
                .field("controller", controller)
                .field("token", token)
                .field("source", source)
                .finish(),
            Command::TaskStarted { controller, .. } => f
                .debug_struct("TaskStarted")
                .field("controller", controller)
                .finish_non_exhaustive(),
            Command::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// Thread-safe entry point for producers and platform callbacks.
///
/// Every method returns false when the runtime is gone; nothing else is
/// reported back.
#[derive(Clone, Debug)]
pub struct NotifierHandle {
    tx: Sender<Command>,
}

impl NotifierHandle {
    fn send(&self, command: Command) -> bool {
        let name = command.name();
        match self.tx.send(command) {
            Ok(()) => true,
            Err(_) => {
                trace!(command = name, "runtime gone, command dropped");
                false
            }
        }
    }

    pub fn queue_notification(&self, controller: impl Into<ControllerId>, snapshot: Snapshot) -> bool {
        self.send(Command::Queue {
            controller: controller.into(),
            snapshot,
        })
    }

    pub fn clear_notification(&self, controller: impl Into<ControllerId>) -> bool {
        self.send(Command::Clear {
            controller: controller.into(),
        })
    }

    pub fn hide_notification(&self, controller: impl Into<ControllerId>, session: SessionInstanceId) -> bool {
        self.send(Command::Hide {
            controller: controller.into(),
            session,
        })
    }

    pub fn process_action(
        &self,
        controller: impl Into<ControllerId>,
        token: impl Into<String>,
        source: ActionSource,
    ) -> bool {
        self.send(Command::Action {
            controller: controller.into(),
            token: token.into(),
            source,
        })
    }

    pub fn on_task_started(&self, controller: impl Into<ControllerId>, task: Box<dyn TaskHandle + Send>) -> bool {
        self.send(Command::TaskStarted {
            controller: controller.into(),
            task,
        })
    }

    pub fn on_task_destroyed(&self, controller: impl Into<ControllerId>) -> bool {
        self.send(Command::TaskDestroyed {
            controller: controller.into(),
        })
    }

    pub fn shutdown(&self) -> bool {
        self.send(Command::Shutdown)
    }
}

/// Loop thread side: owns the loop, the controllers and the receiver.
pub struct NotificationRuntime<H: NotificationHost> {
    event_loop: EventLoop,
    manager: NotificationManager<H>,
    rx: Receiver<Command>,
    commands: u64,
    stopped: bool,
}

impl<H: NotificationHost> NotificationRuntime<H> {
    /// The runtime keeps no sender of its own: once every handle is dropped,
    /// [`run`](Self::run) returns.
    pub fn new(event_loop: EventLoop) -> (Self, NotifierHandle) {
        let (tx, rx) = unbounded();
        let manager = NotificationManager::new(event_loop.handle());
        let runtime = Self {
            event_loop,
            manager,
            rx,
            commands: 0,
            stopped: false,
        };
        (runtime, NotifierHandle { tx })
    }

    pub fn event_loop(&self) -> &EventLoop {
        &self.event_loop
    }

    pub fn manager(&self) -> &NotificationManager<H> {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut NotificationManager<H> {
        &mut self.manager
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Commands applied so far.
    pub fn command_count(&self) -> u64 {
        self.commands
    }

    fn dispatch(&mut self, command: Command) {
        self.commands += 1;
        trace!(command = command.name(), "dispatching command");
        match command {
            Command::Queue {
                controller,
                snapshot,
            } => self.manager.queue_notification(&controller, snapshot),
            Command::Clear { controller } => self.manager.clear_notification(&controller),
            Command::Hide {
                controller,
                session,
            } => self.manager.hide_notification(&controller, &session),
            Command::Action {
                controller,
                token,
                source,
            } => {
                self.manager.process_action(&controller, &token, source);
            }
            Command::TaskStarted { controller, task } => {
                let task: Box<dyn TaskHandle> = task;
                self.manager.on_task_started(&controller, task);
            }
            Command::TaskDestroyed { controller } => self.manager.on_task_destroyed(&controller),
            Command::Shutdown => self.teardown("shutdown requested"),
        }
    }

    /// Applies every queued command. Returns how many were applied.
    fn drain(&mut self) -> usize {
        let mut applied = 0;
        while !self.stopped {
            match self.rx.try_recv() {
                Ok(command) => {
                    self.dispatch(command);
                    applied += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        applied
    }

    /// Non-blocking step: applies queued commands, runs ready callbacks and,
    /// if the loop is then idle, its idle callbacks.
    pub fn pump(&mut self) -> usize {
        let applied = self.drain();
        if self.stopped {
            return applied;
        }
        self.event_loop.run_pending();
        if !self.event_loop.has_ready_work() && self.event_loop.has_idle() {
            self.event_loop.run_idle();
            self.event_loop.run_pending();
        }
        applied
    }

    /// Drives the loop until [`Command::Shutdown`] arrives or every
    /// [`NotifierHandle`] is dropped.
    pub fn run(&mut self) {
        info!("notification runtime started");
        while !self.stopped {
            self.drain();
            if self.stopped {
                break;
            }
            self.event_loop.run_pending();
            if self.event_loop.has_ready_work() {
                continue;
            }
            if self.event_loop.has_idle() {
                self.event_loop.run_idle();
                continue;
            }

            let received = match self.event_loop.next_deadline() {
                Some(deadline) => {
                    let wait = deadline.saturating_sub(self.event_loop.now());
                    match self.rx.recv_timeout(wait) {
                        Ok(command) => Some(command),
                        Err(RecvTimeoutError::Timeout) => {
                            if self.event_loop.is_manual() {
                                self.event_loop.advance_to(deadline);
                            }
                            None
                        }
                        Err(RecvTimeoutError::Disconnected) => {
                            self.teardown("all handles dropped");
                            None
                        }
                    }
                }
                None => match self.rx.recv() {
                    Ok(command) => Some(command),
                    Err(_) => {
                        self.teardown("all handles dropped");
                        None
                    }
                },
            };
            if let Some(command) = received {
                self.dispatch(command);
            }
        }
        info!(commands = self.commands, "notification runtime stopped");
    }

    fn teardown(&mut self, reason: &'static str) {
        if self.stopped {
            return;
        }
        debug!(reason, "tearing down notification runtime");
        self.manager.shutdown();
        self.event_loop.shutdown();
        self.stopped = true;
    }
}
