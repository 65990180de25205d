//! Simulated producers driving one `media-playback` controller.
//!
//! The runtime runs on the calling thread; each producer is a thread of its
//! own, with its own session id, talking to the runtime through a
//! [`NotifierHandle`].

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use pmoconfig::SimulatorSettings;
use pmonotify::{
    ActionKind, ActionSource, EventLoop, ListenerRef, MediaAction, NotificationHost,
    NotificationRuntime, NotifierHandle, PositionState, RenderError, ResourceUnavailable,
    SessionInstanceId, Snapshot, THROTTLE_INTERVAL, TaskHandle, TaskPriority, TrackMetadata,
};
use tracing::{debug, info, warn};

pub const CONTROLLER: &str = "media-playback";

const TRACK_LENGTH: Duration = Duration::from_secs(180);

/// Host that logs what a real platform would display.
pub struct ConsoleHost {
    notifier: NotifierHandle,
    renders: Cell<u64>,
    launches: Cell<u64>,
}

impl ConsoleHost {
    pub fn new(notifier: NotifierHandle) -> Self {
        Self {
            notifier,
            renders: Cell::new(0),
            launches: Cell::new(0),
        }
    }
}

impl NotificationHost for ConsoleHost {
    type Resource = String;

    fn create_resource(&self) -> Result<String, ResourceUnavailable> {
        info!("🎛️ Media session created");
        Ok(format!("{CONTROLLER}-session"))
    }

    fn render(&self, snapshot: &Snapshot, resource: &String) -> Result<(), RenderError> {
        self.renders.set(self.renders.get() + 1);
        info!(
            session = %snapshot.session_id(),
            resource = %resource,
            paused = snapshot.is_paused(),
            "🔔 {} - {}",
            snapshot.metadata().artist,
            snapshot.metadata().title
        );
        Ok(())
    }

    fn cancel_all(&self) {
        info!("🧹 Notifications cancelled");
    }

    fn launch_task(&self) {
        self.launches.set(self.launches.get() + 1);
        // The platform starts the task, then calls the runtime back.
        if !self
            .notifier
            .on_task_started(CONTROLLER, Box::new(ConsoleTask::default()))
        {
            warn!("Runtime gone, task start dropped");
        }
    }

    fn on_degraded(&self, reason: &ResourceUnavailable) {
        warn!(reason = %reason, "⚠️ Notifications disabled");
    }
}

#[derive(Default)]
struct ConsoleTask {
    priority: Option<TaskPriority>,
}

impl TaskHandle for ConsoleTask {
    fn set_priority(&mut self, priority: TaskPriority) {
        if self.priority != Some(priority) {
            info!(?priority, "Task priority changed");
        }
        self.priority = Some(priority);
    }

    fn stop(&mut self) {
        info!("🛑 Task stopped");
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub snapshots_sent: u64,
    pub renders: u64,
    pub launches: u64,
    pub commands: u64,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} snapshot(s) sent, {} render(s), {} task launch(es), {} command(s) applied",
            self.snapshots_sent, self.renders, self.launches, self.commands
        )
    }
}

fn produce(notifier: NotifierHandle, producer: usize, settings: SimulatorSettings, sent: Arc<AtomicU64>) {
    let session = SessionInstanceId::generate();
    let interval = Duration::from_millis(settings.event_interval_ms.max(1));
    let started = Instant::now();
    let deadline = started + Duration::from_millis(settings.duration_ms);

    let listener = ListenerRef::new(move |action: MediaAction, source: ActionSource| {
        info!(producer, action = %action.kind(), source = source.as_str(), "Action received");
    });

    debug!(producer, session = %session, "Producer started");
    let mut event: u64 = 0;
    while Instant::now() < deadline {
        event += 1;
        let paused = settings.pause_every > 0 && event % settings.pause_every as u64 == 0;
        let position = PositionState::new(
            TRACK_LENGTH,
            (interval * event as u32).min(TRACK_LENGTH),
            if paused { 0.0 } else { 1.0 },
            started.elapsed(),
        );
        let snapshot = Snapshot::builder(session.clone())
            .actions([
                ActionKind::Play,
                ActionKind::Pause,
                ActionKind::SkipPrevious,
                ActionKind::SkipNext,
                ActionKind::SeekTo,
            ])
            .paused(paused)
            .swipe_dismissible(paused)
            .metadata(TrackMetadata::new(
                format!("Track {}", event / 4 + 1),
                format!("Producer {producer}"),
                "Simulated",
            ))
            .position(Some(position))
            .listener(listener.clone())
            .build();

        if !notifier.queue_notification(CONTROLLER, snapshot) {
            break;
        }
        sent.fetch_add(1, Ordering::Relaxed);

        if event % 7 == 0 {
            notifier.process_action(CONTROLLER, "play_pause", ActionSource::Session);
        }
        thread::sleep(interval);
    }

    notifier.hide_notification(CONTROLLER, session);
    debug!(producer, events = event, "Producer finished");
}

/// Runs the simulation on the current thread until every producer is done.
pub fn run_simulation(settings: &SimulatorSettings) -> Result<Summary> {
    let (mut runtime, notifier) = NotificationRuntime::new(EventLoop::new());
    let host = Rc::new(ConsoleHost::new(notifier.clone()));
    runtime.manager_mut().register(CONTROLLER, Rc::clone(&host))?;

    let sent = Arc::new(AtomicU64::new(0));
    let producers: Vec<_> = (0..settings.producers)
        .map(|producer| {
            let notifier = notifier.clone();
            let settings = settings.clone();
            let sent = Arc::clone(&sent);
            thread::spawn(move || produce(notifier, producer, settings, sent))
        })
        .collect();

    let coordinator = thread::spawn(move || {
        for producer in producers {
            if producer.join().is_err() {
                warn!("Producer thread panicked");
            }
        }
        // Let the last throttle window elapse
        thread::sleep(THROTTLE_INTERVAL);
        notifier.clear_notification(CONTROLLER);
        notifier.shutdown();
    });

    info!(producers = settings.producers, "▶️ Simulation started");
    runtime.run();
    coordinator
        .join()
        .map_err(|_| anyhow!("Coordinator thread panicked"))?;

    Ok(Summary {
        snapshots_sent: sent.load(Ordering::Relaxed),
        renders: host.renders.get(),
        launches: host.launches.get(),
        commands: runtime.command_count(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_simulation() {
        let settings = SimulatorSettings {
            producers: 2,
            event_interval_ms: 10,
            duration_ms: 120,
            pause_every: 3,
        };
        let summary = run_simulation(&settings).unwrap();

        assert!(summary.snapshots_sent > 0);
        assert!(summary.renders >= 1);
        // Rate limited: far fewer renders than snapshots
        assert!(summary.renders < summary.snapshots_sent);
        assert!(summary.launches >= 1);
    }

    #[test]
    fn test_no_producer_terminates() {
        let settings = SimulatorSettings {
            producers: 0,
            ..SimulatorSettings::default()
        };
        let summary = run_simulation(&settings).unwrap();
        assert_eq!(summary.snapshots_sent, 0);
        assert_eq!(summary.renders, 0);
    }
}
