use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pmonotify::{
    ActionKind, ActionSource, ControllerId, ControllerState, DEFERRED_INIT_MAX_WAIT,
    DeferredResource, EventLoop, ListenerRef, MediaAction, NotificationHost, NotificationManager,
    RenderError, ResourceUnavailable, SessionInstanceId, Snapshot, THROTTLE_INTERVAL, TaskHandle,
    TaskPriority, TrackMetadata,
};

const PLAYBACK: &str = "media-playback";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

/// Host recording every call with the loop time.
struct RecordingHost {
    event_loop: pmonotify::LoopHandle,
    renders: RefCell<Vec<(Duration, Snapshot)>>,
    launches: Cell<u32>,
    cancels: Cell<u32>,
    constructions: Cell<u32>,
}

impl RecordingHost {
    fn new(event_loop: &EventLoop) -> Rc<Self> {
        Rc::new(Self {
            event_loop: event_loop.handle(),
            renders: RefCell::new(Vec::new()),
            launches: Cell::new(0),
            cancels: Cell::new(0),
            constructions: Cell::new(0),
        })
    }

    fn rendered(&self) -> Vec<(Duration, String)> {
        self.renders
            .borrow()
            .iter()
            .map(|(at, s)| (*at, s.metadata().title.clone()))
            .collect()
    }

    fn titles(&self) -> Vec<String> {
        self.rendered().into_iter().map(|(_, title)| title).collect()
    }
}

impl NotificationHost for RecordingHost {
    type Resource = String;

    fn create_resource(&self) -> Result<String, ResourceUnavailable> {
        self.constructions.set(self.constructions.get() + 1);
        Ok("media-session".to_string())
    }

    fn render(&self, snapshot: &Snapshot, resource: &String) -> Result<(), RenderError> {
        assert_eq!(resource, "media-session");
        self.renders
            .borrow_mut()
            .push((self.event_loop.now(), snapshot.clone()));
        Ok(())
    }

    fn cancel_all(&self) {
        self.cancels.set(self.cancels.get() + 1);
    }

    fn launch_task(&self) {
        self.launches.set(self.launches.get() + 1);
    }
}

#[derive(Clone, Default)]
struct RecordingTask(Arc<Mutex<Vec<String>>>);

impl RecordingTask {
    fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

impl TaskHandle for RecordingTask {
    fn set_priority(&mut self, priority: TaskPriority) {
        let event = match priority {
            TaskPriority::Foreground => "foreground",
            TaskPriority::Background => "background",
        };
        self.0.lock().unwrap().push(event.to_string());
    }

    fn stop(&mut self) {
        self.0.lock().unwrap().push("stop".to_string());
    }
}

fn snapshot(session: &str, title: &str) -> Snapshot {
    Snapshot::builder(SessionInstanceId::new(session))
        .actions([
            ActionKind::Play,
            ActionKind::Pause,
            ActionKind::SkipPrevious,
            ActionKind::SkipNext,
        ])
        .metadata(TrackMetadata::new(title, "Artist", "Album"))
        .build()
}

struct Fixture {
    event_loop: EventLoop,
    manager: NotificationManager<RecordingHost>,
    host: Rc<RecordingHost>,
    task: RecordingTask,
    id: ControllerId,
}

impl Fixture {
    fn new() -> Self {
        init_tracing();
        let event_loop = EventLoop::manual();
        let mut manager = NotificationManager::new(event_loop.handle());
        let host = RecordingHost::new(&event_loop);
        manager.register(PLAYBACK, Rc::clone(&host)).unwrap();
        Self {
            event_loop,
            manager,
            host,
            task: RecordingTask::default(),
            id: ControllerId::from(PLAYBACK),
        }
    }

    /// Shows `first`, starts the task and lets the resource be built: `first`
    /// is rendered at t=0.
    fn started(first: Snapshot) -> Self {
        let fixture = Self::new();
        fixture.queue(first);
        fixture
            .manager
            .on_task_started(&fixture.id, Box::new(fixture.task.clone()));
        fixture.event_loop.run_idle();
        assert_eq!(fixture.state(), ControllerState::Foreground);
        fixture
    }

    fn queue(&self, snapshot: Snapshot) {
        self.manager.queue_notification(&self.id, snapshot);
    }

    fn at(&self, time: u64, snapshot: Snapshot) {
        self.event_loop.advance_to(ms(time));
        self.queue(snapshot);
    }

    fn state(&self) -> ControllerState {
        self.manager.controller(&self.id).unwrap().state()
    }
}

#[test]
fn test_scenario_a_burst_within_one_window() {
    let f = Fixture::started(snapshot("s1", "A"));
    assert_eq!(f.event_loop.next_deadline(), Some(THROTTLE_INTERVAL));

    f.at(100, snapshot("s1", "B"));
    f.at(300, snapshot("s1", "C"));
    assert_eq!(f.host.titles(), vec!["A"]);

    f.event_loop.advance_to(ms(500));
    assert_eq!(
        f.host.rendered(),
        vec![(ms(0), "A".to_string()), (ms(500), "C".to_string())]
    );
    // The delivery of C opens a new window.
    assert_eq!(f.event_loop.next_deadline(), Some(ms(1000)));

    f.event_loop.advance_to(ms(5000));
    assert!(!f.host.titles().contains(&"B".to_string()));
}

#[test]
fn test_many_queues_in_one_window_render_only_the_last() {
    let f = Fixture::started(snapshot("s1", "start"));
    f.event_loop.advance_to(ms(600));
    f.event_loop.advance_to(ms(1200));

    // Window opened by the first queue below at t=1200.
    f.queue(snapshot("s1", "q0"));
    for i in 1..=20u64 {
        f.at(1200 + i * 20, snapshot("s1", &format!("q{i}")));
    }
    f.event_loop.advance_to(ms(1700));

    let rendered = f.host.rendered();
    assert_eq!(
        rendered[1..],
        [(ms(1200), "q0".to_string()), (ms(1700), "q20".to_string())]
    );
    let last_delay = rendered[2].0 - rendered[1].0;
    assert!(last_delay <= THROTTLE_INTERVAL);
}

#[test]
fn test_scenario_b_fallback_timer() {
    init_tracing();
    let event_loop = EventLoop::manual();
    let handle = event_loop.handle();
    let built_at = Rc::new(RefCell::new(Vec::new()));
    let built = Rc::clone(&built_at);
    let clock = handle.clone();
    let resource = DeferredResource::new(move || {
        built.borrow_mut().push(clock.now());
        Ok(())
    });

    resource.schedule_if_needed(&handle);
    event_loop.advance(DEFERRED_INIT_MAX_WAIT);
    assert_eq!(*built_at.borrow(), vec![ms(2000)]);
}

#[test]
fn test_scenario_b_idle_before_fallback() {
    init_tracing();
    let event_loop = EventLoop::manual();
    let handle = event_loop.handle();
    let built_at = Rc::new(RefCell::new(Vec::new()));
    let built = Rc::clone(&built_at);
    let clock = handle.clone();
    let resource = DeferredResource::new(move || {
        built.borrow_mut().push(clock.now());
        Ok(())
    });

    resource.schedule_if_needed(&handle);
    event_loop.advance(ms(50));
    event_loop.run_idle();
    event_loop.advance_to(ms(2000));
    event_loop.advance_to(ms(10_000));
    assert_eq!(*built_at.borrow(), vec![ms(50)]);
    assert_eq!(resource.construction_count(), 1);
}

#[test]
fn test_resource_built_once_across_repeated_shows() {
    let f = Fixture::new();
    for i in 0..10 {
        f.queue(snapshot("s1", &format!("t{i}")));
    }
    f.manager
        .on_task_started(&f.id, Box::new(f.task.clone()));
    f.event_loop.run_idle();
    f.event_loop.advance_to(ms(10_000));
    assert_eq!(f.host.constructions.get(), 1);
    assert_eq!(f.host.launches.get(), 1);
    assert_eq!(f.host.titles(), vec!["t9"]);
}

#[test]
fn test_render_waits_for_fallback_when_loop_never_idles() {
    let f = Fixture::new();
    f.queue(snapshot("s1", "A"));
    f.manager
        .on_task_started(&f.id, Box::new(f.task.clone()));

    f.event_loop.advance_to(ms(1999));
    assert!(f.host.titles().is_empty());
    assert_eq!(f.state(), ControllerState::Bound);

    f.event_loop.advance_to(ms(2000));
    assert_eq!(f.host.rendered(), vec![(ms(2000), "A".to_string())]);
    assert_eq!(f.state(), ControllerState::Foreground);
}

#[test]
fn test_equal_snapshot_is_not_rendered_again() {
    let f = Fixture::started(snapshot("s1", "A"));
    f.at(800, snapshot("s1", "A"));
    f.event_loop.advance_to(ms(3000));
    assert_eq!(f.host.titles(), vec!["A"]);
}

#[test]
fn test_paused_snapshot_from_other_session_never_reaches_sink() {
    let f = Fixture::started(snapshot("active", "A"));
    let stale = snapshot("backgrounded", "stale")
        .to_builder()
        .paused(true)
        .build();
    f.at(100, stale.clone());
    f.at(900, stale);
    f.event_loop.advance_to(ms(3000));
    assert_eq!(f.host.titles(), vec!["A"]);

    // An unpaused snapshot from another session does take over.
    f.at(3000, snapshot("backgrounded", "B"));
    assert_eq!(f.host.titles(), vec!["A", "B"]);
}

#[test]
fn test_clear_then_timer_tick_renders_nothing() {
    let f = Fixture::started(snapshot("s1", "A"));
    f.at(100, snapshot("s1", "B"));
    f.manager.clear_notification(&f.id);

    f.event_loop.advance_to(ms(5000));
    assert_eq!(f.host.titles(), vec!["A"]);
    assert_eq!(f.state(), ControllerState::Inactive);
    assert_eq!(f.host.cancels.get(), 1);
    assert_eq!(f.task.events(), vec!["foreground", "stop"]);
}

#[test]
fn test_scenario_c_dismissible_hide_goes_background() {
    let f = Fixture::started(snapshot("s1", "A"));
    let paused = snapshot("s1", "A")
        .to_builder()
        .paused(true)
        .swipe_dismissible(true)
        .build();
    f.at(500, paused);
    f.manager
        .hide_notification(&f.id, &SessionInstanceId::new("s1"));

    assert_eq!(f.state(), ControllerState::Background);
    assert_eq!(f.task.events(), vec!["foreground", "background"]);
    assert_eq!(f.host.cancels.get(), 0);
}

#[test]
fn test_scenario_c_non_dismissible_hide_stops() {
    let f = Fixture::started(snapshot("s1", "A"));
    let paused = snapshot("s1", "A").to_builder().paused(true).build();
    f.at(500, paused);
    f.manager
        .hide_notification(&f.id, &SessionInstanceId::new("s1"));

    assert_eq!(f.state(), ControllerState::Inactive);
    assert_eq!(f.task.events(), vec!["foreground", "stop"]);
    assert_eq!(f.host.cancels.get(), 1);
}

#[test]
fn test_scenario_d_task_restart_rerenders_last_snapshot() {
    let f = Fixture::started(snapshot("s1", "A"));
    f.at(700, snapshot("s1", "B"));
    f.event_loop.advance_to(ms(1500));

    f.manager.on_task_destroyed(&f.id);
    assert_eq!(f.state(), ControllerState::Inactive);

    let restarted = RecordingTask::default();
    f.manager
        .on_task_started(&f.id, Box::new(restarted.clone()));

    let renders = f.host.renders.borrow();
    assert_eq!(renders.len(), 3);
    assert_eq!(renders[2].1, renders[1].1);
    assert_eq!(renders[2].1.metadata().title, "B");
    drop(renders);
    assert_eq!(f.state(), ControllerState::Foreground);
    assert_eq!(restarted.events(), vec!["foreground"]);
    // No launch requested: the task came back on its own.
    assert_eq!(f.host.launches.get(), 1);
}

#[test]
fn test_actions_are_forwarded_with_their_source() {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    let listener = ListenerRef::new(move |action: MediaAction, source: ActionSource| {
        sink.lock().unwrap().push((action, source));
    });
    let f = Fixture::started(
        snapshot("s1", "A")
            .to_builder()
            .paused(true)
            .listener(listener)
            .build(),
    );

    f.manager
        .process_action(&f.id, "pause", ActionSource::Session);
    f.manager
        .process_action(&f.id, "pause", ActionSource::Notification);
    f.manager
        .process_action(&f.id, "play_pause", ActionSource::ExternalSignal);
    f.manager
        .process_action(&f.id, "not-an-action", ActionSource::Notification);
    f.manager
        .process_action(&f.id, "skip_next", ActionSource::Notification);

    assert_eq!(
        *received.lock().unwrap(),
        vec![
            (MediaAction::Play, ActionSource::Session),
            (MediaAction::Pause, ActionSource::Notification),
            (MediaAction::Play, ActionSource::ExternalSignal),
            (MediaAction::SkipNext, ActionSource::Notification),
        ]
    );
}

#[test]
fn test_shutdown_leaves_no_callback_behind() {
    let mut f = Fixture::started(snapshot("s1", "A"));
    f.at(100, snapshot("s1", "B"));
    f.manager.shutdown();

    assert!(f.event_loop.is_quiescent());
    f.event_loop.advance_to(ms(10_000));
    assert_eq!(f.host.titles(), vec!["A"]);
    assert_eq!(f.task.events(), vec!["foreground", "stop"]);
}
