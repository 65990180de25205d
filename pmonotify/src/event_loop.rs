//! Single-threaded cooperative event loop.
//!
//! The loop owns one FIFO task queue, a timer wheel ordered by deadline and a
//! FIFO of idle callbacks. Nothing in this module blocks: arming a timer or
//! registering an idle callback only enqueues work. The blocking wait (and the
//! marshalling of calls coming from other threads) lives in
//! [`crate::runtime`].
//!
//! Loop time is a [`Duration`] measured from the creation of the loop. A loop
//! runs either on the system monotonic clock or on a manual clock that only
//! moves when [`EventLoop::advance`] is called, which keeps every timing test
//! deterministic.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use tracing::{trace, warn};

/// A unit of work executed on the loop thread.
pub type Task = Box<dyn FnOnce()>;

/// Identifies an armed timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl TimerId {
    /// Returned when the loop is gone; never fires, cancelling it is a no-op.
    pub const DEAD: TimerId = TimerId(0);
}

/// Identifies a registered idle callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IdleId(u64);

impl IdleId {
    pub const DEAD: IdleId = IdleId(0);
}

#[derive(Debug)]
enum LoopClock {
    System(Instant),
    Manual(Cell<Duration>),
}

impl LoopClock {
    fn now(&self) -> Duration {
        match self {
            LoopClock::System(origin) => origin.elapsed(),
            LoopClock::Manual(now) => now.get(),
        }
    }
}

#[derive(Default)]
struct TimerWheel {
    entries: BTreeMap<(Duration, u64), Task>,
    index: HashMap<u64, Duration>,
}

impl TimerWheel {
    fn insert(&mut self, deadline: Duration, seq: u64, task: Task) {
        self.entries.insert((deadline, seq), task);
        self.index.insert(seq, deadline);
    }

    fn remove(&mut self, seq: u64) -> Option<Task> {
        let deadline = self.index.remove(&seq)?;
        self.entries.remove(&(deadline, seq))
    }

    fn contains(&self, seq: u64) -> bool {
        self.index.contains_key(&seq)
    }

    fn next_deadline(&self) -> Option<Duration> {
        self.entries.keys().next().map(|(deadline, _)| *deadline)
    }

    fn pop_due(&mut self, now: Duration) -> Option<Task> {
        let key = *self.entries.keys().next()?;
        if key.0 > now {
            return None;
        }
        self.index.remove(&key.1);
        self.entries.remove(&key)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

struct LoopInner {
    clock: LoopClock,
    tasks: RefCell<VecDeque<Task>>,
    timers: RefCell<TimerWheel>,
    idle: RefCell<VecDeque<(u64, Task)>>,
    next_seq: Cell<u64>,
    stopped: Cell<bool>,
}

impl LoopInner {
    fn new(clock: LoopClock) -> Self {
        Self {
            clock,
            tasks: RefCell::new(VecDeque::new()),
            timers: RefCell::new(TimerWheel::default()),
            idle: RefCell::new(VecDeque::new()),
            // 0 is reserved for the DEAD ids
            next_seq: Cell::new(1),
            stopped: Cell::new(false),
        }
    }

    fn next_seq(&self) -> u64 {
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);
        seq
    }
}

/// The loop itself. Owned by the thread that drives it.
pub struct EventLoop {
    inner: Rc<LoopInner>,
}

/// Weak handle used to enqueue work on an [`EventLoop`].
///
/// Every operation on a handle whose loop was dropped or shut down is a no-op.
#[derive(Clone)]
pub struct LoopHandle {
    inner: Weak<LoopInner>,
}

impl std::fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopHandle")
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl LoopHandle {
    fn live(&self) -> Option<Rc<LoopInner>> {
        self.inner.upgrade().filter(|inner| !inner.stopped.get())
    }

    /// True while the loop exists and has not been shut down.
    pub fn is_alive(&self) -> bool {
        self.live().is_some()
    }

    /// Current loop time, or zero once the loop is gone.
    pub fn now(&self) -> Duration {
        self.inner
            .upgrade()
            .map(|inner| inner.clock.now())
            .unwrap_or_default()
    }

    /// Enqueues a task at the back of the task queue.
    pub fn post(&self, task: impl FnOnce() + 'static) -> bool {
        let Some(inner) = self.live() else {
            return false;
        };
        inner.tasks.borrow_mut().push_back(Box::new(task));
        true
    }

    /// Arms a one-shot timer firing `delay` from now.
    pub fn post_delayed(&self, delay: Duration, task: impl FnOnce() + 'static) -> TimerId {
        let Some(inner) = self.live() else {
            return TimerId::DEAD;
        };
        let seq = inner.next_seq();
        let deadline = inner.clock.now() + delay;
        inner
            .timers
            .borrow_mut()
            .insert(deadline, seq, Box::new(task));
        trace!(timer = seq, deadline_ms = deadline.as_millis() as u64, "timer armed");
        TimerId(seq)
    }

    /// Cancels an armed timer. Returns false if it already fired or never existed.
    pub fn cancel(&self, id: TimerId) -> bool {
        let Some(inner) = self.inner.upgrade() else {
            return false;
        };
        // Drop the task outside of the borrow.
        let removed = inner.timers.borrow_mut().remove(id.0);
        removed.is_some()
    }

    /// True while the timer is armed and has not fired yet.
    pub fn is_armed(&self, id: TimerId) -> bool {
        self.inner
            .upgrade()
            .is_some_and(|inner| inner.timers.borrow().contains(id.0))
    }

    /// Registers a one-shot callback for the next time the loop has nothing
    /// else to do.
    pub fn post_idle(&self, task: impl FnOnce() + 'static) -> IdleId {
        let Some(inner) = self.live() else {
            return IdleId::DEAD;
        };
        let seq = inner.next_seq();
        inner.idle.borrow_mut().push_back((seq, Box::new(task)));
        IdleId(seq)
    }

    pub fn cancel_idle(&self, id: IdleId) -> bool {
        let Some(inner) = self.inner.upgrade() else {
            return false;
        };
        let removed = {
            let mut idle = inner.idle.borrow_mut();
            let position = idle.iter().position(|(seq, _)| *seq == id.0);
            position.and_then(|pos| idle.remove(pos))
        };
        removed.is_some()
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoop {
    /// Loop driven by the system monotonic clock.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(LoopInner::new(LoopClock::System(Instant::now()))),
        }
    }

    /// Loop driven by a manual clock starting at zero.
    pub fn manual() -> Self {
        Self {
            inner: Rc::new(LoopInner::new(LoopClock::Manual(Cell::new(Duration::ZERO)))),
        }
    }

    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub fn now(&self) -> Duration {
        self.inner.clock.now()
    }

    pub fn is_manual(&self) -> bool {
        matches!(self.inner.clock, LoopClock::Manual(_))
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.get()
    }

    /// Runs queued tasks and every timer due at the current time until
    /// nothing is ready. Returns the number of callbacks executed.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while !self.inner.stopped.get() {
            let task = self.inner.tasks.borrow_mut().pop_front();
            if let Some(task) = task {
                task();
                ran += 1;
                continue;
            }

            let now = self.inner.clock.now();
            let timer = self.inner.timers.borrow_mut().pop_due(now);
            match timer {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => break,
            }
        }
        ran
    }

    /// Runs the idle callbacks registered before this call. Callbacks
    /// registered while they run wait for the next idle period.
    pub fn run_idle(&self) -> usize {
        let batch: Vec<(u64, Task)> = self.inner.idle.borrow_mut().drain(..).collect();
        let mut ran = 0;
        for (_, task) in batch {
            if self.inner.stopped.get() {
                break;
            }
            task();
            ran += 1;
        }
        ran
    }

    /// Moves a manual clock forward by `delta`, firing each due timer at
    /// exactly its deadline, in deadline order.
    pub fn advance(&self, delta: Duration) {
        let LoopClock::Manual(now) = &self.inner.clock else {
            warn!("advance() called on a system clock loop, running pending work only");
            self.run_pending();
            return;
        };

        let target = now.get() + delta;
        self.run_pending();
        while !self.inner.stopped.get() {
            let next = self.inner.timers.borrow().next_deadline();
            match next {
                Some(deadline) if deadline <= target => {
                    if deadline > now.get() {
                        now.set(deadline);
                    }
                    self.run_pending();
                }
                _ => break,
            }
        }
        now.set(target);
        self.run_pending();
    }

    /// Same as [`advance`](Self::advance) with an absolute target time.
    pub fn advance_to(&self, at: Duration) {
        let delta = at.saturating_sub(self.now());
        self.advance(delta);
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.inner.timers.borrow().next_deadline()
    }

    /// True when a task is queued or a timer is already due.
    pub fn has_ready_work(&self) -> bool {
        if !self.inner.tasks.borrow().is_empty() {
            return true;
        }
        self.next_deadline()
            .is_some_and(|deadline| deadline <= self.now())
    }

    pub fn has_idle(&self) -> bool {
        !self.inner.idle.borrow().is_empty()
    }

    pub fn pending_timers(&self) -> usize {
        self.inner.timers.borrow().len()
    }

    /// True when no task, timer or idle callback is left.
    pub fn is_quiescent(&self) -> bool {
        self.inner.tasks.borrow().is_empty() && self.pending_timers() == 0 && !self.has_idle()
    }

    /// Stops the loop and drops every queued task, timer and idle callback.
    pub fn shutdown(&self) {
        self.inner.stopped.set(true);
        let tasks = std::mem::take(&mut *self.inner.tasks.borrow_mut());
        let timers = std::mem::take(&mut *self.inner.timers.borrow_mut());
        let idle = std::mem::take(&mut *self.inner.idle.borrow_mut());
        drop((tasks, timers, idle));
    }
}
