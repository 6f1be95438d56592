// EventLoop - single-threaded timer runtime
// Realtime mode follows the wall clock, manual mode is stepped explicitly
// (tests, offline rendering)

use super::{TimeSource, TimerId, TimerService, TimerTask};
use spin_sleep::SpinSleeper;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Upper bound of timer fires processed by a single advance/run call
const MAX_FIRES_PER_STEP: usize = 200_000;

/// Longest realtime sleep before the stop predicate is polled again
const MAX_IDLE_SLEEP_MS: u64 = 10;

/// Clock driving the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockMode {
    /// Milliseconds since the loop was created, read from `Instant`
    Realtime,
    /// Virtual milliseconds, only moved by `advance_*` and `stall`
    Manual,
}

struct TimerEntry {
    key: (u64, u64), // (deadline, seq)
    period: Option<u64>,
    task: TimerTask,
}

struct LoopState {
    mode: ClockMode,
    anchor: Instant,
    manual_now: u64,
    next_id: u64,
    seq: u64,
    queue: BTreeMap<(u64, u64), TimerId>,
    timers: HashMap<TimerId, TimerEntry>,
}

impl LoopState {
    fn now(&self) -> u64 {
        match self.mode {
            ClockMode::Manual => self.manual_now,
            ClockMode::Realtime => self.anchor.elapsed().as_millis() as u64,
        }
    }

    fn alloc_seq(&mut self) -> u64 {
        let s = self.seq;
        self.seq += 1;
        s
    }

    fn insert(&mut self, delay_ms: u64, period: Option<u64>, task: TimerTask) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;

        let key = (self.now().saturating_add(delay_ms), self.alloc_seq());
        self.queue.insert(key, id);
        self.timers.insert(id, TimerEntry { key, period, task });
        id
    }

    fn remove(&mut self, id: TimerId) -> bool {
        match self.timers.remove(&id) {
            Some(entry) => {
                self.queue.remove(&entry.key);
                true
            }
            None => false,
        }
    }

    fn next_deadline(&self) -> Option<u64> {
        self.queue.keys().next().map(|&(deadline, _)| deadline)
    }

    /// Pop the earliest timer due at or before `limit`.
    /// Intervals are re-armed before their task is handed out, so a task may clear its own timer.
    fn take_due(&mut self, limit: u64) -> Option<TimerTask> {
        let (&key, &id) = self.queue.iter().next()?;
        if key.0 > limit {
            return None;
        }
        self.queue.remove(&key);

        if self.mode == ClockMode::Manual {
            // Overdue timers fire late, at the current time
            self.manual_now = self.manual_now.max(key.0);
        }
        let now = self.now();
        let seq = self.alloc_seq();

        let entry = self.timers.get_mut(&id)?;
        let task = Rc::clone(&entry.task);
        let next_deadline = entry.period.and_then(|period| {
            let mut deadline = key.0.saturating_add(period);
            if deadline <= now {
                // Fell behind by more than a period: restart the rhythm from now
                deadline = now.saturating_add(period);
            }
            // A deadline pinned at the end of the clock range can never come round again
            (deadline > now).then_some(deadline)
        });

        match next_deadline {
            Some(deadline) => {
                entry.key = (deadline, seq);
                self.queue.insert(entry.key, id);
            }
            None => {
                self.timers.remove(&id);
            }
        }
        Some(task)
    }
}

/// Cloneable handle to a timer runtime.
///
/// All clones share the same clock and timer queue. Tasks run on the thread
/// calling `advance_*`/`run_*`; no internal borrow is held while a task runs,
/// so tasks can freely schedule and clear timers.
#[derive(Clone)]
pub struct EventLoop {
    state: Rc<RefCell<LoopState>>,
}

impl EventLoop {
    /// Create a new event loop
    pub fn new(mode: ClockMode) -> Self {
        Self {
            state: Rc::new(RefCell::new(LoopState {
                mode,
                anchor: Instant::now(),
                manual_now: 0,
                next_id: 0,
                seq: 0,
                queue: BTreeMap::new(),
                timers: HashMap::new(),
            })),
        }
    }

    /// Loop following the wall clock
    pub fn realtime() -> Self {
        Self::new(ClockMode::Realtime)
    }

    /// Loop with a virtual clock starting at 0 ms
    pub fn manual() -> Self {
        Self::new(ClockMode::Manual)
    }

    pub fn mode(&self) -> ClockMode {
        self.state.borrow().mode
    }

    /// Number of armed timers
    pub fn pending(&self) -> usize {
        self.state.borrow().timers.len()
    }

    /// Deadline of the earliest armed timer
    pub fn next_deadline(&self) -> Option<u64> {
        self.state.borrow().next_deadline()
    }

    /// Shared handle usable wherever a `TimerService` is injected
    pub fn service(&self) -> Rc<dyn TimerService> {
        Rc::new(self.clone())
    }

    /// Fire one due timer, returns false when nothing is due before `limit`
    fn fire_next(&self, limit: u64) -> bool {
        // The borrow must end before the task runs
        let task = self.state.borrow_mut().take_due(limit);
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    fn fire_until(&self, limit: u64) -> usize {
        let mut fired = 0;
        while self.fire_next(limit) {
            fired += 1;
            if fired >= MAX_FIRES_PER_STEP {
                log::error!(
                    "EventLoop: more than {} timer fires before {} ms, giving up on this step",
                    MAX_FIRES_PER_STEP,
                    limit
                );
                break;
            }
        }
        fired
    }

    /// Fire every timer already due. Returns the number of fires.
    pub fn run_pending(&self) -> usize {
        let now = self.now();
        self.fire_until(now)
    }

    /// Manual mode: move the clock forward by `ms`, firing timers on the way
    pub fn advance_by(&self, ms: u64) -> usize {
        let target = self.now().saturating_add(ms);
        self.advance_to(target)
    }

    /// Manual mode: move the clock to `target` ms, firing timers on the way.
    /// Timers are fired in deadline order with the clock set to each deadline.
    ///
    /// When the fire budget runs out first, the clock stays at the last fired
    /// deadline; call again to keep stepping.
    pub fn advance_to(&self, target: u64) -> usize {
        if self.mode() != ClockMode::Manual {
            log::warn!("EventLoop::advance_to() is only available on manual clocks");
            return 0;
        }

        let fired = self.fire_until(target);

        let mut state = self.state.borrow_mut();
        if state.next_deadline().is_some_and(|deadline| deadline <= target) {
            log::warn!(
                "EventLoop::advance_to() stopped at {} ms, short of {} ms",
                state.manual_now,
                target
            );
            return fired;
        }
        state.manual_now = state.manual_now.max(target);
        fired
    }

    /// Manual mode: move the clock without firing anything, as if the thread had been blocked.
    /// Timers whose deadline was skipped fire late on the next advance.
    pub fn stall(&self, ms: u64) {
        let mut state = self.state.borrow_mut();
        if state.mode != ClockMode::Manual {
            log::warn!("EventLoop::stall() is only available on manual clocks");
            return;
        }
        state.manual_now = state.manual_now.saturating_add(ms);
    }

    /// Drive the loop until `is_done` returns true or no timer is left.
    ///
    /// In realtime mode the thread sleeps between deadlines; in manual mode the
    /// clock jumps straight to the next deadline.
    pub fn run_until<F>(&self, is_done: F) -> usize
    where
        F: Fn() -> bool,
    {
        let sleeper = SpinSleeper::default();
        let mut fired = 0;

        loop {
            fired += self.run_pending();
            if is_done() {
                break;
            }

            let Some(next) = self.next_deadline() else {
                break;
            };

            match self.mode() {
                ClockMode::Manual => {
                    fired += self.advance_to(next);
                }
                ClockMode::Realtime => {
                    let now = self.now();
                    if next > now {
                        let wait = (next - now).min(MAX_IDLE_SLEEP_MS);
                        sleeper.sleep(Duration::from_millis(wait));
                    }
                }
            }

            if is_done() {
                break;
            }
        }

        fired
    }

    /// Drive the loop for `duration_ms` of (wall or virtual) time
    pub fn run_for(&self, duration_ms: u64) -> usize {
        let end = self.now().saturating_add(duration_ms);
        match self.mode() {
            ClockMode::Manual => {
                let mut fired = 0;
                loop {
                    let before = self.now();
                    fired += self.advance_to(end);
                    // Stop on a loop that refills itself without moving the clock
                    if self.now() >= end || self.now() == before {
                        break fired;
                    }
                }
            }
            ClockMode::Realtime => {
                let fired = self.run_until(|| self.now() >= end);
                let now = self.now();
                if now < end {
                    // Queue ran dry early, still honour the requested duration
                    SpinSleeper::default().sleep(Duration::from_millis(end - now));
                }
                fired
            }
        }
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::realtime()
    }
}

impl TimeSource for EventLoop {
    fn now(&self) -> u64 {
        self.state.borrow().now()
    }
}

impl TimerService for EventLoop {
    fn set_interval(&self, period_ms: u64, task: TimerTask) -> TimerId {
        // A zero period would never let the clock move
        let period = period_ms.max(1);
        self.state.borrow_mut().insert(period, Some(period), task)
    }

    fn set_timeout(&self, delay_ms: u64, task: TimerTask) -> TimerId {
        self.state.borrow_mut().insert(delay_ms, None, task)
    }

    fn clear(&self, id: TimerId) {
        self.state.borrow_mut().remove(id);
    }
}
