// CyclicScheduler - self-correcting repeating callback
// Runs an action every `period` ms on top of a TimerService,
// re-synchronizing after pauses and period changes

use super::status::SchedulerStatus;
use crate::clock::{TimerId, TimerService, TimerTask};
use crate::error::{TimingError, TimingResult};
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::{Rc, Weak};

/// Default slack (ms) before a late cycle is reported out of sync
pub const DEFAULT_SYNC_THRESHOLD_MS: u64 = 20;

/// Default nudge (ms) subtracted from the resume correction delay,
/// compensating for the overhead of re-arming the timer
pub const RESUME_CORRECTION_MS: u64 = 2;

/// Handler invoked on every cycle and on completion
pub type Action = Rc<dyn Fn(&CyclicScheduler)>;

/// Predicate deciding whether a cycle runs the action
pub type Condition = Rc<dyn Fn(&CyclicScheduler) -> bool>;

/// How many cycles a run lasts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Repeat {
    /// No limit
    #[default]
    Forever,
    /// Exactly one cycle
    Once,
    /// A fixed number of cycles (must be >= 1)
    Times(u64),
}

impl Repeat {
    /// Cycle limit represented by this value (`None` = unbounded)
    pub fn limit(self) -> TimingResult<Option<u64>> {
        match self {
            Repeat::Forever => Ok(None),
            Repeat::Once => Ok(Some(1)),
            Repeat::Times(0) => Err(TimingError::validation(
                "CyclicScheduler::repeat() expects a cycle count >= 1",
            )),
            Repeat::Times(n) => Ok(Some(n)),
        }
    }
}

impl From<bool> for Repeat {
    /// `true` repeats forever, `false` runs a single cycle
    fn from(forever: bool) -> Self {
        if forever {
            Repeat::Forever
        } else {
            Repeat::Once
        }
    }
}

impl From<u64> for Repeat {
    fn from(times: u64) -> Self {
        Repeat::Times(times)
    }
}

struct SchedulerState {
    status: SchedulerStatus,
    period: u64,
    elapsed: u64,
    delta: u64,
    last_cycle_at: Option<u64>,
    paused_at: Option<u64>,
    current_cycle: u64,
    cycle_limit: Option<u64>,
    in_sync: bool,
    pending_correction: bool,
    sync_threshold: u64,
    resume_correction: u64,
    handle: Option<TimerId>,
    action: Option<Action>,
    condition: Option<Condition>,
    on_complete: Option<Action>,
}

impl SchedulerState {
    fn new(period: u64) -> Self {
        Self {
            status: SchedulerStatus::Stopped,
            period,
            elapsed: 0,
            delta: 0,
            last_cycle_at: None,
            paused_at: None,
            current_cycle: 0,
            cycle_limit: None,
            in_sync: true,
            pending_correction: false,
            sync_threshold: DEFAULT_SYNC_THRESHOLD_MS,
            resume_correction: RESUME_CORRECTION_MS,
            handle: None,
            action: None,
            condition: None,
            on_complete: None,
        }
    }

    fn limit_reached(&self) -> bool {
        self.cycle_limit.is_some_and(|limit| self.current_cycle >= limit)
    }
}

struct Shared {
    timers: Rc<dyn TimerService>,
    state: RefCell<SchedulerState>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(id) = self.state.get_mut().handle.take() {
            self.timers.clear(id);
        }
    }
}

/// Self-correcting cyclic scheduler.
///
/// Normal cycles run on a steady interval. Anything that perturbs timing
/// (resume, live period change) replaces the interval with a single one-shot
/// "correction" timer landing on the next true cycle boundary; that fire
/// re-arms a fresh interval.
///
/// Handlers receive the scheduler and may call any method on it, including
/// `pause`, `stop` and `destroy`. Cancellation from inside a handler takes
/// effect before the next scheduled fire.
pub struct CyclicScheduler {
    shared: Rc<Shared>,
}

impl CyclicScheduler {
    /// Create a stopped scheduler firing every `period_ms`
    pub fn new(timers: Rc<dyn TimerService>, period_ms: u64) -> TimingResult<Self> {
        if period_ms == 0 {
            return Err(TimingError::validation(
                "CyclicScheduler::new() expects a positive period (ms)",
            ));
        }

        Ok(Self {
            shared: Rc::new(Shared {
                timers,
                state: RefCell::new(SchedulerState::new(period_ms)),
            }),
        })
    }

    fn state(&self) -> Ref<'_, SchedulerState> {
        self.shared.state.borrow()
    }

    fn state_mut(&self) -> RefMut<'_, SchedulerState> {
        self.shared.state.borrow_mut()
    }

    fn now(&self) -> u64 {
        self.shared.timers.now()
    }

    fn ensure_alive(&self, op: &str) -> TimingResult<()> {
        if self.state().status == SchedulerStatus::Destroyed {
            return Err(TimingError::state(format!(
                "CyclicScheduler::{}() called on a destroyed scheduler",
                op
            )));
        }
        Ok(())
    }

    /// Task handed to the timer service. Holds a weak reference so armed
    /// timers never keep a dropped scheduler alive.
    fn cycle_task(&self) -> TimerTask {
        let weak: Weak<Shared> = Rc::downgrade(&self.shared);
        Rc::new(move || {
            if let Some(shared) = weak.upgrade() {
                CyclicScheduler { shared }.next_cycle();
            }
        })
    }

    fn cancel_timer(&self, st: &mut SchedulerState) {
        if let Some(id) = st.handle.take() {
            self.shared.timers.clear(id);
        }
    }

    fn arm_interval(&self, st: &mut SchedulerState) {
        self.cancel_timer(st);
        st.handle = Some(self.shared.timers.set_interval(st.period, self.cycle_task()));
    }

    fn arm_correction(&self, st: &mut SchedulerState, delay_ms: u64) {
        self.cancel_timer(st);
        st.pending_correction = true;
        st.handle = Some(self.shared.timers.set_timeout(delay_ms, self.cycle_task()));
        log::debug!(
            "CyclicScheduler: correction cycle in {} ms (period {} ms)",
            delay_ms,
            st.period
        );
    }

    fn next_cycle(&self) {
        let now = self.now();

        let (action, condition) = {
            let mut st = self.state_mut();
            // A fire racing a cancellation is dropped
            if st.status != SchedulerStatus::Running {
                return;
            }

            let delta = now.saturating_sub(st.last_cycle_at.unwrap_or(now));
            st.delta = delta;
            st.last_cycle_at = Some(now);
            st.elapsed = st.elapsed.saturating_add(delta);
            st.current_cycle += 1;

            if st.pending_correction {
                self.arm_interval(&mut st);
                st.pending_correction = false;
                st.in_sync = true;
            } else {
                st.in_sync = delta <= st.period.saturating_add(st.sync_threshold);
                if !st.in_sync {
                    log::debug!(
                        "CyclicScheduler: cycle {} out of sync (delta {} ms, period {} ms)",
                        st.current_cycle,
                        delta,
                        st.period
                    );
                }
            }

            (st.action.clone(), st.condition.clone())
        };

        let run = condition.map_or(true, |cond| cond(self));
        if run {
            if let Some(action) = action {
                action(self);
            }
        }

        // Handlers may have stopped, reset or completed the run already
        let reached = {
            let st = self.state();
            st.status == SchedulerStatus::Running && st.limit_reached()
        };
        if reached {
            self.complete();
        }
    }

    fn complete(&self) {
        let on_complete = {
            let mut st = self.state_mut();
            if !st.status.is_active() {
                return;
            }
            self.cancel_timer(&mut st);
            st.status = SchedulerStatus::Completed;
            st.pending_correction = false;
            st.on_complete.clone()
        };

        log::debug!("CyclicScheduler: completed after {} cycles", self.current_cycle());
        if let Some(done) = on_complete {
            done(self);
        }
    }

    /// Set the handler run on every cycle
    pub fn action<F>(&self, f: F) -> TimingResult<&Self>
    where
        F: Fn(&CyclicScheduler) + 'static,
    {
        self.ensure_alive("action")?;
        self.state_mut().action = Some(Rc::new(f));
        Ok(self)
    }

    /// Only run the action on cycles where `f` returns true
    pub fn condition<F>(&self, f: F) -> TimingResult<&Self>
    where
        F: Fn(&CyclicScheduler) -> bool + 'static,
    {
        self.ensure_alive("condition")?;
        self.state_mut().condition = Some(Rc::new(f));
        Ok(self)
    }

    pub fn clear_condition(&self) -> TimingResult<&Self> {
        self.ensure_alive("clear_condition")?;
        self.state_mut().condition = None;
        Ok(self)
    }

    /// Set the handler run once when the cycle limit is reached
    pub fn on_complete<F>(&self, f: F) -> TimingResult<&Self>
    where
        F: Fn(&CyclicScheduler) + 'static,
    {
        self.ensure_alive("on_complete")?;
        self.state_mut().on_complete = Some(Rc::new(f));
        Ok(self)
    }

    pub fn clear_on_complete(&self) -> TimingResult<&Self> {
        self.ensure_alive("clear_on_complete")?;
        self.state_mut().on_complete = None;
        Ok(self)
    }

    /// Start cycling. A paused scheduler is resumed instead.
    ///
    /// With `reset` set, counters and elapsed time are zeroed first.
    pub fn start(&self, reset: bool) -> TimingResult<&Self> {
        self.ensure_alive("start")?;

        let status = {
            let st = self.state();
            if st.action.is_none() {
                return Err(TimingError::validation(
                    "CyclicScheduler::start() requires an action",
                ));
            }
            st.status
        };

        match status {
            SchedulerStatus::Running => return Ok(self),
            SchedulerStatus::Paused => return self.resume(),
            SchedulerStatus::Completed => {
                log::warn!(
                    "CyclicScheduler::start() only stopped schedulers can be started (status: {})",
                    status
                );
                return Ok(self);
            }
            _ => {}
        }

        if reset {
            self.reset()?;
        }

        let now = self.now();
        let mut st = self.state_mut();
        st.last_cycle_at = Some(now);
        st.status = SchedulerStatus::Running;
        self.arm_interval(&mut st);
        log::debug!("CyclicScheduler: started, period {} ms", st.period);
        Ok(self)
    }

    /// Pause a running scheduler, freezing elapsed time
    pub fn pause(&self) -> TimingResult<&Self> {
        self.ensure_alive("pause")?;

        let now = self.now();
        let mut st = self.state_mut();
        if st.status != SchedulerStatus::Running {
            log::warn!(
                "CyclicScheduler::pause() only running schedulers can be paused (status: {})",
                st.status
            );
            return Ok(self);
        }

        self.cancel_timer(&mut st);
        st.pending_correction = false;
        st.status = SchedulerStatus::Paused;
        st.paused_at = Some(now);
        Ok(self)
    }

    /// Resume a paused scheduler.
    ///
    /// The time already spent in the interrupted cycle is carried over, and a
    /// correction timer lands on the cycle's original boundary.
    pub fn resume(&self) -> TimingResult<&Self> {
        self.ensure_alive("resume")?;

        let now = self.now();
        let mut st = self.state_mut();
        if st.status != SchedulerStatus::Paused {
            log::warn!(
                "CyclicScheduler::resume() only paused schedulers can be resumed (status: {})",
                st.status
            );
            return Ok(self);
        }

        let paused_at = st.paused_at.take().unwrap_or(now);
        let lag = paused_at.saturating_sub(st.last_cycle_at.unwrap_or(paused_at));
        st.last_cycle_at = Some(now.saturating_sub(lag));
        st.status = SchedulerStatus::Running;

        // Floors at zero: a correction that is already due fires immediately
        let delay = st
            .period
            .saturating_sub(lag)
            .saturating_sub(st.resume_correction);
        self.arm_correction(&mut st, delay);
        Ok(self)
    }

    /// Stop and reset. A running scheduler is paused first so that the reset
    /// does not restart it.
    pub fn stop(&self) -> TimingResult<&Self> {
        self.ensure_alive("stop")?;

        match self.status() {
            SchedulerStatus::Stopped => {
                log::warn!("CyclicScheduler::stop() scheduler is already stopped");
                return Ok(self);
            }
            SchedulerStatus::Running => {
                self.pause()?;
            }
            _ => {}
        }
        self.reset()
    }

    /// Zero counters and elapsed time. A running scheduler keeps running.
    pub fn reset(&self) -> TimingResult<&Self> {
        let last_status = {
            let mut st = self.state_mut();
            if st.status == SchedulerStatus::Destroyed {
                return Err(TimingError::state("destroyed schedulers cannot be reset"));
            }

            self.cancel_timer(&mut st);
            let last_status = st.status;

            st.status = SchedulerStatus::Stopped;
            st.delta = 0;
            st.current_cycle = 0;
            st.elapsed = 0;
            st.last_cycle_at = None;
            st.paused_at = None;
            st.pending_correction = false;
            st.in_sync = true;
            last_status
        };

        if last_status == SchedulerStatus::Running {
            return self.start(false);
        }
        Ok(self)
    }

    /// Cancel the timer and drop all handlers. Terminal.
    pub fn destroy(&self) -> &Self {
        let handlers = {
            let mut st = self.state_mut();
            self.cancel_timer(&mut st);
            st.status = SchedulerStatus::Destroyed;
            st.pending_correction = false;
            st.paused_at = None;
            (st.action.take(), st.condition.take(), st.on_complete.take())
        };
        // Dropped outside the borrow: a handler may own the last reference to its caller
        drop(handlers);
        self
    }

    /// Limit the number of cycles of a run. A limit already reached by an
    /// active run completes it immediately.
    pub fn repeat(&self, repeat: impl Into<Repeat>) -> TimingResult<&Self> {
        self.ensure_alive("repeat")?;
        let limit = repeat.into().limit()?;

        let should_complete = {
            let mut st = self.state_mut();
            st.cycle_limit = limit;
            st.status.is_active() && st.limit_reached()
        };
        if should_complete {
            self.complete();
        }
        Ok(self)
    }

    /// Change the period. A running scheduler re-synchronizes with a
    /// correction cycle measured from its last cycle.
    pub fn set_delay(&self, period_ms: u64) -> TimingResult<&Self> {
        self.ensure_alive("set_delay")?;
        if period_ms == 0 {
            return Err(TimingError::validation(
                "CyclicScheduler::set_delay() expects a positive period (ms)",
            ));
        }

        let now = self.now();
        let mut st = self.state_mut();
        st.period = period_ms;

        if st.status == SchedulerStatus::Running {
            let since_last = now.saturating_sub(st.last_cycle_at.unwrap_or(now));
            let delay = period_ms.saturating_sub(since_last);
            self.arm_correction(&mut st, delay);
        }
        Ok(self)
    }

    /// Slack (ms) a cycle may be late before `in_sync` turns false
    pub fn set_sync_threshold(&self, threshold_ms: u64) -> TimingResult<&Self> {
        self.ensure_alive("set_sync_threshold")?;
        self.state_mut().sync_threshold = threshold_ms;
        Ok(self)
    }

    /// Nudge (ms) subtracted from the correction delay on resume
    pub fn set_resume_correction(&self, correction_ms: u64) -> TimingResult<&Self> {
        self.ensure_alive("set_resume_correction")?;
        self.state_mut().resume_correction = correction_ms;
        Ok(self)
    }

    pub fn status(&self) -> SchedulerStatus {
        self.state().status
    }

    pub fn status_code(&self) -> i8 {
        self.status().code()
    }

    pub fn status_label(&self) -> &'static str {
        self.status().label()
    }

    pub fn in_sync(&self) -> bool {
        self.state().in_sync
    }

    /// Current period (ms)
    pub fn timer_delay(&self) -> u64 {
        self.state().period
    }

    /// Total elapsed run time (ms) as of now, frozen while paused
    pub fn timestamp(&self) -> u64 {
        let st = self.state();
        match st.status {
            SchedulerStatus::Destroyed | SchedulerStatus::Stopped => 0,
            SchedulerStatus::Running => {
                let now = self.now();
                let since_last = now.saturating_sub(st.last_cycle_at.unwrap_or(now));
                st.elapsed.saturating_add(since_last)
            }
            SchedulerStatus::Paused => {
                let paused_at = st.paused_at.unwrap_or(0);
                let since_last = paused_at.saturating_sub(st.last_cycle_at.unwrap_or(paused_at));
                st.elapsed.saturating_add(since_last)
            }
            SchedulerStatus::Completed => st.elapsed,
        }
    }

    pub fn current_cycle(&self) -> u64 {
        self.state().current_cycle
    }

    /// `None` when unbounded
    pub fn cycle_limit(&self) -> Option<u64> {
        self.state().cycle_limit
    }

    /// Elapsed time (ms) at the start of the latest cycle
    pub fn cycle_timestamp(&self) -> u64 {
        self.state().elapsed
    }

    /// Time (ms) between the two latest cycles
    pub fn cycle_deltatime(&self) -> u64 {
        self.state().delta
    }

    pub fn sync_threshold(&self) -> u64 {
        self.state().sync_threshold
    }

    pub fn resume_correction(&self) -> u64 {
        self.state().resume_correction
    }

    /// Whether the next fire is a correction cycle
    pub fn is_correcting(&self) -> bool {
        self.state().pending_correction
    }
}

impl fmt::Debug for CyclicScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.state();
        f.debug_struct("CyclicScheduler")
            .field("status", &st.status)
            .field("period", &st.period)
            .field("current_cycle", &st.current_cycle)
            .field("cycle_limit", &st.cycle_limit)
            .field("elapsed", &st.elapsed)
            .field("in_sync", &st.in_sync)
            .finish()
    }
}
