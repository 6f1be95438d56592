// Transport - Musical playback clock
// Drives tick/sub-beat/beat/bar counters from a CyclicScheduler

use super::timeline::{MusicalPosition, ResolutionFactor, Tempo, TimeSignature, tick_interval_ms};
use crate::clock::{TimerService, format_timestamp};
use crate::error::TimingResult;
use crate::scheduler::{CyclicScheduler, SchedulerStatus};
use crate::settings::TimerSettings;
use std::cell::{Ref, RefCell};
use std::fmt;
use std::rc::Rc;

/// User callback, invoked on every tick with the updated position
pub type TickCallback = Rc<dyn Fn(&MusicalTimer)>;

#[derive(Debug, Clone, Copy)]
struct TrackerState {
    tempo: Tempo,
    signature: TimeSignature,
    resolution: ResolutionFactor,
    position: MusicalPosition,
}

impl TrackerState {
    fn new(tempo: Tempo) -> Self {
        Self {
            tempo,
            signature: TimeSignature::default(),
            resolution: ResolutionFactor::default(),
            position: MusicalPosition::start(),
        }
    }

    fn sub_beats_per_beat(&self) -> u32 {
        self.resolution.sub_beats_per_beat(self.signature.subdivision_mode())
    }

    fn tick_interval(&self) -> u64 {
        tick_interval_ms(self.tempo, self.signature, self.resolution)
    }
}

struct TrackerShared {
    clock: CyclicScheduler,
    state: RefCell<TrackerState>,
    callback: TickCallback,
}

impl Drop for TrackerShared {
    fn drop(&mut self) {
        self.clock.destroy();
    }
}

/// Musical clock: converts tempo, time signature and resolution into a tick
/// period and keeps track of the musical position.
///
/// The scheduler is owned exclusively; dropping the timer destroys it.
pub struct MusicalTimer {
    shared: Rc<TrackerShared>,
}

impl MusicalTimer {
    /// Create a stopped timer in 4/4, resolution factor 2
    pub fn new<F>(timers: Rc<dyn TimerService>, tempo: u32, callback: F) -> TimingResult<Self>
    where
        F: Fn(&MusicalTimer) + 'static,
    {
        let tempo = Tempo::new(tempo)?;
        let clock = CyclicScheduler::new(timers, TrackerState::new(tempo).tick_interval())?;
        Self::build(clock, tempo, Rc::new(callback))
    }

    /// Create a timer driving an existing scheduler. The scheduler's period
    /// and action are replaced.
    pub fn with_scheduler<F>(clock: CyclicScheduler, tempo: u32, callback: F) -> TimingResult<Self>
    where
        F: Fn(&MusicalTimer) + 'static,
    {
        let tempo = Tempo::new(tempo)?;
        Self::build(clock, tempo, Rc::new(callback))
    }

    /// Create a timer configured from settings
    pub fn from_settings<F>(
        timers: Rc<dyn TimerService>,
        settings: &TimerSettings,
        callback: F,
    ) -> TimingResult<Self>
    where
        F: Fn(&MusicalTimer) + 'static,
    {
        settings.validate()?;
        let timer = Self::new(timers, settings.tempo, callback)?;
        settings.apply(&timer)?;
        Ok(timer)
    }

    fn build(clock: CyclicScheduler, tempo: Tempo, callback: TickCallback) -> TimingResult<Self> {
        let state = TrackerState::new(tempo);
        clock.set_delay(state.tick_interval())?;

        let shared = Rc::new(TrackerShared {
            clock,
            state: RefCell::new(state),
            callback,
        });

        let weak = Rc::downgrade(&shared);
        shared.clock.action(move |_| {
            if let Some(shared) = weak.upgrade() {
                MusicalTimer { shared }.next_tick();
            }
        })?;

        Ok(Self { shared })
    }

    fn state(&self) -> Ref<'_, TrackerState> {
        self.shared.state.borrow()
    }

    fn notify(&self) {
        (self.shared.callback)(self);
    }

    fn next_tick(&self) {
        {
            let mut st = self.shared.state.borrow_mut();
            let sub_beats = st.sub_beats_per_beat();
            let beats = st.signature.beats_per_bar();
            st.position.advance(sub_beats, beats);
        }
        self.notify();
    }

    /// Apply a change to tempo/signature/resolution and re-time the clock.
    /// Nothing is committed if the scheduler rejects the new period.
    fn retime<F>(&self, change: F) -> TimingResult<&Self>
    where
        F: FnOnce(&mut TrackerState),
    {
        let mut next = *self.state();
        change(&mut next);
        self.shared.clock.set_delay(next.tick_interval())?;

        let mut st = self.shared.state.borrow_mut();
        st.tempo = next.tempo;
        st.signature = next.signature;
        st.resolution = next.resolution;
        Ok(self)
    }

    // ========== Transport ==========

    /// Start playback, or resume after a pause.
    /// From a stop, the callback runs immediately for the first position.
    pub fn play(&self) -> TimingResult<&Self> {
        if self.shared.clock.status() == SchedulerStatus::Stopped {
            self.notify();
        }
        self.shared.clock.start(true)?;
        Ok(self)
    }

    pub fn pause(&self) -> TimingResult<&Self> {
        if self.shared.clock.status() == SchedulerStatus::Running {
            self.shared.clock.pause()?;
        }
        Ok(self)
    }

    /// Stop playback and rewind to bar 1
    pub fn stop(&self) -> TimingResult<&Self> {
        if self.shared.clock.status() != SchedulerStatus::Stopped {
            self.shared.clock.stop()?;
        }
        self.shared.state.borrow_mut().position.reset();
        Ok(self)
    }

    // ========== Settings ==========

    /// Set tempo in BPM (1-200)
    pub fn set_tempo(&self, bpm: u32) -> TimingResult<&Self> {
        let tempo = Tempo::new(bpm)?;
        self.retime(|st| st.tempo = tempo)
    }

    pub fn set_signature(&self, signature: TimeSignature) -> TimingResult<&Self> {
        self.retime(|st| st.signature = signature)
    }

    /// Set the resolution factor (0-4)
    pub fn set_resolution_factor(&self, factor: u8) -> TimingResult<&Self> {
        let resolution = ResolutionFactor::new(factor)?;
        self.retime(|st| st.resolution = resolution)
    }

    pub fn tempo(&self) -> u32 {
        self.state().tempo.bpm()
    }

    pub fn signature(&self) -> TimeSignature {
        self.state().signature
    }

    pub fn resolution_factor(&self) -> u8 {
        self.state().resolution.value()
    }

    // ========== Position ==========

    pub fn tick(&self) -> u64 {
        self.state().position.tick
    }

    pub fn sub_beat(&self) -> u32 {
        self.state().position.sub_beat
    }

    pub fn beat(&self) -> u32 {
        self.state().position.beat
    }

    pub fn bar(&self) -> u64 {
        self.state().position.bar
    }

    pub fn position(&self) -> MusicalPosition {
        self.state().position
    }

    /// Beats in one bar of the current signature
    pub fn beats_per_bar(&self) -> u32 {
        self.state().signature.beats_per_bar()
    }

    /// Sub-beats in one beat
    pub fn beat_subdivision(&self) -> u32 {
        self.state().sub_beats_per_beat()
    }

    /// Milliseconds between ticks
    pub fn tick_interval(&self) -> u64 {
        self.state().tick_interval()
    }

    // ========== Clock ==========

    pub fn status(&self) -> SchedulerStatus {
        self.shared.clock.status()
    }

    pub fn status_code(&self) -> i8 {
        self.shared.clock.status_code()
    }

    pub fn in_sync(&self) -> bool {
        self.shared.clock.in_sync()
    }

    /// Time (ms) between the two latest ticks
    pub fn tick_deltatime(&self) -> u64 {
        self.shared.clock.cycle_deltatime()
    }

    /// Elapsed playback time (ms)
    pub fn timestamp(&self) -> u64 {
        self.shared.clock.timestamp()
    }

    /// Elapsed playback time as `HH:MM:SS.CC`
    pub fn timestamp_formatted(&self) -> String {
        format_timestamp(self.timestamp())
    }

    /// Underlying scheduler (tuning sync threshold, cycle limits, ...)
    pub fn scheduler(&self) -> &CyclicScheduler {
        &self.shared.clock
    }
}

impl fmt::Debug for MusicalTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.state();
        f.debug_struct("MusicalTimer")
            .field("tempo", &st.tempo)
            .field("signature", &st.signature)
            .field("resolution", &st.resolution)
            .field("position", &st.position)
            .field("clock", &self.shared.clock)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::EventLoop;
    use crate::scheduler::Repeat;
    use std::cell::Cell;

    type Log = Rc<RefCell<Vec<(u64, u32, u32, u64)>>>;

    fn recording_timer(event_loop: &EventLoop, tempo: u32) -> (MusicalTimer, Log) {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let l = log.clone();
        let timer = MusicalTimer::new(event_loop.service(), tempo, move |t| {
            l.borrow_mut().push((t.tick(), t.sub_beat(), t.beat(), t.bar()));
        })
        .unwrap();
        (timer, log)
    }

    #[test]
    fn test_defaults() {
        let event_loop = EventLoop::manual();
        let (timer, _) = recording_timer(&event_loop, 60);

        assert_eq!(timer.tempo(), 60);
        assert_eq!(timer.signature(), TimeSignature::FourFour);
        assert_eq!(timer.resolution_factor(), 2);
        assert_eq!(timer.beats_per_bar(), 4);
        assert_eq!(timer.beat_subdivision(), 4);
        assert_eq!(timer.tick_interval(), 250);
        assert_eq!(timer.scheduler().timer_delay(), 250);
        assert_eq!(timer.status(), SchedulerStatus::Stopped);
        assert_eq!(timer.position(), MusicalPosition::start());
        assert_eq!(timer.timestamp_formatted(), "00:00:00.00");
    }

    #[test]
    fn test_invalid_tempo_rejected() {
        let event_loop = EventLoop::manual();
        assert!(MusicalTimer::new(event_loop.service(), 0, |_| {})
            .unwrap_err()
            .is_validation());
        assert!(MusicalTimer::new(event_loop.service(), 201, |_| {})
            .unwrap_err()
            .is_validation());
    }

    #[test]
    fn test_play_fires_first_position_synchronously() {
        let event_loop = EventLoop::manual();
        let (timer, log) = recording_timer(&event_loop, 120);

        timer.play().unwrap();
        assert_eq!(*log.borrow(), vec![(1, 1, 1, 1)]);
        assert_eq!(timer.status(), SchedulerStatus::Running);
        assert_eq!(timer.status_code(), 1);
    }

    #[test]
    fn test_beat_rolls_over_after_four_ticks() {
        let event_loop = EventLoop::manual();
        let (timer, log) = recording_timer(&event_loop, 120);
        assert_eq!(timer.tick_interval(), 125);

        timer.play().unwrap();
        event_loop.advance_by(125 * 4);

        assert_eq!(
            *log.borrow(),
            vec![(1, 1, 1, 1), (2, 2, 1, 1), (3, 3, 1, 1), (4, 4, 1, 1), (5, 1, 2, 1)]
        );
        assert_eq!(timer.tick_deltatime(), 125);
        assert_eq!(timer.timestamp(), 500);
        assert!(timer.in_sync());
    }

    #[test]
    fn test_bar_rolls_over_in_six_eight() {
        let event_loop = EventLoop::manual();
        let (timer, _) = recording_timer(&event_loop, 60);

        timer.set_signature(TimeSignature::SixEight).unwrap();
        timer.set_resolution_factor(0).unwrap();
        assert_eq!(timer.beats_per_bar(), 2);
        assert_eq!(timer.beat_subdivision(), 1);
        assert_eq!(timer.tick_interval(), 1000);

        timer.play().unwrap();
        event_loop.advance_by(2000);
        assert_eq!((timer.tick(), timer.beat(), timer.bar()), (3, 1, 2));
    }

    #[test]
    fn test_stop_resets_counters() {
        let event_loop = EventLoop::manual();
        let (timer, log) = recording_timer(&event_loop, 120);

        timer.play().unwrap();
        event_loop.advance_by(1000);
        timer.stop().unwrap();

        assert_eq!(timer.status(), SchedulerStatus::Stopped);
        assert_eq!(timer.position(), MusicalPosition::start());
        assert_eq!(timer.timestamp(), 0);
        assert_eq!(event_loop.pending(), 0);

        log.borrow_mut().clear();
        timer.play().unwrap();
        assert_eq!(*log.borrow(), vec![(1, 1, 1, 1)]);

        // Stopping twice is harmless
        timer.stop().unwrap();
        timer.stop().unwrap();
    }

    #[test]
    fn test_pause_and_resume_keep_position() {
        let event_loop = EventLoop::manual();
        let (timer, log) = recording_timer(&event_loop, 120);

        timer.play().unwrap();
        event_loop.advance_by(300);
        timer.pause().unwrap();
        assert_eq!(timer.status(), SchedulerStatus::Paused);
        assert_eq!(timer.tick(), 3);

        event_loop.advance_by(1000);
        assert_eq!(timer.tick(), 3);
        assert_eq!(timer.timestamp(), 300);

        // Resuming does not replay the current position
        timer.play().unwrap();
        assert_eq!(log.borrow().len(), 3);
        assert_eq!(timer.status(), SchedulerStatus::Running);

        // 75 ms were left in the tick, minus the resume correction
        event_loop.advance_by(72);
        assert_eq!(timer.tick(), 3);
        event_loop.advance_by(1);
        assert_eq!(timer.tick(), 4);
    }

    #[test]
    fn test_pause_when_not_running_is_noop() {
        let event_loop = EventLoop::manual();
        let (timer, _) = recording_timer(&event_loop, 120);

        timer.pause().unwrap();
        assert_eq!(timer.status(), SchedulerStatus::Stopped);
    }

    #[test]
    fn test_tempo_change_while_playing_corrects() {
        let event_loop = EventLoop::manual();
        let (timer, _) = recording_timer(&event_loop, 120);

        timer.play().unwrap();
        event_loop.advance_by(100);
        timer.set_tempo(60).unwrap();

        assert_eq!(timer.tick_interval(), 250);
        assert!(timer.scheduler().is_correcting());
        assert_eq!(event_loop.next_deadline(), Some(250));

        event_loop.advance_to(250);
        assert_eq!(timer.tick(), 2);
        event_loop.advance_to(500);
        assert_eq!(timer.tick(), 3);
    }

    #[test]
    fn test_invalid_settings_leave_timer_untouched() {
        let event_loop = EventLoop::manual();
        let (timer, _) = recording_timer(&event_loop, 90);

        assert!(timer.set_tempo(0).unwrap_err().is_validation());
        assert!(timer.set_resolution_factor(5).unwrap_err().is_validation());
        assert_eq!(timer.tempo(), 90);
        assert_eq!(timer.resolution_factor(), 2);
    }

    #[test]
    fn test_callback_can_stop_the_timer() {
        let event_loop = EventLoop::manual();
        let calls = Rc::new(Cell::new(0));
        let c = calls.clone();

        let timer = MusicalTimer::new(event_loop.service(), 60, move |t| {
            c.set(c.get() + 1);
            if t.bar() == 2 {
                t.stop().unwrap();
            }
        })
        .unwrap();
        timer.set_resolution_factor(0).unwrap();

        timer.play().unwrap();
        event_loop.advance_by(10_000);

        assert_eq!(calls.get(), 5);
        assert_eq!(timer.status(), SchedulerStatus::Stopped);
        assert_eq!(timer.tick(), 1);
    }

    #[test]
    fn test_timestamp_formatted() {
        let event_loop = EventLoop::manual();
        let (timer, _) = recording_timer(&event_loop, 120);

        timer.play().unwrap();
        event_loop.advance_by(1250);
        assert_eq!(timer.timestamp_formatted(), "00:00:01.25");
    }

    #[test]
    fn test_with_scheduler_and_cycle_limit() {
        let event_loop = EventLoop::manual();
        let clock = CyclicScheduler::new(event_loop.service(), 999).unwrap();
        let timer = MusicalTimer::with_scheduler(clock, 120, |_| {}).unwrap();

        assert_eq!(timer.scheduler().timer_delay(), 125);
        timer.scheduler().repeat(Repeat::Times(3)).unwrap();
        timer.play().unwrap();
        event_loop.advance_by(1000);

        assert_eq!(timer.status(), SchedulerStatus::Completed);
        assert_eq!(timer.tick(), 4);
    }

    #[test]
    fn test_drop_destroys_scheduler() {
        let event_loop = EventLoop::manual();
        {
            let (timer, _) = recording_timer(&event_loop, 120);
            timer.play().unwrap();
            assert_eq!(event_loop.pending(), 1);
        }
        assert_eq!(event_loop.pending(), 0);
        assert_eq!(event_loop.advance_by(1000), 0);
    }
}
