// ============================================================================
// scheduler.rs — cellflow
// Frame scheduler: drives the two-pass tick sequence, owns the ping-pong
// role labels, and abstracts the host's refresh signal behind TickDriver so
// the same loop runs windowed, headless, and under test.
// ============================================================================

use std::time::Instant;

use crate::state::Roles;

// ======================== Tick driver ========================

pub type TickToken = u64;

/// Host-provided pair of primitives for the per-tick loop: request one
/// refresh callback, or revoke a request that has not fired yet.
pub trait TickDriver {
    fn schedule_next(&mut self) -> TickToken;
    fn cancel(&mut self, token: TickToken);
}

/// Driver for headless runs and tests. Never fires on its own; the caller
/// decides when a scheduled tick is delivered.
#[derive(Default)]
pub struct CountingDriver {
    pub scheduled: u64,
    pub cancelled: Vec<TickToken>,
    next_token: TickToken,
}

impl TickDriver for CountingDriver {
    fn schedule_next(&mut self) -> TickToken {
        self.scheduled += 1;
        self.next_token += 1;
        self.next_token
    }

    fn cancel(&mut self, token: TickToken) {
        self.cancelled.push(token);
    }
}

// ======================== Frame clock ========================

/// Monotonic elapsed seconds since the first observation. The clock starts
/// on the first tick, so tick 0 reads ~0.
pub struct FrameClock {
    started: Option<Instant>,
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameClock {
    pub fn new() -> Self {
        Self { started: None }
    }

    pub fn elapsed(&mut self) -> f32 {
        let started = *self.started.get_or_insert_with(Instant::now);
        started.elapsed().as_secs_f32()
    }
}

// ======================== Scheduler ========================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Running,
    /// Terminal. No further ticks, no reentry to Running.
    Disposed,
}

/// One tick's view of the loop state: which slot to read, which to write,
/// and the elapsed time to feed the simulation program.
#[derive(Clone, Copy, Debug)]
pub struct Tick {
    pub index: u64,
    pub source: usize,
    pub target: usize,
    pub time: f32,
}

/// Owns the animation-loop state: phase, pending tick token, frame clock,
/// buffer role labels, completed-tick count. One instance per canvas; no
/// globals, so teardown ordering is deterministic and instances are
/// independent.
pub struct Scheduler<D: TickDriver> {
    driver: D,
    phase: Phase,
    pending: Option<TickToken>,
    clock: FrameClock,
    roles: Roles,
    completed: u64,
}

impl<D: TickDriver> Scheduler<D> {
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            phase: Phase::Idle,
            pending: None,
            clock: FrameClock::new(),
            roles: Roles::new(),
            completed: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn roles(&self) -> Roles {
        self.roles
    }

    pub fn completed_ticks(&self) -> u64 {
        self.completed
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Idle → Running; requests the first tick. Refused from any other phase.
    pub fn start(&mut self) {
        match self.phase {
            Phase::Idle => {
                self.phase = Phase::Running;
                self.pending = Some(self.driver.schedule_next());
                log::info!("scheduler started");
            }
            Phase::Running => log::warn!("scheduler already running"),
            Phase::Disposed => log::warn!("scheduler disposed; start refused"),
        }
    }

    /// Cancel any pending tick request and enter Disposed. Idempotent; zero
    /// ticks begin after this returns, even if the host still delivers a
    /// stale refresh signal.
    pub fn stop(&mut self) {
        if let Some(token) = self.pending.take() {
            self.driver.cancel(token);
        }
        if self.phase != Phase::Disposed {
            self.phase = Phase::Disposed;
            log::info!("scheduler disposed after {} ticks", self.completed);
        }
    }

    /// Steps 1-2 of the tick sequence: consume the pending request and
    /// report roles plus elapsed time. Returns None unless Running.
    pub fn begin_tick(&mut self) -> Option<Tick> {
        if self.phase != Phase::Running {
            return None;
        }
        self.pending = None;
        Some(Tick {
            index: self.completed,
            source: self.roles.source().index(),
            target: self.roles.target().index(),
            time: self.clock.elapsed(),
        })
    }

    /// Steps 5-6: swap roles only if the passes ran (a skipped tick must
    /// leave the Source unchanged so the next tick re-reads the same state),
    /// then request exactly one next tick.
    pub fn complete_tick(&mut self, ran: bool) {
        if self.phase != Phase::Running {
            return;
        }
        if ran {
            self.roles.swap();
            self.completed += 1;
        }
        if let Some(token) = self.pending.take() {
            self.driver.cancel(token);
        }
        self.pending = Some(self.driver.schedule_next());
    }
}

// ======================== Tests ========================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Slot;

    fn scheduler() -> Scheduler<CountingDriver> {
        Scheduler::new(CountingDriver::default())
    }

    fn run_ticks(sched: &mut Scheduler<CountingDriver>, n: usize) {
        for _ in 0..n {
            let tick = sched.begin_tick().expect("running scheduler must tick");
            assert_eq!(tick.target, 1 - tick.source);
            sched.complete_tick(true);
        }
    }

    #[test]
    fn idle_scheduler_refuses_ticks() {
        let mut sched = scheduler();
        assert_eq!(sched.phase(), Phase::Idle);
        assert!(sched.begin_tick().is_none());
    }

    #[test]
    fn start_requests_first_tick() {
        let mut sched = scheduler();
        sched.start();
        assert_eq!(sched.phase(), Phase::Running);
        assert_eq!(sched.driver().scheduled, 1);
    }

    #[test]
    fn source_parity_over_completed_ticks() {
        for n in 0..16usize {
            let mut sched = scheduler();
            sched.start();
            run_ticks(&mut sched, n);
            let expected = if n % 2 == 0 { Slot::A } else { Slot::B };
            assert_eq!(sched.roles().source(), expected, "after {} ticks", n);
            assert_eq!(sched.completed_ticks(), n as u64);
        }
    }

    #[test]
    fn exactly_one_tick_pending_at_a_time() {
        let mut sched = scheduler();
        sched.start();
        run_ticks(&mut sched, 5);
        // One request per completed tick plus the initial one.
        assert_eq!(sched.driver().scheduled, 6);
        assert!(sched.driver().cancelled.is_empty());
    }

    #[test]
    fn skipped_tick_keeps_roles_and_count() {
        let mut sched = scheduler();
        sched.start();
        run_ticks(&mut sched, 1);
        let roles_before = sched.roles();

        let _ = sched.begin_tick().unwrap();
        sched.complete_tick(false);

        assert_eq!(sched.roles(), roles_before);
        assert_eq!(sched.completed_ticks(), 1);
        // The loop still advances to the next tick.
        assert_eq!(sched.driver().scheduled, 3);
    }

    #[test]
    fn stop_cancels_pending_request() {
        let mut sched = scheduler();
        sched.start();
        sched.stop();
        assert_eq!(sched.phase(), Phase::Disposed);
        assert_eq!(sched.driver().cancelled.len(), 1);
        assert!(sched.begin_tick().is_none());
    }

    #[test]
    fn disposed_is_terminal() {
        let mut sched = scheduler();
        sched.start();
        sched.stop();
        sched.start();
        assert_eq!(sched.phase(), Phase::Disposed);
        assert!(sched.begin_tick().is_none());
        // No new request was made by the refused start.
        assert_eq!(sched.driver().scheduled, 1);
    }

    #[test]
    fn stop_before_any_tick_is_clean() {
        let mut sched = scheduler();
        sched.stop();
        assert_eq!(sched.phase(), Phase::Disposed);
        assert_eq!(sched.completed_ticks(), 0);
        assert!(sched.driver().cancelled.is_empty());
    }

    #[test]
    fn completing_after_stop_is_a_no_op() {
        let mut sched = scheduler();
        sched.start();
        let _ = sched.begin_tick().unwrap();
        sched.stop();
        sched.complete_tick(true);
        assert_eq!(sched.completed_ticks(), 0);
        assert_eq!(sched.driver().scheduled, 1);
    }

    #[test]
    fn first_tick_time_is_near_zero_and_time_increases() {
        let mut sched = scheduler();
        sched.start();

        let t0 = sched.begin_tick().unwrap().time;
        assert!(t0 < 0.25, "first tick reported {}s", t0);
        sched.complete_tick(true);

        std::thread::sleep(std::time::Duration::from_millis(5));
        let t1 = sched.begin_tick().unwrap().time;
        sched.complete_tick(true);

        std::thread::sleep(std::time::Duration::from_millis(5));
        let t2 = sched.begin_tick().unwrap().time;

        assert!(t1 > t0);
        assert!(t2 > t1);
    }

    #[test]
    fn frame_clock_starts_on_first_observation() {
        let mut clock = FrameClock::new();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let first = clock.elapsed();
        assert!(first < 0.25, "clock must start at first tick, read {}", first);
    }
}
