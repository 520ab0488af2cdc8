//! The time-control state machine. `checkin` is called exactly once per
//! move, after the move's transport call returns, and decides whether the
//! clock was violated, what `time_left` tuple to report before the next
//! move, and how long the transport may wait on the next `genmove`.

use std::time::Duration;

use crate::config::{GameSettings, TimeSystem};

/// Headroom added to every genmove deadline so an engine honoring its own
/// clock is never timed out by the arbiter first.
const TRANSPORT_MARGIN: f64 = 15.0;

/// Per-engine, per-game timing state. Reset at the start of every game.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClockState {
    pub total_taken: Duration,
    pub max_taken: Duration,
    in_byoyomi: bool,
    periods_left: i64,
    stones_left: u32,
    period_time_left: f64,
    /// Arguments for the next `time_left` command, `None` when untimed.
    pub gtp_time_left: Option<(u64, u32)>,
    /// Deadline for the next `genmove`; `None` waits indefinitely.
    pub move_timeout: Option<Duration>,
}

impl ClockState {
    pub fn in_byoyomi(&self) -> bool {
        self.in_byoyomi
    }

    pub fn periods_left(&self) -> i64 {
        self.periods_left
    }

    pub fn stones_left(&self) -> u32 {
        self.stones_left
    }
}

pub struct TimeKeep {
    pub settings: GameSettings,
    /// Seconds of grace before a violation is flagged; negative disables
    /// time checking entirely.
    pub tolerance: f64,
    /// Whether a violation loses the game or is only logged.
    pub enforce_time: bool,
}

impl TimeKeep {
    pub fn new(settings: &GameSettings, tolerance: f64, enforce_time: bool) -> TimeKeep {
        TimeKeep {
            settings: settings.clone(),
            tolerance,
            enforce_time,
        }
    }

    pub fn checking_time(&self) -> bool {
        !self.settings.untimed() && self.tolerance >= 0.0
    }

    /// Reinitialize a clock for a new game. Idempotent; must be called
    /// before any `checkin`.
    pub fn reset(&self, clock: &mut ClockState) {
        let s = &self.settings;
        clock.total_taken = Duration::ZERO;
        clock.max_taken = Duration::ZERO;
        clock.in_byoyomi = false;
        clock.periods_left = if s.time_system == TimeSystem::Japanese {
            s.period_count as i64
        } else {
            0
        };
        clock.stones_left = if s.time_system == TimeSystem::Canadian {
            s.period_count
        } else {
            0
        };
        clock.period_time_left = if s.time_system == TimeSystem::Canadian {
            s.period_time as f64
        } else {
            0.0
        };
        clock.gtp_time_left = if s.untimed() {
            None
        } else if s.main_time > 0 {
            Some((s.main_time as u64, 0))
        } else {
            Some((s.period_time as u64, s.period_count))
        };
        clock.move_timeout = self.next_timeout(clock);
    }

    /// Check in a completed move. Updates the clock and returns whether the
    /// configured time control was violated.
    pub fn checkin(&self, clock: &mut ClockState, delta: Duration) -> bool {
        clock.total_taken += delta;
        if delta > clock.max_taken {
            clock.max_taken = delta;
        }

        if !self.checking_time() {
            return false;
        }

        let violation = self.check_clock(clock, delta.as_secs_f64());
        clock.move_timeout = self.next_timeout(clock);
        violation
    }

    fn check_clock(&self, clock: &mut ClockState, delta: f64) -> bool {
        let s = &self.settings;
        let total = clock.total_taken.as_secs_f64();

        if s.time_system == TimeSystem::Absolute {
            let time_left = s.main_time as f64 - total;
            clock.gtp_time_left = Some((time_left.max(0.0) as u64, 0));
            return time_left + self.tolerance <= 0.0;
        }

        let mut delta = delta;
        if !clock.in_byoyomi {
            let over_main = total - s.main_time as f64;
            if over_main < 0.0 {
                clock.gtp_time_left = Some(((-over_main) as u64, 0));
                return false; // still in main time
            }
            // The overflow counts as spent in the first byo-yomi period;
            // the phase flip is permanent for the rest of the game.
            clock.in_byoyomi = true;
            delta = over_main;
        }

        if s.time_system == TimeSystem::Japanese {
            let period = s.period_time as f64;
            let mut exhausted = (delta / period) as i64;
            if exhausted >= clock.periods_left {
                // Tolerance can save exactly the boundary case.
                let with_tolerance = (delta - self.tolerance).max(0.0);
                exhausted = (with_tolerance / period) as i64;
            }
            clock.periods_left -= exhausted;
            clock.gtp_time_left = Some((s.period_time as u64, clock.periods_left.max(1) as u32));
            let violation = clock.periods_left <= 0;
            if violation {
                // Keep the state well defined if play goes on after a
                // merely logged violation.
                clock.periods_left = 1;
            }
            violation
        } else {
            clock.period_time_left -= delta;
            let violation = clock.period_time_left + self.tolerance < 0.0;
            clock.stones_left -= 1;
            if clock.stones_left == 0 {
                clock.stones_left = s.period_count;
                clock.period_time_left = s.period_time as f64;
            }
            clock.gtp_time_left = Some((
                clock.period_time_left.max(0.0) as u64,
                clock.stones_left,
            ));
            violation
        }
    }

    /// Ceiling for the next genmove call: always at least what the clock
    /// itself would allow, plus a fixed margin.
    fn next_timeout(&self, clock: &ClockState) -> Option<Duration> {
        if !self.checking_time() {
            return None;
        }
        let s = &self.settings;
        let remaining_main = (s.main_time as f64 - clock.total_taken.as_secs_f64()).max(0.0);
        let allowance = match s.time_system {
            TimeSystem::None => return None,
            TimeSystem::Absolute => remaining_main,
            TimeSystem::Canadian => {
                if clock.in_byoyomi {
                    clock.period_time_left.max(0.0)
                } else {
                    remaining_main + s.period_time as f64
                }
            }
            TimeSystem::Japanese => {
                if clock.in_byoyomi {
                    clock.periods_left.max(1) as f64 * s.period_time as f64
                } else {
                    remaining_main + s.period_time as f64
                }
            }
        };
        Some(Duration::from_secs_f64(
            allowance + self.tolerance.max(0.0) + TRANSPORT_MARGIN,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameSettings;

    fn settings(
        main_time: u32,
        period_time: u32,
        period_count: u32,
        time_system: TimeSystem,
    ) -> GameSettings {
        GameSettings::new(19, 7.5, main_time, period_time, period_count, time_system)
            .expect("valid settings")
    }

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    #[test]
    fn untimed_never_violates() {
        let tk = TimeKeep::new(&settings(0, 0, 0, TimeSystem::None), 0.0, true);
        let mut clock = ClockState::default();
        tk.reset(&mut clock);
        assert_eq!(None, clock.gtp_time_left);
        assert_eq!(None, clock.move_timeout);
        for _ in 0..100 {
            assert!(!tk.checkin(&mut clock, secs(3600.0)));
        }
    }

    #[test]
    fn negative_tolerance_disables_checking() {
        let tk = TimeKeep::new(&settings(1, 5, 1, TimeSystem::Canadian), -1.0, true);
        let mut clock = ClockState::default();
        tk.reset(&mut clock);
        assert!(!tk.checkin(&mut clock, secs(1000.0)));
    }

    #[test]
    fn absolute_time_runs_out() {
        let tk = TimeKeep::new(&settings(10, 0, 0, TimeSystem::Absolute), 0.0, true);
        let mut clock = ClockState::default();
        tk.reset(&mut clock);
        assert_eq!(Some((10, 0)), clock.gtp_time_left);

        assert!(!tk.checkin(&mut clock, secs(4.0)));
        assert_eq!(Some((6, 0)), clock.gtp_time_left);
        assert!(!tk.checkin(&mut clock, secs(4.0)));
        assert_eq!(Some((2, 0)), clock.gtp_time_left);
        // 11s total exceeds the 10s budget.
        assert!(tk.checkin(&mut clock, secs(3.0)));
        assert_eq!(Some((0, 0)), clock.gtp_time_left);
    }

    #[test]
    fn absolute_tolerance_saves_the_boundary() {
        let tk = TimeKeep::new(&settings(10, 0, 0, TimeSystem::Absolute), 2.0, true);
        let mut clock = ClockState::default();
        tk.reset(&mut clock);
        assert!(!tk.checkin(&mut clock, secs(11.0)));
        assert!(tk.checkin(&mut clock, secs(2.0)));
    }

    #[test]
    fn canadian_byoyomi_violation_depends_on_tolerance() {
        // Period 5s, one stone per period, no main time; a 6s move violates
        // with tolerance 0 but not with tolerance 2.
        let tk = TimeKeep::new(&settings(0, 5, 1, TimeSystem::Canadian), 0.0, true);
        let mut clock = ClockState::default();
        tk.reset(&mut clock);
        assert!(tk.checkin(&mut clock, secs(6.0)));

        let tk = TimeKeep::new(&settings(0, 5, 1, TimeSystem::Canadian), 2.0, true);
        tk.reset(&mut clock);
        assert!(!tk.checkin(&mut clock, secs(6.0)));
    }

    #[test]
    fn canadian_period_rollover() {
        let tk = TimeKeep::new(&settings(0, 30, 3, TimeSystem::Canadian), 0.0, true);
        let mut clock = ClockState::default();
        tk.reset(&mut clock);
        assert_eq!(Some((30, 3)), clock.gtp_time_left);

        assert!(!tk.checkin(&mut clock, secs(10.0)));
        assert_eq!(Some((20, 2)), clock.gtp_time_left);
        assert!(!tk.checkin(&mut clock, secs(10.0)));
        assert_eq!(Some((10, 1)), clock.gtp_time_left);
        // Third stone exhausts the period; fresh period granted.
        assert!(!tk.checkin(&mut clock, secs(10.0)));
        assert_eq!(Some((30, 3)), clock.gtp_time_left);
        assert_eq!(3, clock.stones_left());
    }

    #[test]
    fn main_time_overflow_carries_into_byoyomi() {
        // 10s main, then 5s Canadian periods of one stone. A 13s move
        // leaves the engine 3s into its first period.
        let tk = TimeKeep::new(&settings(10, 5, 1, TimeSystem::Canadian), 0.0, true);
        let mut clock = ClockState::default();
        tk.reset(&mut clock);
        assert!(!tk.checkin(&mut clock, secs(13.0)));
        assert!(clock.in_byoyomi());
        // 5 - 3 = 2s left, then the single-stone period rolled over.
        assert_eq!(Some((5, 1)), clock.gtp_time_left);

        // An 8s overflow would have blown the 5s period instead.
        tk.reset(&mut clock);
        assert!(tk.checkin(&mut clock, secs(18.0)));
    }

    #[test]
    fn japanese_periods_are_consumed() {
        let tk = TimeKeep::new(&settings(0, 10, 3, TimeSystem::Japanese), 0.0, true);
        let mut clock = ClockState::default();
        tk.reset(&mut clock);

        // Within one period: nothing consumed.
        assert!(!tk.checkin(&mut clock, secs(9.0)));
        assert_eq!(3, clock.periods_left());
        assert_eq!(Some((10, 3)), clock.gtp_time_left);

        // A 25s move burns two periods.
        assert!(!tk.checkin(&mut clock, secs(25.0)));
        assert_eq!(1, clock.periods_left());

        // Burning the last period is a violation; the count is clamped
        // back to 1 so later checks stay well defined.
        assert!(tk.checkin(&mut clock, secs(10.0)));
        assert_eq!(1, clock.periods_left());
        assert_eq!(Some((10, 1)), clock.gtp_time_left);
    }

    #[test]
    fn japanese_tolerance_saves_the_boundary() {
        let tk = TimeKeep::new(&settings(0, 10, 1, TimeSystem::Japanese), 2.0, true);
        let mut clock = ClockState::default();
        tk.reset(&mut clock);
        // 11s against a single 10s period survives with 2s tolerance.
        assert!(!tk.checkin(&mut clock, secs(11.0)));
        // 13s does not.
        tk.reset(&mut clock);
        assert!(tk.checkin(&mut clock, secs(13.0)));
    }

    #[test]
    fn reset_is_deterministic() {
        let tk = TimeKeep::new(&settings(10, 5, 2, TimeSystem::Canadian), 0.5, true);
        let deltas = [3.0, 4.0, 6.0, 2.5, 5.5, 7.0];

        let mut clock = ClockState::default();
        let mut replay = |clock: &mut ClockState| {
            tk.reset(clock);
            deltas
                .iter()
                .map(|&d| {
                    let violation = tk.checkin(clock, secs(d));
                    (violation, clock.gtp_time_left, clock.move_timeout)
                })
                .collect::<Vec<_>>()
        };

        let first = replay(&mut clock);
        let second = replay(&mut clock);
        assert_eq!(first, second);
    }

    #[test]
    fn timeout_covers_the_clock_allowance() {
        let tk = TimeKeep::new(&settings(60, 10, 3, TimeSystem::Japanese), 1.0, true);
        let mut clock = ClockState::default();
        tk.reset(&mut clock);
        // Main time plus one period plus tolerance, at minimum.
        let timeout = clock.move_timeout.expect("timed settings have a timeout");
        assert!(timeout >= Duration::from_secs(71));

        // Deep in byo-yomi the allowance shrinks but the margin stays.
        for _ in 0..3 {
            tk.checkin(&mut clock, secs(30.0));
        }
        let timeout = clock.move_timeout.expect("timed settings have a timeout");
        assert!(timeout >= Duration::from_secs(10));
    }
}
