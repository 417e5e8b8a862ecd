//! Phase timers and the per-session scheduler
//!
//! Each session owns at most one active timer. Swapping (lobby countdown ->
//! match countdown -> results countdown) is a stop-then-replace operation so
//! no stale callback can ever outlive its phase.

use tracing::debug;

/// Result of advancing a timer by one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerTick {
    /// Still counting; seconds left after this tick
    Running { remaining: u32 },
    /// The countdown just hit zero
    Expired,
}

/// A countdown clock advanced once per scheduler tick
pub trait Timer: Send {
    /// Short label for logs
    fn label(&self) -> &'static str;

    /// Advance by one tick
    fn tick(&mut self) -> TimerTick;

    /// Seconds left before expiry
    fn remaining_secs(&self) -> u32;
}

fn count_down(remaining: &mut u32) -> TimerTick {
    if *remaining == 0 {
        return TimerTick::Expired;
    }
    *remaining -= 1;
    if *remaining == 0 {
        TimerTick::Expired
    } else {
        TimerTick::Running {
            remaining: *remaining,
        }
    }
}

/// Lobby countdown: expiry triggers an automatic start attempt
#[derive(Debug)]
pub struct LobbyTimer {
    remaining: u32,
}

impl LobbyTimer {
    pub fn new(countdown_secs: u32) -> Self {
        Self {
            remaining: countdown_secs,
        }
    }
}

impl Timer for LobbyTimer {
    fn label(&self) -> &'static str {
        "lobby"
    }

    fn tick(&mut self) -> TimerTick {
        count_down(&mut self.remaining)
    }

    fn remaining_secs(&self) -> u32 {
        self.remaining
    }
}

/// Match-duration countdown: expiry ends the match on the time limit
#[derive(Debug)]
pub struct MatchTimer {
    remaining: u32,
}

impl MatchTimer {
    pub fn new(duration_secs: u32) -> Self {
        Self {
            remaining: duration_secs,
        }
    }
}

impl Timer for MatchTimer {
    fn label(&self) -> &'static str {
        "match"
    }

    fn tick(&mut self) -> TimerTick {
        count_down(&mut self.remaining)
    }

    fn remaining_secs(&self) -> u32 {
        self.remaining
    }
}

/// Short results/recycle countdown after the match ends
#[derive(Debug)]
pub struct EndTimer {
    remaining: u32,
}

impl EndTimer {
    pub fn new(countdown_secs: u32) -> Self {
        Self {
            remaining: countdown_secs,
        }
    }
}

impl Timer for EndTimer {
    fn label(&self) -> &'static str {
        "end"
    }

    fn tick(&mut self) -> TimerTick {
        count_down(&mut self.remaining)
    }

    fn remaining_secs(&self) -> u32 {
        self.remaining
    }
}

/// Runs exactly one timer per session with swap-and-stop semantics
#[derive(Default)]
pub struct TaskScheduler {
    active: Option<Box<dyn Timer>>,
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self { active: None }
    }

    /// Replace the active timer, stopping the old one first
    pub fn swap(&mut self, timer: Box<dyn Timer>) {
        if let Some(old) = self.active.take() {
            debug!(timer = old.label(), "stopping timer before swap");
        }
        self.active = Some(timer);
    }

    /// Stop without replacement. Idempotent.
    pub fn stop(&mut self) {
        if let Some(old) = self.active.take() {
            debug!(timer = old.label(), "timer stopped");
        }
    }

    /// Advance the active timer, if any
    pub fn tick(&mut self) -> Option<TimerTick> {
        self.active.as_mut().map(|t| t.tick())
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_label(&self) -> Option<&'static str> {
        self.active.as_ref().map(|t| t.label())
    }

    pub fn remaining_secs(&self) -> Option<u32> {
        self.active.as_ref().map(|t| t.remaining_secs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn countdown_expires_once_at_zero() {
        let mut timer = LobbyTimer::new(2);
        assert_eq!(timer.tick(), TimerTick::Running { remaining: 1 });
        assert_eq!(timer.tick(), TimerTick::Expired);
        // Ticking past expiry keeps reporting expiry, never wraps.
        assert_eq!(timer.tick(), TimerTick::Expired);
        assert_eq!(timer.remaining_secs(), 0);
    }

    #[test]
    fn swap_replaces_the_active_timer() {
        let mut scheduler = TaskScheduler::new();
        scheduler.swap(Box::new(LobbyTimer::new(60)));
        assert_eq!(scheduler.active_label(), Some("lobby"));
        assert_eq!(scheduler.remaining_secs(), Some(60));

        scheduler.swap(Box::new(MatchTimer::new(600)));
        assert_eq!(scheduler.active_label(), Some("match"));
        assert_eq!(scheduler.remaining_secs(), Some(600));
    }

    #[test]
    fn stop_is_idempotent() {
        let mut scheduler = TaskScheduler::new();
        scheduler.swap(Box::new(EndTimer::new(10)));
        scheduler.stop();
        scheduler.stop();
        assert!(!scheduler.is_running());
        assert_eq!(scheduler.tick(), None);
    }

    #[test]
    fn scheduler_forwards_ticks() {
        let mut scheduler = TaskScheduler::new();
        scheduler.swap(Box::new(MatchTimer::new(3)));
        assert_eq!(scheduler.tick(), Some(TimerTick::Running { remaining: 2 }));
        assert_eq!(scheduler.tick(), Some(TimerTick::Running { remaining: 1 }));
        assert_eq!(scheduler.tick(), Some(TimerTick::Expired));
    }
}
