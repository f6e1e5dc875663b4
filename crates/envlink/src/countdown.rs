use std::time::{Duration, Instant};

pub const COUNTDOWN_TICK: Duration = Duration::from_secs(1);
/// Seconds shown between rounds after an episode ends.
pub const BETWEEN_ROUNDS_SECONDS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownPoll {
    Idle,
    Ticked(u32),
    /// The count reached zero; reported once per arm.
    Elapsed,
}

/// Cooperative one-second countdown driven by `poll`. Re-arming replaces the
/// running count, so a superseded countdown can never fire.
#[derive(Debug, Clone)]
pub struct Countdown {
    tick: Duration,
    remaining: Option<u32>,
    next_tick_at: Option<Instant>,
}

impl Default for Countdown {
    fn default() -> Self {
        Self::new(COUNTDOWN_TICK)
    }
}

impl Countdown {
    pub fn new(tick: Duration) -> Self {
        Self {
            tick,
            remaining: None,
            next_tick_at: None,
        }
    }

    pub fn arm(&mut self, seconds: u32, now: Instant) {
        self.remaining = Some(seconds);
        self.next_tick_at = Some(now + self.tick);
    }

    pub fn cancel(&mut self) {
        self.remaining = None;
        self.next_tick_at = None;
    }

    /// Value to display, `None` when inactive.
    pub fn remaining(&self) -> Option<u32> {
        self.remaining
    }

    pub fn is_active(&self) -> bool {
        self.remaining.is_some()
    }

    pub fn poll(&mut self, now: Instant) -> CountdownPoll {
        let Some(mut remaining) = self.remaining else {
            return CountdownPoll::Idle;
        };
        if remaining == 0 {
            self.cancel();
            return CountdownPoll::Elapsed;
        }

        let mut ticked = false;
        while let Some(due) = self.next_tick_at {
            if now < due {
                break;
            }
            remaining -= 1;
            ticked = true;
            if remaining == 0 {
                self.cancel();
                return CountdownPoll::Elapsed;
            }
            self.next_tick_at = Some(due + self.tick);
        }

        self.remaining = Some(remaining);
        if ticked {
            CountdownPoll::Ticked(remaining)
        } else {
            CountdownPoll::Idle
        }
    }
}
