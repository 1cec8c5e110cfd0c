/// Reconnection pacing for the OneBot link.
///
/// Delays double after each failed connection up to a cap. A session
/// that stayed up for at least `stable_after` wipes the failure streak,
/// so a host restart after days of uptime retries quickly again.
use std::time::Duration;

pub struct Backoff {
    initial: Duration,
    cap: Duration,
    stable_after: Duration,
    next: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(initial: Duration, cap: Duration, stable_after: Duration) -> Self {
        Self {
            initial,
            cap,
            stable_after,
            next: initial,
            failures: 0,
        }
    }

    /// Consecutive failures since the last stable session
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Delay before the next attempt; doubles the one after.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.failures += 1;
        self.next = self.next.saturating_mul(2).min(self.cap);
        delay
    }

    /// Records how long a session lasted. Returns true if it counted as
    /// stable and the streak was reset.
    pub fn session_ended(&mut self, uptime: Duration) -> bool {
        if uptime >= self.stable_after {
            self.next = self.initial;
            self.failures = 0;
            true
        } else {
            false
        }
    }

    pub fn gave_up(&self, max_failures: u32) -> bool {
        self.failures >= max_failures
    }
}
