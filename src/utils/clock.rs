use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Wall-clock milliseconds since the UNIX epoch. Only used to stamp
/// keep-alive frames for RTT estimation; control timing is `Instant`.
#[inline]
pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Periodic tick source for a cooperative loop.
///
/// `due()` fires at most once per period; if the loop fell behind by more
/// than one period the clock re-anchors instead of bursting catch-up
/// ticks, so controller steps stay evenly spaced.
#[derive(Debug)]
pub struct TickClock {
    period: Duration,
    next: Instant,
    count: u64,
}

impl TickClock {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            next: Instant::now(),
            count: 0,
        }
    }

    pub fn with_start(period: Duration, start: Instant) -> Self {
        Self {
            period,
            next: start,
            count: 0,
        }
    }

    #[inline]
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Ticks observed so far.
    #[inline]
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Returns `true` once per elapsed period.
    pub fn due(&mut self, now: Instant) -> bool {
        if now < self.next {
            return false;
        }
        self.next += self.period;
        if self.next <= now {
            // Fell behind more than a full period; re-anchor.
            self.next = now + self.period;
        }
        self.count = self.count.wrapping_add(1);
        true
    }

    /// Time until the next tick fires (zero if already due).
    pub fn due_in(&self, now: Instant) -> Duration {
        self.next.saturating_duration_since(now)
    }
}

/// One-shot liveness deadline with a stable id.
///
/// Sessions and the PLC uplink each hold one; feeding it pushes the
/// deadline out by the configured window, and the owner polls
/// `expired()` at loop boundaries. The id lets a registry match a fired
/// timer back to the session that owns it.
#[derive(Debug)]
pub struct Watchdog {
    id: u32,
    window: Duration,
    deadline: Instant,
    armed: bool,
}

impl Watchdog {
    pub fn new(id: u32, window: Duration) -> Self {
        Self {
            id,
            window,
            deadline: Instant::now() + window,
            armed: true,
        }
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[inline]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Reset the deadline. Called on every inbound frame from the peer.
    #[inline]
    pub fn feed(&mut self, now: Instant) {
        self.deadline = now + self.window;
        self.armed = true;
    }

    /// Stop the watchdog firing until the next `feed`.
    #[inline]
    pub fn disarm(&mut self) {
        self.armed = false;
    }

    #[inline]
    pub fn expired(&self, now: Instant) -> bool {
        self.armed && now >= self.deadline
    }

    /// Replace the window; takes effect from the next feed.
    pub fn set_window(&mut self, window: Duration) {
        self.window = window;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_clock_fires_once_per_period() {
        let start = Instant::now();
        let mut clock = TickClock::with_start(Duration::from_millis(50), start);

        assert!(clock.due(start));
        assert!(!clock.due(start));
        assert!(!clock.due(start + Duration::from_millis(49)));
        assert!(clock.due(start + Duration::from_millis(50)));
        assert_eq!(clock.count(), 2);
    }

    #[test]
    fn tick_clock_reanchors_after_stall() {
        let start = Instant::now();
        let mut clock = TickClock::with_start(Duration::from_millis(50), start);
        assert!(clock.due(start));

        // Loop stalled for five periods; only one tick fires, then the
        // cadence resumes from the stall point.
        let late = start + Duration::from_millis(250);
        assert!(clock.due(late));
        assert!(!clock.due(late));
        assert!(clock.due(late + Duration::from_millis(50)));
    }

    #[test]
    fn watchdog_expires_without_feed() {
        let now = Instant::now();
        let mut wd = Watchdog::new(7, Duration::from_millis(100));
        assert!(!wd.expired(now));
        assert!(wd.expired(now + Duration::from_millis(100)));

        wd.feed(now + Duration::from_millis(90));
        assert!(!wd.expired(now + Duration::from_millis(100)));
        assert_eq!(wd.id(), 7);
    }

    #[test]
    fn watchdog_disarm_holds_until_feed() {
        let now = Instant::now();
        let mut wd = Watchdog::new(1, Duration::from_millis(10));
        wd.disarm();
        assert!(!wd.expired(now + Duration::from_secs(1)));
        wd.feed(now + Duration::from_secs(1));
        assert!(wd.expired(now + Duration::from_secs(2)));
    }
}
