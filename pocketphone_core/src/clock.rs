use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Mutex;

/// Source of wall-clock time for debounce windows and view timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn now_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests and replay.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn at_millis(millis: i64) -> Self {
        Self::new(DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or_default())
    }

    pub fn advance(&self, by: ChronoDuration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }

    pub fn advance_millis(&self, millis: i64) {
        self.advance(ChronoDuration::milliseconds(millis));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map(|now| *now).unwrap_or_else(|e| *e.into_inner())
    }
}

/// True when `now` falls inside the debounce `window` that opened at `last`.
pub fn within_window(last: Option<DateTime<Utc>>, now: DateTime<Utc>, window: ChronoDuration) -> bool {
    match last {
        Some(last) => now >= last && now - last < window,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::at_millis(1_000);
        assert_eq!(clock.now_millis(), 1_000);
        clock.advance_millis(250);
        assert_eq!(clock.now_millis(), 1_250);
    }

    #[test]
    fn window_comparison() {
        let window = ChronoDuration::milliseconds(300);
        let t0 = DateTime::<Utc>::from_timestamp_millis(10_000).unwrap();

        assert!(!within_window(None, t0, window));
        assert!(within_window(Some(t0), t0, window));
        assert!(within_window(Some(t0), t0 + ChronoDuration::milliseconds(299), window));
        assert!(!within_window(Some(t0), t0 + ChronoDuration::milliseconds(300), window));
        // A clock that moved backwards never debounces.
        assert!(!within_window(Some(t0), t0 - ChronoDuration::milliseconds(5), window));
    }
}
