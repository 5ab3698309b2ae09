//! Virtual time for replayed simulations

use chrono::{DateTime, Duration, Utc};

/// Simulation clock advanced explicitly, never by wall time
#[derive(Debug, Clone)]
pub struct VirtualClock {
    current_utc: DateTime<Utc>,
    time_scale: f64,
}

impl VirtualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current_utc: start,
            time_scale: 1.0,
        }
    }

    pub fn with_time_scale(mut self, time_scale: f64) -> Self {
        self.time_scale = time_scale.max(0.0);
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.current_utc
    }

    /// Advance by `seconds` of elapsed driver time, scaled
    pub fn advance_secs(&mut self, seconds: f64) -> DateTime<Utc> {
        let scaled = (seconds * self.time_scale).max(0.0);
        let whole = scaled.trunc() as i64;
        let nanos = ((scaled - scaled.trunc()) * 1_000_000_000.0) as i64;
        if whole != 0 {
            self.current_utc += Duration::seconds(whole);
        }
        if nanos != 0 {
            self.current_utc += Duration::nanoseconds(nanos);
        }
        self.current_utc
    }

    pub fn advance(&mut self, step: Duration) -> DateTime<Utc> {
        self.current_utc += step;
        self.current_utc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_virtual_clock_advance() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut clock = VirtualClock::new(start);
        assert_eq!(clock.now(), start);

        clock.advance(Duration::seconds(30));
        assert_eq!(clock.now(), start + Duration::seconds(30));
    }

    #[test]
    fn test_virtual_clock_scaled_fractional_seconds() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut clock = VirtualClock::new(start).with_time_scale(10.0);
        clock.advance_secs(0.25);
        assert_eq!(clock.now(), start + Duration::milliseconds(2500));

        // Negative driver time never rewinds the clock
        clock.advance_secs(-5.0);
        assert_eq!(clock.now(), start + Duration::milliseconds(2500));
    }
}
