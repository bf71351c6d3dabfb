//! Emission throttling for progress events.

use std::time::{Duration, Instant};

/// Lets an event through at most once per `interval` of wall time.
///
/// The first call always passes. Owned by a single producer; wrap it in a
/// mutex when the producer is a shared callback.
#[derive(Debug, Clone)]
pub struct EmitThrottle {
    interval: Duration,
    last_emit: Option<Instant>,
}

impl EmitThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: None,
        }
    }

    /// Returns `true` when an emission is allowed now, and records it.
    pub fn should_emit(&mut self) -> bool {
        self.should_emit_at(Instant::now())
    }

    /// Same as [`should_emit`](Self::should_emit) against an explicit clock reading.
    pub fn should_emit_at(&mut self, now: Instant) -> bool {
        match self.last_emit {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last_emit = Some(now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_emission_passes() {
        let mut throttle = EmitThrottle::new(Duration::from_millis(500));
        assert!(throttle.should_emit_at(Instant::now()));
    }

    #[test]
    fn test_emissions_inside_interval_are_dropped() {
        let mut throttle = EmitThrottle::new(Duration::from_millis(500));
        let t0 = Instant::now();

        assert!(throttle.should_emit_at(t0));
        assert!(!throttle.should_emit_at(t0 + Duration::from_millis(100)));
        assert!(!throttle.should_emit_at(t0 + Duration::from_millis(499)));
        assert!(throttle.should_emit_at(t0 + Duration::from_millis(500)));
        assert!(!throttle.should_emit_at(t0 + Duration::from_millis(900)));
        assert!(throttle.should_emit_at(t0 + Duration::from_millis(1000)));
    }

    #[test]
    fn test_clock_going_backwards_is_dropped() {
        let mut throttle = EmitThrottle::new(Duration::from_secs(60));
        let t0 = Instant::now() + Duration::from_secs(1);

        assert!(throttle.should_emit_at(t0));
        assert!(!throttle.should_emit_at(t0 - Duration::from_millis(500)));
    }
}
