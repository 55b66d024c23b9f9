//! Virtual clock derived from wall-clock instants.
//!
//! The presented position is computed from an anchor instant rather than by
//! accumulating callback intervals, so irregular frame callbacks do not make
//! the virtual time stutter.

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::core::PlaybackError;

/// Source of "now" for public controller calls.
pub trait TimeSource {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced time source for deterministic hosts and tests.
#[derive(Debug, Clone)]
pub struct ManualTimeSource {
    now: Rc<Cell<Instant>>,
}

impl ManualTimeSource {
    pub fn new(start: Instant) -> Self {
        Self {
            now: Rc::new(Cell::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) -> Instant {
        let next = self.now.get() + by;
        self.now.set(next);
        next
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> Instant {
        self.now.get()
    }
}

#[derive(Debug, Clone)]
pub struct VirtualClock {
    /// Set while running
    anchor: Option<Instant>,
    paused_at: f64,
    playback_rate: f64,
    duration: f64,
}

impl VirtualClock {
    pub fn new(duration: f64) -> Self {
        Self {
            anchor: None,
            paused_at: 0.0,
            playback_rate: 1.0,
            duration: duration.max(0.0),
        }
    }

    pub fn start(&mut self, at_virtual_time: f64, now: Instant) {
        self.paused_at = self.clamp(at_virtual_time);
        self.anchor = Some(now);
    }

    pub fn pause(&mut self, now: Instant) {
        self.paused_at = self.advance(now);
        self.anchor = None;
    }

    /// `paused_at + (now - anchor) * rate`, clamped to `[0, duration]`.
    pub fn advance(&self, now: Instant) -> f64 {
        match self.anchor {
            Some(anchor) => {
                let elapsed = now.saturating_duration_since(anchor).as_secs_f64();
                self.clamp(self.paused_at + elapsed * self.playback_rate)
            }
            None => self.paused_at,
        }
    }

    pub fn seek(&mut self, virtual_time: f64, now: Instant) {
        self.paused_at = self.clamp(virtual_time);
        if self.anchor.is_some() {
            self.anchor = Some(now);
        }
    }

    /// Re-anchors at the current position so the new rate only applies from `now` on.
    pub fn set_playback_rate(&mut self, rate: f64, now: Instant) -> Result<(), PlaybackError> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(PlaybackError::InvalidPlaybackRate(rate));
        }
        if self.anchor.is_some() {
            self.paused_at = self.advance(now);
            self.anchor = Some(now);
        }
        self.playback_rate = rate;
        Ok(())
    }

    pub fn set_duration(&mut self, duration: f64) {
        self.duration = duration.max(0.0);
        self.paused_at = self.clamp(self.paused_at);
    }

    pub fn is_running(&self) -> bool {
        self.anchor.is_some()
    }

    pub fn playback_rate(&self) -> f64 {
        self.playback_rate
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    fn clamp(&self, virtual_time: f64) -> f64 {
        if virtual_time.is_nan() {
            return 0.0;
        }
        virtual_time.clamp(0.0, self.duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_advance_follows_wall_clock() {
        let t0 = Instant::now();
        let mut clock = VirtualClock::new(10.0);

        clock.start(2.0, t0);
        assert!((clock.advance(t0 + ms(1500)) - 3.5).abs() < 1e-9);
    }

    #[test]
    fn test_pause_freezes_position() {
        let t0 = Instant::now();
        let mut clock = VirtualClock::new(10.0);

        clock.start(0.0, t0);
        clock.pause(t0 + ms(1000));

        assert!(!clock.is_running());
        assert!((clock.advance(t0 + ms(5000)) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_advance_is_clamped_to_duration() {
        let t0 = Instant::now();
        let mut clock = VirtualClock::new(3.0);

        clock.start(2.0, t0);
        assert_eq!(clock.advance(t0 + ms(5000)), 3.0);

        clock.seek(-4.0, t0);
        assert_eq!(clock.advance(t0), 0.0);
    }

    #[test]
    fn test_monotonic_under_jittery_sampling() {
        let t0 = Instant::now();
        let mut clock = VirtualClock::new(60.0);
        clock.start(0.0, t0);

        // Irregular callback spacing with repeated timestamps
        let offsets = [16u64, 17, 40, 41, 41, 90, 120, 300, 301];
        let mut last = 0.0;
        for offset in offsets {
            let value = clock.advance(t0 + ms(offset));
            assert!(value >= last, "virtual time went backwards: {} < {}", value, last);
            last = value;
        }
    }

    #[test]
    fn test_rate_change_reanchors() {
        let t0 = Instant::now();
        let mut clock = VirtualClock::new(100.0);
        clock.start(0.0, t0);

        clock.set_playback_rate(2.0, t0 + ms(1000)).unwrap();

        // One second at 1x, then one second at 2x
        assert!((clock.advance(t0 + ms(2000)) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_rate_is_rejected() {
        let mut clock = VirtualClock::new(10.0);
        let now = Instant::now();

        assert!(clock.set_playback_rate(0.0, now).is_err());
        assert!(clock.set_playback_rate(f64::NAN, now).is_err());
        assert!(clock.set_playback_rate(-1.0, now).is_err());
        assert_eq!(clock.playback_rate(), 1.0);
    }

    #[test]
    fn test_shrinking_duration_clamps_position() {
        let t0 = Instant::now();
        let mut clock = VirtualClock::new(10.0);
        clock.seek(8.0, t0);

        clock.set_duration(5.0);

        assert_eq!(clock.advance(t0), 5.0);
    }

    #[test]
    fn test_manual_time_source() {
        let t0 = Instant::now();
        let source = ManualTimeSource::new(t0);
        let shared = source.clone();

        shared.advance(ms(250));

        assert_eq!(source.now(), t0 + ms(250));
    }
}
