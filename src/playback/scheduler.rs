use serde::Serialize;
use std::collections::VecDeque;
use std::time::Instant;

use crate::core::ThrottleConfig;
use crate::video::{CallbackHandle, FrameMetadata, MediaElement};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DriverKind {
    /// Native per-decoded-frame callback of the element
    VideoFrameCallback,
    /// Generic per-display-frame timer with synthesized metadata
    AnimationFrame,
}

/// Strategy that keeps the host calling back once per frame.
pub trait FrameDriver {
    fn kind(&self) -> DriverKind;

    fn schedule(&mut self, element: &mut dyn MediaElement);

    fn cancel(&mut self, element: &mut dyn MediaElement);

    /// Called when a frame callback fires; returns the metadata downstream code sees.
    fn frame_metadata(
        &mut self,
        now: Instant,
        element: &dyn MediaElement,
        native: Option<FrameMetadata>,
    ) -> FrameMetadata;
}

fn synthesize_metadata(now: Instant, element: &dyn MediaElement, presented_frames: u64) -> FrameMetadata {
    let (width, height) = element.video_size();
    FrameMetadata {
        expected_display_time: now,
        width,
        height,
        media_time: element.current_time(),
        presented_frames,
    }
}

#[derive(Debug, Default)]
pub struct VideoFrameCallbackDriver {
    handle: Option<CallbackHandle>,
    frames_seen: u64,
}

impl FrameDriver for VideoFrameCallbackDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::VideoFrameCallback
    }

    fn schedule(&mut self, element: &mut dyn MediaElement) {
        if self.handle.is_none() {
            self.handle = element.request_video_frame_callback();
        }
    }

    fn cancel(&mut self, element: &mut dyn MediaElement) {
        if let Some(handle) = self.handle.take() {
            element.cancel_video_frame_callback(handle);
        }
    }

    fn frame_metadata(
        &mut self,
        now: Instant,
        element: &dyn MediaElement,
        native: Option<FrameMetadata>,
    ) -> FrameMetadata {
        // The registration is one-shot
        self.handle = None;
        self.frames_seen += 1;
        native.unwrap_or_else(|| synthesize_metadata(now, element, self.frames_seen))
    }
}

#[derive(Debug, Default)]
pub struct AnimationFrameDriver {
    pending: bool,
    frame_count: u64,
}

impl FrameDriver for AnimationFrameDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::AnimationFrame
    }

    fn schedule(&mut self, _element: &mut dyn MediaElement) {
        self.pending = true;
    }

    fn cancel(&mut self, _element: &mut dyn MediaElement) {
        self.pending = false;
    }

    fn frame_metadata(
        &mut self,
        now: Instant,
        element: &dyn MediaElement,
        _native: Option<FrameMetadata>,
    ) -> FrameMetadata {
        self.pending = false;
        self.frame_count += 1;
        synthesize_metadata(now, element, self.frame_count)
    }
}

/// Adaptive debounce window between processed frames.
///
/// Tracks the interval between every frame callback. Every evaluation period
/// the rolling average is compared to the current window: a slow host widens
/// the window (up to the maximum), a fast one narrows it back towards the base.
/// A streak of very slow frames widens it immediately.
#[derive(Debug, Clone)]
pub struct AdaptiveThrottle {
    config: ThrottleConfig,
    debounce_ms: f64,
    intervals: VecDeque<f64>,
    last_frame: Option<Instant>,
    last_accepted: Option<Instant>,
    last_evaluation: Option<Instant>,
    slow_streak: u32,
}

impl AdaptiveThrottle {
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            debounce_ms: config.base_interval_ms,
            intervals: VecDeque::with_capacity(config.sample_window),
            last_frame: None,
            last_accepted: None,
            last_evaluation: None,
            slow_streak: 0,
            config,
        }
    }

    pub fn debounce_ms(&self) -> f64 {
        self.debounce_ms
    }

    /// Records a frame callback and reports whether it should be processed.
    pub fn on_frame(&mut self, now: Instant) -> bool {
        if let Some(previous) = self.last_frame {
            let interval = now.saturating_duration_since(previous).as_secs_f64() * 1000.0;
            self.record_interval(interval);
        }
        self.last_frame = Some(now);

        match self.last_evaluation {
            None => self.last_evaluation = Some(now),
            Some(at) => {
                let since = now.saturating_duration_since(at).as_secs_f64() * 1000.0;
                if since >= self.config.evaluation_period_ms {
                    self.evaluate();
                    self.last_evaluation = Some(now);
                }
            }
        }

        let accept = self.last_accepted.map_or(true, |at| {
            now.saturating_duration_since(at).as_secs_f64() * 1000.0 >= self.debounce_ms
        });
        if accept {
            self.last_accepted = Some(now);
        }
        accept
    }

    /// Forgets timing history, e.g. after the loop was stopped.
    pub fn reset(&mut self) {
        self.intervals.clear();
        self.last_frame = None;
        self.last_accepted = None;
        self.last_evaluation = None;
        self.slow_streak = 0;
    }

    fn record_interval(&mut self, interval_ms: f64) {
        if self.intervals.len() == self.config.sample_window {
            self.intervals.pop_front();
        }
        self.intervals.push_back(interval_ms);

        if interval_ms > self.debounce_ms * self.config.spike_factor {
            self.slow_streak += 1;
            if self.slow_streak >= self.config.spike_frames {
                log::debug!("Throttle: {} consecutive slow frames, widening window", self.slow_streak);
                self.increase();
                self.slow_streak = 0;
            }
        } else {
            self.slow_streak = 0;
        }
    }

    fn evaluate(&mut self) {
        if self.intervals.is_empty() {
            return;
        }
        let average = self.intervals.iter().sum::<f64>() / self.intervals.len() as f64;
        let ratio = average / self.debounce_ms;

        if ratio > self.config.slow_ratio {
            self.increase();
        } else if ratio < self.config.fast_ratio && average < self.config.base_interval_ms {
            self.decrease();
        }
        log::trace!("Throttle: avg {:.1}ms, ratio {:.2}, window {:.1}ms", average, ratio, self.debounce_ms);
    }

    fn increase(&mut self) {
        let next = (self.debounce_ms + self.config.step_ms).min(self.config.max_interval_ms);
        if next != self.debounce_ms {
            log::debug!("Throttle: window {:.1}ms -> {:.1}ms", self.debounce_ms, next);
            self.debounce_ms = next;
        }
    }

    fn decrease(&mut self) {
        let next = (self.debounce_ms - self.config.step_ms).max(self.config.base_interval_ms);
        if next != self.debounce_ms {
            log::debug!("Throttle: window {:.1}ms -> {:.1}ms", self.debounce_ms, next);
            self.debounce_ms = next;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameDecision {
    /// The loop is stopped; the callback is a straggler
    Inactive,
    Throttled,
    Accepted(FrameMetadata),
}

/// Drives the synchronization loop through a `FrameDriver` chosen at attach time.
pub struct FrameScheduler {
    driver: Box<dyn FrameDriver>,
    throttle: AdaptiveThrottle,
    active: bool,
}

impl FrameScheduler {
    pub fn new(driver: Box<dyn FrameDriver>, config: ThrottleConfig) -> Self {
        Self {
            driver,
            throttle: AdaptiveThrottle::new(config),
            active: false,
        }
    }

    /// Prefers the element's native frame callback, falling back to the timer driver.
    pub fn for_element(element: &dyn MediaElement, config: ThrottleConfig) -> Self {
        let driver: Box<dyn FrameDriver> = if element.supports_frame_callbacks() {
            Box::new(VideoFrameCallbackDriver::default())
        } else {
            Box::new(AnimationFrameDriver::default())
        };
        Self::new(driver, config)
    }

    pub fn kind(&self) -> DriverKind {
        self.driver.kind()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn throttle(&self) -> &AdaptiveThrottle {
        &self.throttle
    }

    pub fn start(&mut self, element: &mut dyn MediaElement) {
        if self.active {
            return;
        }
        self.active = true;
        self.throttle.reset();
        self.driver.schedule(element);
    }

    pub fn stop(&mut self, element: &mut dyn MediaElement) {
        self.active = false;
        self.driver.cancel(element);
    }

    pub fn begin_frame(
        &mut self,
        now: Instant,
        element: &dyn MediaElement,
        native: Option<FrameMetadata>,
    ) -> FrameDecision {
        if !self.active {
            return FrameDecision::Inactive;
        }
        let metadata = self.driver.frame_metadata(now, element, native);
        if self.throttle.on_frame(now) {
            FrameDecision::Accepted(metadata)
        } else {
            FrameDecision::Throttled
        }
    }

    /// Re-arms the driver for the next frame while the loop is running.
    pub fn end_frame(&mut self, element: &mut dyn MediaElement) {
        if self.active {
            self.driver.schedule(element);
        }
    }
}
