//! Decides when the real element has to be moved to match the virtual position.
//!
//! Native playback is left alone while it stays inside a tolerance band
//! around the mapped position; corrections are only forced once the drift
//! would become perceptible. Correction seeks made during playback land
//! slightly ahead of the target to cover seek-to-present latency.

use serde::Serialize;
use std::time::{Duration, Instant};

use crate::core::{SyncConfig, VirtualSegment};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SeekReason {
    /// The active segment changed since the previous tick
    Transition,
    LargeDrift,
    Drift,
    /// Requested through the public surface (seek, play, attach)
    Explicit,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SyncAction {
    None,
    Seek { target: f64, reason: SeekReason },
    /// No active segment: the element must not keep playing
    PauseForGap,
    /// A segment reappeared after a gap while playing
    Resume { target: f64 },
}

/// Snapshot of everything one decision needs.
#[derive(Debug, Clone, Copy)]
pub struct SyncInput<'a> {
    pub virtual_time: f64,
    pub segment: Option<&'a VirtualSegment>,
    pub element_time: f64,
    pub element_paused: bool,
    pub is_playing: bool,
    pub playback_rate: f64,
    pub frame_interval: Duration,
    /// False after the element reported an error
    pub element_trusted: bool,
    pub now: Instant,
}

pub struct PositionSynchronizer {
    config: SyncConfig,
    previous_segment_id: Option<String>,
    last_seek_at: Option<Instant>,
    in_gap: bool,
}

impl PositionSynchronizer {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            previous_segment_id: None,
            last_seek_at: None,
            in_gap: false,
        }
    }

    /// Forgets the previous segment, so the next evaluation performs a transition seek.
    pub fn reset(&mut self) {
        self.previous_segment_id = None;
        self.last_seek_at = None;
        self.in_gap = false;
    }

    pub fn in_gap(&self) -> bool {
        self.in_gap
    }

    /// Records a seek made outside `evaluate` so the next tick does not repeat it.
    pub fn note_explicit_seek(&mut self, segment: Option<&VirtualSegment>, now: Instant) {
        match segment {
            Some(segment) => {
                self.remember_segment(segment);
                self.in_gap = false;
                self.last_seek_at = Some(now);
            }
            None => {
                self.previous_segment_id = None;
                self.in_gap = true;
            }
        }
    }

    pub fn evaluate(&mut self, input: &SyncInput<'_>) -> SyncAction {
        let Some(segment) = input.segment else {
            self.previous_segment_id = None;
            self.in_gap = true;
            return if input.element_paused {
                SyncAction::None
            } else {
                SyncAction::PauseForGap
            };
        };

        let was_in_gap = std::mem::replace(&mut self.in_gap, false);
        let changed = self.previous_segment_id.as_deref() != Some(segment.id.as_str());
        if changed {
            self.remember_segment(segment);
        }

        let target = segment.map_to_real(input.virtual_time);

        if was_in_gap && input.is_playing {
            self.last_seek_at = Some(input.now);
            return SyncAction::Resume {
                target: self.predicted_target(segment, target, input),
            };
        }

        if changed {
            self.last_seek_at = Some(input.now);
            return SyncAction::Seek {
                target: self.predicted_target(segment, target, input),
                reason: SeekReason::Transition,
            };
        }

        let drift = (input.element_time - target).abs();
        let natural = input.element_trusted
            && segment.contains_real(input.element_time)
            && drift <= self.config.tolerance;
        if natural {
            return SyncAction::None;
        }

        if drift > self.config.large_drift {
            self.last_seek_at = Some(input.now);
            return SyncAction::Seek {
                target: self.predicted_target(segment, target, input),
                reason: SeekReason::LargeDrift,
            };
        }

        let spaced = self.last_seek_at.map_or(true, |at| {
            input.now.saturating_duration_since(at) >= self.config.min_seek_interval()
        });
        if drift > self.config.min_drift && spaced {
            self.last_seek_at = Some(input.now);
            return SyncAction::Seek {
                target: self.predicted_target(segment, target, input),
                reason: SeekReason::Drift,
            };
        }

        SyncAction::None
    }

    /// Forward bias for seeks issued during playback, clamped into the segment's real window.
    pub fn predictive_offset(&self, segment: &VirtualSegment, playback_rate: f64, frame_interval: Duration) -> f64 {
        let latency = frame_interval.as_secs_f64() * self.config.seek_latency_frames;
        let cap = self
            .config
            .max_predictive_offset
            .min(segment.real_duration() * self.config.predictive_segment_fraction);
        (latency * playback_rate).clamp(0.0, cap.max(0.0))
    }

    fn predicted_target(&self, segment: &VirtualSegment, target: f64, input: &SyncInput<'_>) -> f64 {
        let offset = if input.is_playing {
            self.predictive_offset(segment, input.playback_rate, input.frame_interval)
        } else {
            0.0
        };
        clamp_into_real_window(segment, target + offset)
    }

    fn remember_segment(&mut self, segment: &VirtualSegment) {
        if self.previous_segment_id.as_deref() != Some(segment.id.as_str()) {
            self.previous_segment_id = Some(segment.id.clone());
        }
    }
}

/// Keeps a seek target strictly inside `[real_start, real_end)`.
fn clamp_into_real_window(segment: &VirtualSegment, real_time: f64) -> f64 {
    const EDGE: f64 = 0.001;
    let upper = (segment.real_end_time - EDGE).max(segment.real_start_time);
    real_time.clamp(segment.real_start_time, upper)
}
