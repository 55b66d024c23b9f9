use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::error::PlaybackError;

/// A contiguous mapping from a virtual-time range to a real (media) time range.
///
/// The virtual interval is start-inclusive and end-exclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualSegment {
    pub id: String,
    pub virtual_start_time: f64,
    pub virtual_end_time: f64,
    pub real_start_time: f64,
    pub real_end_time: f64,
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl VirtualSegment {
    pub fn new(virtual_start: f64, virtual_end: f64, real_start: f64, real_end: f64) -> Self {
        Self::with_id(
            uuid::Uuid::new_v4().to_string(),
            virtual_start,
            virtual_end,
            real_start,
            real_end,
        )
    }

    pub fn with_id(
        id: impl Into<String>,
        virtual_start: f64,
        virtual_end: f64,
        real_start: f64,
        real_end: f64,
    ) -> Self {
        Self {
            id: id.into(),
            virtual_start_time: virtual_start,
            virtual_end_time: virtual_end,
            real_start_time: real_start,
            real_end_time: real_end,
            is_enabled: true,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.is_enabled = false;
        self
    }

    pub fn validate(&self) -> Result<(), PlaybackError> {
        let bounds = [
            self.virtual_start_time,
            self.virtual_end_time,
            self.real_start_time,
            self.real_end_time,
        ];
        if bounds.iter().any(|v| !v.is_finite()) {
            return Err(self.invalid("non-finite bound"));
        }
        if self.virtual_end_time <= self.virtual_start_time {
            return Err(self.invalid("virtual end must be after virtual start"));
        }
        if self.real_end_time < self.real_start_time {
            return Err(self.invalid("real end precedes real start"));
        }
        if self.virtual_start_time < 0.0 || self.real_start_time < 0.0 {
            return Err(self.invalid("negative start time"));
        }
        Ok(())
    }

    fn invalid(&self, reason: &str) -> PlaybackError {
        PlaybackError::InvalidSegment {
            id: self.id.clone(),
            reason: reason.to_string(),
        }
    }

    pub fn virtual_duration(&self) -> f64 {
        self.virtual_end_time - self.virtual_start_time
    }

    pub fn real_duration(&self) -> f64 {
        self.real_end_time - self.real_start_time
    }

    pub fn contains_virtual(&self, virtual_time: f64) -> bool {
        virtual_time >= self.virtual_start_time && virtual_time < self.virtual_end_time
    }

    pub fn contains_real(&self, real_time: f64) -> bool {
        real_time >= self.real_start_time && real_time < self.real_end_time
    }

    /// Linear interpolation of a virtual time into this segment's real window.
    pub fn map_to_real(&self, virtual_time: f64) -> f64 {
        let span = self.virtual_duration();
        if span <= 0.0 {
            return self.real_start_time;
        }
        let progress = ((virtual_time - self.virtual_start_time) / span).clamp(0.0, 1.0);
        self.real_start_time + self.real_duration() * progress
    }

    pub fn map_to_virtual(&self, real_time: f64) -> f64 {
        let span = self.real_duration();
        if span <= 0.0 {
            return self.virtual_start_time;
        }
        let progress = ((real_time - self.real_start_time) / span).clamp(0.0, 1.0);
        self.virtual_start_time + self.virtual_duration() * progress
    }
}

/// Ordered segment collection handed to the engine by the timeline editor.
///
/// `version` and `last_updated` mark changes; derived caches are keyed on
/// `version`, so editors must bump it on every edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualTimeline {
    pub segments: Vec<VirtualSegment>,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub version: u64,
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
}

impl Default for VirtualTimeline {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl VirtualTimeline {
    pub fn new(segments: Vec<VirtualSegment>) -> Self {
        Self::with_version(segments, 1)
    }

    pub fn with_version(segments: Vec<VirtualSegment>, version: u64) -> Self {
        let duration = Self::compute_duration(&segments);
        Self {
            segments,
            duration,
            version,
            last_updated: Utc::now(),
        }
    }

    /// Builds the successor of this timeline with a bumped version.
    pub fn edited(&self, segments: Vec<VirtualSegment>) -> Self {
        Self::with_version(segments, self.version.wrapping_add(1))
    }

    pub fn compute_duration(segments: &[VirtualSegment]) -> f64 {
        segments
            .iter()
            .filter(|s| s.is_enabled)
            .map(|s| s.virtual_end_time)
            .fold(0.0, f64::max)
    }

    /// Recomputes `duration` from the segments, e.g. after deserializing
    /// a file whose stored duration may be stale.
    pub fn normalized(mut self) -> Self {
        self.duration = Self::compute_duration(&self.segments);
        self
    }

    pub fn enabled_segments(&self) -> impl Iterator<Item = &VirtualSegment> {
        self.segments.iter().filter(|s| s.is_enabled)
    }

    pub fn validate(&self) -> Result<(), PlaybackError> {
        self.segments.iter().try_for_each(VirtualSegment::validate)
    }

    pub fn is_empty(&self) -> bool {
        self.enabled_segments().next().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_creation_assigns_unique_ids() {
        let a = VirtualSegment::new(0.0, 2.0, 5.0, 7.0);
        let b = VirtualSegment::new(0.0, 2.0, 5.0, 7.0);

        assert_ne!(a.id, b.id);
        assert!(a.is_enabled);
        assert_eq!(a.virtual_duration(), 2.0);
        assert_eq!(a.real_duration(), 2.0);
    }

    #[test]
    fn test_virtual_interval_is_half_open() {
        let segment = VirtualSegment::with_id("a", 2.0, 5.0, 10.0, 13.0);

        assert!(segment.contains_virtual(2.0));
        assert!(segment.contains_virtual(4.999));
        assert!(!segment.contains_virtual(5.0));
        assert!(!segment.contains_virtual(1.999));
    }

    #[test]
    fn test_mapping_between_axes() {
        let segment = VirtualSegment::with_id("a", 2.0, 5.0, 10.0, 13.0);

        assert!((segment.map_to_real(3.5) - 11.5).abs() < 1e-9);
        assert!((segment.map_to_virtual(11.5) - 3.5).abs() < 1e-9);

        // Out-of-range inputs clamp to the segment edges
        assert_eq!(segment.map_to_real(100.0), 13.0);
        assert_eq!(segment.map_to_real(-1.0), 10.0);
    }

    #[test]
    fn test_mapping_with_speed_change() {
        // Two virtual seconds covering four real seconds
        let segment = VirtualSegment::with_id("fast", 0.0, 2.0, 10.0, 14.0);

        assert!((segment.map_to_real(1.0) - 12.0).abs() < 1e-9);
        assert!((segment.map_to_virtual(13.0) - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_segment_validation() {
        assert!(VirtualSegment::with_id("ok", 0.0, 1.0, 0.0, 1.0).validate().is_ok());

        let inverted = VirtualSegment::with_id("bad", 2.0, 1.0, 0.0, 1.0);
        match inverted.validate() {
            Err(PlaybackError::InvalidSegment { id, .. }) => assert_eq!(id, "bad"),
            other => panic!("Unexpected validation result: {:?}", other),
        }

        let nan = VirtualSegment::with_id("nan", 0.0, f64::NAN, 0.0, 1.0);
        assert!(nan.validate().is_err());
    }

    #[test]
    fn test_timeline_duration_ignores_disabled_segments() {
        let timeline = VirtualTimeline::new(vec![
            VirtualSegment::with_id("a", 0.0, 2.0, 0.0, 2.0),
            VirtualSegment::with_id("b", 2.0, 9.0, 4.0, 11.0).disabled(),
            VirtualSegment::with_id("c", 2.0, 5.0, 20.0, 23.0),
        ]);

        assert_eq!(timeline.duration, 5.0);
        assert_eq!(timeline.enabled_segments().count(), 2);
        assert!(!timeline.is_empty());
    }

    #[test]
    fn test_edited_timeline_bumps_version() {
        let timeline = VirtualTimeline::new(vec![VirtualSegment::with_id("a", 0.0, 2.0, 0.0, 2.0)]);
        let edited = timeline.edited(vec![VirtualSegment::with_id("a", 0.0, 1.0, 0.0, 1.0)]);

        assert_eq!(edited.version, timeline.version + 1);
        assert_eq!(edited.duration, 1.0);
    }

    #[test]
    fn test_timeline_deserialization_with_missing_fields() {
        let json = r#"{
            "segments": [
                { "id": "a", "virtual_start_time": 0.0, "virtual_end_time": 2.0,
                  "real_start_time": 5.0, "real_end_time": 7.0 }
            ]
        }"#;

        let timeline: VirtualTimeline = serde_json::from_str(json).expect("Failed to parse timeline");
        let timeline = timeline.normalized();

        assert!(timeline.segments[0].is_enabled);
        assert_eq!(timeline.duration, 2.0);
        assert_eq!(timeline.version, 0);
    }
}
