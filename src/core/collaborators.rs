use crate::core::segment::{VirtualSegment, VirtualTimeline};

/// Source of the current timeline. The editor owning the timeline also
/// pushes every edit into `PlaybackController::handle_timeline_update`.
pub trait TimelineProvider {
    fn timeline(&self) -> VirtualTimeline;
}

impl TimelineProvider for VirtualTimeline {
    fn timeline(&self) -> VirtualTimeline {
        self.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MappedTime {
    pub virtual_time: f64,
    pub is_valid: bool,
}

impl MappedTime {
    pub fn invalid() -> Self {
        Self {
            virtual_time: 0.0,
            is_valid: false,
        }
    }
}

/// Maps a real media position back onto the virtual axis. Only used to
/// reconcile seeks that originate from the element itself (native scrubber).
pub trait TimeMapper {
    fn to_virtual(&self, timeline: &VirtualTimeline, real_time: f64) -> MappedTime;
}

/// Default mapper: the first enabled segment (in virtual order) whose real
/// window contains the position wins. Positions inside cut regions are invalid.
#[derive(Debug, Default, Clone, Copy)]
pub struct SegmentTimeMapper;

impl TimeMapper for SegmentTimeMapper {
    fn to_virtual(&self, timeline: &VirtualTimeline, real_time: f64) -> MappedTime {
        if !real_time.is_finite() {
            return MappedTime::invalid();
        }

        timeline
            .enabled_segments()
            .filter(|s| s.contains_real(real_time))
            .min_by(|a, b| a.virtual_start_time.total_cmp(&b.virtual_start_time))
            .map(|segment: &VirtualSegment| MappedTime {
                virtual_time: segment.map_to_virtual(real_time),
                is_valid: true,
            })
            .unwrap_or_else(MappedTime::invalid)
    }
}

/// Caption/overlay renderer driven by the engine on every accepted tick.
/// Implementations must be idempotent and cheap.
pub trait CaptionRenderer {
    fn seek(&mut self, virtual_time: f64);
}

impl<F: FnMut(f64)> CaptionRenderer for F {
    fn seek(&mut self, virtual_time: f64) {
        self(virtual_time)
    }
}
