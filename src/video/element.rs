use std::time::Instant;
use tokio::sync::oneshot;

use crate::core::MediaError;

/// Outcome of a native play request. Resolved by the element whenever the
/// runtime decides (autoplay policy, buffering); the engine only observes it.
pub type PlayRequest = oneshot::Receiver<Result<(), MediaError>>;

/// Handle of a registered per-decoded-frame callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackHandle(pub u64);

/// Identifies one attachment of an element to a controller. Events tagged
/// with an older attachment are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttachmentId(pub u64);

/// Per-frame metadata, either delivered natively by the element or
/// synthesized by the timer fallback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameMetadata {
    pub expected_display_time: Instant,
    pub width: u32,
    pub height: u32,
    pub media_time: f64,
    pub presented_frames: u64,
}

/// Events the host forwards from the element's own channels.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    /// The element finished a seek, e.g. after the user dragged a native scrubber
    Seeked { real_time: f64 },
    Error(MediaError),
    /// The element recovered from a previously reported error
    Recovered,
}

/// The real media element the engine keeps in sync. Construction and
/// decoding belong to the host.
pub trait MediaElement {
    fn current_time(&self) -> f64;

    fn set_current_time(&mut self, real_time: f64);

    fn is_paused(&self) -> bool;

    fn play(&mut self) -> PlayRequest;

    fn pause(&mut self);

    fn set_playback_rate(&mut self, rate: f64);

    fn video_size(&self) -> (u32, u32);

    fn error(&self) -> Option<MediaError> {
        None
    }

    fn supports_frame_callbacks(&self) -> bool {
        false
    }

    fn request_video_frame_callback(&mut self) -> Option<CallbackHandle> {
        None
    }

    fn cancel_video_frame_callback(&mut self, _handle: CallbackHandle) {}
}

/// Builds a play request that is already resolved, for elements whose play
/// call completes synchronously.
pub fn resolved_play_request(result: Result<(), MediaError>) -> PlayRequest {
    let (tx, rx) = oneshot::channel();
    let _ = tx.send(result);
    rx
}
