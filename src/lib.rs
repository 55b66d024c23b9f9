//! Keeps a media element, a virtual playback clock and a caption renderer in
//! step while playing an edited (virtual) timeline over unedited source media.

pub mod core;
pub mod playback;
pub mod video;

pub use crate::core::{EngineConfig, MediaError, PlaybackError, VirtualSegment, VirtualTimeline};
pub use crate::playback::{PlaybackController, PlaybackEvent, PlaybackState, SyncStats};
pub use crate::video::{MediaElement, MediaEvent};
