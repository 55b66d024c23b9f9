/// Errors reported by a media element through its own error channel.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MediaError {
    #[error("Playback aborted")]
    Aborted,
    #[error("Network error: {0}")]
    Network(String),
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Source not supported: {0}")]
    NotSupported(String),
    #[error("Play request not allowed: {0}")]
    NotAllowed(String),
}

/// Errors returned by the playback controller's public surface.
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("No video element attached")]
    NoVideoAttached,
    #[error("Invalid playback rate: {0}")]
    InvalidPlaybackRate(f64),
    #[error("Invalid time value: {0}")]
    InvalidTime(f64),
    #[error("Invalid segment {id}: {reason}")]
    InvalidSegment { id: String, reason: String },
}
