use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
    Paused,
    /// Virtual time reached the timeline's duration while playing
    Ended,
}

impl PlaybackState {
    pub fn can_play(&self) -> bool {
        !matches!(self, PlaybackState::Playing)
    }

    pub fn can_pause(&self) -> bool {
        matches!(self, PlaybackState::Playing)
    }

    pub fn is_playing(&self) -> bool {
        matches!(self, PlaybackState::Playing)
    }

    /// Playing from here restarts at the beginning of the timeline.
    pub fn restarts_on_play(&self) -> bool {
        matches!(self, PlaybackState::Ended)
    }

    pub fn display_text(&self) -> &str {
        match self {
            PlaybackState::Stopped => "Stopped",
            PlaybackState::Playing => "Playing",
            PlaybackState::Paused => "Paused",
            PlaybackState::Ended => "Ended",
        }
    }
}
