//! Published playback state

use serde::{Deserialize, Serialize};
use typeshare::typeshare;

use super::player::PlayerErrorCode;

/// Reconnection attempts before the automatic loop gives up
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Surfaced when there is no camera (or a blank URI) to play
pub const NO_STREAM_CONFIGURED: &str = "No stream configured";

/// Surfaced once the automatic reconnection loop gives up
pub const MAX_ATTEMPTS_REACHED: &str = "Max reconnection attempts reached";

/// Playback state machine state
#[typeshare]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum PlaybackState {
    /// Nothing playing
    #[default]
    Idle,
    /// Source loaded, waiting for the pipeline to become ready
    Buffering,
    Playing,
    Paused,
    /// Playback failed
    Error {
        message: String,
        /// Whether `reconnect()` may recover from it
        recoverable: bool,
    },
    /// Waiting before reconnection attempt `attempt`
    Reconnecting { attempt: u32 },
}

impl PlaybackState {
    /// Whether a stream is loaded and wanted: buffering, playing or paused
    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Buffering | Self::Playing | Self::Paused)
    }

    /// Whether the playback surface is in use, reconnect waits included
    pub fn is_active(&self) -> bool {
        self.is_loaded() || matches!(self, Self::Reconnecting { .. })
    }

    /// Short lowercase name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Buffering => "buffering",
            Self::Playing => "playing",
            Self::Paused => "paused",
            Self::Error { .. } => "error",
            Self::Reconnecting { .. } => "reconnecting",
        }
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error { message, .. } => write!(f, "error: {}", message),
            Self::Reconnecting { attempt } => {
                write!(f, "reconnecting ({}/{})", attempt, MAX_RECONNECT_ATTEMPTS)
            }
            other => f.write_str(other.name()),
        }
    }
}

/// Snapshot rendered by the presentation layer
#[typeshare]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiState {
    pub playback: PlaybackState,
    /// URI loaded into the pipeline
    pub uri: Option<String>,
    pub controls_visible: bool,
    /// Mirrors the player volume
    pub is_muted: bool,
    /// Last error message, kept until cleared
    pub error: Option<String>,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            playback: PlaybackState::Idle,
            uri: None,
            controls_visible: true,
            is_muted: false,
            error: None,
        }
    }
}

/// User-facing text for a pipeline error
pub fn describe_error(code: PlayerErrorCode, raw: Option<&str>) -> String {
    match code {
        PlayerErrorCode::NetworkConnectionFailed => "Network connection failed".to_string(),
        PlayerErrorCode::Timeout => "Connection timeout".to_string(),
        PlayerErrorCode::UnsupportedContainer => "Unsupported stream format".to_string(),
        PlayerErrorCode::Other => match raw.map(str::trim) {
            Some(msg) if !msg.is_empty() => msg.to_string(),
            _ => "Playback error".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_error() {
        assert_eq!(
            describe_error(PlayerErrorCode::NetworkConnectionFailed, Some("ECONNREFUSED")),
            "Network connection failed"
        );
        assert_eq!(
            describe_error(PlayerErrorCode::Timeout, None),
            "Connection timeout"
        );
        assert_eq!(
            describe_error(PlayerErrorCode::UnsupportedContainer, None),
            "Unsupported stream format"
        );
        assert_eq!(
            describe_error(PlayerErrorCode::Other, Some("decoder init failed")),
            "decoder init failed"
        );
        assert_eq!(describe_error(PlayerErrorCode::Other, Some(" ")), "Playback error");
        assert_eq!(describe_error(PlayerErrorCode::Other, None), "Playback error");
    }

    #[test]
    fn test_state_predicates() {
        assert!(PlaybackState::Paused.is_loaded());
        assert!(!PlaybackState::Reconnecting { attempt: 1 }.is_loaded());
        assert!(PlaybackState::Reconnecting { attempt: 1 }.is_active());
        assert!(!PlaybackState::Idle.is_active());
        assert!(!PlaybackState::Error {
            message: "x".into(),
            recoverable: true
        }
        .is_active());
    }

    #[test]
    fn test_state_json_shape() {
        let json = serde_json::to_value(PlaybackState::Reconnecting { attempt: 2 }).unwrap();
        assert_eq!(json["state"], "reconnecting");
        assert_eq!(json["detail"]["attempt"], 2);

        let json = serde_json::to_value(PlaybackState::Idle).unwrap();
        assert_eq!(json["state"], "idle");
    }

    #[test]
    fn test_ui_defaults() {
        let ui = UiState::default();
        assert!(ui.controls_visible);
        assert_eq!(ui.playback, PlaybackState::Idle);
        assert!(ui.error.is_none());
    }
}
