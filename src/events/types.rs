//! System event types
//!
//! Defines all event types that can be broadcast through the event bus.

use serde::{Deserialize, Serialize};

use crate::playback::PlaybackState;

/// System event enumeration
///
/// All events are tagged with their event name for serialization.
/// The `serde(tag = "event", content = "data")` attribute creates a
/// JSON structure like:
/// ```json
/// {
///   "event": "playback.state_changed",
///   "data": { "state": { "state": "buffering" }, "uri": "rtsp://cam/live" }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum SystemEvent {
    // ============================================================================
    // Playback Events
    // ============================================================================
    /// Playback state machine moved to a new state
    ///
    /// Published for every transition, including ones a UI snapshot
    /// subscriber would only see coalesced.
    #[serde(rename = "playback.state_changed")]
    PlaybackStateChanged {
        /// New state
        state: PlaybackState,
        /// URI loaded into the pipeline, if any
        uri: Option<String>,
    },

    /// Playback failed
    #[serde(rename = "playback.error")]
    PlaybackError {
        /// User-facing message
        message: String,
        /// Whether `reconnect()` can recover from it
        recoverable: bool,
        uri: Option<String>,
    },

    /// A reconnection attempt was scheduled
    #[serde(rename = "playback.reconnecting")]
    PlaybackReconnecting {
        uri: String,
        /// Attempt number, starting at 1
        attempt: u32,
        max_attempts: u32,
    },

    /// The supervisor shut down and released its pipeline
    #[serde(rename = "playback.stopped")]
    SupervisorStopped,

    // ============================================================================
    // Camera / Settings Events
    // ============================================================================
    /// A different stream was loaded into the pipeline
    #[serde(rename = "camera.selected")]
    CameraSelected {
        uri: String,
        /// Registry id of the camera owning `uri`, if it is registered
        camera_id: Option<String>,
    },

    /// Settings fields were written
    #[serde(rename = "settings.changed")]
    SettingsChanged {
        /// Storage keys that changed
        keys: Vec<String>,
    },

    // ============================================================================
    // Display Events
    // ============================================================================
    /// Display policy was applied to the backend
    #[serde(rename = "display.applied")]
    DisplayApplied {
        keep_screen_on: bool,
        /// Applied brightness, `None` for the system default
        brightness: Option<f32>,
        immersive: bool,
    },
}

impl SystemEvent {
    /// Get the event name (for filtering/routing)
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::PlaybackStateChanged { .. } => "playback.state_changed",
            Self::PlaybackError { .. } => "playback.error",
            Self::PlaybackReconnecting { .. } => "playback.reconnecting",
            Self::SupervisorStopped => "playback.stopped",
            Self::CameraSelected { .. } => "camera.selected",
            Self::SettingsChanged { .. } => "settings.changed",
            Self::DisplayApplied { .. } => "display.applied",
        }
    }
}
