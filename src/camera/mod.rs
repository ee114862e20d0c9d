//! Camera configuration and the ordered camera registry
//!
//! A camera is a named RTSP source plus its per-camera display mode.
//! The registry is the ordered list of cameras together with a positional
//! "current" pointer; it lives inside the persisted settings and is only
//! ever mutated through the settings store.

pub mod registry;

pub use registry::CameraRegistry;

use serde::{Deserialize, Serialize};
use typeshare::typeshare;

/// Expected scheme for camera stream URLs
pub const RTSP_SCHEME: &str = "rtsp://";

/// How the video frame is fitted into the playback surface
#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    /// Letterbox, whole frame visible
    #[default]
    Fit,
    /// Stretch to the surface
    Fill,
    /// Scale to cover and crop the overflow
    Crop,
}

/// A single stream source
#[typeshare]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraConfig {
    /// Stable identity, generated once at creation
    #[serde(default)]
    pub id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Stream URI, normally `rtsp://...`
    #[serde(default)]
    pub url: String,
    /// Per-camera display mode
    #[serde(default)]
    pub display_mode: DisplayMode,
}

impl CameraConfig {
    /// Create a camera with a freshly generated id
    pub fn new(name: impl Into<String>, url: impl Into<String>, display_mode: DisplayMode) -> Self {
        Self {
            id: new_camera_id(),
            name: name.into(),
            url: url.into(),
            display_mode,
        }
    }

    /// Give a record stored without an id a fresh one.
    /// Returns true when an id was assigned.
    pub fn ensure_id(&mut self) -> bool {
        if !self.id.trim().is_empty() {
            return false;
        }
        self.id = new_camera_id();
        true
    }

    /// Whether the camera has anything to play
    pub fn has_stream(&self) -> bool {
        !self.url.trim().is_empty()
    }
}

fn new_camera_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Default name for a newly added camera, given how many already exist
pub fn default_camera_name(existing: usize) -> String {
    format!("Camera {}", existing + 1)
}

/// Light validation of a stream URL: scheme prefix plus something after it.
///
/// The URL is not parsed structurally; the player is the authority on
/// whether it can actually be opened.
pub fn is_valid_stream_url(url: &str) -> bool {
    let url = url.trim();
    url.len() > RTSP_SCHEME.len()
        && url
            .get(..RTSP_SCHEME.len())
            .is_some_and(|scheme| scheme.eq_ignore_ascii_case(RTSP_SCHEME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_camera_ids_are_unique() {
        let a = CameraConfig::new("A", "rtsp://a", DisplayMode::Fit);
        let b = CameraConfig::new("A", "rtsp://a", DisplayMode::Fit);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_default_camera_name() {
        assert_eq!(default_camera_name(0), "Camera 1");
        assert_eq!(default_camera_name(2), "Camera 3");
    }

    #[test]
    fn test_stream_url_validation() {
        assert!(is_valid_stream_url("rtsp://192.168.1.10:554/stream1"));
        assert!(is_valid_stream_url("  RTSP://host/s "));
        assert!(!is_valid_stream_url("rtsp://"));
        assert!(!is_valid_stream_url("http://host/s"));
        assert!(!is_valid_stream_url(""));
    }

    #[test]
    fn test_camera_json_shape() {
        let camera = CameraConfig {
            id: "cam-1".to_string(),
            name: "Door".to_string(),
            url: "rtsp://door/live".to_string(),
            display_mode: DisplayMode::Crop,
        };
        let json = serde_json::to_value(&camera).unwrap();
        assert_eq!(json["displayMode"], "crop");
        assert_eq!(json["url"], "rtsp://door/live");

        // Older records may lack an id or display mode
        let legacy: CameraConfig =
            serde_json::from_str(r#"{"name":"Old","url":"rtsp://old"}"#).unwrap();
        assert!(legacy.id.is_empty());
        assert_eq!(legacy.display_mode, DisplayMode::Fit);
    }

    #[test]
    fn test_ensure_id() {
        let mut camera: CameraConfig =
            serde_json::from_str(r#"{"name":"Old","url":"rtsp://old"}"#).unwrap();
        assert!(camera.ensure_id());
        let id = camera.id.clone();
        assert!(!id.is_empty());
        assert!(!camera.ensure_id());
        assert_eq!(camera.id, id);
    }
}
