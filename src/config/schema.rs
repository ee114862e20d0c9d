use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;
use typeshare::typeshare;

use crate::camera::{CameraConfig, CameraRegistry, DisplayMode};
use crate::error::Result;

/// Lower bound of the reconnect delay offered by the settings UI
pub const RECONNECT_DELAY_MIN_MS: u32 = 1_000;
/// Upper bound of the reconnect delay offered by the settings UI
pub const RECONNECT_DELAY_MAX_MS: u32 = 10_000;

/// Screen brightness policy while the viewer is in front
#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BrightnessMode {
    /// Leave brightness to the system
    #[default]
    Auto,
    /// Dim as far as the display allows
    Minimum,
    /// Use `custom_brightness`
    Custom,
}

/// Persisted viewer settings
///
/// The camera registry is stored flat (`cameras` + `current_camera_index`);
/// use [`Settings::registry`] to work with it.
#[typeshare]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Configured cameras, in user-visible order
    pub cameras: Vec<CameraConfig>,
    /// Positional index of the current camera
    pub current_camera_index: u32,
    /// Global mute flag
    pub is_muted: bool,
    /// Whether the screen may turn off while viewing
    pub allow_screen_off: bool,
    /// Brightness policy
    pub brightness_mode: BrightnessMode,
    /// Brightness used by `BrightnessMode::Custom` (0.0 - 1.0)
    pub custom_brightness: f32,
    /// Legacy global display mode, now only the default for new cameras
    pub video_display_mode: DisplayMode,
    /// Retry automatically after recoverable playback errors
    pub auto_reconnect: bool,
    /// Delay between reconnection attempts, 0 retries immediately
    pub reconnect_delay_ms: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cameras: Vec::new(),
            current_camera_index: 0,
            is_muted: false,
            allow_screen_off: true,
            brightness_mode: BrightnessMode::Auto,
            custom_brightness: 0.5,
            video_display_mode: DisplayMode::Fit,
            auto_reconnect: true,
            reconnect_delay_ms: 3_000,
        }
    }
}

/// Storage keys, one row per field
pub mod keys {
    pub const CAMERAS: &str = "cameras";
    pub const CURRENT_CAMERA_INDEX: &str = "current_camera_index";
    pub const IS_MUTED: &str = "is_muted";
    pub const ALLOW_SCREEN_OFF: &str = "allow_screen_off";
    pub const BRIGHTNESS_MODE: &str = "brightness_mode";
    pub const CUSTOM_BRIGHTNESS: &str = "custom_brightness";
    pub const VIDEO_DISPLAY_MODE: &str = "video_display_mode";
    pub const AUTO_RECONNECT: &str = "auto_reconnect";
    pub const RECONNECT_DELAY_MS: &str = "reconnect_delay_ms";
    /// Single-camera URL written by old versions
    pub const LEGACY_RTSP_URL: &str = "rtsp_url";
}

impl Settings {
    /// Camera registry view of the stored list and index
    pub fn registry(&self) -> CameraRegistry {
        CameraRegistry::new(self.cameras.clone(), self.current_camera_index as usize)
    }

    /// URL of the current camera, if any
    pub fn current_url(&self) -> Option<&str> {
        if self.cameras.is_empty() {
            return None;
        }
        let index = (self.current_camera_index as usize).min(self.cameras.len() - 1);
        Some(self.cameras[index].url.as_str())
    }

    /// Fields that store `registry` back into the settings
    pub fn registry_fields(registry: CameraRegistry) -> [SettingField; 2] {
        let (cameras, current) = registry.into_parts();
        [
            SettingField::Cameras(cameras),
            SettingField::CurrentCameraIndex(current as u32),
        ]
    }

    /// Decode stored rows.
    ///
    /// Returns the settings and whether the camera list had to be repaired
    /// (legacy single-URL record migrated, or cameras stored without an id)
    /// and should be written back. Malformed values fall back to defaults;
    /// a malformed camera list becomes an empty one.
    pub fn from_rows(rows: &HashMap<String, String>) -> (Self, bool) {
        let mut settings = Settings::default();

        if let Some(v) = decode(rows, keys::CURRENT_CAMERA_INDEX) {
            settings.current_camera_index = v;
        }
        if let Some(v) = decode(rows, keys::IS_MUTED) {
            settings.is_muted = v;
        }
        if let Some(v) = decode(rows, keys::ALLOW_SCREEN_OFF) {
            settings.allow_screen_off = v;
        }
        if let Some(v) = decode(rows, keys::BRIGHTNESS_MODE) {
            settings.brightness_mode = v;
        }
        if let Some(v) = decode::<f32>(rows, keys::CUSTOM_BRIGHTNESS) {
            settings.custom_brightness = v.clamp(0.0, 1.0);
        }
        if let Some(v) = decode(rows, keys::VIDEO_DISPLAY_MODE) {
            settings.video_display_mode = v;
        }
        if let Some(v) = decode(rows, keys::AUTO_RECONNECT) {
            settings.auto_reconnect = v;
        }
        if let Some(v) = decode(rows, keys::RECONNECT_DELAY_MS) {
            settings.reconnect_delay_ms = v;
        }

        let mut repaired = false;
        if rows.contains_key(keys::CAMERAS) {
            settings.cameras = decode(rows, keys::CAMERAS).unwrap_or_default();
            for camera in settings.cameras.iter_mut() {
                if camera.ensure_id() {
                    repaired = true;
                }
            }
        } else if let Some(url) = legacy_url(rows) {
            settings.cameras = vec![CameraConfig::new(
                "Camera 1",
                url,
                settings.video_display_mode,
            )];
            settings.current_camera_index = 0;
            repaired = true;
        }

        // Repair the index the same way the registry does
        let (_, current) = settings.registry().into_parts();
        settings.current_camera_index = current as u32;

        (settings, repaired)
    }

    /// Encode every field as storage rows
    pub fn to_rows(&self) -> Result<Vec<(String, String)>> {
        self.fields().iter().map(SettingField::to_row).collect()
    }

    /// Every field of these settings, as individual writes
    pub fn fields(&self) -> Vec<SettingField> {
        vec![
            SettingField::Cameras(self.cameras.clone()),
            SettingField::CurrentCameraIndex(self.current_camera_index),
            SettingField::Muted(self.is_muted),
            SettingField::AllowScreenOff(self.allow_screen_off),
            SettingField::BrightnessMode(self.brightness_mode),
            SettingField::CustomBrightness(self.custom_brightness),
            SettingField::VideoDisplayMode(self.video_display_mode),
            SettingField::AutoReconnect(self.auto_reconnect),
            SettingField::ReconnectDelayMs(self.reconnect_delay_ms),
        ]
    }
}

fn decode<T: DeserializeOwned>(rows: &HashMap<String, String>, key: &str) -> Option<T> {
    let raw = rows.get(key)?;
    match serde_json::from_str(raw) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(key, error = %e, "Ignoring malformed setting value");
            None
        }
    }
}

/// Legacy URL rows were written either raw or as a JSON string
fn legacy_url(rows: &HashMap<String, String>) -> Option<String> {
    let raw = rows.get(keys::LEGACY_RTSP_URL)?;
    let url = serde_json::from_str::<String>(raw).unwrap_or_else(|_| raw.clone());
    let url = url.trim();
    (!url.is_empty()).then(|| url.to_string())
}

/// A single-field settings write
#[derive(Debug, Clone, PartialEq)]
pub enum SettingField {
    Cameras(Vec<CameraConfig>),
    CurrentCameraIndex(u32),
    Muted(bool),
    AllowScreenOff(bool),
    BrightnessMode(BrightnessMode),
    CustomBrightness(f32),
    VideoDisplayMode(DisplayMode),
    AutoReconnect(bool),
    ReconnectDelayMs(u32),
}

impl SettingField {
    /// Storage key of this field
    pub fn key(&self) -> &'static str {
        match self {
            Self::Cameras(_) => keys::CAMERAS,
            Self::CurrentCameraIndex(_) => keys::CURRENT_CAMERA_INDEX,
            Self::Muted(_) => keys::IS_MUTED,
            Self::AllowScreenOff(_) => keys::ALLOW_SCREEN_OFF,
            Self::BrightnessMode(_) => keys::BRIGHTNESS_MODE,
            Self::CustomBrightness(_) => keys::CUSTOM_BRIGHTNESS,
            Self::VideoDisplayMode(_) => keys::VIDEO_DISPLAY_MODE,
            Self::AutoReconnect(_) => keys::AUTO_RECONNECT,
            Self::ReconnectDelayMs(_) => keys::RECONNECT_DELAY_MS,
        }
    }

    /// Encode as a `(key, json)` storage row
    pub fn to_row(&self) -> Result<(String, String)> {
        let value = match self {
            Self::Cameras(v) => serde_json::to_string(v)?,
            Self::CurrentCameraIndex(v) => serde_json::to_string(v)?,
            Self::Muted(v) | Self::AllowScreenOff(v) | Self::AutoReconnect(v) => {
                serde_json::to_string(v)?
            }
            Self::BrightnessMode(v) => serde_json::to_string(v)?,
            Self::CustomBrightness(v) => serde_json::to_string(v)?,
            Self::VideoDisplayMode(v) => serde_json::to_string(v)?,
            Self::ReconnectDelayMs(v) => serde_json::to_string(v)?,
        };
        Ok((self.key().to_string(), value))
    }

    /// Apply this write to an in-memory snapshot
    pub fn apply(&self, settings: &mut Settings) {
        match self {
            Self::Cameras(v) => settings.cameras = v.clone(),
            Self::CurrentCameraIndex(v) => settings.current_camera_index = *v,
            Self::Muted(v) => settings.is_muted = *v,
            Self::AllowScreenOff(v) => settings.allow_screen_off = *v,
            Self::BrightnessMode(v) => settings.brightness_mode = *v,
            Self::CustomBrightness(v) => settings.custom_brightness = v.clamp(0.0, 1.0),
            Self::VideoDisplayMode(v) => settings.video_display_mode = *v,
            Self::AutoReconnect(v) => settings.auto_reconnect = *v,
            Self::ReconnectDelayMs(v) => settings.reconnect_delay_ms = *v,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let (settings, migrated) = Settings::from_rows(&HashMap::new());
        assert!(!migrated);
        assert!(settings.cameras.is_empty());
        assert!(!settings.is_muted);
        assert!(settings.allow_screen_off);
        assert_eq!(settings.brightness_mode, BrightnessMode::Auto);
        assert!(settings.auto_reconnect);
        assert_eq!(settings.reconnect_delay_ms, 3000);
    }

    #[test]
    fn test_legacy_url_migration() {
        let (settings, migrated) = Settings::from_rows(&rows(&[(keys::LEGACY_RTSP_URL, "rtsp://host/s")]));
        assert!(migrated);
        assert_eq!(settings.cameras.len(), 1);
        assert_eq!(settings.cameras[0].name, "Camera 1");
        assert_eq!(settings.cameras[0].url, "rtsp://host/s");
        assert_eq!(settings.current_camera_index, 0);
        assert_eq!(settings.current_url(), Some("rtsp://host/s"));
    }

    #[test]
    fn test_blank_legacy_url_not_migrated() {
        let (settings, migrated) = Settings::from_rows(&rows(&[(keys::LEGACY_RTSP_URL, "  ")]));
        assert!(!migrated);
        assert!(settings.cameras.is_empty());
    }

    #[test]
    fn test_existing_camera_list_wins_over_legacy() {
        let (settings, migrated) = Settings::from_rows(&rows(&[
            (keys::CAMERAS, "[]"),
            (keys::LEGACY_RTSP_URL, "rtsp://host/s"),
        ]));
        assert!(!migrated);
        assert!(settings.cameras.is_empty());
    }

    #[test]
    fn test_malformed_camera_list_degrades_to_empty() {
        let (settings, _) = Settings::from_rows(&rows(&[
            (keys::CAMERAS, "{not json"),
            (keys::IS_MUTED, "true"),
        ]));
        assert!(settings.cameras.is_empty());
        assert!(settings.is_muted);
    }

    #[test]
    fn test_index_repaired_on_load() {
        let cameras = vec![
            CameraConfig::new("a", "rtsp://a", DisplayMode::Fit),
            CameraConfig::new("b", "rtsp://b", DisplayMode::Fit),
        ];
        let json = serde_json::to_string(&cameras).unwrap();
        let (settings, _) = Settings::from_rows(&rows(&[
            (keys::CAMERAS, json.as_str()),
            (keys::CURRENT_CAMERA_INDEX, "5"),
        ]));
        assert_eq!(settings.current_camera_index, 1);
    }

    #[test]
    fn test_missing_camera_ids_are_assigned() {
        let (settings, repaired) = Settings::from_rows(&rows(&[(
            keys::CAMERAS,
            r#"[{"name":"Old","url":"rtsp://old"},{"id":"cam-2","name":"New","url":"rtsp://new"}]"#,
        )]));
        assert!(repaired);
        assert!(!settings.cameras[0].id.is_empty());
        assert_eq!(settings.cameras[1].id, "cam-2");
    }

    #[test]
    fn test_rows_round_trip() {
        let mut settings = Settings::default();
        settings.cameras = vec![CameraConfig::new("Door", "rtsp://door", DisplayMode::Crop)];
        settings.is_muted = true;
        settings.brightness_mode = BrightnessMode::Custom;
        settings.custom_brightness = 0.25;
        settings.reconnect_delay_ms = 0;

        let stored: HashMap<String, String> = settings.to_rows().unwrap().into_iter().collect();
        let (loaded, migrated) = Settings::from_rows(&stored);
        assert!(!migrated);
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_field_apply_clamps_brightness() {
        let mut settings = Settings::default();
        SettingField::CustomBrightness(3.0).apply(&mut settings);
        assert_eq!(settings.custom_brightness, 1.0);
    }
}
