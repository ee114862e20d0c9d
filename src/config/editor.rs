//! Settings-screen operations on top of the raw field writes

use super::{BrightnessMode, SettingField, Settings, SettingsStore, WriteAck};
use crate::camera::{default_camera_name, is_valid_stream_url, CameraConfig, RTSP_SCHEME};
use crate::error::{AppError, Result};

impl SettingsStore {
    /// Add a camera at the end of the list.
    ///
    /// A missing or blank name becomes "Camera N". The display mode defaults
    /// to the legacy global mode.
    pub fn add_camera(&self, name: Option<&str>, url: &str) -> Result<(CameraConfig, WriteAck)> {
        let url = url.trim();
        if !is_valid_stream_url(url) {
            return Err(AppError::BadRequest(format!(
                "stream URL must start with {} and name a host: {}",
                RTSP_SCHEME, url
            )));
        }

        let settings = self.get();
        let mut registry = settings.registry();
        let name = match name.map(str::trim) {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => default_camera_name(registry.len()),
        };
        let camera = CameraConfig::new(name, url, settings.video_display_mode);
        registry.add(camera.clone());

        let ack = self.write_fields(Settings::registry_fields(registry).to_vec());
        Ok((camera, ack))
    }

    /// Remove a camera, repairing the current index
    pub fn remove_camera(&self, id: &str) -> Result<(CameraConfig, WriteAck)> {
        let mut registry = self.get().registry();
        let removed = registry
            .remove(id)
            .ok_or_else(|| AppError::NotFound(format!("camera {}", id)))?;

        let ack = self.write_fields(Settings::registry_fields(registry).to_vec());
        Ok((removed, ack))
    }

    /// Replace a camera's name, URL, or display mode
    pub fn update_camera(&self, camera: CameraConfig) -> Result<WriteAck> {
        if !camera.url.trim().is_empty() && !is_valid_stream_url(&camera.url) {
            return Err(AppError::BadRequest(format!(
                "stream URL must start with {}: {}",
                RTSP_SCHEME, camera.url
            )));
        }

        let mut registry = self.get().registry();
        let id = camera.id.clone();
        if !registry.update(camera) {
            return Err(AppError::NotFound(format!("camera {}", id)));
        }

        let (cameras, _) = registry.into_parts();
        Ok(self.write_field(SettingField::Cameras(cameras)))
    }

    /// Make the camera at `index` current
    pub fn select_camera_index(&self, index: usize) -> Result<WriteAck> {
        let mut registry = self.get().registry();
        if !registry.select(index) {
            return Err(AppError::BadRequest(format!(
                "camera index {} out of range (0..{})",
                index,
                registry.len()
            )));
        }
        Ok(self.write_field(SettingField::CurrentCameraIndex(index as u32)))
    }

    pub fn set_muted(&self, muted: bool) -> WriteAck {
        self.write_field(SettingField::Muted(muted))
    }

    pub fn set_allow_screen_off(&self, allow: bool) -> WriteAck {
        self.write_field(SettingField::AllowScreenOff(allow))
    }

    /// Set the brightness policy; `custom` is only stored when given
    pub fn set_brightness(&self, mode: BrightnessMode, custom: Option<f32>) -> WriteAck {
        let mut fields = vec![SettingField::BrightnessMode(mode)];
        if let Some(level) = custom {
            fields.push(SettingField::CustomBrightness(level.clamp(0.0, 1.0)));
        }
        self.write_fields(fields)
    }

    pub fn set_auto_reconnect(&self, enabled: bool) -> WriteAck {
        self.write_field(SettingField::AutoReconnect(enabled))
    }

    /// Any non-negative delay is accepted; 0 means retry immediately
    pub fn set_reconnect_delay_ms(&self, delay_ms: u32) -> WriteAck {
        self.write_field(SettingField::ReconnectDelayMs(delay_ms))
    }
}
