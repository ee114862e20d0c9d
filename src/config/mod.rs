//! Persisted viewer settings
//!
//! Settings are stored one row per field and cached in memory. Every write
//! goes through [`SettingsStore`], which publishes a fresh snapshot to all
//! subscribers before the row is persisted.

mod editor;
mod schema;
mod store;

pub use schema::{
    keys, BrightnessMode, SettingField, Settings, RECONNECT_DELAY_MAX_MS, RECONNECT_DELAY_MIN_MS,
};
pub use store::{MemoryBackend, SettingsBackend, SettingsStore, SqliteBackend, WriteAck};
