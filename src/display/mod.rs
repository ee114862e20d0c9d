//! Display and power policy
//!
//! Keeps the screen on, sets the backlight and toggles immersive mode as
//! the settings and the playback state change.

mod backend;
mod controller;

pub use backend::{DisplayBackend, LogDisplay, SysfsBacklight, BACKLIGHT_CLASS_DIR};
pub use controller::{DisplayController, DisplayPolicy, MIN_BRIGHTNESS};
