use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::DisplayBackend;
use crate::config::{BrightnessMode, Settings};
use crate::events::{EventBus, SystemEvent};
use crate::playback::UiState;

/// Brightness used by `BrightnessMode::Minimum`
pub const MIN_BRIGHTNESS: f32 = 0.01;

/// What the display should look like right now
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayPolicy {
    pub keep_screen_on: bool,
    /// `None` leaves brightness to the system
    pub brightness: Option<f32>,
    pub immersive: bool,
}

impl DisplayPolicy {
    pub fn resolve(settings: &Settings, ui: &UiState) -> Self {
        let brightness = match settings.brightness_mode {
            BrightnessMode::Auto => None,
            BrightnessMode::Minimum => Some(MIN_BRIGHTNESS),
            BrightnessMode::Custom => Some(settings.custom_brightness.clamp(0.0, 1.0)),
        };
        Self {
            keep_screen_on: !settings.allow_screen_off,
            brightness,
            immersive: ui.playback.is_active(),
        }
    }

    /// Hands everything back to the system
    pub fn system_default() -> Self {
        Self {
            keep_screen_on: false,
            brightness: None,
            immersive: false,
        }
    }
}

/// Applies [`DisplayPolicy`] changes to a backend.
///
/// Only the parts that changed since the last apply reach the backend.
/// Backend failures are logged and otherwise ignored.
pub struct DisplayController {
    backend: Arc<dyn DisplayBackend>,
    events: Option<Arc<EventBus>>,
    applied: Option<DisplayPolicy>,
}

impl DisplayController {
    pub fn new(backend: Arc<dyn DisplayBackend>) -> Self {
        Self {
            backend,
            events: None,
            applied: None,
        }
    }

    /// Publish `display.applied` events on `events`
    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn applied(&self) -> Option<DisplayPolicy> {
        self.applied
    }

    /// Apply `policy`. Returns false when nothing changed.
    pub async fn apply(&mut self, policy: DisplayPolicy) -> bool {
        let previous = self.applied;
        if previous == Some(policy) {
            return false;
        }
        let backend = self.backend.name();

        if previous.map(|p| p.keep_screen_on) != Some(policy.keep_screen_on) {
            if let Err(e) = self.backend.set_keep_screen_on(policy.keep_screen_on).await {
                warn!(backend, "Failed to set keep-screen-on: {}", e);
            }
        }
        if previous.map(|p| p.brightness) != Some(policy.brightness) {
            if let Err(e) = self.backend.set_brightness(policy.brightness).await {
                warn!(backend, "Failed to set brightness: {}", e);
            }
        }
        if previous.map(|p| p.immersive) != Some(policy.immersive) {
            if let Err(e) = self.backend.set_immersive(policy.immersive).await {
                warn!(backend, "Failed to set immersive mode: {}", e);
            }
        }

        debug!(?policy, "Display policy applied");
        self.applied = Some(policy);
        if let Some(events) = &self.events {
            events.publish(SystemEvent::DisplayApplied {
                keep_screen_on: policy.keep_screen_on,
                brightness: policy.brightness,
                immersive: policy.immersive,
            });
        }
        true
    }

    /// Follow settings and playback state until `shutdown`, then restore
    /// the system defaults.
    pub fn spawn(
        mut self,
        mut settings_rx: watch::Receiver<Arc<Settings>>,
        mut ui_rx: watch::Receiver<UiState>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(backend = self.backend.name(), "Display controller started");
            loop {
                let settings = settings_rx.borrow_and_update().clone();
                let ui = ui_rx.borrow_and_update().clone();
                self.apply(DisplayPolicy::resolve(&settings, &ui)).await;

                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    changed = settings_rx.changed() => if changed.is_err() { break },
                    changed = ui_rx.changed() => if changed.is_err() { break },
                }
            }

            self.apply(DisplayPolicy::system_default()).await;
            info!("Display controller stopped");
        })
    }
}
