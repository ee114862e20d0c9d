use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::SettingsStore;
use crate::display::{DisplayBackend, DisplayController};
use crate::events::EventBus;
use crate::playback::{PlaybackSupervisor, PlayerFactory};

/// Application-wide state for a running viewer
///
/// Owns the settings store, the playback supervisor and the display
/// controller task. The presentation layer renders
/// `supervisor.subscribe_ui()` and sends intents to `supervisor`.
pub struct AppState {
    /// Settings store
    pub settings: SettingsStore,
    /// Playback supervisor
    pub supervisor: PlaybackSupervisor,
    /// Event bus for state notifications
    pub events: Arc<EventBus>,
    shutdown: CancellationToken,
    display_task: Mutex<Option<JoinHandle<()>>>,
    data_dir: PathBuf,
}

impl AppState {
    /// Start the supervisor and the display controller
    pub fn new(
        settings: SettingsStore,
        player: Arc<dyn PlayerFactory>,
        display: Arc<dyn DisplayBackend>,
        events: Arc<EventBus>,
        data_dir: PathBuf,
    ) -> Arc<Self> {
        let supervisor = PlaybackSupervisor::spawn(player, settings.clone(), events.clone());
        let shutdown = CancellationToken::new();

        let display_task = DisplayController::new(display)
            .with_event_bus(events.clone())
            .spawn(
                settings.subscribe(),
                supervisor.subscribe_ui(),
                shutdown.clone(),
            );

        Arc::new(Self {
            settings,
            supervisor,
            events,
            shutdown,
            display_task: Mutex::new(Some(display_task)),
            data_dir,
        })
    }

    /// Get data directory path
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop playback, then hand the display back to the system.
    /// Safe to call more than once.
    pub async fn shutdown(&self) {
        info!("Shutting down");
        self.supervisor.shutdown().await;
        self.shutdown.cancel();

        let task = self.display_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Display controller task failed: {}", e);
            }
        }
    }
}
