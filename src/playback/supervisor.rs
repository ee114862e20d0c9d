//! Playback supervisor
//!
//! One task owns the pipeline, the reconnection timer and the published
//! [`UiState`]. Intents from the presentation layer, pipeline callbacks,
//! settings snapshots and timer expiries all reach it through channels and
//! are handled one at a time.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::player::{
    PipelineState, Player, PlayerErrorCode, PlayerEvent, PlayerEventSink, PlayerFactory,
    SessionEvent,
};
use super::state::{
    describe_error, PlaybackState, UiState, MAX_ATTEMPTS_REACHED, MAX_RECONNECT_ATTEMPTS,
    NO_STREAM_CONFIGURED,
};
use super::timer::ReconnectTimer;
use crate::config::{SettingField, Settings, SettingsStore};
use crate::error::{AppError, Result};
use crate::events::{EventBus, SystemEvent};
use crate::utils::LogThrottler;
use crate::warn_throttled;

#[derive(Debug)]
enum Intent {
    SelectCamera(String),
    StartPlayback,
    StopPlayback,
    Pause,
    Resume,
    ToggleMute,
    Reconnect,
    NextCamera,
    PreviousCamera,
    ToggleControls,
    SetControlsVisible(bool),
    ClearError,
    /// No-op, answers with the current state
    Refresh,
}

struct Command {
    intent: Intent,
    reply: oneshot::Sender<UiState>,
}

/// Handle to the playback supervisor task.
///
/// Every intent resolves once the supervisor has handled it, with the
/// resulting UI state. Pipeline events queued before the intent are handled
/// first.
pub struct PlaybackSupervisor {
    cmd_tx: mpsc::UnboundedSender<Command>,
    ui_rx: watch::Receiver<UiState>,
    settings: SettingsStore,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PlaybackSupervisor {
    /// Start the supervisor task.
    ///
    /// The current settings snapshot is reconciled right away, so a
    /// configured camera starts playing without an explicit intent.
    pub fn spawn(
        factory: Arc<dyn PlayerFactory>,
        settings: SettingsStore,
        events: Arc<EventBus>,
    ) -> Self {
        let initial = settings.get();
        let (ui_tx, ui_rx) = watch::channel(UiState {
            is_muted: initial.is_muted,
            ..UiState::default()
        });
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (player_tx, player_rx) = mpsc::unbounded_channel();
        let (due_tx, due_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let worker = Worker {
            factory,
            settings: settings.clone(),
            events,
            ui_tx,
            player: None,
            player_tx,
            session: Arc::new(AtomicU64::new(0)),
            pipeline_active: false,
            pipeline_ready: false,
            loaded_uri: None,
            timer: ReconnectTimer::new(due_tx),
            latest: initial,
            last_registry_uri: None,
            last_muted: None,
            throttler: LogThrottler::default(),
        };
        let inbox = Inbox {
            cmd_rx,
            player_rx,
            due_rx,
            settings_rx: settings.subscribe(),
        };
        let task = tokio::spawn(worker.run(inbox, shutdown.clone()));

        Self {
            cmd_tx,
            ui_rx,
            settings,
            shutdown,
            task: Mutex::new(Some(task)),
        }
    }

    /// Latest published UI state
    pub fn ui(&self) -> UiState {
        self.ui_rx.borrow().clone()
    }

    pub fn subscribe_ui(&self) -> watch::Receiver<UiState> {
        self.ui_rx.clone()
    }

    pub fn subscribe_settings(&self) -> watch::Receiver<Arc<Settings>> {
        self.settings.subscribe()
    }

    /// Play `uri`. Selecting the stream that is already loaded is a no-op.
    pub async fn select_camera(&self, uri: impl Into<String>) -> Result<UiState> {
        self.request(Intent::SelectCamera(uri.into())).await
    }

    /// Play the current camera
    pub async fn start_playback(&self) -> Result<UiState> {
        self.request(Intent::StartPlayback).await
    }

    pub async fn stop_playback(&self) -> Result<UiState> {
        self.request(Intent::StopPlayback).await
    }

    pub async fn pause(&self) -> Result<UiState> {
        self.request(Intent::Pause).await
    }

    pub async fn resume(&self) -> Result<UiState> {
        self.request(Intent::Resume).await
    }

    /// Flip the mute flag and persist it
    pub async fn toggle_mute(&self) -> Result<UiState> {
        self.request(Intent::ToggleMute).await
    }

    /// Reload the current camera and reset the attempt counter
    pub async fn reconnect(&self) -> Result<UiState> {
        self.request(Intent::Reconnect).await
    }

    pub async fn next_camera(&self) -> Result<UiState> {
        self.request(Intent::NextCamera).await
    }

    pub async fn previous_camera(&self) -> Result<UiState> {
        self.request(Intent::PreviousCamera).await
    }

    pub async fn toggle_controls(&self) -> Result<UiState> {
        self.request(Intent::ToggleControls).await
    }

    pub async fn show_controls(&self) -> Result<UiState> {
        self.request(Intent::SetControlsVisible(true)).await
    }

    pub async fn hide_controls(&self) -> Result<UiState> {
        self.request(Intent::SetControlsVisible(false)).await
    }

    pub async fn clear_error(&self) -> Result<UiState> {
        self.request(Intent::ClearError).await
    }

    /// Wait until everything queued so far has been handled
    pub async fn settle(&self) -> Result<UiState> {
        self.request(Intent::Refresh).await
    }

    /// Stop the task and release the pipeline. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Playback supervisor task failed: {}", e);
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled() || self.cmd_tx.is_closed()
    }

    async fn request(&self, intent: Intent) -> Result<UiState> {
        if self.shutdown.is_cancelled() {
            return Err(AppError::SupervisorClosed);
        }
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command { intent, reply })
            .map_err(|_| AppError::SupervisorClosed)?;
        rx.await.map_err(|_| AppError::SupervisorClosed)
    }
}

impl Drop for PlaybackSupervisor {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

struct Inbox {
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    player_rx: mpsc::UnboundedReceiver<SessionEvent>,
    due_rx: mpsc::UnboundedReceiver<u64>,
    settings_rx: watch::Receiver<Arc<Settings>>,
}

struct Worker {
    factory: Arc<dyn PlayerFactory>,
    settings: SettingsStore,
    events: Arc<EventBus>,
    ui_tx: watch::Sender<UiState>,
    player: Option<Box<dyn Player>>,
    player_tx: mpsc::UnboundedSender<SessionEvent>,
    /// Bumped on every load and stop; events stamped earlier are stale
    session: Arc<AtomicU64>,
    pipeline_active: bool,
    pipeline_ready: bool,
    loaded_uri: Option<String>,
    timer: ReconnectTimer,
    latest: Arc<Settings>,
    /// Registry URI of the previous snapshot, `None` before the first one
    last_registry_uri: Option<Option<String>>,
    last_muted: Option<bool>,
    throttler: LogThrottler,
}

fn volume_for(muted: bool) -> f32 {
    if muted {
        0.0
    } else {
        1.0
    }
}

impl Worker {
    async fn run(mut self, mut inbox: Inbox, shutdown: CancellationToken) {
        info!(backend = self.factory.name(), "Playback supervisor started");

        let initial = inbox.settings_rx.borrow_and_update().clone();
        self.on_settings(initial);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                Some(event) = inbox.player_rx.recv() => self.on_player_event(event),

                Some(generation) = inbox.due_rx.recv() => self.on_reconnect_due(generation),

                changed = inbox.settings_rx.changed() => {
                    if changed.is_err() {
                        warn!("Settings store closed");
                        break;
                    }
                    let snapshot = inbox.settings_rx.borrow_and_update().clone();
                    self.on_settings(snapshot);
                }

                cmd = inbox.cmd_rx.recv() => match cmd {
                    Some(Command { intent, reply }) => {
                        self.handle(intent);
                        let _ = reply.send(self.ui_tx.borrow().clone());
                    }
                    None => break,
                },
            }
        }

        self.teardown();
        info!("Playback supervisor stopped");
    }

    fn handle(&mut self, intent: Intent) {
        debug!(?intent, "Handling intent");
        match intent {
            Intent::SelectCamera(uri) => self.select(&uri),
            Intent::StartPlayback => self.start(),
            Intent::StopPlayback => self.stop(),
            Intent::Pause => self.pause(),
            Intent::Resume => self.resume(),
            Intent::ToggleMute => self.toggle_mute(),
            Intent::Reconnect => self.reconnect(),
            Intent::NextCamera => self.step_camera(true),
            Intent::PreviousCamera => self.step_camera(false),
            Intent::ToggleControls => {
                self.ui_tx
                    .send_modify(|ui| ui.controls_visible = !ui.controls_visible);
            }
            Intent::SetControlsVisible(visible) => {
                self.ui_tx.send_if_modified(|ui| {
                    std::mem::replace(&mut ui.controls_visible, visible) != visible
                });
            }
            Intent::ClearError => {
                self.ui_tx.send_if_modified(|ui| ui.error.take().is_some());
            }
            Intent::Refresh => {}
        }
    }

    fn playback(&self) -> PlaybackState {
        self.ui_tx.borrow().playback.clone()
    }

    fn set_state(&mut self, state: PlaybackState) {
        let uri = self.loaded_uri.clone();
        let changed = self.ui_tx.send_if_modified(|ui| {
            if ui.playback == state && ui.uri == uri {
                return false;
            }
            ui.playback = state.clone();
            ui.uri = uri.clone();
            true
        });
        if changed {
            debug!(state = %state, uri = ?uri, "Playback state changed");
            self.events
                .publish(SystemEvent::PlaybackStateChanged { state, uri });
        }
    }

    fn set_error(&mut self, message: &str, recoverable: bool) {
        let message = message.to_string();
        self.ui_tx
            .send_modify(|ui| ui.error = Some(message.clone()));
        self.set_state(PlaybackState::Error {
            message: message.clone(),
            recoverable,
        });
        self.events.publish(SystemEvent::PlaybackError {
            message,
            recoverable,
            uri: self.loaded_uri.clone(),
        });
    }

    /// Registry URI if set, otherwise whatever is loaded
    fn current_uri(&self) -> Option<String> {
        self.settings
            .get()
            .current_url()
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .or_else(|| self.loaded_uri.clone())
    }

    fn select(&mut self, uri: &str) {
        let uri = uri.trim();
        if uri.is_empty() {
            self.no_stream();
            return;
        }
        if self.loaded_uri.as_deref() == Some(uri) && self.playback().is_loaded() {
            debug!(uri, "Stream already loaded");
            return;
        }
        self.timer.reset();
        self.load(uri);
    }

    fn no_stream(&mut self) {
        warn!("{}", NO_STREAM_CONFIGURED);
        self.timer.reset();
        self.halt_pipeline();
        self.loaded_uri = None;
        self.set_state(PlaybackState::Idle);

        let message = NO_STREAM_CONFIGURED.to_string();
        self.ui_tx
            .send_modify(|ui| ui.error = Some(message.clone()));
        self.events.publish(SystemEvent::PlaybackError {
            message,
            recoverable: false,
            uri: None,
        });
    }

    /// Load `uri` into the pipeline (creating it if needed) and start it.
    ///
    /// Keeps the attempt counter; callers reset it when appropriate.
    fn load(&mut self, uri: &str) {
        self.timer.cancel();

        if self.player.is_none() {
            let sink = PlayerEventSink::new(self.player_tx.clone(), self.session.clone());
            match self.factory.create(sink) {
                Ok(mut player) => {
                    let muted = self.ui_tx.borrow().is_muted;
                    player.set_volume(volume_for(muted));
                    info!(backend = self.factory.name(), muted, "Playback pipeline created");
                    self.player = Some(player);
                }
                Err(e) => {
                    warn!(backend = self.factory.name(), "Failed to create player: {}", e);
                    self.loaded_uri = Some(uri.to_string());
                    self.set_error(&format!("Failed to create player: {}", e), false);
                    return;
                }
            }
        }

        self.session.fetch_add(1, Ordering::AcqRel);
        let switched = self.loaded_uri.as_deref() != Some(uri);
        self.loaded_uri = Some(uri.to_string());
        self.pipeline_active = true;
        self.pipeline_ready = false;

        if let Some(player) = self.player.as_mut() {
            player.stop();
            player.set_source(uri);
            player.prepare();
            player.play();
        }

        if switched {
            let camera_id = self
                .settings
                .get()
                .cameras
                .iter()
                .find(|c| c.url.trim() == uri)
                .map(|c| c.id.clone());
            info!(uri, camera = ?camera_id, "Camera selected");
            self.events.publish(SystemEvent::CameraSelected {
                uri: uri.to_string(),
                camera_id,
            });
        }

        self.set_state(PlaybackState::Buffering);
    }

    /// Stop the pipeline without releasing it
    fn halt_pipeline(&mut self) {
        self.session.fetch_add(1, Ordering::AcqRel);
        self.pipeline_active = false;
        self.pipeline_ready = false;
        if let Some(player) = self.player.as_mut() {
            player.stop();
        }
    }

    fn start(&mut self) {
        match self.current_uri() {
            Some(uri) => self.select(&uri),
            None => self.no_stream(),
        }
    }

    fn stop(&mut self) {
        self.timer.reset();
        self.halt_pipeline();
        self.set_state(PlaybackState::Idle);
        info!(uri = ?self.loaded_uri, "Playback stopped");
    }

    fn reconnect(&mut self) {
        self.timer.reset();
        // Retry the stream the error was shown for, like the timer does
        let uri = self
            .loaded_uri
            .clone()
            .or_else(|| self.current_uri());
        match uri {
            Some(uri) => {
                info!(uri = %uri, "Reconnecting on request");
                self.load(&uri);
            }
            None => self.no_stream(),
        }
    }

    fn pause(&mut self) {
        if self.playback() != PlaybackState::Playing {
            debug!(state = %self.playback(), "Pause ignored");
            return;
        }
        if let Some(player) = self.player.as_mut() {
            player.pause();
        }
        self.set_state(PlaybackState::Paused);
    }

    fn resume(&mut self) {
        if self.playback() != PlaybackState::Paused {
            debug!(state = %self.playback(), "Resume ignored");
            return;
        }
        if let Some(player) = self.player.as_mut() {
            player.play();
        }
        // Optimistic; the next pipeline callback corrects it
        self.set_state(PlaybackState::Playing);
    }

    fn apply_mute(&mut self, muted: bool) {
        self.ui_tx.send_if_modified(|ui| {
            std::mem::replace(&mut ui.is_muted, muted) != muted
        });
        if let Some(player) = self.player.as_mut() {
            player.set_volume(volume_for(muted));
        }
    }

    fn toggle_mute(&mut self) {
        let muted = !self.ui_tx.borrow().is_muted;
        self.apply_mute(muted);
        self.last_muted = Some(muted);
        // Persisted in the background, in order with other writes
        drop(self.settings.set_muted(muted));
        info!(muted, "Mute toggled");
    }

    fn step_camera(&mut self, forward: bool) {
        let mut registry = self.settings.get().registry();
        if registry.len() <= 1 {
            debug!(cameras = registry.len(), "Nothing to switch to");
            return;
        }
        if forward {
            registry.next();
        } else {
            registry.previous();
        }

        let Some(index) = registry.current_index() else {
            return;
        };
        drop(
            self.settings
                .write_field(SettingField::CurrentCameraIndex(index as u32)),
        );
        let uri = registry.current_url().unwrap_or_default().to_string();
        self.select(&uri);
    }

    fn on_settings(&mut self, snapshot: Arc<Settings>) {
        if self.last_muted != Some(snapshot.is_muted) {
            self.last_muted = Some(snapshot.is_muted);
            self.apply_mute(snapshot.is_muted);
        }

        let registry_uri = snapshot
            .current_url()
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty());
        let registry_empty = snapshot.cameras.is_empty();
        self.latest = snapshot;

        let unchanged = self.last_registry_uri.as_ref() == Some(&registry_uri);
        self.last_registry_uri = Some(registry_uri.clone());
        // An unchanged registry only matters when nothing is loaded
        if unchanged && (self.loaded_uri.is_some() || registry_uri.is_none()) {
            return;
        }

        match registry_uri {
            Some(uri) if self.loaded_uri.as_deref() != Some(uri.as_str()) => {
                debug!(uri = %uri, "Current camera changed");
                self.timer.reset();
                self.load(&uri);
            }
            None if registry_empty && self.loaded_uri.is_some() => {
                info!("Camera list is empty, stopping playback");
                self.stop();
                self.loaded_uri = None;
                self.set_state(PlaybackState::Idle);
            }
            _ => {}
        }
    }

    fn on_player_event(&mut self, event: SessionEvent) {
        if !self.pipeline_active || event.session != self.session.load(Ordering::Acquire) {
            debug!(event = ?event.event, "Ignoring stale pipeline event");
            return;
        }
        debug!(event = ?event.event, "Pipeline event");

        match event.event {
            PlayerEvent::StateChanged(PipelineState::Buffering) => {
                self.pipeline_ready = false;
                if self.playback().is_loaded() {
                    self.set_state(PlaybackState::Buffering);
                }
            }
            PlayerEvent::StateChanged(PipelineState::Ready) => {
                self.pipeline_ready = true;
                let playing = self.player.as_ref().is_some_and(|p| p.is_playing());
                if playing {
                    self.on_playing();
                } else if matches!(
                    self.playback(),
                    PlaybackState::Buffering | PlaybackState::Playing
                ) {
                    self.set_state(PlaybackState::Paused);
                }
            }
            PlayerEvent::StateChanged(PipelineState::Ended) => {
                self.pipeline_ready = false;
                self.timer.reset();
                info!(uri = ?self.loaded_uri, "Stream ended");
                self.set_state(PlaybackState::Idle);
            }
            PlayerEvent::StateChanged(PipelineState::Idle) => {}
            PlayerEvent::IsPlayingChanged(true) => {
                if self.pipeline_ready {
                    self.on_playing();
                }
            }
            PlayerEvent::IsPlayingChanged(false) => {
                if self.pipeline_ready && self.playback() == PlaybackState::Playing {
                    self.set_state(PlaybackState::Paused);
                }
            }
            PlayerEvent::Error { code, message } => self.on_pipeline_error(code, message),
        }
    }

    fn on_playing(&mut self) {
        let attempts = self.timer.attempts();
        if attempts > 0 {
            info!(uri = ?self.loaded_uri, attempts, "Stream recovered");
        }
        self.timer.reset();
        if let Some(uri) = &self.loaded_uri {
            self.throttler.clear(uri);
        }
        self.set_state(PlaybackState::Playing);
    }

    fn on_pipeline_error(&mut self, code: PlayerErrorCode, raw: Option<String>) {
        let message = describe_error(code, raw.as_deref());
        let uri = self.loaded_uri.clone().unwrap_or_default();
        warn_throttled!(
            self.throttler,
            &uri,
            "Playback error on {}: {} ({})",
            uri,
            message,
            raw.as_deref().unwrap_or("no details")
        );

        self.pipeline_ready = false;
        self.set_error(&message, true);

        if self.latest.auto_reconnect {
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(&mut self) {
        let Some(uri) = self.loaded_uri.clone() else {
            return;
        };

        match self.timer.next_attempt() {
            Some(attempt) => {
                let delay_ms = self.latest.reconnect_delay_ms;
                info!(
                    uri = %uri,
                    delay_ms,
                    "Reconnecting in {}ms (attempt {}/{})",
                    delay_ms,
                    attempt,
                    MAX_RECONNECT_ATTEMPTS
                );
                self.set_state(PlaybackState::Reconnecting { attempt });
                self.events.publish(SystemEvent::PlaybackReconnecting {
                    uri,
                    attempt,
                    max_attempts: MAX_RECONNECT_ATTEMPTS,
                });
                self.timer
                    .schedule(Duration::from_millis(u64::from(delay_ms)));
            }
            None => {
                warn!(
                    uri = %uri,
                    "Giving up after {} reconnection attempts",
                    MAX_RECONNECT_ATTEMPTS
                );
                self.timer.cancel();
                self.set_error(MAX_ATTEMPTS_REACHED, true);
            }
        }
    }

    fn on_reconnect_due(&mut self, generation: u64) {
        if !self.timer.take_if_current(generation) {
            debug!(generation, "Discarding cancelled reconnect");
            return;
        }
        let Some(uri) = self.loaded_uri.clone() else {
            return;
        };
        debug!(uri = %uri, attempt = self.timer.attempts(), "Reconnect wait elapsed");
        self.load(&uri);
    }

    fn teardown(&mut self) {
        self.timer.reset();
        self.session.fetch_add(1, Ordering::AcqRel);
        self.pipeline_active = false;
        self.pipeline_ready = false;
        if let Some(mut player) = self.player.take() {
            player.stop();
            player.release();
            info!("Playback pipeline released");
        }
        self.set_state(PlaybackState::Idle);
        self.events.publish(SystemEvent::SupervisorStopped);
    }
}
