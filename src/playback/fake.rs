//! Scripted player for supervisor tests

use parking_lot::Mutex;
use std::sync::Arc;

use super::player::{PipelineState, Player, PlayerErrorCode, PlayerEvent, PlayerEventSink, PlayerFactory};
use crate::error::{AppError, Result};

/// Everything the fake pipelines were asked to do
#[derive(Debug, Default)]
pub struct FakeLog {
    pub created: usize,
    pub sources: Vec<String>,
    pub prepares: usize,
    pub stops: usize,
    pub releases: usize,
    pub volume: Option<f32>,
    pub play_when_ready: bool,
    pub ready: bool,
}

#[derive(Default)]
struct Shared {
    log: FakeLog,
    sink: Option<PlayerEventSink>,
    /// One sink per `prepare`, bound to the session of that run
    runs: Vec<PlayerEventSink>,
    fail_create: bool,
}

/// Factory whose pipelines only record calls. Tests push pipeline events
/// through [`emit`](Self::emit).
#[derive(Clone, Default)]
pub struct FakePlayerFactory {
    shared: Arc<Mutex<Shared>>,
}

impl FakePlayerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let factory = Self::default();
        factory.shared.lock().fail_create = true;
        factory
    }

    /// Inspect the call log
    pub fn log<R>(&self, f: impl FnOnce(&FakeLog) -> R) -> R {
        f(&self.shared.lock().log)
    }

    /// Emit a pipeline event from the most recently created player
    pub fn emit(&self, event: PlayerEvent) {
        let sink = {
            let mut shared = self.shared.lock();
            match &event {
                PlayerEvent::StateChanged(PipelineState::Ready) => shared.log.ready = true,
                PlayerEvent::StateChanged(_) | PlayerEvent::Error { .. } => shared.log.ready = false,
                PlayerEvent::IsPlayingChanged(_) => {}
            }
            shared.sink.clone()
        };
        if let Some(sink) = sink {
            sink.emit(event);
        }
    }

    /// Emit an event from the run started by the `run`-th `prepare` (0-based),
    /// as a late callback of that run would. The call log is left alone.
    pub fn emit_from_run(&self, run: usize, event: PlayerEvent) {
        let sink = self.shared.lock().runs.get(run).cloned();
        if let Some(sink) = sink {
            sink.emit(event);
        }
    }

    /// Pipeline became ready; plays if `play()` was requested
    pub fn ready(&self) {
        self.emit(PlayerEvent::StateChanged(PipelineState::Ready));
    }

    pub fn fail(&self, code: PlayerErrorCode) {
        self.emit(PlayerEvent::Error {
            code,
            message: None,
        });
    }

    /// Simulate the pipeline dropping its play-when-ready flag on its own
    pub fn set_play_when_ready(&self, value: bool) {
        self.shared.lock().log.play_when_ready = value;
    }
}

impl PlayerFactory for FakePlayerFactory {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn create(&self, sink: PlayerEventSink) -> Result<Box<dyn Player>> {
        let mut shared = self.shared.lock();
        if shared.fail_create {
            return Err(AppError::Playback("no decoder available".to_string()));
        }
        shared.log.created += 1;
        shared.sink = Some(sink);
        Ok(Box::new(FakePlayer {
            shared: self.shared.clone(),
        }))
    }
}

struct FakePlayer {
    shared: Arc<Mutex<Shared>>,
}

impl Player for FakePlayer {
    fn set_source(&mut self, uri: &str) {
        self.shared.lock().log.sources.push(uri.to_string());
    }

    fn prepare(&mut self) {
        let mut shared = self.shared.lock();
        shared.log.prepares += 1;
        shared.log.ready = false;
        if let Some(run) = shared.sink.as_ref().map(PlayerEventSink::bound_to_current) {
            shared.runs.push(run);
        }
    }

    fn play(&mut self) {
        self.shared.lock().log.play_when_ready = true;
    }

    fn pause(&mut self) {
        self.shared.lock().log.play_when_ready = false;
    }

    fn stop(&mut self) {
        let mut shared = self.shared.lock();
        shared.log.stops += 1;
        shared.log.ready = false;
    }

    fn release(&mut self) {
        let mut shared = self.shared.lock();
        shared.log.releases += 1;
        shared.sink = None;
    }

    fn set_volume(&mut self, volume: f32) {
        self.shared.lock().log.volume = Some(volume);
    }

    fn is_playing(&self) -> bool {
        let shared = self.shared.lock();
        shared.log.ready && shared.log.play_when_ready
    }
}
