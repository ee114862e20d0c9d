//! Media pipeline abstraction
//!
//! The supervisor never decodes video itself. It drives a [`Player`] and
//! listens to the events the player pushes into its [`PlayerEventSink`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::Result;

/// Pipeline lifecycle reported by a player
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Stopped, or never prepared
    Idle,
    /// Loading or rebuffering
    Buffering,
    /// Able to render immediately
    Ready,
    /// The stream finished
    Ended,
}

/// Pipeline error classes the supervisor distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerErrorCode {
    NetworkConnectionFailed,
    Timeout,
    UnsupportedContainer,
    Other,
}

/// Callback from the pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    StateChanged(PipelineState),
    IsPlayingChanged(bool),
    Error {
        code: PlayerErrorCode,
        message: Option<String>,
    },
}

/// Event stamped with the load session it was emitted in
#[derive(Debug)]
pub(crate) struct SessionEvent {
    pub session: u64,
    pub event: PlayerEvent,
}

/// Owned callback channel handed to a player on creation.
///
/// Events are stamped with a load session and the supervisor drops those
/// from older sessions. The sink given to `create` stamps the session that
/// is current when it emits; anything reporting on one prepared run must use
/// [`bound_to_current`](Self::bound_to_current) instead, so its late events
/// keep the session of that run.
#[derive(Clone)]
pub struct PlayerEventSink {
    tx: mpsc::UnboundedSender<SessionEvent>,
    session: Arc<AtomicU64>,
    bound: Option<u64>,
}

impl PlayerEventSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<SessionEvent>, session: Arc<AtomicU64>) -> Self {
        Self {
            tx,
            session,
            bound: None,
        }
    }

    /// Sink that stamps every event with the session current right now
    pub fn bound_to_current(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            session: self.session.clone(),
            bound: Some(self.session.load(Ordering::Acquire)),
        }
    }

    /// Deliver an event. Returns false once the supervisor is gone.
    pub fn emit(&self, event: PlayerEvent) -> bool {
        let session = self
            .bound
            .unwrap_or_else(|| self.session.load(Ordering::Acquire));
        self.tx.send(SessionEvent { session, event }).is_ok()
    }

    /// Whether the supervisor stopped listening
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A single playback pipeline.
///
/// Calls are made from the supervisor task only and must not block.
/// Outcomes are reported asynchronously through the sink.
pub trait Player: Send {
    /// Set the stream to load on the next `prepare`
    fn set_source(&mut self, uri: &str);

    /// Start loading the current source
    fn prepare(&mut self);

    /// Play as soon as ready (or resume)
    fn play(&mut self);

    fn pause(&mut self);

    /// Stop playback, keeping the pipeline reusable
    fn stop(&mut self);

    /// Free the pipeline. No calls follow.
    fn release(&mut self);

    /// 0.0 mutes, 1.0 is full volume
    fn set_volume(&mut self, volume: f32);

    /// Whether frames are actually being rendered
    fn is_playing(&self) -> bool;
}

/// Creates pipelines on demand
pub trait PlayerFactory: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    fn create(&self, sink: PlayerEventSink) -> Result<Box<dyn Player>>;
}
