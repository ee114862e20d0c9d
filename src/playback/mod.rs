//! Playback supervision
//!
//! The [`PlaybackSupervisor`] keeps exactly one pipeline in agreement with
//! the current camera, drives it through [`PlaybackState`] and retries
//! recoverable failures with a bounded, cancelable reconnection loop.

pub mod player;
pub mod process;
pub mod state;
mod supervisor;
mod timer;

#[cfg(test)]
pub(crate) mod fake;

pub use player::{PipelineState, Player, PlayerErrorCode, PlayerEvent, PlayerEventSink, PlayerFactory};
pub use process::{ProcessPlayerConfig, ProcessPlayerFactory};
pub use state::{PlaybackState, UiState, MAX_RECONNECT_ATTEMPTS};
pub use supervisor::PlaybackSupervisor;
