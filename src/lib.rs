//! cam-viewer - resilient RTSP camera viewer
//!
//! This crate provides the core of a single-surface camera viewer: the
//! camera registry, persisted settings, the playback supervisor with its
//! bounded reconnection loop, and display/power policy.

pub mod camera;
pub mod config;
pub mod display;
pub mod error;
pub mod events;
pub mod playback;
pub mod state;
pub mod utils;

pub use error::{AppError, Result};
