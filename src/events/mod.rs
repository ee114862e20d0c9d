//! Broadcast of playback, settings and display notifications
//!
//! The `watch` channels carry the latest state; the bus carries every
//! transition, so observers also see states that a snapshot would coalesce.

pub mod types;

pub use types::SystemEvent;

use tokio::sync::broadcast;
use tracing::trace;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Fan-out of [`SystemEvent`]s to any number of observers.
///
/// A subscriber that falls more than 256 events behind gets `Lagged`.
pub struct EventBus {
    tx: broadcast::Sender<SystemEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Dropped silently when nobody listens
    pub fn publish(&self, event: SystemEvent) {
        trace!(event = event.event_name(), "Publishing event");
        let _ = self.tx.send(event);
    }

    /// Events published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SystemEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::PlaybackState;

    #[tokio::test]
    async fn test_every_subscriber_sees_every_transition() {
        let bus = EventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        for state in [PlaybackState::Buffering, PlaybackState::Playing] {
            bus.publish(SystemEvent::PlaybackStateChanged {
                state,
                uri: Some("rtsp://door/live".to_string()),
            });
        }

        for rx in [&mut first, &mut second] {
            assert!(matches!(
                rx.recv().await.unwrap(),
                SystemEvent::PlaybackStateChanged {
                    state: PlaybackState::Buffering,
                    ..
                }
            ));
            assert!(matches!(
                rx.recv().await.unwrap(),
                SystemEvent::PlaybackStateChanged {
                    state: PlaybackState::Playing,
                    ..
                }
            ));
        }
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        bus.publish(SystemEvent::SettingsChanged { keys: Vec::new() });

        // Late subscribers do not see earlier events
        let mut rx = bus.subscribe();
        assert!(rx.try_recv().is_err());
    }
}
