use tokio::sync::broadcast;
use tracing::{debug, warn};

use waitwatch_common::ObservedValueEvent;

/// Push surface for observed-value updates. Best effort: publishing never
/// fails the update that triggered it.
pub trait Broadcaster: Send + Sync {
    fn publish(&self, event: ObservedValueEvent);
}

/// Fan-out over a tokio broadcast channel. Slow subscribers lag and lose
/// the oldest events rather than blocking publishers.
#[derive(Clone)]
pub struct ChannelBroadcaster {
    tx: broadcast::Sender<ObservedValueEvent>,
}

impl ChannelBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ObservedValueEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Broadcaster for ChannelBroadcaster {
    fn publish(&self, event: ObservedValueEvent) {
        if self.tx.receiver_count() == 0 {
            debug!(identifier = event.identifier.as_str(), "No subscribers for observed value event");
            return;
        }
        if let Err(e) = self.tx.send(event) {
            warn!(identifier = e.0.identifier.as_str(), "Failed to broadcast observed value event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str) -> ObservedValueEvent {
        ObservedValueEvent {
            identifier: id.into(),
            new_value: "30".into(),
            is_live: true,
        }
    }

    #[tokio::test]
    async fn subscribers_receive_events() {
        let b = ChannelBroadcaster::new(8);
        let mut rx = b.subscribe();
        b.publish(event("1"));
        assert_eq!(rx.recv().await.unwrap(), event("1"));
    }

    #[test]
    fn publishing_without_subscribers_is_silent() {
        let b = ChannelBroadcaster::new(8);
        b.publish(event("1"));
        assert_eq!(b.subscriber_count(), 0);
    }
}
