use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;

const LOG_TARGET: &str = "lockstep::bus";

/// Wire token pushed to clients holding a checkpoint channel. The monitoring
/// variant carries the labels of still-waiting participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waiting_for: Option<Vec<String>>,
}

impl Signal {
    pub fn ready() -> Self {
        Self {
            status: "ready".to_owned(),
            waiting_for: None,
        }
    }

    pub fn waiting(labels: Vec<String>) -> Self {
        Self {
            status: "waiting".to_owned(),
            waiting_for: Some(labels),
        }
    }
}

/// Best-effort publish/subscribe fan-out keyed by channel string.
///
/// Delivery has no persistence and no replay: a subscriber that connects
/// after a publish sees nothing, and a client that never held a channel
/// relies on its own re-poll finding the completion marker. Publishing into
/// a channel nobody holds is a no-op, not an error.
pub struct NotificationBus {
    channels: DashMap<String, broadcast::Sender<Signal>>,
    capacity: usize,
}

impl NotificationBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity,
        }
    }

    pub fn publish(&self, channel: &str, signal: Signal) {
        let Some(tx) = self.channels.get(channel) else {
            debug!(target = LOG_TARGET, channel, "publish with no channel, dropped");
            return;
        };
        let receivers = tx.receiver_count();
        if receivers == 0 || tx.send(signal).is_err() {
            drop(tx);
            // Last subscriber is gone; let the channel entry go too.
            self.channels
                .remove_if(channel, |_, tx| tx.receiver_count() == 0);
            debug!(target = LOG_TARGET, channel, "publish with no subscribers, dropped");
        } else {
            debug!(target = LOG_TARGET, channel, receivers, "signal published");
        }
    }

    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<Signal> {
        self.channels
            .entry(channel.to_owned())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    pub fn subscribe_stream(&self, channel: &str) -> BroadcastStream<Signal> {
        BroadcastStream::new(self.subscribe(channel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn delivers_to_current_subscribers_only() {
        let bus = NotificationBus::new(8);
        let mut early = bus.subscribe("checkpoint:session1:page5:group1");

        bus.publish("checkpoint:session1:page5:group1", Signal::ready());
        assert_eq!(early.recv().await.unwrap(), Signal::ready());

        // A late subscriber gets nothing; no replay.
        let mut late = bus.subscribe("checkpoint:session1:page5:group1");
        assert!(late.try_recv().is_err());
    }

    #[tokio::test]
    async fn publish_without_channel_is_noop() {
        let bus = NotificationBus::new(8);
        bus.publish("checkpoint:session9:page1:all", Signal::ready());
    }

    #[tokio::test]
    async fn channels_do_not_cross_notify() {
        let bus = NotificationBus::new(8);
        let mut g1 = bus.subscribe("checkpoint:session1:page5:group1");
        let mut g2 = bus.subscribe("checkpoint:session1:page5:group2");

        bus.publish("checkpoint:session1:page5:group1", Signal::ready());
        assert!(g1.recv().await.is_ok());
        assert!(g2.try_recv().is_err());
    }

    #[tokio::test]
    async fn stream_handle_yields_signals() {
        let bus = NotificationBus::new(8);
        let mut stream = bus.subscribe_stream("arrival:session1:page3");
        bus.publish("arrival:session1:page3", Signal::waiting(vec!["P2".into()]));
        let signal = stream.next().await.unwrap().unwrap();
        assert_eq!(signal.status, "waiting");
        assert_eq!(signal.waiting_for, Some(vec!["P2".into()]));
    }

    #[test]
    fn ready_token_wire_format() {
        let json = serde_json::to_string(&Signal::ready()).unwrap();
        assert_eq!(json, r#"{"status":"ready"}"#);
    }
}
