//! In-process push hub behind the WebSocket endpoint.
//!
//! Topics are created lazily on first subscription and dropped once their
//! last receiver is gone.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::channels::{ChannelError, ChannelKind, NotificationChannel, OutgoingMessage};

const TOPIC_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Notifications(Uuid),
    Progress(Uuid),
    Activity(Uuid),
}

#[derive(Clone, Default)]
pub struct Hub {
    topics: Arc<DashMap<Topic, broadcast::Sender<String>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<String> {
        self.topics
            .entry(topic)
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe()
    }

    /// Sends `{"event": .., "data": ..}` to every subscriber of `topic`.
    /// Returns the number of receivers reached.
    pub fn publish<T: Serialize>(&self, topic: Topic, event: &str, data: &T) -> usize {
        let Some(tx) = self.topics.get(&topic) else {
            return 0;
        };
        let frame = json!({ "event": event, "data": data }).to_string();
        match tx.send(frame) {
            Ok(n) => n,
            Err(_) => {
                drop(tx);
                self.topics
                    .remove_if(&topic, |_, tx| tx.receiver_count() == 0);
                0
            }
        }
    }
}

/// Push channel: delivers a notification to the user's live sockets.
pub struct WebSocketChannel {
    hub: Hub,
}

impl WebSocketChannel {
    pub fn new(hub: Hub) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl NotificationChannel for WebSocketChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Websocket
    }

    async fn send(&self, target: &str, message: &OutgoingMessage) -> Result<(), ChannelError> {
        let user_id = Uuid::parse_str(target)
            .map_err(|e| ChannelError::delivery(ChannelKind::Websocket, e))?;
        let reached = self
            .hub
            .publish(Topic::Notifications(user_id), "notification", message);
        tracing::debug!(%user_id, reached, "pushed notification");
        Ok(())
    }
}
