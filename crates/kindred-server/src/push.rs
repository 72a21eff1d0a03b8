use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

use kindred_types::events::{PushEvent, user_topic};
use kindred_types::models::UserId;

/// A push message on its way to one subscription of one session.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub subscription: String,
    pub destination: String,
    pub body: String,
}

/// Routes published events to every session subscribed to the target topic.
#[derive(Clone, Default)]
pub struct PushHub {
    inner: Arc<PushHubInner>,
}

#[derive(Default)]
struct PushHubInner {
    /// topic -> ((session_id, subscription id) -> session sender)
    topics: RwLock<HashMap<String, HashMap<(Uuid, String), mpsc::UnboundedSender<Outbound>>>>,
}

impl PushHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(
        &self,
        session_id: Uuid,
        subscription: String,
        topic: String,
        tx: mpsc::UnboundedSender<Outbound>,
    ) {
        debug!("Session {} subscribed {} to {}", session_id, subscription, topic);
        self.inner
            .topics
            .write()
            .await
            .entry(topic)
            .or_default()
            .insert((session_id, subscription), tx);
    }

    pub async fn unsubscribe(&self, session_id: Uuid, subscription: &str) {
        let mut topics = self.inner.topics.write().await;
        for subscribers in topics.values_mut() {
            subscribers.retain(|(sid, sub), _| !(*sid == session_id && sub == subscription));
        }
        topics.retain(|_, subscribers| !subscribers.is_empty());
    }

    /// Drop every subscription a session holds.
    pub async fn remove_session(&self, session_id: Uuid) {
        let mut topics = self.inner.topics.write().await;
        for subscribers in topics.values_mut() {
            subscribers.retain(|(sid, _), _| *sid != session_id);
        }
        topics.retain(|_, subscribers| !subscribers.is_empty());
    }

    pub async fn subscriber_count(&self, topic: &str) -> usize {
        self.inner.topics.read().await.get(topic).map_or(0, HashMap::len)
    }

    /// Publish `event` on `user_id`'s topic. Returns how many subscriptions
    /// it reached; nobody listening is not an error.
    pub async fn publish(&self, user_id: UserId, event: &PushEvent) -> usize {
        let body = match serde_json::to_string(event) {
            Ok(body) => body,
            Err(e) => {
                warn!("Failed to encode {} event: {}", event.event_type(), e);
                return 0;
            }
        };

        let topic = user_topic(user_id);
        let topics = self.inner.topics.read().await;
        let Some(subscribers) = topics.get(&topic) else {
            debug!("No subscribers for {} on {}", event.event_type(), topic);
            return 0;
        };

        let mut delivered = 0;
        for ((_, subscription), tx) in subscribers {
            let sent = tx.send(Outbound {
                subscription: subscription.clone(),
                destination: topic.clone(),
                body: body.clone(),
            });
            if sent.is_ok() {
                delivered += 1;
            }
        }
        debug!("Published {} to {} ({} subscriptions)", event.event_type(), topic, delivered);
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use kindred_types::models::{Interest, InterestStatus};

    fn event() -> PushEvent {
        let at = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        PushEvent::InterestReceived(Interest {
            from_user_id: 1,
            to_user_id: 2,
            status: InterestStatus::Pending,
            created_on: at,
            updated_on: at,
        })
    }

    #[tokio::test]
    async fn publishes_only_to_target_topic() {
        let hub = PushHub::new();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let (tx3, mut rx3) = mpsc::unbounded_channel();
        hub.subscribe(Uuid::new_v4(), "sub-2".into(), "/topic/2".into(), tx2).await;
        hub.subscribe(Uuid::new_v4(), "sub-3".into(), "/topic/3".into(), tx3).await;

        assert_eq!(hub.publish(2, &event()).await, 1);

        let out = rx2.recv().await.unwrap();
        assert_eq!(out.subscription, "sub-2");
        assert_eq!(out.destination, "/topic/2");
        let body: serde_json::Value = serde_json::from_str(&out.body).unwrap();
        assert_eq!(body["eventType"], "INTEREST_RECEIVED");
        assert_eq!(body["payload"]["fromUserId"], 1);
        assert!(rx3.try_recv().is_err());
    }

    #[tokio::test]
    async fn removed_sessions_stop_receiving() {
        let hub = PushHub::new();
        let session = Uuid::new_v4();
        let (tx, _rx) = mpsc::unbounded_channel();
        hub.subscribe(session, "a".into(), "/topic/2".into(), tx.clone()).await;
        hub.subscribe(session, "b".into(), "/topic/2".into(), tx).await;
        assert_eq!(hub.subscriber_count("/topic/2").await, 2);

        hub.unsubscribe(session, "a").await;
        assert_eq!(hub.subscriber_count("/topic/2").await, 1);

        hub.remove_session(session).await;
        assert_eq!(hub.subscriber_count("/topic/2").await, 0);
        assert_eq!(hub.publish(2, &event()).await, 0);
    }
}
