use serde::{Deserialize, Serialize};

use crate::models::{Channel, Interest, UserId};

/// Push topic prefix. Every client subscribes to exactly one topic,
/// `/topic/{currentUserId}`.
pub const TOPIC_PREFIX: &str = "/topic/";

pub fn user_topic(user_id: UserId) -> String {
    format!("{}{}", TOPIC_PREFIX, user_id)
}

/// Parse the user id back out of a `/topic/{id}` destination.
pub fn topic_user(destination: &str) -> Option<UserId> {
    destination.strip_prefix(TOPIC_PREFIX)?.parse().ok()
}

/// Event type names carried in `Envelope::event_type`.
pub mod event_type {
    pub const INTEREST_RECEIVED: &str = "INTEREST_RECEIVED";
    pub const INTEREST_RESPONDED: &str = "INTEREST_RESPONDED";
    pub const CHANNEL_CREATED: &str = "CHANNEL_CREATED";
}

/// Wire record of every push message: `{"eventType": ..., "payload": ...}`.
///
/// The client decodes into this untyped form so that event types it does not
/// know about still decode and simply find no handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub event_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Events published by the backend onto a user's topic.
///
/// Serializes to the same shape as [`Envelope`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "eventType", content = "payload")]
pub enum PushEvent {
    /// Someone showed interest in the topic owner.
    #[serde(rename = "INTEREST_RECEIVED")]
    InterestReceived(Interest),

    /// The recipient of the topic owner's interest accepted or declined it.
    #[serde(rename = "INTEREST_RESPONDED")]
    InterestResponded(Interest),

    /// A channel including the topic owner was created.
    #[serde(rename = "CHANNEL_CREATED")]
    ChannelCreated(Channel),
}

impl PushEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::InterestReceived(_) => event_type::INTEREST_RECEIVED,
            Self::InterestResponded(_) => event_type::INTEREST_RESPONDED,
            Self::ChannelCreated(_) => event_type::CHANNEL_CREATED,
        }
    }
}
