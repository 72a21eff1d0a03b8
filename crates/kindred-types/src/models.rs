use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Numeric profile id, as issued by the backend.
pub type UserId = i64;

pub type ChannelId = i64;

/// Status of a directional interest.
///
/// Anything the backend sends that is not one of the three known values
/// decodes to `Unknown` instead of failing the whole record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterestStatus {
    Pending,
    Accepted,
    Declined,
    #[serde(other)]
    Unknown,
}

impl InterestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Declined => "declined",
            Self::Unknown => "unknown",
        }
    }

    /// Parse a stored status string. Unrecognized values map to `Unknown`.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "pending" => Self::Pending,
            "accepted" => Self::Accepted,
            "declined" => Self::Declined,
            _ => Self::Unknown,
        }
    }

    /// Status written when a recipient responds.
    pub fn from_response(accept: bool) -> Self {
        if accept { Self::Accepted } else { Self::Declined }
    }

    /// Whether a stored record may move from `self` to `next`.
    /// Only a pending record changes, and only to a response.
    pub fn can_become(&self, next: InterestStatus) -> bool {
        matches!((self, next), (Self::Pending, Self::Accepted | Self::Declined))
    }
}

impl fmt::Display for InterestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A one-directional proposal from `from_user_id` to `to_user_id`.
///
/// At most one record exists per ordered pair. The reverse pair is an
/// independent record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interest {
    pub from_user_id: UserId,
    pub to_user_id: UserId,
    pub status: InterestStatus,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_on: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_on: DateTime<Utc>,
}

impl Interest {
    /// Ordered `(from, to)` key.
    pub fn key(&self) -> (UserId, UserId) {
        (self.from_user_id, self.to_user_id)
    }

    /// The participant that is not `user_id`, if `user_id` is part of this record.
    pub fn counterpart_of(&self, user_id: UserId) -> Option<UserId> {
        if self.from_user_id == user_id {
            Some(self.to_user_id)
        } else if self.to_user_id == user_id {
            Some(self.from_user_id)
        } else {
            None
        }
    }
}

/// A messaging thread binding exactly one unordered user pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: ChannelId,
    pub participant_a: UserId,
    pub participant_b: UserId,
    /// Owned by the messaging collaborator; opaque here.
    #[serde(default)]
    pub latest_message: Option<serde_json::Value>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_on: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_on: DateTime<Utc>,
}

impl Channel {
    pub fn pair(&self) -> UserPair {
        UserPair::new(self.participant_a, self.participant_b)
    }

    pub fn counterpart_of(&self, user_id: UserId) -> Option<UserId> {
        self.pair().counterpart_of(user_id)
    }

    /// Time of the latest activity: the latest message's `createdOn` when the
    /// messaging collaborator supplied one, else `updated_on`.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.latest_message
            .as_ref()
            .and_then(|m| m.get("createdOn"))
            .and_then(|v| v.as_i64())
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or(self.updated_on)
    }
}

/// Unordered pair of users, normalized so that `low <= high`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserPair {
    low: UserId,
    high: UserId,
}

impl UserPair {
    pub fn new(a: UserId, b: UserId) -> Self {
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    pub fn low(&self) -> UserId {
        self.low
    }

    pub fn high(&self) -> UserId {
        self.high
    }

    pub fn contains(&self, user_id: UserId) -> bool {
        self.low == user_id || self.high == user_id
    }

    pub fn counterpart_of(&self, user_id: UserId) -> Option<UserId> {
        if self.low == user_id {
            Some(self.high)
        } else if self.high == user_id {
            Some(self.low)
        } else {
            None
        }
    }
}

impl fmt::Display for UserPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<->{}", self.low, self.high)
    }
}
