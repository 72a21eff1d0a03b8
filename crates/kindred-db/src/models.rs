//! Database row types. These map directly to SQLite rows.
//! Distinct from kindred-types API models to keep the DB layer independent.

use chrono::{DateTime, Utc};
use tracing::warn;

use kindred_types::models::{Channel, Interest, InterestStatus};

#[derive(Debug)]
pub struct InterestRow {
    pub from_user_id: i64,
    pub to_user_id: i64,
    pub status: String,
    pub created_on: i64,
    pub updated_on: i64,
}

pub struct ChannelRow {
    pub id: i64,
    pub user_low: i64,
    pub user_high: i64,
    pub created_by: i64,
    pub latest_message: Option<String>,
    pub created_on: i64,
    pub updated_on: i64,
}

fn millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

impl InterestRow {
    pub fn into_interest(self) -> Interest {
        Interest {
            from_user_id: self.from_user_id,
            to_user_id: self.to_user_id,
            status: InterestStatus::parse(&self.status),
            created_on: millis(self.created_on),
            updated_on: millis(self.updated_on),
        }
    }
}

impl ChannelRow {
    /// The creator is reported as `participant_a`.
    pub fn into_channel(self) -> Channel {
        let other = if self.created_by == self.user_low {
            self.user_high
        } else {
            self.user_low
        };

        let latest_message = self.latest_message.and_then(|raw| {
            serde_json::from_str(&raw)
                .map_err(|e| warn!("Corrupt latest_message on channel {}: {}", self.id, e))
                .ok()
        });

        Channel {
            id: self.id,
            participant_a: self.created_by,
            participant_b: other,
            latest_message,
            created_on: millis(self.created_on),
            updated_on: millis(self.updated_on),
        }
    }
}
