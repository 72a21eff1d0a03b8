use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use kindred_types::models::{Channel, ChannelId, Interest, InterestStatus, UserId, UserPair};

use crate::backend::Backend;
use crate::error::ApiError;

/// In-process [`Backend`] with the same pair rules as the server: one
/// interest per ordered pair, one channel per unordered pair.
///
/// Used by tests and by tools that run without a server.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    store: Mutex<Store>,
    offline: AtomicBool,
}

#[derive(Debug, Default)]
struct Store {
    // Insertion sequence breaks ties between equal timestamps.
    interests: HashMap<(UserId, UserId), (u64, Interest)>,
    channels: HashMap<UserPair, Channel>,
    next_channel_id: ChannelId,
    seq: u64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every call fails with a 503.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn store(&self) -> Result<std::sync::MutexGuard<'_, Store>, ApiError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ApiError::Status {
                status: 503,
                message: "backend offline".to_string(),
            });
        }
        Ok(self.store.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

fn invalid_transition(current: Option<InterestStatus>, requested: Option<InterestStatus>) -> ApiError {
    let current = current.map_or("nothing", |s| s.as_str());
    let requested = requested.map_or("nothing", |s| s.as_str());
    ApiError::Status {
        status: 409,
        message: format!("interest cannot go from {} to {}", current, requested),
    }
}

fn newest_first(mut rows: Vec<(u64, Interest)>) -> Vec<Interest> {
    rows.sort_by(|(sa, a), (sb, b)| b.created_on.cmp(&a.created_on).then(sb.cmp(sa)));
    rows.into_iter().map(|(_, i)| i).collect()
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn get_interest(&self, from: UserId, to: UserId) -> Result<Option<Interest>, ApiError> {
        Ok(self.store()?.interests.get(&(from, to)).map(|(_, i)| i.clone()))
    }

    async fn save_interest(
        &self,
        from: UserId,
        to: UserId,
        status: Option<InterestStatus>,
    ) -> Result<Interest, ApiError> {
        if from == to {
            return Err(ApiError::Status {
                status: 400,
                message: "cannot show interest in yourself".to_string(),
            });
        }

        let mut store = self.store()?;
        let now = Utc::now();

        let Some((_, interest)) = store.interests.get_mut(&(from, to)) else {
            if status.is_some_and(|s| s != InterestStatus::Pending) {
                return Err(invalid_transition(None, status));
            }
            store.seq += 1;
            let interest = Interest {
                from_user_id: from,
                to_user_id: to,
                status: InterestStatus::Pending,
                created_on: now,
                updated_on: now,
            };
            let seq = store.seq;
            store.interests.insert((from, to), (seq, interest.clone()));
            return Ok(interest);
        };

        match status {
            None => {}
            Some(next) if next == interest.status => {}
            Some(next) if interest.status.can_become(next) => {
                interest.status = next;
                interest.updated_on = now;
            }
            Some(_) => return Err(invalid_transition(Some(interest.status), status)),
        }
        Ok(interest.clone())
    }

    async fn get_channel(&self, a: UserId, b: UserId) -> Result<Option<Channel>, ApiError> {
        Ok(self.store()?.channels.get(&UserPair::new(a, b)).cloned())
    }

    async fn save_channel(&self, from: UserId, to: UserId) -> Result<Channel, ApiError> {
        let mut store = self.store()?;
        let pair = UserPair::new(from, to);

        if let Some(existing) = store.channels.get(&pair) {
            return Err(ApiError::Conflict {
                existing: serde_json::to_value(existing).ok(),
            });
        }

        store.next_channel_id += 1;
        let now = Utc::now();
        let channel = Channel {
            id: store.next_channel_id,
            participant_a: from,
            participant_b: to,
            latest_message: None,
            created_on: now,
            updated_on: now,
        };
        store.channels.insert(pair, channel.clone());
        Ok(channel)
    }

    async fn list_incoming(
        &self,
        user: UserId,
        status: Option<InterestStatus>,
    ) -> Result<Vec<Interest>, ApiError> {
        let store = self.store()?;
        let rows = store
            .interests
            .values()
            .filter(|(_, i)| i.to_user_id == user && status.is_none_or(|s| s == i.status))
            .cloned()
            .collect();
        Ok(newest_first(rows))
    }

    async fn list_sent(
        &self,
        user: UserId,
        status: Option<InterestStatus>,
    ) -> Result<Vec<Interest>, ApiError> {
        let store = self.store()?;
        let rows = store
            .interests
            .values()
            .filter(|(_, i)| i.from_user_id == user && status.is_none_or(|s| s == i.status))
            .cloned()
            .collect();
        Ok(newest_first(rows))
    }

    async fn list_channels(&self, user: UserId) -> Result<Vec<Channel>, ApiError> {
        let store = self.store()?;
        let mut channels: Vec<Channel> = store
            .channels
            .values()
            .filter(|c| c.pair().contains(user))
            .cloned()
            .collect();
        channels.sort_by(|a, b| b.updated_on.cmp(&a.updated_on).then(b.id.cmp(&a.id)));
        Ok(channels)
    }
}
