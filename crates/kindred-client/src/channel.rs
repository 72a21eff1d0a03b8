use std::sync::Arc;

use tracing::{debug, info, warn};

use kindred_types::models::{Channel, UserId, UserPair};

use crate::backend::Backend;
use crate::error::ApiError;
use crate::state::AppState;

/// Finds or creates the single channel of a user pair.
///
/// There is no lock across clients: two users starting a conversation at the
/// same time both try to create, and the loser's conflict is treated as a
/// successful lookup of the winner's channel.
#[derive(Clone)]
pub struct ChannelResolver {
    backend: Arc<dyn Backend>,
    state: AppState,
}

impl ChannelResolver {
    pub fn new(backend: Arc<dyn Backend>, state: AppState) -> Self {
        Self { backend, state }
    }

    pub async fn get_or_create(&self, current: UserId, other: UserId) -> Result<Channel, ApiError> {
        let pair = UserPair::new(current, other);

        match self.backend.get_channel(current, other).await {
            Ok(Some(channel)) => return Ok(self.remember(channel)),
            Ok(None) => debug!("No channel for {}, creating", pair),
            Err(e) => warn!("Channel lookup for {} failed, trying to create: {}", pair, e),
        }

        let result = match self.backend.save_channel(current, other).await {
            Ok(channel) => {
                info!("Created channel {} for {}", channel.id, pair);
                Ok(channel)
            }
            Err(ApiError::Conflict { existing }) => self.existing(current, other, existing).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(channel) => Ok(self.remember(channel)),
            Err(e) => match self.state.channel(pair) {
                Some(cached) => {
                    warn!("Could not get or create channel for {}, using cached {}: {}", pair, cached.id, e);
                    Ok(cached)
                }
                None => Err(e),
            },
        }
    }

    /// The channel another client created first.
    async fn existing(
        &self,
        current: UserId,
        other: UserId,
        body: Option<serde_json::Value>,
    ) -> Result<Channel, ApiError> {
        if let Some(channel) = body.and_then(|v| serde_json::from_value::<Channel>(v).ok()) {
            debug!("Channel {} already existed", channel.id);
            return Ok(channel);
        }

        self.backend
            .get_channel(current, other)
            .await?
            .ok_or_else(|| ApiError::Status {
                status: 404,
                message: format!("channel for {} vanished after conflict", UserPair::new(current, other)),
            })
    }

    fn remember(&self, channel: Channel) -> Channel {
        self.state.add_channel(channel.clone());
        channel
    }
}
