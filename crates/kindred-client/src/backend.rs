use async_trait::async_trait;

use kindred_types::models::{Channel, Interest, InterestStatus, UserId};

use crate::error::ApiError;

/// The record store behind the interest and channel workflows.
///
/// Lookups return `Ok(None)` when the record does not exist.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    async fn get_interest(&self, from: UserId, to: UserId) -> Result<Option<Interest>, ApiError>;

    /// Create `(from, to)` if absent (status defaults to pending), otherwise
    /// update its status when one is given.
    async fn save_interest(
        &self,
        from: UserId,
        to: UserId,
        status: Option<InterestStatus>,
    ) -> Result<Interest, ApiError>;

    /// Order of `a` and `b` does not matter.
    async fn get_channel(&self, a: UserId, b: UserId) -> Result<Option<Channel>, ApiError>;

    /// Create the channel for `{from, to}`. Fails with [`ApiError::Conflict`]
    /// when one already exists.
    async fn save_channel(&self, from: UserId, to: UserId) -> Result<Channel, ApiError>;

    /// Interests addressed to `user`, newest first.
    async fn list_incoming(
        &self,
        user: UserId,
        status: Option<InterestStatus>,
    ) -> Result<Vec<Interest>, ApiError>;

    /// Interests sent by `user`, newest first.
    async fn list_sent(
        &self,
        user: UserId,
        status: Option<InterestStatus>,
    ) -> Result<Vec<Interest>, ApiError>;

    async fn list_channels(&self, user: UserId) -> Result<Vec<Channel>, ApiError>;
}
