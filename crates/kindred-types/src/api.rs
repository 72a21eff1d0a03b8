use serde::{Deserialize, Serialize};

use crate::models::{InterestStatus, UserId};

// -- Interests --

/// Query for a single directional record (`Interest.get` / `Channel.get`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairQuery {
    pub from_user_id: UserId,
    pub to_user_id: UserId,
}

/// `Interest.save`: creates the record if absent, updates its status if present.
/// A missing status on create means `pending`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SaveInterestRequest {
    pub from_user_id: UserId,
    pub to_user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<InterestStatus>,
}

/// Listing of one user's interests in one direction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterestListQuery {
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<InterestStatus>,
}

// -- Channels --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SaveChannelRequest {
    pub from_user_id: UserId,
    pub to_user_id: UserId,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelListQuery {
    pub user_id: UserId,
}
