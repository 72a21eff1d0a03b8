use thiserror::Error;

use crate::interest::{Action, InterestState};

/// Failure talking to the REST backend.
///
/// Not-found is not an error: lookups return `Ok(None)`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },

    /// The record being created already exists. `existing` carries the
    /// stored record when the server sent it back.
    #[error("record already exists")]
    Conflict { existing: Option<serde_json::Value> },

    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("{action} is not available while {state}")]
    ActionUnavailable { action: Action, state: InterestState },

    #[error("no signed-in user")]
    SignedOut,

    #[error("cannot resolve a pair with yourself")]
    SelfPair,

    #[error(transparent)]
    Api(#[from] ApiError),
}
