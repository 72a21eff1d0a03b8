//! Default push handlers. They keep [`AppState`] converged with what the
//! resolvers would compute after a fresh fetch.

use anyhow::Context;
use serde_json::Value;
use tracing::{debug, warn};

use kindred_gateway::EventRouter;
use kindred_types::events::event_type;
use kindred_types::models::{Channel, Interest};

use crate::state::AppState;

pub fn install(router: &EventRouter<AppState>) {
    router.register(event_type::INTEREST_RECEIVED, on_interest);
    router.register(event_type::INTEREST_RESPONDED, on_interest);
    router.register(event_type::CHANNEL_CREATED, on_channel_created);
}

/// Cache a pushed interest and re-derive the pair it belongs to, if that
/// pair has been resolved before.
pub async fn on_interest(state: AppState, payload: Value) -> anyhow::Result<()> {
    let interest: Interest = serde_json::from_value(payload).context("invalid interest payload")?;

    let Some(current) = state.current_user() else {
        debug!("Ignoring interest push while signed out");
        return Ok(());
    };
    let Some(other) = interest.counterpart_of(current) else {
        warn!(
            "Interest {} -> {} pushed to user {}",
            interest.from_user_id, interest.to_user_id, current
        );
        return Ok(());
    };

    state.apply_interest(interest);
    state.rederive_pair(other);
    Ok(())
}

pub async fn on_channel_created(state: AppState, payload: Value) -> anyhow::Result<()> {
    let channel: Channel = serde_json::from_value(payload).context("invalid channel payload")?;

    match state.current_user() {
        Some(current) if channel.pair().contains(current) => state.add_channel(channel),
        Some(current) => warn!("Channel {} pushed to non-member {}", channel.id, current),
        None => debug!("Ignoring channel push while signed out"),
    }
    Ok(())
}
