use anyhow::Context;
use serde_json::Value;
use tracing::info;

use kindred_client::{AppState, Client, ClientConfig, handlers};
use kindred_types::events::event_type;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kindred=debug".into()),
        )
        .init();

    let config = ClientConfig::from_env();
    let user_id = config.user_id.context("KINDRED_USER_ID must be set")?;

    let client = Client::new(&config);

    // Replace the default handlers with ones that also report what changed.
    for event in [event_type::INTEREST_RECEIVED, event_type::INTEREST_RESPONDED] {
        client.router().register(event, move |state: AppState, payload: Value| async move {
            handlers::on_interest(state.clone(), payload).await?;
            info!(
                "{}: {} pending incoming, {} accepted",
                event,
                state.incoming_interests().len(),
                state.accepted_interests().len()
            );
            Ok::<_, anyhow::Error>(())
        });
    }
    client.router().register(event_type::CHANNEL_CREATED, |state: AppState, payload: Value| async move {
        handlers::on_channel_created(state.clone(), payload).await?;
        info!("{}: {} channels", event_type::CHANNEL_CREATED, state.channels().len());
        Ok::<_, anyhow::Error>(())
    });

    client.sign_in(user_id).await;
    if let Err(e) = client.refresh().await {
        tracing::warn!("Initial refresh failed: {}", e);
    }

    info!("Watching push events for user {} on {}", user_id, config.rtm_url);
    tokio::signal::ctrl_c().await?;

    info!("Shutting down");
    client.sign_out().await;
    Ok(())
}
