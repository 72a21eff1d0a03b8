//! Client side of the interest and channel workflows.
//!
//! [`Client`] wires a [`Backend`] and a push [`Connection`] around one shared
//! [`AppState`]. Resolvers fetch and commit pair state; push handlers keep
//! the same state converged when the other party acts.

pub mod backend;
pub mod channel;
pub mod config;
pub mod error;
pub mod handlers;
pub mod interest;
pub mod memory;
pub mod rest;
pub mod state;

use std::sync::Arc;

use tracing::{info, warn};

use kindred_gateway::{Connection, ConnectionConfig, Dialer, EventRouter, WsDialer};
use kindred_types::models::{InterestStatus, UserId};

pub use backend::Backend;
pub use channel::ChannelResolver;
pub use config::ClientConfig;
pub use error::{ApiError, ResolverError};
pub use interest::{Action, ActionOutcome, InterestResolver, InterestState, Resolution, StatusLine, resolve};
pub use memory::MemoryBackend;
pub use rest::RestBackend;
pub use state::AppState;

pub struct Client {
    state: AppState,
    backend: Arc<dyn Backend>,
    connection: Connection<AppState>,
    interests: InterestResolver,
    channels: ChannelResolver,
}

impl Client {
    /// REST backend plus WebSocket push transport, as configured.
    pub fn new(config: &ClientConfig) -> Self {
        Self::with_parts(
            Arc::new(RestBackend::new(config.api_url.as_str())),
            WsDialer::new(config.rtm_url.as_str()),
            config.connection.clone(),
        )
    }

    pub fn with_parts(backend: Arc<dyn Backend>, dialer: impl Dialer, connection: ConnectionConfig) -> Self {
        let state = AppState::new();
        let connection = Connection::new(dialer, state.clone(), connection);
        handlers::install(connection.router());

        Self {
            interests: InterestResolver::new(backend.clone(), state.clone()),
            channels: ChannelResolver::new(backend.clone(), state.clone()),
            state,
            backend,
            connection,
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn interests(&self) -> &InterestResolver {
        &self.interests
    }

    pub fn channels(&self) -> &ChannelResolver {
        &self.channels
    }

    pub fn connection(&self) -> &Connection<AppState> {
        &self.connection
    }

    pub fn router(&self) -> &Arc<EventRouter<AppState>> {
        self.connection.router()
    }

    /// Switch to `user_id` and (re)open the push session on their topic.
    pub async fn sign_in(&self, user_id: UserId) {
        self.state.set_current_user(Some(user_id));
        self.connection.connect().await;
    }

    pub async fn sign_out(&self) {
        self.connection.close().await;
        self.state.set_current_user(None);
    }

    /// Load the listings (pending incoming, accepted sent, channels) into
    /// the shared state. A failed listing is logged and skipped.
    pub async fn refresh(&self) -> Result<(), ResolverError> {
        let user = self.state.current_user().ok_or(ResolverError::SignedOut)?;

        match self.backend.list_incoming(user, Some(InterestStatus::Pending)).await {
            Ok(list) => list.into_iter().for_each(|i| self.state.apply_interest(i)),
            Err(e) => warn!("Failed to load incoming interests: {}", e),
        }
        match self.backend.list_sent(user, Some(InterestStatus::Accepted)).await {
            Ok(list) => list.into_iter().for_each(|i| self.state.apply_interest(i)),
            Err(e) => warn!("Failed to load accepted interests: {}", e),
        }
        match self.backend.list_channels(user).await {
            Ok(list) => list.into_iter().for_each(|c| self.state.add_channel(c)),
            Err(e) => warn!("Failed to load channels: {}", e),
        }

        info!(
            "Loaded {} incoming, {} accepted, {} channels for user {}",
            self.state.incoming_interests().len(),
            self.state.accepted_interests().len(),
            self.state.channels().len(),
            user
        );
        Ok(())
    }
}
