use std::time::Duration;

use tracing::warn;

use kindred_gateway::{ConnectionConfig, http_to_ws_scheme};
use kindred_types::models::UserId;

const DEFAULT_API_URL: &str = "http://localhost:8080";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_url: String,
    pub rtm_url: String,
    pub connection: ConnectionConfig,
    /// Profile to sign in as, for tools that run unattended.
    pub user_id: Option<UserId>,
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key/value source. Unset or unparseable values fall back
    /// to defaults. The push URL defaults to `{api_url}/rtm` on the WS scheme.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let api_url = lookup("KINDRED_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let rtm_url = lookup("KINDRED_RTM_URL").unwrap_or_else(|| {
            format!("{}/rtm", http_to_ws_scheme(api_url.trim_end_matches('/')))
        });

        let defaults = ConnectionConfig::default();
        let millis = |key: &str, default: Duration| -> Duration {
            parsed(&lookup, key).map(Duration::from_millis).unwrap_or(default)
        };
        let connection = ConnectionConfig {
            heartbeat_outgoing: millis("KINDRED_HEARTBEAT_OUTGOING_MS", defaults.heartbeat_outgoing),
            heartbeat_incoming: millis("KINDRED_HEARTBEAT_INCOMING_MS", defaults.heartbeat_incoming),
            reconnect_delay: millis("KINDRED_RECONNECT_DELAY_MS", defaults.reconnect_delay),
            connect_timeout: defaults.connect_timeout,
        };

        Self {
            user_id: parsed(&lookup, "KINDRED_USER_ID"),
            api_url,
            rtm_url,
            connection,
        }
    }
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring invalid {}={}", key, raw);
            None
        }
    }
}
