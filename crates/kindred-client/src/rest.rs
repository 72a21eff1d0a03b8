use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use kindred_types::api::{
    ChannelListQuery, InterestListQuery, PairQuery, SaveChannelRequest, SaveInterestRequest,
};
use kindred_types::models::{Channel, Interest, InterestStatus, UserId};

use crate::backend::Backend;
use crate::error::ApiError;

/// [`Backend`] over the HTTP API.
#[derive(Debug, Clone)]
pub struct RestBackend {
    http: Client,
    base_url: String,
}

impl RestBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(http: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_optional<T, Q>(&self, path: &str, query: &Q) -> Result<Option<T>, ApiError>
    where
        T: DeserializeOwned,
        Q: serde::Serialize + ?Sized,
    {
        let resp = self.http.get(self.url(path)).query(query).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            debug!("GET {} -> 404", path);
            return Ok(None);
        }
        read_json(resp).await.map(Some)
    }

    async fn get_list<T, Q>(&self, path: &str, query: &Q) -> Result<Vec<T>, ApiError>
    where
        T: DeserializeOwned,
        Q: serde::Serialize + ?Sized,
    {
        let resp = self.http.get(self.url(path)).query(query).send().await?;
        read_json(resp).await
    }
}

#[async_trait]
impl Backend for RestBackend {
    async fn get_interest(&self, from: UserId, to: UserId) -> Result<Option<Interest>, ApiError> {
        let query = PairQuery {
            from_user_id: from,
            to_user_id: to,
        };
        self.get_optional("/interest", &query).await
    }

    async fn save_interest(
        &self,
        from: UserId,
        to: UserId,
        status: Option<InterestStatus>,
    ) -> Result<Interest, ApiError> {
        let body = SaveInterestRequest {
            from_user_id: from,
            to_user_id: to,
            status,
        };
        let resp = self.http.post(self.url("/interest")).json(&body).send().await?;
        read_json(resp).await
    }

    async fn get_channel(&self, a: UserId, b: UserId) -> Result<Option<Channel>, ApiError> {
        let query = PairQuery {
            from_user_id: a,
            to_user_id: b,
        };
        self.get_optional("/channel", &query).await
    }

    async fn save_channel(&self, from: UserId, to: UserId) -> Result<Channel, ApiError> {
        let body = SaveChannelRequest {
            from_user_id: from,
            to_user_id: to,
        };
        let resp = self.http.post(self.url("/channel")).json(&body).send().await?;

        if resp.status() == StatusCode::CONFLICT {
            let text = resp.text().await.unwrap_or_default();
            return Err(ApiError::Conflict {
                existing: serde_json::from_str(&text).ok(),
            });
        }
        read_json(resp).await
    }

    async fn list_incoming(
        &self,
        user: UserId,
        status: Option<InterestStatus>,
    ) -> Result<Vec<Interest>, ApiError> {
        let query = InterestListQuery { user_id: user, status };
        self.get_list("/interests/incoming", &query).await
    }

    async fn list_sent(
        &self,
        user: UserId,
        status: Option<InterestStatus>,
    ) -> Result<Vec<Interest>, ApiError> {
        let query = InterestListQuery { user_id: user, status };
        self.get_list("/interests/sent", &query).await
    }

    async fn list_channels(&self, user: UserId) -> Result<Vec<Channel>, ApiError> {
        self.get_list("/channels", &ChannelListQuery { user_id: user }).await
    }
}

/// Decode a successful response body, or turn an error status into
/// [`ApiError::Status`].
async fn read_json<T: DeserializeOwned>(resp: Response) -> Result<T, ApiError> {
    let status = resp.status();
    let text = resp.text().await?;

    if !status.is_success() {
        return Err(ApiError::Status {
            status: status.as_u16(),
            message: text.chars().take(200).collect(),
        });
    }

    Ok(serde_json::from_str(&text)?)
}
