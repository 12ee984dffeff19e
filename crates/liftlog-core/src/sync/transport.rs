//! HTTP transport for the sync endpoints

use std::sync::Arc;

use reqwest::header::ACCEPT;
use serde_json::Value;

use super::{SyncError, SyncResult};
use crate::config::SyncConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEndpoint {
    Push,
    Pull,
}

impl SyncEndpoint {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Pull => "pull",
        }
    }
}

/// Raw status and body of one sync exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub const fn is_unauthorized(&self) -> bool {
        self.status == 401
    }
}

/// Sends one authorized JSON request to a sync endpoint.
///
/// Implementations report HTTP statuses as data; only failures to complete
/// the exchange (connect, timeout) are errors.
#[allow(async_fn_in_trait)]
pub trait SyncTransport {
    async fn post(
        &self,
        endpoint: SyncEndpoint,
        bearer_token: &str,
        body: &Value,
    ) -> SyncResult<TransportResponse>;
}

impl<T: SyncTransport> SyncTransport for Arc<T> {
    async fn post(
        &self,
        endpoint: SyncEndpoint,
        bearer_token: &str,
        body: &Value,
    ) -> SyncResult<TransportResponse> {
        (**self).post(endpoint, bearer_token, body).await
    }
}

/// `reqwest` implementation of [`SyncTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    push_url: String,
    pull_url: String,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &SyncConfig) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|error| SyncError::InvalidConfiguration(error.to_string()))?;
        Ok(Self {
            push_url: config.push_url(),
            pull_url: config.pull_url(),
            client,
        })
    }

    fn url(&self, endpoint: SyncEndpoint) -> &str {
        match endpoint {
            SyncEndpoint::Push => &self.push_url,
            SyncEndpoint::Pull => &self.pull_url,
        }
    }
}

impl SyncTransport for HttpTransport {
    async fn post(
        &self,
        endpoint: SyncEndpoint,
        bearer_token: &str,
        body: &Value,
    ) -> SyncResult<TransportResponse> {
        let response = self
            .client
            .post(self.url(endpoint))
            .bearer_auth(bearer_token)
            .header(ACCEPT, "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        tracing::debug!(endpoint = endpoint.as_str(), status, "Sync request finished");
        Ok(TransportResponse { status, body })
    }
}
