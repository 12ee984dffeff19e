//! Sync API client: push and pull with one-shot token refresh.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::resolver::normalize_conflict;
use super::transport::{SyncEndpoint, SyncTransport};
use super::wire::{PullRequest, PullResponse, PushRequest, PushResponse, RejectedMutation};
use super::{SyncError, SyncResult};
use crate::models::{Conflict, PullChange};
use crate::util::{compact_text, normalize_text_option};

pub type TokenFuture = Pin<Box<dyn Future<Output = SyncResult<String>> + Send>>;

/// Supplies a bearer token. Injected by the host app.
pub type TokenProvider = Arc<dyn Fn() -> TokenFuture + Send + Sync>;

/// Wrap an async closure as a [`TokenProvider`].
pub fn token_provider<F, Fut>(provider: F) -> TokenProvider
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = SyncResult<String>> + Send + 'static,
{
    Arc::new(move || Box::pin(provider()))
}

/// Parsed result of a push.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushOutcome {
    pub acknowledged_op_ids: Vec<String>,
    pub conflicts: Vec<Conflict>,
    pub failed: Vec<RejectedMutation>,
    pub new_cursor: Option<String>,
}

/// Parsed result of a pull, changes in server order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PullOutcome {
    pub changes: Vec<PullChange>,
    pub new_cursor: Option<String>,
}

pub struct SyncApiClient<T> {
    transport: T,
    token_provider: TokenProvider,
    force_refresh: Option<TokenProvider>,
}

impl<T> std::fmt::Debug for SyncApiClient<T> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SyncApiClient")
            .field("token_provider", &"[REDACTED]")
            .field("force_refresh", &self.force_refresh.is_some())
            .finish_non_exhaustive()
    }
}

impl<T: SyncTransport> SyncApiClient<T> {
    pub fn new(transport: T, token_provider: TokenProvider) -> Self {
        Self {
            transport,
            token_provider,
            force_refresh: None,
        }
    }

    /// Provider called once, after a 401, to mint a fresh token.
    #[must_use]
    pub fn with_force_refresh(mut self, provider: TokenProvider) -> Self {
        self.force_refresh = Some(provider);
        self
    }

    pub const fn transport(&self) -> &T {
        &self.transport
    }

    pub async fn push(&self, request: &PushRequest) -> SyncResult<PushOutcome> {
        let response: PushResponse = self.exchange(SyncEndpoint::Push, request).await?;
        Ok(PushOutcome {
            acknowledged_op_ids: response.acknowledged_op_ids,
            conflicts: response
                .conflicts
                .into_iter()
                .map(normalize_conflict)
                .collect(),
            failed: response
                .failed
                .iter()
                .filter_map(RejectedMutation::from_entry)
                .collect(),
            new_cursor: response.new_cursor,
        })
    }

    pub async fn pull(&self, request: &PullRequest) -> SyncResult<PullOutcome> {
        let response: PullResponse = self.exchange(SyncEndpoint::Pull, request).await?;
        Ok(PullOutcome {
            changes: response.changes,
            new_cursor: response.new_cursor,
        })
    }

    async fn exchange<B, R>(&self, endpoint: SyncEndpoint, request: &B) -> SyncResult<R>
    where
        B: Serialize,
        R: DeserializeOwned,
    {
        let body = serde_json::to_value(request)
            .map_err(|error| SyncError::InvalidPayload(error.to_string()))?;

        let token = acquire_token(&self.token_provider).await?;
        let mut response = self.transport.post(endpoint, &token, &body).await?;

        if response.is_unauthorized() {
            let Some(force_refresh) = &self.force_refresh else {
                return Err(SyncError::Unauthorized(format!(
                    "{} rejected the access token",
                    endpoint.as_str()
                )));
            };
            tracing::warn!(
                endpoint = endpoint.as_str(),
                "Sync request unauthorized, refreshing token and retrying once"
            );
            let token = acquire_token(force_refresh).await?;
            response = self.transport.post(endpoint, &token, &body).await?;
            if response.is_unauthorized() {
                return Err(SyncError::Unauthorized(format!(
                    "{} rejected the refreshed access token",
                    endpoint.as_str()
                )));
            }
        }

        if !response.is_success() {
            return Err(SyncError::Http {
                status: response.status,
                body: response.body,
            });
        }

        let payload = if response.body.trim().is_empty() {
            Value::Object(serde_json::Map::new())
        } else {
            serde_json::from_str(&response.body).map_err(|error| {
                SyncError::InvalidPayload(format!(
                    "{} response: {error} ({})",
                    endpoint.as_str(),
                    compact_text(&response.body)
                ))
            })?
        };
        serde_json::from_value(payload).map_err(|error| {
            SyncError::InvalidPayload(format!("{} response: {error}", endpoint.as_str()))
        })
    }
}

async fn acquire_token(provider: &TokenProvider) -> SyncResult<String> {
    let token = provider().await?;
    normalize_text_option(Some(token))
        .ok_or_else(|| SyncError::Unauthorized("token provider returned an empty token".to_string()))
}
