// Authenticated HTTP client
// Attaches the current access credential to outbound requests and recovers
// from an authentication rejection with exactly one renew-and-replay.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{header, Client, Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::AuthError;
use crate::session::RefreshCoordinator;
use crate::store::SessionStore;

/// HTTP request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// HTTP client for the backing service.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct AuthHttpClient {
    client: Client,
    store: Arc<SessionStore>,
    coordinator: Arc<RefreshCoordinator>,
}

impl AuthHttpClient {
    pub fn new(store: Arc<SessionStore>, coordinator: Arc<RefreshCoordinator>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("failed to create HTTP client")?;

        Ok(Self {
            client,
            store,
            coordinator,
        })
    }

    /// Execute `request` with the current access credential attached.
    ///
    /// Without a session the request goes out unauthenticated; the backing
    /// service decides what that means. A 401 triggers one renewal and one
    /// replay, and the replay's response is returned whatever its status -
    /// a second 401 is never retried. If renewal fails the session is torn
    /// down and the caller gets `SessionExpired`.
    pub async fn execute(&self, mut request: Request) -> Result<Response, AuthError> {
        // the replay needs its own copy; a streaming body cannot be cloned
        let mut replay_request = request.try_clone();

        if let Some(record) = self.store.load() {
            attach_bearer(&mut request, &record.tokens.access);
        }

        let response = self
            .client
            .execute(request)
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        // only a session with a refresh credential can recover
        if self.store.load().is_none() {
            return Ok(response);
        }
        let Some(mut replay) = replay_request.take() else {
            return Ok(response);
        };

        tracing::debug!(url = %replay.url(), "request rejected as unauthenticated, renewing session");
        match self.coordinator.renew().await {
            Ok(pair) => {
                attach_bearer(&mut replay, &pair.access);
                self.client
                    .execute(replay)
                    .await
                    .map_err(|e| AuthError::Network(e.to_string()))
            }
            Err(e) => {
                tracing::warn!(error = %e, "session renewal failed, tearing session down");
                self.store.clear();
                Err(AuthError::SessionExpired)
            }
        }
    }

    /// GET `url` and deserialize the JSON response body.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, AuthError> {
        let request = self
            .client
            .get(url)
            .build()
            .map_err(|e| AuthError::Network(e.to_string()))?;
        let response = self.execute(request).await?;
        decode_json(response).await
    }

    /// POST `body` as JSON to `url` and deserialize the response body.
    pub async fn post_json<T: DeserializeOwned, B: Serialize>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T, AuthError> {
        let request = self
            .client
            .post(url)
            .json(body)
            .build()
            .map_err(|e| AuthError::Network(e.to_string()))?;
        let response = self.execute(request).await?;
        decode_json(response).await
    }
}

fn attach_bearer(request: &mut Request, access: &str) {
    if let Ok(value) = header::HeaderValue::from_str(&format!("Bearer {access}")) {
        request.headers_mut().insert(header::AUTHORIZATION, value);
    }
}

async fn decode_json<T: DeserializeOwned>(response: Response) -> Result<T, AuthError> {
    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(AuthError::Service {
            status: status.as_u16(),
            message,
        });
    }
    response
        .json()
        .await
        .map_err(|e| AuthError::Network(e.to_string()))
}
