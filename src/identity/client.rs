// Identity service client
// Typed wrapper over the identity endpoints. Transport failures and
// explicit refusals both come back as values; nothing is thrown across
// this boundary.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Serialize;

use super::types::{
    AuthResponse, LoginRequest, LogoutRequest, PasswordResetConfirm, PasswordResetRequest,
    RefreshRequest, RegisterRequest, TokenPair,
};
use crate::error::AuthError;

/// HTTP request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 30;

pub struct IdentityClient {
    client: Client,
    base_url: String,
}

impl IdentityClient {
    /// Create a client for the identity service rooted at `base_url`.
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Exchange a refresh credential for a new token pair.
    ///
    /// Returns a typed failure instead of throwing: `Network` for transport
    /// problems, `Rejected` when the service refuses the credential. The
    /// caller decides what a failure means for the session.
    pub async fn renew(&self, refresh: &str) -> Result<TokenPair, AuthError> {
        tracing::debug!("requesting token renewal");

        let response = self
            .client
            .post(self.url("/auth/token/refresh/"))
            .json(&RefreshRequest { refresh })
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<AuthResponse>()
                .await
                .map(|envelope| envelope.message)
                .ok()
                .filter(|message| !message.is_empty())
                .unwrap_or_else(|| format!("renewal refused with status {status}"));
            return Err(AuthError::Rejected(message));
        }

        let envelope: AuthResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Network(format!("malformed renewal response: {e}")))?;

        if !envelope.success {
            return Err(AuthError::Rejected(envelope.message));
        }
        envelope
            .tokens
            .ok_or_else(|| AuthError::Network("renewal response carried no tokens".to_string()))
    }

    /// Authenticate with email and password.
    pub async fn login(&self, request: &LoginRequest) -> AuthResponse {
        self.post_envelope("/auth/user/login/", request).await
    }

    /// Create an account; a successful response carries a live session.
    pub async fn register(&self, request: &RegisterRequest) -> AuthResponse {
        self.post_envelope("/auth/user/register/", request).await
    }

    /// Revoke a refresh credential server-side.
    pub async fn logout(&self, refresh: &str) -> AuthResponse {
        self.post_envelope("/auth/user/logout/", &LogoutRequest { refresh })
            .await
    }

    pub async fn request_password_reset(&self, request: &PasswordResetRequest) -> AuthResponse {
        self.post_envelope("/auth/password-reset/", request).await
    }

    pub async fn resend_reset_code(&self, request: &PasswordResetRequest) -> AuthResponse {
        self.post_envelope("/auth/password-reset/resend/", request)
            .await
    }

    pub async fn confirm_password_reset(&self, request: &PasswordResetConfirm) -> AuthResponse {
        self.post_envelope("/auth/password-reset/confirm/", request)
            .await
    }

    /// POST `body` and fold every failure mode into the response envelope,
    /// so callers can pattern-match instead of catching.
    async fn post_envelope<B: Serialize>(&self, path: &str, body: &B) -> AuthResponse {
        let response = match self.client.post(self.url(path)).json(body).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(path, error = %e, "identity request failed to send");
                return AuthResponse::failure(format!("network error: {e}"));
            }
        };

        let status = response.status();
        match response.json::<AuthResponse>().await {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(path, status = %status, error = %e, "unreadable identity response");
                AuthResponse::failure(format!("unexpected response from identity service ({status})"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tokens_body(access: &str, refresh: &str) -> String {
        json!({
            "success": true,
            "message": "ok",
            "tokens": {"access": access, "refresh": refresh}
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_renew_returns_new_pair() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/auth/token/refresh/")
            .match_body(mockito::Matcher::PartialJson(json!({"refresh": "r1"})))
            .with_status(200)
            .with_body(tokens_body("a2", "r2"))
            .expect(1)
            .create_async()
            .await;

        let client = IdentityClient::new(&server.url()).unwrap();
        let pair = client.renew("r1").await.unwrap();

        mock.assert_async().await;
        assert_eq!(pair.access, "a2");
        assert_eq!(pair.refresh, "r2");
    }

    #[tokio::test]
    async fn test_renew_rejection_carries_service_message() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/auth/token/refresh/")
            .with_status(401)
            .with_body(json!({"success": false, "message": "Token is blacklisted"}).to_string())
            .create_async()
            .await;

        let client = IdentityClient::new(&server.url()).unwrap();
        let err = client.renew("stale").await.unwrap_err();

        assert_eq!(err, AuthError::Rejected("Token is blacklisted".to_string()));
    }

    #[tokio::test]
    async fn test_renew_without_tokens_is_a_protocol_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/auth/token/refresh/")
            .with_status(200)
            .with_body(json!({"success": true, "message": "ok"}).to_string())
            .create_async()
            .await;

        let client = IdentityClient::new(&server.url()).unwrap();
        assert!(matches!(
            client.renew("r1").await,
            Err(AuthError::Network(_))
        ));
    }

    #[tokio::test]
    async fn test_login_failure_folds_into_envelope() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/auth/user/login/")
            .with_status(400)
            .with_body(json!({"success": false, "message": "Invalid credentials"}).to_string())
            .create_async()
            .await;

        let client = IdentityClient::new(&server.url()).unwrap();
        let envelope = client
            .login(&LoginRequest {
                email: "ada@example.com".to_string(),
                password: "wrong".to_string(),
            })
            .await;

        assert!(!envelope.success);
        assert_eq!(envelope.message, "Invalid credentials");
    }

    #[tokio::test]
    async fn test_unreachable_service_folds_into_envelope() {
        // nothing listens on this port
        let client = IdentityClient::new("http://127.0.0.1:1").unwrap();
        let envelope = client
            .login(&LoginRequest {
                email: "ada@example.com".to_string(),
                password: "pw".to_string(),
            })
            .await;

        assert!(!envelope.success);
        assert!(envelope.message.starts_with("network error"));
    }
}
