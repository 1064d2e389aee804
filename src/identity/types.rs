// Identity service types

use serde::{Deserialize, Serialize};

/// Access/refresh credential pair.
/// Replaced as a whole on every renewal, never field by field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

/// Authenticated user profile, paired 1:1 with a token pair for the
/// lifetime of a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
}

/// Response envelope shared by every identity service endpoint.
/// Failure envelopes always carry a displayable message.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub tokens: Option<TokenPair>,
    #[serde(default)]
    pub user: Option<UserProfile>,
}

impl AuthResponse {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            tokens: None,
            user: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
    pub confirm_password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PasswordResetRequest {
    pub email: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PasswordResetConfirm {
    pub email: String,
    pub code: String,
    pub new_password: String,
    pub confirm_new_password: String,
}

/// Renewal request body
#[derive(Serialize)]
pub(crate) struct RefreshRequest<'a> {
    pub refresh: &'a str,
}

/// Logout request body; the service blacklists the refresh credential
#[derive(Serialize)]
pub(crate) struct LogoutRequest<'a> {
    pub refresh: &'a str,
}
