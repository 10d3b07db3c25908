//! Records held by the Authorization Server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A dynamically registered OAuth client. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredClient {
    pub client_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_secret: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub grant_types: Vec<String>,
    #[serde(rename = "client_id_issued_at")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_name: String,
}

/// A single-use authorization code. Held in memory only.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthorizationCode {
    pub code: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: String,
    pub code_challenge: String,
    pub resource: String,
    pub username: String,
    pub expires_at: DateTime<Utc>,
}

impl AuthorizationCode {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// An issued access/refresh token pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessToken {
    #[serde(rename = "Token")]
    pub token: String,
    #[serde(rename = "RefreshToken")]
    pub refresh_token: String,
    #[serde(rename = "ClientID")]
    pub client_id: String,
    #[serde(rename = "Scope", default)]
    pub scope: String,
    #[serde(rename = "Resource", default)]
    pub resource: String,
    #[serde(rename = "ExpiresAt")]
    pub expires_at: DateTime<Utc>,
    /// Authenticated user the token was issued to. Absent in older snapshots.
    #[serde(rename = "Username", default)]
    pub username: String,
}

impl AccessToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}
