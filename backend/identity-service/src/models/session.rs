use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One issued token pair (one signed-in device or browser).
///
/// Only SHA-256 digests of the tokens are stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct SessionRecord {
    pub id: Uuid,
    pub subject: String,
    pub token_type: String, // 'Bearer'
    pub issued_at: DateTime<Utc>,
    pub access_token_hash: String,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token_hash: String,
    pub refresh_token_expires_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Both tokens are past their natural expiry; the record serves no purpose.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.access_token_expires_at <= now && self.refresh_token_expires_at <= now
    }
}

/// Token pair returned to the client at sign-in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JwtTokenModel {
    pub token_type: String,
    pub access_token: String,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_token_expires_at: DateTime<Utc>,
}
