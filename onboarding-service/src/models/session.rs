//! Device session model - one refresh token per (user, device).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Role;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub device_id: String,
    pub role: Role,
    pub refresh_token_hash: String,
    /// Set for sessions opened by login OTP; refresh keeps them partial
    /// until the PIN is verified.
    #[serde(default)]
    pub partial_only: bool,
    pub active: bool,
    pub created_utc: DateTime<Utc>,
    pub last_seen_utc: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(
        user_id: Uuid,
        device_id: &str,
        role: Role,
        refresh_token_hash: String,
        partial_only: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            user_id,
            device_id: device_id.to_string(),
            role,
            refresh_token_hash,
            partial_only,
            active: true,
            created_utc: now,
            last_seen_utc: now,
        }
    }

    /// Successor on refresh: new id and refresh hash, same origin and
    /// partial cap, seen now.
    pub fn rotated(&self, refresh_token_hash: String) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            refresh_token_hash,
            last_seen_utc: Utc::now(),
            ..self.clone()
        }
    }

    pub fn storage_key(user_id: Uuid, device_id: &str) -> String {
        format!("session:{}:{}", user_id, device_id)
    }

    /// Set of device ids with a live session for the user.
    pub fn index_key(user_id: Uuid) -> String {
        format!("user_sessions:{}", user_id)
    }

    /// Reverse lookup from a refresh token hash to its owner.
    pub fn refresh_lookup_key(refresh_token_hash: &str) -> String {
        format!("refresh:{}", refresh_token_hash)
    }
}
