//! OTP record model - short-lived codes kept in the ephemeral store.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OtpPurpose {
    Login,
    Register,
}

impl OtpPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            OtpPurpose::Login => "login",
            OtpPurpose::Register => "register",
        }
    }
}

impl fmt::Display for OtpPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OtpPurpose {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "login" => Ok(OtpPurpose::Login),
            "register" => Ok(OtpPurpose::Register),
            other => Err(anyhow::anyhow!("Unknown OTP purpose: {}", other)),
        }
    }
}

/// Stored OTP. Only the SHA-256 hash of the code is kept; wrong guesses
/// are counted under [`OtpRecord::attempts_key`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtpRecord {
    pub identifier: String,
    pub code_hash: String,
    pub purpose: OtpPurpose,
    pub role: Option<Role>,
    pub created_utc: DateTime<Utc>,
    pub expiry_utc: DateTime<Utc>,
}

impl OtpRecord {
    pub fn new(
        identifier: String,
        code_hash: String,
        purpose: OtpPurpose,
        role: Option<Role>,
        ttl_seconds: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            identifier,
            code_hash,
            purpose,
            role,
            created_utc: now,
            expiry_utc: now + Duration::seconds(ttl_seconds as i64),
        }
    }

    pub fn storage_key(identifier: &str, purpose: OtpPurpose) -> String {
        format!("otp:{}:{}", identifier, purpose.as_str())
    }

    pub fn attempts_key(identifier: &str, purpose: OtpPurpose) -> String {
        format!("otp_attempts:{}:{}", identifier, purpose.as_str())
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expiry_utc
    }
}
