//! User model - onboarding state owned by the credential store.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::utils::Identifier;

/// No step has been recorded yet.
pub const PROGRESS_NONE: i32 = 0;
/// OTP verified and the user record exists.
pub const PROGRESS_OTP_VERIFIED: i32 = 1;
/// All role data submitted. Terminal progress for every role.
pub const PROGRESS_DATA_SUBMITTED: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Administrator,
    Pengelola,
    Pengepul,
    Masyarakat,
}

impl Role {
    pub const ALL: [Role; 4] = [
        Role::Administrator,
        Role::Pengelola,
        Role::Pengepul,
        Role::Masyarakat,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Administrator => "administrator",
            Role::Pengelola => "pengelola",
            Role::Pengepul => "pengepul",
            Role::Masyarakat => "masyarakat",
        }
    }

    /// Roles whose registration ends in an admin review.
    pub fn requires_admin_approval(&self) -> bool {
        matches!(self, Role::Pengelola | Role::Pengepul)
    }

    /// Administrators are provisioned, never self-registered.
    pub fn is_self_registrable(&self) -> bool {
        !matches!(self, Role::Administrator)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "administrator" => Ok(Role::Administrator),
            "pengelola" => Ok(Role::Pengelola),
            "pengepul" => Ok(Role::Pengepul),
            "masyarakat" => Ok(Role::Masyarakat),
            other => Err(anyhow::anyhow!("Unknown role: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    Incomplete,
    PinVerificationRequired,
    OtpVerified,
    Pending,
    Approved,
    Complete,
    Rejected,
}

impl RegistrationStatus {
    pub const ALL: [RegistrationStatus; 7] = [
        RegistrationStatus::Incomplete,
        RegistrationStatus::PinVerificationRequired,
        RegistrationStatus::OtpVerified,
        RegistrationStatus::Pending,
        RegistrationStatus::Approved,
        RegistrationStatus::Complete,
        RegistrationStatus::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationStatus::Incomplete => "incomplete",
            RegistrationStatus::PinVerificationRequired => "pin_verification_required",
            RegistrationStatus::OtpVerified => "otp_verified",
            RegistrationStatus::Pending => "pending",
            RegistrationStatus::Approved => "approved",
            RegistrationStatus::Complete => "complete",
            RegistrationStatus::Rejected => "rejected",
        }
    }

    /// Human readable label used in step descriptors.
    pub fn label(&self) -> &'static str {
        match self {
            RegistrationStatus::Incomplete => "Registration incomplete",
            RegistrationStatus::PinVerificationRequired => "PIN required",
            RegistrationStatus::OtpVerified => "Documents required",
            RegistrationStatus::Pending => "Awaiting admin review",
            RegistrationStatus::Approved => "Approved",
            RegistrationStatus::Complete => "Registration complete",
            RegistrationStatus::Rejected => "Rejected",
        }
    }
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegistrationStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RegistrationStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("Unknown registration status: {}", s))
    }
}

/// User entity.
#[derive(Debug, Clone)]
pub struct User {
    pub user_id: Uuid,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub gender: Option<String>,
    pub address: Option<String>,
    pub role: Role,
    pub registration_status: RegistrationStatus,
    pub registration_progress: i32,
    pub phone_verified: bool,
    pub email_verified: bool,
    pub pin_hash: Option<String>,
    pub review_notes: Option<String>,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl User {
    /// User created by a verified registration OTP.
    pub fn registered(identifier: &Identifier, role: Role) -> Self {
        let now = Utc::now();
        let (phone, email) = match identifier {
            Identifier::Phone(p) => (Some(p.clone()), None),
            Identifier::Email(e) => (None, Some(e.clone())),
        };
        Self {
            user_id: Uuid::new_v4(),
            phone_verified: phone.is_some(),
            email_verified: email.is_some(),
            phone,
            email,
            name: None,
            gender: None,
            address: None,
            role,
            registration_status: RegistrationStatus::Incomplete,
            registration_progress: PROGRESS_OTP_VERIFIED,
            pin_hash: None,
            review_notes: None,
            reviewed_by: None,
            reviewed_utc: None,
            created_utc: now,
            updated_utc: now,
        }
    }

    pub fn has_pin(&self) -> bool {
        self.pin_hash.is_some()
    }
}

/// Row shape as stored in PostgreSQL.
#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub user_id: Uuid,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub gender: Option<String>,
    pub address: Option<String>,
    pub role_code: String,
    pub registration_status_code: String,
    pub registration_progress: i32,
    pub phone_verified: bool,
    pub email_verified: bool,
    pub pin_hash: Option<String>,
    pub review_notes: Option<String>,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = anyhow::Error;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(Self {
            user_id: row.user_id,
            phone: row.phone,
            email: row.email,
            name: row.name,
            gender: row.gender,
            address: row.address,
            role: row.role_code.parse()?,
            registration_status: row.registration_status_code.parse()?,
            registration_progress: row.registration_progress,
            phone_verified: row.phone_verified,
            email_verified: row.email_verified,
            pin_hash: row.pin_hash,
            review_notes: row.review_notes,
            reviewed_by: row.reviewed_by,
            reviewed_utc: row.reviewed_utc,
            created_utc: row.created_utc,
            updated_utc: row.updated_utc,
        })
    }
}

/// Profile fields submitted after registration OTP.
#[derive(Debug, Clone)]
pub struct ProfileUpdate {
    pub name: String,
    pub gender: String,
    pub address: String,
}

/// User response for API (without sensitive fields).
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UserResponse {
    pub user_id: Uuid,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub role: Role,
    pub registration_status: RegistrationStatus,
    pub registration_progress: i32,
    pub phone_verified: bool,
    pub has_pin: bool,
    pub review_notes: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(u: User) -> Self {
        Self {
            has_pin: u.has_pin(),
            user_id: u.user_id,
            phone: u.phone,
            email: u.email,
            name: u.name,
            role: u.role,
            registration_status: u.registration_status,
            registration_progress: u.registration_progress,
            phone_verified: u.phone_verified,
            review_notes: u.review_notes,
            created_utc: u.created_utc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trips_through_str() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert_eq!("Pengepul".parse::<Role>().unwrap(), Role::Pengepul);
        assert!("superuser".parse::<Role>().is_err());
    }

    #[test]
    fn test_only_collectors_and_operators_need_approval() {
        assert!(Role::Pengepul.requires_admin_approval());
        assert!(Role::Pengelola.requires_admin_approval());
        assert!(!Role::Masyarakat.requires_admin_approval());
        assert!(!Role::Administrator.requires_admin_approval());
        assert!(!Role::Administrator.is_self_registrable());
    }

    #[test]
    fn test_status_wire_format() {
        let json = serde_json::to_string(&RegistrationStatus::PinVerificationRequired).unwrap();
        assert_eq!(json, "\"pin_verification_required\"");
        for status in RegistrationStatus::ALL {
            assert_eq!(status.as_str().parse::<RegistrationStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_registered_user_starts_incomplete() {
        let id = Identifier::phone("081234567890").unwrap();
        let user = User::registered(&id, Role::Masyarakat);

        assert_eq!(user.phone.as_deref(), Some("6281234567890"));
        assert!(user.phone_verified);
        assert!(!user.email_verified);
        assert_eq!(user.registration_status, RegistrationStatus::Incomplete);
        assert_eq!(user.registration_progress, PROGRESS_OTP_VERIFIED);
        assert!(!user.has_pin());
    }

    #[test]
    fn test_row_with_unknown_role_is_rejected() {
        let now = Utc::now();
        let row = UserRow {
            user_id: Uuid::new_v4(),
            phone: None,
            email: None,
            name: None,
            gender: None,
            address: None,
            role_code: "guest".to_string(),
            registration_status_code: "incomplete".to_string(),
            registration_progress: 1,
            phone_verified: false,
            email_verified: false,
            pin_hash: None,
            review_notes: None,
            reviewed_by: None,
            reviewed_utc: None,
            created_utc: now,
            updated_utc: now,
        };
        assert!(User::try_from(row).is_err());
    }
}
