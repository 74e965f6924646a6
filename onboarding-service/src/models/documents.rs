//! Role-specific registration documents.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Identity card submitted by a pengepul.
#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
pub struct IdentityCard {
    pub user_id: Uuid,
    pub identity_number: String,
    pub full_name: String,
    pub address: String,
    pub photo_url: String,
    pub submitted_utc: DateTime<Utc>,
}

/// Company profile submitted by a pengelola.
#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
pub struct CompanyProfile {
    pub user_id: Uuid,
    pub company_name: String,
    pub company_address: String,
    pub company_phone: String,
    pub company_email: Option<String>,
    pub photo_url: String,
    pub submitted_utc: DateTime<Utc>,
}
