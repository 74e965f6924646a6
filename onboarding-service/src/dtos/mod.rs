pub mod admin;
pub mod auth;
pub mod pin;
pub mod registration;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Error body shape produced by `AppError`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    #[schema(example = "Registration step not reached")]
    pub error: String,
    #[schema(example = "STEP_NOT_REACHED")]
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    #[schema(example = "Logged out")]
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
