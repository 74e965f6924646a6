use serde::Deserialize;
use utoipa::ToSchema;
use validator::Validate;

use crate::utils::validation::validate_pin_format;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreatePinRequest {
    #[validate(custom(function = "validate_pin_format", message = "PIN must be 6 digits"))]
    #[schema(example = "112233", min_length = 6, max_length = 6)]
    pub userpin: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct VerifyPinRequest {
    #[validate(custom(function = "validate_pin_format", message = "PIN must be 6 digits"))]
    #[schema(example = "112233", min_length = 6, max_length = 6)]
    pub userpin: String,

    /// Must match the device the token was issued to.
    #[validate(length(min = 1, max = 128, message = "device_id is required"))]
    #[schema(example = "android-6f1c2a")]
    pub device_id: String,
}
