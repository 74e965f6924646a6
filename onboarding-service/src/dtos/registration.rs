use serde::Deserialize;
use utoipa::ToSchema;
use validator::Validate;

use crate::utils::validation::validate_identity_number;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ProfileRequest {
    #[validate(length(min = 1, max = 100, message = "Name is required"))]
    #[schema(example = "Budi Santoso")]
    pub name: String,

    #[validate(length(min = 1, max = 20, message = "Gender is required"))]
    #[schema(example = "male")]
    pub gender: String,

    #[validate(length(min = 1, max = 255, message = "Address is required"))]
    #[schema(example = "Jl. Merdeka No. 1, Bandung")]
    pub address: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct IdentityCardRequest {
    #[validate(custom(
        function = "validate_identity_number",
        message = "Identity number must be 16 digits"
    ))]
    #[schema(example = "3201234567890001")]
    pub identity_number: String,

    #[validate(length(min = 1, max = 100, message = "Full name is required"))]
    #[schema(example = "Budi Santoso")]
    pub full_name: String,

    #[validate(length(min = 1, max = 255, message = "Address is required"))]
    pub address: String,

    #[validate(url(message = "Invalid photo URL"))]
    #[schema(example = "https://files.example.com/ktp/budi.jpg")]
    pub photo_url: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CompanyProfileRequest {
    #[validate(length(min = 1, max = 150, message = "Company name is required"))]
    #[schema(example = "PT Bank Sampah Sejahtera")]
    pub company_name: String,

    #[validate(length(min = 1, max = 255, message = "Company address is required"))]
    pub company_address: String,

    #[validate(length(min = 8, max = 20, message = "Invalid company phone"))]
    #[schema(example = "0221234567")]
    pub company_phone: String,

    #[validate(email(message = "Invalid email format"))]
    pub company_email: Option<String>,

    #[validate(url(message = "Invalid photo URL"))]
    pub photo_url: String,
}
