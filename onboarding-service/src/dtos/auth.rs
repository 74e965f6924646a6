use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    models::{OtpPurpose, RegistrationStatus, Role, User, UserResponse},
    services::{steps::RegistrationStepInfo, TokenClaims, TokenPair, TokenType},
    utils::{Identifier, IdentifierError},
};

/// Phone or email. At least one is required; phone wins when both are sent.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RequestOtpRequest {
    #[validate(length(min = 8, max = 20, message = "Invalid phone number"))]
    #[schema(example = "081234567890")]
    pub phone: Option<String>,

    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "budi@example.com")]
    pub email: Option<String>,

    #[schema(example = "masyarakat")]
    pub role: Role,

    /// Detected from account existence when omitted.
    pub purpose: Option<OtpPurpose>,
}

impl RequestOtpRequest {
    pub fn identifier(&self) -> Result<Identifier, IdentifierError> {
        Identifier::from_parts(self.phone.as_deref(), self.email.as_deref())
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RequestOtpResponse {
    #[schema(example = "OTP sent")]
    pub message: String,
    pub purpose: OtpPurpose,
    /// Seconds until the code expires
    #[schema(example = 300)]
    pub expires_in: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = "6281*****7890")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl RequestOtpResponse {
    pub fn new(identifier: &Identifier, purpose: OtpPurpose, expires_in: u64) -> Self {
        let masked = identifier.masked();
        let (phone, email) = if identifier.is_phone() {
            (Some(masked), None)
        } else {
            (None, Some(masked))
        };
        Self {
            message: "OTP sent".to_string(),
            purpose,
            expires_in,
            phone,
            email,
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct VerifyOtpRequest {
    #[validate(length(min = 8, max = 20, message = "Invalid phone number"))]
    #[schema(example = "081234567890")]
    pub phone: Option<String>,

    #[validate(email(message = "Invalid email format"))]
    pub email: Option<String>,

    #[validate(length(min = 4, max = 8, message = "OTP must be 4 to 8 digits"))]
    #[schema(example = "1234")]
    pub otp: String,

    #[schema(example = "masyarakat")]
    pub role: Role,

    #[validate(length(min = 1, max = 128, message = "device_id is required"))]
    #[schema(example = "android-6f1c2a")]
    pub device_id: String,

    pub purpose: Option<OtpPurpose>,
}

impl VerifyOtpRequest {
    pub fn identifier(&self) -> Result<Identifier, IdentifierError> {
        Identifier::from_parts(self.phone.as_deref(), self.email.as_deref())
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RefreshRequest {
    #[validate(length(min = 1, message = "refresh_token is required"))]
    #[schema(example = "kq3c1L0f0Yb3...")]
    pub refresh_token: String,
}

/// Tokens plus where the client goes next.
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: TokenType,
    /// Access token lifetime in seconds
    #[schema(example = 900)]
    pub expires_in: i64,
    pub session_id: Uuid,
    #[schema(example = "complete_profile")]
    pub next_step: String,
    pub registration: RegistrationStepInfo,
    pub user: UserResponse,
}

impl SessionResponse {
    pub fn new(
        tokens: TokenPair,
        user: User,
        registration: RegistrationStepInfo,
        next_step: impl Into<String>,
    ) -> Self {
        Self {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            token_type: tokens.token_type,
            expires_in: tokens.expires_in,
            session_id: tokens.session_id,
            next_step: next_step.into(),
            registration,
            user: user.into(),
        }
    }

    /// Next step is the resolved one.
    pub fn resolved(tokens: TokenPair, user: User, registration: RegistrationStepInfo) -> Self {
        let next_step = registration.step.as_str();
        Self::new(tokens, user, registration, next_step)
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RegistrationStatusResponse {
    pub user_id: Uuid,
    pub role: Role,
    pub registration_status: RegistrationStatus,
    pub registration_progress: i32,
    pub token_type: TokenType,
    pub registration: RegistrationStepInfo,
}

impl From<(TokenClaims, RegistrationStepInfo)> for RegistrationStatusResponse {
    fn from((claims, registration): (TokenClaims, RegistrationStepInfo)) -> Self {
        Self {
            user_id: claims.sub,
            role: claims.role,
            registration_status: claims.registration_status,
            registration_progress: claims.registration_progress,
            token_type: claims.token_type,
            registration,
        }
    }
}
