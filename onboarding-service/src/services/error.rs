use service_core::error::AppError;
use thiserror::Error;

use super::approval::ApprovalError;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid token")]
    InvalidToken,

    #[error("{message}")]
    RateLimited { message: String, retry_after: u64 },

    #[error("User not found")]
    UserNotFound,

    #[error("User already exists")]
    UserAlreadyExists,

    #[error("PIN already set")]
    PinAlreadySet,

    #[error("PIN not set")]
    PinNotSet,

    #[error("Incorrect PIN")]
    PinMismatch { remaining_attempts: u32 },

    #[error("Invalid OTP code")]
    OtpMismatch { remaining_attempts: u32 },

    #[error("OTP expired")]
    OtpExpired,

    #[error("OTP attempts exhausted")]
    OtpExhausted,

    #[error("OTP not found")]
    OtpNotFound,

    #[error("Registration status does not allow this action: {0}")]
    StatusNotAllowed(String),

    #[error("Device mismatch")]
    DeviceMismatch,

    #[error(transparent)]
    Approval(#[from] ApprovalError),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Database(e) => AppError::InternalError(anyhow::Error::new(e)),
            ServiceError::Internal(e) => AppError::InternalError(e),
            ServiceError::InvalidInput(msg) => AppError::InvalidInput(msg),
            ServiceError::InvalidToken => {
                AppError::Unauthenticated("Invalid or expired token".to_string())
            }
            ServiceError::RateLimited {
                message,
                retry_after,
            } => AppError::RateLimited(message, Some(retry_after)),
            ServiceError::UserNotFound => AppError::NotFound("User not found".to_string()),
            ServiceError::UserAlreadyExists => {
                AppError::Conflict("User already registered for this role".to_string())
            }
            ServiceError::PinAlreadySet => AppError::Conflict("PIN already set".to_string()),
            ServiceError::PinNotSet => {
                AppError::forbidden("PIN_NOT_SET", "PIN has not been created yet")
            }
            ServiceError::PinMismatch { remaining_attempts } => AppError::Unauthenticated(
                format!("Incorrect PIN, {} attempts remaining", remaining_attempts),
            ),
            ServiceError::OtpMismatch { remaining_attempts } => AppError::Unauthenticated(
                format!("Invalid OTP code, {} attempts remaining", remaining_attempts),
            ),
            ServiceError::OtpExpired => {
                AppError::InvalidInput("OTP has expired, request a new code".to_string())
            }
            ServiceError::OtpExhausted => AppError::RateLimited(
                "Too many incorrect attempts, request a new code".to_string(),
                None,
            ),
            ServiceError::OtpNotFound => {
                AppError::NotFound("OTP not found or already used".to_string())
            }
            ServiceError::StatusNotAllowed(msg) => AppError::forbidden("STATUS_NOT_ALLOWED", msg),
            ServiceError::DeviceMismatch => AppError::forbidden(
                "DEVICE_MISMATCH",
                "Device does not match the authenticated session",
            ),
            ServiceError::Approval(e) => e.into(),
        }
    }
}
