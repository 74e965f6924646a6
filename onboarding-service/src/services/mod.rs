//! Services layer for the onboarding service.
//!
//! Engines for OTP, PIN, registration and approval, plus the stores and
//! token issuer they share.

pub mod approval;
pub mod auth;
pub mod error;
pub mod metrics;
mod notifier;
pub mod otp;
pub mod pin;
pub mod registration;
pub mod steps;
mod store;
mod token;
mod users;

pub use approval::{ApprovalError, ApprovalService, BulkReport, ReviewAction, ReviewOutcome};
pub use auth::{AuthService, OtpLogin};
pub use error::ServiceError;
pub use metrics::Metrics;
pub use notifier::{HttpOtpNotifier, LogOtpNotifier, MockOtpNotifier, OtpNotifier, SentOtp};
pub use otp::{CodeGenerator, OtpOutcome, OtpService, RandomCodeGenerator};
pub use pin::{PinOutcome, PinService};
pub use registration::RegistrationService;
pub use steps::{RegistrationStep, RegistrationStepInfo};
pub use store::{EphemeralStore, MemoryStore, RedisStore};
pub use token::{TokenClaims, TokenPair, TokenService, TokenType};
pub use users::{MemoryUserRepository, PgUserRepository, UserRepository};
