pub mod documents;
pub mod otp;
pub mod session;
pub mod user;

pub use documents::{CompanyProfile, IdentityCard};
pub use otp::{OtpPurpose, OtpRecord};
pub use session::SessionRecord;
pub use user::{
    ProfileUpdate, RegistrationStatus, Role, User, UserResponse, UserRow, PROGRESS_DATA_SUBMITTED,
    PROGRESS_NONE, PROGRESS_OTP_VERIFIED,
};
