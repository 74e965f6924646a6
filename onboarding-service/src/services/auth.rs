use std::sync::Arc;

use tracing::instrument;

use crate::{
    models::{OtpPurpose, Role, User},
    utils::Identifier,
};

use super::{
    otp::{OtpHandle, OtpService},
    steps::{self, RegistrationStepInfo},
    ServiceError, TokenClaims, TokenPair, TokenService, UserRepository,
};

/// Step name returned after a login OTP when the account already has a PIN.
pub const NEXT_STEP_VERIFY_PIN: &str = "verify_pin";

/// Result of a verified OTP: the user, a fresh pair and where to go next.
#[derive(Debug)]
pub struct OtpLogin {
    pub user: User,
    pub tokens: TokenPair,
    pub purpose: OtpPurpose,
    pub next_step: String,
    pub step: RegistrationStepInfo,
}

/// Ties OTP, credential store and token issuer together for the
/// `/auth` endpoints.
#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserRepository>,
    otp: OtpService,
    tokens: TokenService,
}

impl AuthService {
    pub fn new(users: Arc<dyn UserRepository>, otp: OtpService, tokens: TokenService) -> Self {
        Self { users, otp, tokens }
    }

    /// Register when the identifier is unknown for the role, login otherwise.
    async fn resolve_purpose(
        &self,
        identifier: &Identifier,
        role: Role,
        requested: Option<OtpPurpose>,
    ) -> Result<(OtpPurpose, Option<User>), ServiceError> {
        let existing = self.users.find_by_identifier(identifier, role).await?;
        let purpose = requested.unwrap_or(if existing.is_some() {
            OtpPurpose::Login
        } else {
            OtpPurpose::Register
        });
        Ok((purpose, existing))
    }

    /// Existence checks run before the rate limiter so a rejected request
    /// does not burn an issuance.
    #[instrument(skip(self), fields(identifier = %identifier))]
    pub async fn request_otp(
        &self,
        identifier: &Identifier,
        role: Role,
        purpose: Option<OtpPurpose>,
    ) -> Result<OtpHandle, ServiceError> {
        let (purpose, existing) = self.resolve_purpose(identifier, role, purpose).await?;

        match purpose {
            OtpPurpose::Register => {
                if !role.is_self_registrable() {
                    return Err(ServiceError::InvalidInput(format!(
                        "Role {} cannot self-register",
                        role
                    )));
                }
                if existing.is_some() {
                    return Err(ServiceError::UserAlreadyExists);
                }
            }
            OtpPurpose::Login => {
                if existing.is_none() {
                    return Err(ServiceError::UserNotFound);
                }
            }
        }

        self.otp.request_otp(identifier, purpose, Some(role)).await
    }

    #[instrument(skip(self, code), fields(identifier = %identifier))]
    pub async fn verify_otp(
        &self,
        identifier: &Identifier,
        role: Role,
        purpose: Option<OtpPurpose>,
        code: &str,
        device_id: &str,
    ) -> Result<OtpLogin, ServiceError> {
        let (purpose, existing) = self.resolve_purpose(identifier, role, purpose).await?;
        let context = self
            .otp
            .verify_otp(identifier, purpose, code)
            .await?
            .into_context()?;

        if context.role.is_some_and(|issued_for| issued_for != role) {
            return Err(ServiceError::InvalidInput(
                "Role does not match the OTP request".to_string(),
            ));
        }

        match purpose {
            OtpPurpose::Register => {
                if !role.is_self_registrable() {
                    return Err(ServiceError::InvalidInput(format!(
                        "Role {} cannot self-register",
                        role
                    )));
                }
                let user = User::registered(identifier, role);
                self.users.insert(&user).await?;
                tracing::info!(user_id = %user.user_id, role = %role, "User registered");

                let tokens = self
                    .tokens
                    .issue_pair(
                        user.user_id,
                        user.role,
                        device_id,
                        user.registration_status,
                        user.registration_progress,
                    )
                    .await?;
                let step = steps::resolve(user.role, user.registration_progress, user.registration_status);

                Ok(OtpLogin {
                    next_step: step.step.as_str().to_string(),
                    user,
                    tokens,
                    purpose,
                    step,
                })
            }
            OtpPurpose::Login => {
                let user = existing.ok_or(ServiceError::UserNotFound)?;
                let tokens = self
                    .tokens
                    .issue_partial_pair(
                        user.user_id,
                        user.role,
                        device_id,
                        user.registration_status,
                        user.registration_progress,
                    )
                    .await?;
                let step = steps::resolve(user.role, user.registration_progress, user.registration_status);
                let next_step = if user.has_pin() {
                    NEXT_STEP_VERIFY_PIN.to_string()
                } else {
                    step.step.as_str().to_string()
                };
                tracing::info!(user_id = %user.user_id, next_step = %next_step, "Login OTP verified");

                Ok(OtpLogin {
                    user,
                    tokens,
                    purpose,
                    next_step,
                    step,
                })
            }
        }
    }

    /// Rotates the pair bound to `device_id`.
    #[instrument(skip(self, refresh_token))]
    pub async fn refresh(
        &self,
        refresh_token: &str,
        device_id: &str,
    ) -> Result<(User, TokenPair), ServiceError> {
        let owner = self
            .tokens
            .refresh_token_owner(refresh_token)
            .await?
            .ok_or(ServiceError::InvalidToken)?;
        let user = self
            .users
            .find_by_id(owner)
            .await?
            .ok_or(ServiceError::InvalidToken)?;

        let tokens = self.tokens.refresh(&user, device_id, refresh_token).await?;
        Ok((user, tokens))
    }

    /// Ends the caller's device session and blocks the presented access token.
    #[instrument(skip(self, claims), fields(user_id = %claims.sub))]
    pub async fn logout(&self, claims: &TokenClaims) -> Result<(), ServiceError> {
        self.tokens.revoke(claims.sub, &claims.device_id).await?;
        self.tokens.deny_access_token(claims).await?;
        tracing::info!(user_id = %claims.sub, "Logged out");
        Ok(())
    }
}
