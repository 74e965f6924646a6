use std::sync::Arc;

use tracing::instrument;
use uuid::Uuid;

use crate::{
    config::PinConfig,
    models::{RegistrationStatus, User, PROGRESS_DATA_SUBMITTED},
    utils::{hash_pin, verify_pin, Pin, PinHash},
};

use super::{
    metrics::Metrics,
    steps::{self, RegistrationStep},
    EphemeralStore, ServiceError, TokenPair, TokenService, UserRepository,
};

#[derive(Debug)]
pub enum PinOutcome {
    Verified { user: User, tokens: TokenPair },
    Mismatch { remaining_attempts: u32 },
}

/// Create-once PIN and the final gate before a full token.
#[derive(Clone)]
pub struct PinService {
    config: PinConfig,
    users: Arc<dyn UserRepository>,
    store: Arc<dyn EphemeralStore>,
    tokens: TokenService,
    metrics: Arc<Metrics>,
}

fn attempts_key(user_id: Uuid) -> String {
    format!("pin_attempts:{}", user_id)
}

/// Argon2 is CPU-bound; keep it off the async workers.
async fn hash_off_runtime(pin: Pin) -> Result<PinHash, ServiceError> {
    let hash = tokio::task::spawn_blocking(move || hash_pin(&pin))
        .await
        .map_err(|e| ServiceError::Internal(e.into()))??;
    Ok(hash)
}

async fn verify_off_runtime(pin: Pin, hash: PinHash) -> Result<bool, ServiceError> {
    let matched = tokio::task::spawn_blocking(move || verify_pin(&pin, &hash))
        .await
        .map_err(|e| ServiceError::Internal(e.into()))??;
    Ok(matched)
}

impl PinService {
    pub fn new(
        config: PinConfig,
        users: Arc<dyn UserRepository>,
        store: Arc<dyn EphemeralStore>,
        tokens: TokenService,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config,
            users,
            store,
            tokens,
            metrics,
        }
    }

    /// Stores the PIN hash once. Roles without documents finish registration
    /// here; the others move on to their document step.
    #[instrument(skip(self, pin))]
    pub async fn create_pin(&self, user_id: Uuid, pin: &Pin) -> Result<User, ServiceError> {
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(ServiceError::UserNotFound)?;

        if user.has_pin() {
            self.metrics.pin_event("create", "conflict");
            return Err(ServiceError::PinAlreadySet);
        }

        let info = steps::resolve(user.role, user.registration_progress, user.registration_status);
        if info.step != RegistrationStep::CreatePin {
            return Err(ServiceError::StatusNotAllowed(format!(
                "PIN cannot be created at step {}",
                info.step
            )));
        }

        let (status, progress) = if steps::document_step(user.role).is_some() {
            (RegistrationStatus::OtpVerified, user.registration_progress)
        } else {
            (
                RegistrationStatus::Complete,
                (user.registration_progress + 1).min(PROGRESS_DATA_SUBMITTED),
            )
        };

        let hash = hash_off_runtime(pin.clone()).await?;
        let applied = self
            .users
            .set_pin_if_absent(user_id, hash.as_str(), status, progress)
            .await?;
        if !applied {
            self.metrics.pin_event("create", "conflict");
            return Err(ServiceError::PinAlreadySet);
        }

        self.metrics.pin_event("create", "created");
        tracing::info!(user_id = %user_id, status = %status, "PIN created");

        self.users
            .find_by_id(user_id)
            .await?
            .ok_or(ServiceError::UserNotFound)
    }

    /// Checks the PIN and, on success, issues a pair from the user's
    /// current stored state.
    #[instrument(skip(self, pin))]
    pub async fn verify_pin(
        &self,
        user_id: Uuid,
        device_id: &str,
        pin: &Pin,
    ) -> Result<PinOutcome, ServiceError> {
        // counted before the argon2 check so a parallel burst cannot
        // outrun the lockout
        let key = attempts_key(user_id);
        let attempts = self
            .store
            .incr_window(&key, self.config.lockout_seconds)
            .await? as u32;
        if attempts > self.config.max_attempts {
            return Err(self.locked_out(&key).await?);
        }

        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(ServiceError::UserNotFound)?;
        let stored = user.pin_hash.clone().ok_or(ServiceError::PinNotSet)?;

        if !verify_off_runtime(pin.clone(), PinHash::new(stored)).await? {
            self.metrics.pin_event("verify", "mismatch");
            tracing::warn!(user_id = %user_id, attempts, "Incorrect PIN");

            if attempts >= self.config.max_attempts {
                return Err(self.locked_out(&key).await?);
            }
            return Ok(PinOutcome::Mismatch {
                remaining_attempts: self.config.max_attempts - attempts,
            });
        }

        self.store.delete(&key).await?;
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

        self.metrics.pin_event("verify", "verified");
        tracing::info!(user_id = %user_id, token_type = tokens.token_type.as_str(), "PIN verified");

        Ok(PinOutcome::Verified { user, tokens })
    }

    async fn locked_out(&self, key: &str) -> Result<ServiceError, ServiceError> {
        let retry_after = self
            .store
            .ttl(key)
            .await?
            .unwrap_or(self.config.lockout_seconds);
        self.metrics.pin_event("verify", "locked");
        Ok(ServiceError::RateLimited {
            message: format!("Too many incorrect PIN attempts, try again in {} seconds", retry_after),
            retry_after,
        })
    }
}
