use std::{sync::Arc, time::Duration};

use rand::Rng;
use tracing::instrument;

use crate::{
    config::OtpConfig,
    models::{OtpPurpose, OtpRecord, Role},
    utils::{constant_time_eq, sha256_hex, Identifier},
};

use super::{metrics::Metrics, EphemeralStore, OtpNotifier, ServiceError};

/// Source of numeric codes. Swapped for a fixed code in tests.
pub trait CodeGenerator: Send + Sync {
    fn generate(&self, length: usize) -> String;
}

pub struct RandomCodeGenerator;

impl CodeGenerator for RandomCodeGenerator {
    fn generate(&self, length: usize) -> String {
        let mut rng = rand::thread_rng();
        (0..length)
            .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct OtpHandle {
    pub identifier: Identifier,
    pub purpose: OtpPurpose,
    pub expires_in: u64,
}

/// What a verified code proves.
#[derive(Debug, Clone)]
pub struct OtpContext {
    pub identifier: Identifier,
    pub purpose: OtpPurpose,
    pub role: Option<Role>,
}

#[derive(Debug)]
pub enum OtpOutcome {
    Success(OtpContext),
    Mismatch { remaining_attempts: u32 },
    Expired,
    Exhausted,
    NotFound,
}

impl OtpOutcome {
    fn label(&self) -> &'static str {
        match self {
            OtpOutcome::Success(_) => "verified",
            OtpOutcome::Mismatch { .. } => "mismatch",
            OtpOutcome::Expired => "expired",
            OtpOutcome::Exhausted => "exhausted",
            OtpOutcome::NotFound => "not_found",
        }
    }

    /// Turns every non-success outcome into the matching error.
    pub fn into_context(self) -> Result<OtpContext, ServiceError> {
        match self {
            OtpOutcome::Success(ctx) => Ok(ctx),
            OtpOutcome::Mismatch { remaining_attempts } => {
                Err(ServiceError::OtpMismatch { remaining_attempts })
            }
            OtpOutcome::Expired => Err(ServiceError::OtpExpired),
            OtpOutcome::Exhausted => Err(ServiceError::OtpExhausted),
            OtpOutcome::NotFound => Err(ServiceError::OtpNotFound),
        }
    }
}

/// Issues, throttles and checks one-time codes.
#[derive(Clone)]
pub struct OtpService {
    config: OtpConfig,
    store: Arc<dyn EphemeralStore>,
    notifier: Arc<dyn OtpNotifier>,
    codes: Arc<dyn CodeGenerator>,
    metrics: Arc<Metrics>,
}

impl OtpService {
    pub fn new(
        config: OtpConfig,
        store: Arc<dyn EphemeralStore>,
        notifier: Arc<dyn OtpNotifier>,
        codes: Arc<dyn CodeGenerator>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config,
            store,
            notifier,
            codes,
            metrics,
        }
    }

    fn ttl_for(&self, purpose: OtpPurpose) -> u64 {
        match purpose {
            OtpPurpose::Register => self.config.register_ttl_seconds,
            OtpPurpose::Login => self.config.login_ttl_seconds,
        }
    }

    /// Counts the request against the identifier's window, then stores and
    /// dispatches a fresh code. A new code replaces any outstanding one.
    #[instrument(skip(self), fields(identifier = %identifier))]
    pub async fn request_otp(
        &self,
        identifier: &Identifier,
        purpose: OtpPurpose,
        role: Option<Role>,
    ) -> Result<OtpHandle, ServiceError> {
        let limit_key = format!("otp_limit:{}", identifier.as_str());
        let count = self
            .store
            .incr_window(&limit_key, self.config.request_window_seconds)
            .await?;

        if count > self.config.max_requests {
            let retry_after = self
                .store
                .ttl(&limit_key)
                .await?
                .unwrap_or(self.config.request_window_seconds);
            self.metrics.otp_event(purpose.as_str(), "rate_limited");
            tracing::warn!(count, retry_after, "OTP request rate limited");
            return Err(ServiceError::RateLimited {
                message: format!("Too many OTP requests, try again in {} seconds", retry_after),
                retry_after,
            });
        }

        let code = self.codes.generate(self.config.code_length);
        let ttl = self.ttl_for(purpose);
        let record = OtpRecord::new(
            identifier.as_str().to_string(),
            sha256_hex(&code),
            purpose,
            role,
            ttl,
        );
        let payload = serde_json::to_string(&record)
            .map_err(|e| anyhow::anyhow!("Failed to serialize OTP record: {}", e))?;
        self.store
            .set(&OtpRecord::storage_key(identifier.as_str(), purpose), &payload, ttl)
            .await?;
        self.store
            .delete(&OtpRecord::attempts_key(identifier.as_str(), purpose))
            .await?;

        self.dispatch(identifier.clone(), code, purpose, ttl);
        self.metrics.otp_event(purpose.as_str(), "issued");
        tracing::info!(purpose = %purpose, expires_in = ttl, "OTP issued");

        Ok(OtpHandle {
            identifier: identifier.clone(),
            purpose,
            expires_in: ttl,
        })
    }

    /// Fire-and-forget delivery bounded by the configured timeout.
    fn dispatch(&self, identifier: Identifier, code: String, purpose: OtpPurpose, ttl: u64) {
        let notifier = self.notifier.clone();
        let timeout = Duration::from_secs(self.config.delivery_timeout_seconds);

        tokio::spawn(async move {
            match tokio::time::timeout(timeout, notifier.send_otp(&identifier, &code, purpose, ttl))
                .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(to = %identifier, error = %e, "OTP delivery failed")
                }
                Err(_) => tracing::warn!(to = %identifier, "OTP delivery timed out"),
            }
        });
    }

    #[instrument(skip(self, code), fields(identifier = %identifier))]
    pub async fn verify_otp(
        &self,
        identifier: &Identifier,
        purpose: OtpPurpose,
        code: &str,
    ) -> Result<OtpOutcome, ServiceError> {
        let outcome = self.check(identifier, purpose, code).await?;
        self.metrics.otp_event(purpose.as_str(), outcome.label());
        tracing::info!(purpose = %purpose, outcome = outcome.label(), "OTP verification");
        Ok(outcome)
    }

    async fn check(
        &self,
        identifier: &Identifier,
        purpose: OtpPurpose,
        code: &str,
    ) -> Result<OtpOutcome, ServiceError> {
        let key = OtpRecord::storage_key(identifier.as_str(), purpose);
        let attempts_key = OtpRecord::attempts_key(identifier.as_str(), purpose);
        let Some(raw) = self.store.get(&key).await? else {
            return Ok(OtpOutcome::NotFound);
        };
        let record: OtpRecord = serde_json::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("Corrupt OTP record: {}", e))?;

        if record.is_expired() {
            self.store.delete(&key).await?;
            return Ok(OtpOutcome::Expired);
        }

        // counted before the comparison so parallel guesses each take a slot
        let attempts = self
            .store
            .incr_window(&attempts_key, self.ttl_for(purpose))
            .await? as u32;
        if attempts > self.config.max_attempts {
            self.store.delete(&key).await?;
            return Ok(OtpOutcome::Exhausted);
        }

        if constant_time_eq(&record.code_hash, &sha256_hex(code)) {
            // only one concurrent winner gets to consume the code
            if !self.store.delete(&key).await? {
                return Ok(OtpOutcome::NotFound);
            }
            self.store.delete(&attempts_key).await?;
            return Ok(OtpOutcome::Success(OtpContext {
                identifier: identifier.clone(),
                purpose,
                role: record.role,
            }));
        }

        // the counter outlives the record so late guesses stay exhausted
        if attempts >= self.config.max_attempts {
            self.store.delete(&key).await?;
            return Ok(OtpOutcome::Exhausted);
        }

        Ok(OtpOutcome::Mismatch {
            remaining_attempts: self.config.max_attempts - attempts,
        })
    }
}
