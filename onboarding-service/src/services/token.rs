use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    config::JwtConfig,
    models::{RegistrationStatus, Role, SessionRecord, User},
    utils::{constant_time_eq, sha256_hex},
};

use super::{
    steps::{self, RegistrationStepInfo},
    EphemeralStore, ServiceError,
};

const REFRESH_TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    /// Registration or login still in progress.
    Partial,
    /// All steps done; unlocks the rest of the API.
    Full,
}

impl TokenType {
    /// Full only when the role's last step is reached and the user is not rejected.
    pub fn for_step(info: &RegistrationStepInfo, status: RegistrationStatus) -> Self {
        if info.is_completed && status != RegistrationStatus::Rejected {
            TokenType::Full
        } else {
            TokenType::Partial
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Partial => "partial",
            TokenType::Full => "full",
        }
    }
}

/// Claims carried by every access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject (user ID)
    pub sub: Uuid,
    pub role: Role,
    pub device_id: String,
    pub token_type: TokenType,
    pub registration_status: RegistrationStatus,
    pub registration_progress: i32,
    /// Session the token belongs to
    pub sid: Uuid,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    /// JWT ID (for the deny list)
    pub jti: String,
}

impl TokenClaims {
    pub fn step(&self) -> RegistrationStepInfo {
        steps::resolve(self.role, self.registration_progress, self.registration_status)
    }
}

/// Token pair returned to clients.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: TokenType,
    /// Access token lifetime in seconds
    pub expires_in: i64,
    pub session_id: Uuid,
}

/// Signs access tokens and owns the device sessions behind refresh tokens.
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    store: Arc<dyn EphemeralStore>,
    access_token_expiry_minutes: i64,
    refresh_token_expiry_days: i64,
}

impl TokenService {
    pub fn new(config: &JwtConfig, store: Arc<dyn EphemeralStore>) -> Self {
        tracing::info!("Token service initialized with HS256 key");

        Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            issuer: config.issuer.clone(),
            store,
            access_token_expiry_minutes: config.access_token_expiry_minutes,
            refresh_token_expiry_days: config.refresh_token_expiry_days,
        }
    }

    /// Access token lifetime in seconds.
    pub fn access_token_expiry_seconds(&self) -> i64 {
        self.access_token_expiry_minutes * 60
    }

    fn refresh_ttl_seconds(&self) -> u64 {
        (self.refresh_token_expiry_days * 24 * 60 * 60) as u64
    }

    /// Issues a pair whose class follows from the resolved step.
    #[instrument(skip(self))]
    pub async fn issue_pair(
        &self,
        user_id: Uuid,
        role: Role,
        device_id: &str,
        status: RegistrationStatus,
        progress: i32,
    ) -> Result<TokenPair, ServiceError> {
        let info = steps::resolve(role, progress, status);
        let token_type = TokenType::for_step(&info, status);
        self.issue(
            user_id,
            role,
            device_id,
            status,
            progress,
            token_type,
            SessionOrigin::Fresh { partial_only: false },
        )
        .await
    }

    /// Issues a pair that is never full, whatever the user's state.
    #[instrument(skip(self))]
    pub async fn issue_partial_pair(
        &self,
        user_id: Uuid,
        role: Role,
        device_id: &str,
        status: RegistrationStatus,
        progress: i32,
    ) -> Result<TokenPair, ServiceError> {
        self.issue(
            user_id,
            role,
            device_id,
            status,
            progress,
            TokenType::Partial,
            SessionOrigin::Fresh { partial_only: true },
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn issue(
        &self,
        user_id: Uuid,
        role: Role,
        device_id: &str,
        status: RegistrationStatus,
        progress: i32,
        token_type: TokenType,
        origin: SessionOrigin<'_>,
    ) -> Result<TokenPair, ServiceError> {
        let refresh_token = generate_refresh_token();
        let refresh_hash = sha256_hex(&refresh_token);
        let session_key = SessionRecord::storage_key(user_id, device_id);
        let ttl = self.refresh_ttl_seconds();

        // One live refresh token per device: drop the previous lookup
        let previous_hash = match origin {
            SessionOrigin::Rotated(current) => Some(current.refresh_token_hash.clone()),
            SessionOrigin::Fresh { .. } => self
                .load_session(user_id, device_id)
                .await?
                .map(|s| s.refresh_token_hash),
        };
        if let Some(previous_hash) = previous_hash {
            self.store
                .delete(&SessionRecord::refresh_lookup_key(&previous_hash))
                .await?;
        }

        let session = match origin {
            SessionOrigin::Rotated(current) => current.rotated(refresh_hash.clone()),
            SessionOrigin::Fresh { partial_only } => {
                SessionRecord::new(user_id, device_id, role, refresh_hash.clone(), partial_only)
            }
        };

        let payload = serde_json::to_string(&session)
            .map_err(|e| anyhow::anyhow!("Failed to serialize session: {}", e))?;
        self.store.set(&session_key, &payload, ttl).await?;
        self.store
            .set_add(&SessionRecord::index_key(user_id), device_id, ttl)
            .await?;
        self.store
            .set(
                &SessionRecord::refresh_lookup_key(&refresh_hash),
                &user_id.to_string(),
                ttl,
            )
            .await?;

        let access_token = self.encode_access_token(
            user_id,
            role,
            device_id,
            status,
            progress,
            token_type,
            session.session_id,
        )?;

        tracing::info!(
            user_id = %user_id,
            session_id = %session.session_id,
            token_type = token_type.as_str(),
            "Issued token pair"
        );

        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type,
            expires_in: self.access_token_expiry_seconds(),
            session_id: session.session_id,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn encode_access_token(
        &self,
        user_id: Uuid,
        role: Role,
        device_id: &str,
        status: RegistrationStatus,
        progress: i32,
        token_type: TokenType,
        session_id: Uuid,
    ) -> Result<String, ServiceError> {
        let now = Utc::now();
        let exp = now + Duration::minutes(self.access_token_expiry_minutes);

        let claims = TokenClaims {
            sub: user_id,
            role,
            device_id: device_id.to_string(),
            token_type,
            registration_status: status,
            registration_progress: progress,
            sid: session_id,
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Failed to encode access token: {}", e)))
    }

    /// Validates signature, expiry, issuer and the deny list. Every failure
    /// is reported as the same `InvalidToken`.
    pub async fn validate(&self, token: &str) -> Result<TokenClaims, ServiceError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_issuer(&[&self.issuer]);

        let claims = decode::<TokenClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| {
                tracing::debug!(error = %e, "Access token rejected");
                ServiceError::InvalidToken
            })?
            .claims;

        if self.store.exists(&deny_key(&claims.jti)).await? {
            tracing::debug!(jti = %claims.jti, "Access token is deny-listed");
            return Err(ServiceError::InvalidToken);
        }

        Ok(claims)
    }

    async fn load_session(
        &self,
        user_id: Uuid,
        device_id: &str,
    ) -> Result<Option<SessionRecord>, ServiceError> {
        let raw = self
            .store
            .get(&SessionRecord::storage_key(user_id, device_id))
            .await?;

        match raw {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Corrupt session record: {}", e))),
            None => Ok(None),
        }
    }

    /// True when the token's session is still the live one for its device.
    pub async fn is_session_active(&self, claims: &TokenClaims) -> Result<bool, ServiceError> {
        let session = self.load_session(claims.sub, &claims.device_id).await?;
        Ok(session.is_some_and(|s| s.active && s.session_id == claims.sid))
    }

    /// Owner of a refresh token, if it is still live.
    pub async fn refresh_token_owner(&self, refresh_token: &str) -> Result<Option<Uuid>, ServiceError> {
        let owner = self
            .store
            .get(&SessionRecord::refresh_lookup_key(&sha256_hex(refresh_token)))
            .await?;
        Ok(owner.and_then(|id| Uuid::parse_str(&id).ok()))
    }

    /// Rotates the pair for `device_id`. The refresh token must be the one
    /// bound to that device's session.
    #[instrument(skip(self, user, refresh_token), fields(user_id = %user.user_id))]
    pub async fn refresh(
        &self,
        user: &User,
        device_id: &str,
        refresh_token: &str,
    ) -> Result<TokenPair, ServiceError> {
        let session = self
            .load_session(user.user_id, device_id)
            .await?
            .ok_or(ServiceError::InvalidToken)?;

        if !session.active || !constant_time_eq(&session.refresh_token_hash, &sha256_hex(refresh_token)) {
            tracing::warn!(user_id = %user.user_id, "Refresh token does not match device session");
            return Err(ServiceError::InvalidToken);
        }

        let token_type = if session.partial_only {
            TokenType::Partial
        } else {
            let info = steps::resolve(user.role, user.registration_progress, user.registration_status);
            TokenType::for_step(&info, user.registration_status)
        };

        self.issue(
            user.user_id,
            user.role,
            device_id,
            user.registration_status,
            user.registration_progress,
            token_type,
            SessionOrigin::Rotated(&session),
        )
        .await
    }

    /// Ends one device session.
    #[instrument(skip(self))]
    pub async fn revoke(&self, user_id: Uuid, device_id: &str) -> Result<bool, ServiceError> {
        let Some(session) = self.load_session(user_id, device_id).await? else {
            self.store
                .set_remove(&SessionRecord::index_key(user_id), device_id)
                .await?;
            return Ok(false);
        };

        self.store
            .delete(&SessionRecord::refresh_lookup_key(&session.refresh_token_hash))
            .await?;
        self.store
            .delete(&SessionRecord::storage_key(user_id, device_id))
            .await?;
        self.store
            .set_remove(&SessionRecord::index_key(user_id), device_id)
            .await?;

        tracing::info!(user_id = %user_id, session_id = %session.session_id, "Session revoked");
        Ok(true)
    }

    /// Ends every session of the user. Returns how many were live.
    #[instrument(skip(self))]
    pub async fn revoke_all(&self, user_id: Uuid) -> Result<usize, ServiceError> {
        let index_key = SessionRecord::index_key(user_id);
        let devices = self.store.set_members(&index_key).await?;

        let mut revoked = 0;
        for device_id in &devices {
            if self.revoke(user_id, device_id).await? {
                revoked += 1;
            }
        }
        self.store.delete(&index_key).await?;

        tracing::info!(user_id = %user_id, revoked, "All sessions revoked");
        Ok(revoked)
    }

    /// Blocks an access token for the rest of its lifetime.
    pub async fn deny_access_token(&self, claims: &TokenClaims) -> Result<(), ServiceError> {
        let remaining = claims.exp - Utc::now().timestamp();
        if remaining > 0 {
            self.store
                .set(&deny_key(&claims.jti), "revoked", remaining as u64)
                .await?;
        }
        Ok(())
    }
}

/// Where a newly issued session comes from.
#[derive(Clone, Copy)]
enum SessionOrigin<'a> {
    /// OTP, PIN or a state change; replaces whatever the device held.
    Fresh { partial_only: bool },
    /// Refresh of the device's live session.
    Rotated(&'a SessionRecord),
}

fn deny_key(jti: &str) -> String {
    format!("blacklist:{}", jti)
}

fn generate_refresh_token() -> String {
    let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
