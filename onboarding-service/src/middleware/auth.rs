use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use serde_json::json;
use service_core::error::AppError;

use crate::{
    models::{RegistrationStatus, Role},
    services::{
        steps::{self, RegistrationStep, RegistrationStepInfo},
        TokenClaims, TokenType,
    },
    AppState,
};

/// Validated caller attached to the request by [`authorize`].
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub claims: TokenClaims,
    pub step: RegistrationStepInfo,
}

/// What a route demands of the caller. Checks run in a fixed order:
/// token type, role, status, minimum step, approval.
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    token_type: Option<TokenType>,
    roles: Vec<Role>,
    statuses: Vec<RegistrationStatus>,
    min_step: Option<RegistrationStep>,
    allow_awaiting_approval: bool,
}

impl AccessPolicy {
    /// Any valid bearer token.
    pub fn authenticated() -> Self {
        Self::default()
    }

    pub fn token_type(mut self, token_type: TokenType) -> Self {
        self.token_type = Some(token_type);
        self
    }

    pub fn roles(mut self, roles: impl IntoIterator<Item = Role>) -> Self {
        self.roles = roles.into_iter().collect();
        self
    }

    pub fn statuses(mut self, statuses: impl IntoIterator<Item = RegistrationStatus>) -> Self {
        self.statuses = statuses.into_iter().collect();
        self
    }

    /// Caller's current step must be at or past `step` in their role's flow.
    pub fn min_step(mut self, step: RegistrationStep) -> Self {
        self.min_step = Some(step);
        self
    }

    /// Let callers waiting on a review through.
    pub fn allow_awaiting_approval(mut self) -> Self {
        self.allow_awaiting_approval = true;
        self
    }

    /// First failing check wins.
    pub fn evaluate(&self, claims: &TokenClaims, step: &RegistrationStepInfo) -> Result<(), AppError> {
        if let Some(required) = self.token_type {
            if claims.token_type != required {
                return Err(AppError::forbidden(
                    "TOKEN_TYPE_REQUIRED",
                    format!("A {} token is required", required.as_str()),
                )
                .with_details(json!({
                    "token_type": claims.token_type.as_str(),
                    "required_token_type": required.as_str(),
                    "current_step": step.step.as_str(),
                })));
            }
        }

        if !self.roles.is_empty() && !self.roles.contains(&claims.role) {
            return Err(AppError::forbidden(
                "ROLE_NOT_ALLOWED",
                format!("Role {} may not access this resource", claims.role),
            )
            .with_details(json!({
                "role": claims.role.as_str(),
                "allowed_roles": self.roles.iter().map(Role::as_str).collect::<Vec<_>>(),
            })));
        }

        if !self.statuses.is_empty() && !self.statuses.contains(&claims.registration_status) {
            return Err(AppError::forbidden(
                "STATUS_NOT_ALLOWED",
                format!(
                    "Registration status {} does not allow this action",
                    claims.registration_status
                ),
            )
            .with_details(json!({
                "registration_status": claims.registration_status.as_str(),
                "allowed_statuses": self
                    .statuses
                    .iter()
                    .map(RegistrationStatus::as_str)
                    .collect::<Vec<_>>(),
                "current_step": step.step.as_str(),
            })));
        }

        if let Some(required) = self.min_step {
            let reached = match steps::step_position(claims.role, required) {
                Some(position) => step.step_number >= position,
                None => false,
            };
            if !reached {
                return Err(AppError::forbidden(
                    "STEP_NOT_REACHED",
                    format!("Complete {} first", step.step.as_str()),
                )
                .with_details(json!({
                    "current_step": step.step.as_str(),
                    "required_step": required.as_str(),
                })));
            }
        }

        if !step.is_accessible && !self.allow_awaiting_approval {
            return Err(AppError::forbidden(
                "AWAITING_APPROVAL",
                "Registration is waiting for administrator approval",
            )
            .with_details(json!({
                "current_step": step.step.as_str(),
                "registration_status": claims.registration_status.as_str(),
            })));
        }

        Ok(())
    }
}

/// State for [`authorize`]: the app plus the route group's policy.
#[derive(Clone)]
pub struct AccessGuard {
    pub state: AppState,
    pub policy: Arc<AccessPolicy>,
}

impl AccessGuard {
    pub fn new(state: &AppState, policy: AccessPolicy) -> Self {
        Self {
            state: state.clone(),
            policy: Arc::new(policy),
        }
    }
}

fn bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Validates the bearer token, applies the policy and attaches an
/// [`AuthContext`].
pub async fn authorize(
    State(guard): State<AccessGuard>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(&req).ok_or_else(|| {
        AppError::Unauthenticated("Missing or invalid Authorization header".to_string())
    })?;

    let claims = guard.state.tokens.validate(token).await?;
    let step = claims.step();

    if let Err(denied) = guard.policy.evaluate(&claims, &step) {
        guard.state.metrics.access_denied(denied.code());
        tracing::warn!(
            user_id = %claims.sub,
            role = %claims.role,
            code = denied.code(),
            path = %req.uri().path(),
            "Access denied"
        );
        return Err(denied);
    }

    req.extensions_mut().insert(AuthContext { claims, step });

    Ok(next.run(req).await)
}

/// Extractor to easily get the caller in handlers
pub struct AuthUser(pub AuthContext);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let context = parts.extensions.get::<AuthContext>().ok_or_else(|| {
            AppError::InternalError(anyhow::anyhow!(
                "Auth context missing from request extensions"
            ))
        })?;

        Ok(AuthUser(context.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn claims(role: Role, status: RegistrationStatus, progress: i32) -> TokenClaims {
        let step = steps::resolve(role, progress, status);
        TokenClaims {
            sub: Uuid::new_v4(),
            role,
            device_id: "device-1".to_string(),
            token_type: TokenType::for_step(&step, status),
            registration_status: status,
            registration_progress: progress,
            sid: Uuid::new_v4(),
            iss: "onboarding-service".to_string(),
            iat: Utc::now().timestamp(),
            exp: Utc::now().timestamp() + 900,
            jti: Uuid::new_v4().to_string(),
        }
    }

    fn check(policy: &AccessPolicy, claims: &TokenClaims) -> Result<(), &'static str> {
        policy.evaluate(claims, &claims.step()).map_err(|e| e.code())
    }

    #[test]
    fn test_token_type_checked_before_role() {
        let policy = AccessPolicy::authenticated()
            .token_type(TokenType::Full)
            .roles([Role::Administrator]);
        let partial = claims(Role::Masyarakat, RegistrationStatus::Incomplete, 1);
        assert_eq!(check(&policy, &partial), Err("TOKEN_TYPE_REQUIRED"));

        let full = claims(Role::Masyarakat, RegistrationStatus::Complete, 2);
        assert_eq!(check(&policy, &full), Err("ROLE_NOT_ALLOWED"));

        let admin = claims(Role::Administrator, RegistrationStatus::Complete, 2);
        assert_eq!(check(&policy, &admin), Ok(()));
    }

    #[test]
    fn test_status_then_step() {
        let policy = AccessPolicy::authenticated()
            .statuses([RegistrationStatus::Incomplete, RegistrationStatus::PinVerificationRequired])
            .min_step(RegistrationStep::CreatePin);

        let before_profile = claims(Role::Masyarakat, RegistrationStatus::Incomplete, 1);
        assert_eq!(check(&policy, &before_profile), Err("STEP_NOT_REACHED"));

        let ready = claims(Role::Masyarakat, RegistrationStatus::PinVerificationRequired, 1);
        assert_eq!(check(&policy, &ready), Ok(()));

        // administrators skip the profile step
        let admin = claims(Role::Administrator, RegistrationStatus::Incomplete, 1);
        assert_eq!(check(&policy, &admin), Ok(()));

        let done = claims(Role::Masyarakat, RegistrationStatus::Complete, 2);
        assert_eq!(check(&policy, &done), Err("STATUS_NOT_ALLOWED"));
    }

    #[test]
    fn test_step_details_tell_client_where_to_go() {
        let policy = AccessPolicy::authenticated().min_step(RegistrationStep::CreatePin);
        let caller = claims(Role::Pengepul, RegistrationStatus::Incomplete, 1);
        let err = policy.evaluate(&caller, &caller.step()).unwrap_err();

        match err {
            AppError::Forbidden { code, details, .. } => {
                assert_eq!(code, "STEP_NOT_REACHED");
                let details = details.unwrap();
                assert_eq!(details["current_step"], "complete_profile");
                assert_eq!(details["required_step"], "create_pin");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_pending_review_blocks_unless_allowed() {
        let waiting = claims(Role::Pengepul, RegistrationStatus::Pending, 2);
        let policy = AccessPolicy::authenticated();
        assert_eq!(check(&policy, &waiting), Err("AWAITING_APPROVAL"));
        assert_eq!(
            check(&AccessPolicy::authenticated().allow_awaiting_approval(), &waiting),
            Ok(())
        );
    }

    #[test]
    fn test_step_outside_role_flow_is_never_reached() {
        let policy = AccessPolicy::authenticated().min_step(RegistrationStep::UploadIdentityCard);
        let caller = claims(Role::Masyarakat, RegistrationStatus::Complete, 2);
        assert_eq!(check(&policy, &caller), Err("STEP_NOT_REACHED"));
    }
}
