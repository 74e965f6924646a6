//! HTTP handlers for the onboarding service.

pub mod admin;
pub mod auth;
pub mod metrics;
pub mod pin;
pub mod registration;

use service_core::error::AppError;

use crate::{
    dtos::auth::SessionResponse,
    models::User,
    services::{steps, TokenClaims},
    AppState,
};

/// Replaces the caller's device session with one reflecting `user`'s new state.
pub(crate) async fn reissue_session(
    state: &AppState,
    claims: &TokenClaims,
    user: User,
) -> Result<SessionResponse, AppError> {
    let tokens = state
        .tokens
        .issue_pair(
            user.user_id,
            user.role,
            &claims.device_id,
            user.registration_status,
            user.registration_progress,
        )
        .await?;
    let step = steps::resolve(user.role, user.registration_progress, user.registration_status);
    Ok(SessionResponse::resolved(tokens, user, step))
}
