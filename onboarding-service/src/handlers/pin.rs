use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::{
    dtos::{
        auth::SessionResponse,
        pin::{CreatePinRequest, VerifyPinRequest},
    },
    middleware::{normalize_device_id, AuthUser},
    services::{steps, PinOutcome, ServiceError},
    utils::{Pin, ValidatedJson},
    AppState,
};

use super::reissue_session;

fn parse_pin(raw: &str) -> Result<Pin, AppError> {
    Pin::parse(raw).map_err(|e| AppError::InvalidInput(e.to_string()))
}

/// Create the account PIN (once)
#[utoipa::path(
    post,
    path = "/pin/create",
    request_body = CreatePinRequest,
    responses(
        (status = 201, description = "PIN stored", body = SessionResponse),
        (status = 403, description = "Not at the PIN step", body = ErrorResponse),
        (status = 409, description = "PIN already set", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "PIN",
    security(("bearer_auth" = []))
)]
pub async fn create_pin(
    State(state): State<AppState>,
    AuthUser(context): AuthUser,
    ValidatedJson(req): ValidatedJson<CreatePinRequest>,
) -> Result<impl IntoResponse, AppError> {
    let pin = parse_pin(&req.userpin)?;
    let claims = context.claims;

    let user = state.pin.create_pin(claims.sub, &pin).await?;
    let response = reissue_session(&state, &claims, user).await?;

    Ok((StatusCode::CREATED, Json(response)))
}

/// Verify the PIN and receive tokens for the current stored state
#[utoipa::path(
    post,
    path = "/pin/verif",
    request_body = VerifyPinRequest,
    params(("X-Device-ID" = String, Header, description = "Device the token was issued to")),
    responses(
        (status = 200, description = "PIN accepted", body = SessionResponse),
        (status = 401, description = "Wrong PIN", body = ErrorResponse),
        (status = 403, description = "Device mismatch or PIN not set", body = ErrorResponse),
        (status = 429, description = "Locked out", body = ErrorResponse)
    ),
    tag = "PIN",
    security(("bearer_auth" = []))
)]
pub async fn verify_pin(
    State(state): State<AppState>,
    AuthUser(context): AuthUser,
    ValidatedJson(req): ValidatedJson<VerifyPinRequest>,
) -> Result<impl IntoResponse, AppError> {
    let claims = context.claims;
    if normalize_device_id(&req.device_id, "device_id")? != claims.device_id {
        return Err(ServiceError::DeviceMismatch.into());
    }
    let pin = parse_pin(&req.userpin)?;

    match state.pin.verify_pin(claims.sub, &claims.device_id, &pin).await? {
        PinOutcome::Verified { user, tokens } => {
            let step =
                steps::resolve(user.role, user.registration_progress, user.registration_status);
            Ok((StatusCode::OK, Json(SessionResponse::resolved(tokens, user, step))))
        }
        PinOutcome::Mismatch { remaining_attempts } => {
            Err(ServiceError::PinMismatch { remaining_attempts }.into())
        }
    }
}
