use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::{
    dtos::{
        auth::{
            RefreshRequest, RegistrationStatusResponse, RequestOtpRequest, RequestOtpResponse,
            SessionResponse, VerifyOtpRequest,
        },
        MessageResponse,
    },
    middleware::{normalize_device_id, AuthUser, DeviceId},
    services::{auth::NEXT_STEP_VERIFY_PIN, steps, TokenType},
    utils::ValidatedJson,
    AppState,
};

/// Send a one-time code for registration or login
#[utoipa::path(
    post,
    path = "/auth/request-otp",
    request_body = RequestOtpRequest,
    responses(
        (status = 200, description = "Code sent", body = RequestOtpResponse),
        (status = 400, description = "Invalid identifier or role", body = ErrorResponse),
        (status = 404, description = "No account to log in to", body = ErrorResponse),
        (status = 409, description = "Already registered for this role", body = ErrorResponse),
        (status = 429, description = "Too many requests", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn request_otp(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RequestOtpRequest>,
) -> Result<impl IntoResponse, AppError> {
    let identifier = req
        .identifier()
        .map_err(|e| AppError::InvalidInput(e.to_string()))?;

    let handle = state
        .auth
        .request_otp(&identifier, req.role, req.purpose)
        .await?;

    Ok((
        StatusCode::OK,
        Json(RequestOtpResponse::new(
            &handle.identifier,
            handle.purpose,
            handle.expires_in,
        )),
    ))
}

/// Verify a one-time code and open a device session
#[utoipa::path(
    post,
    path = "/auth/verif-otp",
    request_body = VerifyOtpRequest,
    responses(
        (status = 200, description = "Code accepted", body = SessionResponse),
        (status = 400, description = "Code expired", body = ErrorResponse),
        (status = 401, description = "Wrong code", body = ErrorResponse),
        (status = 404, description = "No outstanding code", body = ErrorResponse),
        (status = 429, description = "Attempts exhausted", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn verify_otp(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<VerifyOtpRequest>,
) -> Result<impl IntoResponse, AppError> {
    let identifier = req
        .identifier()
        .map_err(|e| AppError::InvalidInput(e.to_string()))?;
    let device_id = normalize_device_id(&req.device_id, "device_id")?;

    let login = state
        .auth
        .verify_otp(&identifier, req.role, req.purpose, &req.otp, &device_id)
        .await?;

    Ok((
        StatusCode::OK,
        Json(SessionResponse::new(
            login.tokens,
            login.user,
            login.step,
            login.next_step,
        )),
    ))
}

/// Rotate the token pair for this device
#[utoipa::path(
    post,
    path = "/auth/refresh-token",
    request_body = RefreshRequest,
    params(("X-Device-ID" = String, Header, description = "Device the session is bound to")),
    responses(
        (status = 200, description = "New pair issued", body = SessionResponse),
        (status = 400, description = "Missing device header", body = ErrorResponse),
        (status = 401, description = "Invalid refresh token", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn refresh_token(
    State(state): State<AppState>,
    DeviceId(device_id): DeviceId,
    ValidatedJson(req): ValidatedJson<RefreshRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (user, tokens) = state.auth.refresh(&req.refresh_token, &device_id).await?;
    let step = steps::resolve(user.role, user.registration_progress, user.registration_status);

    // a completed user still holding a partial pair has not entered their PIN
    let next_step = if tokens.token_type == TokenType::Partial && step.is_completed && user.has_pin()
    {
        NEXT_STEP_VERIFY_PIN
    } else {
        step.step.as_str()
    };

    Ok((
        StatusCode::OK,
        Json(SessionResponse::new(tokens, user, step, next_step)),
    ))
}

/// End this device's session
#[utoipa::path(
    post,
    path = "/auth/logout",
    params(("X-Device-ID" = String, Header, description = "Device the token was issued to")),
    responses(
        (status = 200, description = "Logged out", body = MessageResponse),
        (status = 401, description = "Invalid token", body = ErrorResponse),
        (status = 403, description = "Device mismatch", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(("bearer_auth" = []))
)]
pub async fn logout(
    State(state): State<AppState>,
    AuthUser(context): AuthUser,
) -> Result<impl IntoResponse, AppError> {
    state.auth.logout(&context.claims).await?;
    Ok((StatusCode::OK, Json(MessageResponse::new("Logged out"))))
}

/// Current registration step for the token holder
#[utoipa::path(
    get,
    path = "/auth/registration-status",
    responses(
        (status = 200, description = "Resolved step", body = RegistrationStatusResponse),
        (status = 401, description = "Invalid token", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(("bearer_auth" = []))
)]
pub async fn registration_status(AuthUser(context): AuthUser) -> impl IntoResponse {
    Json(RegistrationStatusResponse::from((context.claims, context.step)))
}
