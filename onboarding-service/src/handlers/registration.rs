use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::Utc;
use service_core::error::AppError;

use crate::{
    dtos::registration::{CompanyProfileRequest, IdentityCardRequest, ProfileRequest},
    middleware::AuthUser,
    models::{CompanyProfile, IdentityCard, ProfileUpdate},
    utils::ValidatedJson,
    AppState,
};

use super::reissue_session;

/// Submit name, gender and address
#[utoipa::path(
    put,
    path = "/registration/profile",
    request_body = ProfileRequest,
    responses(
        (status = 200, description = "Profile saved", body = SessionResponse),
        (status = 403, description = "Profile step already done", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Registration",
    security(("bearer_auth" = []))
)]
pub async fn submit_profile(
    State(state): State<AppState>,
    AuthUser(context): AuthUser,
    ValidatedJson(req): ValidatedJson<ProfileRequest>,
) -> Result<impl IntoResponse, AppError> {
    let update = ProfileUpdate {
        name: req.name.trim().to_string(),
        gender: req.gender.trim().to_lowercase(),
        address: req.address.trim().to_string(),
    };

    let user = state
        .registration
        .submit_profile(context.claims.sub, &update)
        .await?;
    let response = reissue_session(&state, &context.claims, user).await?;

    Ok((StatusCode::OK, Json(response)))
}

/// Upload identity card details for review (pengepul)
#[utoipa::path(
    post,
    path = "/registration/identity-card",
    request_body = IdentityCardRequest,
    responses(
        (status = 200, description = "Submitted for review", body = SessionResponse),
        (status = 403, description = "Role or status not allowed", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Registration",
    security(("bearer_auth" = []))
)]
pub async fn submit_identity_card(
    State(state): State<AppState>,
    AuthUser(context): AuthUser,
    ValidatedJson(req): ValidatedJson<IdentityCardRequest>,
) -> Result<impl IntoResponse, AppError> {
    let card = IdentityCard {
        user_id: context.claims.sub,
        identity_number: req.identity_number,
        full_name: req.full_name.trim().to_string(),
        address: req.address.trim().to_string(),
        photo_url: req.photo_url,
        submitted_utc: Utc::now(),
    };

    let user = state.registration.submit_identity_card(&card).await?;
    let response = reissue_session(&state, &context.claims, user).await?;

    Ok((StatusCode::OK, Json(response)))
}

/// Submit company details for review (pengelola)
#[utoipa::path(
    post,
    path = "/registration/company-profile",
    request_body = CompanyProfileRequest,
    responses(
        (status = 200, description = "Submitted for review", body = SessionResponse),
        (status = 403, description = "Role or status not allowed", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Registration",
    security(("bearer_auth" = []))
)]
pub async fn submit_company_profile(
    State(state): State<AppState>,
    AuthUser(context): AuthUser,
    ValidatedJson(req): ValidatedJson<CompanyProfileRequest>,
) -> Result<impl IntoResponse, AppError> {
    let profile = CompanyProfile {
        user_id: context.claims.sub,
        company_name: req.company_name.trim().to_string(),
        company_address: req.company_address.trim().to_string(),
        company_phone: req.company_phone,
        company_email: req.company_email,
        photo_url: req.photo_url,
        submitted_utc: Utc::now(),
    };

    let user = state.registration.submit_company_profile(&profile).await?;
    let response = reissue_session(&state, &context.claims, user).await?;

    Ok((StatusCode::OK, Json(response)))
}
