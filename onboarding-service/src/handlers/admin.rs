use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    dtos::admin::{BulkReviewRequest, PendingQuery, PendingUsersResponse, ReviewRequest},
    middleware::AuthUser,
    models::UserResponse,
    services::{ApprovalError, ReviewAction},
    utils::ValidatedJson,
    AppState,
};

/// Approve or reject one registration
#[utoipa::path(
    patch,
    path = "/admusers/reguser/{userid}",
    request_body = ReviewRequest,
    params(("userid" = Uuid, Path, description = "User under review")),
    responses(
        (status = 200, description = "Decision applied", body = ReviewOutcome),
        (status = 400, description = "Rejection without notes", body = ErrorResponse),
        (status = 403, description = "Administrator with full token required", body = ErrorResponse),
        (status = 404, description = "User not found", body = ErrorResponse),
        (status = 409, description = "Review guard failed", body = ErrorResponse)
    ),
    tag = "Admin",
    security(("bearer_auth" = []))
)]
pub async fn review_user(
    State(state): State<AppState>,
    AuthUser(context): AuthUser,
    Path(user_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<ReviewRequest>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state
        .approval
        .review(user_id, context.claims.sub, req.action, req.notes.as_deref())
        .await?;

    Ok((StatusCode::OK, Json(outcome)))
}

/// Approve or reject many registrations; each user succeeds or fails alone
#[utoipa::path(
    post,
    path = "/admusers/reguser/bulk",
    request_body = BulkReviewRequest,
    responses(
        (status = 200, description = "Per-user results", body = BulkReport),
        (status = 400, description = "Rejection without notes", body = ErrorResponse),
        (status = 403, description = "Administrator with full token required", body = ErrorResponse)
    ),
    tag = "Admin",
    security(("bearer_auth" = []))
)]
pub async fn bulk_review(
    State(state): State<AppState>,
    AuthUser(context): AuthUser,
    ValidatedJson(req): ValidatedJson<BulkReviewRequest>,
) -> Result<impl IntoResponse, AppError> {
    let notes = req.notes.as_deref().map(str::trim).filter(|n| !n.is_empty());
    if req.action == ReviewAction::Rejected && notes.is_none() {
        return Err(ApprovalError::NotesRequired.into());
    }

    let report = state
        .approval
        .bulk_process(&req.user_ids, req.action, context.claims.sub, notes)
        .await;

    Ok((StatusCode::OK, Json(report)))
}

/// Registrations waiting for review
#[utoipa::path(
    get,
    path = "/admusers/pending",
    params(PendingQuery),
    responses(
        (status = 200, description = "Pending users", body = PendingUsersResponse),
        (status = 403, description = "Administrator with full token required", body = ErrorResponse)
    ),
    tag = "Admin",
    security(("bearer_auth" = []))
)]
pub async fn list_pending(
    State(state): State<AppState>,
    Query(query): Query<PendingQuery>,
) -> Result<impl IntoResponse, AppError> {
    let users: Vec<UserResponse> = state
        .approval
        .list_pending(query.role)
        .await?
        .into_iter()
        .map(UserResponse::from)
        .collect();

    Ok(Json(PendingUsersResponse {
        total: users.len(),
        users,
    }))
}
