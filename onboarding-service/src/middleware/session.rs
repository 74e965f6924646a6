use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;

use super::AuthContext;
use crate::AppState;

/// Rejects tokens whose device session was revoked after issuance.
/// Runs after [`super::authorize`].
pub async fn require_live_session(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let context = req.extensions().get::<AuthContext>().ok_or_else(|| {
        AppError::InternalError(anyhow::anyhow!(
            "Auth context missing from request extensions"
        ))
    })?;

    if !state.tokens.is_session_active(&context.claims).await? {
        tracing::info!(
            user_id = %context.claims.sub,
            session_id = %context.claims.sid,
            "Token presented for a revoked session"
        );
        return Err(AppError::Unauthenticated(
            "Invalid or expired token".to_string(),
        ));
    }

    Ok(next.run(req).await)
}
