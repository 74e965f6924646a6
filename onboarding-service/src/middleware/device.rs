use axum::{
    extract::{FromRequestParts, Request},
    http::{request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use serde_json::json;
use service_core::error::AppError;

use super::AuthContext;

pub const DEVICE_ID_HEADER: &str = "x-device-id";
const MAX_DEVICE_ID_LEN: usize = 128;

/// Trims a device id from a header or request body. Blank and overlong
/// ids are rejected the same way wherever they arrive.
pub fn normalize_device_id(raw: &str, source: &str) -> Result<String, AppError> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(AppError::InvalidInput(format!("{} is required", source)));
    }
    if value.len() > MAX_DEVICE_ID_LEN {
        return Err(AppError::InvalidInput(format!("{} is too long", source)));
    }
    Ok(value.to_string())
}

fn device_header(headers: &HeaderMap) -> Result<String, AppError> {
    let raw = headers
        .get(DEVICE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    normalize_device_id(raw, "X-Device-ID header")
}

/// Value of the `X-Device-ID` header.
#[derive(Debug, Clone)]
pub struct DeviceId(pub String);

#[axum::async_trait]
impl<S> FromRequestParts<S> for DeviceId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        device_header(&parts.headers).map(DeviceId)
    }
}

/// Header device must be the one the token was issued to. Runs after
/// [`super::authorize`].
pub async fn require_bound_device(req: Request, next: Next) -> Result<Response, AppError> {
    let context = req.extensions().get::<AuthContext>().ok_or_else(|| {
        AppError::InternalError(anyhow::anyhow!(
            "Auth context missing from request extensions"
        ))
    })?;

    let device_id = device_header(req.headers())?;
    if device_id != context.claims.device_id {
        tracing::warn!(user_id = %context.claims.sub, "Device mismatch");
        return Err(
            AppError::forbidden("DEVICE_MISMATCH", "Token was issued to another device")
                .with_details(json!({ "header": "X-Device-ID" })),
        );
    }

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_header_required_and_trimmed() {
        let mut headers = HeaderMap::new();
        assert!(device_header(&headers).is_err());

        headers.insert(DEVICE_ID_HEADER, HeaderValue::from_static("  phone-1 "));
        assert_eq!(device_header(&headers).unwrap(), "phone-1");

        headers.insert(DEVICE_ID_HEADER, HeaderValue::from_static(" "));
        assert!(device_header(&headers).is_err());
    }

    #[test]
    fn test_body_and_header_normalize_alike() {
        let mut headers = HeaderMap::new();
        headers.insert(DEVICE_ID_HEADER, HeaderValue::from_static("phone-1"));

        assert_eq!(
            normalize_device_id(" phone-1\t", "device_id").unwrap(),
            device_header(&headers).unwrap()
        );
        assert!(normalize_device_id("  ", "device_id").is_err());
    }

    #[test]
    fn test_overlong_device_id_rejected() {
        let mut headers = HeaderMap::new();
        let long = "d".repeat(MAX_DEVICE_ID_LEN + 1);
        headers.insert(DEVICE_ID_HEADER, HeaderValue::from_str(&long).unwrap());
        assert!(device_header(&headers).is_err());
    }
}
