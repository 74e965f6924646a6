use axum::{
    extract::{FromRequest, Request},
    Json,
};
use serde::de::DeserializeOwned;
use service_core::error::AppError;
use validator::Validate;

/// JSON body extractor that runs `validator` rules before the handler sees it.
pub struct ValidatedJson<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate + 'static,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| AppError::InvalidInput(format!("Json parse error: {}", e.body_text())))?;

        value.validate()?;

        Ok(ValidatedJson(value))
    }
}

/// `validator` custom rule: six ASCII digits.
pub fn validate_pin_format(pin: &str) -> Result<(), validator::ValidationError> {
    if pin.len() == 6 && pin.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(validator::ValidationError::new("pin_format"))
    }
}

/// `validator` custom rule: sixteen-digit national identity number.
pub fn validate_identity_number(value: &str) -> Result<(), validator::ValidationError> {
    if value.len() == 16 && value.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(validator::ValidationError::new("identity_number_format"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_format() {
        assert!(validate_pin_format("123456").is_ok());
        assert!(validate_pin_format("12345").is_err());
        assert!(validate_pin_format("12345x").is_err());
    }

    #[test]
    fn test_identity_number() {
        assert!(validate_identity_number("3201234567890001").is_ok());
        assert!(validate_identity_number("320123456789000").is_err());
        assert!(validate_identity_number("32012345678900A1").is_err());
    }
}
