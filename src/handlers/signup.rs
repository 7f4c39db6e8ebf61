// handlers/signup.rs - POST /signup handler
// Provisions a complete isolated tenant from a signup payload

use axum::Json;
use std::collections::HashMap;

use crate::error::ApiError;
use crate::middleware::response::ApiResponse;
use crate::services::provisioning::{ProvisioningService, SignupOutcome, SignupRequest};

pub async fn signup_post(
    Json(payload): Json<SignupRequest>,
) -> Result<ApiResponse<SignupOutcome>, ApiError> {
    validate_signup(&payload)?;

    let service = ProvisioningService::new().await?;
    let outcome = service.provision(&payload).await?;

    Ok(ApiResponse::created(outcome))
}

fn validate_signup(req: &SignupRequest) -> Result<(), ApiError> {
    let mut field_errors = HashMap::new();

    if req.restaurant_name.trim().is_empty() {
        field_errors.insert(
            "restaurantName".to_string(),
            "Restaurant name is required".to_string(),
        );
    }
    if req.admin_name.trim().is_empty() {
        field_errors.insert(
            "adminName".to_string(),
            "Administrator name is required".to_string(),
        );
    }
    if !is_plausible_email(&req.email) {
        field_errors.insert("email".to_string(), "Invalid email format".to_string());
    }
    if req.password.len() < 8 {
        field_errors.insert(
            "password".to_string(),
            "Password must be at least 8 characters".to_string(),
        );
    } else if req.password != req.password_confirmation {
        field_errors.insert(
            "passwordConfirmation".to_string(),
            "Passwords do not match".to_string(),
        );
    }
    if req.country.trim().is_empty() {
        field_errors.insert("country".to_string(), "Country is required".to_string());
    }

    if field_errors.is_empty() {
        Ok(())
    } else {
        Err(ApiError::validation_error(
            "Invalid signup request",
            Some(field_errors),
        ))
    }
}

fn is_plausible_email(email: &str) -> bool {
    let parts: Vec<&str> = email.split('@').collect();
    parts.len() == 2 && !parts[0].is_empty() && parts[1].contains('.') && !parts[1].starts_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn valid_request() -> SignupRequest {
        SignupRequest {
            restaurant_name: "Trattoria Roma".to_string(),
            email: "owner@roma.example".to_string(),
            admin_name: "Giulia".to_string(),
            password: "correct-horse".to_string(),
            password_confirmation: "correct-horse".to_string(),
            country: "IT".to_string(),
            plan_id: Uuid::new_v4(),
            pos_type: None,
            use_redis: false,
        }
    }

    #[test]
    fn accepts_a_valid_request() {
        assert!(validate_signup(&valid_request()).is_ok());
    }

    #[test]
    fn rejects_password_mismatch() {
        let mut req = valid_request();
        req.password_confirmation = "something-else".to_string();
        let err = validate_signup(&req).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn rejects_short_password_and_bad_email() {
        let mut req = valid_request();
        req.password = "short".to_string();
        req.password_confirmation = "short".to_string();
        req.email = "not-an-email".to_string();
        assert!(validate_signup(&req).is_err());
    }

    #[test]
    fn email_plausibility() {
        assert!(is_plausible_email("a@b.co"));
        assert!(!is_plausible_email("a@b"));
        assert!(!is_plausible_email("@b.co"));
        assert!(!is_plausible_email("a@.co"));
    }
}
