// HTTP API Error Types
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};
use std::collections::HashMap;

/// HTTP API error with appropriate status codes and client-friendly messages
#[derive(Debug)]
pub enum ApiError {
    // 400 Bad Request
    BadRequest(String),
    ValidationError {
        message: String,
        field_errors: Option<HashMap<String, String>>,
    },
    /// Request reached a tenant-scoped route without any tenant identifier
    MissingTenantContext,
    /// Signup named no plan, or a plan that is not active
    InvalidPlanSelection(String),

    // 401 Unauthorized
    Unauthorized(String),

    // 403 Forbidden
    Forbidden(String),

    // 404 Not Found
    NotFound(String),
    /// No registry record for the supplied restaurant identifier
    TenantNotFound(String),

    // 409 Conflict
    Conflict(String),

    // 500 Internal Server Error
    InternalServerError(String),
    /// Database/user creation, migration, or seeding failed; compensating
    /// cleanup has already run by the time this surfaces
    ResourceProvisioningFailure,

    // 503 Service Unavailable
    ServiceUnavailable(String),
}

impl ApiError {
    /// Get HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::BadRequest(_) => 400,
            ApiError::ValidationError { .. } => 400,
            ApiError::MissingTenantContext => 400,
            ApiError::InvalidPlanSelection(_) => 400,
            ApiError::Unauthorized(_) => 401,
            ApiError::Forbidden(_) => 403,
            ApiError::NotFound(_) => 404,
            ApiError::TenantNotFound(_) => 404,
            ApiError::Conflict(_) => 409,
            ApiError::InternalServerError(_) => 500,
            ApiError::ResourceProvisioningFailure => 500,
            ApiError::ServiceUnavailable(_) => 503,
        }
    }

    /// Get client-safe error message
    pub fn message(&self) -> String {
        match self {
            ApiError::BadRequest(msg) => msg.clone(),
            ApiError::ValidationError { message, .. } => message.clone(),
            ApiError::MissingTenantContext => "No restaurant identifier supplied".to_string(),
            ApiError::InvalidPlanSelection(msg) => msg.clone(),
            ApiError::Unauthorized(msg) => msg.clone(),
            ApiError::Forbidden(msg) => msg.clone(),
            ApiError::NotFound(msg) => msg.clone(),
            ApiError::TenantNotFound(id) => format!("Unknown restaurant '{}'", id),
            ApiError::Conflict(msg) => msg.clone(),
            ApiError::InternalServerError(msg) => msg.clone(),
            ApiError::ResourceProvisioningFailure => {
                "Signup could not be completed, please try again later".to_string()
            }
            ApiError::ServiceUnavailable(msg) => msg.clone(),
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::ValidationError { .. } => "VALIDATION_ERROR",
            ApiError::MissingTenantContext => "MISSING_TENANT_CONTEXT",
            ApiError::InvalidPlanSelection(_) => "INVALID_PLAN_SELECTION",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::TenantNotFound(_) => "TENANT_NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
            ApiError::ResourceProvisioningFailure => "RESOURCE_PROVISIONING_FAILURE",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
        }
    }

    /// Convert to JSON response body
    pub fn to_json(&self) -> Value {
        match self {
            ApiError::ValidationError {
                message,
                field_errors,
            } => {
                let mut response = json!({
                    "error": true,
                    "message": message,
                    "code": "VALIDATION_ERROR"
                });

                if let Some(field_errors) = field_errors {
                    response["field_errors"] = json!(field_errors);
                }

                response
            }
            _ => {
                json!({
                    "error": true,
                    "message": self.message(),
                    "code": self.error_code()
                })
            }
        }
    }
}

// Static constructor methods
impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn validation_error(
        message: impl Into<String>,
        field_errors: Option<HashMap<String, String>>,
    ) -> Self {
        ApiError::ValidationError {
            message: message.into(),
            field_errors,
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Unauthorized(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ApiError::Conflict(message.into())
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        ApiError::InternalServerError(message.into())
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        ApiError::ServiceUnavailable(message.into())
    }
}

// Convert other error types to ApiError
impl From<crate::database::manager::DatabaseError> for ApiError {
    fn from(err: crate::database::manager::DatabaseError) -> Self {
        match err {
            crate::database::manager::DatabaseError::ConfigMissing(name) => {
                tracing::error!("Missing configuration: {}", name);
                ApiError::service_unavailable("Database temporarily unavailable")
            }
            crate::database::manager::DatabaseError::InvalidDatabaseUrl => {
                tracing::error!("DATABASE_URL could not be parsed");
                ApiError::service_unavailable("Database temporarily unavailable")
            }
            crate::database::manager::DatabaseError::InvalidTenantName(name) => {
                tracing::error!("Invalid tenant database name: {}", name);
                ApiError::internal_server_error("An error occurred while processing your request")
            }
            crate::database::manager::DatabaseError::Sqlx(sqlx_err) => {
                // Log the real error but return generic message
                tracing::error!("SQLx error: {}", sqlx_err);
                ApiError::internal_server_error("Database error occurred")
            }
        }
    }
}

impl From<crate::services::provisioning::ProvisioningError> for ApiError {
    fn from(err: crate::services::provisioning::ProvisioningError) -> Self {
        use crate::services::provisioning::ProvisioningError;
        match err {
            ProvisioningError::EmailTaken(email) => {
                ApiError::conflict(format!("An account already exists for {}", email))
            }
            ProvisioningError::InvalidPlanSelection(msg) => ApiError::InvalidPlanSelection(msg),
            ProvisioningError::Registry(e) => {
                tracing::error!("Registry error during provisioning: {}", e);
                ApiError::ResourceProvisioningFailure
            }
            ProvisioningError::Resource(msg) => {
                tracing::error!("Resource provisioning failed: {}", msg);
                ApiError::ResourceProvisioningFailure
            }
        }
    }
}

impl From<crate::services::plans::PlanError> for ApiError {
    fn from(err: crate::services::plans::PlanError) -> Self {
        use crate::services::plans::PlanError;
        match err {
            PlanError::PlanNotAvailable(msg) => ApiError::InvalidPlanSelection(msg),
            PlanError::Database(e) => {
                tracing::error!("Plan assignment database error: {}", e);
                ApiError::internal_server_error("An error occurred while processing your request")
            }
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("SQLx error: {}", err);
        ApiError::internal_server_error("Database error occurred")
    }
}

// Standard error trait implementations
impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ApiError {}

// Automatic HTTP response conversion for Axum
impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_json())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_errors_map_to_expected_codes() {
        let err = ApiError::TenantNotFound("482913".to_string());
        assert_eq!(err.status_code(), 404);
        assert_eq!(err.error_code(), "TENANT_NOT_FOUND");
        assert!(err.message().contains("482913"));

        assert_eq!(ApiError::MissingTenantContext.status_code(), 400);
        assert_eq!(
            ApiError::InvalidPlanSelection("no plan".into()).status_code(),
            400
        );
        assert_eq!(ApiError::ResourceProvisioningFailure.status_code(), 500);
    }

    #[test]
    fn to_json_carries_code_and_message() {
        let body = ApiError::MissingTenantContext.to_json();
        assert_eq!(body["error"], true);
        assert_eq!(body["code"], "MISSING_TENANT_CONTEXT");
        assert!(body["message"].as_str().unwrap().contains("restaurant"));
    }
}
