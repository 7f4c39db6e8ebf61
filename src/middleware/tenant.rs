use axum::{
    body::Body,
    extract::Request,
    http::{header::CONTENT_TYPE, HeaderMap},
    middleware::Next,
    response::Response,
};
use serde_json::Value;
use sqlx::PgPool;

use crate::config;
use crate::database::manager::DatabaseManager;
use crate::database::models::tenant::Tenant;
use crate::error::ApiError;
use crate::middleware::auth::AuthStaff;

/// Tenant database pool, injected by middleware. Valid for the lifetime of
/// the request; the pool itself is cached for the process lifetime.
#[derive(Clone)]
pub struct TenantDb(pub PgPool);

/// Resolved registry record for the request's tenant.
#[derive(Clone, Debug)]
pub struct ResolvedTenant {
    pub tenant: Tenant,
    /// Whether live updates for this tenant fan out across processes.
    pub cross_process_enabled: bool,
}

/// Resolves the tenant for a request and attaches its scoped database pool.
///
/// Identifier precedence: `x-restaurant-id` header, then a `restaurantId`
/// field in a JSON body, then the restaurant claim of an authenticated
/// token. Routes that take no tenant (signup, health) are simply not
/// layered with this middleware.
///
/// This is the only place a tenant pool ever enters a request context, and
/// the pool is looked up by the resolved tenant's own db_name, so a handler
/// can never see another tenant's connection handle.
pub async fn resolve_tenant_middleware(request: Request, next: Next) -> Result<Response, ApiError> {
    let (mut parts, body) = request.into_parts();

    let mut hint = header_hint(&parts.headers);

    // Buffer the body only when we need to read it for a tenant hint; otherwise
    // pass it through untouched. Rebinding `body` keeps it available downstream
    // whether or not it was consumed here.
    let body = if hint.is_none() && is_json(&parts.headers) {
        let limit = config::config().api.max_request_size_bytes;
        let bytes = axum::body::to_bytes(body, limit)
            .await
            .map_err(|_| ApiError::bad_request("Request body too large or unreadable"))?;
        if let Ok(json) = serde_json::from_slice::<Value>(&bytes) {
            hint = body_hint(&json);
        }
        Body::from(bytes)
    } else {
        body
    };

    if hint.is_none() {
        hint = parts
            .extensions
            .get::<AuthStaff>()
            .map(|staff| staff.restaurant_id.clone());
    }

    let restaurant_id = hint.ok_or(ApiError::MissingTenantContext)?;

    let master = DatabaseManager::master_pool().await?;
    let tenant = Tenant::find_by_restaurant_id(&master, &restaurant_id)
        .await?
        .ok_or_else(|| {
            tracing::warn!("Tenant resolution failed for '{}'", restaurant_id);
            ApiError::TenantNotFound(restaurant_id.clone())
        })?;

    let pool =
        DatabaseManager::tenant_pool(&tenant.db_name, &tenant.db_user, &tenant.db_password)
            .await
            .map_err(|e| {
                tracing::error!("Failed to get pool for tenant '{}': {}", tenant.db_name, e);
                ApiError::from(e)
            })?;

    tracing::debug!(
        "Tenant resolved: {} ({})",
        tenant.restaurant_id,
        tenant.db_name
    );

    let cross_process_enabled = tenant.use_redis;
    parts.extensions.insert(ResolvedTenant {
        tenant,
        cross_process_enabled,
    });
    parts.extensions.insert(TenantDb(pool));

    // Reassemble the request with the (possibly buffered) body restored.
    let request = Request::from_parts(parts, body);

    Ok(next.run(request).await)
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/json"))
        .unwrap_or(false)
}

fn header_hint(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-restaurant-id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

fn body_hint(json: &Value) -> Option<String> {
    json.get("restaurantId")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;

    #[test]
    fn header_hint_wins_over_body() {
        let mut headers = HeaderMap::new();
        headers.insert("x-restaurant-id", HeaderValue::from_static("111111"));
        assert_eq!(header_hint(&headers).as_deref(), Some("111111"));
        // body would say otherwise, but resolution never reads it when the
        // header is present
        assert_eq!(
            body_hint(&json!({"restaurantId": "222222"})).as_deref(),
            Some("222222")
        );
    }

    #[test]
    fn blank_header_is_no_hint() {
        let mut headers = HeaderMap::new();
        headers.insert("x-restaurant-id", HeaderValue::from_static("   "));
        assert_eq!(header_hint(&headers), None);
    }

    #[test]
    fn body_hint_requires_string_field() {
        assert_eq!(body_hint(&json!({"restaurantId": 42})), None);
        assert_eq!(body_hint(&json!({"other": "x"})), None);
        assert_eq!(
            body_hint(&json!({"restaurantId": "482913"})).as_deref(),
            Some("482913")
        );
    }

    #[test]
    fn json_detection_reads_content_type() {
        let mut headers = HeaderMap::new();
        assert!(!is_json(&headers));
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        assert!(is_json(&headers));
    }
}
