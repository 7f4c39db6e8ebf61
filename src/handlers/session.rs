// handlers/session.rs - GET /api/session/modules handler

use axum::extract::Extension;

use crate::database::manager::DatabaseManager;
use crate::database::models::plan::active_modules_for_tenant;
use crate::error::ApiError;
use crate::middleware::auth::AuthStaff;
use crate::middleware::response::ApiResponse;
use crate::middleware::tenant::{ResolvedTenant, TenantDb};
use crate::services::entitlements::{resolve_module_access, ModuleAccess};

/// Resolve the module sets for the authenticated staff session: the role's
/// list from the tenant database, restricted by the tenant's active
/// subscription modules from the registry.
pub async fn session_modules(
    Extension(staff): Extension<AuthStaff>,
    Extension(resolved): Extension<ResolvedTenant>,
    Extension(TenantDb(pool)): Extension<TenantDb>,
) -> Result<ApiResponse<ModuleAccess>, ApiError> {
    let role_modules: Vec<String> =
        sqlx::query_scalar::<_, Vec<String>>("SELECT modules FROM roles WHERE id = $1")
            .bind(staff.role_id)
            .fetch_optional(&pool)
            .await?
            .ok_or_else(|| ApiError::not_found("Role not found for session"))?;

    let master = DatabaseManager::master_pool().await?;
    let tenant_modules = active_modules_for_tenant(&master, resolved.tenant.id).await?;

    Ok(ApiResponse::success(resolve_module_access(
        &role_modules,
        &tenant_modules,
    )))
}
