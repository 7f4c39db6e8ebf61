// handlers/admin.rs - POST /admin/tenants/:restaurant_id/plan handler
// Registry-only plan assignment; supersedes the tenant's current plan

use axum::{extract::Path, Json};
use serde::Deserialize;
use uuid::Uuid;

use crate::database::manager::DatabaseManager;
use crate::database::models::plan::TenantPlanAssignment;
use crate::database::models::tenant::{Tenant, TenantStatus};
use crate::error::ApiError;
use crate::middleware::response::ApiResponse;
use crate::services::plans;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignPlanRequest {
    pub plan_id: Uuid,
}

pub async fn assign_plan_post(
    Path(restaurant_id): Path<String>,
    Json(payload): Json<AssignPlanRequest>,
) -> Result<ApiResponse<TenantPlanAssignment>, ApiError> {
    let master = DatabaseManager::master_pool().await?;

    let tenant = Tenant::find_by_restaurant_id(&master, &restaurant_id)
        .await?
        .ok_or(ApiError::TenantNotFound(restaurant_id))?;

    let assignment = plans::assign_plan(&master, tenant.id, payload.plan_id, "active").await?;

    // A paid plan assignment promotes a trial tenant
    if tenant.status == TenantStatus::Trial {
        Tenant::update_status(&master, tenant.id, TenantStatus::Active).await?;
    }

    Ok(ApiResponse::success(assignment))
}
