//! Plan assignment against the master store.

use chrono::{Duration, Utc};
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::database::models::plan::{ServicePlan, TenantPlanAssignment, LIVE_ASSIGNMENT_STATUSES};

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("{0}")]
    PlanNotAvailable(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Bind a tenant to a plan, superseding whatever assignment is currently in
/// force and replacing the tenant's module set with the plan's list.
///
/// Runs in one transaction so the "at most one live assignment per tenant"
/// invariant holds even under concurrent admin actions.
pub async fn assign_plan(
    master: &PgPool,
    tenant_id: Uuid,
    plan_id: Uuid,
    status: &str,
) -> Result<TenantPlanAssignment, PlanError> {
    let plan = ServicePlan::find_active(master, plan_id)
        .await?
        .ok_or_else(|| PlanError::PlanNotAvailable("The selected plan is not available".into()))?;

    let renews_at = Utc::now() + Duration::days(i64::from(plan.duration_days));

    let mut tx = master.begin().await?;

    let live_statuses: Vec<String> = LIVE_ASSIGNMENT_STATUSES
        .iter()
        .map(|s| s.to_string())
        .collect();
    sqlx::query(
        "UPDATE tenant_plan_assignments SET status = 'superseded' \
         WHERE tenant_id = $1 AND status = ANY($2)",
    )
    .bind(tenant_id)
    .bind(live_statuses)
    .execute(&mut *tx)
    .await?;

    let assignment = sqlx::query_as::<_, TenantPlanAssignment>(
        "INSERT INTO tenant_plan_assignments (tenant_id, plan_id, status, renews_at) \
         VALUES ($1, $2, $3, $4) \
         RETURNING id, tenant_id, plan_id, status, starts_at, renews_at, created_at",
    )
    .bind(tenant_id)
    .bind(plan.id)
    .bind(status)
    .bind(renews_at)
    .fetch_one(&mut *tx)
    .await?;

    // The module set mirrors the plan: replace wholesale, never merge
    sqlx::query("DELETE FROM tenant_modules WHERE tenant_id = $1")
        .bind(tenant_id)
        .execute(&mut *tx)
        .await?;

    for module in &plan.modules {
        sqlx::query(
            "INSERT INTO tenant_modules (tenant_id, module_key, status) VALUES ($1, $2, 'active')",
        )
        .bind(tenant_id)
        .bind(module)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    tracing::info!(
        "Assigned plan '{}' to tenant {} ({} modules)",
        plan.name,
        tenant_id,
        plan.modules.len()
    );

    Ok(assignment)
}
