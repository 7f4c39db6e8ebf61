use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// A subscription plan: ordered module list plus pricing.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ServicePlan {
    pub id: Uuid,
    pub name: String,
    pub modules: Vec<String>,
    pub price_cents: i64,
    pub duration_days: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Binds a tenant to one plan. Older assignments are superseded in place,
/// never deleted, so billing history survives plan changes.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TenantPlanAssignment {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub plan_id: Uuid,
    pub status: String,
    pub starts_at: DateTime<Utc>,
    pub renews_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Assignment statuses that count as "currently in force". At most one
/// assignment per tenant may hold one of these at any instant.
pub const LIVE_ASSIGNMENT_STATUSES: [&str; 3] = ["trial", "active", "grace"];

impl ServicePlan {
    pub async fn find_active(pool: &PgPool, id: Uuid) -> Result<Option<ServicePlan>, sqlx::Error> {
        sqlx::query_as::<_, ServicePlan>(
            "SELECT id, name, modules, price_cents, duration_days, is_active, created_at \
             FROM service_plans WHERE id = $1 AND is_active = TRUE",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_active_by_name(
        pool: &PgPool,
        name: &str,
    ) -> Result<Option<ServicePlan>, sqlx::Error> {
        sqlx::query_as::<_, ServicePlan>(
            "SELECT id, name, modules, price_cents, duration_days, is_active, created_at \
             FROM service_plans WHERE name = $1 AND is_active = TRUE",
        )
        .bind(name)
        .fetch_optional(pool)
        .await
    }
}

impl TenantPlanAssignment {
    pub async fn current_for_tenant(
        pool: &PgPool,
        tenant_id: Uuid,
    ) -> Result<Option<TenantPlanAssignment>, sqlx::Error> {
        let statuses: Vec<String> = LIVE_ASSIGNMENT_STATUSES
            .iter()
            .map(|s| s.to_string())
            .collect();
        sqlx::query_as::<_, TenantPlanAssignment>(
            "SELECT id, tenant_id, plan_id, status, starts_at, renews_at, created_at \
             FROM tenant_plan_assignments \
             WHERE tenant_id = $1 AND status = ANY($2) \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(tenant_id)
        .bind(statuses)
        .fetch_optional(pool)
        .await
    }
}

/// Module keys currently active for a tenant, from the registry.
pub async fn active_modules_for_tenant(
    pool: &PgPool,
    tenant_id: Uuid,
) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>(
        "SELECT module_key FROM tenant_modules \
         WHERE tenant_id = $1 AND status = 'active' ORDER BY module_key",
    )
    .bind(tenant_id)
    .fetch_all(pool)
    .await
}
