//! Tenant provisioning: signup request in, fully isolated tenant out.
//!
//! Creates a dedicated database and login role, migrates the tenant schema,
//! seeds the initial roster, and records the tenant in the master store.
//! Steps run serially; each depends on the previous one's side effect. Any
//! failure after resource creation triggers synchronous compensating
//! cleanup so no half-provisioned tenant stays reachable. Cleanup itself is
//! best-effort: failures are logged, not surfaced.

use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::config;
use crate::database::manager::{apply_sql_batch, DatabaseError, DatabaseManager};
use crate::database::models::plan::ServicePlan;
use crate::database::models::tenant::{NewTenant, Tenant};
use crate::services::plans;

const TENANT_SCHEMA_SQL: &str = include_str!("../../sql/tenant_schema.sql");

/// Everything the Admin role may do in a fresh tenant.
const ADMIN_PERMISSIONS: [&str; 6] = [
    "manage_staff",
    "manage_menu",
    "manage_orders",
    "manage_inventory",
    "view_reports",
    "manage_settings",
];

const DEFAULT_EXPENSE_CATEGORIES: [&str; 5] =
    ["Ingredients", "Utilities", "Wages", "Rent", "Maintenance"];

const DEFAULT_MENU_CATEGORIES: [&str; 4] = ["Starters", "Mains", "Desserts", "Beverages"];

const STARTER_TABLE_COUNT: u32 = 6;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    pub restaurant_name: String,
    pub email: String,
    pub admin_name: String,
    pub password: String,
    pub password_confirmation: String,
    pub country: String,
    pub plan_id: Uuid,
    #[serde(default)]
    pub pos_type: Option<String>,
    #[serde(default)]
    pub use_redis: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupOutcome {
    pub restaurant_id: String,
    pub plan: PlanSummary,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSummary {
    pub id: Uuid,
    pub name: String,
    pub status: String,
    pub renews_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error("Email already registered: {0}")]
    EmailTaken(String),

    #[error("{0}")]
    InvalidPlanSelection(String),

    #[error(transparent)]
    Registry(#[from] sqlx::Error),

    #[error("Provisioning failed: {0}")]
    Resource(String),
}

impl From<DatabaseError> for ProvisioningError {
    fn from(err: DatabaseError) -> Self {
        ProvisioningError::Resource(err.to_string())
    }
}

impl From<plans::PlanError> for ProvisioningError {
    fn from(err: plans::PlanError) -> Self {
        match err {
            plans::PlanError::PlanNotAvailable(msg) => ProvisioningError::InvalidPlanSelection(msg),
            plans::PlanError::Database(e) => ProvisioningError::Registry(e),
        }
    }
}

pub struct ProvisioningService {
    master: PgPool,
}

impl ProvisioningService {
    pub async fn new() -> Result<Self, DatabaseError> {
        Ok(Self {
            master: DatabaseManager::master_pool().await?,
        })
    }

    pub fn with_pool(master: PgPool) -> Self {
        Self { master }
    }

    /// Run the full signup workflow.
    pub async fn provision(&self, req: &SignupRequest) -> Result<SignupOutcome, ProvisioningError> {
        // 1. Uniqueness: one tenant per contact email
        if Tenant::email_exists(&self.master, &req.email).await? {
            return Err(ProvisioningError::EmailTaken(req.email.clone()));
        }

        // 2. Plan resolution, before any external resource is touched
        let plan = ServicePlan::find_active(&self.master, req.plan_id)
            .await?
            .ok_or_else(|| {
                ProvisioningError::InvalidPlanSelection(
                    "The selected plan is not available".to_string(),
                )
            })?;

        // 3. Tenant-facing identifier: random draw, redraw on collision
        let master = self.master.clone();
        let restaurant_id = generate_unique_id(|id| {
            let master = master.clone();
            async move { Tenant::restaurant_id_exists(&master, &id).await }
        })
        .await?;

        let db_name = format!("{}{}", DatabaseManager::TENANT_DB_PREFIX, restaurant_id);
        let db_user = format!("{}_user", db_name);
        let db_password = random_credential(24);

        // Steps 4-7 touch real external resources; from here every failure
        // runs the compensating cleanup before surfacing
        let mut tenant_row: Option<Uuid> = None;
        match self
            .provision_resources(req, &plan, &restaurant_id, &db_name, &db_user, &db_password, &mut tenant_row)
            .await
        {
            Ok(outcome) => {
                tracing::info!(
                    "Provisioned tenant {} ({}) on plan '{}'",
                    restaurant_id,
                    db_name,
                    plan.name
                );
                Ok(outcome)
            }
            Err(err) => {
                tracing::error!("Provisioning failed for {}: {}", restaurant_id, err);
                self.cleanup(&db_name, &db_user, tenant_row).await;
                Err(err)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn provision_resources(
        &self,
        req: &SignupRequest,
        plan: &ServicePlan,
        restaurant_id: &str,
        db_name: &str,
        db_user: &str,
        db_password: &str,
        tenant_row: &mut Option<Uuid>,
    ) -> Result<SignupOutcome, ProvisioningError> {
        // 4. Dedicated database plus a login role scoped to it
        self.create_database_and_role(db_name, db_user, db_password)
            .await?;

        // 5. Registry write: tenant row, then the initial trial assignment
        // and its module set
        let tenant = Tenant::insert(
            &self.master,
            &NewTenant {
                restaurant_id: restaurant_id.to_string(),
                name: req.restaurant_name.clone(),
                email: req.email.clone(),
                db_name: db_name.to_string(),
                db_user: db_user.to_string(),
                db_password: db_password.to_string(),
                use_redis: req.use_redis,
                pos_type: req
                    .pos_type
                    .clone()
                    .unwrap_or_else(|| "restaurant".to_string()),
            },
        )
        .await?;
        *tenant_row = Some(tenant.id);

        let assignment = plans::assign_plan(&self.master, tenant.id, plan.id, "trial").await?;

        // 6. Schema migration on the new database
        let pool = DatabaseManager::tenant_pool(db_name, db_user, db_password).await?;
        apply_sql_batch(&pool, TENANT_SCHEMA_SQL)
            .await
            .map_err(|e| ProvisioningError::Resource(format!("schema migration failed: {}", e)))?;

        // 7. Seed the roster, settings, and defaults
        seed_tenant(&pool, req, plan).await?;

        Ok(SignupOutcome {
            restaurant_id: restaurant_id.to_string(),
            plan: PlanSummary {
                id: plan.id,
                name: plan.name.clone(),
                status: assignment.status,
                renews_at: assignment.renews_at,
            },
        })
    }

    async fn create_database_and_role(
        &self,
        db_name: &str,
        db_user: &str,
        db_password: &str,
    ) -> Result<(), ProvisioningError> {
        if !DatabaseManager::is_valid_db_name(db_name) {
            return Err(ProvisioningError::Resource(format!(
                "refusing to create database '{}'",
                db_name
            )));
        }

        let admin = DatabaseManager::admin_pool().await?;

        let create_role = format!(
            "CREATE ROLE {} LOGIN PASSWORD {}",
            DatabaseManager::quote_identifier(db_user),
            DatabaseManager::quote_literal(db_password)
        );
        sqlx::query(&create_role)
            .execute(&admin)
            .await
            .map_err(|e| ProvisioningError::Resource(format!("role creation failed: {}", e)))?;

        // Ownership of the database, and nothing else, is the grant scope
        let create_db = format!(
            "CREATE DATABASE {} OWNER {}",
            DatabaseManager::quote_identifier(db_name),
            DatabaseManager::quote_identifier(db_user)
        );
        sqlx::query(&create_db)
            .execute(&admin)
            .await
            .map_err(|e| ProvisioningError::Resource(format!("database creation failed: {}", e)))?;

        Ok(())
    }

    /// Compensating cleanup: drop whatever steps 4-5 managed to create.
    /// Never fails the request further; partial cleanup failures are logged
    /// as critical for the operator.
    async fn cleanup(&self, db_name: &str, db_user: &str, tenant_row: Option<Uuid>) {
        tracing::warn!("Rolling back provisioning for {}", db_name);

        // Release our own cached connections before dropping the database
        DatabaseManager::evict(db_name).await;

        match DatabaseManager::admin_pool().await {
            Ok(admin) => {
                let drop_db = format!(
                    "DROP DATABASE IF EXISTS {} WITH (FORCE)",
                    DatabaseManager::quote_identifier(db_name)
                );
                if let Err(e) = sqlx::query(&drop_db).execute(&admin).await {
                    tracing::error!("Cleanup failed to drop database {}: {}", db_name, e);
                }

                let drop_role = format!(
                    "DROP ROLE IF EXISTS {}",
                    DatabaseManager::quote_identifier(db_user)
                );
                if let Err(e) = sqlx::query(&drop_role).execute(&admin).await {
                    tracing::error!("Cleanup failed to drop role {}: {}", db_user, e);
                }
            }
            Err(e) => {
                tracing::error!("Cleanup could not reach the admin pool: {}", e);
            }
        }

        if let Some(id) = tenant_row {
            if let Err(e) = Tenant::delete(&self.master, id).await {
                tracing::error!("Cleanup failed to delete tenant row {}: {}", id, e);
            }
        }
    }
}

/// Seed a migrated tenant database: Admin role and staff account,
/// country-derived settings, default categories, starter tables.
async fn seed_tenant(
    pool: &PgPool,
    req: &SignupRequest,
    plan: &ServicePlan,
) -> Result<(), ProvisioningError> {
    let permissions: Vec<String> = ADMIN_PERMISSIONS.iter().map(|s| s.to_string()).collect();

    let role_id: Uuid = sqlx::query_scalar(
        "INSERT INTO roles (name, permissions, modules) VALUES ('Admin', $1, $2) RETURNING id",
    )
    .bind(&permissions)
    .bind(&plan.modules)
    .fetch_one(pool)
    .await
    .map_err(|e| ProvisioningError::Resource(format!("seeding roles failed: {}", e)))?;

    let password_hash = hash_password(&req.password, config::config().security.bcrypt_cost)?;

    sqlx::query("INSERT INTO staff (name, email, password_hash, role_id) VALUES ($1, $2, $3, $4)")
        .bind(&req.admin_name)
        .bind(&req.email)
        .bind(&password_hash)
        .bind(role_id)
        .execute(pool)
        .await
        .map_err(|e| ProvisioningError::Resource(format!("seeding staff failed: {}", e)))?;

    let (currency_code, currency_symbol) = currency_for_country(&req.country);
    sqlx::query(
        "INSERT INTO restaurant_settings (restaurant_name, country, currency_code, currency_symbol) \
         VALUES ($1, $2, $3, $4)",
    )
    .bind(&req.restaurant_name)
    .bind(&req.country)
    .bind(currency_code)
    .bind(currency_symbol)
    .execute(pool)
    .await
    .map_err(|e| ProvisioningError::Resource(format!("seeding settings failed: {}", e)))?;

    for name in DEFAULT_EXPENSE_CATEGORIES {
        sqlx::query("INSERT INTO expense_categories (name) VALUES ($1)")
            .bind(name)
            .execute(pool)
            .await
            .map_err(|e| {
                ProvisioningError::Resource(format!("seeding expense categories failed: {}", e))
            })?;
    }

    for (index, name) in DEFAULT_MENU_CATEGORIES.iter().enumerate() {
        sqlx::query("INSERT INTO menu_categories (name, sort_order) VALUES ($1, $2)")
            .bind(name)
            .bind(index as i32)
            .execute(pool)
            .await
            .map_err(|e| {
                ProvisioningError::Resource(format!("seeding menu categories failed: {}", e))
            })?;
    }

    for n in 1..=STARTER_TABLE_COUNT {
        sqlx::query("INSERT INTO dining_tables (label) VALUES ($1)")
            .bind(format!("Table {}", n))
            .execute(pool)
            .await
            .map_err(|e| ProvisioningError::Resource(format!("seeding tables failed: {}", e)))?;
    }

    Ok(())
}

fn hash_password(password: &str, cost: u32) -> Result<String, ProvisioningError> {
    bcrypt::hash(password, cost)
        .map_err(|e| ProvisioningError::Resource(format!("password hashing failed: {}", e)))
}

/// Draw tenant-facing identifiers until one is free in the registry.
/// Gaps and redraws are expected; the registry's unique constraint backs
/// this up if two signups race.
pub(crate) async fn generate_unique_id<F, Fut>(mut taken: F) -> Result<String, sqlx::Error>
where
    F: FnMut(String) -> Fut,
    Fut: std::future::Future<Output = Result<bool, sqlx::Error>>,
{
    loop {
        let id = draw_restaurant_id();
        if !taken(id.clone()).await? {
            return Ok(id);
        }
        tracing::debug!("Restaurant id collision on {}, redrawing", id);
    }
}

fn draw_restaurant_id() -> String {
    let n: u32 = OsRng.gen_range(100_000..1_000_000);
    n.to_string()
}

fn random_credential(len: usize) -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn currency_for_country(country: &str) -> (&'static str, &'static str) {
    match country.trim().to_ascii_uppercase().as_str() {
        "US" | "USA" | "UNITED STATES" => ("USD", "$"),
        "GB" | "UK" | "UNITED KINGDOM" => ("GBP", "£"),
        "IN" | "INDIA" => ("INR", "₹"),
        "DE" | "FR" | "IT" | "ES" | "NL" | "GERMANY" | "FRANCE" | "ITALY" | "SPAIN"
        | "NETHERLANDS" => ("EUR", "€"),
        "CA" | "CANADA" => ("CAD", "$"),
        "AU" | "AUSTRALIA" => ("AUD", "$"),
        "JP" | "JAPAN" => ("JPY", "¥"),
        _ => ("USD", "$"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::future::ready;

    #[tokio::test]
    async fn identifier_generation_redraws_until_unique() {
        let attempts = Cell::new(0u32);
        let id = generate_unique_id(|_id| {
            let n = attempts.get();
            attempts.set(n + 1);
            // First five draws collide, the sixth is free
            ready(Ok(n < 5))
        })
        .await
        .unwrap();

        assert_eq!(attempts.get(), 6);
        assert_eq!(id.len(), 6);
        assert!(id.chars().all(|c| c.is_ascii_digit()));
    }

    #[tokio::test]
    async fn identifier_generation_propagates_registry_errors() {
        let result = generate_unique_id(|_id| ready(Err(sqlx::Error::PoolClosed))).await;
        assert!(result.is_err());
    }

    #[test]
    fn drawn_identifiers_are_six_digits() {
        for _ in 0..100 {
            let id = draw_restaurant_id();
            let n: u32 = id.parse().unwrap();
            assert!((100_000..1_000_000).contains(&n));
        }
    }

    #[test]
    fn random_credentials_are_alphanumeric_and_distinct() {
        let a = random_credential(24);
        let b = random_credential(24);
        assert_eq!(a.len(), 24);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn password_hashing_round_trips_and_hides_plaintext() {
        let hash = hash_password("orders-at-9", 4).unwrap();
        assert!(!hash.contains("orders-at-9"));
        assert!(bcrypt::verify("orders-at-9", &hash).unwrap());
        assert!(!bcrypt::verify("wrong", &hash).unwrap());
    }

    #[test]
    fn currency_defaults_follow_country() {
        assert_eq!(currency_for_country("US"), ("USD", "$"));
        assert_eq!(currency_for_country("india"), ("INR", "₹"));
        assert_eq!(currency_for_country("France"), ("EUR", "€"));
        assert_eq!(currency_for_country("elsewhere"), ("USD", "$"));
    }
}
