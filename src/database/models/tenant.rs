use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// Tenant lifecycle status in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum TenantStatus {
    Trial,
    Active,
    Suspended,
    Cancelled,
}

/// One subscribing restaurant as recorded in the master store.
///
/// `db_password` stays inside the backend: it is needed to build the tenant
/// connection string and is never serialized into responses.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Tenant {
    pub id: Uuid,
    pub restaurant_id: String,
    pub name: String,
    pub email: String,
    pub db_name: String,
    pub db_user: String,
    #[serde(skip_serializing)]
    pub db_password: String,
    pub use_redis: bool,
    pub status: TenantStatus,
    pub pos_type: String,
    pub created_at: DateTime<Utc>,
}

/// Fields needed to insert a tenant row during provisioning.
#[derive(Debug, Clone)]
pub struct NewTenant {
    pub restaurant_id: String,
    pub name: String,
    pub email: String,
    pub db_name: String,
    pub db_user: String,
    pub db_password: String,
    pub use_redis: bool,
    pub pos_type: String,
}

const TENANT_COLUMNS: &str = "id, restaurant_id, name, email, db_name, db_user, db_password, \
     use_redis, status, pos_type, created_at";

impl Tenant {
    pub async fn find_by_restaurant_id(
        pool: &PgPool,
        restaurant_id: &str,
    ) -> Result<Option<Tenant>, sqlx::Error> {
        sqlx::query_as::<_, Tenant>(&format!(
            "SELECT {} FROM tenants WHERE restaurant_id = $1",
            TENANT_COLUMNS
        ))
        .bind(restaurant_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn email_exists(pool: &PgPool, email: &str) -> Result<bool, sqlx::Error> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tenants WHERE email = $1")
            .bind(email)
            .fetch_one(pool)
            .await?;
        Ok(count.0 > 0)
    }

    pub async fn restaurant_id_exists(
        pool: &PgPool,
        restaurant_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM tenants WHERE restaurant_id = $1")
                .bind(restaurant_id)
                .fetch_one(pool)
                .await?;
        Ok(count.0 > 0)
    }

    pub async fn insert(pool: &PgPool, new: &NewTenant) -> Result<Tenant, sqlx::Error> {
        sqlx::query_as::<_, Tenant>(&format!(
            "INSERT INTO tenants \
                 (restaurant_id, name, email, db_name, db_user, db_password, use_redis, status, pos_type) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, 'trial', $8) \
             RETURNING {}",
            TENANT_COLUMNS
        ))
        .bind(&new.restaurant_id)
        .bind(&new.name)
        .bind(&new.email)
        .bind(&new.db_name)
        .bind(&new.db_user)
        .bind(&new.db_password)
        .bind(new.use_redis)
        .bind(&new.pos_type)
        .fetch_one(pool)
        .await
    }

    /// Registry rollback for a failed provisioning attempt. Plan assignment
    /// and module rows go with it via ON DELETE CASCADE.
    pub async fn delete(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM tenants WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn update_status(
        pool: &PgPool,
        id: Uuid,
        status: TenantStatus,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE tenants SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_password_is_never_serialized() {
        let tenant = Tenant {
            id: Uuid::nil(),
            restaurant_id: "482913".to_string(),
            name: "Trattoria Roma".to_string(),
            email: "owner@roma.example".to_string(),
            db_name: "pos_t_482913".to_string(),
            db_user: "pos_t_482913_user".to_string(),
            db_password: "topsecret".to_string(),
            use_redis: false,
            status: TenantStatus::Trial,
            pos_type: "restaurant".to_string(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&tenant).unwrap();
        assert!(!json.contains("topsecret"));
        assert!(json.contains(r#""status":"trial""#));
    }
}
