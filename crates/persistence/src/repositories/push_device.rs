//! Push device repository for database operations.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::entities::PushDeviceEntity;
use crate::metrics::QueryTimer;

const DEVICE_COLUMNS: &str =
    "user_id, token, name, platform, user_agent, enabled, created_at, last_seen_at";

/// Repository for push device database operations.
#[derive(Clone)]
pub struct PushDeviceRepository {
    pool: PgPool,
}

impl PushDeviceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// List a user's devices, most recently seen first.
    pub async fn list_by_last_seen(
        &self,
        user_id: &str,
    ) -> Result<Vec<PushDeviceEntity>, sqlx::Error> {
        let timer = QueryTimer::new("list_push_devices_ordered");
        let result = sqlx::query_as::<_, PushDeviceEntity>(&format!(
            "SELECT {} FROM push_devices WHERE user_id = $1 ORDER BY last_seen_at DESC",
            DEVICE_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await;
        timer.record();
        result
    }

    /// List a user's devices in storage order.
    pub async fn list(&self, user_id: &str) -> Result<Vec<PushDeviceEntity>, sqlx::Error> {
        let timer = QueryTimer::new("list_push_devices");
        let result = sqlx::query_as::<_, PushDeviceEntity>(&format!(
            "SELECT {} FROM push_devices WHERE user_id = $1",
            DEVICE_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await;
        timer.record();
        result
    }

    pub async fn find(
        &self,
        user_id: &str,
        token: &str,
    ) -> Result<Option<PushDeviceEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_push_device");
        let result = sqlx::query_as::<_, PushDeviceEntity>(&format!(
            "SELECT {} FROM push_devices WHERE user_id = $1 AND token = $2",
            DEVICE_COLUMNS
        ))
        .bind(user_id)
        .bind(token)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Insert or overwrite the row keyed by `(user_id, token)`.
    #[allow(clippy::too_many_arguments)]
    pub async fn upsert(
        &self,
        user_id: &str,
        token: &str,
        name: Option<&str>,
        platform: Option<&str>,
        user_agent: Option<&str>,
        enabled: bool,
        created_at: DateTime<Utc>,
        last_seen_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        let timer = QueryTimer::new("upsert_push_device");
        let result = sqlx::query(
            r#"
            INSERT INTO push_devices (user_id, token, name, platform, user_agent, enabled, created_at, last_seen_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (user_id, token) DO UPDATE SET
                name = EXCLUDED.name,
                platform = EXCLUDED.platform,
                user_agent = EXCLUDED.user_agent,
                enabled = EXCLUDED.enabled,
                created_at = EXCLUDED.created_at,
                last_seen_at = EXCLUDED.last_seen_at
            "#,
        )
        .bind(user_id)
        .bind(token)
        .bind(name)
        .bind(platform)
        .bind(user_agent)
        .bind(enabled)
        .bind(created_at)
        .bind(last_seen_at)
        .execute(&self.pool)
        .await;
        timer.record();
        result.map(|_| ())
    }

    /// Patch an existing row. Absent fields keep their value.
    pub async fn update(
        &self,
        user_id: &str,
        token: &str,
        name: Option<&str>,
        enabled: Option<bool>,
        last_seen_at: Option<DateTime<Utc>>,
    ) -> Result<Option<PushDeviceEntity>, sqlx::Error> {
        let timer = QueryTimer::new("update_push_device");
        let result = sqlx::query_as::<_, PushDeviceEntity>(&format!(
            r#"
            UPDATE push_devices SET
                name = COALESCE($3, name),
                enabled = COALESCE($4, enabled),
                last_seen_at = COALESCE($5, last_seen_at)
            WHERE user_id = $1 AND token = $2
            RETURNING {}
            "#,
            DEVICE_COLUMNS
        ))
        .bind(user_id)
        .bind(token)
        .bind(name)
        .bind(enabled)
        .bind(last_seen_at)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Delete a row. Returns the number of rows removed.
    pub async fn delete(&self, user_id: &str, token: &str) -> Result<u64, sqlx::Error> {
        let timer = QueryTimer::new("delete_push_device");
        let result = sqlx::query("DELETE FROM push_devices WHERE user_id = $1 AND token = $2")
            .bind(user_id)
            .bind(token)
            .execute(&self.pool)
            .await?;
        timer.record();
        Ok(result.rows_affected())
    }
}
