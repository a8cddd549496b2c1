//! Push profile repository for database operations.

use sqlx::PgPool;

use crate::entities::PushProfileEntity;
use crate::metrics::QueryTimer;

/// Repository for the per-user push summary row.
#[derive(Clone)]
pub struct PushProfileRepository {
    pool: PgPool,
}

impl PushProfileRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find(&self, user_id: &str) -> Result<Option<PushProfileEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_push_profile");
        let result = sqlx::query_as::<_, PushProfileEntity>(
            r#"
            SELECT user_id, notifications_enabled, fcm_token, updated_at
            FROM push_profiles
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }

    pub async fn upsert(
        &self,
        user_id: &str,
        notifications_enabled: bool,
        fcm_token: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        let timer = QueryTimer::new("upsert_push_profile");
        let result = sqlx::query(
            r#"
            INSERT INTO push_profiles (user_id, notifications_enabled, fcm_token, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (user_id) DO UPDATE SET
                notifications_enabled = EXCLUDED.notifications_enabled,
                fcm_token = EXCLUDED.fcm_token,
                updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(notifications_enabled)
        .bind(fcm_token)
        .execute(&self.pool)
        .await;
        timer.record();
        result.map(|_| ())
    }
}
