//! Push profile entity (database row mapping).

use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// Database row mapping for the push_profiles table.
#[derive(Debug, Clone, FromRow)]
pub struct PushProfileEntity {
    pub user_id: String,
    pub notifications_enabled: bool,
    pub fcm_token: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<PushProfileEntity> for domain::models::PushSummary {
    fn from(entity: PushProfileEntity) -> Self {
        Self {
            notifications_enabled: entity.notifications_enabled,
            fcm_token: entity.fcm_token,
        }
    }
}
