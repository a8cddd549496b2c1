//! Push device entity (database row mapping).

use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// Database row mapping for the push_devices table.
#[derive(Debug, Clone, FromRow)]
pub struct PushDeviceEntity {
    pub user_id: String,
    pub token: String,
    pub name: Option<String>,
    pub platform: Option<String>,
    pub user_agent: Option<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl From<PushDeviceEntity> for domain::models::DeviceRecord {
    fn from(entity: PushDeviceEntity) -> Self {
        Self {
            token: entity.token,
            name: entity.name,
            platform: entity.platform,
            user_agent: entity.user_agent,
            enabled: entity.enabled,
            created_at: entity.created_at,
            last_seen_at: entity.last_seen_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_device_entity_to_domain() {
        let entity = PushDeviceEntity {
            user_id: "user-1".to_string(),
            token: "tok_abc".to_string(),
            name: Some("Laptop".to_string()),
            platform: Some("Linux x86_64".to_string()),
            user_agent: None,
            enabled: false,
            created_at: Utc::now(),
            last_seen_at: Utc::now(),
        };

        let domain: domain::models::DeviceRecord = entity.clone().into();
        assert_eq!(domain.token, entity.token);
        assert_eq!(domain.name, entity.name);
        assert!(!domain.enabled);
        assert_eq!(domain.last_seen_at, entity.last_seen_at);
    }
}
