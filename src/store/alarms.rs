use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::entity::alarms;
use crate::error::StoreResult;

use super::Store;

/// Fields required to raise an alarm (spec §3 `Alarm`). `id` is assigned
/// here if the caller didn't supply one.
#[derive(Debug, Clone)]
pub struct NewAlarm {
    pub id: Option<Uuid>,
    pub ref_id: String,
    pub alarm_type: String,
    pub description: String,
    pub severity: i16,
    pub observed_at: DateTime<Utc>,
    pub tenant: String,
}

impl Store {
    pub(super) async fn get_alarm_by_open_key(
        &self,
        ref_id: &str,
        alarm_type: &str,
        tenant: &str,
    ) -> StoreResult<alarms::Model> {
        use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
        alarms::Entity::find()
            .filter(alarms::Column::RefId.eq(ref_id.to_string()))
            .filter(alarms::Column::AlarmType.eq(alarm_type.to_string()))
            .filter(alarms::Column::Tenant.eq(tenant.to_string()))
            .filter(alarms::Column::Deleted.eq(false))
            .one(&self.db)
            .await
            .map_err(crate::error::StoreError::from)?
            .ok_or_else(|| crate::error::StoreError::not_found("alarm not found after dedup"))
    }
}
