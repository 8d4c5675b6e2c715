mod alarms;
mod condition;
mod devices;

pub use alarms::NewAlarm;
pub use condition::Condition;
pub use devices::{DeviceStatusSample, DeviceUpdate, NewDevice};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::DatabaseConnection;
use uuid::Uuid;

use crate::error::StoreResult;

/// The storage operations the Alarm Engine, State Engine, Watchdog, and
/// Seeder depend on (spec §4.1), kept as a trait so those collaborators can
/// be driven in tests against an in-memory fixture instead of a live
/// Postgres pool. `Store` is the only production implementation.
#[async_trait]
pub trait StoreApi: Send + Sync {
    async fn add_device(&self, d: NewDevice) -> StoreResult<crate::entity::devices::Model>;
    async fn update_device(&self, device_id: &str, update: DeviceUpdate) -> StoreResult<crate::entity::devices::Model>;
    async fn get_device(&self, cond: Condition) -> StoreResult<crate::entity::devices::Model>;
    async fn query_devices(&self, cond: Condition) -> StoreResult<(Vec<crate::entity::devices::Model>, u64)>;
    async fn add_device_status(&self, sample: DeviceStatusSample) -> StoreResult<bool>;
    async fn update_status(&self, device_id: &str, sample: &DeviceStatusSample) -> StoreResult<()>;
    async fn update_state(
        &self,
        device_id: &str,
        online: bool,
        state: crate::domain::DeviceState,
        observed_at: DateTime<Utc>,
    ) -> StoreResult<()>;
    async fn set_device_profile(&self, device_id: &str, profile_name: &str) -> StoreResult<crate::entity::devices::Model>;
    async fn replace_device_types(&self, device_id: &str, urns: &[String]) -> StoreResult<()>;
    async fn replace_device_tags(&self, device_id: &str, tags: &[String]) -> StoreResult<()>;

    async fn add_alarm(&self, a: NewAlarm) -> StoreResult<crate::entity::alarms::Model>;
    async fn close_alarm(&self, alarm_id: Uuid, tenant: &str, now: DateTime<Utc>) -> StoreResult<bool>;
    async fn query_alarms(
        &self,
        tenant: Option<&str>,
        ref_id: Option<&str>,
        include_deleted: bool,
    ) -> StoreResult<Vec<crate::entity::alarms::Model>>;
    async fn get_alarm(&self, id: Uuid) -> StoreResult<crate::entity::alarms::Model>;
    async fn get_alarms_by_ref_id(&self, ref_id: &str) -> StoreResult<Vec<crate::entity::alarms::Model>>;
}

/// Transactional storage of devices, profiles, status history, tags, and
/// alarms (spec §4.1). A thin wrapper around the pool: every public
/// operation below is its own transaction, except `add_device_status`
/// which spans insert + compare-and-advance + prune in one.
#[derive(Clone)]
pub struct Store {
    db: DatabaseConnection,
}

impl Store {
    #[must_use]
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    #[must_use]
    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}
