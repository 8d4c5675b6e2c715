use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Bounded time-series of accepted status samples (spec §4.1): rows older
/// than 3 weeks are pruned in the same transaction as the insert that
/// advances the owning device's current summary.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "device_status_history")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub device_id: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub observed_at: DateTimeWithTimeZone,
    pub battery_level: i32,
    pub rssi: Option<i32>,
    pub snr: Option<f64>,
    pub frequency: Option<f64>,
    pub spreading_factor: Option<i32>,
    pub dr: Option<i32>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::devices::Entity",
        from = "Column::DeviceId",
        to = "super::devices::Column::DeviceId"
    )]
    Device,
}

impl Related<super::devices::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Device.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
