use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A device row carries both its identity/profile reference and the
/// current, denormalized `deviceStatus`/`deviceState` summary (spec §3), so
/// every reader needs only this one row to know "what does the device look
/// like right now" — the time-series history lives separately in
/// `device_status_history`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "devices")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub device_id: String,
    #[sea_orm(unique)]
    pub sensor_id: String,
    pub tenant: String,
    pub active: bool,
    pub name: String,
    pub description: Option<String>,
    pub environment: String,
    pub source: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub device_profile_name: String,
    pub interval_override: Option<i32>,

    // deviceStatus
    pub battery_level: i32,
    pub rssi: Option<i32>,
    pub snr: Option<f64>,
    pub frequency: Option<f64>,
    pub spreading_factor: Option<i32>,
    pub dr: Option<i32>,
    pub status_observed_at: Option<DateTimeWithTimeZone>,

    // deviceState
    pub online: bool,
    pub state: i16,
    pub state_observed_at: Option<DateTimeWithTimeZone>,

    pub deleted: bool,
    pub deleted_on: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::device_profiles::Entity",
        from = "Column::DeviceProfileName",
        to = "super::device_profiles::Column::Name"
    )]
    DeviceProfile,
    #[sea_orm(has_many = "super::device_status_history::Entity")]
    StatusHistory,
    #[sea_orm(has_many = "super::device_tags::Entity")]
    Tags,
    #[sea_orm(has_many = "super::device_types::Entity")]
    Types,
}

impl Related<super::device_profiles::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DeviceProfile.def()
    }
}

impl Related<super::device_status_history::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StatusHistory.def()
    }
}

impl Related<super::device_tags::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Tags.def()
    }
}

impl Related<super::device_types::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Types.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
