use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Loaded once from YAML at startup (spec §4.3); the reserved `unknown`
/// profile is guaranteed present by the loader.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "device_profiles")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub name: String,
    pub decoder: String,
    pub interval: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::device_profile_types::Entity")]
    Types,
    #[sea_orm(has_many = "super::devices::Entity")]
    Devices,
}

impl Related<super::device_profile_types::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Types.def()
    }
}

impl Related<super::devices::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Devices.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
