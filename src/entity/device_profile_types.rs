use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// The LWM2M type bundle attached to a `DeviceProfile` by the YAML catalog.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "device_profile_types")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub profile_name: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub urn: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::device_profiles::Entity",
        from = "Column::ProfileName",
        to = "super::device_profiles::Column::Name"
    )]
    DeviceProfile,
    #[sea_orm(
        belongs_to = "super::lwm2m_types::Entity",
        from = "Column::Urn",
        to = "super::lwm2m_types::Column::Urn"
    )]
    Lwm2mType,
}

impl Related<super::device_profiles::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DeviceProfile.def()
    }
}

impl Related<super::lwm2m_types::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Lwm2mType.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
