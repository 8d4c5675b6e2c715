use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// The global LWM2M type catalog loaded from YAML (spec §4.3): `urn` to a
/// human-readable `name`, e.g. `urn:oma:lwm2m:ext:3303` -> `Temperature`.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "lwm2m_types")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub urn: String,
    pub name: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
