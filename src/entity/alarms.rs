use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A raised condition against a `ref_id` (spec §3). `ref_id` is usually a
/// `deviceID` but may be a `functionID`, so it is not a formal foreign key
/// to `devices`. At most one non-deleted row may exist per
/// `(ref_id, alarm_type, tenant)`, enforced by a partial unique index in the
/// migration (`WHERE NOT deleted`) so the store can translate the resulting
/// unique-violation into the "silent no-op" dedup semantics spec §3/§8
/// require.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "alarms")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub ref_id: String,
    pub alarm_type: String,
    pub description: String,
    pub severity: i16,
    pub observed_at: DateTimeWithTimeZone,
    pub tenant: String,
    pub deleted: bool,
    pub deleted_on: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
