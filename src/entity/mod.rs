pub mod alarms;
pub mod device_profile_types;
pub mod device_profiles;
pub mod device_status_history;
pub mod device_tags;
pub mod device_types;
pub mod devices;
pub mod lwm2m_types;

pub use sea_orm::entity::prelude::*;
