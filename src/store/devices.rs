use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter,
    TransactionTrait,
};

use crate::entity::{device_status_history, device_tags, device_types, devices};
use crate::error::{ErrorKind, StoreError, StoreResult};

use super::{Condition, Store, StoreApi};

/// Fields required to create a device (spec §3). `deviceStatus`/`deviceState`
/// start at their seeded defaults; callers that need different seed values
/// go through `add_device_status`/`update_state` afterwards.
#[derive(Debug, Clone)]
pub struct NewDevice {
    pub device_id: String,
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
}

/// Partial update for `SetDevice` (spec §4.1): only `Some` fields are
/// written.
#[derive(Debug, Clone, Default)]
pub struct DeviceUpdate {
    pub active: Option<bool>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub environment: Option<String>,
    pub source: Option<String>,
    pub tenant: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub interval_override: Option<i32>,
}

/// A single accepted status sample (spec §3 `deviceStatus`).
#[derive(Debug, Clone)]
pub struct DeviceStatusSample {
    pub device_id: String,
    pub observed_at: DateTime<Utc>,
    pub battery_level: i32,
    pub rssi: Option<i32>,
    pub snr: Option<f64>,
    pub frequency: Option<f64>,
    pub spreading_factor: Option<i32>,
    pub dr: Option<i32>,
}

const STATUS_HISTORY_RETENTION_DAYS: i64 = 21;

#[async_trait]
impl StoreApi for Store {
    /// # Errors
    ///
    /// `AlreadyExists` on a unique violation of `deviceID`/`sensorID`.
    async fn add_device(&self, d: NewDevice) -> StoreResult<devices::Model> {
        let model = devices::ActiveModel {
            device_id: Set(d.device_id),
            sensor_id: Set(d.sensor_id),
            tenant: Set(d.tenant),
            active: Set(d.active),
            name: Set(d.name),
            description: Set(d.description),
            environment: Set(d.environment),
            source: Set(d.source),
            latitude: Set(d.latitude),
            longitude: Set(d.longitude),
            device_profile_name: Set(d.device_profile_name),
            interval_override: Set(d.interval_override),
            battery_level: Set(-1),
            rssi: Set(None),
            snr: Set(None),
            frequency: Set(None),
            spreading_factor: Set(None),
            dr: Set(None),
            status_observed_at: Set(None),
            online: Set(false),
            state: Set(crate::domain::DeviceState::Unknown.as_i16()),
            state_observed_at: Set(None),
            deleted: Set(false),
            deleted_on: Set(None),
        };
        model.insert(&self.db).await.map_err(StoreError::from)
    }

    /// # Errors
    ///
    /// `NotFound` when the device does not exist.
    async fn update_device(&self, device_id: &str, update: DeviceUpdate) -> StoreResult<devices::Model> {
        let existing = devices::Entity::find_by_id(device_id.to_string())
            .one(&self.db)
            .await
            .map_err(StoreError::from)?
            .ok_or_else(|| StoreError::not_found(format!("device {device_id} not found")))?;

        let mut model: devices::ActiveModel = existing.into();
        if let Some(active) = update.active {
            model.active = Set(active);
        }
        if let Some(name) = update.name {
            model.name = Set(name);
        }
        if let Some(description) = update.description {
            model.description = Set(Some(description));
        }
        if let Some(environment) = update.environment {
            model.environment = Set(environment);
        }
        if let Some(source) = update.source {
            model.source = Set(Some(source));
        }
        if let Some(tenant) = update.tenant {
            model.tenant = Set(tenant);
        }
        if let Some(latitude) = update.latitude {
            model.latitude = Set(Some(latitude));
        }
        if let Some(longitude) = update.longitude {
            model.longitude = Set(Some(longitude));
        }
        if let Some(interval) = update.interval_override {
            model.interval_override = Set(Some(interval));
        }
        model.update(&self.db).await.map_err(StoreError::from)
    }

    /// # Errors
    ///
    /// `NotFound` when no row matches, `TooManyRows` when more than one
    /// does under a condition intended to be unique.
    async fn get_device(&self, cond: Condition) -> StoreResult<devices::Model> {
        let rows = cond.apply(devices::Entity::find()).all(&self.db).await?;
        match rows.len() {
            0 => Err(StoreError::not_found("device not found")),
            1 => Ok(rows.into_iter().next().unwrap()),
            _ => Err(StoreError::new(ErrorKind::TooManyRows, "multiple devices matched")),
        }
    }

    /// # Errors
    ///
    /// Propagates any underlying query failure.
    async fn query_devices(&self, cond: Condition) -> StoreResult<(Vec<devices::Model>, u64)> {
        let query = cond.clone().apply(devices::Entity::find());
        let count_query = cond.apply(devices::Entity::find());
        let total = count_query.count(&self.db).await.map_err(StoreError::from)?;
        let rows = query.all(&self.db).await.map_err(StoreError::from)?;
        Ok((rows, total))
    }

    /// Appends a status history row and, in the same transaction, advances
    /// the device's denormalized summary iff `sample.observed_at` is
    /// strictly after the stored `status_observed_at`; then prunes rows
    /// older than 3 weeks for that device (spec §4.1). No-ops silently
    /// (returns `Ok(false)`) when the device is soft-deleted.
    ///
    /// # Errors
    ///
    /// `NotFound` if the device does not exist.
    async fn add_device_status(&self, sample: DeviceStatusSample) -> StoreResult<bool> {
        let txn = self.db.begin().await.map_err(StoreError::from)?;

        let device = devices::Entity::find_by_id(sample.device_id.clone())
            .one(&txn)
            .await
            .map_err(StoreError::from)?
            .ok_or_else(|| StoreError::not_found(format!("device {} not found", sample.device_id)))?;

        if device.deleted {
            txn.rollback().await.ok();
            return Ok(false);
        }

        let history = device_status_history::ActiveModel {
            device_id: Set(sample.device_id.clone()),
            observed_at: Set(sample.observed_at.into()),
            battery_level: Set(sample.battery_level),
            rssi: Set(sample.rssi),
            snr: Set(sample.snr),
            frequency: Set(sample.frequency),
            spreading_factor: Set(sample.spreading_factor),
            dr: Set(sample.dr),
        };
        history.insert(&txn).await.map_err(StoreError::from)?;

        let advanced = device
            .status_observed_at
            .map_or(true, |prev| sample.observed_at > prev);

        if advanced {
            let mut model: devices::ActiveModel = device.into();
            model.battery_level = Set(sample.battery_level);
            model.rssi = Set(sample.rssi);
            model.snr = Set(sample.snr);
            model.frequency = Set(sample.frequency);
            model.spreading_factor = Set(sample.spreading_factor);
            model.dr = Set(sample.dr);
            model.status_observed_at = Set(Some(sample.observed_at.into()));
            model.update(&txn).await.map_err(StoreError::from)?;
        }

        let cutoff = sample.observed_at - chrono::Duration::days(STATUS_HISTORY_RETENTION_DAYS);
        device_status_history::Entity::delete_many()
            .filter(device_status_history::Column::DeviceId.eq(sample.device_id.clone()))
            .filter(device_status_history::Column::ObservedAt.lt(cutoff))
            .exec(&txn)
            .await
            .map_err(StoreError::from)?;

        txn.commit().await.map_err(StoreError::from)?;
        Ok(advanced)
    }

    /// Overwrites the current status summary unconditionally; a no-op when
    /// the device is soft-deleted (spec §4.1).
    ///
    /// # Errors
    ///
    /// `NotFound` if the device does not exist.
    async fn update_status(&self, device_id: &str, sample: &DeviceStatusSample) -> StoreResult<()> {
        let device = devices::Entity::find_by_id(device_id.to_string())
            .one(&self.db)
            .await
            .map_err(StoreError::from)?
            .ok_or_else(|| StoreError::not_found(format!("device {device_id} not found")))?;
        if device.deleted {
            return Ok(());
        }
        let mut model: devices::ActiveModel = device.into();
        model.battery_level = Set(sample.battery_level);
        model.rssi = Set(sample.rssi);
        model.snr = Set(sample.snr);
        model.frequency = Set(sample.frequency);
        model.spreading_factor = Set(sample.spreading_factor);
        model.dr = Set(sample.dr);
        model.status_observed_at = Set(Some(sample.observed_at.into()));
        model.update(&self.db).await.map_err(StoreError::from)?;
        Ok(())
    }

    /// Overwrites the current state summary unconditionally; a no-op when
    /// the device is soft-deleted (spec §4.1).
    ///
    /// # Errors
    ///
    /// `NotFound` if the device does not exist.
    async fn update_state(
        &self,
        device_id: &str,
        online: bool,
        state: crate::domain::DeviceState,
        observed_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let device = devices::Entity::find_by_id(device_id.to_string())
            .one(&self.db)
            .await
            .map_err(StoreError::from)?
            .ok_or_else(|| StoreError::not_found(format!("device {device_id} not found")))?;
        if device.deleted {
            return Ok(());
        }
        let mut model: devices::ActiveModel = device.into();
        model.online = Set(online);
        model.state = Set(state.as_i16());
        model.state_observed_at = Set(Some(observed_at.into()));
        model.update(&self.db).await.map_err(StoreError::from)?;
        Ok(())
    }

    /// Resolves and replaces `deviceProfile` (spec §4.5 `Merge`).
    ///
    /// # Errors
    ///
    /// `NotFound` if the device does not exist.
    async fn set_device_profile(&self, device_id: &str, profile_name: &str) -> StoreResult<devices::Model> {
        let existing = devices::Entity::find_by_id(device_id.to_string())
            .one(&self.db)
            .await
            .map_err(StoreError::from)?
            .ok_or_else(|| StoreError::not_found(format!("device {device_id} not found")))?;
        let mut model: devices::ActiveModel = existing.into();
        model.device_profile_name = Set(profile_name.to_string());
        model.update(&self.db).await.map_err(StoreError::from)
    }

    /// Replaces a device's `lwm2mTypes` set (spec §4.5 `Merge`): delete then
    /// insert under one transaction.
    ///
    /// # Errors
    ///
    /// Propagates any underlying query failure.
    async fn replace_device_types(&self, device_id: &str, urns: &[String]) -> StoreResult<()> {
        let txn = self.db.begin().await.map_err(StoreError::from)?;
        device_types::Entity::delete_many()
            .filter(device_types::Column::DeviceId.eq(device_id.to_string()))
            .exec(&txn)
            .await
            .map_err(StoreError::from)?;
        for urn in urns {
            device_types::ActiveModel {
                device_id: Set(device_id.to_string()),
                urn: Set(urn.clone()),
            }
            .insert(&txn)
            .await
            .map_err(StoreError::from)?;
        }
        txn.commit().await.map_err(StoreError::from)?;
        Ok(())
    }

    /// Replaces a device's free-form tag set (spec §4.7 seeding): delete
    /// then insert under one transaction.
    ///
    /// # Errors
    ///
    /// Propagates any underlying query failure.
    async fn replace_device_tags(&self, device_id: &str, tags: &[String]) -> StoreResult<()> {
        let txn = self.db.begin().await.map_err(StoreError::from)?;
        device_tags::Entity::delete_many()
            .filter(device_tags::Column::DeviceId.eq(device_id.to_string()))
            .exec(&txn)
            .await
            .map_err(StoreError::from)?;
        for tag in tags {
            device_tags::ActiveModel {
                device_id: Set(device_id.to_string()),
                tag: Set(tag.clone()),
            }
            .insert(&txn)
            .await
            .map_err(StoreError::from)?;
        }
        txn.commit().await.map_err(StoreError::from)?;
        Ok(())
    }

    /// Idempotent: a unique-violation on `(ref_id, alarm_type, tenant)`
    /// among non-deleted rows is translated into the existing open row
    /// rather than a fatal error (spec §3/§8 dedup law).
    ///
    /// # Errors
    ///
    /// Propagates any store failure other than the dedup unique-violation.
    async fn add_alarm(&self, a: super::NewAlarm) -> StoreResult<crate::entity::alarms::Model> {
        use crate::entity::alarms;
        use sea_orm::ActiveModelTrait;
        use sea_orm::ActiveValue::Set;
        let id = a.id.unwrap_or_else(uuid::Uuid::new_v4);
        let model = alarms::ActiveModel {
            id: Set(id),
            ref_id: Set(a.ref_id.clone()),
            alarm_type: Set(a.alarm_type.clone()),
            description: Set(a.description),
            severity: Set(a.severity),
            observed_at: Set(a.observed_at.into()),
            tenant: Set(a.tenant.clone()),
            deleted: Set(false),
            deleted_on: Set(None),
        };
        match model.insert(&self.db).await {
            Ok(row) => Ok(row),
            Err(e) => {
                let store_err = StoreError::from(e);
                if store_err.kind == ErrorKind::AlreadyExists {
                    self.get_alarm_by_open_key(&a.ref_id, &a.alarm_type, &a.tenant).await
                } else {
                    Err(store_err)
                }
            }
        }
    }

    /// Idempotent: closing an already-closed alarm is a no-op (spec §8).
    ///
    /// # Errors
    ///
    /// `NotFound` if no alarm with `alarm_id` exists for `tenant`.
    async fn close_alarm(&self, alarm_id: uuid::Uuid, tenant: &str, now: DateTime<Utc>) -> StoreResult<bool> {
        use crate::entity::alarms;
        use sea_orm::{ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter};
        let existing = alarms::Entity::find_by_id(alarm_id)
            .filter(alarms::Column::Tenant.eq(tenant.to_string()))
            .one(&self.db)
            .await
            .map_err(StoreError::from)?
            .ok_or_else(|| StoreError::not_found(format!("alarm {alarm_id} not found")))?;

        if existing.deleted {
            return Ok(false);
        }

        let mut model: alarms::ActiveModel = existing.into();
        model.deleted = Set(true);
        model.deleted_on = Set(Some(now.into()));
        model.update(&self.db).await.map_err(StoreError::from)?;
        Ok(true)
    }

    /// # Errors
    ///
    /// Propagates any underlying query failure.
    async fn query_alarms(
        &self,
        tenant: Option<&str>,
        ref_id: Option<&str>,
        include_deleted: bool,
    ) -> StoreResult<Vec<crate::entity::alarms::Model>> {
        use crate::entity::alarms;
        use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
        let mut query = alarms::Entity::find();
        if let Some(tenant) = tenant {
            query = query.filter(alarms::Column::Tenant.eq(tenant.to_string()));
        }
        if let Some(ref_id) = ref_id {
            query = query.filter(alarms::Column::RefId.eq(ref_id.to_string()));
        }
        if !include_deleted {
            query = query.filter(alarms::Column::Deleted.eq(false));
        }
        query.all(&self.db).await.map_err(StoreError::from)
    }

    /// # Errors
    ///
    /// `NotFound` if no such alarm exists.
    async fn get_alarm(&self, id: uuid::Uuid) -> StoreResult<crate::entity::alarms::Model> {
        use crate::entity::alarms;
        use sea_orm::EntityTrait;
        alarms::Entity::find_by_id(id)
            .one(&self.db)
            .await
            .map_err(StoreError::from)?
            .ok_or_else(|| StoreError::not_found(format!("alarm {id} not found")))
    }

    /// # Errors
    ///
    /// Propagates any underlying query failure.
    async fn get_alarms_by_ref_id(&self, ref_id: &str) -> StoreResult<Vec<crate::entity::alarms::Model>> {
        use crate::entity::alarms;
        use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
        alarms::Entity::find()
            .filter(alarms::Column::RefId.eq(ref_id.to_string()))
            .filter(alarms::Column::Deleted.eq(false))
            .all(&self.db)
            .await
            .map_err(StoreError::from)
    }
}

impl Store {
    /// Not part of `StoreApi`: only the admin surface's future tenant-list
    /// endpoint needs this, not the engines/watchdog/seeder the trait
    /// exists to make testable.
    ///
    /// # Errors
    ///
    /// Propagates any underlying query failure.
    pub async fn get_tenants(&self) -> StoreResult<Vec<String>> {
        use sea_orm::QuerySelect;
        let tenants: Vec<String> = devices::Entity::find()
            .filter(devices::Column::Deleted.eq(false))
            .select_only()
            .column(devices::Column::Tenant)
            .distinct()
            .into_tuple()
            .all(&self.db)
            .await
            .map_err(StoreError::from)?;
        Ok(tenants)
    }
}
