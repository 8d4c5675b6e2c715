use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::bus::messages::{
    AlarmClosedMessage, AlarmCreatedMessage, DeviceEventKind, DeviceEventMessage, DeviceStatusMessage,
};
use crate::bus::Bus;
use crate::config::catalog::DeviceCatalog;
use crate::domain::{DeviceState, MergeField, MergePatch, Severity};
use crate::entity::devices;
use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::store::{Condition, DeviceStatusSample, StoreApi};

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Maintains authoritative `devices.state`/`online` from status messages,
/// alarm lifecycle events, and (indirectly) the Watchdog's liveness checks
/// (spec §4.5).
pub struct StateEngine {
    store: Arc<dyn StoreApi>,
    bus: Arc<dyn Bus>,
    catalog: Arc<DeviceCatalog>,
}

impl StateEngine {
    #[must_use]
    pub fn new(store: Arc<dyn StoreApi>, bus: Arc<dyn Bus>, catalog: Arc<DeviceCatalog>) -> Self {
        Self { store, bus, catalog }
    }

    /// # Errors
    ///
    /// `DeviceNotFound` if no such device exists.
    pub async fn get_by_device_id(&self, device_id: &str) -> EngineResult<devices::Model> {
        self.store
            .get_device(Condition::new().with_device_id(device_id))
            .await
            .map_err(|e| map_not_found(e, device_id))
    }

    /// # Errors
    ///
    /// `DeviceNotFound` if no such device exists.
    pub async fn get_by_sensor_id(&self, sensor_id: &str) -> EngineResult<devices::Model> {
        self.store
            .get_device(Condition::new().with_sensor_id(sensor_id))
            .await
            .map_err(|e| map_not_found(e, sensor_id))
    }

    /// Returns the device whose open-alarm set contains `alarm_id` (spec
    /// §4.5).
    ///
    /// # Errors
    ///
    /// `AlarmNotFound` if no open alarm with that id exists;
    /// `DeviceNotFound` if the owning device is gone.
    pub async fn get_with_alarm_id(&self, alarm_id: Uuid) -> EngineResult<devices::Model> {
        let alarm = self
            .store
            .get_alarm(alarm_id)
            .await
            .map_err(|_| EngineError::AlarmNotFound(alarm_id.to_string()))?;
        if alarm.deleted {
            return Err(EngineError::AlarmNotFound(alarm_id.to_string()));
        }
        self.get_by_device_id(&alarm.ref_id).await
    }

    /// # Errors
    ///
    /// `Store` on a unique violation or other store failure.
    pub async fn create(&self, new_device: crate::store::NewDevice) -> EngineResult<devices::Model> {
        let device = self.store.add_device(new_device).await?;
        self.publish_event(DeviceEventKind::Created, &device.device_id, Some(device.tenant.clone()))
            .await;
        Ok(device)
    }

    /// # Errors
    ///
    /// `DeviceNotFound` if no such device exists.
    pub async fn update(&self, device_id: &str, update: crate::store::DeviceUpdate) -> EngineResult<devices::Model> {
        let device = self
            .store
            .update_device(device_id, update)
            .await
            .map_err(|e| map_not_found(e, device_id))?;
        self.publish_event(DeviceEventKind::Updated, &device.device_id, Some(device.tenant.clone()))
            .await;
        Ok(device)
    }

    /// Applies a closed set of field effects (spec §4.5); rejects tenants
    /// outside `tenants`. A no-op `MergePatch` is itself a no-op.
    ///
    /// # Errors
    ///
    /// `Forbidden` if the device's (possibly updated) tenant falls outside
    /// `tenants`. `DeviceNotFound` if no such device exists.
    pub async fn merge(&self, device_id: &str, patch: &MergePatch, tenants: &[String]) -> EngineResult<devices::Model> {
        let existing = self.get_by_device_id(device_id).await?;
        if !tenants.is_empty() && !tenants.iter().any(|t| t == &existing.tenant) {
            return Err(EngineError::Forbidden(existing.tenant));
        }
        if patch.is_empty() {
            return Ok(existing);
        }

        let mut update = crate::store::DeviceUpdate::default();
        let mut new_types: Option<Vec<String>> = None;
        let mut new_profile: Option<String> = None;

        for field in &patch.0 {
            match field {
                MergeField::Active(v) => update.active = Some(*v),
                MergeField::Name(v) => update.name = Some(v.clone()),
                MergeField::Description(v) => update.description = Some(v.clone()),
                MergeField::Environment(v) => update.environment = Some(v.clone()),
                MergeField::Source(v) => update.source = Some(v.clone()),
                MergeField::Tenant(v) => {
                    if !tenants.is_empty() && !tenants.iter().any(|t| t == v) {
                        return Err(EngineError::Forbidden(v.clone()));
                    }
                    update.tenant = Some(v.clone());
                }
                MergeField::Latitude(v) => update.latitude = Some(*v),
                MergeField::Longitude(v) => update.longitude = Some(*v),
                MergeField::Types(urns) => new_types = Some(urns.clone()),
                MergeField::DeviceProfile(name) => {
                    if self.catalog.profile(name).is_none() {
                        return Err(EngineError::BadRequest(format!("unknown device profile {name}")));
                    }
                    new_profile = Some(name.clone());
                }
            }
        }

        let mut model = self.store.update_device(device_id, update).await?;
        if let Some(profile_name) = new_profile {
            model = self.store.set_device_profile(device_id, &profile_name).await?;
        }
        if let Some(urns) = new_types {
            self.store.replace_device_types(device_id, &urns).await?;
        }
        self.publish_event(DeviceEventKind::Updated, &model.device_id, Some(model.tenant.clone()))
            .await;
        Ok(model)
    }

    /// `device-status` handler (spec §4.5): advances status/state
    /// independently, each gated on strict observed-at monotonicity;
    /// stale samples are dropped without error.
    pub async fn handle_device_status(&self, msg: &DeviceStatusMessage) {
        let device = match self.get_by_device_id(&msg.device_id).await {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(error = %e, device_id = %msg.device_id, "device-status for unknown device");
                return;
            }
        };

        let status_stale = device
            .status_observed_at
            .is_some_and(|prev| msg.timestamp <= prev.with_timezone(&Utc));
        if !status_stale {
            let sample = DeviceStatusSample {
                device_id: msg.device_id.clone(),
                observed_at: msg.timestamp,
                battery_level: msg.battery_level.unwrap_or(-1),
                rssi: msg.rssi,
                snr: msg.snr,
                frequency: msg.frequency,
                spreading_factor: msg.sf,
                dr: msg.dr,
            };
            match retry_store(|| self.store.update_status(&msg.device_id, &sample)).await {
                Ok(()) => {
                    self.publish_event(DeviceEventKind::StatusUpdated, &msg.device_id, Some(msg.tenant.clone()))
                        .await;
                }
                Err(e) => tracing::error!(error = %e, device_id = %msg.device_id, "update_status failed after retries"),
            }
        }

        let state_stale = device
            .state_observed_at
            .is_some_and(|prev| msg.timestamp <= prev.with_timezone(&Utc));
        if !state_stale {
            match retry_store(|| {
                self.store
                    .update_state(&msg.device_id, true, DeviceState::Ok, msg.timestamp)
            })
            .await
            {
                Ok(()) => {
                    self.publish_event(DeviceEventKind::StateUpdated, &msg.device_id, Some(msg.tenant.clone()))
                        .await;
                }
                Err(e) => tracing::error!(error = %e, device_id = %msg.device_id, "update_state failed after retries"),
            }
        }
    }

    /// `alarms.alarmCreated` handler (spec §4.5): recomputes the dominant
    /// state from the device's now-current open-alarm set and advances it
    /// only forward in time and only towards a worse state.
    pub async fn handle_alarm_created(&self, msg: &AlarmCreatedMessage) {
        let device_id = msg.alarm.ref_id.clone();
        let device = match self.get_by_device_id(&device_id).await {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(error = %e, device_id = %device_id, "alarmCreated for unknown device");
                return;
            }
        };

        let Some(severity) = Severity::from_i16(msg.alarm.severity) else {
            return;
        };
        let candidate = severity.dominant_state();
        let current = DeviceState::from_i16(device.state);
        let newer = device
            .state_observed_at
            .map_or(true, |prev| msg.alarm.observed_at > prev.with_timezone(&Utc));

        if newer && candidate > current {
            if let Err(e) = retry_store(|| {
                self.store
                    .update_state(&device_id, device.online, candidate, msg.alarm.observed_at)
            })
            .await
            {
                tracing::error!(error = %e, device_id = %device_id, "update_state failed after retries");
                return;
            }
            self.publish_event(DeviceEventKind::StateUpdated, &device_id, Some(device.tenant))
                .await;
        }
    }

    /// `alarms.alarmClosed` handler (spec §4.5): if no open alarms remain
    /// against the device, resets state to `OK` at the closing timestamp.
    pub async fn handle_alarm_closed(&self, msg: &AlarmClosedMessage) {
        let device = match self.get_by_device_id_by_alarm_ref(msg.id).await {
            Ok(d) => d,
            Err(e) => {
                tracing::debug!(error = %e, alarm_id = %msg.id, "alarmClosed for device no longer resolvable");
                return;
            }
        };

        let remaining = match self.store.get_alarms_by_ref_id(&device.device_id).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!(error = %e, device_id = %device.device_id, "failed to read remaining alarms");
                return;
            }
        };

        if remaining.is_empty() {
            if let Err(e) = retry_store(|| {
                self.store
                    .update_state(&device.device_id, device.online, DeviceState::Ok, msg.timestamp)
            })
            .await
            {
                tracing::error!(error = %e, device_id = %device.device_id, "update_state failed after retries");
                return;
            }
            self.publish_event(DeviceEventKind::StateUpdated, &device.device_id, Some(device.tenant))
                .await;
        }
    }

    /// `message.accepted` handler (spec §4.5): same monotonicity-gated
    /// status advance as `device-status`, without a state bump.
    pub async fn handle_message_accepted(&self, msg: &DeviceStatusMessage) {
        let device = match self.get_by_device_id(&msg.device_id).await {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(error = %e, device_id = %msg.device_id, "message.accepted for unknown device");
                return;
            }
        };
        let stale = device
            .status_observed_at
            .is_some_and(|prev| msg.timestamp <= prev.with_timezone(&Utc));
        if stale {
            return;
        }
        let sample = DeviceStatusSample {
            device_id: msg.device_id.clone(),
            observed_at: msg.timestamp,
            battery_level: msg.battery_level.unwrap_or(-1),
            rssi: msg.rssi,
            snr: msg.snr,
            frequency: msg.frequency,
            spreading_factor: msg.sf,
            dr: msg.dr,
        };
        if let Err(e) = retry_store(|| self.store.update_status(&msg.device_id, &sample)).await {
            tracing::error!(error = %e, device_id = %msg.device_id, "update_status failed after retries");
            return;
        }
        self.publish_event(DeviceEventKind::StatusUpdated, &msg.device_id, Some(msg.tenant.clone()))
            .await;
    }

    async fn get_by_device_id_by_alarm_ref(&self, alarm_id: Uuid) -> EngineResult<devices::Model> {
        let alarm = self.store.get_alarm(alarm_id).await?;
        self.get_by_device_id(&alarm.ref_id).await
    }

    async fn publish_event(&self, kind: DeviceEventKind, device_id: &str, tenant: Option<String>) {
        let mut event = DeviceEventMessage::new(kind, device_id.to_string(), Utc::now());
        event.tenant = tenant;
        if let Err(e) = self.bus.publish_on_topic(&event).await {
            tracing::error!(error = %e, device_id, "failed to publish device event");
        }
    }
}

fn map_not_found(e: crate::error::StoreError, id: &str) -> EngineError {
    if e.kind == ErrorKind::NotFound {
        EngineError::DeviceNotFound(id.to_string())
    } else {
        EngineError::Store(e)
    }
}

async fn retry_store<F, Fut, T>(mut op: F) -> Result<T, crate::error::StoreError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, crate::error::StoreError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt + 1 < RETRY_ATTEMPTS => {
                attempt += 1;
                tracing::warn!(error = %e, attempt, "store operation failed, retrying");
                tokio::time::sleep(RETRY_DELAY).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_dominant_state_orders_as_expected() {
        assert!(Severity::High.dominant_state() > Severity::Medium.dominant_state());
        assert!(Severity::Medium.dominant_state() > Severity::Low.dominant_state());
        assert_eq!(Severity::Suppressed.dominant_state(), DeviceState::Ok);
    }
}
