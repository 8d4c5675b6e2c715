//! Integration tests for the six device-lifecycle scenarios plus merge
//! semantics, driven against an in-memory `StoreApi` fixture.
//!
//! Run with: cargo test --test scenarios

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use uuid::Uuid;

use iot_device_mgmt::bus::messages::{
    AlarmClosedMessage, AlarmCreatedMessage, BatteryLevelChangedMessage, DeviceNotObservedMessage,
    DeviceStatusMessage,
};
use iot_device_mgmt::bus::{Bus, BusError, TopicHandler, TopicMessage};
use iot_device_mgmt::config::catalog::DeviceCatalog;
use iot_device_mgmt::config::rules::AlarmRuleCatalog;
use iot_device_mgmt::domain::{DeviceState, MergeField, MergePatch};
use iot_device_mgmt::engine::{AlarmEngine, StateEngine};
use iot_device_mgmt::entity::{alarms, devices};
use iot_device_mgmt::error::{ErrorKind, StoreError, StoreResult};
use iot_device_mgmt::seeder;
use iot_device_mgmt::store::{Condition, DeviceStatusSample, DeviceUpdate, NewAlarm, NewDevice, StoreApi};
use iot_device_mgmt::watchdog;

/// In-memory `StoreApi` double. Only interprets the subset of `Condition`
/// predicates the engines/watchdog/seeder actually issue (`device_id`,
/// `online`); anything else is a test-writer error, not a production one.
#[derive(Default)]
struct FakeStore {
    devices: Mutex<HashMap<String, devices::Model>>,
    alarms: Mutex<Vec<alarms::Model>>,
}

impl FakeStore {
    fn new() -> Self {
        Self::default()
    }

    fn seed(&self, model: devices::Model) {
        self.devices.lock().unwrap().insert(model.device_id.clone(), model);
    }

    fn device(&self, device_id: &str) -> devices::Model {
        self.devices.lock().unwrap().get(device_id).cloned().unwrap()
    }
}

fn new_device_row(device_id: &str, tenant: &str) -> devices::Model {
    devices::Model {
        device_id: device_id.to_string(),
        sensor_id: format!("{device_id}-sensor"),
        tenant: tenant.to_string(),
        active: true,
        name: device_id.to_string(),
        description: None,
        environment: "water".to_string(),
        source: None,
        latitude: None,
        longitude: None,
        device_profile_name: "unknown".to_string(),
        interval_override: None,
        battery_level: -1,
        rssi: None,
        snr: None,
        frequency: None,
        spreading_factor: None,
        dr: None,
        status_observed_at: None,
        online: false,
        state: DeviceState::Unknown.as_i16(),
        state_observed_at: None,
        deleted: false,
        deleted_on: None,
    }
}

#[async_trait]
impl StoreApi for FakeStore {
    async fn add_device(&self, d: NewDevice) -> StoreResult<devices::Model> {
        let mut devices = self.devices.lock().unwrap();
        if devices.contains_key(&d.device_id) {
            return Err(StoreError::already_exists(format!("device {} exists", d.device_id)));
        }
        let mut model = new_device_row(&d.device_id, &d.tenant);
        model.sensor_id = d.sensor_id;
        model.active = d.active;
        model.name = d.name;
        model.description = d.description;
        model.environment = d.environment;
        model.source = d.source;
        model.latitude = d.latitude;
        model.longitude = d.longitude;
        model.device_profile_name = d.device_profile_name;
        model.interval_override = d.interval_override;
        devices.insert(d.device_id, model.clone());
        Ok(model)
    }

    async fn update_device(&self, device_id: &str, update: DeviceUpdate) -> StoreResult<devices::Model> {
        let mut devices = self.devices.lock().unwrap();
        let model = devices
            .get_mut(device_id)
            .ok_or_else(|| StoreError::not_found(format!("device {device_id} not found")))?;
        if let Some(v) = update.active {
            model.active = v;
        }
        if let Some(v) = update.name {
            model.name = v;
        }
        if let Some(v) = update.description {
            model.description = Some(v);
        }
        if let Some(v) = update.environment {
            model.environment = v;
        }
        if let Some(v) = update.source {
            model.source = Some(v);
        }
        if let Some(v) = update.tenant {
            model.tenant = v;
        }
        if let Some(v) = update.latitude {
            model.latitude = Some(v);
        }
        if let Some(v) = update.longitude {
            model.longitude = Some(v);
        }
        if let Some(v) = update.interval_override {
            model.interval_override = Some(v);
        }
        Ok(model.clone())
    }

    async fn get_device(&self, cond: Condition) -> StoreResult<devices::Model> {
        let devices = self.devices.lock().unwrap();
        let Some(id) = cond.device_id_eq() else {
            panic!("FakeStore::get_device only supports device_id conditions");
        };
        devices
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("device {id} not found")))
    }

    async fn query_devices(&self, cond: Condition) -> StoreResult<(Vec<devices::Model>, u64)> {
        let devices = self.devices.lock().unwrap();
        let mut rows: Vec<devices::Model> = devices.values().cloned().collect();
        if let Some(online) = cond.online_eq() {
            rows.retain(|d| d.online == online);
        }
        let total = rows.len() as u64;
        Ok((rows, total))
    }

    async fn add_device_status(&self, sample: DeviceStatusSample) -> StoreResult<bool> {
        self.update_status(&sample.device_id.clone(), &sample).await?;
        Ok(true)
    }

    async fn update_status(&self, device_id: &str, sample: &DeviceStatusSample) -> StoreResult<()> {
        let mut devices = self.devices.lock().unwrap();
        let model = devices
            .get_mut(device_id)
            .ok_or_else(|| StoreError::not_found(format!("device {device_id} not found")))?;
        model.battery_level = sample.battery_level;
        model.rssi = sample.rssi;
        model.snr = sample.snr;
        model.frequency = sample.frequency;
        model.spreading_factor = sample.spreading_factor;
        model.dr = sample.dr;
        model.status_observed_at = Some(sample.observed_at.into());
        Ok(())
    }

    async fn update_state(
        &self,
        device_id: &str,
        online: bool,
        state: DeviceState,
        observed_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut devices = self.devices.lock().unwrap();
        let model = devices
            .get_mut(device_id)
            .ok_or_else(|| StoreError::not_found(format!("device {device_id} not found")))?;
        model.online = online;
        model.state = state.as_i16();
        model.state_observed_at = Some(observed_at.into());
        Ok(())
    }

    async fn set_device_profile(&self, device_id: &str, profile_name: &str) -> StoreResult<devices::Model> {
        let mut devices = self.devices.lock().unwrap();
        let model = devices
            .get_mut(device_id)
            .ok_or_else(|| StoreError::not_found(format!("device {device_id} not found")))?;
        model.device_profile_name = profile_name.to_string();
        Ok(model.clone())
    }

    async fn replace_device_types(&self, _device_id: &str, _urns: &[String]) -> StoreResult<()> {
        Ok(())
    }

    async fn replace_device_tags(&self, _device_id: &str, _tags: &[String]) -> StoreResult<()> {
        Ok(())
    }

    async fn add_alarm(&self, a: NewAlarm) -> StoreResult<alarms::Model> {
        let mut alarms = self.alarms.lock().unwrap();
        if let Some(existing) = alarms
            .iter()
            .find(|row| row.ref_id == a.ref_id && row.alarm_type == a.alarm_type && row.tenant == a.tenant && !row.deleted)
        {
            return Ok(existing.clone());
        }
        let model = alarms::Model {
            id: a.id.unwrap_or_else(Uuid::new_v4),
            ref_id: a.ref_id,
            alarm_type: a.alarm_type,
            description: a.description,
            severity: a.severity,
            observed_at: a.observed_at.into(),
            tenant: a.tenant,
            deleted: false,
            deleted_on: None,
        };
        alarms.push(model.clone());
        Ok(model)
    }

    async fn close_alarm(&self, alarm_id: Uuid, tenant: &str, now: DateTime<Utc>) -> StoreResult<bool> {
        let mut alarms = self.alarms.lock().unwrap();
        let Some(row) = alarms.iter_mut().find(|row| row.id == alarm_id && row.tenant == tenant) else {
            return Err(StoreError::not_found(format!("alarm {alarm_id} not found")));
        };
        if row.deleted {
            return Ok(false);
        }
        row.deleted = true;
        row.deleted_on = Some(now.into());
        Ok(true)
    }

    async fn query_alarms(
        &self,
        tenant: Option<&str>,
        ref_id: Option<&str>,
        include_deleted: bool,
    ) -> StoreResult<Vec<alarms::Model>> {
        let alarms = self.alarms.lock().unwrap();
        Ok(alarms
            .iter()
            .filter(|row| {
                tenant.is_none_or(|t| row.tenant == t)
                    && ref_id.is_none_or(|r| row.ref_id == r)
                    && (include_deleted || !row.deleted)
            })
            .cloned()
            .collect())
    }

    async fn get_alarm(&self, id: Uuid) -> StoreResult<alarms::Model> {
        self.alarms
            .lock()
            .unwrap()
            .iter()
            .find(|row| row.id == id)
            .cloned()
            .ok_or_else(|| StoreError::new(ErrorKind::NotFound, format!("alarm {id} not found")))
    }

    async fn get_alarms_by_ref_id(&self, ref_id: &str) -> StoreResult<Vec<alarms::Model>> {
        Ok(self
            .alarms
            .lock()
            .unwrap()
            .iter()
            .filter(|row| row.ref_id == ref_id && !row.deleted)
            .cloned()
            .collect())
    }
}

/// Captures every published message by topic instead of dispatching to
/// registered handlers; the scenarios below drive engines directly rather
/// than round-tripping through a consumer loop.
#[derive(Default)]
struct FakeBus {
    published: Mutex<Vec<(&'static str, Vec<u8>)>>,
}

impl FakeBus {
    fn new() -> Self {
        Self::default()
    }

    fn last(&self, topic: &str) -> Option<Vec<u8>> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(t, _)| *t == topic)
            .map(|(_, body)| body.clone())
    }

    fn count(&self, topic: &str) -> usize {
        self.published.lock().unwrap().iter().filter(|(t, _)| *t == topic).count()
    }
}

#[async_trait]
impl Bus for FakeBus {
    fn register_topic_handler(&self, _topic: &str, _handler: Arc<dyn TopicHandler>) {}

    async fn publish_on_topic(&self, message: &dyn TopicMessage) -> Result<(), BusError> {
        self.published
            .lock()
            .unwrap()
            .push((message.topic_name(), message.body()?));
        Ok(())
    }

    async fn start(&self) {}
    async fn close(&self) {}
}

fn device_catalog() -> Arc<DeviceCatalog> {
    Arc::new(
        DeviceCatalog::parse(
            "deviceprofiles:\n\
             \x20\x20- name: elsys\n\
             \x20\x20\x20\x20decoder: elsys\n\
             \x20\x20\x20\x20interval: 3600\n\
             \x20\x20\x20\x20types: []\n\
             types: []\n",
        )
        .unwrap(),
    )
}

fn battery_rules(severity: i16) -> Arc<AlarmRuleCatalog> {
    Arc::new(AlarmRuleCatalog::parse(&format!(
        "deviceID;functionID;name;type;min;max;severity;description\n\
         ;;batteryLevel;MIN;20;;{severity};battery low on {{ID}}\n"
    )))
}

#[tokio::test]
async fn status_advances_then_stale_drops() {
    let store = Arc::new(FakeStore::new());
    store.seed(new_device_row("dev-1", "default"));
    let bus = Arc::new(FakeBus::new());
    let engine = StateEngine::new(store.clone(), bus.clone(), device_catalog());

    let t0 = Utc::now() - ChronoDuration::seconds(10);
    engine
        .handle_device_status(&DeviceStatusMessage {
            device_id: "dev-1".to_string(),
            tenant: "default".to_string(),
            timestamp: t0,
            battery_level: Some(80),
            status_code: None,
            status_messages: vec![],
            rssi: None,
            snr: None,
            frequency: None,
            sf: None,
            dr: None,
        })
        .await;

    let after_first = store.device("dev-1");
    assert_eq!(after_first.battery_level, 80);
    assert_eq!(after_first.state, DeviceState::Ok.as_i16());
    assert_eq!(bus.count("device.statusUpdated"), 1);

    // A second message with an earlier or equal timestamp must be dropped
    // as stale, leaving the stored battery level untouched.
    engine
        .handle_device_status(&DeviceStatusMessage {
            device_id: "dev-1".to_string(),
            tenant: "default".to_string(),
            timestamp: t0,
            battery_level: Some(10),
            status_code: None,
            status_messages: vec![],
            rssi: None,
            snr: None,
            frequency: None,
            sf: None,
            dr: None,
        })
        .await;

    let after_second = store.device("dev-1");
    assert_eq!(after_second.battery_level, 80, "stale status sample must not overwrite newer data");
    assert_eq!(bus.count("device.statusUpdated"), 1, "stale sample must not publish a second statusUpdated event");
}

#[tokio::test]
async fn alarm_created_warning() {
    let store = Arc::new(FakeStore::new());
    store.seed(new_device_row("dev-2", "default"));
    let bus = Arc::new(FakeBus::new());
    let alarm_engine = AlarmEngine::new(store.clone(), bus.clone(), battery_rules(2));
    let state_engine = StateEngine::new(store.clone(), bus.clone(), device_catalog());

    let observed_at = Utc::now();
    alarm_engine
        .handle_battery_level_changed(&BatteryLevelChangedMessage {
            device_id: "dev-2".to_string(),
            battery_level: 5,
            tenant: "default".to_string(),
            observed_at,
        })
        .await;

    let raised = store.get_alarms_by_ref_id("dev-2").await.unwrap();
    assert_eq!(raised.len(), 1);
    assert_eq!(raised[0].severity, 2);

    let msg = AlarmCreatedMessage {
        alarm: iot_device_mgmt::bus::messages::AlarmPayload {
            id: raised[0].id,
            alarm_type: raised[0].alarm_type.clone(),
            description: raised[0].description.clone(),
            observed_at,
            ref_id: raised[0].ref_id.clone(),
            severity: raised[0].severity,
            tenant: raised[0].tenant.clone(),
        },
        tenant: "default".to_string(),
        timestamp: observed_at,
    };
    state_engine.handle_alarm_created(&msg).await;

    assert_eq!(store.device("dev-2").state, DeviceState::Warning.as_i16());
}

#[tokio::test]
async fn alarm_closed_back_to_ok() {
    let store = Arc::new(FakeStore::new());
    store.seed(new_device_row("dev-3", "default"));
    let bus = Arc::new(FakeBus::new());
    let alarm_engine = AlarmEngine::new(store.clone(), bus.clone(), battery_rules(3));
    let state_engine = StateEngine::new(store.clone(), bus.clone(), device_catalog());

    let observed_at = Utc::now();
    let alarm = alarm_engine
        .add_alarm(NewAlarm {
            id: None,
            ref_id: "dev-3".to_string(),
            alarm_type: "batteryLevel".to_string(),
            description: "low".to_string(),
            severity: 3,
            observed_at,
            tenant: "default".to_string(),
        })
        .await
        .unwrap();

    state_engine
        .handle_alarm_created(&AlarmCreatedMessage {
            alarm: iot_device_mgmt::bus::messages::AlarmPayload {
                id: alarm.id,
                alarm_type: alarm.alarm_type.clone(),
                description: alarm.description.clone(),
                observed_at,
                ref_id: alarm.ref_id.clone(),
                severity: alarm.severity,
                tenant: alarm.tenant.clone(),
            },
            tenant: "default".to_string(),
            timestamp: observed_at,
        })
        .await;
    assert_eq!(store.device("dev-3").state, DeviceState::Error.as_i16());

    let closed_at = observed_at + ChronoDuration::seconds(5);
    alarm_engine.close(alarm.id, &["default".to_string()]).await.unwrap();
    state_engine
        .handle_alarm_closed(&AlarmClosedMessage {
            id: alarm.id,
            tenant: "default".to_string(),
            timestamp: closed_at,
        })
        .await;

    assert_eq!(store.device("dev-3").state, DeviceState::Ok.as_i16());
}

#[tokio::test]
async fn rule_dedup() {
    let store = Arc::new(FakeStore::new());
    store.seed(new_device_row("dev-4", "default"));
    let bus = Arc::new(FakeBus::new());
    let alarm_engine = AlarmEngine::new(store.clone(), bus.clone(), battery_rules(2));

    let observed_at = Utc::now();
    let first = alarm_engine
        .add_alarm(NewAlarm {
            id: None,
            ref_id: "dev-4".to_string(),
            alarm_type: "batteryLevel".to_string(),
            description: "low".to_string(),
            severity: 2,
            observed_at,
            tenant: "default".to_string(),
        })
        .await
        .unwrap();
    let second = alarm_engine
        .add_alarm(NewAlarm {
            id: None,
            ref_id: "dev-4".to_string(),
            alarm_type: "batteryLevel".to_string(),
            description: "low again".to_string(),
            severity: 2,
            observed_at: observed_at + ChronoDuration::seconds(1),
            tenant: "default".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(first.id, second.id, "second raise of the same (refID, alarmType, tenant) must dedup to the same alarm");
    assert_eq!(store.get_alarms_by_ref_id("dev-4").await.unwrap().len(), 1);
    assert_eq!(bus.count("alarms.alarmCreated"), 1, "dedup must not publish a second alarmCreated event");
}

#[tokio::test]
async fn watchdog_not_observed() {
    let store = Arc::new(FakeStore::new());
    let mut stale = new_device_row("dev-5", "default");
    stale.online = true;
    stale.status_observed_at = Some((Utc::now() - ChronoDuration::hours(2)).into());
    store.seed(stale);
    let mut fresh = new_device_row("dev-5-fresh", "default");
    fresh.online = true;
    fresh.status_observed_at = Some(Utc::now().into());
    store.seed(fresh);

    let bus = Arc::new(FakeBus::new());
    let catalog = device_catalog();

    watchdog::scan_last_observed(&*store, &(bus.clone() as Arc<dyn Bus>), &catalog).await;

    assert_eq!(bus.count("watchdog.deviceNotObserved"), 1, "only the stale device should raise deviceNotObserved");
    let body = bus.last("watchdog.deviceNotObserved").unwrap();
    let msg: DeviceNotObservedMessage = serde_json::from_slice(&body).unwrap();
    assert_eq!(msg.device_id, "dev-5");
}

#[tokio::test]
async fn seed_overwrite_preserves_interval() {
    let store = FakeStore::new();
    let catalog = device_catalog();

    let csv_initial = "devEUI;internalID;lat;lon;where;types;sensorType;name;description;active;tenant;interval;source\n\
                        AA-BB;dev-6;1.0;2.0;water;;elsys;sensor 6;desc;true;default;600;lora\n";
    seeder::seed_from_csv(csv_initial, &store, &catalog, &["default".to_string()], true)
        .await
        .unwrap();
    assert_eq!(store.device("dev-6").interval_override, Some(600));

    let csv_reseed = "devEUI;internalID;lat;lon;where;types;sensorType;name;description;active;tenant;interval;source\n\
                       AA-BB;dev-6;1.0;2.0;water;;elsys;sensor 6;desc;true;default;1800;lora\n";
    seeder::seed_from_csv(csv_reseed, &store, &catalog, &["default".to_string()], true)
        .await
        .unwrap();

    assert_eq!(
        store.device("dev-6").interval_override,
        Some(1800),
        "reseeding an existing device with update_existing must overwrite the interval override"
    );
}

#[tokio::test]
async fn merge_applies_field_effects_and_enforces_tenant() {
    let store = Arc::new(FakeStore::new());
    store.seed(new_device_row("dev-7", "default"));
    let bus = Arc::new(FakeBus::new());
    let engine = StateEngine::new(store.clone(), bus.clone(), device_catalog());

    let patch = MergePatch(vec![
        MergeField::Name("renamed".to_string()),
        MergeField::Active(false),
    ]);
    let updated = engine
        .merge("dev-7", &patch, &["default".to_string()])
        .await
        .unwrap();
    assert_eq!(updated.name, "renamed");
    assert!(!updated.active);

    let forbidden = engine.merge("dev-7", &patch, &["other-tenant".to_string()]).await;
    assert!(matches!(forbidden, Err(iot_device_mgmt::error::EngineError::Forbidden(_))));

    let empty_patch = MergePatch::default();
    let unchanged = engine.merge("dev-7", &empty_patch, &["default".to_string()]).await.unwrap();
    assert_eq!(unchanged.name, "renamed");
}
