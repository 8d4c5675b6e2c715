//! Message envelopes exchanged on the bus (spec §4.2, §6). Each implements
//! `TopicMessage` so it can be handed to `Bus::publish_on_topic` without the
//! publisher knowing about serialization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{BusError, TopicMessage};

pub const TOPIC_DEVICE_STATUS: &str = "device-status";
pub const TOPIC_BATTERY_LEVEL_CHANGED: &str = "watchdog.batteryLevelChanged";
/// Alias for [`TOPIC_BATTERY_LEVEL_CHANGED`] (spec §4.2): the same logical
/// inbound event, reachable under either topic name.
pub const TOPIC_ALARM_BATTERY_LEVEL_CHANGED: &str = "alarms.batteryLevelChanged";
pub const TOPIC_DEVICE_NOT_OBSERVED: &str = "watchdog.deviceNotObserved";
pub const TOPIC_FUNCTION_UPDATED: &str = "function.updated";
pub const TOPIC_ALARM_CREATED: &str = "alarms.alarmCreated";
pub const TOPIC_ALARM_CLOSED: &str = "alarms.alarmClosed";
pub const TOPIC_MESSAGE_ACCEPTED: &str = "message.accepted";
pub const TOPIC_DEVICE_CREATED: &str = "device.created";
pub const TOPIC_DEVICE_UPDATED: &str = "device.updated";
pub const TOPIC_DEVICE_STATUS_UPDATED: &str = "device.statusUpdated";
pub const TOPIC_DEVICE_STATE_UPDATED: &str = "device.stateUpdated";

fn to_body(value: &impl Serialize) -> Result<Vec<u8>, BusError> {
    serde_json::to_vec(value).map_err(|e| BusError::PublishFailed {
        topic: "unknown".to_string(),
        reason: e.to_string(),
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceStatusMessage {
    #[serde(rename = "deviceID")]
    pub device_id: String,
    pub tenant: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub battery_level: Option<i32>,
    #[serde(default)]
    pub status_code: Option<i32>,
    #[serde(default)]
    pub status_messages: Vec<String>,
    #[serde(default)]
    pub rssi: Option<i32>,
    #[serde(default)]
    pub snr: Option<f64>,
    #[serde(default)]
    pub frequency: Option<f64>,
    #[serde(default)]
    pub sf: Option<i32>,
    #[serde(default)]
    pub dr: Option<i32>,
}

impl TopicMessage for DeviceStatusMessage {
    fn topic_name(&self) -> &'static str {
        TOPIC_DEVICE_STATUS
    }
    fn body(&self) -> Result<Vec<u8>, BusError> {
        to_body(self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatteryLevelChangedMessage {
    #[serde(rename = "deviceID")]
    pub device_id: String,
    pub battery_level: i32,
    pub tenant: String,
    pub observed_at: DateTime<Utc>,
}

impl TopicMessage for BatteryLevelChangedMessage {
    fn topic_name(&self) -> &'static str {
        TOPIC_BATTERY_LEVEL_CHANGED
    }
    fn body(&self) -> Result<Vec<u8>, BusError> {
        to_body(self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceNotObservedMessage {
    #[serde(rename = "deviceID")]
    pub device_id: String,
    pub tenant: String,
    pub observed_at: DateTime<Utc>,
}

impl TopicMessage for DeviceNotObservedMessage {
    fn topic_name(&self) -> &'static str {
        TOPIC_DEVICE_NOT_OBSERVED
    }
    fn body(&self) -> Result<Vec<u8>, BusError> {
        to_body(self)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CounterPayload {
    pub count: f64,
    #[serde(default)]
    pub state: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LevelPayload {
    pub current: f64,
    #[serde(default)]
    pub percent: Option<f64>,
    #[serde(default)]
    pub offset: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PresencePayload {
    pub state: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimerPayload {
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub state: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WaterQualityPayload {
    pub temperature: f64,
}

/// `function.updated` (spec §6). Optional payload shapes are `None` when
/// absent rather than zero-valued, so rule evaluation can skip a
/// predicate instead of treating a missing field as zero (spec §9 open
/// question 4).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionUpdatedMessage {
    pub id: String,
    #[serde(rename = "type")]
    pub function_type: String,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub tenant: Option<String>,
    #[serde(default)]
    pub counter: Option<CounterPayload>,
    #[serde(default)]
    pub level: Option<LevelPayload>,
    #[serde(default)]
    pub presence: Option<PresencePayload>,
    #[serde(default)]
    pub timer: Option<TimerPayload>,
    #[serde(default)]
    pub waterquality: Option<WaterQualityPayload>,
}

impl TopicMessage for FunctionUpdatedMessage {
    fn topic_name(&self) -> &'static str {
        TOPIC_FUNCTION_UPDATED
    }
    fn body(&self) -> Result<Vec<u8>, BusError> {
        to_body(self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmPayload {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub alarm_type: String,
    pub description: String,
    pub observed_at: DateTime<Utc>,
    #[serde(rename = "refID")]
    pub ref_id: String,
    pub severity: i16,
    pub tenant: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmCreatedMessage {
    pub alarm: AlarmPayload,
    pub tenant: String,
    pub timestamp: DateTime<Utc>,
}

impl TopicMessage for AlarmCreatedMessage {
    fn topic_name(&self) -> &'static str {
        TOPIC_ALARM_CREATED
    }
    fn body(&self) -> Result<Vec<u8>, BusError> {
        to_body(self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmClosedMessage {
    pub id: Uuid,
    pub tenant: String,
    pub timestamp: DateTime<Utc>,
}

impl TopicMessage for AlarmClosedMessage {
    fn topic_name(&self) -> &'static str {
        TOPIC_ALARM_CLOSED
    }
    fn body(&self) -> Result<Vec<u8>, BusError> {
        to_body(self)
    }
}

/// `device.created/updated/statusUpdated/stateUpdated` (spec §6): same
/// envelope shape, distinguished by which topic it is published on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceEventKind {
    Created,
    #[default]
    Updated,
    StatusUpdated,
    StateUpdated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceEventMessage {
    #[serde(skip)]
    pub kind: DeviceEventKind,
    #[serde(rename = "deviceID")]
    pub device_id: String,
    #[serde(default)]
    pub tenant: Option<String>,
    #[serde(default)]
    pub state: Option<i16>,
    #[serde(default)]
    pub status: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl DeviceEventMessage {
    #[must_use]
    pub fn new(kind: DeviceEventKind, device_id: String, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            device_id,
            tenant: None,
            state: None,
            status: None,
            timestamp,
        }
    }
}

impl TopicMessage for DeviceEventMessage {
    fn topic_name(&self) -> &'static str {
        match self.kind {
            DeviceEventKind::Created => TOPIC_DEVICE_CREATED,
            DeviceEventKind::Updated => TOPIC_DEVICE_UPDATED,
            DeviceEventKind::StatusUpdated => TOPIC_DEVICE_STATUS_UPDATED,
            DeviceEventKind::StateUpdated => TOPIC_DEVICE_STATE_UPDATED,
        }
    }
    fn body(&self) -> Result<Vec<u8>, BusError> {
        to_body(self)
    }
}
