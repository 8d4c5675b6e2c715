use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::bus::messages::{
    AlarmCreatedMessage, AlarmPayload, BatteryLevelChangedMessage, DeviceNotObservedMessage,
    DeviceStatusMessage, FunctionUpdatedMessage,
};
use crate::bus::Bus;
use crate::config::rules::{AlarmConfig, AlarmRuleCatalog};
use crate::domain::RuleType;
use crate::entity::alarms;
use crate::error::{EngineError, EngineResult};
use crate::store::{NewAlarm, StoreApi};

const FALLBACK_RETRY_ATTEMPTS: u32 = 3;
const FALLBACK_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Evaluates alarm rules over telemetry and owns alarm lifecycle (spec
/// §4.4). Holds the same three collaborators the spec names: the store,
/// the bus, and the immutable rule catalog.
pub struct AlarmEngine {
    store: Arc<dyn StoreApi>,
    bus: Arc<dyn Bus>,
    rules: Arc<AlarmRuleCatalog>,
}

impl AlarmEngine {
    #[must_use]
    pub fn new(store: Arc<dyn StoreApi>, bus: Arc<dyn Bus>, rules: Arc<AlarmRuleCatalog>) -> Self {
        Self { store, bus, rules }
    }

    /// # Errors
    ///
    /// Propagates any store failure.
    pub async fn get_alarms(&self, tenant: Option<&str>, ref_id: Option<&str>) -> EngineResult<Vec<alarms::Model>> {
        Ok(self.store.query_alarms(tenant, ref_id, false).await?)
    }

    /// # Errors
    ///
    /// `AlarmNotFound` if no such alarm exists.
    pub async fn get_alarm_by_id(&self, id: Uuid) -> EngineResult<alarms::Model> {
        self.store
            .get_alarm(id)
            .await
            .map_err(|e| match e.kind {
                crate::error::ErrorKind::NotFound => EngineError::AlarmNotFound(id.to_string()),
                _ => EngineError::Store(e),
            })
    }

    /// # Errors
    ///
    /// Propagates any store failure.
    pub async fn get_alarms_by_ref_id(&self, ref_id: &str) -> EngineResult<Vec<alarms::Model>> {
        Ok(self.store.get_alarms_by_ref_id(ref_id).await?)
    }

    /// Deduplicated by `(refID, alarmType, tenant)`; publishes
    /// `alarms.alarmCreated` only on first creation (spec §4.4).
    ///
    /// # Errors
    ///
    /// Propagates any store failure.
    pub async fn add_alarm(&self, new_alarm: NewAlarm) -> EngineResult<alarms::Model> {
        let existing = self
            .store
            .get_alarms_by_ref_id(&new_alarm.ref_id)
            .await?
            .into_iter()
            .find(|a| a.alarm_type == new_alarm.alarm_type && a.tenant == new_alarm.tenant);

        if let Some(existing) = existing {
            return Ok(existing);
        }

        let row = self.store.add_alarm(new_alarm).await?;
        self.publish_created(&row).await;
        Ok(row)
    }

    /// Tenant-checked; publishes `alarms.alarmClosed` (spec §4.4).
    ///
    /// # Errors
    ///
    /// `Forbidden` if `tenants` does not contain the alarm's tenant.
    /// `AlarmNotFound` if no such alarm exists.
    pub async fn close(&self, alarm_id: Uuid, tenants: &[String]) -> EngineResult<()> {
        let alarm = self.get_alarm_by_id(alarm_id).await?;
        if !tenants.iter().any(|t| t == &alarm.tenant) {
            return Err(EngineError::Forbidden(alarm.tenant));
        }

        let now = Utc::now();
        let closed = self
            .store
            .close_alarm(alarm_id, &alarm.tenant, now)
            .await?;
        if closed {
            self.bus
                .publish_on_topic(&crate::bus::messages::AlarmClosedMessage {
                    id: alarm_id,
                    tenant: alarm.tenant,
                    timestamp: now,
                })
                .await
                .ok();
        }
        Ok(())
    }

    async fn publish_created(&self, row: &alarms::Model) {
        let msg = AlarmCreatedMessage {
            alarm: AlarmPayload {
                id: row.id,
                alarm_type: row.alarm_type.clone(),
                description: row.description.clone(),
                observed_at: row.observed_at.with_timezone(&Utc),
                ref_id: row.ref_id.clone(),
                severity: row.severity,
                tenant: row.tenant.clone(),
            },
            tenant: row.tenant.clone(),
            timestamp: Utc::now(),
        };
        if let Err(e) = self.bus.publish_on_topic(&msg).await {
            tracing::error!(error = %e, alarm_id = %row.id, "failed to publish alarms.alarmCreated");
        }
    }

    /// `watchdog.batteryLevelChanged` handler (spec §4.4): matches on
    /// `name == "batteryLevel"`.
    pub async fn handle_battery_level_changed(&self, msg: &BatteryLevelChangedMessage) {
        let Some(cfg) = self.rules.find(&msg.device_id, "batteryLevel") else {
            return;
        };
        if cfg.severity == -1 {
            return;
        }
        let description = render_description(&cfg.description, cfg.min, cfg.max, &msg.device_id, f64::from(msg.battery_level));
        let new_alarm = NewAlarm {
            id: None,
            ref_id: msg.device_id.clone(),
            alarm_type: "batteryLevel".to_string(),
            description,
            severity: cfg.severity,
            observed_at: msg.observed_at,
            tenant: msg.tenant.clone(),
        };
        if let Err(e) = self.add_alarm(new_alarm).await {
            tracing::error!(error = %e, device_id = %msg.device_id, "failed to raise batteryLevel alarm");
        }
    }

    /// `watchdog.deviceNotObserved` handler (spec §4.4): falls back to a
    /// default Medium alarm when no rule matches.
    pub async fn handle_device_not_observed(&self, msg: &DeviceNotObservedMessage) {
        let (severity, description) = match self.rules.find(&msg.device_id, "deviceNotObserved") {
            Some(cfg) if cfg.severity != -1 => (
                cfg.severity,
                render_description(&cfg.description, cfg.min, cfg.max, &msg.device_id, 0.0),
            ),
            Some(_) => return,
            None => (2, format!("device {} has not been observed recently", msg.device_id)),
        };
        let new_alarm = NewAlarm {
            id: None,
            ref_id: msg.device_id.clone(),
            alarm_type: "deviceNotObserved".to_string(),
            description,
            severity,
            observed_at: msg.observed_at,
            tenant: msg.tenant.clone(),
        };
        if let Err(e) = self.add_alarm(new_alarm).await {
            tracing::error!(error = %e, device_id = %msg.device_id, "failed to raise deviceNotObserved alarm");
        }
    }

    /// `device-status` handler (spec §4.4): a zero status code is healthy
    /// and raises nothing; otherwise attempts a rule match, falling back
    /// to a Low-severity alarm retried up to 3 times with a 1s delay.
    pub async fn handle_device_status(&self, msg: &DeviceStatusMessage) {
        let Some(code) = msg.status_code else {
            return;
        };
        if code == 0 {
            return;
        }

        let alarm_type = msg
            .status_messages
            .first()
            .cloned()
            .unwrap_or_else(|| code.to_string());

        if let Some(cfg) = self.rules.find(&msg.device_id, &alarm_type) {
            if cfg.severity == -1 {
                return;
            }
            let description = render_description(&cfg.description, cfg.min, cfg.max, &msg.device_id, f64::from(code));
            let new_alarm = NewAlarm {
                id: None,
                ref_id: msg.device_id.clone(),
                alarm_type,
                description,
                severity: cfg.severity,
                observed_at: msg.timestamp,
                tenant: msg.tenant.clone(),
            };
            if let Err(e) = self.add_alarm(new_alarm).await {
                tracing::error!(error = %e, device_id = %msg.device_id, "failed to raise status alarm");
            }
            return;
        }

        let description = if msg.status_messages.is_empty() {
            format!("device {} reported status code {code}", msg.device_id)
        } else {
            msg.status_messages.join(", ")
        };

        let mut attempt = 0;
        loop {
            let new_alarm = NewAlarm {
                id: None,
                ref_id: msg.device_id.clone(),
                alarm_type: alarm_type.clone(),
                description: description.clone(),
                severity: 1,
                observed_at: msg.timestamp,
                tenant: msg.tenant.clone(),
            };
            match self.add_alarm(new_alarm).await {
                Ok(_) => break,
                Err(e) => {
                    attempt += 1;
                    if attempt >= FALLBACK_RETRY_ATTEMPTS {
                        tracing::error!(error = %e, device_id = %msg.device_id, attempt, "fallback status alarm failed after retries");
                        break;
                    }
                    tracing::warn!(error = %e, device_id = %msg.device_id, attempt, "fallback status alarm failed, retrying");
                    tokio::time::sleep(FALLBACK_RETRY_DELAY).await;
                }
            }
        }
    }

    /// `function.updated` handler (spec §4.4, §6): dispatches by rule type
    /// on the matching payload shape, skipping (not panicking) when the
    /// field the predicate needs is absent (spec §9 open question 4).
    pub async fn handle_function_updated(&self, msg: &FunctionUpdatedMessage) {
        let Some(cfg) = self.rules.find(&msg.id, &msg.function_type) else {
            return;
        };
        if cfg.severity == -1 {
            return;
        }

        let Some(value) = evaluate_rule(cfg, msg) else {
            return;
        };

        let description = render_description(&cfg.description, cfg.min, cfg.max, &msg.id, value);
        let tenant = msg.tenant.clone().unwrap_or_default();
        let new_alarm = NewAlarm {
            id: None,
            ref_id: msg.id.clone(),
            alarm_type: msg.function_type.clone(),
            description,
            severity: cfg.severity,
            observed_at: Utc::now(),
            tenant,
        };
        if let Err(e) = self.add_alarm(new_alarm).await {
            tracing::error!(error = %e, function_id = %msg.id, "failed to raise function alarm");
        }
    }
}

fn render_description(template: &str, min: f64, max: f64, id: &str, value: f64) -> String {
    template
        .replace("{MIN}", &min.to_string())
        .replace("{MAX}", &max.to_string())
        .replace("{ID}", id)
        .replace("{VALUE}", &value.to_string())
}

/// Pure rule evaluation (spec §4.4 truth table): returns the offending
/// value when the predicate for `cfg.rule_type` holds against `msg`'s
/// payload, `None` when the required field for that predicate is absent
/// or the predicate does not hold.
#[must_use]
pub fn evaluate_rule(cfg: &AlarmConfig, msg: &FunctionUpdatedMessage) -> Option<f64> {
    match cfg.rule_type {
        RuleType::Min => {
            if let Some(counter) = &msg.counter {
                return (counter.count < cfg.min).then_some(counter.count);
            }
            if let Some(level) = &msg.level {
                let percent = level.percent?;
                return (percent < cfg.min).then_some(percent);
            }
            if let Some(wq) = &msg.waterquality {
                return (wq.temperature < cfg.min).then_some(wq.temperature);
            }
            None
        }
        RuleType::Max => {
            if let Some(counter) = &msg.counter {
                return (counter.count > cfg.max).then_some(counter.count);
            }
            if let Some(level) = &msg.level {
                let percent = level.percent?;
                return (percent > cfg.max).then_some(percent);
            }
            if let Some(wq) = &msg.waterquality {
                return (wq.temperature > cfg.max).then_some(wq.temperature);
            }
            if let Some(timer) = &msg.timer {
                let duration = timer.duration?;
                return (timer.state && duration > cfg.max).then_some(duration);
            }
            None
        }
        RuleType::Between => {
            if let Some(counter) = &msg.counter {
                return (!(counter.count > cfg.min && counter.count < cfg.max)).then_some(counter.count);
            }
            if let Some(level) = &msg.level {
                return (!(level.current > cfg.min && level.current < cfg.max)).then_some(level.current);
            }
            if let Some(wq) = &msg.waterquality {
                return (!(wq.temperature > cfg.min && wq.temperature < cfg.max)).then_some(wq.temperature);
            }
            None
        }
        RuleType::True => {
            let counter_true = msg.counter.as_ref().map(|c| c.state);
            let presence_true = msg.presence.as_ref().map(|p| p.state);
            let timer_true = msg.timer.as_ref().map(|t| t.state);
            match (counter_true, presence_true, timer_true) {
                (None, None, None) => None,
                (c, p, t) => {
                    let hit = c.unwrap_or(false) || p.unwrap_or(false) || t.unwrap_or(false);
                    hit.then_some(1.0)
                }
            }
        }
        RuleType::False => {
            let counter_false = msg.counter.as_ref().map(|c| !c.state);
            let presence_false = msg.presence.as_ref().map(|p| !p.state);
            match (counter_false, presence_false) {
                (None, None) => None,
                (c, p) => {
                    let hit = c.unwrap_or(false) || p.unwrap_or(false);
                    hit.then_some(0.0)
                }
            }
        }
        RuleType::Noop => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::messages::{CounterPayload, LevelPayload, TimerPayload, WaterQualityPayload};

    fn cfg(rule_type: RuleType, min: f64, max: f64) -> AlarmConfig {
        AlarmConfig {
            id: "dev1".to_string(),
            name: "test".to_string(),
            rule_type,
            min,
            max,
            severity: 1,
            description: "{VALUE} out of range [{MIN},{MAX}] for {ID}".to_string(),
        }
    }

    fn msg_with_counter(count: f64, state: bool) -> FunctionUpdatedMessage {
        FunctionUpdatedMessage {
            id: "dev1".to_string(),
            function_type: "test".to_string(),
            counter: Some(CounterPayload { count, state }),
            ..Default::default()
        }
    }

    #[test]
    fn min_rule_fires_below_threshold() {
        let cfg = cfg(RuleType::Min, 20.0, 0.0);
        assert_eq!(evaluate_rule(&cfg, &msg_with_counter(10.0, false)), Some(10.0));
        assert_eq!(evaluate_rule(&cfg, &msg_with_counter(30.0, false)), None);
    }

    #[test]
    fn max_rule_fires_above_threshold() {
        let cfg = cfg(RuleType::Max, 0.0, 20.0);
        assert_eq!(evaluate_rule(&cfg, &msg_with_counter(30.0, false)), Some(30.0));
        assert_eq!(evaluate_rule(&cfg, &msg_with_counter(10.0, false)), None);
    }

    #[test]
    fn between_rule_fires_outside_open_interval() {
        let cfg = cfg(RuleType::Between, 10.0, 20.0);
        assert_eq!(evaluate_rule(&cfg, &msg_with_counter(25.0, false)), Some(25.0));
        assert_eq!(evaluate_rule(&cfg, &msg_with_counter(15.0, false)), None);
        // boundary values are NOT strictly within (open interval), so they fire
        assert_eq!(evaluate_rule(&cfg, &msg_with_counter(10.0, false)), Some(10.0));
    }

    #[test]
    fn true_rule_fires_on_any_true_flag() {
        let cfg = cfg(RuleType::True, 0.0, 0.0);
        assert_eq!(evaluate_rule(&cfg, &msg_with_counter(0.0, true)), Some(1.0));
        assert_eq!(evaluate_rule(&cfg, &msg_with_counter(0.0, false)), None);
    }

    #[test]
    fn missing_required_field_skips_rule_without_panicking() {
        let cfg = cfg(RuleType::Max, 0.0, 20.0);
        let msg = FunctionUpdatedMessage {
            id: "dev1".to_string(),
            function_type: "test".to_string(),
            level: Some(LevelPayload { current: 5.0, percent: None, offset: None }),
            ..Default::default()
        };
        assert_eq!(evaluate_rule(&cfg, &msg), None);
    }

    #[test]
    fn max_rule_on_timer_requires_duration_and_state() {
        let cfg = cfg(RuleType::Max, 0.0, 60.0);
        let running_over = FunctionUpdatedMessage {
            id: "dev1".to_string(),
            function_type: "test".to_string(),
            timer: Some(TimerPayload {
                start_time: Utc::now(),
                end_time: None,
                duration: Some(90.0),
                state: true,
            }),
            ..Default::default()
        };
        assert_eq!(evaluate_rule(&cfg, &running_over), Some(90.0));

        let stopped = FunctionUpdatedMessage {
            timer: Some(TimerPayload {
                start_time: Utc::now(),
                end_time: None,
                duration: Some(90.0),
                state: false,
            }),
            ..running_over
        };
        assert_eq!(evaluate_rule(&cfg, &stopped), None);
    }

    #[test]
    fn waterquality_min_rule() {
        let cfg = cfg(RuleType::Min, 5.0, 0.0);
        let msg = FunctionUpdatedMessage {
            id: "dev1".to_string(),
            function_type: "test".to_string(),
            waterquality: Some(WaterQualityPayload { temperature: 2.0 }),
            ..Default::default()
        };
        assert_eq!(evaluate_rule(&cfg, &msg), Some(2.0));
    }
}
