//! C6: periodic scans of the device store that close the loop back into
//! the Alarm Engine (spec §4.6). Two independent `tokio::time::interval`
//! loops, modeled directly on `river_db::sync::scheduler`'s
//! ticker-then-loop shape: consume the first tick immediately, then wait
//! for shutdown or the next tick on every iteration.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::interval;

use crate::bus::messages::{BatteryLevelChangedMessage, DeviceNotObservedMessage};
use crate::bus::Bus;
use crate::config::catalog::DeviceCatalog;
use crate::store::Condition;
use crate::store::StoreApi;

const BATTERY_WATCH_PERIOD: Duration = Duration::from_secs(30 * 60);
const LAST_OBSERVED_WATCH_PERIOD: Duration = Duration::from_secs(10 * 60);

/// Battery-level watcher (spec §4.6): every 30 minutes, diffs each online
/// device's battery level against an in-memory snapshot and publishes a
/// change event. First-sight devices are recorded, not published — there
/// is no prior value to compare against.
pub async fn run_battery_watcher(store: Arc<dyn StoreApi>, bus: Arc<dyn Bus>, mut shutdown: watch::Receiver<bool>) {
    tracing::info!(period_secs = BATTERY_WATCH_PERIOD.as_secs(), "starting battery-level watcher");

    let mut ticker = interval(BATTERY_WATCH_PERIOD);
    ticker.tick().await;

    let mut last_seen: HashMap<String, i32> = HashMap::new();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                scan_battery_levels(store.as_ref(), &bus, &mut last_seen).await;
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::info!("battery-level watcher shutting down");
                    return;
                }
            }
        }
    }
}

/// Pure scan step factored out of the ticker loop so it can be driven
/// directly against a `StoreApi` fixture in tests.
pub async fn scan_battery_levels(store: &dyn StoreApi, bus: &Arc<dyn Bus>, last_seen: &mut HashMap<String, i32>) {
    let devices = match store.query_devices(Condition::new().with_online(true)).await {
        Ok((rows, _total)) => rows,
        Err(e) => {
            tracing::error!(error = %e, "battery-level watcher: failed to list online devices");
            return;
        }
    };

    let now = Utc::now();
    for device in devices {
        let previous = last_seen.insert(device.device_id.clone(), device.battery_level);
        let Some(previous) = previous else {
            continue;
        };
        if previous == device.battery_level {
            continue;
        }

        let msg = BatteryLevelChangedMessage {
            device_id: device.device_id.clone(),
            battery_level: device.battery_level,
            tenant: device.tenant,
            observed_at: now,
        };
        if let Err(e) = bus.publish_on_topic(&msg).await {
            tracing::warn!(error = %e, device_id = %device.device_id, "failed to publish batteryLevelChanged");
        }
    }
}

/// Last-observed watcher (spec §4.6): every 10 minutes, flags online
/// devices whose last status report predates `now - deviceProfile.interval`.
/// Devices with `interval == 0` (no liveness expectation) are skipped.
pub async fn run_last_observed_watcher(
    store: Arc<dyn StoreApi>,
    bus: Arc<dyn Bus>,
    catalog: Arc<DeviceCatalog>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(period_secs = LAST_OBSERVED_WATCH_PERIOD.as_secs(), "starting last-observed watcher");

    let mut ticker = interval(LAST_OBSERVED_WATCH_PERIOD);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                scan_last_observed(store.as_ref(), &bus, &catalog).await;
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::info!("last-observed watcher shutting down");
                    return;
                }
            }
        }
    }
}

/// Pure scan step factored out of the ticker loop so it can be driven
/// directly against a `StoreApi` fixture in tests.
pub async fn scan_last_observed(store: &dyn StoreApi, bus: &Arc<dyn Bus>, catalog: &DeviceCatalog) {
    let devices = match store.query_devices(Condition::new().with_online(true)).await {
        Ok((rows, _total)) => rows,
        Err(e) => {
            tracing::error!(error = %e, "last-observed watcher: failed to list online devices");
            return;
        }
    };

    let now = Utc::now();
    for device in devices {
        let interval_secs = device
            .interval_override
            .or_else(|| catalog.profile(&device.device_profile_name).map(|p| p.interval))
            .unwrap_or(3600);
        if interval_secs == 0 {
            continue;
        }

        let cutoff = now - chrono::Duration::seconds(i64::from(interval_secs));
        let is_stale = device
            .status_observed_at
            .is_none_or(|observed| observed.with_timezone(&Utc) <= cutoff);
        if !is_stale {
            continue;
        }

        let msg = DeviceNotObservedMessage {
            device_id: device.device_id.clone(),
            tenant: device.tenant,
            observed_at: now,
        };
        if let Err(e) = bus.publish_on_topic(&msg).await {
            tracing::warn!(error = %e, device_id = %device.device_id, "failed to publish deviceNotObserved");
        }
    }
}
