use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::Database;
use sea_orm_migration::MigratorTrait;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use iot_device_mgmt::bus::messages::{
    AlarmClosedMessage, AlarmCreatedMessage, BatteryLevelChangedMessage, DeviceNotObservedMessage,
    DeviceStatusMessage, FunctionUpdatedMessage, TOPIC_ALARM_BATTERY_LEVEL_CHANGED, TOPIC_ALARM_CLOSED,
    TOPIC_ALARM_CREATED, TOPIC_BATTERY_LEVEL_CHANGED, TOPIC_DEVICE_NOT_OBSERVED, TOPIC_DEVICE_STATUS,
    TOPIC_FUNCTION_UPDATED, TOPIC_MESSAGE_ACCEPTED,
};
use iot_device_mgmt::bus::{Bus, BusError, InMemoryBus, TopicHandler};
use iot_device_mgmt::common::AppState;
use iot_device_mgmt::config::catalog::DeviceCatalog;
use iot_device_mgmt::config::rules::AlarmRuleCatalog;
use iot_device_mgmt::config::Config;
use iot_device_mgmt::engine::{AlarmEngine, StateEngine};
use iot_device_mgmt::routes;
use iot_device_mgmt::store::{Store, StoreApi};
use iot_device_mgmt::watchdog;

/// Generates a `TopicHandler` that deserializes its body into `$msg` and
/// dispatches to `$engine.$method`. Every inbound topic wires up the same
/// shape, so one macro replaces eight near-identical struct definitions.
macro_rules! handler {
    ($name:ident, $engine:ty, $msg:ty, $method:ident) => {
        struct $name(Arc<$engine>);

        #[async_trait]
        impl TopicHandler for $name {
            async fn handle(&self, body: &[u8]) -> Result<(), BusError> {
                let msg: $msg =
                    serde_json::from_slice(body).map_err(|e| BusError::HandlerFailed(e.to_string()))?;
                self.0.$method(&msg).await;
                Ok(())
            }
        }
    };
}

handler!(AlarmDeviceStatusHandler, AlarmEngine, DeviceStatusMessage, handle_device_status);
handler!(AlarmBatteryHandler, AlarmEngine, BatteryLevelChangedMessage, handle_battery_level_changed);
handler!(AlarmNotObservedHandler, AlarmEngine, DeviceNotObservedMessage, handle_device_not_observed);
handler!(AlarmFunctionHandler, AlarmEngine, FunctionUpdatedMessage, handle_function_updated);

handler!(StateDeviceStatusHandler, StateEngine, DeviceStatusMessage, handle_device_status);
handler!(StateAlarmCreatedHandler, StateEngine, AlarmCreatedMessage, handle_alarm_created);
handler!(StateAlarmClosedHandler, StateEngine, AlarmClosedMessage, handle_alarm_closed);
handler!(StateMessageAcceptedHandler, StateEngine, DeviceStatusMessage, handle_message_accepted);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,iot_device_mgmt=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting iot-device-mgmt...");

    let config = Config::from_env()?;
    tracing::info!(address = %config.bind_address(), "Configuration loaded");

    tracing::info!("Connecting to database...");
    let db = Database::connect(&config.database_url()).await?;
    tracing::info!("Database connection established");

    tracing::info!("Running migrations...");
    migration::Migrator::up(&db, None).await?;
    tracing::info!("Migrations completed");

    let catalog = Arc::new(DeviceCatalog::load_yaml(&config.device_catalog_path)?);
    let rules = Arc::new(AlarmRuleCatalog::load_csv(&config.alarm_rule_catalog_path)?);
    tracing::info!(rules = rules.rows().len(), "Catalogs loaded");

    let store: Arc<dyn StoreApi> = Arc::new(Store::new(db.clone()));
    let bus: Arc<dyn Bus> = InMemoryBus::new();

    let alarm_engine = Arc::new(AlarmEngine::new(Arc::clone(&store), Arc::clone(&bus), Arc::clone(&rules)));
    let state_engine = Arc::new(StateEngine::new(Arc::clone(&store), Arc::clone(&bus), Arc::clone(&catalog)));

    bus.register_topic_handler(TOPIC_DEVICE_STATUS, Arc::new(AlarmDeviceStatusHandler(Arc::clone(&alarm_engine))));
    let alarm_battery_handler: Arc<dyn TopicHandler> = Arc::new(AlarmBatteryHandler(Arc::clone(&alarm_engine)));
    bus.register_topic_handler(TOPIC_BATTERY_LEVEL_CHANGED, Arc::clone(&alarm_battery_handler));
    bus.register_topic_handler(TOPIC_ALARM_BATTERY_LEVEL_CHANGED, alarm_battery_handler);
    bus.register_topic_handler(TOPIC_DEVICE_NOT_OBSERVED, Arc::new(AlarmNotObservedHandler(Arc::clone(&alarm_engine))));
    bus.register_topic_handler(TOPIC_FUNCTION_UPDATED, Arc::new(AlarmFunctionHandler(Arc::clone(&alarm_engine))));

    bus.register_topic_handler(TOPIC_DEVICE_STATUS, Arc::new(StateDeviceStatusHandler(Arc::clone(&state_engine))));
    bus.register_topic_handler(TOPIC_ALARM_CREATED, Arc::new(StateAlarmCreatedHandler(Arc::clone(&state_engine))));
    bus.register_topic_handler(TOPIC_ALARM_CLOSED, Arc::new(StateAlarmClosedHandler(Arc::clone(&state_engine))));
    bus.register_topic_handler(TOPIC_MESSAGE_ACCEPTED, Arc::new(StateMessageAcceptedHandler(Arc::clone(&state_engine))));

    bus.start().await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tracing::info!("Spawning watchdog loops...");
    tokio::spawn(watchdog::run_battery_watcher(Arc::clone(&store), Arc::clone(&bus), shutdown_rx.clone()));
    tokio::spawn(watchdog::run_last_observed_watcher(
        Arc::clone(&store),
        Arc::clone(&bus),
        Arc::clone(&catalog),
        shutdown_rx,
    ));

    let state = AppState::new(db, config.clone(), (*catalog).clone(), (*rules).clone(), Arc::clone(&bus));
    let app = routes::build_router(state);

    let addr = config.bind_address();
    tracing::info!(address = %addr, "Starting server");
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await?;

    bus.close().await;
    tracing::info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down...");
        },
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down...");
        },
    }

    let _ = shutdown_tx.send(true);
}
