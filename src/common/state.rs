use sea_orm::DatabaseConnection;
use std::sync::Arc;

use crate::bus::Bus;
use crate::config::catalog::DeviceCatalog;
use crate::config::rules::AlarmRuleCatalog;
use crate::config::Config;

/// Shared handles passed to the admin router and every background worker.
/// `catalog`/`rules` are loaded once at startup and never mutated (spec
/// §4.3), so they need no lock, only `Arc` for cheap sharing across tasks.
#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub config: Arc<Config>,
    pub catalog: Arc<DeviceCatalog>,
    pub rules: Arc<AlarmRuleCatalog>,
    pub bus: Arc<dyn Bus>,
}

impl AppState {
    #[must_use]
    pub fn new(
        db: DatabaseConnection,
        config: Config,
        catalog: DeviceCatalog,
        rules: AlarmRuleCatalog,
        bus: Arc<dyn Bus>,
    ) -> Self {
        Self {
            db,
            config: Arc::new(config),
            catalog: Arc::new(catalog),
            rules: Arc::new(rules),
            bus,
        }
    }
}
