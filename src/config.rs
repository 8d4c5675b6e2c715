use std::env;

use crate::error::ConfigError;

pub mod catalog;
pub mod rules;

#[derive(Debug, Clone)]
pub struct Config {
    // Database
    pub postgres_host: String,
    pub postgres_port: u16,
    pub postgres_user: String,
    pub postgres_password: String,
    pub postgres_dbname: String,
    pub postgres_sslmode: String,

    // HTTP surface
    pub service_port: u16,
    pub listen_address: String,
    pub control_port: u16,
    pub enable_tracing: bool,

    // Seeding
    pub allowed_seed_tenants: Vec<String>,
    pub update_existing_devices: bool,

    // Catalog file locations (not part of spec §6's env list; local to this
    // deployment's ambient config loading, following the teacher's
    // `unwrap_or_else` style for optional paths)
    pub device_catalog_path: String,
    pub alarm_rule_catalog_path: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnv` if a required environment variable
    /// is not set.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Ok(Self {
            postgres_host: env::var("POSTGRES_HOST")
                .map_err(|_| ConfigError::MissingEnv("POSTGRES_HOST"))?,
            postgres_port: env::var("POSTGRES_PORT")
                .unwrap_or_else(|_| "5432".to_string())
                .parse()
                .unwrap_or(5432),
            postgres_user: env::var("POSTGRES_USER")
                .map_err(|_| ConfigError::MissingEnv("POSTGRES_USER"))?,
            postgres_password: env::var("POSTGRES_PASSWORD")
                .map_err(|_| ConfigError::MissingEnv("POSTGRES_PASSWORD"))?,
            postgres_dbname: env::var("POSTGRES_DBNAME")
                .map_err(|_| ConfigError::MissingEnv("POSTGRES_DBNAME"))?,
            postgres_sslmode: env::var("POSTGRES_SSLMODE")
                .unwrap_or_else(|_| "disable".to_string()),

            service_port: env::var("SERVICE_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
            listen_address: env::var("LISTEN_ADDRESS").unwrap_or_else(|_| "0.0.0.0".to_string()),
            control_port: env::var("CONTROL_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .unwrap_or(8000),
            enable_tracing: env::var("ENABLE_TRACING")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),

            allowed_seed_tenants: env::var("ALLOWED_SEED_TENANTS")
                .unwrap_or_else(|_| "default".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            update_existing_devices: env::var("UPDATE_EXISTING_DEVICES")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),

            device_catalog_path: env::var("DEVICE_CATALOG_PATH")
                .unwrap_or_else(|_| "config/deviceprofiles.yaml".to_string()),
            alarm_rule_catalog_path: env::var("ALARM_RULE_CATALOG_PATH")
                .unwrap_or_else(|_| "config/alarmrules.csv".to_string()),
        })
    }

    #[must_use]
    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.postgres_user,
            self.postgres_password,
            self.postgres_host,
            self.postgres_port,
            self.postgres_dbname,
            self.postgres_sslmode,
        )
    }

    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.listen_address, self.service_port)
    }
}
