//! C7: idempotent import of the device inventory from a delimited stream
//! (spec §4.7), gated by a caller-supplied tenant allowlist. Parsed with the
//! same semicolon `csv::ReaderBuilder` idiom as `config::rules`.

use std::sync::Arc;

use crate::config::catalog::DeviceCatalog;
use crate::domain::is_valid_environment;
use crate::error::{EngineError, EngineResult};
use crate::store::{Condition, DeviceUpdate, NewDevice, StoreApi};

const COLUMNS: usize = 13;

#[derive(Debug, Clone, PartialEq)]
struct InventoryRow {
    dev_eui: String,
    internal_id: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
    environment: String,
    types: Vec<String>,
    sensor_type: String,
    name: String,
    description: String,
    active: bool,
    tenant: String,
    interval: i32,
    source: String,
}

/// Seeds (creates or updates) devices from a semicolon-delimited CSV stream
/// (spec §4.7). A single malformed row fails the whole seed before any
/// writes happen; per-row tenant mismatches are skipped with a warning, not
/// a failure. Returns the count of rows created and updated.
///
/// # Errors
///
/// `EngineError::BadRequest` if any row fails the `where`/`sensorType`
/// validation. Propagates store failures encountered while applying rows.
pub async fn seed_from_csv(
    text: &str,
    store: &dyn StoreApi,
    catalog: &Arc<DeviceCatalog>,
    allowed_tenants: &[String],
    update_existing: bool,
) -> EngineResult<SeedSummary> {
    let rows = parse_rows(text, catalog)?;

    let mut summary = SeedSummary::default();
    for row in rows {
        if !allowed_tenants.iter().any(|t| t == &row.tenant) {
            tracing::warn!(tenant = %row.tenant, device_id = %row.internal_id, "seed row skipped: tenant not in allowlist");
            summary.skipped += 1;
            continue;
        }

        let device_id = row.internal_id.to_lowercase();
        let existing = store
            .get_device(Condition::new().with_device_id(device_id.clone()))
            .await
            .ok();

        match existing {
            None => {
                store
                    .add_device(NewDevice {
                        device_id: device_id.clone(),
                        sensor_id: row.dev_eui.clone(),
                        tenant: row.tenant.clone(),
                        active: row.active,
                        name: row.name.clone(),
                        description: Some(row.description.clone()),
                        environment: row.environment.clone(),
                        source: Some(row.source.clone()),
                        latitude: row.latitude,
                        longitude: row.longitude,
                        device_profile_name: catalog
                            .profile_by_decoder(&row.sensor_type)
                            .map(|p| p.name.clone())
                            .unwrap_or_else(|| "unknown".to_string()),
                        interval_override: Some(row.interval),
                    })
                    .await?;
                store.replace_device_types(&device_id, &row.types).await?;
                summary.created += 1;
            }
            Some(device) if update_existing => {
                if device.sensor_id != row.dev_eui {
                    tracing::warn!(device_id = %device_id, expected = %device.sensor_id, got = %row.dev_eui, "seed row: sensorID mismatch, keeping existing value");
                }
                store
                    .update_device(
                        &device_id,
                        DeviceUpdate {
                            active: Some(row.active),
                            name: Some(row.name.clone()),
                            description: Some(row.description.clone()),
                            environment: Some(row.environment.clone()),
                            source: Some(row.source.clone()),
                            tenant: None,
                            latitude: row.latitude,
                            longitude: row.longitude,
                            interval_override: Some(row.interval),
                        },
                    )
                    .await?;
                if let Some(profile) = catalog.profile_by_decoder(&row.sensor_type) {
                    store.set_device_profile(&device_id, &profile.name).await?;
                }
                store.replace_device_types(&device_id, &row.types).await?;
                summary.updated += 1;
            }
            Some(_) => {
                summary.skipped += 1;
            }
        }
    }

    Ok(summary)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
}

fn parse_rows(text: &str, catalog: &DeviceCatalog) -> EngineResult<Vec<InventoryRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let known_decoders: Vec<String> = catalog.known_decoders().into_iter().map(str::to_string).collect();

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(|e| EngineError::BadRequest(format!("row {}: {e}", line + 2)))?;
        if record.len() < COLUMNS {
            return Err(EngineError::BadRequest(format!(
                "row {}: expected {COLUMNS} columns, got {}",
                line + 2,
                record.len()
            )));
        }

        let environment = record.get(4).unwrap_or("").trim().to_string();
        if !is_valid_environment(&environment) {
            return Err(EngineError::BadRequest(format!(
                "row {}: invalid environment {environment:?}",
                line + 2
            )));
        }

        let sensor_type = record.get(6).unwrap_or("").trim().to_string();
        if !known_decoders.iter().any(|d| d == &sensor_type) {
            return Err(EngineError::BadRequest(format!(
                "row {}: unknown sensor type {sensor_type:?}",
                line + 2
            )));
        }

        let types = record
            .get(5)
            .unwrap_or("")
            .split(',')
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();

        rows.push(InventoryRow {
            dev_eui: record.get(0).unwrap_or("").trim().to_string(),
            internal_id: record.get(1).unwrap_or("").trim().to_string(),
            latitude: record.get(2).and_then(|s| s.trim().parse().ok()),
            longitude: record.get(3).and_then(|s| s.trim().parse().ok()),
            environment,
            types,
            sensor_type,
            name: record.get(7).unwrap_or("").trim().to_string(),
            description: record.get(8).unwrap_or("").trim().to_string(),
            active: record.get(9).unwrap_or("").trim().eq_ignore_ascii_case("true"),
            tenant: record.get(10).unwrap_or("").trim().to_string(),
            interval: record.get(11).and_then(|s| s.trim().parse().ok()).unwrap_or(3600),
            source: record.get(12).unwrap_or("").trim().to_string(),
        });
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> DeviceCatalog {
        DeviceCatalog::parse(
            "deviceprofiles:\n  - name: elsys\n    decoder: elsys\n    interval: 3600\n    types: []\ntypes: []\n",
        )
        .unwrap()
    }

    #[test]
    fn rejects_invalid_environment() {
        let csv = "devEUI;internalID;lat;lon;where;types;sensorType;name;description;active;tenant;interval;source\n\
                    aa;dev-1;;;bogus;;elsys;n;d;true;default;3600;src\n";
        let err = parse_rows(csv, &catalog()).unwrap_err();
        assert!(matches!(err, EngineError::BadRequest(_)));
    }

    #[test]
    fn rejects_unknown_sensor_type() {
        let csv = "devEUI;internalID;lat;lon;where;types;sensorType;name;description;active;tenant;interval;source\n\
                    aa;dev-1;;;water;;bogus;n;d;true;default;3600;src\n";
        let err = parse_rows(csv, &catalog()).unwrap_err();
        assert!(matches!(err, EngineError::BadRequest(_)));
    }

    #[test]
    fn parses_valid_row_with_lowercased_types() {
        let csv = "devEUI;internalID;lat;lon;where;types;sensorType;name;description;active;tenant;interval;source\n\
                    AA-BB;Dev-1;1.0;2.0;water;URN:A,URN:B;elsys;sensor 1;desc;true;default;600;lora\n";
        let rows = parse_rows(csv, &catalog()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].types, vec!["urn:a", "urn:b"]);
        assert_eq!(rows[0].interval, 600);
    }
}
