use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, Condition as SeaCondition, QueryFilter, QueryOrder, QuerySelect, Select};

use crate::entity::devices;

/// Characters `WithSearch` keeps; everything else (including raw `%`, which
/// is re-added explicitly as a wildcard) is stripped to defeat LIKE
/// injection (spec §4.1).
const SEARCH_ALLOWED_EXTRA: &[char] = &[' ', '_', ',', ';', '(', ')', '.'];

/// Composable predicate + pagination builder over `devices` (spec §4.1).
/// Consuming (`with_*` returns `Self`) so call sites read as a pipeline,
/// mirroring the filter-building style used in the admin route handlers
/// this crate's teacher wrote for `zones`/`stations` lookups.
#[derive(Debug, Clone)]
pub struct Condition {
    filter: SeaCondition,
    include_deleted: bool,
    sort_by: Option<&'static str>,
    sort_desc: bool,
    offset: Option<u64>,
    limit: Option<u64>,
    device_id: Option<String>,
    online: Option<bool>,
}

impl Default for Condition {
    fn default() -> Self {
        Self {
            filter: SeaCondition::all(),
            include_deleted: false,
            sort_by: None,
            sort_desc: false,
            offset: None,
            limit: None,
            device_id: None,
            online: None,
        }
    }
}

impl Condition {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        let device_id = device_id.into();
        self.filter = self.filter.add(devices::Column::DeviceId.eq(device_id.clone()));
        self.device_id = Some(device_id);
        self
    }

    #[must_use]
    pub fn with_sensor_id(mut self, sensor_id: impl Into<String>) -> Self {
        self.filter = self.filter.add(devices::Column::SensorId.eq(sensor_id.into()));
        self
    }

    #[must_use]
    pub fn with_tenant(mut self, tenants: &[String]) -> Self {
        if !tenants.is_empty() {
            self.filter = self.filter.add(devices::Column::Tenant.is_in(tenants.to_vec()));
        }
        self
    }

    #[must_use]
    pub fn with_active(mut self, active: bool) -> Self {
        self.filter = self.filter.add(devices::Column::Active.eq(active));
        self
    }

    #[must_use]
    pub fn with_online(mut self, online: bool) -> Self {
        self.filter = self.filter.add(devices::Column::Online.eq(online));
        self.online = Some(online);
        self
    }

    /// Restricts to devices whose resolved `lwm2mTypes` set intersects
    /// `urns`, via a correlated subquery against `device_types`. Values are
    /// bound, not interpolated, matching `resolve_zone`/`resolve_station`'s
    /// use of `Expr::cust_with_values`.
    #[must_use]
    pub fn with_types(mut self, urns: &[String]) -> Self {
        if urns.is_empty() {
            return self;
        }
        let placeholders = (1..=urns.len())
            .map(|i| format!("${i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "devices.device_id IN (SELECT device_id FROM device_types WHERE urn IN ({placeholders}))"
        );
        self.filter = self.filter.add(Expr::cust_with_values(&sql, urns.to_vec()));
        self
    }

    #[must_use]
    pub fn with_profile_name(mut self, name: impl Into<String>) -> Self {
        self.filter = self
            .filter
            .add(devices::Column::DeviceProfileName.eq(name.into()));
        self
    }

    #[must_use]
    pub fn with_bounds(mut self, max_lat: f64, min_lat: f64, max_lon: f64, min_lon: f64) -> Self {
        self.filter = self
            .filter
            .add(devices::Column::Latitude.between(min_lat, max_lat))
            .add(devices::Column::Longitude.between(min_lon, max_lon));
        self
    }

    /// Strips everything outside `[A-Za-zÅÄÖåäö0-9 _,;().]` (plus `%`, kept
    /// as a literal wildcard), then binds the pattern as a query parameter
    /// rather than interpolating it, matching `resolve_zone`/`resolve_station`'s
    /// use of `Expr::cust_with_values`.
    #[must_use]
    pub fn with_search(mut self, free_text: &str) -> Self {
        let sanitized = sanitize_search(free_text);
        if sanitized.is_empty() {
            return self;
        }
        let pattern = format!("%{sanitized}%");
        self.filter = self.filter.add(Expr::cust_with_values(
            "(devices.name ILIKE $1 OR devices.description ILIKE $1)",
            [pattern],
        ));
        self
    }

    #[must_use]
    pub fn with_last_seen(mut self, cutoff: DateTime<Utc>) -> Self {
        self.filter = self
            .filter
            .add(devices::Column::StatusObservedAt.lte(cutoff));
        self
    }

    #[must_use]
    pub fn with_sort_by(mut self, column: &'static str) -> Self {
        self.sort_by = Some(column);
        self
    }

    #[must_use]
    pub fn with_sort_desc(mut self, desc: bool) -> Self {
        self.sort_desc = desc;
        self
    }

    #[must_use]
    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn with_deleted(mut self, include_deleted: bool) -> Self {
        self.include_deleted = include_deleted;
        self
    }

    /// Exposes the `deviceID` equality predicate, if any, to callers that
    /// can't run a `Select` against a real connection (the `StoreApi` test
    /// fixture in `tests/`).
    #[must_use]
    pub fn device_id_eq(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    /// Exposes the `online` equality predicate, if any, to callers that
    /// can't run a `Select` against a real connection (the `StoreApi` test
    /// fixture in `tests/`).
    #[must_use]
    pub fn online_eq(&self) -> Option<bool> {
        self.online
    }

    pub(crate) fn apply(self, mut query: Select<devices::Entity>) -> Select<devices::Entity> {
        query = query.filter(self.filter);
        if !self.include_deleted {
            query = query.filter(devices::Column::Deleted.eq(false));
        }

        let column = match self.sort_by {
            Some("name") => devices::Column::Name,
            Some("tenant") => devices::Column::Tenant,
            Some("battery_level") => devices::Column::BatteryLevel,
            Some("status_observed_at") => devices::Column::StatusObservedAt,
            _ => devices::Column::DeviceId,
        };
        query = if self.sort_desc {
            query.order_by_desc(column)
        } else {
            query.order_by_asc(column)
        };

        if let Some(offset) = self.offset {
            query = query.offset(offset);
        }
        if let Some(limit) = self.limit {
            query = query.limit(limit);
        }
        query
    }
}

fn sanitize_search(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_alphanumeric() || SEARCH_ALLOWED_EXTRA.contains(c))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_like_metacharacters_and_quotes() {
        assert_eq!(sanitize_search("o'Brien; DROP TABLE--"), "oBrien; DROP TABLE");
        assert_eq!(sanitize_search("sensor_1 (north)"), "sensor_1 (north)");
        assert_eq!(sanitize_search("%injected%"), "injected");
    }
}
