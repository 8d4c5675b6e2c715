use crate::domain::RuleType;
use crate::error::ConfigError;

/// One row of the alarm rule catalog (spec §3 `AlarmConfig`, §4.3 CSV
/// schema). `id` is `""` for a wildcard rule (matched only by `name`).
#[derive(Debug, Clone, PartialEq)]
pub struct AlarmConfig {
    pub id: String,
    pub name: String,
    pub rule_type: RuleType,
    pub min: f64,
    pub max: f64,
    pub severity: i16,
    pub description: String,
}

/// Semicolon-delimited alarm rule catalog (spec §4.3), sorted descending by
/// `id` so device-specific rules are scanned before wildcard rules.
#[derive(Debug, Clone, Default)]
pub struct AlarmRuleCatalog {
    rows: Vec<AlarmConfig>,
}

impl AlarmRuleCatalog {
    /// # Errors
    ///
    /// Returns `ConfigError::Read` if the file cannot be read, or
    /// `ConfigError::Csv` if a record cannot be split into fields.
    pub fn load_csv(path: &str) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Ok(Self::parse(&text))
    }

    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b';')
            .has_headers(true)
            .flexible(true)
            .from_reader(text.as_bytes());

        let mut rows = Vec::new();
        for record in reader.records().flatten() {
            if let Some(cfg) = parse_row(&record) {
                rows.push(cfg);
            }
        }
        rows.sort_by(|a, b| b.id.cmp(&a.id));
        Self { rows }
    }

    #[must_use]
    pub fn rows(&self) -> &[AlarmConfig] {
        &self.rows
    }

    /// First rule matching `event_id` exactly, else the first wildcard rule
    /// (`id == ""`) whose `name` matches (spec §4.4 scan order).
    #[must_use]
    pub fn find(&self, event_id: &str, alarm_name: &str) -> Option<&AlarmConfig> {
        self.rows
            .iter()
            .find(|cfg| cfg.id == event_id || (cfg.id.is_empty() && cfg.name == alarm_name))
    }
}

fn parse_row(record: &csv::StringRecord) -> Option<AlarmConfig> {
    let device_id = record.get(0).unwrap_or("").trim();
    let function_id = record.get(1).unwrap_or("").trim();
    let name = record.get(2).unwrap_or("").trim();
    let type_str = record.get(3).unwrap_or("").trim();
    let min = record.get(4).unwrap_or("").trim();
    let max = record.get(5).unwrap_or("").trim();
    let severity = record.get(6).unwrap_or("").trim();
    let description = record.get(7).unwrap_or("").trim();

    // Exactly one of deviceID/functionID may be set; both set is invalid.
    let id = match (device_id.is_empty(), function_id.is_empty()) {
        (false, true) => device_id,
        (true, false) => function_id,
        (true, true) => "",
        (false, false) => return None,
    };

    let rule_type = RuleType::parse(type_str)?;
    let severity: i16 = severity.parse().ok()?;
    if !matches!(severity, -1 | 1 | 2 | 3) {
        return None;
    }

    Some(AlarmConfig {
        id: id.to_string(),
        name: name.to_string(),
        rule_type,
        min: min.parse().unwrap_or(0.0),
        max: max.parse().unwrap_or(0.0),
        severity,
        description: description.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_rows_with_invalid_type_or_severity() {
        let csv = "deviceID;functionID;name;type;min;max;severity;description\n\
                    dev1;;batteryLevel;MIN;20;;1;low battery\n\
                    dev2;;bogus;WEIRD;0;0;1;bad type\n\
                    dev3;;bogus;MIN;0;0;9;bad severity\n";
        let catalog = AlarmRuleCatalog::parse(csv);
        assert_eq!(catalog.rows().len(), 1);
        assert_eq!(catalog.rows()[0].id, "dev1");
    }

    #[test]
    fn drops_rows_with_both_device_and_function_id() {
        let csv = "deviceID;functionID;name;type;min;max;severity;description\n\
                    dev1;func1;batteryLevel;MIN;20;;1;low battery\n";
        let catalog = AlarmRuleCatalog::parse(csv);
        assert!(catalog.rows().is_empty());
    }

    #[test]
    fn sorted_descending_by_id_and_wildcard_rules_have_empty_id() {
        let csv = "deviceID;functionID;name;type;min;max;severity;description\n\
                    a;;batteryLevel;MIN;20;;1;a\n\
                    ;;batteryLevel;MIN;10;;1;wildcard\n\
                    z;;batteryLevel;MIN;5;;1;z\n";
        let catalog = AlarmRuleCatalog::parse(csv);
        let ids: Vec<&str> = catalog.rows().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["z", "a", ""]);
    }

    #[test]
    fn find_prefers_exact_id_over_wildcard() {
        let csv = "deviceID;functionID;name;type;min;max;severity;description\n\
                    dev1;;batteryLevel;MIN;20;;1;specific\n\
                    ;;batteryLevel;MIN;10;;1;wildcard\n";
        let catalog = AlarmRuleCatalog::parse(csv);
        let matched = catalog.find("dev1", "batteryLevel").unwrap();
        assert_eq!(matched.description, "specific");
        let fallback = catalog.find("dev2", "batteryLevel").unwrap();
        assert_eq!(fallback.description, "wildcard");
    }
}
