use std::collections::HashMap;

use serde::Deserialize;

use crate::error::ConfigError;

const UNKNOWN_DECODER: &str = "unknown";

#[derive(Debug, Deserialize)]
struct RawCatalog {
    #[serde(default)]
    deviceprofiles: Vec<RawProfile>,
    #[serde(default)]
    types: Vec<RawType>,
}

#[derive(Debug, Deserialize)]
struct RawProfile {
    name: String,
    decoder: String,
    interval: i32,
    #[serde(default)]
    types: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawType {
    urn: String,
    name: String,
}

#[derive(Debug, Clone)]
pub struct ProfileEntry {
    pub name: String,
    pub decoder: String,
    pub interval: i32,
    pub types: Vec<String>,
}

/// The YAML device-profile + LWM2M type catalog (spec §4.3), loaded once at
/// startup and immutable thereafter.
#[derive(Debug, Clone)]
pub struct DeviceCatalog {
    profiles: HashMap<String, ProfileEntry>,
    types: HashMap<String, String>,
}

impl DeviceCatalog {
    /// # Errors
    ///
    /// Returns `ConfigError::Read` if the file cannot be read, or
    /// `ConfigError::Yaml` if its contents do not parse.
    pub fn load_yaml(path: &str) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let raw: RawCatalog = serde_yaml::from_str(text)?;

        let types = raw.types.into_iter().map(|t| (t.urn, t.name)).collect();

        let mut profiles: HashMap<String, ProfileEntry> = raw
            .deviceprofiles
            .into_iter()
            .map(|p| {
                (
                    p.name.clone(),
                    ProfileEntry {
                        name: p.name,
                        decoder: p.decoder,
                        interval: p.interval,
                        types: p.types,
                    },
                )
            })
            .collect();

        // The reserved `unknown` profile must always exist (spec §4.3).
        if !profiles.values().any(|p| p.decoder == UNKNOWN_DECODER) {
            profiles.insert(
                UNKNOWN_DECODER.to_string(),
                ProfileEntry {
                    name: UNKNOWN_DECODER.to_string(),
                    decoder: UNKNOWN_DECODER.to_string(),
                    interval: 3600,
                    types: Vec::new(),
                },
            );
        }

        Ok(Self { profiles, types })
    }

    #[must_use]
    pub fn profile(&self, name: &str) -> Option<&ProfileEntry> {
        self.profiles.get(name)
    }

    #[must_use]
    pub fn type_name(&self, urn: &str) -> Option<&str> {
        self.types.get(urn).map(String::as_str)
    }

    #[must_use]
    pub fn known_decoders(&self) -> Vec<&str> {
        self.profiles.values().map(|p| p.decoder.as_str()).collect()
    }

    /// Resolves a seeder `sensorType` column (a decoder name) to its
    /// profile (spec §4.7). Ambiguous when multiple profiles share a
    /// decoder; returns the first found, since the catalog does not
    /// otherwise order profiles.
    #[must_use]
    pub fn profile_by_decoder(&self, decoder: &str) -> Option<&ProfileEntry> {
        self.profiles.values().find(|p| p.decoder == decoder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_appends_unknown_profile_when_absent() {
        let catalog = DeviceCatalog::parse(
            "deviceprofiles:\n  - name: elsys\n    decoder: elsys\n    interval: 3600\n    types: []\ntypes: []\n",
        )
        .unwrap();
        assert!(catalog.profile("unknown").is_some());
        assert!(catalog.profile("elsys").is_some());
    }

    #[test]
    fn parse_keeps_declared_unknown_profile() {
        let catalog = DeviceCatalog::parse(
            "deviceprofiles:\n  - name: unknown\n    decoder: unknown\n    interval: 60\n    types: []\ntypes: []\n",
        )
        .unwrap();
        assert_eq!(catalog.profile("unknown").unwrap().interval, 60);
    }
}
