//! Small domain types shared between entities, engines, and the bus.
//!
//! Kept separate from any one entity module since `DeviceState` is stored on
//! `devices`, read by the state engine, and referenced by the alarm engine's
//! severity-to-state mapping (spec §4.5).

use serde::{Deserialize, Serialize};

/// `{Unknown=-1, OK=1, Warning=2, Error=3}` per spec §9 open question 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(i16)]
pub enum DeviceState {
    Unknown = -1,
    Ok = 1,
    Warning = 2,
    Error = 3,
}

impl DeviceState {
    #[must_use]
    pub fn from_i16(v: i16) -> Self {
        match v {
            1 => Self::Ok,
            2 => Self::Warning,
            3 => Self::Error,
            _ => Self::Unknown,
        }
    }

    #[must_use]
    pub fn as_i16(self) -> i16 {
        self as i16
    }
}

/// Alarm/rule severity. `-1` means "rule explicitly suppressed" (spec §9
/// open question 3); otherwise 1=Low, 2=Medium, 3=High.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(i16)]
pub enum Severity {
    Suppressed = -1,
    Low = 1,
    Medium = 2,
    High = 3,
}

impl Severity {
    #[must_use]
    pub fn from_i16(v: i16) -> Option<Self> {
        match v {
            -1 => Some(Self::Suppressed),
            1 => Some(Self::Low),
            2 => Some(Self::Medium),
            3 => Some(Self::High),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i16(self) -> i16 {
        self as i16
    }

    /// The `DeviceState` an open alarm of this severity drives the device
    /// towards (spec §4.5 state derivation rule): Low keeps `OK`,
    /// Medium implies `Warning`, High implies `Error`.
    #[must_use]
    pub fn dominant_state(self) -> DeviceState {
        match self {
            Self::Low | Self::Suppressed => DeviceState::Ok,
            Self::Medium => DeviceState::Warning,
            Self::High => DeviceState::Error,
        }
    }
}

/// The closed set of device environments (spec §3).
pub const ENVIRONMENTS: &[&str] = &["", "water", "air", "indoors", "lifebuoy", "soil"];

#[must_use]
pub fn is_valid_environment(s: &str) -> bool {
    ENVIRONMENTS.contains(&s)
}

/// Alarm rule predicate kinds (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleType {
    Min,
    Max,
    Between,
    True,
    False,
    Noop,
}

impl RuleType {
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "MIN" => Some(Self::Min),
            "MAX" => Some(Self::Max),
            "BETWEEN" => Some(Self::Between),
            "TRUE" => Some(Self::True),
            "FALSE" => Some(Self::False),
            "-" => Some(Self::Noop),
            _ => None,
        }
    }
}

/// A single named-field effect from a `Merge` call (spec §4.5). Kept as a
/// closed enum rather than a `serde_json::Map` walk (REDESIGN FLAGS,
/// spec.md §9): unrecognized keys never reach this type, they are logged
/// and dropped by the caller that builds a `MergePatch`.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeField {
    Active(bool),
    Name(String),
    Description(String),
    Environment(String),
    Source(String),
    Tenant(String),
    Latitude(f64),
    Longitude(f64),
    Types(Vec<String>),
    DeviceProfile(String),
}

/// An ordered set of field effects to apply to a device (spec §4.5
/// `Merge`). Construction from raw key/value pairs happens at the bus
/// handler boundary, where unknown keys are logged and ignored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergePatch(pub Vec<MergeField>);

impl MergePatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
