//! Operating system versions the bot stages builds for.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::StagingError;

/// A target distribution stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum OsVersion {
    Sp3,
    Sp4,
    Sp5,
    Sp6,
    Sp7,
    Sl16_0,
    Tumbleweed,
}

impl OsVersion {
    pub const ALL: [OsVersion; 7] = [
        OsVersion::Sp3,
        OsVersion::Sp4,
        OsVersion::Sp5,
        OsVersion::Sp6,
        OsVersion::Sp7,
        OsVersion::Sl16_0,
        OsVersion::Tumbleweed,
    ];

    /// Service pack number for SLE 15.
    pub fn service_pack(self) -> Option<u8> {
        match self {
            OsVersion::Sp3 => Some(3),
            OsVersion::Sp4 => Some(4),
            OsVersion::Sp5 => Some(5),
            OsVersion::Sp6 => Some(6),
            OsVersion::Sp7 => Some(7),
            OsVersion::Sl16_0 | OsVersion::Tumbleweed => None,
        }
    }

    pub fn is_sle15(self) -> bool {
        self.service_pack().is_some()
    }

    pub fn is_sl16(self) -> bool {
        self == OsVersion::Sl16_0
    }

    pub fn is_tumbleweed(self) -> bool {
        self == OsVersion::Tumbleweed
    }

    pub fn is_ltss(self) -> bool {
        matches!(self, OsVersion::Sp3 | OsVersion::Sp4)
    }

    /// `SP7`, `16.0` or `Tumbleweed`
    pub fn pretty_print(self) -> String {
        match self.service_pack() {
            Some(sp) => format!("SP{sp}"),
            None => self.to_string(),
        }
    }

    /// `SLE 15 SP7`, `SLE LTSS 15 SP3`, `SLE 16` or `openSUSE Tumbleweed`
    pub fn full_os_name(self) -> String {
        match self.service_pack() {
            Some(sp) if self.is_ltss() => format!("SLE LTSS 15 SP{sp}"),
            Some(sp) => format!("SLE 15 SP{sp}"),
            None if self.is_sl16() => "SLE 16".to_string(),
            None => "openSUSE Tumbleweed".to_string(),
        }
    }

    /// Branch of the recipe repository that holds the released recipes.
    pub fn deployment_branch_name(self) -> String {
        match self.service_pack() {
            Some(sp) => format!("sle15-sp{sp}"),
            None => self.to_string(),
        }
    }

    /// Version component of project names: `SLE-15-SP7`, `16.0`, `Tumbleweed`.
    pub fn project_suffix(self) -> String {
        match self.service_pack() {
            Some(sp) => format!("SLE-15-SP{sp}"),
            None => self.to_string(),
        }
    }
}

impl fmt::Display for OsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.service_pack() {
            Some(sp) => write!(f, "{sp}"),
            None if self.is_sl16() => write!(f, "16.0"),
            None => write!(f, "Tumbleweed"),
        }
    }
}

impl FromStr for OsVersion {
    type Err = StagingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OsVersion::ALL
            .into_iter()
            .find(|v| v.to_string() == s.trim())
            .ok_or_else(|| {
                StagingError::Config(format!(
                    "invalid OS version '{s}', expected one of: {}",
                    OsVersion::ALL.map(|v| v.to_string()).join(", ")
                ))
            })
    }
}

impl TryFrom<String> for OsVersion {
    type Error = StagingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<OsVersion> for String {
    fn from(value: OsVersion) -> Self {
        value.to_string()
    }
}
