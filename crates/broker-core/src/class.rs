//! Environment classes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Policy tier of a session or role.
///
/// The wire names follow the identity provider applications the broker was
/// built around: `pci` for the restricted tier and `nonpci` for the standard
/// tier. The descriptive names are accepted as aliases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EnvironmentClass {
    /// Short-lived, tightly scoped sessions.
    #[serde(rename = "pci", alias = "restricted")]
    Restricted,
    /// Everything else.
    #[default]
    #[serde(rename = "nonpci", alias = "standard")]
    Standard,
}

impl EnvironmentClass {
    /// Both classes, restricted first.
    pub const ALL: [Self; 2] = [Self::Restricted, Self::Standard];

    /// Wire name used in storage keys and HTTP headers.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Restricted => "pci",
            Self::Standard => "nonpci",
        }
    }
}

impl fmt::Display for EnvironmentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when an environment name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown environment class: {0} (expected pci or nonpci)")]
pub struct ParseClassError(pub String);

impl FromStr for EnvironmentClass {
    type Err = ParseClassError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pci" | "restricted" => Ok(Self::Restricted),
            "nonpci" | "standard" => Ok(Self::Standard),
            _ => Err(ParseClassError(s.to_string())),
        }
    }
}

/// A value per environment class.
///
/// Serialized as a map with one key per wire name, which keeps
/// configuration files readable (`pci: ...`, `nonpci: ...`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassTable<T> {
    /// Value for [`EnvironmentClass::Restricted`].
    pub pci: T,
    /// Value for [`EnvironmentClass::Standard`].
    pub nonpci: T,
}

impl<T> ClassTable<T> {
    /// Look up the value for `class`.
    #[must_use]
    pub fn get(&self, class: EnvironmentClass) -> &T {
        match class {
            EnvironmentClass::Restricted => &self.pci,
            EnvironmentClass::Standard => &self.nonpci,
        }
    }
}
