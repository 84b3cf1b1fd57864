//! Requested physical fields and their upstream query vocabulary.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Horizontal grid resolution of the GFS product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Resolution {
    #[default]
    #[serde(rename = "0p25")]
    Quarter,
    #[serde(rename = "0p50")]
    Half,
    #[serde(rename = "1p00")]
    One,
}

impl Resolution {
    /// Tag used in both the filter script name and the file name.
    pub fn tag(&self) -> &'static str {
        match self {
            Resolution::Quarter => "0p25",
            Resolution::Half => "0p50",
            Resolution::One => "1p00",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// One requested field, stored under its own category directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableSpec {
    /// Store subdirectory name, e.g. `temp`.
    pub category: String,
    /// Upstream variable codes requested together, e.g. `["MSLET", "PRMSL"]`.
    pub codes: Vec<String>,
    /// Upstream level qualifier, e.g. `2_m_above_ground`.
    pub level: String,
    #[serde(default)]
    pub resolution: Resolution,
}

impl VariableSpec {
    pub fn new(category: &str, codes: &[&str], level: &str, resolution: Resolution) -> Self {
        Self {
            category: category.to_string(),
            codes: codes.iter().map(|c| c.to_string()).collect(),
            level: level.to_string(),
            resolution,
        }
    }

    /// 2 m air temperature.
    pub fn temperature() -> Self {
        Self::new("temp", &["TMP"], "2_m_above_ground", Resolution::Quarter)
    }

    /// Composite radar reflectivity.
    pub fn reflectivity() -> Self {
        Self::new("refc", &["REFC"], "entire_atmosphere", Resolution::Quarter)
    }

    /// Mean sea-level pressure (Eta reduction and standard reduction).
    pub fn pressure() -> Self {
        Self::new("mslet", &["MSLET", "PRMSL"], "mean_sea_level", Resolution::One)
    }

    /// Categorical rain and snow flags.
    pub fn precipitation_type() -> Self {
        Self::new("rainsnow", &["CRAIN", "CSNOW"], "surface", Resolution::Quarter)
    }

    /// Fields fetched when the configuration lists none.
    pub fn defaults() -> Vec<Self> {
        vec![Self::temperature(), Self::reflectivity(), Self::pressure()]
    }
}
