use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::run::{RolloverPolicy, MAX_GFS_HORIZON_HOURS};
use crate::scheduler::parse_schedule;
use crate::variable::VariableSpec;

/// Root configuration for a gfsloop instance.
///
/// Every field has a default, so an empty YAML document is a valid
/// configuration that fetches temperature, reflectivity and pressure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the NOMADS filter scripts.
    pub base_url: String,

    /// Directory holding one subdirectory per variable category.
    pub store_root: PathBuf,

    /// Last forecast hour to request.
    pub max_horizon_hours: u16,

    /// Timeout applied to every probe and download.
    pub request_timeout_secs: u64,

    /// Upper bound on in-flight requests while probing or downloading a run.
    pub max_concurrent_requests: usize,

    /// Which day the 18Z fallback belongs to when the newest cycle is 00Z.
    pub rollover: RolloverPolicy,

    /// Cron expression (5 or 6 fields, UTC) driving the scheduler.
    pub schedule: String,

    /// Run one cycle immediately when the scheduler starts.
    pub run_on_start: bool,

    /// Fields required jointly for a run to be usable.
    pub variables: Vec<VariableSpec>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "https://nomads.ncep.noaa.gov/cgi-bin".to_string(),
            store_root: PathBuf::from("./public/grib"),
            max_horizon_hours: 96,
            request_timeout_secs: 30,
            max_concurrent_requests: 4,
            rollover: RolloverPolicy::default(),
            schedule: "0 15 */6 * * *".to_string(),
            run_on_start: true,
            variables: VariableSpec::defaults(),
        }
    }
}

impl Config {
    /// Load and validate configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.as_ref().display(), e)))?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Config =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.variables.is_empty() {
            return Err(ConfigError::Invalid("at least one variable is required".into()));
        }

        let mut seen = HashSet::new();
        for variable in &self.variables {
            if !is_valid_category(&variable.category) {
                return Err(ConfigError::Invalid(format!(
                    "category '{}' must be non-empty and contain only letters, digits, '-' or '_'",
                    variable.category
                )));
            }
            if !seen.insert(variable.category.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate category '{}'",
                    variable.category
                )));
            }
            if variable.codes.is_empty() || variable.codes.iter().any(|c| c.trim().is_empty()) {
                return Err(ConfigError::Invalid(format!(
                    "category '{}' needs at least one non-empty variable code",
                    variable.category
                )));
            }
            if variable.level.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "category '{}' needs a level",
                    variable.category
                )));
            }
        }

        if self.max_horizon_hours > MAX_GFS_HORIZON_HOURS {
            return Err(ConfigError::Invalid(format!(
                "max_horizon_hours {} exceeds the {}h GFS horizon",
                self.max_horizon_hours, MAX_GFS_HORIZON_HOURS
            )));
        }
        if self.max_concurrent_requests == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_requests must be at least 1".into(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be at least 1".into(),
            ));
        }
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("base_url is empty".into()));
        }

        parse_schedule(&self.schedule).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }
}

fn is_valid_category(category: &str) -> bool {
    !category.is_empty()
        && category
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Invalid config: {0}")]
    Invalid(String),
}
