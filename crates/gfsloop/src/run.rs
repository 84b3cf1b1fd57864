//! Model run identification and forecast step enumeration.
//!
//! GFS is initialized four times a day. Given a wall-clock time this module
//! yields the newest cycle that could have been published plus one fallback,
//! and the ordered list of forecast hours requested for each run.

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Hours between consecutive model cycles.
pub const CYCLE_INTERVAL_HOURS: u8 = 6;

/// Last forecast hour of the hourly part of the step sequence.
pub const HOURLY_STEPS_UNTIL: u16 = 12;

/// Longest forecast horizon GFS publishes.
pub const MAX_GFS_HORIZON_HOURS: u16 = 384;

/// Errors from run construction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunError {
    #[error("origin hour {0} is not a model cycle (expected 0, 6, 12 or 18)")]
    InvalidCycle(u8),
}

/// A model run: the date it was initialized and its cycle hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunIdentifier {
    date: NaiveDate,
    cycle: u8,
}

impl RunIdentifier {
    /// Build a run, rejecting hours off the 00/06/12/18 grid.
    pub fn new(date: NaiveDate, cycle: u8) -> Result<Self, RunError> {
        if cycle >= 24 || cycle % CYCLE_INTERVAL_HOURS != 0 {
            return Err(RunError::InvalidCycle(cycle));
        }
        Ok(Self { date, cycle })
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn cycle(&self) -> u8 {
        self.cycle
    }

    /// Date as used in the upstream directory name (`YYYYMMDD`).
    pub fn date_str(&self) -> String {
        self.date.format("%Y%m%d").to_string()
    }

    /// Two-digit cycle hour (`00`, `06`, `12`, `18`).
    pub fn cycle_str(&self) -> String {
        format!("{:02}", self.cycle)
    }
}

impl fmt::Display for RunIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:02}Z", self.date_str(), self.cycle)
    }
}

/// Hours ahead of the run's origin for which a field is valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ForecastStep(u16);

impl ForecastStep {
    pub fn new(hours: u16) -> Self {
        Self(hours)
    }

    pub fn hours(&self) -> u16 {
        self.0
    }
}

/// Formats as the upstream file suffix, e.g. `f006`.
impl fmt::Display for ForecastStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f{:03}", self.0)
    }
}

/// Date to use for the fallback run when the newest cycle is 00Z.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloverPolicy {
    /// Fall back to 18Z of the previous day.
    #[default]
    PreviousDay,
    /// Fall back to 18Z of the same day (legacy behavior).
    SameDay,
}

/// Newest cycle hour at or before `hour`.
pub fn cycle_hour_for(hour: u32) -> u8 {
    ((hour / CYCLE_INTERVAL_HOURS as u32) * CYCLE_INTERVAL_HOURS as u32) as u8
}

/// Candidate runs for `now`, newest first.
pub fn candidate_runs(now: DateTime<Utc>, rollover: RolloverPolicy) -> [RunIdentifier; 2] {
    let date = now.date_naive();
    let primary = cycle_hour_for(now.hour());
    let fallback = (primary + 24 - CYCLE_INTERVAL_HOURS) % 24;

    let fallback_date = match rollover {
        RolloverPolicy::PreviousDay if primary == 0 => date.pred_opt().unwrap_or(date),
        _ => date,
    };

    [
        RunIdentifier {
            date,
            cycle: primary,
        },
        RunIdentifier {
            date: fallback_date,
            cycle: fallback,
        },
    ]
}

/// Forecast steps up to `max_horizon_hours`: hourly until 12, then 6-hourly.
pub fn forecast_steps(max_horizon_hours: u16) -> Vec<ForecastStep> {
    let hourly = 0..=HOURLY_STEPS_UNTIL.min(max_horizon_hours);
    let six_hourly = (HOURLY_STEPS_UNTIL..=max_horizon_hours).step_by(CYCLE_INTERVAL_HOURS as usize);

    let mut hours: Vec<u16> = hourly.chain(six_hourly).collect();
    hours.sort_unstable();
    hours.dedup();
    hours.into_iter().map(ForecastStep).collect()
}
