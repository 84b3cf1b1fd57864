//! Mapping of (run, step, variable) to a remote locator and a local file.

use crate::run::{ForecastStep, RunIdentifier};
use crate::variable::VariableSpec;
use std::fmt;
use std::path::{Path, PathBuf};

/// One file to retrieve: where it lives upstream and what it is called locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalTarget {
    pub run: RunIdentifier,
    pub step: ForecastStep,
    pub category: String,
    pub url: String,
    pub file_name: String,
}

impl RetrievalTarget {
    pub fn new(
        base_url: &str,
        run: RunIdentifier,
        step: ForecastStep,
        variable: &VariableSpec,
    ) -> Self {
        Self {
            run,
            step,
            category: variable.category.clone(),
            url: locator(base_url, run, step, variable),
            file_name: file_name(run, step, variable),
        }
    }

    /// Path of this target under the store root.
    pub fn local_path(&self, root: &Path) -> PathBuf {
        root.join(&self.category).join(&self.file_name)
    }
}

impl fmt::Display for RetrievalTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.category, self.run, self.step)
    }
}

/// NOMADS filter URL for one variable of one forecast step.
pub fn locator(
    base_url: &str,
    run: RunIdentifier,
    step: ForecastStep,
    variable: &VariableSpec,
) -> String {
    let res = variable.resolution.tag();
    let hour = run.cycle_str();
    let mut url = format!(
        "{}/filter_gfs_{res}.pl?dir=%2Fgfs.{}%2F{hour}%2Fatmos&file=gfs.t{hour}z.pgrb2.{res}.{step}",
        base_url.trim_end_matches('/'),
        run.date_str(),
    );
    for code in &variable.codes {
        url.push_str(&format!("&var_{}=on", code));
    }
    url.push_str(&format!("&lev_{}=on", variable.level));
    url
}

/// Local file name; unique per (cycle, step, resolution) inside a category.
pub fn file_name(run: RunIdentifier, step: ForecastStep, variable: &VariableSpec) -> String {
    format!(
        "gfs.t{}z.pgrb2.{}.{}.grib2",
        run.cycle_str(),
        variable.resolution.tag(),
        step
    )
}

/// All targets of a run, step-major, variables in configured order.
pub fn targets_for_run(
    base_url: &str,
    run: RunIdentifier,
    steps: &[ForecastStep],
    variables: &[VariableSpec],
) -> Vec<RetrievalTarget> {
    steps
        .iter()
        .flat_map(|step| {
            variables
                .iter()
                .map(move |variable| RetrievalTarget::new(base_url, run, *step, variable))
        })
        .collect()
}
