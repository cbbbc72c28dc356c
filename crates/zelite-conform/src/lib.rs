//! Conformance scenarios for the zelite runtime.
//!
//! Each [`Scenario`] builds its own driver from a [`DriverConfig`], drives one
//! behavior end to end, and returns an error describing the first mismatch.
//! The `zelite-conform` binary selects scenarios by name and prints a
//! [`ConformanceReport`].
//!
//! ## Configuration
//!
//! [`load_config`] reads a JSON [`DriverConfig`] from a file when one is
//! given; otherwise the `ZELITE_*` environment variables apply.

mod report;
mod scenarios;

use std::path::Path;
use std::time::Instant;

use anyhow::Context as _;
use tracing::{debug, info, warn};
use zelite_core::DriverConfig;

pub use report::{ConformanceReport, Outcome, ScenarioResult};

pub type ScenarioFn = fn(&DriverConfig) -> anyhow::Result<()>;

#[derive(Clone, Copy)]
pub struct Scenario {
    pub name: &'static str,
    pub area: &'static str,
    /// Root devices the scenario needs; it is skipped on smaller configs.
    pub min_devices: u32,
    pub run: ScenarioFn,
}

impl std::fmt::Debug for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scenario")
            .field("name", &self.name)
            .field("area", &self.area)
            .field("min_devices", &self.min_devices)
            .finish()
    }
}

/// Every scenario, grouped by area.
pub fn catalog() -> &'static [Scenario] {
    scenarios::CATALOG
}

/// Scenarios whose name or area contains `filter` (case-insensitive).
pub fn select(filter: Option<&str>) -> Vec<&'static Scenario> {
    let needle = filter.map(str::to_ascii_lowercase);
    catalog()
        .iter()
        .filter(|s| match &needle {
            None => true,
            Some(needle) => s.name.contains(needle.as_str()) || s.area.contains(needle.as_str()),
        })
        .collect()
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<DriverConfig> {
    let config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            DriverConfig::from_json(&text)
                .with_context(|| format!("failed to parse config {}", path.display()))?
        }
        None => DriverConfig::from_env().context("failed to load config from environment")?,
    };
    config.validate().context("invalid driver config")?;
    Ok(config)
}

pub fn run(config: &DriverConfig, scenarios: &[&Scenario]) -> ConformanceReport {
    let mut report = ConformanceReport::default();
    for scenario in scenarios {
        let start = Instant::now();
        let outcome = if config.device_count < scenario.min_devices {
            Outcome::Skipped {
                reason: format!(
                    "needs {} devices, config has {}",
                    scenario.min_devices, config.device_count
                ),
            }
        } else {
            match (scenario.run)(config) {
                Ok(()) => Outcome::Passed,
                Err(err) => Outcome::Failed {
                    error: format!("{err:#}"),
                },
            }
        };
        match &outcome {
            Outcome::Failed { error } => warn!(scenario = scenario.name, %error, "scenario failed"),
            Outcome::Skipped { reason } => {
                debug!(scenario = scenario.name, %reason, "scenario skipped")
            }
            Outcome::Passed => debug!(scenario = scenario.name, "scenario passed"),
        }
        report.record(scenario.name, scenario.area, outcome, start.elapsed());
    }
    info!(
        total = report.total,
        failed = report.failed,
        skipped = report.skipped,
        "conformance run finished"
    );
    report
}
