use std::fmt::Write as _;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    Failed { error: String },
    Skipped { reason: String },
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub name: String,
    pub area: String,
    #[serde(flatten)]
    pub outcome: Outcome,
    pub elapsed_us: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ConformanceReport {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub results: Vec<ScenarioResult>,
}

impl ConformanceReport {
    pub fn record(&mut self, name: &str, area: &str, outcome: Outcome, elapsed: Duration) {
        self.total += 1;
        match &outcome {
            Outcome::Passed => self.passed += 1,
            Outcome::Failed { .. } => self.failed += 1,
            Outcome::Skipped { .. } => self.skipped += 1,
        }
        self.results.push(ScenarioResult {
            name: name.to_string(),
            area: area.to_string(),
            outcome,
            elapsed_us: u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX),
        });
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &ScenarioResult> {
        self.results.iter().filter(|r| r.outcome.is_failure())
    }

    /// One line per scenario followed by a totals line.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for result in &self.results {
            let _ = match &result.outcome {
                Outcome::Passed => writeln!(out, "PASS  {:<10} {}", result.area, result.name),
                Outcome::Failed { error } => {
                    writeln!(out, "FAIL  {:<10} {}: {error}", result.area, result.name)
                }
                Outcome::Skipped { reason } => {
                    writeln!(out, "SKIP  {:<10} {} ({reason})", result.area, result.name)
                }
            };
        }
        let _ = writeln!(
            out,
            "zelite-conform: {} scenarios, {} passed, {} failed, {} skipped",
            self.total, self.passed, self.failed, self.skipped
        );
        out
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
