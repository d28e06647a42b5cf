//! Suite report: aggregation, artifacts, and terminal display.
//!
//! One [`SuiteSummary`] holds everything a suite run produced: the
//! per-scenario outcomes in registration order, the distortion sweep,
//! and the tuning audit when a search ran. Scenario outcomes are a
//! three-way state and never collapse into each other: a scenario was
//! measured, failed with a reason, or was never attempted, and all
//! three survive into every artifact.
//!
//! # Artifacts
//!
//! - `suite_metrics.csv` - one row per measured scenario, columns are
//!   the sorted union of metric names
//! - `thd_vs_power.csv` - the distortion sweep, ordered by drive level
//! - `tuning_candidates.csv` - per-candidate audit when tuning ran
//! - `suite_summary.json` - the full summary tree
//! - `suite_report.md` - human-readable digest of all of the above

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::metrics::MetricSet;
use crate::trace::{RunFailure, RunStatus};
use crate::tuner::{TuneOutcome, TuningResult};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("no scenarios were run; refusing to build an empty report")]
    EmptySuite,

    #[error("duplicate drive level {0} in the distortion sweep")]
    DuplicateDriveLevel(f64),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

/// Which way a scenario run went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMarker {
    SimulatorFailed,
    SimulatorTimedOut,
    MissingSignal,
}

/// Terminal outcome of one scenario within the suite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScenarioOutcome {
    Measured { metrics: BTreeMap<String, f64> },
    Failed {
        marker: FailureMarker,
        diagnostic: String,
    },
    NotAttempted,
}

/// One scenario's entry in the report, in registration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioSection {
    pub scenario: String,
    #[serde(flatten)]
    pub outcome: ScenarioOutcome,
    pub elapsed_ms: u64,
}

impl ScenarioSection {
    pub fn measured(metrics: &MetricSet, elapsed_ms: u64) -> Self {
        ScenarioSection {
            scenario: metrics.scenario.clone(),
            outcome: ScenarioOutcome::Measured {
                metrics: metrics.values.clone(),
            },
            elapsed_ms,
        }
    }

    pub fn not_attempted(scenario: &str) -> Self {
        ScenarioSection {
            scenario: scenario.to_string(),
            outcome: ScenarioOutcome::NotAttempted,
            elapsed_ms: 0,
        }
    }

    /// Section for a run that did not complete. `None` for a completed
    /// status, which has no failure to describe.
    pub fn from_failed_status(
        scenario: &str,
        status: &RunStatus,
        elapsed_ms: u64,
    ) -> Option<Self> {
        let (marker, diagnostic) = match status {
            RunStatus::Completed => return None,
            RunStatus::TimedOut { limit } => (
                FailureMarker::SimulatorTimedOut,
                format!("killed after {limit:?}"),
            ),
            RunStatus::Failed(RunFailure::Simulator { diagnostic }) => {
                (FailureMarker::SimulatorFailed, diagnostic.clone())
            }
            RunStatus::Failed(RunFailure::MissingSignal { signal }) => (
                FailureMarker::MissingSignal,
                format!("required signal '{signal}' absent from simulator output"),
            ),
        };
        Some(ScenarioSection {
            scenario: scenario.to_string(),
            outcome: ScenarioOutcome::Failed { marker, diagnostic },
            elapsed_ms,
        })
    }

    pub fn is_measured(&self) -> bool {
        matches!(self.outcome, ScenarioOutcome::Measured { .. })
    }
}

/// One row of the THD-versus-power curve. Field names match the CSV
/// header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThdPoint {
    pub vref_pk: f64,
    pub vout_rms: f64,
    pub p_out_w: f64,
    pub thd_percent: f64,
}

/// The whole suite run, ready for serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteSummary {
    pub timestamp: String,
    pub git_commit: Option<String>,
    pub simulator: String,
    pub scenarios: Vec<ScenarioSection>,
    pub thd_vs_power: Vec<ThdPoint>,
    pub tuning: Option<TuningResult>,
}

impl SuiteSummary {
    /// Aggregate the pieces of a finished run.
    ///
    /// The sweep is sorted by drive level here so every artifact sees
    /// the same order; a duplicate level means the sweep was assembled
    /// wrong and is rejected.
    pub fn new(
        simulator: &str,
        scenarios: Vec<ScenarioSection>,
        mut thd_vs_power: Vec<ThdPoint>,
        tuning: Option<TuningResult>,
    ) -> Result<Self, ReportError> {
        if scenarios.is_empty() {
            return Err(ReportError::EmptySuite);
        }
        thd_vs_power.sort_by(|a, b| a.vref_pk.total_cmp(&b.vref_pk));
        for pair in thd_vs_power.windows(2) {
            if pair[0].vref_pk.total_cmp(&pair[1].vref_pk).is_eq() {
                return Err(ReportError::DuplicateDriveLevel(pair[0].vref_pk));
            }
        }
        Ok(SuiteSummary {
            timestamp: unix_timestamp(),
            git_commit: git_commit(),
            simulator: simulator.to_string(),
            scenarios,
            thd_vs_power,
            tuning,
        })
    }

    pub fn measured_count(&self) -> usize {
        self.scenarios.iter().filter(|s| s.is_measured()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.scenarios
            .iter()
            .filter(|s| matches!(s.outcome, ScenarioOutcome::Failed { .. }))
            .count()
    }

    pub fn not_attempted_count(&self) -> usize {
        self.scenarios
            .iter()
            .filter(|s| matches!(s.outcome, ScenarioOutcome::NotAttempted))
            .count()
    }

    /// True when every scenario was measured and, if tuning ran, a
    /// candidate was selected.
    pub fn all_clean(&self) -> bool {
        let tuning_ok = match &self.tuning {
            None => true,
            Some(t) => matches!(t.outcome, TuneOutcome::Selected { .. }),
        };
        self.failed_count() == 0 && self.not_attempted_count() == 0 && tuning_ok
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<(), ReportError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ReportError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Metrics table: one row per measured scenario, `scenario` first,
    /// then the sorted union of metric names. Failed and unattempted
    /// scenarios carry no numbers and stay out of this file; the JSON
    /// and markdown artifacts account for them.
    pub fn write_metrics_csv(&self, path: impl AsRef<Path>) -> Result<(), ReportError> {
        let mut names: BTreeSet<&str> = BTreeSet::new();
        for section in &self.scenarios {
            if let ScenarioOutcome::Measured { metrics } = &section.outcome {
                names.extend(metrics.keys().map(String::as_str));
            }
        }

        let mut writer = csv::Writer::from_path(path.as_ref())?;
        let mut header = vec!["scenario"];
        header.extend(names.iter().copied());
        writer.write_record(&header)?;

        for section in &self.scenarios {
            let ScenarioOutcome::Measured { metrics } = &section.outcome else {
                continue;
            };
            let mut record = vec![section.scenario.clone()];
            for name in &names {
                record.push(
                    metrics
                        .get(*name)
                        .map(|v| format_num(*v))
                        .unwrap_or_default(),
                );
            }
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn write_thd_csv(&self, path: impl AsRef<Path>) -> Result<(), ReportError> {
        write_thd_curve(&self.thd_vs_power, path)
    }

    /// Per-candidate audit: the proposed overrides, the verdict, and
    /// the constraint that sank rejected candidates.
    pub fn write_tuning_csv(&self, path: impl AsRef<Path>) -> Result<(), ReportError> {
        let Some(tuning) = &self.tuning else {
            return Ok(());
        };
        let mut names: BTreeSet<&str> = BTreeSet::new();
        for candidate in &tuning.candidates {
            names.extend(candidate.params.names());
        }

        let mut writer = csv::Writer::from_path(path.as_ref())?;
        let mut header = vec!["candidate".to_string()];
        header.extend(names.iter().map(|n| n.to_string()));
        header.push("accepted".to_string());
        header.push("rejected_by".to_string());
        writer.write_record(&header)?;

        for candidate in &tuning.candidates {
            let mut record = vec![candidate.index.to_string()];
            for name in &names {
                record.push(
                    candidate
                        .params
                        .get(name)
                        .map(format_num)
                        .unwrap_or_default(),
                );
            }
            record.push(candidate.accepted.to_string());
            record.push(candidate.rejected_by().unwrap_or("").to_string());
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Human-readable digest mirroring the JSON tree.
    pub fn render_markdown(&self, artifact_dir: &Path) -> String {
        let mut lines: Vec<String> = vec![
            "# Amplifier SPICE Validation Suite".to_string(),
            String::new(),
        ];

        for section in &self.scenarios {
            lines.push(format!("## {}", section.scenario));
            match &section.outcome {
                ScenarioOutcome::Measured { metrics } => {
                    for (name, value) in metrics {
                        lines.push(format!("- {name}: {}", format_num(*value)));
                    }
                }
                ScenarioOutcome::Failed { marker, diagnostic } => {
                    lines.push(format!("- status: failed ({})", marker_label(*marker)));
                    lines.push(format!("- diagnostic: {diagnostic}"));
                }
                ScenarioOutcome::NotAttempted => {
                    lines.push("- status: not attempted".to_string());
                }
            }
            lines.push(String::new());
        }

        lines.push("## THD vs Power".to_string());
        lines.push(format!("- points: {}", self.thd_vs_power.len()));
        lines.push(format!(
            "- csv: `{}`",
            artifact_dir.join("thd_vs_power.csv").display()
        ));
        lines.push(String::new());

        if let Some(tuning) = &self.tuning {
            lines.push("## Tuning".to_string());
            lines.push(format!("- outcome: {}", tune_outcome_label(&tuning.outcome)));
            if let Some(selected) = &tuning.selected {
                for (name, value) in selected.iter() {
                    lines.push(format!("- {name}: {}", format_num(value)));
                }
            }
            if matches!(tuning.outcome, TuneOutcome::Exhausted { .. }) {
                if let Some(name) = tuning.most_violated_constraint() {
                    lines.push(format!("- most violated constraint: {name}"));
                }
            }
            lines.push(format!(
                "- audit: `{}`",
                artifact_dir.join("tuning_candidates.csv").display()
            ));
            lines.push(String::new());
        }

        lines.push("## Artifacts".to_string());
        for name in self.artifact_names() {
            lines.push(format!("- `{}`", artifact_dir.join(name).display()));
        }
        lines.join("\n") + "\n"
    }

    fn artifact_names(&self) -> Vec<&'static str> {
        let mut names = vec!["suite_metrics.csv", "thd_vs_power.csv"];
        if self.tuning.is_some() {
            names.push("tuning_candidates.csv");
        }
        names.push("suite_summary.json");
        names.push("suite_report.md");
        names
    }

    /// Write every artifact under `dir` and return the paths.
    pub fn write_all(&self, dir: &Path) -> Result<Vec<PathBuf>, ReportError> {
        std::fs::create_dir_all(dir)?;
        self.write_metrics_csv(dir.join("suite_metrics.csv"))?;
        self.write_thd_csv(dir.join("thd_vs_power.csv"))?;
        if self.tuning.is_some() {
            self.write_tuning_csv(dir.join("tuning_candidates.csv"))?;
        }
        self.save_json(dir.join("suite_summary.json"))?;
        std::fs::write(dir.join("suite_report.md"), self.render_markdown(dir))?;
        Ok(self
            .artifact_names()
            .into_iter()
            .map(|n| dir.join(n))
            .collect())
    }

    /// Terminal summary, one line per scenario.
    pub fn print_summary(&self) {
        use colored::Colorize;

        println!("\n{}", "═".repeat(60).bold());
        println!("{}", " AMPLIFIER VALIDATION SUITE ".bold().on_blue());
        println!("{}", "═".repeat(60).bold());

        if let Some(ref commit) = self.git_commit {
            println!("Git commit: {}", commit.dimmed());
        }
        println!("Timestamp:  {}", self.timestamp.dimmed());
        println!("Simulator:  {}", self.simulator);
        println!();

        for section in &self.scenarios {
            match &section.outcome {
                ScenarioOutcome::Measured { metrics } => {
                    println!(
                        "  {} {} ({} metrics, {} ms)",
                        "✓".green(),
                        section.scenario,
                        metrics.len(),
                        section.elapsed_ms
                    );
                }
                ScenarioOutcome::Failed { marker, diagnostic } => {
                    println!(
                        "  {} {} [{}]",
                        "✗".red(),
                        section.scenario,
                        marker_label(*marker).red()
                    );
                    println!("    {} {}", "Reason:".red(), diagnostic);
                }
                ScenarioOutcome::NotAttempted => {
                    println!(
                        "  {} {} {}",
                        "−".yellow(),
                        section.scenario,
                        "(not attempted)".dimmed()
                    );
                }
            }
        }

        if !self.thd_vs_power.is_empty() {
            println!();
            println!("  THD vs power: {} points", self.thd_vs_power.len());
            for point in &self.thd_vs_power {
                println!(
                    "    drive {:>4.2}  ->  {:>8.1} W, THD {:>6.3}%",
                    point.vref_pk, point.p_out_w, point.thd_percent
                );
            }
        }

        if let Some(tuning) = &self.tuning {
            println!();
            println!("  Tuning: {}", tune_outcome_label(&tuning.outcome));
            if let Some(selected) = &tuning.selected {
                for (name, value) in selected.iter() {
                    println!("    {name} = {}", format_num(value));
                }
            }
            if matches!(tuning.outcome, TuneOutcome::Exhausted { .. }) {
                if let Some(name) = tuning.most_violated_constraint() {
                    println!("    most violated constraint: {}", name.red());
                }
            }
        }

        println!("{}", "─".repeat(60));
        let verdict = if self.all_clean() {
            "SUITE CLEAN".green().bold().to_string()
        } else {
            format!("{} SCENARIOS FAILED", self.failed_count())
                .red()
                .bold()
                .to_string()
        };
        println!(
            "{} | {} measured, {} failed, {} not attempted",
            verdict,
            self.measured_count(),
            self.failed_count(),
            self.not_attempted_count()
        );
        println!("{}\n", "═".repeat(60).bold());
    }

    /// Metric-by-metric table for close reading.
    pub fn print_detailed(&self) {
        use tabled::{Table, Tabled};

        #[derive(Tabled)]
        struct MetricRow {
            scenario: String,
            metric: String,
            value: String,
        }

        let mut rows = vec![];
        for section in &self.scenarios {
            match &section.outcome {
                ScenarioOutcome::Measured { metrics } => {
                    for (name, value) in metrics {
                        rows.push(MetricRow {
                            scenario: section.scenario.clone(),
                            metric: name.clone(),
                            value: format_num(*value),
                        });
                    }
                }
                ScenarioOutcome::Failed { marker, .. } => rows.push(MetricRow {
                    scenario: section.scenario.clone(),
                    metric: "status".to_string(),
                    value: marker_label(*marker).to_string(),
                }),
                ScenarioOutcome::NotAttempted => rows.push(MetricRow {
                    scenario: section.scenario.clone(),
                    metric: "status".to_string(),
                    value: "not attempted".to_string(),
                }),
            }
        }

        if !rows.is_empty() {
            let table = Table::new(rows);
            println!("\nDetailed Metrics:\n{table}");
        }
    }
}

/// THD curve, one row per measured drive level. The header row is
/// written even when the sweep produced no points, so an all-skipped
/// sweep still yields a well-formed file.
pub fn write_thd_curve(points: &[ThdPoint], path: impl AsRef<Path>) -> Result<(), ReportError> {
    let mut writer = csv::Writer::from_path(path.as_ref())?;
    writer.write_record(["vref_pk", "vout_rms", "p_out_w", "thd_percent"])?;
    for point in points {
        writer.write_record([
            format_num(point.vref_pk),
            format_num(point.vout_rms),
            format_num(point.p_out_w),
            format_num(point.thd_percent),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn marker_label(marker: FailureMarker) -> &'static str {
    match marker {
        FailureMarker::SimulatorFailed => "simulator failed",
        FailureMarker::SimulatorTimedOut => "simulator timed out",
        FailureMarker::MissingSignal => "missing signal",
    }
}

fn tune_outcome_label(outcome: &TuneOutcome) -> String {
    match outcome {
        TuneOutcome::Selected { index } => format!("selected candidate {index}"),
        TuneOutcome::Exhausted { evaluated } => {
            format!("exhausted after {evaluated} candidates")
        }
        TuneOutcome::Cancelled { evaluated } => {
            format!("cancelled after {evaluated} candidates")
        }
    }
}

/// Shortest round-trip decimal for a metric value.
fn format_num(value: f64) -> String {
    format!("{value}")
}

/// Seconds since the epoch, enough for artifact provenance without
/// pulling in chrono.
fn unix_timestamp() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}", duration.as_secs())
}

fn git_commit() -> Option<String> {
    std::process::Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .and_then(|o| {
            if o.status.success() {
                String::from_utf8(o.stdout).ok().map(|s| s.trim().to_string())
            } else {
                None
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ParamSet;
    use crate::tuner::{CandidateRecord, CheckOutcome, CheckResult};
    use std::time::Duration;

    fn measured_section(name: &str, pairs: &[(&str, f64)]) -> ScenarioSection {
        let metrics = MetricSet {
            scenario: name.to_string(),
            values: pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        };
        ScenarioSection::measured(&metrics, 120)
    }

    fn sample_summary() -> SuiteSummary {
        let sections = vec![
            measured_section("step_load_change", &[("i_max", 512.08), ("p_out_pre", 3071.0)]),
            ScenarioSection::from_failed_status(
                "rail_sag",
                &RunStatus::TimedOut {
                    limit: Duration::from_secs(60),
                },
                60000,
            )
            .unwrap(),
            ScenarioSection::not_attempted("thermal_foldback"),
        ];
        let thd = vec![
            ThdPoint {
                vref_pk: 0.9,
                vout_rms: 290.0,
                p_out_w: 9200.0,
                thd_percent: 3.539,
            },
            ThdPoint {
                vref_pk: 0.2,
                vout_rms: 67.0,
                p_out_w: 1407.0,
                thd_percent: 0.061,
            },
        ];
        SuiteSummary::new("ngspice", sections, thd, None).unwrap()
    }

    #[test]
    fn empty_suite_is_rejected() {
        let err = SuiteSummary::new("ngspice", vec![], vec![], None).unwrap_err();
        assert!(matches!(err, ReportError::EmptySuite));
    }

    #[test]
    fn sweep_is_sorted_by_drive_level() {
        let summary = sample_summary();
        let drives: Vec<f64> = summary.thd_vs_power.iter().map(|p| p.vref_pk).collect();
        assert_eq!(drives, vec![0.2, 0.9]);
    }

    #[test]
    fn duplicate_drive_level_is_rejected() {
        let sections = vec![measured_section("a", &[("m", 1.0)])];
        let thd = vec![
            ThdPoint {
                vref_pk: 0.5,
                vout_rms: 1.0,
                p_out_w: 1.0,
                thd_percent: 1.0,
            },
            ThdPoint {
                vref_pk: 0.5,
                vout_rms: 2.0,
                p_out_w: 2.0,
                thd_percent: 2.0,
            },
        ];
        let err = SuiteSummary::new("ngspice", sections, thd, None).unwrap_err();
        assert!(matches!(err, ReportError::DuplicateDriveLevel(_)));
    }

    #[test]
    fn three_outcome_states_survive_json_round_trip() {
        let summary = sample_summary();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("suite_summary.json");
        summary.save_json(&path).unwrap();
        let loaded = SuiteSummary::load_json(&path).unwrap();
        assert_eq!(summary, loaded);
        assert_eq!(loaded.measured_count(), 1);
        assert_eq!(loaded.failed_count(), 1);
        assert_eq!(loaded.not_attempted_count(), 1);
    }

    #[test]
    fn failure_markers_map_from_run_status() {
        let failed = ScenarioSection::from_failed_status(
            "x",
            &RunStatus::Failed(RunFailure::MissingSignal {
                signal: "temp".to_string(),
            }),
            10,
        )
        .unwrap();
        match failed.outcome {
            ScenarioOutcome::Failed { marker, diagnostic } => {
                assert_eq!(marker, FailureMarker::MissingSignal);
                assert!(diagnostic.contains("temp"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(ScenarioSection::from_failed_status("x", &RunStatus::Completed, 1).is_none());
    }

    #[test]
    fn metrics_csv_has_sorted_union_header_and_measured_rows_only() {
        let sections = vec![
            measured_section("a", &[("u_max", 0.9), ("i_max", 500.0)]),
            measured_section("b", &[("p_out", 9000.0), ("i_max", 400.0)]),
            ScenarioSection::not_attempted("c"),
        ];
        let summary = SuiteSummary::new("mock", sections, vec![], None).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("suite_metrics.csv");
        summary.write_metrics_csv(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next().unwrap(), "scenario,i_max,p_out,u_max");
        assert_eq!(lines.next().unwrap(), "a,500,,0.9");
        assert_eq!(lines.next().unwrap(), "b,400,9000,");
        assert!(lines.next().is_none(), "unmeasured scenarios stay out");
    }

    #[test]
    fn thd_csv_uses_the_original_column_names() {
        let summary = sample_summary();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("thd_vs_power.csv");
        summary.write_thd_csv(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("vref_pk,vout_rms,p_out_w,thd_percent"));
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn empty_sweep_still_writes_the_thd_header() {
        let sections = vec![measured_section("a", &[("m", 1.0)])];
        let summary = SuiteSummary::new("mock", sections, vec![], None).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("thd_vs_power.csv");
        summary.write_thd_csv(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.trim_end(), "vref_pk,vout_rms,p_out_w,thd_percent");
    }

    #[test]
    fn tuning_csv_lists_candidates_with_verdicts() {
        let tuning = TuningResult {
            candidates: vec![
                CandidateRecord {
                    index: 0,
                    params: ParamSet::new().with("ILIM", 200.0),
                    checks: vec![CheckOutcome {
                        constraint: "peak_current".to_string(),
                        result: CheckResult::Violated {
                            observed: 250.0,
                            bound: 210.0,
                        },
                    }],
                    accepted: false,
                },
                CandidateRecord {
                    index: 1,
                    params: ParamSet::new().with("ILIM", 110.0),
                    checks: vec![CheckOutcome {
                        constraint: "peak_current".to_string(),
                        result: CheckResult::Passed {
                            observed: 100.0,
                            bound: 115.5,
                        },
                    }],
                    accepted: true,
                },
            ],
            selected: Some(ParamSet::new().with("ILIM", 110.0)),
            outcome: TuneOutcome::Selected { index: 1 },
        };
        let sections = vec![measured_section("a", &[("m", 1.0)])];
        let summary = SuiteSummary::new("mock", sections, vec![], Some(tuning)).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tuning_candidates.csv");
        summary.write_tuning_csv(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next().unwrap(), "candidate,ILIM,accepted,rejected_by");
        assert_eq!(lines.next().unwrap(), "0,200,false,peak_current");
        assert_eq!(lines.next().unwrap(), "1,110,true,");
    }

    #[test]
    fn markdown_keeps_all_three_states_visible() {
        let summary = sample_summary();
        let md = summary.render_markdown(Path::new("results/suite"));
        assert!(md.contains("## step_load_change"));
        assert!(md.contains("- i_max: 512.08"));
        assert!(md.contains("## rail_sag"));
        assert!(md.contains("- status: failed (simulator timed out)"));
        assert!(md.contains("## thermal_foldback"));
        assert!(md.contains("- status: not attempted"));
        assert!(md.contains("## THD vs Power"));
        assert!(md.contains("- points: 2"));
        assert!(md.contains("## Artifacts"));
    }

    #[test]
    fn write_all_produces_every_artifact() {
        let summary = sample_summary();
        let dir = tempfile::tempdir().unwrap();
        let paths = summary.write_all(dir.path()).unwrap();
        assert_eq!(paths.len(), 4); // no tuning csv without tuning
        for path in paths {
            assert!(path.exists(), "missing artifact {}", path.display());
        }
    }

    #[test]
    fn clean_suite_requires_selected_tuning_when_present() {
        let sections = vec![measured_section("a", &[("m", 1.0)])];
        let exhausted = TuningResult {
            candidates: vec![],
            selected: None,
            outcome: TuneOutcome::Exhausted { evaluated: 0 },
        };
        let summary =
            SuiteSummary::new("mock", sections, vec![], Some(exhausted)).unwrap();
        assert!(!summary.all_clean());
        assert_eq!(summary.failed_count(), 0);
    }
}
