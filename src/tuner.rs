//! Constraint-driven parameter search over the safety scenarios.
//!
//! A candidate generator proposes parameter overrides; the tuner runs
//! the device-realism scenarios for each candidate and holds the
//! extracted metrics against a list of hard constraints. Evaluation
//! short-circuits on the first violated constraint, the first passing
//! candidate wins, and a drained generator is a perfectly ordinary
//! outcome, not an error.
//!
//! The search itself is an explicit state machine:
//!
//! ```text
//! Evaluating -> Accepted            (terminal)
//!            -> Rejected -> Evaluating ...
//!            -> Exhausted           (terminal)
//!            -> Cancelled           (terminal)
//! ```
//!
//! Each [`Tuner::step`] call advances the machine by one candidate, so
//! progress can be reported and cancellation honored between
//! simulations, never in the middle of one.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::driver::SimulationDriver;
use crate::metrics::{extract, MetricSet};
use crate::registry::{ParamSet, RegistryError};
use crate::trace::{RunFailure, RunStatus};

/// One tunable parameter and the values the grid search tries for it.
#[derive(Debug, Clone)]
pub struct TuneAxis {
    pub name: String,
    pub values: Vec<f64>,
}

impl TuneAxis {
    pub fn new(name: &str, values: Vec<f64>) -> Self {
        TuneAxis {
            name: name.to_string(),
            values,
        }
    }
}

/// Source of candidate parameter overrides.
pub trait CandidateGenerator {
    /// Next candidate, or `None` when the search space is drained.
    fn next_candidate(&mut self) -> Option<ParamSet>;
}

/// Exhaustive cartesian product over the axes, first axis slowest.
/// An axis with no values empties the whole grid.
pub struct GridGenerator {
    axes: Vec<TuneAxis>,
    index: usize,
    total: usize,
}

impl GridGenerator {
    pub fn new(axes: Vec<TuneAxis>) -> Self {
        let total = if axes.is_empty() {
            0
        } else {
            axes.iter().map(|a| a.values.len()).product()
        };
        GridGenerator {
            axes,
            index: 0,
            total,
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }
}

impl CandidateGenerator for GridGenerator {
    fn next_candidate(&mut self) -> Option<ParamSet> {
        if self.index >= self.total {
            return None;
        }
        let mut rem = self.index;
        let mut params = ParamSet::new();
        for axis in self.axes.iter().rev() {
            let k = rem % axis.values.len();
            rem /= axis.values.len();
            params.insert(axis.name.clone(), axis.values[k]);
        }
        self.index += 1;
        Some(params)
    }
}

/// Seeded uniform sampling inside per-parameter bounds. The same seed
/// always replays the same candidate sequence.
pub struct RandomGenerator {
    axes: Vec<(String, f64, f64)>,
    remaining: usize,
    rng: StdRng,
}

impl RandomGenerator {
    pub fn new(axes: Vec<(String, f64, f64)>, count: usize, seed: u64) -> Self {
        RandomGenerator {
            axes,
            remaining: count,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl CandidateGenerator for RandomGenerator {
    fn next_candidate(&mut self) -> Option<ParamSet> {
        if self.remaining == 0 || self.axes.is_empty() {
            return None;
        }
        self.remaining -= 1;
        let mut params = ParamSet::new();
        for (name, lo, hi) in &self.axes {
            params.insert(name.clone(), self.rng.gen_range(*lo..=*hi));
        }
        Some(params)
    }
}

/// Comparison applied to an observed metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Check {
    AtMost(f64),
    AtLeast(f64),
    /// `observed <= factor * resolved value of `param`` for the
    /// candidate under test; lets a limit track the knob that sets it.
    AtMostFactorOfParam { param: String, factor: f64 },
}

/// A non-negotiable bound on one metric of one safety scenario.
/// Declaration order is evaluation order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardConstraint {
    pub name: String,
    pub scenario: String,
    pub metric: String,
    pub check: Check,
}

impl HardConstraint {
    pub fn at_most(name: &str, scenario: &str, metric: &str, bound: f64) -> Self {
        HardConstraint {
            name: name.to_string(),
            scenario: scenario.to_string(),
            metric: metric.to_string(),
            check: Check::AtMost(bound),
        }
    }

    pub fn at_least(name: &str, scenario: &str, metric: &str, bound: f64) -> Self {
        HardConstraint {
            name: name.to_string(),
            scenario: scenario.to_string(),
            metric: metric.to_string(),
            check: Check::AtLeast(bound),
        }
    }

    pub fn at_most_factor_of(
        name: &str,
        scenario: &str,
        metric: &str,
        param: &str,
        factor: f64,
    ) -> Self {
        HardConstraint {
            name: name.to_string(),
            scenario: scenario.to_string(),
            metric: metric.to_string(),
            check: Check::AtMostFactorOfParam {
                param: param.to_string(),
                factor,
            },
        }
    }

    /// NaN observations never satisfy a bound.
    fn holds(&self, observed: f64, bound: f64) -> bool {
        match &self.check {
            Check::AtMost(_) | Check::AtMostFactorOfParam { .. } => observed <= bound,
            Check::AtLeast(_) => observed >= bound,
        }
    }
}

/// How one constraint fared for one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CheckResult {
    Passed { observed: f64, bound: f64 },
    Violated { observed: f64, bound: f64 },
    /// The backing scenario failed or timed out, so the bound could
    /// not be checked; treated as a rejection.
    Unevaluable { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub constraint: String,
    #[serde(flatten)]
    pub result: CheckResult,
}

/// Audit record for one evaluated candidate. `checks` stops at the
/// first non-passing entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub index: usize,
    pub params: ParamSet,
    pub checks: Vec<CheckOutcome>,
    pub accepted: bool,
}

impl CandidateRecord {
    /// Name of the constraint that sank this candidate, if any.
    pub fn rejected_by(&self) -> Option<&str> {
        self.checks
            .iter()
            .find(|c| !matches!(c.result, CheckResult::Passed { .. }))
            .map(|c| c.constraint.as_str())
    }
}

/// The search state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum TunerState {
    Evaluating { index: usize },
    Accepted { index: usize },
    Rejected { index: usize },
    Exhausted,
    Cancelled,
}

impl TunerState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TunerState::Accepted { .. } | TunerState::Exhausted | TunerState::Cancelled
        )
    }
}

/// Terminal outcome of a search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TuneOutcome {
    Selected { index: usize },
    Exhausted { evaluated: usize },
    Cancelled { evaluated: usize },
}

/// Everything a search produced: the per-candidate audit trail, the
/// winning overrides if any, and how it ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningResult {
    pub candidates: Vec<CandidateRecord>,
    pub selected: Option<ParamSet>,
    #[serde(flatten)]
    pub outcome: TuneOutcome,
}

impl TuningResult {
    /// The constraint that rejected the most candidates. The answer to
    /// "why did the search come up empty" after an exhausted run.
    pub fn most_violated_constraint(&self) -> Option<&str> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for candidate in &self.candidates {
            if let Some(name) = candidate.rejected_by() {
                *counts.entry(name).or_default() += 1;
            }
        }
        counts
            .into_iter()
            .max_by_key(|(_, count)| *count)
            .map(|(name, _)| name)
    }
}

pub struct Tuner<'a> {
    driver: &'a SimulationDriver<'a>,
    constraints: &'a [HardConstraint],
    cancel: Option<&'a AtomicBool>,
    state: TunerState,
    records: Vec<CandidateRecord>,
}

impl<'a> Tuner<'a> {
    pub fn new(driver: &'a SimulationDriver<'a>, constraints: &'a [HardConstraint]) -> Self {
        Tuner {
            driver,
            constraints,
            cancel: None,
            state: TunerState::Evaluating { index: 0 },
            records: Vec::new(),
        }
    }

    /// Cooperative cancellation, checked between candidates.
    pub fn with_cancel(mut self, flag: &'a AtomicBool) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn state(&self) -> &TunerState {
        &self.state
    }

    pub fn records(&self) -> &[CandidateRecord] {
        &self.records
    }

    /// Advance by one candidate. Terminal states are sticky; an `Err`
    /// means the harness itself is misconfigured and the search cannot
    /// continue.
    pub fn step(
        &mut self,
        generator: &mut dyn CandidateGenerator,
    ) -> Result<&TunerState, RegistryError> {
        if self.state.is_terminal() {
            return Ok(&self.state);
        }
        if let Some(flag) = self.cancel {
            if flag.load(Ordering::Relaxed) {
                self.state = TunerState::Cancelled;
                return Ok(&self.state);
            }
        }
        let index = self.records.len();
        let Some(candidate) = generator.next_candidate() else {
            self.state = TunerState::Exhausted;
            return Ok(&self.state);
        };

        self.state = TunerState::Evaluating { index };
        let record = self.evaluate(index, candidate)?;
        self.state = if record.accepted {
            TunerState::Accepted { index }
        } else {
            TunerState::Rejected { index }
        };
        self.records.push(record);
        Ok(&self.state)
    }

    /// Drive the machine to a terminal state and package the result.
    pub fn run(
        mut self,
        generator: &mut dyn CandidateGenerator,
    ) -> Result<TuningResult, RegistryError> {
        while !self.state.is_terminal() {
            self.step(generator)?;
        }
        let outcome = match self.state {
            TunerState::Accepted { index } => TuneOutcome::Selected { index },
            TunerState::Cancelled => TuneOutcome::Cancelled {
                evaluated: self.records.len(),
            },
            _ => TuneOutcome::Exhausted {
                evaluated: self.records.len(),
            },
        };
        let selected = match outcome {
            TuneOutcome::Selected { index } => Some(self.records[index].params.clone()),
            _ => None,
        };
        Ok(TuningResult {
            candidates: self.records,
            selected,
            outcome,
        })
    }

    /// Run the safety scenarios this candidate needs and check every
    /// constraint in declaration order, stopping at the first failure.
    /// Scenario runs are cached so two constraints on the same
    /// scenario cost one simulation.
    fn evaluate(
        &self,
        index: usize,
        candidate: ParamSet,
    ) -> Result<CandidateRecord, RegistryError> {
        let mut cache: BTreeMap<String, Result<(ParamSet, MetricSet), String>> = BTreeMap::new();
        let mut checks = Vec::new();
        let mut accepted = true;

        for constraint in self.constraints {
            if !cache.contains_key(&constraint.scenario) {
                let run = self.driver.run_named(&constraint.scenario, &candidate)?;
                let entry = match &run.status {
                    RunStatus::Completed => {
                        let spec = self.driver.registry().get(&constraint.scenario)?;
                        let metrics = extract(&spec.name, &spec.metrics, &run.traces);
                        Ok((run.params.clone(), metrics))
                    }
                    RunStatus::TimedOut { limit } => Err(format!(
                        "scenario '{}' timed out after {:?}",
                        constraint.scenario, limit
                    )),
                    RunStatus::Failed(RunFailure::Simulator { diagnostic }) => Err(format!(
                        "scenario '{}' failed: {diagnostic}",
                        constraint.scenario
                    )),
                    RunStatus::Failed(RunFailure::MissingSignal { signal }) => Err(format!(
                        "scenario '{}' output lacked signal '{signal}'",
                        constraint.scenario
                    )),
                };
                cache.insert(constraint.scenario.clone(), entry);
            }

            let result = match &cache[&constraint.scenario] {
                Err(reason) => CheckResult::Unevaluable {
                    reason: reason.clone(),
                },
                Ok((resolved, metrics)) => {
                    let observed = metrics.get(&constraint.metric).ok_or_else(|| {
                        RegistryError::UnknownMetric {
                            scenario: constraint.scenario.clone(),
                            metric: constraint.metric.clone(),
                        }
                    })?;
                    let bound = match &constraint.check {
                        Check::AtMost(b) | Check::AtLeast(b) => *b,
                        Check::AtMostFactorOfParam { param, factor } => {
                            match resolved.get(param) {
                                Some(v) => v * factor,
                                None => {
                                    return Err(RegistryError::UnknownParameter {
                                        scenario: constraint.scenario.clone(),
                                        param: param.clone(),
                                    })
                                }
                            }
                        }
                    };
                    if constraint.holds(observed, bound) {
                        CheckResult::Passed { observed, bound }
                    } else {
                        CheckResult::Violated { observed, bound }
                    }
                }
            };

            let passed = matches!(result, CheckResult::Passed { .. });
            checks.push(CheckOutcome {
                constraint: constraint.name.clone(),
                result,
            });
            if !passed {
                accepted = false;
                break;
            }
        }

        Ok(CandidateRecord {
            index,
            params: candidate,
            checks,
            accepted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{MetricOp, MetricSpec};
    use crate::netlist::{CircuitTemplate, RailModel, TranSpec};
    use crate::registry::{ParamSchema, ScenarioKind, ScenarioRegistry, ScenarioSpec};
    use crate::spice::{SimFailure, SimJob};
    use crate::trace::{Trace, TraceSet};
    use std::sync::atomic::AtomicUsize;

    fn safety_spec(name: &str, signal: &str, metric: &str) -> ScenarioSpec {
        ScenarioSpec {
            name: name.to_string(),
            kind: ScenarioKind::Safety,
            description: String::new(),
            template: CircuitTemplate::new(
                name,
                RailModel::Regulated,
                "Vref ref 0 SIN(0 {DRIVE} 1000)",
                "Rload loadp loadn2 0.25",
                TranSpec::new(1e-5, 1e-3),
            ),
            params: ParamSet::new(),
            required_signals: vec![signal.to_string()],
            metrics: vec![MetricSpec::new(metric, MetricOp::peak_abs(signal, None))],
            timeout: None,
        }
    }

    fn registry() -> ScenarioRegistry {
        let schema = ParamSchema::new(
            ParamSet::new()
                .with("DRIVE", 0.95)
                .with("ILIM", 110.0)
                .with("FSW", 350e3),
        );
        let mut reg = ScenarioRegistry::new(schema);
        reg.register(safety_spec("overcurrent", "isense", "i_max"))
            .unwrap();
        reg.register(safety_spec("gate_drive", "gslew", "slew_frac"))
            .unwrap();
        reg
    }

    /// Limiter model: the load wants 100 A, the limiter clamps at ILIM.
    fn limiter_sim(job: &SimJob<'_>) -> Result<TraceSet, SimFailure> {
        let ilim = job.params.get("ILIM").unwrap();
        let amp = 100.0_f64.min(ilim);
        let mut ts = TraceSet::new();
        for s in job.signals {
            ts.insert(
                s.clone(),
                Trace::from_samples(vec![0.0, 1e-5], vec![amp, amp]),
            );
        }
        Ok(ts)
    }

    #[test]
    fn grid_generator_walks_cartesian_product_first_axis_slowest() {
        let mut gen = GridGenerator::new(vec![
            TuneAxis::new("A", vec![1.0, 2.0]),
            TuneAxis::new("B", vec![10.0, 20.0]),
        ]);
        assert_eq!(gen.total(), 4);
        let seen: Vec<(f64, f64)> = std::iter::from_fn(|| gen.next_candidate())
            .map(|p| (p.get("A").unwrap(), p.get("B").unwrap()))
            .collect();
        assert_eq!(
            seen,
            vec![(1.0, 10.0), (1.0, 20.0), (2.0, 10.0), (2.0, 20.0)]
        );
    }

    #[test]
    fn grid_generator_with_empty_axis_is_empty() {
        let mut gen = GridGenerator::new(vec![
            TuneAxis::new("A", vec![1.0]),
            TuneAxis::new("B", vec![]),
        ]);
        assert_eq!(gen.total(), 0);
        assert!(gen.next_candidate().is_none());
    }

    #[test]
    fn random_generator_is_deterministic_per_seed() {
        let axes = vec![("ILIM".to_string(), 60.0, 140.0)];
        let mut empty = RandomGenerator::new(axes.clone(), 0, 7);
        assert!(empty.next_candidate().is_none());

        let mut g1 = RandomGenerator::new(axes.clone(), 5, 42);
        let mut g2 = RandomGenerator::new(axes.clone(), 5, 42);
        for _ in 0..5 {
            let p1 = g1.next_candidate().unwrap();
            let p2 = g2.next_candidate().unwrap();
            assert_eq!(p1, p2);
            let v = p1.get("ILIM").unwrap();
            assert!((60.0..=140.0).contains(&v));
        }
        assert!(g1.next_candidate().is_none());
    }

    #[test]
    fn first_passing_candidate_is_accepted() {
        let reg = registry();
        let sim = limiter_sim;
        let driver = SimulationDriver::new(&reg, &sim);
        let constraints =
            vec![HardConstraint::at_most("peak_current", "overcurrent", "i_max", 95.0)];
        let mut gen = GridGenerator::new(vec![TuneAxis::new("ILIM", vec![200.0, 80.0])]);
        let result = Tuner::new(&driver, &constraints).run(&mut gen).unwrap();

        assert_eq!(result.outcome, TuneOutcome::Selected { index: 1 });
        assert_eq!(result.candidates.len(), 2);
        assert!(!result.candidates[0].accepted);
        assert_eq!(result.candidates[0].rejected_by(), Some("peak_current"));
        assert!(result.candidates[1].accepted);
        assert_eq!(result.selected.as_ref().unwrap().get("ILIM"), Some(80.0));
    }

    #[test]
    fn factor_bound_tracks_the_candidate_parameter() {
        let reg = registry();
        let sim = limiter_sim;
        let driver = SimulationDriver::new(&reg, &sim);
        // i_max <= 1.05 * ILIM: an ILIM far below the demanded current
        // passes (limiter engages), a huge one fails (100 > nothing).
        let constraints = vec![HardConstraint::at_most_factor_of(
            "limiter_tracks_knob",
            "overcurrent",
            "i_max",
            "ILIM",
            1.05,
        )];
        let mut gen = GridGenerator::new(vec![TuneAxis::new("ILIM", vec![90.0, 200.0])]);
        let result = Tuner::new(&driver, &constraints).run(&mut gen).unwrap();
        // 90: observed 90 <= 94.5 -> accepted immediately.
        assert_eq!(result.outcome, TuneOutcome::Selected { index: 0 });
        match &result.candidates[0].checks[0].result {
            CheckResult::Passed { observed, bound } => {
                assert_eq!(*observed, 90.0);
                assert!((bound - 94.5).abs() < 1e-9);
            }
            other => panic!("expected pass, got {other:?}"),
        }
    }

    #[test]
    fn evaluation_short_circuits_on_first_violation() {
        let reg = registry();
        let gate_runs = AtomicUsize::new(0);
        let sim = |job: &SimJob<'_>| -> Result<TraceSet, SimFailure> {
            if job.name == "gate_drive" {
                gate_runs.fetch_add(1, Ordering::Relaxed);
            }
            limiter_sim(job)
        };
        let driver = SimulationDriver::new(&reg, &sim);
        let constraints = vec![
            HardConstraint::at_most("peak_current", "overcurrent", "i_max", 5.0),
            HardConstraint::at_most("gate_slew", "gate_drive", "slew_frac", 1000.0),
        ];
        let mut gen = GridGenerator::new(vec![TuneAxis::new("ILIM", vec![110.0])]);
        let result = Tuner::new(&driver, &constraints).run(&mut gen).unwrap();

        assert_eq!(result.outcome, TuneOutcome::Exhausted { evaluated: 1 });
        assert_eq!(result.candidates[0].checks.len(), 1);
        assert_eq!(gate_runs.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn failed_scenario_rejects_candidate_as_unevaluable() {
        let reg = registry();
        let sim = |_: &SimJob<'_>| -> Result<TraceSet, SimFailure> {
            Err(SimFailure::TimedOut(std::time::Duration::from_secs(1)))
        };
        let driver = SimulationDriver::new(&reg, &sim);
        let constraints =
            vec![HardConstraint::at_most("peak_current", "overcurrent", "i_max", 95.0)];
        let mut gen = GridGenerator::new(vec![TuneAxis::new("ILIM", vec![80.0])]);
        let result = Tuner::new(&driver, &constraints).run(&mut gen).unwrap();

        assert_eq!(result.outcome, TuneOutcome::Exhausted { evaluated: 1 });
        match &result.candidates[0].checks[0].result {
            CheckResult::Unevaluable { reason } => assert!(reason.contains("timed out")),
            other => panic!("expected unevaluable, got {other:?}"),
        }
    }

    #[test]
    fn drained_generator_exhausts_the_machine() {
        let reg = registry();
        let sim = limiter_sim;
        let driver = SimulationDriver::new(&reg, &sim);
        let constraints =
            vec![HardConstraint::at_most("peak_current", "overcurrent", "i_max", 5.0)];
        let mut gen = GridGenerator::new(vec![TuneAxis::new("ILIM", vec![50.0, 60.0])]);
        let result = Tuner::new(&driver, &constraints).run(&mut gen).unwrap();
        assert_eq!(result.outcome, TuneOutcome::Exhausted { evaluated: 2 });
        assert!(result.selected.is_none());
        assert_eq!(result.most_violated_constraint(), Some("peak_current"));
    }

    #[test]
    fn cancellation_wins_between_candidates() {
        let reg = registry();
        let sim = limiter_sim;
        let driver = SimulationDriver::new(&reg, &sim);
        let constraints =
            vec![HardConstraint::at_most("peak_current", "overcurrent", "i_max", 5.0)];
        let mut gen = GridGenerator::new(vec![TuneAxis::new("ILIM", vec![50.0, 60.0, 70.0])]);
        let cancel = AtomicBool::new(false);

        let mut tuner = Tuner::new(&driver, &constraints).with_cancel(&cancel);
        assert_eq!(
            tuner.step(&mut gen).unwrap(),
            &TunerState::Rejected { index: 0 }
        );
        cancel.store(true, Ordering::Relaxed);
        assert_eq!(tuner.step(&mut gen).unwrap(), &TunerState::Cancelled);

        let result = tuner.run(&mut gen).unwrap();
        assert_eq!(result.outcome, TuneOutcome::Cancelled { evaluated: 1 });
    }

    #[test]
    fn unknown_constraint_metric_is_a_hard_error() {
        let reg = registry();
        let sim = limiter_sim;
        let driver = SimulationDriver::new(&reg, &sim);
        let constraints =
            vec![HardConstraint::at_most("typo", "overcurrent", "not_a_metric", 1.0)];
        let mut gen = GridGenerator::new(vec![TuneAxis::new("ILIM", vec![80.0])]);
        let err = Tuner::new(&driver, &constraints).run(&mut gen).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownMetric { .. }));
    }
}
