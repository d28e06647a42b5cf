//! Scenario registry and the flat parameter schema behind it.
//!
//! Every scenario is registered up front against a single schema of
//! known parameter names. Registration is where all the name checking
//! happens: duplicate scenarios, parameters outside the schema, and
//! metric programs that read signals the scenario never records are
//! all rejected before anything is simulated. Once a scenario is in
//! the registry, running it cannot trip over a typo.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::metrics::MetricSpec;
use crate::netlist::CircuitTemplate;

/// Errors raised while building or querying the registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("scenario '{0}' is already registered")]
    DuplicateScenario(String),

    #[error("unknown scenario '{0}'")]
    UnknownScenario(String),

    #[error("scenario '{scenario}': parameter '{param}' is not in the schema")]
    UnknownParameter { scenario: String, param: String },

    #[error("scenario '{scenario}': duplicate metric name '{metric}'")]
    DuplicateMetric { scenario: String, metric: String },

    #[error("scenario '{scenario}': no metric named '{metric}'")]
    UnknownMetric { scenario: String, metric: String },

    #[error(
        "scenario '{scenario}': metric '{metric}' reads signal '{signal}' \
         which is not in the scenario's required signals"
    )]
    UndeclaredSignal {
        scenario: String,
        metric: String,
        signal: String,
    },
}

/// A flat name -> value map of circuit parameters.
///
/// Ordered so that rendered netlists and serialized reports are
/// byte-stable across runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamSet {
    values: BTreeMap<String, f64>,
}

impl ParamSet {
    pub fn new() -> Self {
        ParamSet::default()
    }

    /// Builder-style insert, handy for literals in scenario tables.
    pub fn with(mut self, name: &str, value: f64) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// New set with `overrides` layered on top of `self`.
    pub fn merged(&self, overrides: &ParamSet) -> ParamSet {
        let mut values = self.values.clone();
        for (name, value) in &overrides.values {
            values.insert(name.clone(), *value);
        }
        ParamSet { values }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// The set of parameter names the amplifier model understands, with
/// their nominal values.
#[derive(Debug, Clone)]
pub struct ParamSchema {
    defaults: ParamSet,
}

impl ParamSchema {
    pub fn new(defaults: ParamSet) -> Self {
        ParamSchema { defaults }
    }

    pub fn defaults(&self) -> &ParamSet {
        &self.defaults
    }

    pub fn contains(&self, name: &str) -> bool {
        self.defaults.contains(name)
    }

    /// First name in `params` the schema does not know, if any.
    pub fn first_unknown<'a>(&self, params: &'a ParamSet) -> Option<&'a str> {
        params.names().find(|name| !self.contains(name))
    }
}

/// What a scenario is for; drives which phase of the suite picks it up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioKind {
    /// Stress battery scenario, one row in the metrics table.
    Stress,
    /// Drive-level sweep scenario, run once per level.
    Sweep,
    /// Device-realism check used by the tuner's hard constraints.
    Safety,
}

/// A registered scenario: circuit template, parameter overrides, the
/// signals the simulator must record, and the metric program run over
/// the completed traces.
#[derive(Debug, Clone)]
pub struct ScenarioSpec {
    pub name: String,
    pub kind: ScenarioKind,
    pub description: String,
    pub template: CircuitTemplate,
    /// Scenario-level parameter overrides, layered on schema defaults.
    pub params: ParamSet,
    pub required_signals: Vec<String>,
    pub metrics: Vec<MetricSpec>,
    /// Per-scenario wall-clock budget; `None` uses the driver default.
    pub timeout: Option<Duration>,
}

/// Ordered collection of scenarios sharing one parameter schema.
///
/// Iteration order is registration order; the report and the metrics
/// table both follow it.
#[derive(Debug)]
pub struct ScenarioRegistry {
    schema: ParamSchema,
    order: Vec<String>,
    scenarios: BTreeMap<String, ScenarioSpec>,
}

impl ScenarioRegistry {
    pub fn new(schema: ParamSchema) -> Self {
        ScenarioRegistry {
            schema,
            order: Vec::new(),
            scenarios: BTreeMap::new(),
        }
    }

    pub fn schema(&self) -> &ParamSchema {
        &self.schema
    }

    /// Add a scenario, validating every name it mentions.
    pub fn register(&mut self, spec: ScenarioSpec) -> Result<(), RegistryError> {
        if self.scenarios.contains_key(&spec.name) {
            return Err(RegistryError::DuplicateScenario(spec.name));
        }
        if let Some(param) = self.schema.first_unknown(&spec.params) {
            return Err(RegistryError::UnknownParameter {
                scenario: spec.name.clone(),
                param: param.to_string(),
            });
        }
        let mut seen = BTreeMap::new();
        for metric in &spec.metrics {
            if seen.insert(metric.name.clone(), ()).is_some() {
                return Err(RegistryError::DuplicateMetric {
                    scenario: spec.name.clone(),
                    metric: metric.name.clone(),
                });
            }
            for signal in metric.op.signals() {
                if !spec.required_signals.iter().any(|s| s == signal) {
                    return Err(RegistryError::UndeclaredSignal {
                        scenario: spec.name.clone(),
                        metric: metric.name.clone(),
                        signal: signal.to_string(),
                    });
                }
            }
        }
        self.order.push(spec.name.clone());
        self.scenarios.insert(spec.name.clone(), spec);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&ScenarioSpec, RegistryError> {
        self.scenarios
            .get(name)
            .ok_or_else(|| RegistryError::UnknownScenario(name.to_string()))
    }

    /// Full parameter set for a run: schema defaults, then scenario
    /// overrides, then caller overrides. Caller overrides are checked
    /// against the schema.
    pub fn resolve(
        &self,
        spec: &ScenarioSpec,
        overrides: &ParamSet,
    ) -> Result<ParamSet, RegistryError> {
        if let Some(param) = self.schema.first_unknown(overrides) {
            return Err(RegistryError::UnknownParameter {
                scenario: spec.name.clone(),
                param: param.to_string(),
            });
        }
        Ok(self
            .schema
            .defaults()
            .merged(&spec.params)
            .merged(overrides))
    }

    /// Scenarios in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &ScenarioSpec> {
        self.order.iter().filter_map(|name| self.scenarios.get(name))
    }

    /// Scenarios of one kind, in registration order.
    pub fn of_kind(&self, kind: ScenarioKind) -> Vec<&ScenarioSpec> {
        self.iter().filter(|s| s.kind == kind).collect()
    }

    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricOp;
    use crate::netlist::{RailModel, TranSpec};

    fn test_schema() -> ParamSchema {
        ParamSchema::new(
            ParamSet::new()
                .with("DRIVE", 0.95)
                .with("F_AUDIO", 1000.0)
                .with("ILIM", 110.0),
        )
    }

    fn test_template() -> CircuitTemplate {
        CircuitTemplate::new(
            "registry test",
            RailModel::Regulated,
            "Vref ref 0 SIN(0 {DRIVE} {F_AUDIO})",
            "Rload loadp loadn2 1.6",
            TranSpec::new(1e-5, 30e-3),
        )
    }

    fn spec(name: &str) -> ScenarioSpec {
        ScenarioSpec {
            name: name.to_string(),
            kind: ScenarioKind::Stress,
            description: String::new(),
            template: test_template(),
            params: ParamSet::new(),
            required_signals: vec!["vout".to_string(), "isense".to_string()],
            metrics: vec![MetricSpec::new("v_pk", MetricOp::peak("vout", None))],
            timeout: None,
        }
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut reg = ScenarioRegistry::new(test_schema());
        reg.register(spec("a")).unwrap();
        let err = reg.register(spec("a")).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateScenario(n) if n == "a"));
    }

    #[test]
    fn unknown_scenario_param_is_rejected_at_registration() {
        let mut reg = ScenarioRegistry::new(test_schema());
        let mut s = spec("a");
        s.params.insert("NOT_A_PARAM", 1.0);
        let err = reg.register(s).unwrap_err();
        assert!(matches!(
            err,
            RegistryError::UnknownParameter { param, .. } if param == "NOT_A_PARAM"
        ));
    }

    #[test]
    fn metric_reading_unrecorded_signal_is_rejected() {
        let mut reg = ScenarioRegistry::new(test_schema());
        let mut s = spec("a");
        s.metrics
            .push(MetricSpec::new("t_end", MetricOp::last("temp")));
        let err = reg.register(s).unwrap_err();
        assert!(matches!(
            err,
            RegistryError::UndeclaredSignal { signal, .. } if signal == "temp"
        ));
    }

    #[test]
    fn duplicate_metric_name_is_rejected() {
        let mut reg = ScenarioRegistry::new(test_schema());
        let mut s = spec("a");
        s.metrics
            .push(MetricSpec::new("v_pk", MetricOp::peak("isense", None)));
        let err = reg.register(s).unwrap_err();
        assert!(matches!(
            err,
            RegistryError::DuplicateMetric { metric, .. } if metric == "v_pk"
        ));
    }

    #[test]
    fn resolve_layers_defaults_scenario_then_overrides() {
        let mut reg = ScenarioRegistry::new(test_schema());
        let mut s = spec("a");
        s.params.insert("DRIVE", 0.5);
        reg.register(s).unwrap();

        let spec = reg.get("a").unwrap();
        let resolved = reg
            .resolve(spec, &ParamSet::new().with("ILIM", 42.0))
            .unwrap();
        assert_eq!(resolved.get("DRIVE"), Some(0.5)); // scenario beats default
        assert_eq!(resolved.get("ILIM"), Some(42.0)); // override beats default
        assert_eq!(resolved.get("F_AUDIO"), Some(1000.0)); // default survives
    }

    #[test]
    fn resolve_rejects_unknown_override() {
        let mut reg = ScenarioRegistry::new(test_schema());
        reg.register(spec("a")).unwrap();
        let spec = reg.get("a").unwrap();
        let err = reg
            .resolve(spec, &ParamSet::new().with("BOGUS", 1.0))
            .unwrap_err();
        assert!(matches!(err, RegistryError::UnknownParameter { .. }));
    }

    #[test]
    fn iteration_preserves_registration_order() {
        let mut reg = ScenarioRegistry::new(test_schema());
        for name in ["zeta", "alpha", "mid"] {
            reg.register(spec(name)).unwrap();
        }
        let names: Vec<&str> = reg.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn unknown_scenario_lookup_fails() {
        let reg = ScenarioRegistry::new(test_schema());
        assert!(matches!(
            reg.get("nope").unwrap_err(),
            RegistryError::UnknownScenario(n) if n == "nope"
        ));
    }
}
