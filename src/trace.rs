//! Time-series containers shared by the simulator boundary and the
//! metric extractor.
//!
//! A [`Trace`] is one recorded vector (time axis plus values), a
//! [`TraceSet`] is the named collection returned by a single simulator
//! invocation, and a [`SimulationRun`] bundles the traces with the
//! resolved parameters and a completion status. Window selection lives
//! here so every metric op slices samples the same way.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::registry::ParamSet;

/// Closed time interval in seconds, `[from, to]`.
///
/// Matches the `from=`/`to=` convention of SPICE `.meas` directives:
/// both endpoints are included when a sample lands exactly on them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Window {
    pub from: f64,
    pub to: f64,
}

impl Window {
    pub fn new(from: f64, to: f64) -> Self {
        Window { from, to }
    }

    pub fn contains(&self, t: f64) -> bool {
        t >= self.from && t <= self.to
    }

    /// Window covering the last `span` seconds of a trace that ends at
    /// `t_end`.
    pub fn trailing(t_end: f64, span: f64) -> Self {
        Window {
            from: t_end - span,
            to: t_end,
        }
    }
}

/// One recorded vector: a time axis and the samples on it.
///
/// Times are nondecreasing; transient output from the simulator always
/// satisfies this and [`Trace::push`] keeps it that way for synthetic
/// traces built in tests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trace {
    times: Vec<f64>,
    values: Vec<f64>,
}

impl Trace {
    pub fn new() -> Self {
        Trace::default()
    }

    /// Build a trace from parallel time/value vectors.
    pub fn from_samples(times: Vec<f64>, values: Vec<f64>) -> Self {
        assert_eq!(
            times.len(),
            values.len(),
            "time and value vectors must have equal length"
        );
        Trace { times, values }
    }

    pub fn push(&mut self, t: f64, v: f64) {
        if let Some(&last) = self.times.last() {
            debug_assert!(t >= last, "trace times must be nondecreasing");
        }
        self.times.push(t);
        self.values.push(v);
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn first_time(&self) -> Option<f64> {
        self.times.first().copied()
    }

    pub fn last_time(&self) -> Option<f64> {
        self.times.last().copied()
    }

    pub fn last_value(&self) -> Option<f64> {
        self.values.last().copied()
    }

    /// Samples inside `window` as parallel slices, the whole trace when
    /// `window` is `None`.
    pub fn slice(&self, window: Option<Window>) -> (&[f64], &[f64]) {
        match window {
            None => (&self.times, &self.values),
            Some(w) => {
                let lo = self.times.partition_point(|&t| t < w.from);
                let hi = self.times.partition_point(|&t| t <= w.to);
                let hi = hi.max(lo);
                (&self.times[lo..hi], &self.values[lo..hi])
            }
        }
    }

}

/// Named traces from one simulator invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TraceSet {
    traces: BTreeMap<String, Trace>,
}

impl TraceSet {
    pub fn new() -> Self {
        TraceSet::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, trace: Trace) {
        self.traces.insert(name.into(), trace);
    }

    pub fn get(&self, name: &str) -> Option<&Trace> {
        self.traces.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.traces.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.traces.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.traces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }

    /// First name in `required` that has no trace here.
    pub fn first_missing<'a>(&self, required: &'a [String]) -> Option<&'a str> {
        required
            .iter()
            .map(String::as_str)
            .find(|name| !self.traces.contains_key(*name))
    }
}

/// Why a run that reached the simulator did not produce usable traces.
#[derive(Debug, Clone, PartialEq)]
pub enum RunFailure {
    /// The simulator finished but a required vector never made it into
    /// the recorded output.
    MissingSignal { signal: String },
    /// The simulator exited unsuccessfully: non-zero exit status,
    /// convergence failure, or unparseable output.
    Simulator { diagnostic: String },
}

/// Terminal state of one scenario run.
///
/// `TimedOut` is deliberately not folded into `Failed`: a hung
/// simulation and a diverging one call for different fixes, and the
/// report keeps them apart.
#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
    Completed,
    Failed(RunFailure),
    TimedOut { limit: Duration },
}

impl RunStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, RunStatus::Completed)
    }
}

/// Everything the driver hands back for one scenario: the resolved
/// parameter set actually simulated, the recorded traces, and how the
/// run ended.
#[derive(Debug, Clone)]
pub struct SimulationRun {
    pub scenario: String,
    pub params: ParamSet,
    pub traces: TraceSet,
    pub status: RunStatus,
    pub elapsed: Duration,
}

impl SimulationRun {
    pub fn is_completed(&self) -> bool {
        self.status.is_completed()
    }
}
