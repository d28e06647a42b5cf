//! The simulation driver: one scenario in, one classified run out.
//!
//! The driver owns the plumbing between the registry and the
//! simulator. It resolves the full parameter set (schema defaults,
//! scenario overrides, caller overrides), renders the deck, invokes
//! the simulator under the configured timeout, and classifies the
//! result into a [`SimulationRun`]. Timeouts and simulator failures
//! come back as run statuses rather than errors; the only `Err` a
//! caller can see is a configuration mistake (unknown scenario or
//! parameter), and that one always halts the suite.

use std::time::{Duration, Instant};

use crate::netlist::render_deck;
use crate::registry::{ParamSet, RegistryError, ScenarioRegistry, ScenarioSpec};
use crate::spice::{SimFailure, SimJob, Simulator};
use crate::trace::{RunFailure, RunStatus, SimulationRun, TraceSet};

/// Default wall-clock budget for one transient.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

pub struct SimulationDriver<'a> {
    registry: &'a ScenarioRegistry,
    simulator: &'a dyn Simulator,
    timeout: Duration,
}

impl<'a> SimulationDriver<'a> {
    pub fn new(registry: &'a ScenarioRegistry, simulator: &'a dyn Simulator) -> Self {
        SimulationDriver {
            registry,
            simulator,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn registry(&self) -> &ScenarioRegistry {
        self.registry
    }

    /// Look a scenario up by name and run it.
    pub fn run_named(
        &self,
        name: &str,
        overrides: &ParamSet,
    ) -> Result<SimulationRun, RegistryError> {
        let spec = self.registry.get(name)?;
        self.run(spec, overrides)
    }

    /// Run one scenario with caller overrides layered on top.
    ///
    /// A completed invocation is still downgraded to
    /// [`RunFailure::MissingSignal`] if any required vector is absent
    /// from the output; partial traces are kept for inspection either
    /// way.
    pub fn run(
        &self,
        spec: &ScenarioSpec,
        overrides: &ParamSet,
    ) -> Result<SimulationRun, RegistryError> {
        let params = self.registry.resolve(spec, overrides)?;
        let deck = render_deck(&spec.template, &params);
        let job = SimJob {
            name: &spec.name,
            deck: &deck,
            signals: &spec.required_signals,
            params: &params,
            timeout: spec.timeout.unwrap_or(self.timeout),
        };

        let started = Instant::now();
        let (traces, status) = match self.simulator.invoke(&job) {
            Ok(traces) => match traces.first_missing(&spec.required_signals) {
                None => (traces, RunStatus::Completed),
                Some(signal) => {
                    let failure = RunFailure::MissingSignal {
                        signal: signal.to_string(),
                    };
                    (traces, RunStatus::Failed(failure))
                }
            },
            Err(SimFailure::TimedOut(limit)) => {
                (TraceSet::new(), RunStatus::TimedOut { limit })
            }
            Err(e) => {
                let failure = RunFailure::Simulator {
                    diagnostic: e.to_string(),
                };
                (TraceSet::new(), RunStatus::Failed(failure))
            }
        };

        Ok(SimulationRun {
            scenario: spec.name.clone(),
            params,
            traces,
            status,
            elapsed: started.elapsed(),
        })
    }
}
