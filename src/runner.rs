//! Suite orchestration: the stress battery and the distortion sweep.
//!
//! The battery fans the stress scenarios out over a bounded worker
//! pool; every run is self-contained (own deck, own child process), so
//! the only shared state is the immutable registry. Results come back
//! in registration order regardless of completion order, and a failed
//! scenario never takes the rest of the battery down with it.
//!
//! The sweep is sequential in drive order: one run per level, THD
//! measured over the trailing steady-state window. Levels whose run
//! fails are skipped with a reason and the curve is built from the
//! rest.

use rayon::prelude::*;
use thiserror::Error;

use crate::driver::SimulationDriver;
use crate::metrics::{extract, thd_percent};
use crate::registry::{ParamSet, RegistryError, ScenarioKind, ScenarioSpec};
use crate::report::{ScenarioSection, ThdPoint};
use crate::scenarios::{THD_HARMONICS, THD_WINDOW_SPAN};
use crate::trace::{RunFailure, RunStatus, Window};

/// Worker pool size when the caller does not choose one.
pub const DEFAULT_WORKERS: usize = 4;

#[derive(Debug, Error)]
pub enum SuiteError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("scenario '{0}' is not part of the stress battery")]
    NotInBattery(String),

    #[error("worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// A drive level the sweep could not measure, and why.
#[derive(Debug, Clone)]
pub struct SkippedLevel {
    pub drive: f64,
    pub reason: String,
}

/// What a distortion sweep produced.
#[derive(Debug, Clone, Default)]
pub struct SweepOutcome {
    pub points: Vec<ThdPoint>,
    pub skipped: Vec<SkippedLevel>,
}

pub struct SuiteRunner<'a> {
    driver: &'a SimulationDriver<'a>,
    workers: usize,
}

impl<'a> SuiteRunner<'a> {
    pub fn new(driver: &'a SimulationDriver<'a>) -> Self {
        SuiteRunner {
            driver,
            workers: DEFAULT_WORKERS,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Run the stress battery, or the chosen subset of it.
    ///
    /// Every stress scenario gets a section: measured or failed when it
    /// was attempted, not-attempted when the filter left it out. A name
    /// in `only` that is not registered, or that names a sweep or
    /// safety scenario, is a hard error before anything is simulated.
    pub fn run_battery(&self, only: Option<&[String]>) -> Result<Vec<ScenarioSection>, SuiteError> {
        if let Some(names) = only {
            for name in names {
                let spec = self.driver.registry().get(name)?;
                if spec.kind != ScenarioKind::Stress {
                    return Err(SuiteError::NotInBattery(name.clone()));
                }
            }
        }
        let selected = |spec: &ScenarioSpec| match only {
            None => true,
            Some(names) => names.iter().any(|n| n == &spec.name),
        };

        let battery = self.driver.registry().of_kind(ScenarioKind::Stress);
        let attempts: Vec<&ScenarioSpec> =
            battery.iter().copied().filter(|s| selected(s)).collect();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()?;
        let ran: Vec<ScenarioSection> = pool.install(|| {
            attempts
                .par_iter()
                .map(|spec| self.run_one(spec))
                .collect::<Result<Vec<_>, RegistryError>>()
        })?;

        // Stitch skipped scenarios back in, keeping registration order.
        let mut ran = ran.into_iter();
        let sections = battery
            .iter()
            .map(|spec| {
                if selected(spec) {
                    ran.next()
                        .unwrap_or_else(|| ScenarioSection::not_attempted(&spec.name))
                } else {
                    ScenarioSection::not_attempted(&spec.name)
                }
            })
            .collect();
        Ok(sections)
    }

    fn run_one(&self, spec: &ScenarioSpec) -> Result<ScenarioSection, RegistryError> {
        let run = self.driver.run(spec, &ParamSet::new())?;
        let elapsed_ms = run.elapsed.as_millis() as u64;
        let section = match &run.status {
            RunStatus::Completed => {
                let metrics = extract(&spec.name, &spec.metrics, &run.traces);
                ScenarioSection::measured(&metrics, elapsed_ms)
            }
            status => ScenarioSection::from_failed_status(&spec.name, status, elapsed_ms)
                .unwrap_or_else(|| ScenarioSection::not_attempted(&spec.name)),
        };
        Ok(section)
    }

    /// Run the registered sweep scenario once per drive level.
    ///
    /// Points come back in the order the levels were given. A registry
    /// with no sweep scenario yields an empty outcome.
    pub fn run_thd_sweep(&self, levels: &[f64]) -> Result<SweepOutcome, SuiteError> {
        let Some(spec) = self
            .driver
            .registry()
            .of_kind(ScenarioKind::Sweep)
            .into_iter()
            .next()
        else {
            return Ok(SweepOutcome::default());
        };

        let window = Window::trailing(spec.template.tran.stop, THD_WINDOW_SPAN);
        let mut outcome = SweepOutcome::default();
        for &drive in levels {
            let overrides = ParamSet::new().with("DRIVE", drive);
            let run = self.driver.run(spec, &overrides)?;
            let reason = match &run.status {
                RunStatus::Completed => {
                    let metrics = extract(&spec.name, &spec.metrics, &run.traces);
                    let f0 = run.params.get("F_AUDIO").unwrap_or(1000.0);
                    match run.traces.get("vout").and_then(|trace| {
                        thd_percent(trace, Some(window), f0, THD_HARMONICS)
                    }) {
                        Some(thd) => {
                            outcome.points.push(ThdPoint {
                                vref_pk: drive,
                                vout_rms: metrics.get("vout_rms").unwrap_or(f64::NAN),
                                p_out_w: metrics.get("p_out").unwrap_or(f64::NAN),
                                thd_percent: thd,
                            });
                            continue;
                        }
                        None => "no fundamental in the output spectrum".to_string(),
                    }
                }
                RunStatus::TimedOut { limit } => format!("timed out after {limit:?}"),
                RunStatus::Failed(RunFailure::Simulator { diagnostic }) => diagnostic.clone(),
                RunStatus::Failed(RunFailure::MissingSignal { signal }) => {
                    format!("signal '{signal}' absent from simulator output")
                }
            };
            outcome.skipped.push(SkippedLevel { drive, reason });
        }
        Ok(outcome)
    }
}
