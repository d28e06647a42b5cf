//! # Ampcheck
//!
//! A simulation-driven validation harness for a 10 kW class-D subwoofer
//! amplifier design. The amplifier is a behavioral SPICE model (sagging
//! supply rail, PI voltage loop, current limiting, thermal foldback,
//! undervoltage lockout); this crate renders parameterized netlists,
//! drives batch-mode ngspice, extracts waveform metrics, sweeps THD
//! against output power, and searches switching-stage parameters under
//! hard safety constraints.
//!
//! ## Library Usage
//!
//! The crate can be used as a dependency for custom validation flows:
//!
//! ```toml
//! [dependencies]
//! ampcheck = { path = "../ampcheck" }
//! ```
//!
//! ### Scenario Catalogue
//!
//! Every stress, sweep and safety scenario is registered up front with
//! its parameter overrides, circuit template and metric program:
//!
//! ```rust
//! use ampcheck::netlist::render_deck;
//! use ampcheck::registry::ParamSet;
//! use ampcheck::scenarios::builtin_registry;
//!
//! let registry = builtin_registry().unwrap();
//! let spec = registry.get("rail_sag").unwrap();
//!
//! // Schema defaults, then scenario overrides, then caller overrides.
//! let mut overrides = ParamSet::new();
//! overrides.insert("ILIM", 90.0);
//! let params = registry.resolve(spec, &overrides).unwrap();
//!
//! let deck = render_deck(&spec.template, &params);
//! assert!(deck.contains(".param ILIM=90"));
//! assert!(deck.contains(".tran"));
//! ```
//!
//! ### Distortion Measurement
//!
//! THD is computed in-process from transient waveforms, no simulator
//! required:
//!
//! ```rust
//! use ampcheck::metrics::thd_percent;
//! use ampcheck::trace::Trace;
//!
//! let dt = 1.0 / 48_000.0;
//! let times: Vec<f64> = (0..4800).map(|n| n as f64 * dt).collect();
//! let values: Vec<f64> = times
//!     .iter()
//!     .map(|t| (2.0 * std::f64::consts::PI * 1_000.0 * t).sin())
//!     .collect();
//!
//! let trace = Trace::from_samples(times, values);
//! let thd = thd_percent(&trace, None, 1_000.0, 10).unwrap();
//! assert!(thd < 0.1); // a clean sine has essentially no harmonics
//! ```
//!
//! ### Driving ngspice
//!
//! ```rust,ignore
//! use ampcheck::driver::SimulationDriver;
//! use ampcheck::registry::ParamSet;
//! use ampcheck::scenarios::builtin_registry;
//! use ampcheck::spice::NgspiceSimulator;
//!
//! let registry = builtin_registry()?;
//! let simulator = NgspiceSimulator::new().keep_artifacts("results/decks");
//! let driver = SimulationDriver::new(&registry, &simulator);
//!
//! let run = driver.run_named("step_load_change", &ParamSet::new())?;
//! println!("{:?}", run.status);
//! ```
//!
//! ### Constraint Tuning
//!
//! ```rust,ignore
//! use ampcheck::scenarios::{builtin_registry, default_constraints, default_tuning_axes};
//! use ampcheck::tuner::{GridGenerator, Tuner};
//!
//! let registry = builtin_registry()?;
//! let simulator = NgspiceSimulator::new();
//! let driver = SimulationDriver::new(&registry, &simulator);
//!
//! let constraints = default_constraints();
//! let mut generator = GridGenerator::new(default_tuning_axes());
//! let result = Tuner::new(&driver, &constraints).run(&mut generator)?;
//! println!("selected candidate: {:?}", result.selected);
//! ```
//!
//! ## CLI Usage
//!
//! ```bash
//! # Run the full battery, THD sweep and artifact bundle
//! ampcheck run
//!
//! # Only named scenarios
//! ampcheck run --only rail_sag --only thermal_foldback
//!
//! # THD vs output power sweep alone
//! ampcheck thd
//!
//! # Search switching-stage parameters under the safety constraints
//! ampcheck tune --mode random --samples 64 --seed 7
//!
//! # List registered scenarios
//! ampcheck list
//!
//! # Write a default config file
//! ampcheck init
//!
//! # Probe the ngspice installation
//! ampcheck check-spice
//! ```
//!
//! ## Module Overview
//!
//! - [`registry`] - Parameter schema, parameter sets and the scenario registry
//! - [`netlist`] - Circuit templates and SPICE deck rendering
//! - [`spice`] - Batch-mode ngspice process control and wrdata parsing
//! - [`trace`] - Waveform containers, analysis windows, run status
//! - [`driver`] - One scenario in, one classified simulation run out
//! - [`metrics`] - Metric programs (peaks, averages, power, efficiency) and THD
//! - [`scenarios`] - The built-in amplifier battery, constraints and tuning axes
//! - [`runner`] - Parallel battery execution and the THD sweep
//! - [`tuner`] - Candidate generation and hard-constraint screening
//! - [`report`] - Suite aggregation, JSON/CSV/markdown artifacts, terminal output
//! - [`config`] - YAML harness configuration

// ============================================================================
// Public modules
// ============================================================================

pub mod config;
pub mod driver;
pub mod metrics;
pub mod netlist;
pub mod registry;
pub mod report;
pub mod runner;
pub mod scenarios;
pub mod spice;
pub mod trace;
pub mod tuner;

// ============================================================================
// Top-level re-exports for convenience
// ============================================================================

// Registry types
pub use registry::{
    ParamSchema,
    ParamSet,
    RegistryError,
    ScenarioKind,
    ScenarioRegistry,
    ScenarioSpec,
};

// Simulation types
pub use driver::SimulationDriver;
pub use spice::{NgspiceSimulator, SimFailure, SimJob, Simulator};
pub use trace::{RunFailure, RunStatus, SimulationRun, Trace, TraceSet, Window};

// Metric types
pub use metrics::{MetricOp, MetricSet, MetricSpec};

// Orchestration types
pub use runner::{SkippedLevel, SuiteError, SuiteRunner, SweepOutcome};
pub use tuner::{
    CandidateRecord,
    GridGenerator,
    HardConstraint,
    RandomGenerator,
    TuneAxis,
    TuneOutcome,
    Tuner,
    TuningResult,
};

// Report types
pub use report::{
    FailureMarker,
    ReportError,
    ScenarioOutcome,
    ScenarioSection,
    SuiteSummary,
    ThdPoint,
};

// Config types
pub use config::{ConfigError, HarnessConfig, SearchMode};

/// Prelude module - import everything commonly needed
///
/// ```rust
/// use ampcheck::prelude::*;
/// ```
pub mod prelude {
    // Scenario catalogue
    pub use crate::scenarios::{
        amp_schema, builtin_registry, default_constraints, default_tuning_axes,
        thd_drive_levels, THD_HARMONICS, THD_WINDOW_SPAN,
    };

    // Registry
    pub use crate::registry::{
        ParamSchema, ParamSet, ScenarioKind, ScenarioRegistry, ScenarioSpec,
    };

    // Netlists
    pub use crate::netlist::{render_deck, CircuitTemplate, RailModel, TranSpec};

    // Simulation
    pub use crate::driver::SimulationDriver;
    pub use crate::spice::{NgspiceSimulator, SimJob, Simulator};
    pub use crate::trace::{RunStatus, SimulationRun, Trace, TraceSet, Window};

    // Metrics
    pub use crate::metrics::{extract, thd_percent, MetricOp, MetricSet, MetricSpec};

    // Orchestration
    pub use crate::runner::{SuiteRunner, SweepOutcome};
    pub use crate::tuner::{
        GridGenerator, HardConstraint, RandomGenerator, TuneAxis, Tuner, TuningResult,
    };

    // Reporting
    pub use crate::report::{ScenarioSection, SuiteSummary, ThdPoint};

    // Config
    pub use crate::config::HarnessConfig;
}
