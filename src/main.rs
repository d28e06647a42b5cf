//! Ampcheck CLI
//!
//! Run the amplifier SPICE validation suite from the command line.
//!
//! # Usage
//!
//! ```bash
//! # Full suite: stress battery, THD sweep, constraint search, artifacts
//! ampcheck run
//!
//! # Only named battery scenarios
//! ampcheck run --only rail_sag --only thermal_foldback
//!
//! # THD vs output power sweep alone
//! ampcheck thd
//!
//! # Switching-parameter search (grid or seeded random)
//! ampcheck tune --mode random --samples 64 --seed 7
//!
//! # List registered scenarios
//! ampcheck list
//!
//! # Write a default config, probe the simulator
//! ampcheck init
//! ampcheck check-spice
//! ```

use ampcheck::{
    config::{HarnessConfig, SearchMode},
    driver::SimulationDriver,
    registry::ScenarioKind,
    report::{write_thd_curve, ScenarioOutcome, SuiteSummary},
    runner::{SuiteRunner, SweepOutcome},
    scenarios::{builtin_registry, default_constraints, default_tuning_axes},
    spice::NgspiceSimulator,
    tuner::{GridGenerator, RandomGenerator, TuneOutcome, Tuner, TuningResult},
};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ampcheck")]
#[command(about = "SPICE validation suite for a 10 kW class-D amplifier model")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to harness config YAML
    #[arg(short, long, default_value = "ampcheck.yaml")]
    config: PathBuf,

    /// Artifact output directory (overrides config)
    #[arg(long)]
    output: Option<PathBuf>,

    /// ngspice binary (overrides config)
    #[arg(long)]
    ngspice: Option<String>,

    /// Battery worker pool size (overrides config)
    #[arg(long)]
    workers: Option<usize>,

    /// Per-scenario timeout in seconds (overrides config)
    #[arg(long)]
    timeout: Option<u64>,

    /// Keep decks, logs and raw waveforms for post-mortems
    #[arg(long)]
    keep_artifacts: bool,

    /// Show the detailed metric table
    #[arg(long, short = 'd')]
    detailed: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the stress battery, the THD sweep and the constraint search
    Run {
        /// Restrict the battery to the named stress scenarios (repeatable)
        #[arg(long = "only")]
        only: Vec<String>,

        /// Skip the THD-vs-power sweep
        #[arg(long)]
        skip_thd: bool,

        /// Skip the switching-parameter search
        #[arg(long)]
        skip_tune: bool,
    },

    /// Run only the THD-vs-power sweep
    Thd,

    /// Search switching-stage parameters under the safety constraints
    Tune {
        /// Search mode: grid or random (overrides config)
        #[arg(long)]
        mode: Option<String>,

        /// Random-mode draw count (overrides config)
        #[arg(long)]
        samples: Option<usize>,

        /// Random-mode seed (overrides config)
        #[arg(long)]
        seed: Option<u64>,
    },

    /// List registered scenarios
    List,

    /// Write a default config file at the --config path
    Init,

    /// Check if ngspice is available
    CheckSpice,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::List) => {
            list_scenarios()?;
        }
        Some(Commands::Init) => {
            init_config(&cli)?;
        }
        Some(Commands::CheckSpice) => {
            check_spice(&cli)?;
        }
        Some(Commands::Thd) => {
            run_thd(&cli)?;
        }
        Some(Commands::Tune {
            mode,
            samples,
            seed,
        }) => {
            run_tune(&cli, mode.as_deref(), *samples, *seed)?;
        }
        Some(Commands::Run {
            only,
            skip_thd,
            skip_tune,
        }) => {
            run_suite(&cli, only, *skip_thd, *skip_tune)?;
        }
        None => {
            run_suite(&cli, &[], false, false)?;
        }
    }

    Ok(())
}

/// Config file if present, defaults otherwise, CLI overrides on top.
fn load_config(cli: &Cli) -> anyhow::Result<HarnessConfig> {
    let mut config = if cli.config.exists() {
        HarnessConfig::load(&cli.config)?
    } else {
        HarnessConfig::default()
    };

    if let Some(ref output) = cli.output {
        config.suite.output_dir = output.clone();
    }
    if let Some(ref binary) = cli.ngspice {
        config.simulator.binary = binary.clone();
    }
    if let Some(workers) = cli.workers {
        config.suite.workers = workers;
    }
    if let Some(secs) = cli.timeout {
        config.simulator.timeout_secs = secs;
    }
    if cli.keep_artifacts {
        config.simulator.keep_artifacts = true;
    }

    Ok(config)
}

fn build_simulator(config: &HarnessConfig) -> NgspiceSimulator {
    let mut simulator = NgspiceSimulator::new().with_binary(config.simulator.binary.clone());
    if config.simulator.keep_artifacts {
        simulator = simulator.keep_artifacts(config.suite.output_dir.join("decks"));
    }
    simulator
}

fn run_suite(cli: &Cli, only: &[String], skip_thd: bool, skip_tune: bool) -> anyhow::Result<()> {
    println!("{} Loading configuration...", "▶".blue());
    let config = load_config(cli)?;

    let registry = builtin_registry()?;
    let simulator = build_simulator(&config);

    let simulator_label = match simulator.check() {
        Ok(version) => {
            println!("  Using: {}", version.dimmed());
            version
        }
        Err(_) => {
            println!(
                "  {} could not probe '{}', runs may not start",
                "⚠".yellow(),
                config.simulator.binary
            );
            config.simulator.binary.clone()
        }
    };

    let driver = SimulationDriver::new(&registry, &simulator).with_timeout(config.timeout());
    let runner = SuiteRunner::new(&driver).with_workers(config.suite.workers);

    let battery_size = registry.of_kind(ScenarioKind::Stress).len();
    println!(
        "{} Running {} stress scenarios on {} workers...",
        "▶".blue(),
        battery_size,
        config.suite.workers
    );

    let filter = if only.is_empty() { None } else { Some(only) };
    let sections = runner.run_battery(filter)?;

    for section in &sections {
        match &section.outcome {
            ScenarioOutcome::Measured { .. } => {
                println!(
                    "  {} {} ({} ms)",
                    "✓".green(),
                    section.scenario,
                    section.elapsed_ms
                );
            }
            ScenarioOutcome::Failed { diagnostic, .. } => {
                println!("  {} {}: {}", "✗".red(), section.scenario, diagnostic);
            }
            ScenarioOutcome::NotAttempted => {
                println!("  {} {} (skipped)", "−".dimmed(), section.scenario);
            }
        }
    }

    let sweep = if skip_thd {
        SweepOutcome::default()
    } else {
        println!(
            "\n{} THD sweep over {} drive levels...",
            "▶".blue(),
            config.suite.drive_levels.len()
        );
        let sweep = runner.run_thd_sweep(&config.suite.drive_levels)?;
        for point in &sweep.points {
            println!(
                "  {} drive {:.2}: {:.3} % THD at {:.1} W",
                "✓".green(),
                point.vref_pk,
                point.thd_percent,
                point.p_out_w
            );
        }
        for skip in &sweep.skipped {
            println!("  {} drive {:.2}: {}", "⚠".yellow(), skip.drive, skip.reason);
        }
        sweep
    };

    let tuning = if skip_tune {
        None
    } else {
        println!("\n{} Constraint search over switching parameters...", "▶".blue());
        let result = run_search(&driver, &config, None, None, None)?;
        print_tune_outcome(&result);
        Some(result)
    };

    let summary = SuiteSummary::new(&simulator_label, sections, sweep.points, tuning)?;
    let written = summary.write_all(&config.suite.output_dir)?;

    summary.print_summary();
    if cli.detailed {
        summary.print_detailed();
    }

    println!("\nArtifacts:");
    for path in &written {
        println!("  • {}", path.display());
    }

    // A filtered run leaves scenarios unattempted on purpose; only what
    // actually ran decides the exit code then.
    let clean = if only.is_empty() {
        summary.all_clean()
    } else {
        summary.failed_count() == 0 && tuning_selected(&summary)
    };
    if !clean {
        std::process::exit(1);
    }

    Ok(())
}

fn tuning_selected(summary: &SuiteSummary) -> bool {
    match &summary.tuning {
        None => true,
        Some(t) => matches!(t.outcome, TuneOutcome::Selected { .. }),
    }
}

fn run_thd(cli: &Cli) -> anyhow::Result<()> {
    let config = load_config(cli)?;
    let registry = builtin_registry()?;
    let simulator = build_simulator(&config);
    let driver = SimulationDriver::new(&registry, &simulator).with_timeout(config.timeout());
    let runner = SuiteRunner::new(&driver);

    println!(
        "{} THD sweep over {} drive levels...",
        "▶".blue(),
        config.suite.drive_levels.len()
    );
    let sweep = runner.run_thd_sweep(&config.suite.drive_levels)?;

    println!("\n{}", "THD vs Output Power".bold());
    println!("{}", "─".repeat(48));
    for point in &sweep.points {
        println!(
            "  {:>5.2}  {:>9.2} Vrms  {:>9.1} W  {:>8.3} %",
            point.vref_pk, point.vout_rms, point.p_out_w, point.thd_percent
        );
    }
    for skip in &sweep.skipped {
        println!("  {} drive {:.2}: {}", "⚠".yellow(), skip.drive, skip.reason);
    }

    std::fs::create_dir_all(&config.suite.output_dir)?;
    let csv_path = config.suite.output_dir.join("thd_vs_power.csv");
    write_thd_curve(&sweep.points, &csv_path)?;
    println!("\nCurve saved to: {}", csv_path.display());

    if !sweep.skipped.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}

fn run_tune(
    cli: &Cli,
    mode: Option<&str>,
    samples: Option<usize>,
    seed: Option<u64>,
) -> anyhow::Result<()> {
    let config = load_config(cli)?;
    let registry = builtin_registry()?;
    let simulator = build_simulator(&config);
    let driver = SimulationDriver::new(&registry, &simulator).with_timeout(config.timeout());

    println!("{} Searching switching-stage parameters...", "▶".blue());
    let result = run_search(&driver, &config, mode, samples, seed)?;

    for record in &result.candidates {
        let params: Vec<String> = record
            .params
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        if record.accepted {
            println!("  {} #{} {}", "✓".green(), record.index, params.join(" "));
        } else {
            let cause = record
                .rejected_by()
                .map(|c| format!(" ({c})"))
                .unwrap_or_default();
            println!(
                "  {} #{} {}{}",
                "✗".red(),
                record.index,
                params.join(" "),
                cause
            );
        }
    }

    print_tune_outcome(&result);

    if let Some(params) = &result.selected {
        println!("\n{}", "Selected parameters".bold());
        for (name, value) in params.iter() {
            println!("  {name} = {value}");
        }
    }

    std::fs::create_dir_all(&config.suite.output_dir)?;
    let json_path = config.suite.output_dir.join("tuning_result.json");
    std::fs::write(&json_path, serde_json::to_string_pretty(&result)?)?;
    println!("\nAudit trail saved to: {}", json_path.display());

    if !matches!(result.outcome, TuneOutcome::Selected { .. }) {
        std::process::exit(1);
    }
    Ok(())
}

/// Build the generator the config (or the CLI override) asks for and
/// run the tuner with it.
fn run_search(
    driver: &SimulationDriver<'_>,
    config: &HarnessConfig,
    mode: Option<&str>,
    samples: Option<usize>,
    seed: Option<u64>,
) -> anyhow::Result<TuningResult> {
    let mode = match mode {
        None => config.tuning.mode,
        Some("grid") => SearchMode::Grid,
        Some("random") => SearchMode::Random,
        Some(other) => anyhow::bail!("unknown search mode '{other}', expected grid or random"),
    };

    let constraints = default_constraints();
    let axes = default_tuning_axes();
    let tuner = Tuner::new(driver, &constraints);

    let result = match mode {
        SearchMode::Grid => {
            let mut generator = GridGenerator::new(axes);
            println!("  grid of {} candidates", generator.total());
            tuner.run(&mut generator)?
        }
        SearchMode::Random => {
            let samples = samples.unwrap_or(config.tuning.samples);
            let seed = seed.unwrap_or(config.tuning.seed);
            let bounds: Vec<(String, f64, f64)> = axes
                .iter()
                .map(|axis| {
                    let lo = axis.values.iter().copied().fold(f64::INFINITY, f64::min);
                    let hi = axis
                        .values
                        .iter()
                        .copied()
                        .fold(f64::NEG_INFINITY, f64::max);
                    (axis.name.clone(), lo, hi)
                })
                .collect();
            println!("  {samples} random draws (seed {seed})");
            let mut generator = RandomGenerator::new(bounds, samples, seed);
            tuner.run(&mut generator)?
        }
    };

    Ok(result)
}

fn print_tune_outcome(result: &TuningResult) {
    match &result.outcome {
        TuneOutcome::Selected { index } => {
            println!(
                "  {} candidate #{} satisfies every constraint",
                "✓".green(),
                index
            );
        }
        TuneOutcome::Exhausted { evaluated } => {
            println!(
                "  {} search exhausted after {} candidates",
                "✗".red(),
                evaluated
            );
            if let Some(name) = result.most_violated_constraint() {
                println!("    most violated constraint: {name}");
            }
        }
        TuneOutcome::Cancelled { evaluated } => {
            println!(
                "  {} search cancelled after {} candidates",
                "⚠".yellow(),
                evaluated
            );
        }
    }
}

fn list_scenarios() -> anyhow::Result<()> {
    let registry = builtin_registry()?;

    println!("{}", "Registered Scenarios".bold());
    println!("{}", "─".repeat(50));

    for spec in registry.iter() {
        let kind = match spec.kind {
            ScenarioKind::Stress => "stress".blue(),
            ScenarioKind::Sweep => "sweep".cyan(),
            ScenarioKind::Safety => "safety".magenta(),
        };
        println!(
            "\n{} [{}] - {}",
            spec.name.bold(),
            kind,
            spec.description.dimmed()
        );

        let metric_names: Vec<&str> = spec.metrics.iter().map(|m| m.name.as_str()).collect();
        println!("  Metrics: {}", metric_names.join(", "));

        if !spec.params.is_empty() {
            let overrides: Vec<String> = spec
                .params
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect();
            println!("  Overrides: {}", overrides.join(", "));
        }
    }

    Ok(())
}

fn init_config(cli: &Cli) -> anyhow::Result<()> {
    let config = HarnessConfig::default();
    config.save(&cli.config)?;

    println!(
        "{} Created default config at: {}",
        "✓".green(),
        cli.config.display()
    );

    std::fs::create_dir_all(&config.suite.output_dir)?;
    println!(
        "{} Created output directory: {}",
        "✓".green(),
        config.suite.output_dir.display()
    );

    println!("\nEdit this file to change the simulator, pool size or search settings.");
    Ok(())
}

fn check_spice(cli: &Cli) -> anyhow::Result<()> {
    let config = load_config(cli)?;

    println!("{} Checking ngspice installation...", "▶".blue());

    match NgspiceSimulator::new()
        .with_binary(config.simulator.binary.clone())
        .check()
    {
        Ok(version) => {
            println!("{} ngspice found: {}", "✓".green(), version);
            Ok(())
        }
        Err(e) => {
            println!("{} {}", "✗".red(), e);
            println!("\nInstall ngspice:");
            println!("  macOS:  brew install ngspice");
            println!("  Ubuntu: apt install ngspice");
            println!("  Arch:   pacman -S ngspice");
            std::process::exit(1);
        }
    }
}
