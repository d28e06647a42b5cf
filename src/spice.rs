//! ngspice integration: the one place the harness touches an external
//! process.
//!
//! Everything above this module talks to the [`Simulator`] trait: hand
//! over a rendered deck plus the vectors to record, get back a
//! [`TraceSet`] or a failure. The stock implementation shells out to
//! batch-mode ngspice; tests substitute closures that synthesize
//! traces analytically, so the whole pipeline runs without a SPICE
//! install.
//!
//! # Requirements
//!
//! For real runs ngspice must be on PATH:
//! - macOS: `brew install ngspice`
//! - Ubuntu/Debian: `apt install ngspice`

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tempfile::TempDir;
use thiserror::Error;

use crate::netlist::vector_expr;
use crate::registry::ParamSet;
use crate::trace::{Trace, TraceSet};

/// How often the runner polls a live ngspice process.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How many log lines are kept when a run fails.
const LOG_TAIL_LINES: usize = 20;

#[derive(Error, Debug)]
pub enum SimFailure {
    #[error(
        "ngspice not found in PATH. Install with: brew install ngspice (macOS) \
         or apt install ngspice (Linux)"
    )]
    NotFound,

    #[error("simulation exceeded the {0:?} timeout and was killed")]
    TimedOut(Duration),

    #[error("simulation did not converge: {0}")]
    Convergence(String),

    #[error("ngspice execution failed: {0}")]
    Failed(String),

    #[error("failed to parse simulator output: {0}")]
    Parse(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// One simulation request: the deck body (no control block), the
/// signals to record, the resolved parameters behind the deck, and the
/// wall-clock budget.
///
/// `params` duplicates information already rendered into `deck`; mock
/// simulators key their synthetic waveforms off it instead of parsing
/// netlist text.
#[derive(Debug)]
pub struct SimJob<'a> {
    pub name: &'a str,
    pub deck: &'a str,
    pub signals: &'a [String],
    pub params: &'a ParamSet,
    pub timeout: Duration,
}

/// The collaborator boundary: run one transient, return the recorded
/// vectors or say why not.
pub trait Simulator: Send + Sync {
    fn name(&self) -> &str {
        "simulator"
    }

    fn invoke(&self, job: &SimJob<'_>) -> Result<TraceSet, SimFailure>;
}

/// Any `Fn(&SimJob) -> Result<TraceSet, SimFailure>` is a simulator;
/// tests lean on this to model the amplifier analytically.
impl<F> Simulator for F
where
    F: Fn(&SimJob<'_>) -> Result<TraceSet, SimFailure> + Send + Sync,
{
    fn invoke(&self, job: &SimJob<'_>) -> Result<TraceSet, SimFailure> {
        self(job)
    }
}

/// Batch-mode ngspice runner.
pub struct NgspiceSimulator {
    binary: PathBuf,
    /// When set, decks and logs land here instead of a throwaway
    /// tempdir, so failed runs can be replayed by hand.
    artifact_dir: Option<PathBuf>,
}

impl Default for NgspiceSimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl NgspiceSimulator {
    pub fn new() -> Self {
        NgspiceSimulator {
            binary: PathBuf::from("ngspice"),
            artifact_dir: None,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn keep_artifacts(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = Some(dir.into());
        self
    }

    /// Probe the binary and return its version line.
    pub fn check(&self) -> Result<String, SimFailure> {
        let output = Command::new(&self.binary)
            .arg("--version")
            .output()
            .map_err(|_| SimFailure::NotFound)?;
        if !output.status.success() {
            return Err(SimFailure::NotFound);
        }
        let version = String::from_utf8_lossy(&output.stdout);
        Ok(version.lines().next().unwrap_or("unknown").to_string())
    }

    fn run_one(&self, job: &SimJob<'_>, dir: &Path) -> Result<TraceSet, SimFailure> {
        let cir_path = dir.join(format!("{}.cir", job.name));
        let log_path = dir.join(format!("{}.log", job.name));
        let data_path = dir.join(format!("{}.data", job.name));

        let mut file = fs::File::create(&cir_path)?;
        file.write_all(job.deck.as_bytes())?;
        file.write_all(build_control_block(&data_path, job.signals).as_bytes())?;
        drop(file);

        let child = Command::new(&self.binary)
            .arg("-b")
            .arg("-o")
            .arg(&log_path)
            .arg(&cir_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    SimFailure::NotFound
                } else {
                    SimFailure::Io(e)
                }
            })?;

        let status = wait_with_deadline(child, job.timeout)?;
        let log_tail = read_log_tail(&log_path);

        if !status.success() {
            if is_convergence_failure(&log_tail) {
                return Err(SimFailure::Convergence(log_tail));
            }
            return Err(SimFailure::Failed(format!(
                "exit status {status}: {log_tail}"
            )));
        }
        if is_convergence_failure(&log_tail) {
            // ngspice can report success after a doomed transient.
            return Err(SimFailure::Convergence(log_tail));
        }
        if !data_path.exists() {
            return Err(SimFailure::Failed(format!(
                "no output data produced: {log_tail}"
            )));
        }

        let text = fs::read_to_string(&data_path)?;
        parse_wrdata(&text, job.signals)
    }
}

impl Simulator for NgspiceSimulator {
    fn name(&self) -> &str {
        "ngspice"
    }

    fn invoke(&self, job: &SimJob<'_>) -> Result<TraceSet, SimFailure> {
        match &self.artifact_dir {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                self.run_one(job, dir)
            }
            None => {
                let scratch = TempDir::new()?;
                self.run_one(job, scratch.path())
            }
        }
    }
}

/// Control block appended to every deck: run, switch to ASCII output,
/// dump the requested vectors, leave.
fn build_control_block(data_path: &Path, signals: &[String]) -> String {
    let exprs: Vec<String> = signals.iter().map(|s| vector_expr(s)).collect();
    format!(
        ".control\nrun\nset filetype=ascii\nwrdata {} {}\nquit\n.endc\n.end\n",
        data_path.display(),
        exprs.join(" ")
    )
}

/// Poll the child until it exits or the deadline passes; on timeout
/// the process is killed and reaped before the error goes back up.
fn wait_with_deadline(mut child: Child, timeout: Duration) -> Result<ExitStatus, SimFailure> {
    let started = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if started.elapsed() >= timeout {
            let _ = child.kill();
            let _ = child.wait();
            return Err(SimFailure::TimedOut(timeout));
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

fn read_log_tail(log_path: &Path) -> String {
    let Ok(text) = fs::read_to_string(log_path) else {
        return String::new();
    };
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(LOG_TAIL_LINES);
    lines[start..].join("\n")
}

fn is_convergence_failure(log: &str) -> bool {
    let lower = log.to_lowercase();
    lower.contains("no convergence") || lower.contains("timestep too small")
}

/// Parse ngspice `wrdata` ASCII output.
///
/// `wrdata` writes one row per timepoint with an `(x, y)` column pair
/// per requested vector; the x columns all carry the shared time axis.
/// Column `0` is therefore time and column `2*i + 1` the i-th signal.
pub fn parse_wrdata(text: &str, signals: &[String]) -> Result<TraceSet, SimFailure> {
    let needed = 2 * signals.len();
    let mut columns: Vec<Trace> = signals.iter().map(|_| Trace::new()).collect();
    let mut rows = 0usize;

    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('*') || line.starts_with('#') {
            continue;
        }
        let fields: Vec<f64> = line
            .split_whitespace()
            .map(|f| {
                f.parse::<f64>().map_err(|e| {
                    SimFailure::Parse(format!("line {}: bad number '{f}': {e}", lineno + 1))
                })
            })
            .collect::<Result<_, _>>()?;
        if fields.len() < needed {
            return Err(SimFailure::Parse(format!(
                "line {}: expected {} columns for {} vectors, found {}",
                lineno + 1,
                needed,
                signals.len(),
                fields.len()
            )));
        }
        let t = fields[0];
        for (i, trace) in columns.iter_mut().enumerate() {
            trace.push(t, fields[2 * i + 1]);
        }
        rows += 1;
    }

    if rows == 0 {
        return Err(SimFailure::Parse("no data points found".to_string()));
    }

    let mut traces = TraceSet::new();
    for (signal, trace) in signals.iter().zip(columns) {
        traces.insert(signal.clone(), trace);
    }
    Ok(traces)
}
