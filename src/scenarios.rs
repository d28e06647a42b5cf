//! The built-in validation battery for the 10 kW bridged class-D
//! amplifier model.
//!
//! Stress scenarios, one row each in the metrics table:
//!
//! - `step_load_change` - 1.6 ohm load halved to 0.8 ohm mid-burst
//! - `rail_sag` - supply droops 100 V -> 75 V -> 100 V on PWL rails
//! - `load_0p25_stability` - sustained drive into 0.25 ohm
//! - `hard_clipping_recovery` - reference steps 0.6 -> 1.4 -> 0.6
//! - `thermal_foldback` - 60 ms sustained drive, thermal limiter watch
//!
//! `thd_sweep` is the distortion scenario, run once per drive level.
//! The five safety scenarios back the tuner's hard constraints; they
//! check device realism (dead time, gate drive, current limiting,
//! undervoltage lockout, dissipation) rather than audio behavior.
//!
//! All scenarios share one parameter schema ([`amp_schema`]), so a
//! tuned override such as `ILIM` lands in every deck the same way.

use std::time::Duration;

use crate::metrics::{MetricOp, MetricSpec};
use crate::netlist::{CircuitTemplate, RailModel, TranSpec};
use crate::registry::{
    ParamSchema, ParamSet, RegistryError, ScenarioKind, ScenarioRegistry, ScenarioSpec,
};
use crate::trace::Window;
use crate::tuner::{HardConstraint, TuneAxis};

/// Harmonic orders included in the THD figure (2..=10 on top of the
/// fundamental).
pub const THD_HARMONICS: usize = 10;

/// Span of the steady-state window THD is measured over, counted back
/// from the end of the sweep transient.
pub const THD_WINDOW_SPAN: f64 = 10e-3;

/// Shared amplifier parameters.
///
/// Electrical: nominal rail and its sag model, wiring, module count.
/// Control loop: feedback divider, PI gains, modulator gain, drive
/// ceiling. Protection: soft current limit, thermal network and
/// foldback, undervoltage lockout. Device realism: switching
/// frequency, gate charge, gate-drive currents, dead time.
pub fn amp_schema() -> ParamSchema {
    ParamSchema::new(
        ParamSet::new()
            .with("VRAIL_NOM", 100.0)
            .with("VBATT_NOM", 14.4)
            .with("ETA_DC", 0.92)
            .with("R_SAG", 0.03)
            .with("R_WIRE", 0.01)
            .with("NPAR", 6.0)
            .with("KFB", 0.0028)
            .with("KP", 2.8)
            .with("KI", 450.0)
            .with("MOD_GAIN", 1.0)
            .with("UMAX", 0.98)
            .with("ILIM", 110.0)
            .with("ISOFT", 5.0)
            .with("T_AMB", 25.0)
            .with("T_FOLD", 85.0)
            .with("T_SOFT", 6.0)
            .with("RTH", 0.02)
            .with("CTH", 1.0)
            .with("PTH_SCALE", 2500.0)
            .with("F_AUDIO", 1000.0)
            .with("DRIVE", 0.95)
            .with("UVLO_TH", 65.0)
            .with("UVLO_SOFT", 2.0)
            .with("FSW", 350e3)
            .with("QG", 270e-9)
            .with("IGSRC", 4.0)
            .with("IGSNK", 8.0)
            .with("DT_MARGIN", 60e-9),
    )
}

/// Drive levels of the distortion sweep: 0.2 to 1.0 in steps of 0.1.
pub fn thd_drive_levels() -> Vec<f64> {
    (2..=10).map(|k| k as f64 / 10.0).collect()
}

fn win(from: f64, to: f64) -> Option<Window> {
    Some(Window::new(from, to))
}

fn sine_reference() -> &'static str {
    "Vref ref 0 SIN(0 {DRIVE} {F_AUDIO})"
}

fn step_load_change() -> ScenarioSpec {
    ScenarioSpec {
        name: "step_load_change".to_string(),
        kind: ScenarioKind::Stress,
        description: "1.6 ohm load switched to 0.8 ohm at 15 ms under full drive".to_string(),
        template: CircuitTemplate::new(
            "step load change",
            RailModel::Regulated,
            sine_reference(),
            "Rbase loadp loadn2 1.6\n\
             Vctrl nctrl 0 PULSE(0 5 15m 1u 1u 100m 200m)\n\
             Spar loadp npar nctrl 0 SWLOAD\n\
             Rpar npar loadn2 1.6\n\
             .model SWLOAD SW(Ron=1m Roff=1e9 Vt=2.5 Vh=0.2)",
            TranSpec::new(10e-6, 30e-3),
        ),
        params: ParamSet::new(),
        required_signals: signals(&["ref", "vout", "ueff", "isense"]),
        metrics: vec![
            MetricSpec::new(
                "p_out_pre",
                MetricOp::avg_power("vout", "isense", win(10e-3, 14e-3)),
            ),
            MetricSpec::new(
                "p_out_post",
                MetricOp::avg_power("vout", "isense", win(20e-3, 29e-3)),
            ),
            MetricSpec::new("i_max", MetricOp::peak("isense", win(0.0, 30e-3))),
        ],
        timeout: None,
    }
}

fn rail_sag() -> ScenarioSpec {
    ScenarioSpec {
        name: "rail_sag".to_string(),
        kind: ScenarioKind::Stress,
        description: "single module rides a 100 V -> 75 V -> 100 V supply droop".to_string(),
        template: CircuitTemplate::new(
            "rail sag",
            RailModel::Pwl {
                vcc: "0 100 12m 100 14m 75 20m 75 22m 100 35m 100".to_string(),
                vee: "0 -100 12m -100 14m -75 20m -75 22m -100 35m -100".to_string(),
            },
            sine_reference(),
            "Rload loadp loadn2 1.6",
            TranSpec::new(10e-6, 35e-3),
        ),
        // One module: wiring and limiter thresholds collapse to their
        // per-module values.
        params: ParamSet::new().with("NPAR", 1.0),
        required_signals: signals(&["vcc", "vout", "ueff", "isense"]),
        metrics: vec![
            MetricSpec::new(
                "p_out_pre",
                MetricOp::avg_power("vout", "isense", win(8e-3, 12e-3)),
            ),
            MetricSpec::new(
                "p_out_post",
                MetricOp::avg_power("vout", "isense", win(16e-3, 20e-3)),
            ),
            MetricSpec::new("u_max", MetricOp::peak("ueff", win(0.0, 35e-3))),
        ],
        timeout: None,
    }
}

fn load_0p25_stability() -> ScenarioSpec {
    ScenarioSpec {
        name: "load_0p25_stability".to_string(),
        kind: ScenarioKind::Stress,
        description: "sustained full drive into 0.25 ohm, limiter fully engaged".to_string(),
        template: CircuitTemplate::new(
            "0.25 ohm stability",
            RailModel::Regulated,
            sine_reference(),
            "Rload loadp loadn2 0.25",
            TranSpec::new(10e-6, 25e-3),
        ),
        params: ParamSet::new(),
        required_signals: signals(&["vout", "ueff", "isense"]),
        metrics: vec![
            MetricSpec::new("u_min", MetricOp::trough("ueff", win(10e-3, 25e-3))),
            MetricSpec::new("u_max", MetricOp::peak("ueff", win(10e-3, 25e-3))),
            MetricSpec::new("i_pos", MetricOp::peak("isense", win(10e-3, 25e-3))),
            MetricSpec::new("i_neg", MetricOp::trough("isense", win(10e-3, 25e-3))),
            MetricSpec::new("i_max", MetricOp::peak_abs("isense", win(10e-3, 25e-3))),
            MetricSpec::new(
                "p_out",
                MetricOp::avg_power("vout", "isense", win(10e-3, 25e-3)),
            ),
        ],
        timeout: None,
    }
}

fn hard_clipping_recovery() -> ScenarioSpec {
    ScenarioSpec {
        name: "hard_clipping_recovery".to_string(),
        kind: ScenarioKind::Stress,
        description: "reference steps 0.6 -> 1.4 -> 0.6, recovery after deep clip".to_string(),
        template: CircuitTemplate::new(
            "hard clipping recovery",
            RailModel::Regulated,
            "Bref ref 0 V = sin(2*3.14159265359*{F_AUDIO}*time) \
             * (time<10m ? 0.6 : (time<20m ? 1.4 : 0.6))",
            "Rload loadp loadn2 1.6",
            TranSpec::new(10e-6, 35e-3),
        ),
        params: ParamSet::new(),
        required_signals: signals(&["ref", "vout", "ueff", "isense"]),
        metrics: vec![
            MetricSpec::new(
                "p_out_clip",
                MetricOp::avg_power("vout", "isense", win(12e-3, 19e-3)),
            ),
            MetricSpec::new(
                "p_out_recover",
                MetricOp::avg_power("vout", "isense", win(24e-3, 33e-3)),
            ),
            MetricSpec::new("u_max", MetricOp::peak("ueff", win(0.0, 35e-3))),
        ],
        timeout: None,
    }
}

fn thermal_foldback() -> ScenarioSpec {
    ScenarioSpec {
        name: "thermal_foldback".to_string(),
        kind: ScenarioKind::Stress,
        description: "60 ms sustained drive; the thermal limiter must act, not oscillate"
            .to_string(),
        template: CircuitTemplate::new(
            "thermal foldback",
            RailModel::Regulated,
            sine_reference(),
            "Rload loadp loadn2 1.6",
            TranSpec::new(10e-6, 60e-3),
        ),
        params: ParamSet::new(),
        required_signals: signals(&["temp", "vout", "ueff", "ftemp", "isense"]),
        metrics: vec![
            MetricSpec::new("temp_max", MetricOp::peak("temp", win(0.0, 60e-3))),
            MetricSpec::new("temp_end", MetricOp::last("temp")),
            MetricSpec::new(
                "p_out_pre",
                MetricOp::avg_power("vout", "isense", win(10e-3, 20e-3)),
            ),
            MetricSpec::new(
                "p_out_post",
                MetricOp::avg_power("vout", "isense", win(45e-3, 58e-3)),
            ),
        ],
        // Longest transient in the battery.
        timeout: Some(Duration::from_secs(120)),
    }
}

fn thd_sweep() -> ScenarioSpec {
    ScenarioSpec {
        name: "thd_sweep".to_string(),
        kind: ScenarioKind::Sweep,
        description: "distortion vs drive level; run once per level with DRIVE overridden"
            .to_string(),
        template: CircuitTemplate::new(
            "thd sweep point",
            RailModel::Regulated,
            sine_reference(),
            "Rload loadp loadn2 1.6",
            TranSpec::new(5e-6, 30e-3),
        ),
        params: ParamSet::new(),
        required_signals: signals(&["vout", "isense"]),
        metrics: vec![
            MetricSpec::new(
                "p_out",
                MetricOp::avg_power("vout", "isense", win(10e-3, 30e-3)),
            ),
            MetricSpec::new("vout_rms", MetricOp::rms("vout", win(20e-3, 30e-3))),
        ],
        timeout: None,
    }
}

fn dead_time_margin() -> ScenarioSpec {
    ScenarioSpec {
        name: "dead_time_margin".to_string(),
        kind: ScenarioKind::Safety,
        description: "stray-loop shoot-through current when dead time fails to cover \
                      the gate turn-off"
            .to_string(),
        template: CircuitTemplate::new(
            "dead time margin",
            RailModel::Regulated,
            "Vref ref 0 DC 0",
            "Rload loadp loadn2 1.6",
            TranSpec::new(1e-6, 2e-4),
        )
        // Turn-off takes QG/IGSNK; overlap beyond the programmed dead
        // time drives the 50 mohm stray loop.
        .with_extra(
            "Bshoot ishoot 0 V = ((({QG}/{IGSNK}) > {DT_MARGIN}) ? \
             (({VRAIL_NOM}/0.05)*((({QG}/{IGSNK})-{DT_MARGIN})/({QG}/{IGSNK}))) : 0)",
        ),
        params: ParamSet::new(),
        required_signals: signals(&["ishoot"]),
        metrics: vec![MetricSpec::new("i_shoot", MetricOp::last("ishoot"))],
        timeout: None,
    }
}

fn gate_drive_check() -> ScenarioSpec {
    ScenarioSpec {
        name: "gate_drive_check".to_string(),
        kind: ScenarioKind::Safety,
        description: "fraction of the switching period spent slewing the gates".to_string(),
        template: CircuitTemplate::new(
            "gate drive check",
            RailModel::Regulated,
            "Vref ref 0 DC 0",
            "Rload loadp loadn2 1.6",
            TranSpec::new(1e-6, 2e-4),
        )
        .with_extra("Bslew slewfrac 0 V = {(QG/IGSRC + QG/IGSNK)*FSW}"),
        params: ParamSet::new(),
        required_signals: signals(&["slewfrac"]),
        metrics: vec![MetricSpec::new("slew_fraction", MetricOp::last("slewfrac"))],
        timeout: None,
    }
}

fn overcurrent_inhibit() -> ScenarioSpec {
    ScenarioSpec {
        name: "overcurrent_inhibit".to_string(),
        kind: ScenarioKind::Safety,
        description: "one module into 0.25 ohm; the limiter must hold the peak near ILIM"
            .to_string(),
        template: CircuitTemplate::new(
            "overcurrent inhibit",
            RailModel::Regulated,
            sine_reference(),
            "Rload loadp loadn2 0.25",
            TranSpec::new(10e-6, 20e-3),
        ),
        params: ParamSet::new().with("NPAR", 1.0),
        required_signals: signals(&["vout", "isense"]),
        metrics: vec![MetricSpec::new(
            "i_max",
            MetricOp::peak_abs("isense", win(5e-3, 20e-3)),
        )],
        timeout: None,
    }
}

fn brownout_inhibit() -> ScenarioSpec {
    ScenarioSpec {
        name: "brownout_inhibit".to_string(),
        kind: ScenarioKind::Safety,
        description: "supply collapses to 55 V mid-burst; lockout must kill the \
                      modulation and release it on recovery"
            .to_string(),
        template: CircuitTemplate::new(
            "brownout inhibit",
            // Hold well below UVLO_TH (65 V) so the lockout saturates
            // instead of riding its soft edge.
            RailModel::Pwl {
                vcc: "0 100 10m 100 12m 55 18m 55 20m 100 30m 100".to_string(),
                vee: "0 -100 10m -100 12m -55 18m -55 20m -100 30m -100".to_string(),
            },
            sine_reference(),
            "Rload loadp loadn2 1.6",
            TranSpec::new(10e-6, 30e-3),
        ),
        params: ParamSet::new(),
        required_signals: signals(&["vcc", "fuvlo", "ueff", "vout"]),
        metrics: vec![
            MetricSpec::new("u_dip", MetricOp::peak_abs("ueff", win(13e-3, 17e-3))),
            MetricSpec::new("u_recover", MetricOp::peak_abs("ueff", win(24e-3, 29e-3))),
            MetricSpec::new("vcc_min", MetricOp::trough("vcc", win(0.0, 30e-3))),
        ],
        timeout: None,
    }
}

fn thermal_surrogate() -> ScenarioSpec {
    ScenarioSpec {
        name: "thermal_surrogate".to_string(),
        kind: ScenarioKind::Safety,
        description: "sustained dissipation into 1 ohm; bridge efficiency and peak \
                      temperature"
            .to_string(),
        template: CircuitTemplate::new(
            "thermal surrogate",
            RailModel::Regulated,
            sine_reference(),
            "Rload loadp loadn2 1.0",
            TranSpec::new(10e-6, 40e-3),
        ),
        params: ParamSet::new(),
        required_signals: signals(&["vout", "isense", "vdrv", "temp"]),
        metrics: vec![
            MetricSpec::new("temp_max", MetricOp::peak("temp", win(0.0, 40e-3))),
            MetricSpec::new(
                "eff",
                MetricOp::efficiency("vout", "isense", "vdrv", "isense", win(10e-3, 40e-3)),
            ),
        ],
        timeout: None,
    }
}

/// The full battery in registration order: five stress scenarios, the
/// distortion sweep, then the safety checks.
pub fn builtin_registry() -> Result<ScenarioRegistry, RegistryError> {
    let mut registry = ScenarioRegistry::new(amp_schema());
    registry.register(step_load_change())?;
    registry.register(rail_sag())?;
    registry.register(load_0p25_stability())?;
    registry.register(hard_clipping_recovery())?;
    registry.register(thermal_foldback())?;
    registry.register(thd_sweep())?;
    registry.register(dead_time_margin())?;
    registry.register(gate_drive_check())?;
    registry.register(overcurrent_inhibit())?;
    registry.register(brownout_inhibit())?;
    registry.register(thermal_surrogate())?;
    Ok(registry)
}

/// Hard constraints the tuner enforces, in evaluation order. Cheap
/// arithmetic checks come first so a bad candidate dies before the
/// expensive transients run.
pub fn default_constraints() -> Vec<HardConstraint> {
    vec![
        HardConstraint::at_most("shoot_through", "dead_time_margin", "i_shoot", 50.0),
        HardConstraint::at_most("gate_slew", "gate_drive_check", "slew_fraction", 0.10),
        HardConstraint::at_most_factor_of(
            "limiter_tracks_ilim",
            "overcurrent_inhibit",
            "i_max",
            "ILIM",
            1.15,
        ),
        HardConstraint::at_most("module_soa", "overcurrent_inhibit", "i_max", 160.0),
        HardConstraint::at_most("uvlo_inhibit", "brownout_inhibit", "u_dip", 0.05),
        HardConstraint::at_least("bridge_efficiency", "thermal_surrogate", "eff", 0.85),
        HardConstraint::at_most("heatsink_budget", "thermal_surrogate", "temp_max", 105.0),
    ]
}

/// Grid axes for the stock tuning run. The first value of every axis
/// is the schema default, so candidate zero is the shipped parameter
/// set.
pub fn default_tuning_axes() -> Vec<TuneAxis> {
    vec![
        TuneAxis::new("DT_MARGIN", vec![60e-9, 40e-9, 80e-9]),
        TuneAxis::new("FSW", vec![350e3, 300e3, 400e3]),
        TuneAxis::new("IGSRC", vec![4.0, 2.0]),
        TuneAxis::new("IGSNK", vec![8.0, 4.0]),
        TuneAxis::new("ILIM", vec![110.0, 90.0, 130.0]),
        TuneAxis::new("MOD_GAIN", vec![1.0, 0.9, 1.1]),
    ]
}

fn signals(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}
