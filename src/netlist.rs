//! Netlist assembly for the behavioral amplifier model.
//!
//! The model is a bounded averaged full-bridge: a sagging supply, a
//! PI voltage loop with output saturation, a soft current limiter, a
//! first-order thermal network with foldback, and an undervoltage
//! inhibit. All of it is expressed with B-sources so the deck runs on
//! stock ngspice with no device libraries.
//!
//! Scenarios contribute only the parts that differ between tests: the
//! reference source, the load network, the rail model, optional extra
//! elements, and the transient directive. Everything else is shared
//! text rendered from the resolved [`ParamSet`], so a parameter change
//! flows into every scenario identically.

use crate::registry::ParamSet;

/// How the supply rails are produced.
#[derive(Debug, Clone, PartialEq)]
pub enum RailModel {
    /// Rails derived from the sagging-supply expression
    /// `VRAIL_NOM*ETA_DC - |i|*R_SAG`. The bridge drives swing on
    /// `v(vrail)`.
    Regulated,
    /// Explicit piecewise-linear rail sources for brownout profiles.
    /// The bridge drives swing on `v(vcc)`.
    Pwl { vcc: String, vee: String },
}

/// Transient directive: fixed step, rendered as
/// `.tran <step> <stop> 0 <step>` so the output grid is uniform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TranSpec {
    pub step: f64,
    pub stop: f64,
}

impl TranSpec {
    pub fn new(step: f64, stop: f64) -> Self {
        TranSpec { step, stop }
    }
}

/// Per-scenario circuit description, combined with the shared model
/// block at render time.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitTemplate {
    pub title: String,
    pub rail: RailModel,
    /// Element line(s) defining node `ref`, the loop reference.
    pub reference: String,
    /// Element line(s) forming the load between `loadp` and `loadn2`,
    /// including any switch models they need.
    pub load: String,
    /// Additional scenario-specific elements, e.g. stress surrogates.
    pub extra: String,
    pub tran: TranSpec,
}

impl CircuitTemplate {
    pub fn new(
        title: &str,
        rail: RailModel,
        reference: &str,
        load: &str,
        tran: TranSpec,
    ) -> Self {
        CircuitTemplate {
            title: title.to_string(),
            rail,
            reference: reference.to_string(),
            load: load.to_string(),
            extra: String::new(),
            tran,
        }
    }

    pub fn with_extra(mut self, extra: &str) -> Self {
        self.extra = extra.to_string();
        self
    }
}

/// ngspice vector expression for a harness signal name.
///
/// Currents are recorded through the zero-volt sense source; every
/// other signal is a node voltage.
pub fn vector_expr(signal: &str) -> String {
    match signal {
        "isense" => "i(Vsense)".to_string(),
        other => format!("v({other})"),
    }
}

/// Render a complete deck body for one scenario: title, parameters,
/// rails, shared model block, scenario elements, solver options and
/// the transient directive. The caller appends its own `.control`
/// block and `.end`.
pub fn render_deck(template: &CircuitTemplate, params: &ParamSet) -> String {
    let mut deck = String::with_capacity(4096);
    push_line(&mut deck, &format!("* {}", template.title));
    push_line(&mut deck, &format!(".title {}", template.title));

    for (name, value) in params.iter() {
        push_line(&mut deck, &format!(".param {name}={}", format_value(value)));
    }
    // Total limiter threshold scales with the paralleled module count.
    push_line(&mut deck, ".param ILIM_TOT={ILIM*NPAR}");

    let drive_rail = match &template.rail {
        RailModel::Regulated => {
            push_line(
                &mut deck,
                "Bvrail vrail 0 V = {VRAIL_NOM*ETA_DC - abs(i(Vsense))*R_SAG}",
            );
            push_line(&mut deck, "Bvcc vcc 0 V = v(vrail)");
            push_line(&mut deck, "Bvee vee 0 V = -v(vrail)");
            "v(vrail)"
        }
        RailModel::Pwl { vcc, vee } => {
            push_line(&mut deck, &format!("VCC vcc 0 PWL({vcc})"));
            push_line(&mut deck, &format!("VEE vee 0 PWL({vee})"));
            "v(vcc)"
        }
    };

    push_line(&mut deck, &template.reference);
    if !template.extra.is_empty() {
        push_line(&mut deck, &template.extra);
    }

    push_line(&mut deck, "RoutA a_drv outp 0.02");
    push_line(&mut deck, "RoutB b_drv outn 0.02");
    push_line(&mut deck, "RwireP outp loadp {R_WIRE/NPAR}");
    push_line(&mut deck, "RwireN outn loadn {R_WIRE/NPAR}");
    push_line(&mut deck, "Vsense loadn loadn2 0");
    push_line(&mut deck, &template.load);

    push_line(&mut deck, "Bvout vout 0 V = v(outp)-v(outn)");
    push_line(&mut deck, "Bvdrv vdrv 0 V = v(a_drv)-v(b_drv)");
    push_line(&mut deck, "Berr err 0 V = v(ref) - {KFB}*v(vout)");
    push_line(&mut deck, "Cint ui 0 1 IC=0");
    push_line(&mut deck, "Rleak ui 0 1G");
    push_line(&mut deck, "Gint 0 ui value = {v(err)}");
    push_line(
        &mut deck,
        "Bu_raw uraw 0 V = {MOD_GAIN}*({KP}*v(err) + {KI}*v(ui))",
    );
    push_line(
        &mut deck,
        "Bu_sat usat 0 V = (v(uraw)>{UMAX}) ? {UMAX} : ((v(uraw)<-{UMAX}) ? -{UMAX} : v(uraw))",
    );
    push_line(
        &mut deck,
        "Bilim flim 0 V = 0.5*(1 - tanh((abs(i(Vsense))-{ILIM_TOT})/{ISOFT}))",
    );
    push_line(&mut deck, "Cth temp 0 {CTH} IC={T_AMB}");
    push_line(&mut deck, "Rth temp 0 {RTH}");
    push_line(
        &mut deck,
        "Gheat 0 temp value = { abs((v(outp)-v(outn))*i(Vsense))/{PTH_SCALE} \
         + (abs(i(Vsense))*abs(i(Vsense)))*R_WIRE/{PTH_SCALE} }",
    );
    push_line(
        &mut deck,
        "Bftemp ftemp 0 V = 0.5*(1 - tanh((v(temp)-{T_FOLD})/{T_SOFT}))",
    );
    push_line(
        &mut deck,
        "Buvlo fuvlo 0 V = 0.5*(1 + tanh((v(vcc)-{UVLO_TH})/{UVLO_SOFT}))",
    );
    push_line(
        &mut deck,
        "Bu_eff ueff 0 V = v(usat)*v(flim)*v(ftemp)*v(fuvlo)",
    );
    push_line(&mut deck, &format!("Ba_drv a_drv 0 V = v(ueff) * {drive_rail}"));
    push_line(&mut deck, &format!("Bb_drv b_drv 0 V = -v(ueff) * {drive_rail}"));

    push_line(
        &mut deck,
        ".options method=gear reltol=1e-4 abstol=1e-8 vntol=1e-6",
    );
    push_line(
        &mut deck,
        &format!(
            ".tran {step} {stop} 0 {step}",
            step = format_value(template.tran.step),
            stop = format_value(template.tran.stop),
        ),
    );
    deck
}

/// Format a parameter value the way ngspice expects: integral values
/// without a trailing `.0`, everything else in the shortest decimal
/// form.
pub fn format_value(value: f64) -> String {
    if value == value.trunc() && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

fn push_line(deck: &mut String, line: &str) {
    deck.push_str(line);
    deck.push('\n');
}
