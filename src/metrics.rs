//! Metric extraction over completed simulation traces.
//!
//! Every scenario carries a small metric program: named ops evaluated
//! over the recorded traces once a run completes. The ops mirror the
//! classic `.meas` vocabulary (MAX, MIN, AVG, RMS, FIND-at-end) plus a
//! windowed average-power product, so nothing is scraped out of
//! simulator logs; the same samples that land in the trace archive are
//! the ones the numbers come from.
//!
//! | Op | Meaning |
//! |----|---------|
//! | [`MetricOp::Peak`] | Signed maximum over the window |
//! | [`MetricOp::Trough`] | Signed minimum over the window |
//! | [`MetricOp::PeakAbs`] | Maximum absolute value over the window |
//! | [`MetricOp::Mean`] | Arithmetic mean over the window |
//! | [`MetricOp::Rms`] | Root-mean-square over the window |
//! | [`MetricOp::Last`] | Final sample of the trace |
//! | [`MetricOp::AvgPower`] | Mean of `-v*i` over the window |
//! | [`MetricOp::Efficiency`] | Ratio of two windowed `-v*i` averages |
//!
//! Spectral analysis (THD) lives here too, shared by the drive-level
//! sweep and the tests.

use std::collections::BTreeMap;

use realfft::RealFftPlanner;
use rustfft::num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::trace::{Trace, TraceSet, Window};

/// One measurement over a trace set.
///
/// Window `None` means the whole transient. The `-v*i` sign in the
/// power ops matches the sense-source orientation in the deck: current
/// is recorded flowing into the load return, so load power comes out
/// positive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetricOp {
    Peak {
        signal: String,
        window: Option<Window>,
    },
    Trough {
        signal: String,
        window: Option<Window>,
    },
    PeakAbs {
        signal: String,
        window: Option<Window>,
    },
    Mean {
        signal: String,
        window: Option<Window>,
    },
    Rms {
        signal: String,
        window: Option<Window>,
    },
    Last {
        signal: String,
    },
    AvgPower {
        voltage: String,
        current: String,
        window: Option<Window>,
    },
    Efficiency {
        out_v: String,
        out_i: String,
        in_v: String,
        in_i: String,
        window: Option<Window>,
    },
}

impl MetricOp {
    pub fn peak(signal: &str, window: Option<Window>) -> Self {
        MetricOp::Peak {
            signal: signal.to_string(),
            window,
        }
    }

    pub fn trough(signal: &str, window: Option<Window>) -> Self {
        MetricOp::Trough {
            signal: signal.to_string(),
            window,
        }
    }

    pub fn peak_abs(signal: &str, window: Option<Window>) -> Self {
        MetricOp::PeakAbs {
            signal: signal.to_string(),
            window,
        }
    }

    pub fn mean(signal: &str, window: Option<Window>) -> Self {
        MetricOp::Mean {
            signal: signal.to_string(),
            window,
        }
    }

    pub fn rms(signal: &str, window: Option<Window>) -> Self {
        MetricOp::Rms {
            signal: signal.to_string(),
            window,
        }
    }

    pub fn last(signal: &str) -> Self {
        MetricOp::Last {
            signal: signal.to_string(),
        }
    }

    pub fn avg_power(voltage: &str, current: &str, window: Option<Window>) -> Self {
        MetricOp::AvgPower {
            voltage: voltage.to_string(),
            current: current.to_string(),
            window,
        }
    }

    pub fn efficiency(
        out_v: &str,
        out_i: &str,
        in_v: &str,
        in_i: &str,
        window: Option<Window>,
    ) -> Self {
        MetricOp::Efficiency {
            out_v: out_v.to_string(),
            out_i: out_i.to_string(),
            in_v: in_v.to_string(),
            in_i: in_i.to_string(),
            window,
        }
    }

    /// Every signal name this op reads. The registry checks these
    /// against the scenario's required signals at registration time.
    pub fn signals(&self) -> Vec<&str> {
        match self {
            MetricOp::Peak { signal, .. }
            | MetricOp::Trough { signal, .. }
            | MetricOp::PeakAbs { signal, .. }
            | MetricOp::Mean { signal, .. }
            | MetricOp::Rms { signal, .. }
            | MetricOp::Last { signal } => vec![signal],
            MetricOp::AvgPower {
                voltage, current, ..
            } => vec![voltage, current],
            MetricOp::Efficiency {
                out_v,
                out_i,
                in_v,
                in_i,
                ..
            } => vec![out_v, out_i, in_v, in_i],
        }
    }

    /// Evaluate against a trace set.
    ///
    /// Registration guarantees every signal is recorded, so a missing
    /// trace can only mean the op was evaluated outside the harness;
    /// that and an empty window both yield NaN, the same answer an
    /// empty `.meas` interval gives.
    pub fn evaluate(&self, traces: &TraceSet) -> f64 {
        match self {
            MetricOp::Peak { signal, window } => {
                fold_signal(traces, signal, *window, f64::NEG_INFINITY, f64::max)
            }
            MetricOp::Trough { signal, window } => {
                fold_signal(traces, signal, *window, f64::INFINITY, f64::min)
            }
            MetricOp::PeakAbs { signal, window } => fold_signal(
                traces,
                signal,
                *window,
                f64::NEG_INFINITY,
                |acc, v| acc.max(v.abs()),
            ),
            MetricOp::Mean { signal, window } => {
                mean_of(values_in(traces, signal, *window))
            }
            MetricOp::Rms { signal, window } => {
                let vs = values_in(traces, signal, *window);
                mean_of_mapped(vs, |v| v * v).sqrt()
            }
            MetricOp::Last { signal } => traces
                .get(signal)
                .and_then(Trace::last_value)
                .unwrap_or(f64::NAN),
            MetricOp::AvgPower {
                voltage,
                current,
                window,
            } => avg_power_in(traces, voltage, current, *window),
            MetricOp::Efficiency {
                out_v,
                out_i,
                in_v,
                in_i,
                window,
            } => {
                let p_out = avg_power_in(traces, out_v, out_i, *window);
                let p_in = avg_power_in(traces, in_v, in_i, *window);
                if p_in.abs() < 1e-12 {
                    f64::NAN
                } else {
                    p_out / p_in
                }
            }
        }
    }
}

/// A named op inside a scenario's metric program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSpec {
    pub name: String,
    pub op: MetricOp,
}

impl MetricSpec {
    pub fn new(name: &str, op: MetricOp) -> Self {
        MetricSpec {
            name: name.to_string(),
            op,
        }
    }
}

/// Extracted metric values for one scenario. Keys are exactly the
/// metric names the scenario declares, in name order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSet {
    pub scenario: String,
    pub values: BTreeMap<String, f64>,
}

impl MetricSet {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }
}

/// Run a metric program over the traces of a completed run.
pub fn extract(scenario: &str, program: &[MetricSpec], traces: &TraceSet) -> MetricSet {
    let values = program
        .iter()
        .map(|m| (m.name.clone(), m.op.evaluate(traces)))
        .collect();
    MetricSet {
        scenario: scenario.to_string(),
        values,
    }
}

/// Total harmonic distortion in percent.
///
/// Samples inside `window` are mean-removed, Hann-windowed and run
/// through a real FFT on the fixed transient grid (median sample
/// spacing). Harmonic amplitudes are read at the nearest bin to each
/// multiple of `fundamental_hz`, orders 2 through `harmonics`, and
/// `100 * sqrt(sum(a_k^2)) / a_1` comes back. `None` when the window
/// is too short or the fundamental is absent.
pub fn thd_percent(
    trace: &Trace,
    window: Option<Window>,
    fundamental_hz: f64,
    harmonics: usize,
) -> Option<f64> {
    let (times, values) = trace.slice(window);
    let n = values.len();
    if n < 16 {
        return None;
    }
    let dt = {
        let mut diffs: Vec<f64> = times.windows(2).map(|w| w[1] - w[0]).collect();
        diffs.sort_by(|a, b| a.total_cmp(b));
        diffs[diffs.len() / 2]
    };
    if dt <= 0.0 {
        return None;
    }

    let mean = values.iter().sum::<f64>() / n as f64;
    let mut windowed: Vec<f64> = values
        .iter()
        .enumerate()
        .map(|(i, &x)| {
            let w = 0.5 - 0.5 * (2.0 * std::f64::consts::PI * i as f64 / (n - 1) as f64).cos();
            (x - mean) * w
        })
        .collect();

    let mut planner = RealFftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(n);
    let mut spectrum = vec![Complex::new(0.0, 0.0); n / 2 + 1];
    fft.process(&mut windowed, &mut spectrum).unwrap();
    let mags: Vec<f64> = spectrum.iter().map(|c| c.norm()).collect();

    let bin_hz = 1.0 / (n as f64 * dt);
    let amp_at = |f: f64| -> f64 {
        let mut best = 0usize;
        let mut best_err = f64::INFINITY;
        for (i, _) in mags.iter().enumerate() {
            let err = (i as f64 * bin_hz - f).abs();
            if err < best_err {
                best_err = err;
                best = i;
            }
        }
        mags[best]
    };

    let a1 = amp_at(fundamental_hz);
    if a1 <= 1e-12 {
        return None;
    }
    let mut harm_sq = 0.0;
    for order in 2..=harmonics {
        let a = amp_at(order as f64 * fundamental_hz);
        harm_sq += a * a;
    }
    Some(harm_sq.sqrt() / a1 * 100.0)
}

fn values_in<'a>(traces: &'a TraceSet, signal: &str, window: Option<Window>) -> &'a [f64] {
    match traces.get(signal) {
        Some(trace) => trace.slice(window).1,
        None => {
            debug_assert!(false, "metric evaluated against unrecorded signal '{signal}'");
            &[]
        }
    }
}

fn fold_signal(
    traces: &TraceSet,
    signal: &str,
    window: Option<Window>,
    init: f64,
    f: impl Fn(f64, f64) -> f64,
) -> f64 {
    let vs = values_in(traces, signal, window);
    if vs.is_empty() {
        return f64::NAN;
    }
    vs.iter().fold(init, |acc, &v| f(acc, v))
}

fn mean_of(vs: &[f64]) -> f64 {
    mean_of_mapped(vs, |v| v)
}

fn mean_of_mapped(vs: &[f64], f: impl Fn(f64) -> f64) -> f64 {
    if vs.is_empty() {
        return f64::NAN;
    }
    vs.iter().map(|&v| f(v)).sum::<f64>() / vs.len() as f64
}

fn avg_power_in(traces: &TraceSet, voltage: &str, current: &str, window: Option<Window>) -> f64 {
    let vs = values_in(traces, voltage, window);
    let is = values_in(traces, current, window);
    let n = vs.len().min(is.len());
    if n == 0 {
        return f64::NAN;
    }
    let sum: f64 = (0..n).map(|k| -vs[k] * is[k]).sum();
    sum / n as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f64 = 5e-6;

    fn sine_trace(freq_hz: f64, amplitude: f64, duration: f64) -> Trace {
        let n = (duration / DT) as usize + 1;
        let mut tr = Trace::new();
        for i in 0..n {
            let t = i as f64 * DT;
            tr.push(t, amplitude * (2.0 * std::f64::consts::PI * freq_hz * t).sin());
        }
        tr
    }

    fn clipped_sine_trace(freq_hz: f64, amplitude: f64, clip: f64, duration: f64) -> Trace {
        let n = (duration / DT) as usize + 1;
        let mut tr = Trace::new();
        for i in 0..n {
            let t = i as f64 * DT;
            let x = amplitude * (2.0 * std::f64::consts::PI * freq_hz * t).sin();
            tr.push(t, x.clamp(-clip, clip));
        }
        tr
    }

    fn set_with(name: &str, trace: Trace) -> TraceSet {
        let mut ts = TraceSet::new();
        ts.insert(name, trace);
        ts
    }

    #[test]
    fn peak_trough_and_abs_on_offset_sine() {
        let mut tr = Trace::new();
        for i in 0..2001 {
            let t = i as f64 * DT;
            tr.push(
                t,
                1.0 + 3.0 * (2.0 * std::f64::consts::PI * 1000.0 * t).sin(),
            );
        }
        let ts = set_with("vout", tr);
        let peak = MetricOp::peak("vout", None).evaluate(&ts);
        let trough = MetricOp::trough("vout", None).evaluate(&ts);
        let peak_abs = MetricOp::peak_abs("vout", None).evaluate(&ts);
        assert!((peak - 4.0).abs() < 1e-2);
        assert!((trough + 2.0).abs() < 1e-2);
        assert!((peak_abs - 4.0).abs() < 1e-2);
    }

    #[test]
    fn rms_of_sine_is_amplitude_over_sqrt2() {
        let ts = set_with("vout", sine_trace(1000.0, 10.0, 0.02));
        let rms = MetricOp::rms("vout", None).evaluate(&ts);
        assert!((rms - 10.0 / 2.0_f64.sqrt()).abs() < 0.05);
    }

    #[test]
    fn avg_power_sign_convention_gives_positive_load_power() {
        // 40 V peak across 1.6 ohm: i = v / 1.6, recorded with the
        // sense-source orientation (negated), p_avg = 40^2 / (2*1.6).
        let v = sine_trace(1000.0, 40.0, 0.02);
        let mut i = Trace::new();
        for (&t, &vv) in v.times().iter().zip(v.values()) {
            i.push(t, -vv / 1.6);
        }
        let mut ts = TraceSet::new();
        ts.insert("vout", v);
        ts.insert("isense", i);
        let p = MetricOp::avg_power("vout", "isense", None).evaluate(&ts);
        assert!((p - 500.0).abs() < 5.0, "expected ~500 W, got {p}");
    }

    #[test]
    fn windowed_mean_ignores_samples_outside() {
        let mut tr = Trace::new();
        for i in 0..100 {
            let t = i as f64 * 1e-3;
            tr.push(t, if t < 0.05 { 0.0 } else { 2.0 });
        }
        let ts = set_with("vout", tr);
        let m = MetricOp::mean("vout", Some(Window::new(0.06, 0.09))).evaluate(&ts);
        assert!((m - 2.0).abs() < 1e-12);
    }

    #[test]
    fn last_reads_final_sample() {
        let mut tr = Trace::new();
        tr.push(0.0, 25.0);
        tr.push(1.0, 30.0);
        tr.push(2.0, 41.5);
        let ts = set_with("temp", tr);
        assert_eq!(MetricOp::last("temp").evaluate(&ts), 41.5);
    }

    #[test]
    fn empty_window_evaluates_to_nan() {
        let ts = set_with("vout", sine_trace(1000.0, 1.0, 0.01));
        let v = MetricOp::peak("vout", Some(Window::new(5.0, 6.0))).evaluate(&ts);
        assert!(v.is_nan());
    }

    #[test]
    fn efficiency_of_scaled_copies_is_the_scale() {
        let v_in = sine_trace(1000.0, 50.0, 0.02);
        let mut v_out = Trace::new();
        let mut i = Trace::new();
        for (&t, &vv) in v_in.times().iter().zip(v_in.values()) {
            v_out.push(t, 0.94 * vv);
            i.push(t, -vv / 2.0);
        }
        let mut ts = TraceSet::new();
        ts.insert("vdrv", v_in);
        ts.insert("vout", v_out);
        ts.insert("isense", i);
        let eff =
            MetricOp::efficiency("vout", "isense", "vdrv", "isense", None).evaluate(&ts);
        assert!((eff - 0.94).abs() < 1e-9);
    }

    #[test]
    fn extract_produces_exactly_the_declared_names() {
        let ts = set_with("vout", sine_trace(1000.0, 2.0, 0.01));
        let program = vec![
            MetricSpec::new("v_pk", MetricOp::peak("vout", None)),
            MetricSpec::new("v_rms", MetricOp::rms("vout", None)),
        ];
        let m = extract("demo", &program, &ts);
        assert_eq!(m.scenario, "demo");
        let names: Vec<&str> = m.values.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["v_pk", "v_rms"]);
    }

    #[test]
    fn thd_of_pure_sine_is_tiny() {
        let tr = sine_trace(1000.0, 40.0, 0.02);
        let thd = thd_percent(&tr, None, 1000.0, 10).unwrap();
        assert!(thd < 0.05, "pure sine THD should be near zero, got {thd}%");
    }

    #[test]
    fn thd_of_clipped_sine_is_large() {
        let tr = clipped_sine_trace(1000.0, 1.0, 0.6, 0.02);
        let thd = thd_percent(&tr, None, 1000.0, 10).unwrap();
        assert!(thd > 5.0, "hard-clipped sine should show percent-level THD, got {thd}%");
    }

    #[test]
    fn thd_rises_with_clipping_depth() {
        let shallow = clipped_sine_trace(1000.0, 1.0, 0.95, 0.02);
        let deep = clipped_sine_trace(1000.0, 1.0, 0.55, 0.02);
        let a = thd_percent(&shallow, None, 1000.0, 10).unwrap();
        let b = thd_percent(&deep, None, 1000.0, 10).unwrap();
        assert!(b > a, "deeper clipping must distort more ({a}% vs {b}%)");
    }

    #[test]
    fn thd_needs_enough_samples() {
        let mut tr = Trace::new();
        for i in 0..8 {
            tr.push(i as f64 * DT, 1.0);
        }
        assert!(thd_percent(&tr, None, 1000.0, 10).is_none());
    }

    #[test]
    fn thd_respects_trailing_window() {
        // Clean tone for 10 ms, clipped tone afterwards: a trailing
        // window must see only the dirty part.
        let mut tr = Trace::new();
        let n = (0.02 / DT) as usize + 1;
        for i in 0..n {
            let t = i as f64 * DT;
            let x = (2.0 * std::f64::consts::PI * 1000.0 * t).sin();
            tr.push(t, if t < 0.01 { x } else { x.clamp(-0.5, 0.5) });
        }
        let tail = Window::trailing(tr.last_time().unwrap(), 0.008);
        let thd = thd_percent(&tr, Some(tail), 1000.0, 10).unwrap();
        assert!(thd > 5.0, "window should isolate the clipped tail, got {thd}%");
    }
}
