//! Distortion sweep against the analytic amplifier stand-in.
//!
//! The mock clips at 0.8 drive, so the THD curve must sit on the
//! noise floor below the knee and rise steeply past it.


use ampcheck::driver::SimulationDriver;
use ampcheck::report::SuiteSummary;
use ampcheck::runner::SuiteRunner;
use ampcheck::scenarios::{builtin_registry, thd_drive_levels};
use mock_amp::{behavioral_amp, CLIP_DRIVE};

#[test]
fn thd_series_tracks_clipping_onset() {
    let registry = builtin_registry().unwrap();
    let sim = behavioral_amp;
    let driver = SimulationDriver::new(&registry, &sim);
    let outcome = SuiteRunner::new(&driver)
        .run_thd_sweep(&thd_drive_levels())
        .unwrap();

    assert!(outcome.skipped.is_empty());
    assert_eq!(outcome.points.len(), 9);

    // Distortion never falls as the drive rises (a little numerical
    // slack for the flat region below the knee).
    for pair in outcome.points.windows(2) {
        assert!(
            pair[1].thd_percent >= pair[0].thd_percent - 0.05,
            "THD fell from {} to {} between drive {} and {}",
            pair[0].thd_percent,
            pair[1].thd_percent,
            pair[0].vref_pk,
            pair[1].vref_pk
        );
    }

    for point in &outcome.points {
        if point.vref_pk <= CLIP_DRIVE {
            assert!(
                point.thd_percent < 0.5,
                "clean drive {} measured {}% THD",
                point.vref_pk,
                point.thd_percent
            );
        }
    }
    let at_0p9 = &outcome.points[7];
    let at_1p0 = &outcome.points[8];
    assert!(at_0p9.thd_percent > 1.0, "got {}", at_0p9.thd_percent);
    assert!(at_1p0.thd_percent > at_0p9.thd_percent);

    // Output level and power keep growing even in clipping; the RMS of
    // a harder-clipped sine still rises toward the square-wave limit.
    for pair in outcome.points.windows(2) {
        assert!(pair[1].p_out_w > pair[0].p_out_w);
        assert!(pair[1].vout_rms > pair[0].vout_rms);
    }
    assert!(
        (10_000.0..16_000.0).contains(&at_1p0.p_out_w),
        "full-drive power {} W",
        at_1p0.p_out_w
    );
    assert!(outcome.points[0].p_out_w < 1_000.0);
}

#[test]
fn sweep_respects_custom_levels_and_aggregation_sorts_them() {
    let registry = builtin_registry().unwrap();
    let sim = behavioral_amp;
    let driver = SimulationDriver::new(&registry, &sim);
    let runner = SuiteRunner::new(&driver);

    let levels = [0.5, 0.3, 0.9];
    let outcome = runner.run_thd_sweep(&levels).unwrap();
    let drives: Vec<f64> = outcome.points.iter().map(|p| p.vref_pk).collect();
    assert_eq!(drives, vec![0.5, 0.3, 0.9]);

    // The report orders the curve by drive regardless of run order.
    let sections = runner.run_battery(None).unwrap();
    let summary = SuiteSummary::new("mock ngspice", sections, outcome.points, None).unwrap();
    let sorted: Vec<f64> = summary.thd_vs_power.iter().map(|p| p.vref_pk).collect();
    assert_eq!(sorted, vec![0.3, 0.5, 0.9]);
}
