//! End-to-end classification of synthetic lightcurves

use approx::assert_relative_eq;
use lightcurve::archive::ZTF;
use lightcurve::noise_model::Coefficients;
use lightcurve::outlier::Rejection;
use lightcurve::{
    LightcurveConfig, Measurement, MeasurementTable, NoiseModel, NoiseModelCoefficients,
    OutlierClassifier, OutlierTag, PerFilterStats, Thresholds,
};
use test_helpers::{output_path_in, synthetic_lightcurve};

/// Noise curve of constant 1-sigma scatter.
fn flat(scatter: f64) -> Coefficients {
    let mut c = [0.0; 9];
    c[8] = scatter;
    c
}

fn table_from(filter: char, oid: &str, points: &[test_helpers::SyntheticPoint]) -> Vec<Measurement> {
    points
        .iter()
        .map(|p| Measurement::new(oid, filter, p.mjd, p.mag, p.magerr))
        .collect()
}

#[test]
fn test_bright_flare_detected_in_g_only() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut g = synthetic_lightcurve(120, 58200.0, 2.0, 16.5, 0.02, 0.02, 11);
    for p in g.iter_mut().skip(60).take(4) {
        p.mag -= 1.0;
    }
    let r = synthetic_lightcurve(110, 58200.3, 2.0, 16.1, 0.02, 0.02, 12);
    let i = synthetic_lightcurve(40, 58201.0, 5.0, 15.9, 0.02, 0.02, 13);

    let mut rows = table_from('g', "1001", &g);
    rows.extend(table_from('r', "1001", &r));
    rows.extend(table_from('i', "1001", &i));
    let table = MeasurementTable::new(rows);

    let config = LightcurveConfig::default();
    let model = NoiseModelCoefficients::new()
        .with_curve('g', flat(0.03))
        .with_curve('r', flat(0.03));
    let stats = PerFilterStats::from_table(&table);
    let classifier = OutlierClassifier::new(config.thresholds, &config.disabled_filters);
    let verdicts = classifier.classify(&table, &ZTF, &stats, &model);

    let g_verdict = &verdicts[&'g'];
    assert!(g_verdict.outliers_exist);
    assert_eq!(g_verdict.outlier_count, 4);
    assert!(g_verdict
        .outlier_rows()
        .all(|row| table.rows()[row].mag < 16.0));
    assert!(g_verdict
        .tags
        .iter()
        .filter(|(_, t)| *t != OutlierTag::Inside)
        .all(|(_, t)| *t == OutlierTag::Low));

    let r_verdict = &verdicts[&'r'];
    assert!(!r_verdict.outliers_exist);
    assert_eq!(
        r_verdict.rejection,
        Some(Rejection::BelowMinimum { count: 0, min: 1 })
    );
    assert_eq!(verdicts[&'i'].rejection, Some(Rejection::Disabled));

    assert_eq!(stats.count('g'), 120);
    assert_relative_eq!(stats.median('r').unwrap(), 16.1, epsilon = 0.01);

    table
        .save_csv(output_path_in("lightcurves", "flare_g.csv"))
        .unwrap();
}

#[test]
fn test_noisy_object_rejected_by_fraction_limit() {
    // Scatter of 0.2 mag against a modelled 0.02: most points fall outside the band
    let g = synthetic_lightcurve(100, 58000.0, 1.0, 18.0, 0.2, 0.01, 5);
    let table = MeasurementTable::new(table_from('g', "7", &g));
    let stats = PerFilterStats::from_table(&table);
    let model = NoiseModelCoefficients::new().with_curve('g', flat(0.02));
    let thresholds = Thresholds {
        count_min: 1,
        count_max: 100,
        count_pc: 0.1,
        mag_scalar: 1.0,
    };

    let verdicts = OutlierClassifier::new(thresholds, "").classify(&table, &ZTF, &stats, &model);
    let v = &verdicts[&'g'];
    assert!(!v.outliers_exist);
    assert!(v.outlier_count > 10);
    assert!(matches!(v.rejection, Some(Rejection::AboveFraction { limit: 10, .. })));
    assert_relative_eq!(model.evaluate('g', 18.0), 0.06, epsilon = 1e-12);
}

#[test]
fn test_contaminating_object_does_not_change_stats_grouping() {
    let g = synthetic_lightcurve(30, 58000.0, 1.0, 17.0, 0.01, 0.01, 9);
    let mut rows = table_from('g', "main", &g);
    rows.push(Measurement::new("neighbour", 'g', 58010.5, 19.5, 0.1));
    let table = MeasurementTable::new(rows);

    assert_eq!(table.primary_ids(), vec![('g', "main".to_string())]);
    let stats = PerFilterStats::from_table(&table);
    assert_eq!(stats.count('g'), 31);
}
