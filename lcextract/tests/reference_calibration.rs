//! Reference sample to noise model to outlier search

use approx::assert_relative_eq;
use lcextract::reference::{ReferenceSample, ReferenceStar};
use lcextract::retrieval::{FetchOutcome, LightcurveSource, RetrievalError, SkyPosition};
use lcextract::storage::{LightcurveStore, OidCache, OidRecord};
use lcextract::{AstroObject, ObjectAnalyzer};
use lightcurve::{
    ArchiveDescriptor, CalibrationConfig, CalibrationTable, LightcurveConfig, Measurement,
    MeasurementTable, NoiseModel, NoiseModelCoefficients, OutlierTag,
};
use tempfile::TempDir;
use test_helpers::synthetic_lightcurve;

/// Scatter of a well behaved star at `mag`.
fn true_scatter(mag: f64) -> f64 {
    0.01 + 0.004 * (mag - 15.0).powi(2)
}

fn lightcurve(oid: &str, mag: f64, noise_sd: f64, seed: u64) -> MeasurementTable {
    MeasurementTable::new(
        synthetic_lightcurve(300, 58500.0, 1.0, mag, noise_sd, 0.01, seed)
            .into_iter()
            .map(|p| Measurement::new(oid, 'g', p.mjd, p.mag, p.magerr))
            .collect(),
    )
}

/// Twelve steady stars and one variable per 0.25 mag bin from 15.0 to 17.75.
fn reference_sample(cache: &mut OidCache) -> ReferenceSample {
    let mut sample = ReferenceSample::default();
    for k in 0..12u64 {
        let centre = 15.0 + 0.25 * k as f64;
        for i in 0..13u64 {
            let ref_mag = centre + 0.02 * (i % 3) as f64;
            let noise = if i == 12 {
                8.0 * true_scatter(ref_mag)
            } else {
                true_scatter(ref_mag)
            };
            let oid = format!("{}", 800_000 + 100 * k + i);
            cache
                .append(OidRecord {
                    oid: oid.clone(),
                    filtercode: "zg".to_string(),
                    ra: 200.0 + 0.01 * i as f64,
                    dec: 10.0 + 0.01 * k as f64,
                    ngoodobs: 300,
                    refmag: ref_mag,
                    refmagerr: 0.01,
                })
                .unwrap();

            let name = if i == 12 {
                format!("variable-{k}")
            } else {
                format!("ref-{k}-{i}")
            };
            let object = AstroObject::new(&name, 200.0, 10.0, "");
            let table = lightcurve(&oid, ref_mag, noise, 100 * k + i);
            sample.extend(ReferenceStar::from_table(&object, ref_mag + 0.3, &table, &*cache));
        }
    }
    sample
}

struct FixedSource(MeasurementTable);

impl LightcurveSource for FixedSource {
    fn fetch(
        &self,
        _archive: &ArchiveDescriptor,
        _position: SkyPosition,
        _radius_deg: f64,
    ) -> Result<FetchOutcome, RetrievalError> {
        Ok(FetchOutcome::from_table(self.0.clone()))
    }
}

#[test]
fn test_calibrated_model_flags_flare() {
    let _ = env_logger::builder().is_test(true).try_init();

    let dir = TempDir::new().unwrap();
    let store = LightcurveStore::with_path(dir.path().to_path_buf());
    let mut cache = OidCache::in_memory();
    let mut sample = reference_sample(&mut cache);
    assert_eq!(sample.len(), 12 * 13);
    assert!(sample.stars().iter().all(|s| s.ref_mag.is_some()));

    let config = CalibrationConfig {
        fit_degree: 2,
        ..Default::default()
    };
    let calibration = sample.calibrate_and_fit(&config).unwrap();

    assert_eq!(calibration.table.len(), 12);
    for row in calibration.table.rows() {
        assert!((11..=12).contains(&row.used_samples));
        assert_relative_eq!(row.median_of_sd, true_scatter(row.mag), max_relative = 0.1);
    }
    let variables: Vec<&ReferenceStar> = sample
        .stars()
        .iter()
        .filter(|s| s.name.starts_with("variable"))
        .collect();
    assert_eq!(variables.len(), 12);
    assert!(variables.iter().all(|s| !s.included));
    for mag in [15.5, 16.5, 17.5] {
        let fitted = calibration.model.evaluate('g', mag) / 3.0;
        assert_relative_eq!(fitted, true_scatter(mag), max_relative = 0.1);
    }
    assert!(!calibration.model.supports('r'));

    // Outputs persist and reload
    sample.save_csv(store.reference_sample_path()).unwrap();
    calibration
        .table
        .save_csv(store.calibration_table_path())
        .unwrap();
    calibration.model.save_json(store.noise_model_path()).unwrap();
    assert_eq!(
        ReferenceSample::load_csv(store.reference_sample_path()).unwrap().len(),
        sample.len()
    );
    assert_eq!(
        CalibrationTable::load_csv(store.calibration_table_path()).unwrap().len(),
        12
    );
    let model = NoiseModelCoefficients::load_json(store.noise_model_path()).unwrap();

    // A 16.5 mag object with a three point flare, quieter than the reference stars
    let mut table = lightcurve("555", 16.5, 0.005, 99);
    let flare_rows = [150, 151, 152];
    let mut rows = table.rows().to_vec();
    for &row in &flare_rows {
        rows[row].mag -= 0.5;
    }
    table = MeasurementTable::new(rows);

    let lc_config = LightcurveConfig {
        filter_selection: "g".to_string(),
        ..Default::default()
    };
    let source = FixedSource(table);
    let analyzer = ObjectAnalyzer::new(&lc_config, &source, &cache, &model).unwrap();
    let analysis = analyzer
        .analyze_archive(&AstroObject::new("target", 210.0, 5.0, ""), analyzer.archives()[0])
        .unwrap();

    let verdict = &analysis.verdicts[&'g'];
    assert!(verdict.outliers_exist);
    assert_eq!(verdict.outlier_rows().collect::<Vec<_>>(), flare_rows);
    assert!(verdict
        .tags
        .iter()
        .filter(|(row, _)| flare_rows.contains(row))
        .all(|(_, tag)| *tag == OutlierTag::Low));
    // The target's own OID was never catalogued
    assert_eq!(analysis.reference_mags[&'g'], None);
}
