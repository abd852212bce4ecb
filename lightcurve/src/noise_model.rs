//! Magnitude dependent noise model.
//!
//! The expected 1-sigma scatter of a non-variable source is modelled per
//! filter as a degree-8 polynomial in magnitude. The model reports three
//! times that scatter as the half-width of the band outside which a
//! measurement counts as an outlier.
//!
//! Coefficients are stored highest power first. Filters without a curve are
//! unsupported for band based classification: [`NoiseModel::band`] returns
//! `None` for them and [`NoiseModel::evaluate`] returns 0.0.

use std::collections::BTreeMap;
use std::path::Path;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::archive::FilterCode;

/// Degree of the stored noise polynomial.
pub const NOISE_MODEL_DEGREE: usize = 8;

/// Number of coefficients per filter.
pub const COEFFICIENT_COUNT: usize = NOISE_MODEL_DEGREE + 1;

/// Width of the outlier band in units of the modelled scatter.
pub const BAND_SIGMA: f64 = 3.0;

/// Polynomial coefficients, highest power first.
pub type Coefficients = [f64; COEFFICIENT_COUNT];

#[derive(Error, Debug)]
pub enum NoiseModelError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Filter field '{0}' is not a single character")]
    InvalidFilter(String),
    #[error("Filter {filter} has {found} coefficients, expected 9")]
    WrongLength { filter: String, found: usize },
    #[error("Coefficient '{value}' for filter {filter} is not a number")]
    InvalidCoefficient { filter: String, value: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    #[error("Need at least {needed} points for a degree {degree} fit, got {got}")]
    TooFewPoints {
        degree: usize,
        needed: usize,
        got: usize,
    },
    #[error("Polynomial degree {0} exceeds the supported maximum of 8")]
    DegreeTooHigh(usize),
    #[error("x and y lengths differ ({0} vs {1})")]
    LengthMismatch(usize, usize),
    #[error("Non-finite input point")]
    NonFinite,
    #[error("Least squares solve failed: {0}")]
    Solve(String),
}

/// Source of the outlier band half-width for a filter at a magnitude.
pub trait NoiseModel {
    /// Band half-width, `None` when the filter has no fitted curve.
    fn band(&self, filter: FilterCode, magnitude: f64) -> Option<f64>;

    /// Band half-width with unsupported filters reported as 0.0.
    fn evaluate(&self, filter: FilterCode, magnitude: f64) -> f64 {
        self.band(filter, magnitude).unwrap_or(0.0)
    }

    fn supports(&self, filter: FilterCode) -> bool;
}

/// Fitted noise curves keyed by filter.
///
/// A filter absent from the map is not supported for outlier classification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NoiseModelCoefficients {
    curves: BTreeMap<FilterCode, Coefficients>,
}

impl NoiseModelCoefficients {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_curve(mut self, filter: FilterCode, coefficients: Coefficients) -> Self {
        self.insert(filter, coefficients);
        self
    }

    pub fn insert(&mut self, filter: FilterCode, coefficients: Coefficients) {
        self.curves.insert(filter, coefficients);
    }

    pub fn get(&self, filter: FilterCode) -> Option<&Coefficients> {
        self.curves.get(&filter)
    }

    /// Filters with a fitted curve.
    pub fn filters(&self) -> impl Iterator<Item = FilterCode> + '_ {
        self.curves.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.curves.is_empty()
    }

    /// Modelled 1-sigma scatter (the raw polynomial value).
    pub fn scatter(&self, filter: FilterCode, magnitude: f64) -> Option<f64> {
        self.get(filter).map(|c| horner(c, magnitude))
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<(), NoiseModelError> {
        let path = path.as_ref();
        create_parent(path)?;
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self, NoiseModelError> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Write one `filter,c0,...,c8` row per filter.
    pub fn save_csv<P: AsRef<Path>>(&self, path: P) -> Result<(), NoiseModelError> {
        let path = path.as_ref();
        create_parent(path)?;
        let mut writer = csv::Writer::from_path(path)?;

        let mut header = vec!["filter".to_string()];
        header.extend((0..COEFFICIENT_COUNT).map(|i| format!("c{i}")));
        writer.write_record(&header)?;

        for (filter, coefficients) in &self.curves {
            let mut record = vec![filter.to_string()];
            record.extend(coefficients.iter().map(|c| format!("{c:e}")));
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn load_csv<P: AsRef<Path>>(path: P) -> Result<Self, NoiseModelError> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut model = Self::new();

        for record in reader.records() {
            let record = record?;
            let mut fields = record.iter();
            let filter_field = fields.next().unwrap_or_default().trim();
            let mut chars = filter_field.chars();
            let filter = match (chars.next(), chars.next()) {
                (Some(c), None) => c,
                _ => return Err(NoiseModelError::InvalidFilter(filter_field.to_string())),
            };

            let values = fields
                .map(|v| {
                    v.trim()
                        .parse::<f64>()
                        .map_err(|_| NoiseModelError::InvalidCoefficient {
                            filter: filter.to_string(),
                            value: v.to_string(),
                        })
                })
                .collect::<Result<Vec<f64>, _>>()?;

            let coefficients: Coefficients =
                values
                    .as_slice()
                    .try_into()
                    .map_err(|_| NoiseModelError::WrongLength {
                        filter: filter.to_string(),
                        found: values.len(),
                    })?;
            model.insert(filter, coefficients);
        }
        Ok(model)
    }
}

impl NoiseModel for NoiseModelCoefficients {
    fn band(&self, filter: FilterCode, magnitude: f64) -> Option<f64> {
        self.scatter(filter, magnitude).map(|s| BAND_SIGMA * s)
    }

    fn supports(&self, filter: FilterCode) -> bool {
        self.curves.contains_key(&filter)
    }
}

fn create_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

/// Evaluate a polynomial given highest power first.
pub fn horner(coefficients: &[f64], x: f64) -> f64 {
    coefficients.iter().fold(0.0, |acc, &c| acc * x + c)
}

/// Least squares polynomial fit of `y` against `x`, highest power first.
///
/// The abscissa is mapped onto [-1, 1] before building the Vandermonde
/// matrix so the SVD stays well conditioned at survey magnitudes; the fitted
/// coefficients are expanded back into powers of `x`.
///
/// # Arguments
/// * `x` - Abscissa values (magnitudes)
/// * `y` - Ordinate values (scatter)
/// * `degree` - Polynomial degree, at most [`NOISE_MODEL_DEGREE`]
///
/// # Returns
/// * `Ok(Vec<f64>)` - `degree + 1` coefficients, highest power first
/// * `Err(FitError)` - Too few points, mismatched or non-finite input, or a failed solve
pub fn fit_polynomial(x: &[f64], y: &[f64], degree: usize) -> Result<Vec<f64>, FitError> {
    if degree > NOISE_MODEL_DEGREE {
        return Err(FitError::DegreeTooHigh(degree));
    }
    if x.len() != y.len() {
        return Err(FitError::LengthMismatch(x.len(), y.len()));
    }
    let n = x.len();
    if n < degree + 1 {
        return Err(FitError::TooFewPoints {
            degree,
            needed: degree + 1,
            got: n,
        });
    }
    if x.iter().chain(y).any(|v| !v.is_finite()) {
        return Err(FitError::NonFinite);
    }

    let (lo, hi) = x
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let centre = 0.5 * (hi + lo);
    let half_width = if hi > lo { 0.5 * (hi - lo) } else { 1.0 };

    // Columns ordered lowest power first in the scaled variable
    let cols = degree + 1;
    let a_matrix = DMatrix::from_fn(n, cols, |row, col| {
        ((x[row] - centre) / half_width).powi(col as i32)
    });
    let b = DVector::from_column_slice(y);

    let svd = a_matrix.svd(true, true);
    let scaled = svd
        .solve(&b, 1e-12)
        .map_err(|e| FitError::Solve(e.to_string()))?;

    // p(x) = sum_j a_j ((x - c) / s)^j, expanded into ascending powers of x
    let mut ascending = vec![0.0; cols];
    for (j, a_j) in scaled.iter().enumerate() {
        let scale = a_j / half_width.powi(j as i32);
        for (i, term) in ascending.iter_mut().enumerate().take(j + 1) {
            *term += scale * binomial(j, i) * (-centre).powi((j - i) as i32);
        }
    }
    ascending.reverse();
    Ok(ascending)
}

/// Fit a curve and left-pad it with zeros to the stored degree.
pub fn fit_noise_curve(x: &[f64], y: &[f64], degree: usize) -> Result<Coefficients, FitError> {
    let fitted = fit_polynomial(x, y, degree)?;
    let mut coefficients = [0.0; COEFFICIENT_COUNT];
    coefficients[COEFFICIENT_COUNT - fitted.len()..].copy_from_slice(&fitted);
    Ok(coefficients)
}

fn binomial(n: usize, k: usize) -> f64 {
    (0..k).fold(1.0, |acc, i| acc * (n - i) as f64 / (i + 1) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tempfile::TempDir;

    fn leading_one() -> Coefficients {
        let mut c = [0.0; COEFFICIENT_COUNT];
        c[0] = 1.0;
        c
    }

    fn sample_model() -> NoiseModelCoefficients {
        NoiseModelCoefficients::new()
            .with_curve('g', [1.5e-9, -2.0e-7, 1.1e-5, -3.3e-4, 5.9e-3, -6.3e-2, 0.41, -1.5, 2.3])
            .with_curve('r', [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0e-3, -2.0e-2, 0.15])
    }

    #[test]
    fn test_leading_coefficient_band() {
        let model = NoiseModelCoefficients::new().with_curve('g', leading_one());
        assert_relative_eq!(model.evaluate('g', 2.0), 768.0);
    }

    #[test]
    fn test_unsupported_filter_is_zero() {
        let model = NoiseModelCoefficients::new().with_curve('g', leading_one());
        assert!(!model.supports('i'));
        assert_eq!(model.band('i', 15.0), None);
        assert_eq!(model.evaluate('i', 15.0), 0.0);
    }

    #[test]
    fn test_horner_matches_power_sum() {
        let model = sample_model();
        let c = model.get('g').unwrap();
        for m in [12.0, 15.5, 18.25, 21.0] {
            let direct: f64 = c
                .iter()
                .enumerate()
                .map(|(k, ck)| ck * f64::powi(m, (NOISE_MODEL_DEGREE - k) as i32))
                .sum();
            assert_relative_eq!(model.evaluate('g', m), 3.0 * direct, max_relative = 1e-9);
        }
    }

    #[test]
    fn test_fit_recovers_quadratic() {
        let x: Vec<f64> = (0..20).map(|i| 12.0 + 0.5 * i as f64).collect();
        let y: Vec<f64> = x.iter().map(|m| 1.0e-3 * m * m - 2.0e-2 * m + 0.15).collect();

        let c = fit_polynomial(&x, &y, 2).unwrap();
        assert_eq!(c.len(), 3);
        assert_relative_eq!(c[0], 1.0e-3, max_relative = 1e-6);
        assert_relative_eq!(c[1], -2.0e-2, max_relative = 1e-6);
        assert_relative_eq!(c[2], 0.15, max_relative = 1e-6);
    }

    #[test]
    fn test_degree_eight_curve_reproduces_points() {
        let x: Vec<f64> = (0..40).map(|i| 12.0 + 0.25 * i as f64).collect();
        let y: Vec<f64> = x
            .iter()
            .map(|m| 0.01 + 1.0e-4 * f64::exp(0.6 * (m - 12.0)))
            .collect();

        let coefficients = fit_noise_curve(&x, &y, NOISE_MODEL_DEGREE).unwrap();
        let model = NoiseModelCoefficients::new().with_curve('r', coefficients);
        for (m, s) in x.iter().zip(&y) {
            assert_relative_eq!(model.scatter('r', *m).unwrap(), *s, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_low_degree_fit_is_padded() {
        let x = [14.0, 16.0, 18.0];
        let y = [0.02, 0.03, 0.04];
        let c = fit_noise_curve(&x, &y, 1).unwrap();
        assert!(c[..7].iter().all(|v| *v == 0.0));
        assert_relative_eq!(c[7], 0.005, max_relative = 1e-9);
        assert_relative_eq!(c[8], -0.05, epsilon = 1e-9);
    }

    #[test]
    fn test_fit_rejects_too_few_points() {
        let err = fit_polynomial(&[1.0, 2.0], &[1.0, 2.0], 2).unwrap_err();
        assert_eq!(
            err,
            FitError::TooFewPoints {
                degree: 2,
                needed: 3,
                got: 2
            }
        );
        assert_eq!(
            fit_polynomial(&[1.0], &[1.0, 2.0], 0).unwrap_err(),
            FitError::LengthMismatch(1, 2)
        );
    }

    #[test]
    fn test_json_and_csv_round_trip() {
        let dir = TempDir::new().unwrap();
        let model = sample_model();

        let json_path = dir.path().join("model.json");
        model.save_json(&json_path).unwrap();
        assert_eq!(NoiseModelCoefficients::load_json(&json_path).unwrap(), model);

        let csv_path = dir.path().join("model.csv");
        model.save_csv(&csv_path).unwrap();
        let loaded = NoiseModelCoefficients::load_csv(&csv_path).unwrap();
        assert_eq!(loaded.filters().collect::<Vec<_>>(), vec!['g', 'r']);
        for (a, b) in loaded.get('g').unwrap().iter().zip(model.get('g').unwrap()) {
            assert_relative_eq!(*a, *b);
        }
    }

    #[test]
    fn test_csv_wrong_length_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("short.csv");
        std::fs::write(&path, "filter,c0,c1\ng,1.0,2.0\n").unwrap();
        match NoiseModelCoefficients::load_csv(&path) {
            Err(NoiseModelError::WrongLength { found, .. }) => assert_eq!(found, 2),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
