//! Calibration table: one row per magnitude bin and filter.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::CalibrationOutcome;
use crate::archive::FilterCode;
use crate::noise_model::{fit_noise_curve, FitError, NoiseModelCoefficients};

#[derive(Error, Debug)]
pub enum CalibrationError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Fit failed for filter {filter}: {source}")]
    Fit {
        filter: FilterCode,
        #[source]
        source: FitError,
    },
    #[error("No filter had enough calibration rows to fit a degree {0} curve")]
    NothingFitted(usize),
}

/// Converged scatter statistics of one magnitude bin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRow {
    /// Bin centre magnitude
    pub mag: f64,
    pub filter: FilterCode,
    pub total_samples: usize,
    pub median_of_sd: f64,
    pub sd_of_sd: f64,
    pub mean_of_sd: f64,
    pub used_samples: usize,
    pub mean_samples_lc: f64,
}

impl CalibrationRow {
    pub fn from_outcome(mag: f64, filter: FilterCode, outcome: &CalibrationOutcome) -> Self {
        Self {
            mag,
            filter,
            total_samples: outcome.total_samples,
            median_of_sd: outcome.stats.median_of_sd,
            sd_of_sd: outcome.stats.sd_of_sd,
            mean_of_sd: outcome.stats.mean_of_sd,
            used_samples: outcome.used_samples,
            mean_samples_lc: outcome.stats.mean_samples_lc,
        }
    }
}

/// Magnitude to scatter calibration, ordered by filter then ascending magnitude.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalibrationTable {
    rows: Vec<CalibrationRow>,
}

impl CalibrationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, row: CalibrationRow) {
        self.rows.push(row);
    }

    pub fn extend<I: IntoIterator<Item = CalibrationRow>>(&mut self, rows: I) {
        self.rows.extend(rows);
    }

    pub fn rows(&self) -> &[CalibrationRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Drop bins whose scatter of scatter is zero (single star or no data).
    pub fn remove_blanks(&mut self) {
        let before = self.rows.len();
        self.rows.retain(|r| r.sd_of_sd != 0.0);
        log::debug!("Removed {} blank calibration rows", before - self.rows.len());
    }

    /// Filters present, in first-seen order.
    pub fn filters(&self) -> Vec<FilterCode> {
        let mut filters = Vec::new();
        for row in &self.rows {
            if !filters.contains(&row.filter) {
                filters.push(row.filter);
            }
        }
        filters
    }

    /// (bin magnitude, median scatter) pairs of one filter.
    pub fn points(&self, filter: FilterCode) -> (Vec<f64>, Vec<f64>) {
        self.rows
            .iter()
            .filter(|r| r.filter == filter && r.mag.is_finite() && r.median_of_sd.is_finite())
            .map(|r| (r.mag, r.median_of_sd))
            .unzip()
    }

    /// Fit a noise curve of `degree` to each filter's median scatter.
    ///
    /// Filters with too few rows are skipped with a warning and stay
    /// unsupported in the returned model.
    pub fn fit_noise_model(&self, degree: usize) -> Result<NoiseModelCoefficients, CalibrationError> {
        let mut model = NoiseModelCoefficients::new();
        for filter in self.filters() {
            let (mags, scatter) = self.points(filter);
            match fit_noise_curve(&mags, &scatter, degree) {
                Ok(coefficients) => {
                    log::info!("Fitted degree {degree} noise curve for filter {filter}");
                    model.insert(filter, coefficients);
                }
                Err(FitError::TooFewPoints { got, needed, .. }) => {
                    log::warn!(
                        "Skipping noise curve for filter {filter}: {got} rows, {needed} needed"
                    );
                }
                Err(source) => return Err(CalibrationError::Fit { filter, source }),
            }
        }
        if model.is_empty() {
            return Err(CalibrationError::NothingFitted(degree));
        }
        Ok(model)
    }

    pub fn save_csv<P: AsRef<Path>>(&self, path: P) -> Result<(), CalibrationError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(path)?;
        for row in &self.rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn load_csv<P: AsRef<Path>>(path: P) -> Result<Self, CalibrationError> {
        let mut reader = csv::Reader::from_path(path)?;
        let rows = reader
            .deserialize()
            .collect::<Result<Vec<CalibrationRow>, csv::Error>>()?;
        Ok(Self { rows })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::noise_model::NoiseModel;
    use approx::assert_relative_eq;
    use tempfile::TempDir;

    fn row(mag: f64, filter: char, median_of_sd: f64, sd_of_sd: f64) -> CalibrationRow {
        CalibrationRow {
            mag,
            filter,
            total_samples: 20,
            median_of_sd,
            sd_of_sd,
            mean_of_sd: median_of_sd,
            used_samples: 18,
            mean_samples_lc: 250.0,
        }
    }

    fn linear_table() -> CalibrationTable {
        let mut table = CalibrationTable::new();
        for i in 0..8 {
            let mag = 14.0 + 0.5 * i as f64;
            table.push(row(mag, 'g', 0.01 * mag - 0.1, 0.005));
            table.push(row(mag, 'r', 0.02 * mag - 0.2, 0.004));
        }
        table
    }

    #[test]
    fn test_remove_blanks() {
        let mut table = linear_table();
        table.push(row(20.0, 'g', 0.3, 0.0));
        assert_eq!(table.len(), 17);
        table.remove_blanks();
        assert_eq!(table.len(), 16);
        assert!(table.rows().iter().all(|r| r.sd_of_sd != 0.0));
    }

    #[test]
    fn test_fit_linear_model() {
        let model = linear_table().fit_noise_model(1).unwrap();
        assert!(model.supports('g') && model.supports('r'));
        assert_relative_eq!(model.scatter('g', 16.0).unwrap(), 0.06, epsilon = 1e-9);
        assert_relative_eq!(model.evaluate('r', 16.0), 3.0 * 0.12, epsilon = 1e-9);
    }

    #[test]
    fn test_sparse_filter_skipped() {
        let mut table = linear_table();
        table.push(row(15.0, 'i', 0.05, 0.01));
        let model = table.fit_noise_model(2).unwrap();
        assert!(!model.supports('i'));

        let mut sparse = CalibrationTable::new();
        sparse.push(row(15.0, 'g', 0.05, 0.01));
        assert!(matches!(
            sparse.fit_noise_model(2),
            Err(CalibrationError::NothingFitted(2))
        ));
    }

    #[test]
    fn test_csv_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("calibration.csv");
        let table = linear_table();
        table.save_csv(&path).unwrap();

        let header = std::fs::read_to_string(&path).unwrap();
        assert!(header.starts_with(
            "mag,filter,total_samples,median_of_sd,sd_of_sd,mean_of_sd,used_samples,mean_samples_lc"
        ));
        assert_eq!(CalibrationTable::load_csv(&path).unwrap(), table);
    }
}
