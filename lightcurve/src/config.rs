//! Analysis configuration.
//!
//! All tunables live in one [`LightcurveConfig`] value that is loaded once,
//! validated eagerly, and passed to each entry point. Missing JSON fields
//! take their defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::archive::{self, ArchiveDescriptor};
use crate::noise_model::NOISE_MODEL_DEGREE;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Outlier acceptance thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Minimum outlier count to report
    pub count_min: usize,
    /// Maximum outlier count to report
    pub count_max: usize,
    /// Maximum outlier count as a fraction of the sample count
    pub count_pc: f64,
    /// Magnitude scaling factor, carried for display and plotting
    pub mag_scalar: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            count_min: 1,
            count_max: 30,
            count_pc: 0.1,
            mag_scalar: 1.0,
        }
    }
}

/// Reference calibration parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Clip width in units of scatter of scatter
    pub sigma: f64,
    /// Magnitude bin width
    pub step_mag: f64,
    /// Upper bound on clipping iterations per bin
    pub max_cycles: usize,
    pub min_mag: f64,
    pub max_mag: f64,
    /// Degree of the fitted noise curve
    pub fit_degree: usize,
    /// Reference stars requested per magnitude bin
    pub sample_size: usize,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            sigma: 3.0,
            step_mag: 0.25,
            max_cycles: 4,
            min_mag: 12.0,
            max_mag: 25.0,
            fit_degree: NOISE_MODEL_DEGREE,
            sample_size: 200,
        }
    }
}

/// Windows for the same-exposure field comparison of an outlier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldCheckConfig {
    /// Search radius around the target for field objects
    pub radius_arcsec: f64,
    /// Half width of the accepted magnitude range around the outlier
    pub mag_window: f64,
    /// Half width of the accepted MJD range around the outlier, in days
    pub time_window_days: f64,
}

impl Default for FieldCheckConfig {
    fn default() -> Self {
        Self {
            radius_arcsec: 180.0,
            mag_window: 0.5,
            time_window_days: 0.0001,
        }
    }
}

impl FieldCheckConfig {
    pub fn radius_deg(&self) -> f64 {
        self.radius_arcsec / 3600.0
    }
}

/// Complete analysis configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightcurveConfig {
    pub thresholds: Thresholds,
    pub calibration: CalibrationConfig,
    pub field_check: FieldCheckConfig,
    /// Filters to analyse
    pub filter_selection: String,
    /// Filters never classified for outliers
    pub disabled_filters: String,
    /// Cone search radius for archive queries
    pub cone_radius_arcsec: f64,
    /// Archive short codes to query, in order
    pub archives: String,
}

impl Default for LightcurveConfig {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            calibration: CalibrationConfig::default(),
            field_check: FieldCheckConfig::default(),
            filter_selection: "grizy".to_string(),
            disabled_filters: "i".to_string(),
            cone_radius_arcsec: 5.0,
            archives: "z".to_string(),
        }
    }
}

impl LightcurveConfig {
    /// Load from a JSON file and validate.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` when given, otherwise use validated defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::load(p),
            None => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Archives to query, in configured order.
    pub fn archive_list(&self) -> Result<Vec<&'static ArchiveDescriptor>, ConfigError> {
        self.archives
            .chars()
            .map(|c| {
                ArchiveDescriptor::by_code(c)
                    .ok_or_else(|| ConfigError::Invalid(format!("unknown archive code '{c}'")))
            })
            .collect()
    }

    /// Cone search radius in degrees.
    pub fn cone_radius_deg(&self) -> f64 {
        self.cone_radius_arcsec / 3600.0
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.thresholds;
        if t.count_min > t.count_max {
            return Err(ConfigError::Invalid(format!(
                "count_min ({}) exceeds count_max ({})",
                t.count_min, t.count_max
            )));
        }
        if !(0.0..=1.0).contains(&t.count_pc) {
            return Err(ConfigError::Invalid(format!(
                "count_pc must lie in [0, 1], got {}",
                t.count_pc
            )));
        }
        if !(t.mag_scalar > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "mag_scalar must be positive, got {}",
                t.mag_scalar
            )));
        }

        let c = &self.calibration;
        if !(c.sigma > 0.0) {
            return Err(ConfigError::Invalid(format!("sigma must be positive, got {}", c.sigma)));
        }
        if !(c.step_mag > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "step_mag must be positive, got {}",
                c.step_mag
            )));
        }
        if c.max_cycles == 0 {
            return Err(ConfigError::Invalid("max_cycles must be at least 1".to_string()));
        }
        if !(c.min_mag < c.max_mag) {
            return Err(ConfigError::Invalid(format!(
                "min_mag ({}) must be below max_mag ({})",
                c.min_mag, c.max_mag
            )));
        }
        if c.fit_degree == 0 || c.fit_degree > NOISE_MODEL_DEGREE {
            return Err(ConfigError::Invalid(format!(
                "fit_degree must lie in 1..={NOISE_MODEL_DEGREE}, got {}",
                c.fit_degree
            )));
        }
        if c.sample_size == 0 {
            return Err(ConfigError::Invalid("sample_size must be at least 1".to_string()));
        }

        let f = &self.field_check;
        for (name, value) in [
            ("radius_arcsec", f.radius_arcsec),
            ("mag_window", f.mag_window),
            ("time_window_days", f.time_window_days),
        ] {
            if !(value > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "field_check.{name} must be positive, got {value}"
                )));
            }
        }

        if self.filter_selection.is_empty() {
            return Err(ConfigError::Invalid("filter_selection is empty".to_string()));
        }
        for f in self.filter_selection.chars().chain(self.disabled_filters.chars()) {
            if !archive::is_known_filter(f) {
                return Err(ConfigError::Invalid(format!("unknown filter '{f}'")));
            }
        }
        if !(self.cone_radius_arcsec > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "cone_radius_arcsec must be positive, got {}",
                self.cone_radius_arcsec
            )));
        }
        if self.archives.is_empty() {
            return Err(ConfigError::Invalid("no archives selected".to_string()));
        }
        self.archive_list()?;
        Ok(())
    }
}
