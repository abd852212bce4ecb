//! Lightcurve analysis core.
//!
//! Turns flat per-object measurement tables retrieved from survey archives into
//! per-filter summary statistics, checks them against a magnitude dependent
//! noise model, and builds that noise model from a large sample of reference
//! stars.
//!
//! # Modules
//!
//! - [`archive`]: field naming conventions of each supported survey archive
//! - [`table`]: measurement rows, grouping by filter and primary id resolution
//! - [`stats`]: grouped robust statistics and inter-observation cadence
//! - [`noise_model`]: magnitude to 3-sigma scatter curves, fitting and persistence
//! - [`outlier`]: per-point band tagging and the outlier acceptance policy
//! - [`calibrate`]: iterative sigma clipping over magnitude binned reference stars
//! - [`config`]: validated thresholds and calibration parameters
//!
//! Nothing in this crate touches the network; retrieval and caching live in
//! the `lcextract` crate.

pub mod archive;
pub mod calibrate;
pub mod config;
pub mod noise_model;
pub mod outlier;
pub mod stats;
pub mod table;

pub use archive::{ArchiveDescriptor, FilterCode};
pub use calibrate::{
    CalibrationOutcome, CalibrationRow, CalibrationTable, ReferenceBin, ReferenceCalibrator,
    ScatterSample,
};
pub use config::{CalibrationConfig, ConfigError, FieldCheckConfig, LightcurveConfig, Thresholds};
pub use noise_model::{NoiseModel, NoiseModelCoefficients};
pub use outlier::{OutlierClassifier, OutlierTag, OutlierVerdict};
pub use stats::{CadenceStats, PerFilterStats, SeriesStats};
pub use table::{Measurement, MeasurementTable};
