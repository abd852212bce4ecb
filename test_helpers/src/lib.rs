//! Shared test infrastructure for the lightcurve workspace.
//!
//! Integration tests across the workspace need the same few things: a
//! stable place to write artefacts they want to keep for inspection, and
//! reproducible synthetic photometry. This crate provides both.
//!
//! # Project paths
//!
//! [`find_project_root`] walks up from the current directory to the Cargo
//! workspace root, so tests behave the same whether run from the workspace or
//! from a member crate. [`output_path`] builds paths under
//! `<root>/test_output/`, creating the directory on first use:
//!
//! ```text
//! test_output/
//! ├── calibration/      # Calibration tables and fitted noise models
//! └── lightcurves/      # Synthetic measurement tables
//! ```
//!
//! # Synthetic data
//!
//! All generators take an explicit seed and use [`StdRng`], so the same call
//! always yields the same values:
//!
//! - [`truncated_normal`]: normal draws restricted to `|z| < max_z`
//! - [`contaminated_scatter_sample`]: per-star scatter values for one
//!   magnitude bin, a clean population plus injected high-scatter stars
//! - [`synthetic_lightcurve`]: constant-brightness lightcurve with Gaussian
//!   noise and irregular cadence
//!
//! ```rust
//! use test_helpers::contaminated_scatter_sample;
//!
//! let sds = contaminated_scatter_sample(95, 5, 0.05, 0.005, 10.0, 42);
//! assert_eq!(sds.len(), 100);
//! ```

use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::env;
use std::path::{Path, PathBuf};

/// Errors raised while setting up test infrastructure.
#[derive(thiserror::Error, Debug)]
pub enum TestHelperError {
    /// No Cargo.toml with a `[workspace]` section above the current directory.
    #[error("Failed to find project root: {0}")]
    ProjectRootNotFound(String),
}

/// Locate the workspace root by walking up to the first Cargo.toml that
/// declares `[workspace]`.
///
/// # Returns
/// * `Ok(PathBuf)` - Absolute path to the workspace root
/// * `Err(TestHelperError)` - No workspace manifest found, or it was unreadable
pub fn find_project_root() -> Result<PathBuf, TestHelperError> {
    let mut current_dir = env::current_dir().map_err(|e| {
        TestHelperError::ProjectRootNotFound(format!("Failed to get current directory: {}", e))
    })?;

    loop {
        let cargo_toml = current_dir.join("Cargo.toml");
        if cargo_toml.exists() {
            let content = std::fs::read_to_string(&cargo_toml).map_err(|e| {
                TestHelperError::ProjectRootNotFound(format!("Failed to read Cargo.toml: {}", e))
            })?;

            if content.contains("[workspace]") {
                return Ok(current_dir);
            }
        }

        if !current_dir.pop() {
            break;
        }
    }

    Err(TestHelperError::ProjectRootNotFound(
        "Workspace root not found".to_string(),
    ))
}

static PROJECT_ROOT: Lazy<PathBuf> =
    Lazy::new(|| find_project_root().expect("Failed to find project root directory"));

/// `<root>/test_output`, created if missing.
pub fn get_output_dir() -> PathBuf {
    let output_dir = PROJECT_ROOT.join("test_output");

    if !output_dir.exists() {
        std::fs::create_dir_all(&output_dir).expect("Failed to create output directory");
    }

    output_dir
}

/// Path inside the test output directory.
///
/// Parent directories of nested paths are not created; use
/// [`output_path_in`] for that.
pub fn output_path<P: AsRef<Path>>(path: P) -> PathBuf {
    get_output_dir().join(path)
}

/// Path to `file` inside `subdir` of the test output directory, creating `subdir`.
pub fn output_path_in<P: AsRef<Path>>(subdir: &str, file: P) -> PathBuf {
    let dir = get_output_dir().join(subdir);
    std::fs::create_dir_all(&dir).expect("Failed to create output subdirectory");
    dir.join(file)
}

/// `n` normal draws with the given mean and standard deviation, keeping only
/// values within `max_z` standard deviations of the mean.
///
/// Truncation makes sigma clipping tests deterministic: no clean draw can
/// land far enough out to be clipped by a 3-sigma cut.
pub fn truncated_normal(n: usize, mean: f64, sd: f64, max_z: f64, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, 1.0).expect("unit normal is valid");

    let mut values = Vec::with_capacity(n);
    while values.len() < n {
        let z: f64 = normal.sample(&mut rng);
        if z.abs() < max_z {
            values.push(mean + z * sd);
        }
    }
    values
}

/// Per-star scatter values for one magnitude bin.
///
/// `n_clean` values come from a normal of `mean`, `sd` truncated at 2 sigma;
/// `n_outliers` values sit at `mean + outlier_sigmas * sd`. Outliers are
/// appended after the clean values.
pub fn contaminated_scatter_sample(
    n_clean: usize,
    n_outliers: usize,
    mean: f64,
    sd: f64,
    outlier_sigmas: f64,
    seed: u64,
) -> Vec<f64> {
    let mut values = truncated_normal(n_clean, mean, sd, 2.0, seed);
    values.extend(std::iter::repeat(mean + outlier_sigmas * sd).take(n_outliers));
    values
}

/// One synthetic photometric point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyntheticPoint {
    pub mjd: f64,
    pub mag: f64,
    pub magerr: f64,
}

/// Constant-brightness lightcurve.
///
/// Gaps between observations are uniform in `[0.5, 1.5] * cadence_days`.
/// Magnitudes scatter normally around `mag` with `noise_sd`; every point
/// reports `magerr` as its error.
pub fn synthetic_lightcurve(
    n: usize,
    start_mjd: f64,
    cadence_days: f64,
    mag: f64,
    noise_sd: f64,
    magerr: f64,
    seed: u64,
) -> Vec<SyntheticPoint> {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, noise_sd.max(0.0)).expect("noise sd is valid");

    let mut mjd = start_mjd;
    (0..n)
        .map(|_| {
            let point = SyntheticPoint {
                mjd,
                mag: mag + noise.sample(&mut rng),
                magerr,
            };
            mjd += cadence_days * rng.random_range(0.5..1.5);
            point
        })
        .collect()
}
