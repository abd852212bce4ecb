//! Brightness summary of one filter group.

use serde::{Deserialize, Serialize};

use super::scan;

/// Percentile whose distance below the median gives the one-sided scatter.
pub const ALT_SD_PERCENTILE: f64 = 16.0;

/// Summary statistics of one group of magnitudes.
///
/// Non-finite magnitudes are skipped, so `count` is the number of usable
/// measurements. With no usable measurements every statistic is NaN; with
/// one, the standard deviation is NaN.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesStats {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    /// Sample standard deviation (N-1)
    pub std_dev: f64,
    /// Median absolute deviation, unscaled
    pub mad: f64,
    /// Median minus the 16th percentile
    pub alt_sd: f64,
}

impl SeriesStats {
    pub fn from_values(values: &[f64]) -> Self {
        let finite = scan::finite_values(values);
        let median = scan::median(&finite);
        Self {
            count: finite.len(),
            mean: scan::mean(&finite),
            median,
            std_dev: scan::sample_std(&finite),
            mad: scan::median_abs_deviation(&finite),
            alt_sd: median - scan::percentile(&finite, ALT_SD_PERCENTILE),
        }
    }

    /// Whether the group can take part in band based classification.
    pub fn is_classifiable(&self) -> bool {
        self.count > 0 && self.median.is_finite()
    }
}
