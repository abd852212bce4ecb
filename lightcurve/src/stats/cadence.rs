//! Inter-observation gap statistics.

use serde::{Deserialize, Serialize};

use super::scan;

/// Statistics of the time gaps between consecutive observations, in days.
///
/// Groups with no computable gap report zero for every field rather than NaN.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CadenceStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
}

impl CadenceStats {
    /// Sort `times` ascending and summarise the consecutive differences.
    pub fn from_times(times: &[f64]) -> Self {
        let sorted_times = {
            let mut t = scan::finite_values(times);
            t.sort_by(f64::total_cmp);
            t
        };
        let gaps: Vec<f64> = sorted_times.windows(2).map(|w| w[1] - w[0]).collect();

        let Some((min, max)) = scan::min_max(&gaps) else {
            return Self::default();
        };

        // A single gap has no spread
        let std_dev = if gaps.len() < 2 {
            0.0
        } else {
            scan::sample_std(&gaps)
        };

        Self {
            min,
            max,
            mean: scan::mean(&gaps),
            median: scan::median(&gaps),
            std_dev,
        }
    }
}
