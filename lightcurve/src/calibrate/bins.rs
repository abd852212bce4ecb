//! Magnitude binning of reference stars.

use crate::stats::scan;

/// Span of magnitude bins covering a set of reference magnitudes.
///
/// `min` is truncated down onto the step grid and `max` is the grid point
/// above the largest magnitude, so every magnitude falls inside the span.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MagnitudeRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl MagnitudeRange {
    /// Range covering every finite value in `mags`, `None` when there are none.
    pub fn covering(mags: &[f64], step: f64) -> Option<Self> {
        if !(step > 0.0) {
            return None;
        }
        let (lo, hi) = scan::min_max(&scan::finite_values(mags))?;
        let per_mag = (1.0 / step).trunc().max(1.0);
        Some(Self {
            min: (lo * per_mag).trunc() / per_mag,
            max: ((hi * per_mag).trunc() + 1.0) / per_mag,
            step,
        })
    }

    /// Number of whole steps in the range.
    pub fn bin_count(&self) -> usize {
        ((self.max - self.min) / self.step).trunc() as usize
    }

    /// Bin centres `min, min + step, ...` strictly below `max`, ascending.
    pub fn centres(&self) -> Vec<f64> {
        let n = ((self.max - self.min) / self.step).ceil().max(0.0) as usize;
        (0..n).map(|k| self.min + k as f64 * self.step).collect()
    }
}

/// Whether `mag` lies in the bin centred on `centre`, both edges inclusive.
pub fn in_bin(centre: f64, step: f64, mag: f64) -> bool {
    let half = step / 2.0;
    mag >= centre - half && mag <= centre + half
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_range_snaps_to_grid() {
        let range = MagnitudeRange::covering(&[14.37, 16.1, f64::NAN, 15.0], 0.25).unwrap();
        assert_relative_eq!(range.min, 14.25);
        assert_relative_eq!(range.max, 16.25);
        assert_eq!(range.bin_count(), 8);
        let centres = range.centres();
        assert_eq!(centres.len(), 8);
        assert_relative_eq!(centres[0], 14.25);
        assert_relative_eq!(centres[7], 16.0);
    }

    #[test]
    fn test_exact_grid_value_gets_extra_bin() {
        let range = MagnitudeRange::covering(&[15.0], 0.5).unwrap();
        assert_relative_eq!(range.min, 15.0);
        assert_relative_eq!(range.max, 15.5);
        assert_eq!(range.centres(), vec![15.0]);
    }

    #[test]
    fn test_no_finite_magnitudes() {
        assert!(MagnitudeRange::covering(&[], 0.25).is_none());
        assert!(MagnitudeRange::covering(&[f64::NAN], 0.25).is_none());
        assert!(MagnitudeRange::covering(&[15.0], 0.0).is_none());
    }

    #[test]
    fn test_bin_edges_inclusive() {
        assert!(in_bin(15.0, 0.25, 14.875));
        assert!(in_bin(15.0, 0.25, 15.125));
        assert!(!in_bin(15.0, 0.25, 15.126));
        // A magnitude on a shared edge belongs to both neighbours
        assert!(in_bin(15.25, 0.25, 15.125));
    }
}
