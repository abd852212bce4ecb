//! Reference star noise calibration.
//!
//! The scatter of a genuinely constant star's lightcurve is the instrumental
//! noise floor at that star's brightness. A raw sample of reference stars is
//! contaminated by variables, blends and artefacts, so within each magnitude
//! bin the per-star scatter values are sigma clipped around their median
//! until the surviving set stops changing:
//!
//! ```text
//! seed:    median, sd, mean of per-star SD over the bin
//! repeat:  drop stars with SD outside median ± sigma * sd
//!          stop if nobody survives (keep previous stats)
//!          stop if the survivor count did not change
//!          otherwise recompute stats over survivors
//! until max_cycles iterations
//! ```
//!
//! Each bin yields one [`CalibrationRow`]; the rows of all bins form the
//! [`CalibrationTable`] that the noise curve is fitted to.

pub mod bins;
pub mod summary;

use serde::Serialize;

use crate::archive::FilterCode;
use crate::config::CalibrationConfig;
use crate::stats::scan;

pub use bins::{in_bin, MagnitudeRange};
pub use summary::{CalibrationError, CalibrationRow, CalibrationTable};

/// One reference star as seen by the calibration.
#[derive(Debug, Clone, PartialEq)]
pub struct ScatterSample {
    pub id: String,
    /// Time-domain archive reference magnitude used for binning
    pub ref_mag: f64,
    /// Standard deviation of the star's own lightcurve
    pub sd: f64,
    /// Number of lightcurve measurements behind `sd`
    pub samples: usize,
}

/// Bin member with its inclusion flag.
#[derive(Debug, Clone, PartialEq)]
pub struct BinMember {
    pub sample: ScatterSample,
    /// Cleared when the star is clipped; never set again
    pub included: bool,
}

/// Reference stars falling in one magnitude bin of one filter.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceBin {
    pub centre: f64,
    pub half_width: f64,
    members: Vec<BinMember>,
}

impl ReferenceBin {
    pub fn new(centre: f64, step: f64) -> Self {
        Self {
            centre,
            half_width: step / 2.0,
            members: Vec::new(),
        }
    }

    /// Bin populated with every sample inside it.
    pub fn collect<'a, I>(centre: f64, step: f64, samples: I) -> Self
    where
        I: IntoIterator<Item = &'a ScatterSample>,
    {
        let mut bin = Self::new(centre, step);
        for sample in samples {
            if in_bin(centre, step, sample.ref_mag) {
                bin.push(sample.clone());
            }
        }
        bin
    }

    pub fn push(&mut self, sample: ScatterSample) {
        self.members.push(BinMember {
            sample,
            included: true,
        });
    }

    pub fn members(&self) -> &[BinMember] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn included_count(&self) -> usize {
        self.members.iter().filter(|m| m.included).count()
    }

    /// Members still inside the clip limits.
    pub fn included(&self) -> impl Iterator<Item = &ScatterSample> + '_ {
        self.members.iter().filter(|m| m.included).map(|m| &m.sample)
    }
}

/// Median, population standard deviation and mean of per-star scatter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ScatterStats {
    pub median_of_sd: f64,
    pub sd_of_sd: f64,
    pub mean_of_sd: f64,
    /// Mean lightcurve length of the stars the stats were taken over
    pub mean_samples_lc: f64,
}

impl ScatterStats {
    fn from_samples<'a, I>(samples: I) -> Self
    where
        I: IntoIterator<Item = &'a ScatterSample>,
    {
        let (sds, counts): (Vec<f64>, Vec<f64>) = samples
            .into_iter()
            .map(|s| (s.sd, s.samples as f64))
            .unzip();
        let sds = scan::finite_values(&sds);
        Self {
            median_of_sd: scan::median(&sds),
            sd_of_sd: scan::population_std(&sds),
            mean_of_sd: scan::mean(&sds),
            mean_samples_lc: scan::mean(&counts),
        }
    }
}

/// How the clipping loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    /// No star with a usable scatter value
    NoData,
    /// Survivor count unchanged
    Converged,
    /// Clipping removed every star; previous statistics kept
    Emptied,
    /// Iteration limit reached
    CycleLimit,
}

/// Result of calibrating one bin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CalibrationOutcome {
    pub total_samples: usize,
    pub stats: ScatterStats,
    pub used_samples: usize,
    pub cycles: usize,
    pub stop: StopReason,
}

/// Iterative sigma clipping over reference bins.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceCalibrator {
    pub sigma: f64,
    pub max_cycles: usize,
}

impl ReferenceCalibrator {
    pub fn new(sigma: f64, max_cycles: usize) -> Self {
        Self { sigma, max_cycles }
    }

    pub fn from_config(config: &CalibrationConfig) -> Self {
        Self::new(config.sigma, config.max_cycles)
    }

    /// Clip one bin in place and return its converged statistics.
    ///
    /// Stars without a finite scatter are excluded up front. Statistics stay
    /// at zero when the bin holds no usable star.
    pub fn calibrate(&self, bin: &mut ReferenceBin) -> CalibrationOutcome {
        for member in &mut bin.members {
            if !member.sample.sd.is_finite() {
                member.included = false;
            }
        }

        let total_samples = bin.len();
        let mut used_samples = bin.members.iter().filter(|m| m.sample.samples != 0).count();
        let any_finite = bin.members.iter().any(|m| m.sample.sd.is_finite());

        if total_samples == 0 || used_samples == 0 || !any_finite {
            return CalibrationOutcome {
                total_samples,
                stats: ScatterStats::default(),
                used_samples,
                cycles: 0,
                stop: StopReason::NoData,
            };
        }

        let mut stats = ScatterStats::from_samples(bin.members.iter().map(|m| &m.sample));
        let mut cycles = 0;
        let mut stop = StopReason::CycleLimit;

        while cycles < self.max_cycles {
            let upper = stats.median_of_sd + self.sigma * stats.sd_of_sd;
            let lower = stats.median_of_sd - self.sigma * stats.sd_of_sd;
            for member in &mut bin.members {
                let sd = member.sample.sd;
                if sd > upper || sd < lower {
                    member.included = false;
                }
            }

            let survivors = bin.included_count();
            if survivors == 0 {
                stop = StopReason::Emptied;
                break;
            }
            if survivors == used_samples {
                stop = StopReason::Converged;
                break;
            }
            used_samples = survivors;
            stats = ScatterStats::from_samples(bin.included());
            cycles += 1;
        }

        log::debug!(
            "Bin {:.3}: {} of {} stars used after {} cycles ({:?}), median SD {:.4}",
            bin.centre,
            used_samples,
            total_samples,
            cycles,
            stop,
            stats.median_of_sd
        );

        CalibrationOutcome {
            total_samples,
            stats,
            used_samples,
            cycles,
            stop,
        }
    }

    /// Calibrate every populated bin of one filter in ascending magnitude order.
    ///
    /// Stars without lightcurve samples are left out before binning. Empty
    /// bins produce no row.
    pub fn calibrate_filter(
        &self,
        filter: FilterCode,
        samples: &[ScatterSample],
        step: f64,
    ) -> Vec<CalibrationRow> {
        self.calibrate_bins(filter, samples, step)
            .into_iter()
            .map(|(row, _)| row)
            .collect()
    }

    /// As [`ReferenceCalibrator::calibrate_filter`], also returning each
    /// clipped bin so callers can see which stars survived.
    pub fn calibrate_bins(
        &self,
        filter: FilterCode,
        samples: &[ScatterSample],
        step: f64,
    ) -> Vec<(CalibrationRow, ReferenceBin)> {
        let observed: Vec<&ScatterSample> = samples.iter().filter(|s| s.samples != 0).collect();
        let mags: Vec<f64> = observed.iter().map(|s| s.ref_mag).collect();
        let Some(range) = MagnitudeRange::covering(&mags, step) else {
            log::info!("No reference stars with samples in filter {filter}");
            return Vec::new();
        };

        range
            .centres()
            .into_iter()
            .filter_map(|centre| {
                let mut bin = ReferenceBin::collect(centre, step, observed.iter().copied());
                if bin.is_empty() {
                    return None;
                }
                let outcome = self.calibrate(&mut bin);
                log::debug!(
                    "Filter {filter} bin {centre:.2}: {} of {} stars used ({:?})",
                    outcome.used_samples,
                    outcome.total_samples,
                    outcome.stop
                );
                Some((CalibrationRow::from_outcome(centre, filter, &outcome), bin))
            })
            .collect()
    }
}
