//! Outlier detection against the noise model band.
//!
//! Each measurement of a filter is compared with the band
//! `median ± band(median)`. A point is an outlier only when its whole 1-sigma
//! error interval lies outside the band. The resulting outlier count then
//! has to pass a count based acceptance policy before the filter is reported
//! as holding real outliers:
//!
//! ```text
//! count_min <= outliers <= count_max   and   outliers <= floor(samples * count_pc)
//! ```
//!
//! Rejections are informational, never errors.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::archive::{ArchiveDescriptor, FilterCode};
use crate::config::Thresholds;
use crate::noise_model::NoiseModel;
use crate::stats::PerFilterStats;
use crate::table::MeasurementTable;

/// Position of one measurement relative to the band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OutlierTag {
    Inside,
    High,
    Low,
}

/// Tag one measurement.
///
/// The high test runs first and the low test may overwrite it. Both can only
/// match when `upper < lower`, i.e. for a negative band.
pub fn tag_measurement(mag: f64, magerr: f64, upper: f64, lower: f64) -> OutlierTag {
    let mut tag = OutlierTag::Inside;
    if mag - magerr >= upper {
        tag = OutlierTag::High;
    }
    if mag + magerr <= lower {
        tag = OutlierTag::Low;
    }
    tag
}

/// Band limits used for one filter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BandLimits {
    pub median: f64,
    pub band: f64,
    pub upper: f64,
    pub lower: f64,
}

impl BandLimits {
    pub fn new(median: f64, band: f64) -> Self {
        Self {
            median,
            band,
            upper: median + band,
            lower: median - band,
        }
    }
}

/// Why a filter was not reported as holding outliers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Rejection {
    /// Filter is switched off for outlier detection
    Disabled,
    /// No fitted noise curve for the filter
    NoNoiseModel,
    /// No finite median to centre the band on
    NoUsableData,
    BelowMinimum { count: usize, min: usize },
    AboveMaximum { count: usize, max: usize },
    AboveFraction { count: usize, limit: usize },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Disabled => write!(f, "filter disabled for outlier detection"),
            Rejection::NoNoiseModel => write!(f, "no noise model for filter"),
            Rejection::NoUsableData => write!(f, "no usable magnitudes"),
            Rejection::BelowMinimum { count, min } => {
                write!(f, "{count} outliers is below the minimum of {min}")
            }
            Rejection::AboveMaximum { count, max } => {
                write!(f, "{count} outliers exceeds the maximum of {max}")
            }
            Rejection::AboveFraction { count, limit } => {
                write!(f, "{count} outliers exceeds the sample fraction limit of {limit}")
            }
        }
    }
}

/// Apply the count based acceptance policy.
pub fn accept_outliers(
    outlier_count: usize,
    samples: usize,
    thresholds: &Thresholds,
) -> Result<(), Rejection> {
    if outlier_count < thresholds.count_min {
        return Err(Rejection::BelowMinimum {
            count: outlier_count,
            min: thresholds.count_min,
        });
    }
    if outlier_count > thresholds.count_max {
        return Err(Rejection::AboveMaximum {
            count: outlier_count,
            max: thresholds.count_max,
        });
    }
    let limit = (samples as f64 * thresholds.count_pc).floor() as usize;
    if outlier_count > limit {
        return Err(Rejection::AboveFraction {
            count: outlier_count,
            limit,
        });
    }
    Ok(())
}

/// Classification of one filter of one object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutlierVerdict {
    pub filter: FilterCode,
    /// True when outliers were found and passed the acceptance policy
    pub outliers_exist: bool,
    pub samples: usize,
    pub outlier_count: usize,
    pub limits: Option<BandLimits>,
    /// Table row index and tag of every row in this filter
    pub tags: Vec<(usize, OutlierTag)>,
    pub rejection: Option<Rejection>,
}

impl OutlierVerdict {
    fn unclassified(filter: FilterCode, samples: usize, rejection: Rejection) -> Self {
        Self {
            filter,
            outliers_exist: false,
            samples,
            outlier_count: 0,
            limits: None,
            tags: Vec::new(),
            rejection: Some(rejection),
        }
    }

    /// Row indices tagged high or low.
    pub fn outlier_rows(&self) -> impl Iterator<Item = usize> + '_ {
        self.tags
            .iter()
            .filter(|(_, tag)| *tag != OutlierTag::Inside)
            .map(|(i, _)| *i)
    }
}

/// Per-filter outlier classifier.
#[derive(Debug, Clone)]
pub struct OutlierClassifier {
    thresholds: Thresholds,
    disabled_filters: Vec<FilterCode>,
}

impl OutlierClassifier {
    pub fn new(thresholds: Thresholds, disabled_filters: &str) -> Self {
        Self {
            thresholds,
            disabled_filters: disabled_filters.chars().collect(),
        }
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Classify every filter present in `table`.
    ///
    /// `stats` must have been computed from the same table. A filter that
    /// cannot be classified gets a `false` verdict with the reason attached;
    /// other filters are unaffected.
    pub fn classify<M: NoiseModel + ?Sized>(
        &self,
        table: &MeasurementTable,
        archive: &ArchiveDescriptor,
        stats: &PerFilterStats,
        model: &M,
    ) -> BTreeMap<FilterCode, OutlierVerdict> {
        table
            .filters_returned()
            .into_iter()
            .map(|f| {
                let verdict = self.classify_filter(table, f, stats, model);
                match (&verdict.rejection, verdict.outliers_exist) {
                    (_, true) => log::info!(
                        "{} {}: {} outliers accepted from {} samples",
                        archive.name,
                        f,
                        verdict.outlier_count,
                        verdict.samples
                    ),
                    (Some(reason), false) => {
                        log::debug!("{} {}: no outliers reported, {}", archive.name, f, reason)
                    }
                    (None, false) => {}
                }
                (f, verdict)
            })
            .collect()
    }

    fn classify_filter<M: NoiseModel + ?Sized>(
        &self,
        table: &MeasurementTable,
        filter: FilterCode,
        stats: &PerFilterStats,
        model: &M,
    ) -> OutlierVerdict {
        let samples = stats.count(filter);

        if self.disabled_filters.contains(&filter) {
            return OutlierVerdict::unclassified(filter, samples, Rejection::Disabled);
        }
        let Some(median) = stats.median(filter) else {
            return OutlierVerdict::unclassified(filter, samples, Rejection::NoUsableData);
        };
        let band = match model.band(filter, median) {
            Some(b) if b.is_finite() => b,
            _ => return OutlierVerdict::unclassified(filter, samples, Rejection::NoNoiseModel),
        };
        if band < 0.0 {
            log::warn!("Negative noise band {band} for filter {filter} at magnitude {median}");
        }
        debug_assert!(band >= 0.0, "noise band must be non-negative");

        let limits = BandLimits::new(median, band);
        let tags: Vec<(usize, OutlierTag)> = table
            .rows()
            .iter()
            .enumerate()
            .filter(|(_, r)| r.filter == filter)
            .map(|(i, r)| (i, tag_measurement(r.mag, r.magerr, limits.upper, limits.lower)))
            .collect();
        let outlier_count = tags.iter().filter(|(_, t)| *t != OutlierTag::Inside).count();

        let rejection = accept_outliers(outlier_count, samples, &self.thresholds).err();
        OutlierVerdict {
            filter,
            outliers_exist: rejection.is_none(),
            samples,
            outlier_count,
            limits: Some(limits),
            tags,
            rejection,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ZTF;
    use crate::noise_model::NoiseModelCoefficients;
    use crate::table::Measurement;

    fn thresholds(count_min: usize, count_max: usize, count_pc: f64) -> Thresholds {
        Thresholds {
            count_min,
            count_max,
            count_pc,
            ..Thresholds::default()
        }
    }

    /// Band of `3 * c` everywhere.
    fn flat_model(filter: char, c: f64) -> NoiseModelCoefficients {
        let mut coefficients = [0.0; 9];
        coefficients[8] = c;
        NoiseModelCoefficients::new().with_curve(filter, coefficients)
    }

    #[test]
    fn test_acceptance_boundary() {
        let t = thresholds(1, 30, 0.1);
        assert_eq!(accept_outliers(10, 100, &t), Ok(()));
        assert_eq!(
            accept_outliers(11, 100, &t),
            Err(Rejection::AboveFraction { count: 11, limit: 10 })
        );
        assert_eq!(
            accept_outliers(0, 100, &t),
            Err(Rejection::BelowMinimum { count: 0, min: 1 })
        );
        assert_eq!(
            accept_outliers(31, 1000, &t),
            Err(Rejection::AboveMaximum { count: 31, max: 30 })
        );
    }

    #[test]
    fn test_error_interval_must_clear_band() {
        // upper 15.5, lower 14.5
        assert_eq!(tag_measurement(15.6, 0.05, 15.5, 14.5), OutlierTag::High);
        assert_eq!(tag_measurement(15.52, 0.05, 15.5, 14.5), OutlierTag::Inside);
        assert_eq!(tag_measurement(15.5, 0.0, 15.5, 14.5), OutlierTag::High);
        assert_eq!(tag_measurement(14.3, 0.1, 15.5, 14.5), OutlierTag::Low);
        assert_eq!(tag_measurement(14.45, 0.1, 15.5, 14.5), OutlierTag::Inside);
    }

    #[test]
    fn test_low_overwrites_high_for_inverted_band() {
        // band of -1 around 15: upper 14, lower 16
        assert_eq!(tag_measurement(15.0, 0.0, 14.0, 16.0), OutlierTag::Low);
    }

    #[test]
    fn test_single_high_point_accepted() {
        let table: MeasurementTable = [15.0, 15.0, 15.0, 19.0]
            .iter()
            .enumerate()
            .map(|(i, &m)| Measurement::new("1", 'g', 58000.0 + i as f64, m, 0.05))
            .collect();
        let stats = PerFilterStats::from_table(&table);
        let model = flat_model('g', 0.5 / 3.0);
        let classifier = OutlierClassifier::new(thresholds(1, 30, 0.5), "i");

        let verdicts = classifier.classify(&table, &ZTF, &stats, &model);
        let g = &verdicts[&'g'];
        assert!(g.outliers_exist);
        assert_eq!(g.outlier_count, 1);
        assert_eq!(
            g.tags,
            vec![
                (0, OutlierTag::Inside),
                (1, OutlierTag::Inside),
                (2, OutlierTag::Inside),
                (3, OutlierTag::High)
            ]
        );
        assert_eq!(g.outlier_rows().collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn test_classification_is_idempotent() {
        let table: MeasurementTable = (0..50)
            .map(|i| {
                let mag = if i % 10 == 0 { 18.0 } else { 17.0 + 0.01 * (i % 7) as f64 };
                Measurement::new("1", if i % 2 == 0 { 'g' } else { 'r' }, i as f64, mag, 0.02)
            })
            .collect();
        let stats = PerFilterStats::from_table(&table);
        let model = flat_model('g', 0.1).with_curve('r', [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.1]);
        let classifier = OutlierClassifier::new(thresholds(1, 30, 0.2), "i");

        let first = classifier.classify(&table, &ZTF, &stats, &model);
        let second = classifier.classify(&table, &ZTF, &stats, &model);
        assert_eq!(first, second);
        assert!(first[&'g'].outliers_exist);
    }

    #[test]
    fn test_unclassifiable_filters_do_not_abort_others() {
        let mut rows: Vec<Measurement> = (0..4)
            .map(|i| Measurement::new("1", 'g', i as f64, if i == 3 { 19.0 } else { 15.0 }, 0.05))
            .collect();
        rows.push(Measurement::new("1", 'i', 1.0, 15.0, 0.05));
        rows.push(Measurement::new("1", 'r', 1.0, f64::NAN, 0.05));
        rows.push(Measurement::new("1", 'z', 1.0, 15.0, 0.05));
        let table = MeasurementTable::new(rows);
        let stats = PerFilterStats::from_table(&table);
        let model = flat_model('g', 0.5 / 3.0)
            .with_curve('i', [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.1])
            .with_curve('r', [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.1]);
        let classifier = OutlierClassifier::new(thresholds(1, 30, 0.5), "i");

        let verdicts = classifier.classify(&table, &ZTF, &stats, &model);
        assert!(verdicts[&'g'].outliers_exist);
        assert_eq!(verdicts[&'i'].rejection, Some(Rejection::Disabled));
        assert_eq!(verdicts[&'r'].rejection, Some(Rejection::NoUsableData));
        assert_eq!(verdicts[&'r'].outlier_count, 0);
        assert_eq!(verdicts[&'z'].rejection, Some(Rejection::NoNoiseModel));
        assert!(verdicts.values().filter(|v| v.filter != 'g').all(|v| !v.outliers_exist));
    }
}
