//! Grouped statistics over measurement tables.
//!
//! Every statistic here is computed independently per filter code. A filter
//! with no rows is simply absent from [`PerFilterStats`]; a filter whose rows
//! are all unusable is present with a zero count and NaN statistics, and is
//! skipped by classification.
//!
//! - [`scan`]: slice level median, percentile, MAD and standard deviations
//! - [`series`]: brightness summary of one filter group
//! - [`cadence`]: gaps between consecutive observations

pub mod cadence;
pub mod scan;
pub mod series;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::archive::FilterCode;
use crate::table::MeasurementTable;

pub use cadence::CadenceStats;
pub use series::SeriesStats;

/// Brightness and cadence summary of one filter group.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterStats {
    pub series: SeriesStats,
    pub cadence: CadenceStats,
}

/// Statistics of every filter present in one measurement table.
///
/// A pure function of the table it was computed from; recompute rather than
/// update when the table changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerFilterStats {
    by_filter: BTreeMap<FilterCode, FilterStats>,
}

impl PerFilterStats {
    pub fn from_table(table: &MeasurementTable) -> Self {
        let by_filter = table
            .filters_returned()
            .into_iter()
            .map(|f| {
                let stats = FilterStats {
                    series: SeriesStats::from_values(&table.magnitudes(f)),
                    cadence: CadenceStats::from_times(&table.times(f)),
                };
                (f, stats)
            })
            .collect();
        Self { by_filter }
    }

    pub fn get(&self, filter: FilterCode) -> Option<&FilterStats> {
        self.by_filter.get(&filter)
    }

    pub fn series(&self, filter: FilterCode) -> Option<&SeriesStats> {
        self.get(filter).map(|s| &s.series)
    }

    pub fn cadence(&self, filter: FilterCode) -> Option<&CadenceStats> {
        self.get(filter).map(|s| &s.cadence)
    }

    /// Median magnitude of a filter, `None` when absent or not finite.
    pub fn median(&self, filter: FilterCode) -> Option<f64> {
        self.series(filter)
            .map(|s| s.median)
            .filter(|m| m.is_finite())
    }

    /// Usable sample count, zero for absent filters.
    pub fn count(&self, filter: FilterCode) -> usize {
        self.series(filter).map_or(0, |s| s.count)
    }

    pub fn filters(&self) -> impl Iterator<Item = FilterCode> + '_ {
        self.by_filter.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FilterCode, &FilterStats)> + '_ {
        self.by_filter.iter().map(|(f, s)| (*f, s))
    }

    pub fn len(&self) -> usize {
        self.by_filter.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_filter.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Measurement;
    use approx::assert_relative_eq;

    fn table(rows: &[(char, f64, f64)]) -> MeasurementTable {
        rows.iter()
            .map(|&(f, t, m)| Measurement::new("1", f, t, m, 0.02))
            .collect()
    }

    #[test]
    fn test_groups_do_not_leak() {
        let t = table(&[
            ('g', 1.0, 15.0),
            ('r', 1.1, 20.0),
            ('g', 2.0, 16.0),
            ('r', 2.1, 21.0),
            ('g', 3.0, 17.0),
            ('r', 3.1, 22.0),
        ]);
        let stats = PerFilterStats::from_table(&t);

        let g = stats.series('g').unwrap();
        let r = stats.series('r').unwrap();
        assert_eq!(g.count, 3);
        assert_relative_eq!(g.median, 16.0);
        assert_relative_eq!(g.mean, 16.0);
        assert_relative_eq!(g.std_dev, 1.0);
        assert_relative_eq!(g.mad, 1.0);
        assert_relative_eq!(r.median, 21.0);
        assert_relative_eq!(r.mean, 21.0);
        assert_relative_eq!(stats.cadence('r').unwrap().mean, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_missing_filter_absent() {
        let stats = PerFilterStats::from_table(&table(&[('g', 1.0, 15.0)]));
        assert!(stats.get('r').is_none());
        assert_eq!(stats.count('r'), 0);
        assert_eq!(stats.filters().collect::<Vec<_>>(), vec!['g']);
        assert_eq!(stats.cadence('g').unwrap(), &CadenceStats::default());
    }

    #[test]
    fn test_all_nan_filter_has_no_median() {
        let stats = PerFilterStats::from_table(&table(&[('g', 1.0, f64::NAN), ('g', 2.0, f64::NAN)]));
        assert_eq!(stats.count('g'), 0);
        assert_eq!(stats.median('g'), None);
    }
}
