//! Flat per-object measurement tables.
//!
//! Retrieval normalises every archive's columns into [`Measurement`] rows, so
//! downstream statistics only ever see one shape of data. Rows keep their
//! retrieval order; grouping by filter is done on demand.

use std::path::Path;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::archive::FilterCode;

#[derive(Error, Debug)]
pub enum TableError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// One photometric measurement of one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Archive object id of the source that produced this row
    pub oid: String,
    pub filter: FilterCode,
    /// Observation time (MJD)
    pub mjd: f64,
    pub mag: f64,
    /// 1-sigma magnitude error
    pub magerr: f64,
    /// Survey field, used only to locate image cutouts
    #[serde(default)]
    pub field: Option<u32>,
    #[serde(default)]
    pub ccdid: Option<u32>,
    #[serde(default)]
    pub qid: Option<u32>,
    #[serde(default)]
    pub filefracday: Option<u64>,
}

impl Measurement {
    /// Row with only the columns the analysis needs.
    pub fn new(oid: impl Into<String>, filter: FilterCode, mjd: f64, mag: f64, magerr: f64) -> Self {
        Self {
            oid: oid.into(),
            filter,
            mjd,
            mag,
            magerr,
            field: None,
            ccdid: None,
            qid: None,
            filefracday: None,
        }
    }
}

/// Ordered sequence of measurements for one object from one archive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeasurementTable {
    rows: Vec<Measurement>,
}

impl MeasurementTable {
    pub fn new(rows: Vec<Measurement>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[Measurement] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn push(&mut self, row: Measurement) {
        self.rows.push(row);
    }

    /// Distinct filter codes in the order they first appear.
    pub fn filters_returned(&self) -> Vec<FilterCode> {
        self.rows.iter().map(|r| r.filter).unique().collect()
    }

    /// Rows measured in `filter`, in table order.
    pub fn rows_for(&self, filter: FilterCode) -> impl Iterator<Item = &Measurement> + '_ {
        self.rows.iter().filter(move |r| r.filter == filter)
    }

    /// Row indices measured in `filter`, in table order.
    pub fn indices_for(&self, filter: FilterCode) -> Vec<usize> {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, r)| r.filter == filter)
            .map(|(i, _)| i)
            .collect()
    }

    /// Magnitudes of one filter group (non-finite values included).
    pub fn magnitudes(&self, filter: FilterCode) -> Vec<f64> {
        self.rows_for(filter).map(|r| r.mag).collect()
    }

    /// Observation times of one filter group.
    pub fn times(&self, filter: FilterCode) -> Vec<f64> {
        self.rows_for(filter).map(|r| r.mjd).collect()
    }

    /// Primary object id for each filter present, in first-seen filter order.
    ///
    /// A cone search can pick up neighbouring sources; when a filter holds
    /// rows from more than one id the contamination is logged.
    pub fn primary_ids(&self) -> Vec<(FilterCode, String)> {
        self.filters_returned()
            .into_iter()
            .filter_map(|f| {
                let group: Vec<&Measurement> = self.rows_for(f).collect();
                let distinct = group.iter().map(|r| r.oid.as_str()).unique().count();
                let primary = resolve_primary_id(group.iter().copied())?;
                if distinct > 1 {
                    log::info!(
                        "{} objects returned in filter {}, using primary id {}",
                        distinct,
                        f,
                        primary
                    );
                }
                Some((f, primary))
            })
            .collect()
    }

    /// Drop every row whose filter is not in `selection`.
    pub fn retain_filters(&mut self, selection: &str) {
        self.rows.retain(|r| selection.contains(r.filter));
    }

    /// Load a table previously written by [`MeasurementTable::save_csv`].
    pub fn load_csv<P: AsRef<Path>>(path: P) -> Result<Self, TableError> {
        let mut reader = csv::Reader::from_path(path)?;
        let rows = reader
            .deserialize()
            .collect::<Result<Vec<Measurement>, csv::Error>>()?;
        Ok(Self { rows })
    }

    /// Write the table as CSV with a header row, creating parent directories.
    pub fn save_csv<P: AsRef<Path>>(&self, path: P) -> Result<(), TableError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(path)?;
        for row in &self.rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl FromIterator<Measurement> for MeasurementTable {
    fn from_iter<I: IntoIterator<Item = Measurement>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Most frequent object id among `rows`.
///
/// Ties go to the id that appears first. Returns `None` for no rows.
pub fn resolve_primary_id<'a, I>(rows: I) -> Option<String>
where
    I: IntoIterator<Item = &'a Measurement>,
{
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for row in rows {
        match counts.iter_mut().find(|(id, _)| *id == row.oid) {
            Some((_, n)) => *n += 1,
            None => counts.push((row.oid.as_str(), 1)),
        }
    }

    let mut best: Option<(&str, usize)> = None;
    for (id, n) in counts {
        if best.map_or(true, |(_, b)| n > b) {
            best = Some((id, n));
        }
    }
    best.map(|(id, _)| id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn row(oid: &str, filter: char, mjd: f64, mag: f64) -> Measurement {
        Measurement::new(oid, filter, mjd, mag, 0.05)
    }

    #[test]
    fn test_primary_id_most_frequent() {
        let rows = vec![row("a", 'g', 1.0, 15.0), row("b", 'g', 2.0, 15.0), row("b", 'g', 3.0, 15.0)];
        assert_eq!(resolve_primary_id(&rows), Some("b".to_string()));
    }

    #[test]
    fn test_primary_id_tie_goes_to_first_seen() {
        let rows = vec![
            row("x", 'g', 1.0, 15.0),
            row("y", 'g', 2.0, 15.0),
            row("y", 'g', 3.0, 15.0),
            row("x", 'g', 4.0, 15.0),
        ];
        assert_eq!(resolve_primary_id(&rows), Some("x".to_string()));
        assert_eq!(resolve_primary_id(&Vec::<Measurement>::new()), None);
    }

    #[test]
    fn test_filters_and_primary_ids_per_filter() {
        let table: MeasurementTable = vec![
            row("r1", 'r', 1.0, 16.0),
            row("g1", 'g', 1.0, 15.0),
            row("g2", 'g', 2.0, 15.0),
            row("g2", 'g', 3.0, 15.0),
        ]
        .into_iter()
        .collect();

        assert_eq!(table.filters_returned(), vec!['r', 'g']);
        assert_eq!(
            table.primary_ids(),
            vec![('r', "r1".to_string()), ('g', "g2".to_string())]
        );
        assert_eq!(table.indices_for('g'), vec![1, 2, 3]);
        assert_eq!(table.magnitudes('r'), vec![16.0]);
    }

    #[test]
    fn test_retain_filters() {
        let mut table: MeasurementTable = vec![
            row("a", 'g', 1.0, 15.0),
            row("a", 'R', 1.0, 15.0),
            row("a", 'i', 1.0, 15.0),
        ]
        .into_iter()
        .collect();
        table.retain_filters("gR");
        assert_eq!(table.filters_returned(), vec!['g', 'R']);
    }

    #[test]
    fn test_csv_round_trip_with_optional_columns() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/lc.csv");

        let mut with_image = row("683", 'g', 58300.25, 17.1);
        with_image.field = Some(683);
        with_image.ccdid = Some(12);
        with_image.qid = Some(3);
        with_image.filefracday = Some(20180701152315);
        let table = MeasurementTable::new(vec![with_image, row("683", 'r', 58301.5, 16.8)]);

        table.save_csv(&path).unwrap();
        let loaded = MeasurementTable::load_csv(&path).unwrap();
        assert_eq!(loaded, table);
        assert_eq!(loaded.rows()[1].field, None);
    }
}
