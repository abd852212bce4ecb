//! Same-exposure field comparison of accepted outliers.
//!
//! A genuine brightening of the target leaves the other objects on the same
//! exposure at their catalogue magnitudes. A bad zero point or a passing
//! cloud shifts all of them together. For every outlier the objects detected
//! in the same exposure (`filefracday`) near the target are compared with
//! their catalogue reference magnitudes:
//!
//! ```text
//! offset_i = refmag_i - mag_i
//! ```
//!
//! A mean offset near zero with a small spread clears the exposure.

use std::collections::HashMap;

use lightcurve::stats::scan;
use lightcurve::{FieldCheckConfig, Measurement, MeasurementTable};
use serde::Serialize;

use crate::object::ArchiveAnalysis;
use crate::retrieval::{FieldSource, RetrievalError, SkyPosition};
use crate::storage::OidRecord;

/// Catalogue minus measured magnitude over the field objects of one exposure.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FieldOffset {
    /// Field objects with a catalogue magnitude in the outlier's filter
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation, NaN for a single object
    pub sd: f64,
}

/// Rows of `field` taken in the same exposure and filter as `outlier`,
/// excluding the outlier's own object.
///
/// An outlier without an exposure id matches nothing.
pub fn same_exposure(field: &MeasurementTable, outlier: &Measurement) -> MeasurementTable {
    let Some(exposure) = outlier.filefracday else {
        return MeasurementTable::default();
    };
    field
        .rows()
        .iter()
        .filter(|r| r.filefracday == Some(exposure))
        .filter(|r| r.filter == outlier.filter && r.oid != outlier.oid)
        .cloned()
        .collect()
}

/// Offset statistics of `field` against catalogue `references`.
///
/// Rows without a catalogue record in their own filter are skipped.
/// Returns `None` when no row can be matched.
pub fn field_offset_stats(
    field: &MeasurementTable,
    references: &[OidRecord],
) -> Option<FieldOffset> {
    let by_oid: HashMap<(&str, char), f64> = references
        .iter()
        .filter_map(|r| Some(((r.oid.as_str(), r.filter()?), r.refmag)))
        .collect();

    let offsets: Vec<f64> = field
        .rows()
        .iter()
        .filter_map(|row| {
            let refmag = by_oid.get(&(row.oid.as_str(), row.filter))?;
            Some(refmag - row.mag)
        })
        .filter(|o| o.is_finite())
        .collect();

    if offsets.is_empty() {
        return None;
    }
    Some(FieldOffset {
        count: offsets.len(),
        mean: scan::mean(&offsets),
        sd: scan::sample_std(&offsets),
    })
}

/// Distinct object ids of `table`, in first-seen order.
fn field_oids(table: &MeasurementTable) -> Vec<String> {
    let mut oids: Vec<String> = Vec::new();
    for row in table.rows() {
        if !oids.contains(&row.oid) {
            oids.push(row.oid.clone());
        }
    }
    oids
}

/// Field offset of one outlier, querying `source` for the exposure's
/// detections and their catalogue magnitudes.
pub fn outlier_offset(
    source: &dyn FieldSource,
    position: SkyPosition,
    outlier: &Measurement,
    window: &FieldCheckConfig,
) -> Result<Option<FieldOffset>, RetrievalError> {
    let detections = source.field_measurements(position, outlier, window)?;
    let field = same_exposure(&detections, outlier);
    if field.is_empty() {
        log::info!(
            "No field objects share the exposure of MJD {:.5} ({})",
            outlier.mjd,
            outlier.filter
        );
        return Ok(None);
    }
    let references = source.field_references(&field_oids(&field))?;
    Ok(field_offset_stats(&field, &references))
}

/// Check every accepted outlier of `analysis` and record the offsets found.
///
/// A failed query is logged and leaves that outlier unchecked. Returns the
/// number of outliers with an offset.
pub fn check_outliers(
    analysis: &mut ArchiveAnalysis,
    position: SkyPosition,
    source: &dyn FieldSource,
    window: &FieldCheckConfig,
) -> usize {
    let rows: Vec<usize> = analysis
        .verdicts
        .values()
        .filter(|v| v.outliers_exist)
        .flat_map(|v| v.outlier_rows())
        .collect();

    for row in rows {
        let outlier = &analysis.table.rows()[row];
        match outlier_offset(source, position, outlier, window) {
            Ok(Some(offset)) => {
                analysis.field_offsets.insert(row, offset);
            }
            Ok(None) => {}
            Err(e) => log::warn!("Field check of MJD {:.5} failed: {}", outlier.mjd, e),
        }
    }
    analysis.field_offsets.len()
}
