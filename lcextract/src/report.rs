//! Console summary tables.
//!
//! The per-filter table has a 30 character label column followed by one
//! centred 8 character column per selected filter:
//!
//! ```text
//! Archive name: ZTF
//!                                  g       r       i       z       y
//! Samples                         120     110
//! Median Absolute Deviation      0.013   0.014
//! ```
//!
//! Filters without data leave their column blank so rows stay aligned.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::Path;

use lightcurve::archive::FilterCode;
use lightcurve::stats::SeriesStats;
use lightcurve::{ArchiveDescriptor, OutlierTag, OutlierVerdict, PerFilterStats};
use serde::Serialize;

use crate::field_check::FieldOffset;
use crate::object::{ArchiveAnalysis, AstroObject};

pub const LABEL_WIDTH: usize = 30;
pub const VALUE_WIDTH: usize = 8;

/// Blank label column followed by the centred filter names.
pub fn filter_header(selection: &str) -> String {
    let mut line = format!("{:LABEL_WIDTH$}", "");
    for f in selection.chars() {
        let _ = write!(line, "{:^VALUE_WIDTH$}", f);
    }
    line
}

/// One row of the per-filter table.
///
/// # Arguments
/// * `label` - Row label, left aligned in the label column
/// * `selection` - Filters in column order
/// * `values` - Value per filter; filters missing here print blank
/// * `decimals` - Decimal places for every value
pub fn filter_line(
    label: &str,
    selection: &str,
    values: &BTreeMap<FilterCode, f64>,
    decimals: usize,
) -> String {
    let mut line = format!("{label:LABEL_WIDTH$}");
    for f in selection.chars() {
        match values.get(&f) {
            Some(v) => {
                let _ = write!(line, "{:^VALUE_WIDTH$.decimals$}", v);
            }
            None => line.push_str(&" ".repeat(VALUE_WIDTH)),
        }
    }
    line
}

fn column(
    stats: &PerFilterStats,
    value: impl Fn(&SeriesStats) -> f64,
) -> BTreeMap<FilterCode, f64> {
    stats.iter().map(|(f, s)| (f, value(&s.series))).collect()
}

/// Archive name, filter header and the Samples, MAD, SD, Median and Mean rows.
pub fn summary_table(
    archive: &ArchiveDescriptor,
    stats: &PerFilterStats,
    selection: &str,
) -> String {
    let rows = [
        ("Samples", column(stats, |s| s.count as f64), 0),
        ("Median Absolute Deviation", column(stats, |s| s.mad), 3),
        ("Standard Deviation", column(stats, |s| s.std_dev), 3),
        ("Median", column(stats, |s| s.median), 2),
        ("Mean", column(stats, |s| s.mean), 2),
    ];

    let mut out = format!("Archive name: {}\n", archive.name);
    out.push_str(&filter_header(selection));
    out.push('\n');
    for (label, values, decimals) in &rows {
        out.push_str(&filter_line(label, selection, values, *decimals));
        out.push('\n');
    }
    out
}

/// Separator and title printed before each object's tables.
pub fn object_header(object: &AstroObject) -> String {
    format!(
        "\n{}\nObject name: {} - summary statistics",
        "-".repeat(61),
        object.name
    )
}

pub fn no_data_line(archive: &ArchiveDescriptor) -> String {
    format!("No data available or retrieved from {}", archive.name)
}

/// Reference magnitudes and the outlier verdict of every filter, then each
/// accepted outlier.
pub fn verdict_lines(object: &AstroObject, analysis: &ArchiveAnalysis) -> Vec<String> {
    let archive = analysis.archive.name;
    let mut lines = Vec::new();

    for (filter, oid) in &analysis.primary_ids {
        match analysis.reference_mags.get(filter).copied().flatten() {
            Some(mag) => {
                lines.push(format!("{archive} {filter}: primary OID {oid}, refmag {mag:.3}"))
            }
            None => lines.push(format!("{archive} {filter}: primary OID {oid}, refmag unknown")),
        }
    }

    for (filter, verdict) in &analysis.verdicts {
        if verdict.outliers_exist {
            let band = verdict
                .limits
                .map(|l| format!(" outside {:.3} +/- {:.3}", l.median, l.band))
                .unwrap_or_default();
            lines.push(format!(
                "{archive} {filter}: {} of {} samples{band}",
                verdict.outlier_count, verdict.samples
            ));
            for (row, tag) in &verdict.tags {
                if *tag == OutlierTag::Inside {
                    continue;
                }
                let m = &analysis.table.rows()[*row];
                lines.push(format!(
                    "{} - Outlier MJD{:.5}: mag {:.3} +/- {:.3} ({:?})",
                    object.name, m.mjd, m.mag, m.magerr, tag
                ));
                if let Some(offset) = analysis.field_offsets.get(row) {
                    lines.push(format!(
                        "{} - Outlier MJD{:.5}: Offset = {:8.5} SD = {:8.5} ({} field objects)",
                        object.name, m.mjd, offset.mean, offset.sd, offset.count
                    ));
                }
            }
        } else if let Some(reason) = &verdict.rejection {
            lines.push(format!("{archive} {filter}: no outliers reported, {reason}"));
        }
    }
    lines
}

/// Machine readable record of one analysed archive of one object.
#[derive(Debug, Serialize)]
pub struct ArchiveSummary<'a> {
    pub object: &'a str,
    pub archive: &'static str,
    pub stats: &'a PerFilterStats,
    pub reference_mags: &'a BTreeMap<FilterCode, Option<f64>>,
    pub verdicts: &'a BTreeMap<FilterCode, OutlierVerdict>,
    /// Keyed by outlier row
    pub field_offsets: &'a BTreeMap<usize, FieldOffset>,
}

impl<'a> ArchiveSummary<'a> {
    pub fn new(object: &'a AstroObject, analysis: &'a ArchiveAnalysis) -> Self {
        Self {
            object: &object.name,
            archive: analysis.archive.name,
            stats: &analysis.stats,
            reference_mags: &analysis.reference_mags,
            verdicts: &analysis.verdicts,
            field_offsets: &analysis.field_offsets,
        }
    }
}

/// Write summaries as pretty JSON, creating the parent directory.
pub fn write_json_summary<P: AsRef<Path>>(
    path: P,
    summaries: &[ArchiveSummary<'_>],
) -> std::io::Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(summaries)?;
    std::fs::write(path, json)
}
