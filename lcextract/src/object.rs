//! Per-object analysis pipeline.
//!
//! For one object and each configured archive, in order:
//!
//! 1. fetch the lightcurve through a [`LightcurveSource`]
//! 2. compute per-filter statistics
//! 3. resolve the primary object id of each filter and look up its catalogue
//!    reference magnitude
//! 4. classify outliers against the noise model
//!
//! An archive that returns nothing, or fails, is logged and skipped; the other
//! archives and objects carry on.

use std::collections::BTreeMap;
use std::path::Path;

use lightcurve::archive::FilterCode;
use lightcurve::{
    ArchiveDescriptor, ConfigError, LightcurveConfig, MeasurementTable, NoiseModel,
    OutlierClassifier, OutlierVerdict, PerFilterStats,
};
use serde::{Deserialize, Serialize};

use crate::field_check::FieldOffset;
use crate::retrieval::{LightcurveSource, ReferenceLookup, SkyPosition};
use crate::storage::StorageError;

/// One entry of an object list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AstroObject {
    #[serde(rename = "Name")]
    pub name: String,
    /// Right ascension (degrees)
    #[serde(rename = "RA")]
    pub ra: f64,
    /// Declination (degrees)
    #[serde(rename = "DEC")]
    pub dec: f64,
    #[serde(rename = "Description", default)]
    pub description: String,
}

impl AstroObject {
    pub fn new(name: &str, ra: f64, dec: f64, description: &str) -> Self {
        Self {
            name: name.to_string(),
            ra,
            dec,
            description: description.to_string(),
        }
    }

    pub fn position(&self) -> SkyPosition {
        SkyPosition::new(self.ra, self.dec)
    }
}

/// Load an object list CSV with columns `Name,RA,DEC,Description`.
pub fn load_object_list<P: AsRef<Path>>(path: P) -> Result<Vec<AstroObject>, StorageError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)?;
    let objects = reader
        .deserialize()
        .collect::<Result<Vec<AstroObject>, csv::Error>>()?;
    Ok(objects)
}

/// Everything derived from one archive's lightcurve of one object.
#[derive(Debug, Clone)]
pub struct ArchiveAnalysis {
    pub archive: &'static ArchiveDescriptor,
    pub table: MeasurementTable,
    pub stats: PerFilterStats,
    /// Most frequent object id per filter
    pub primary_ids: Vec<(FilterCode, String)>,
    /// Catalogue reference magnitude of each filter's primary id, `None`
    /// until looked up
    pub reference_mags: BTreeMap<FilterCode, Option<f64>>,
    pub verdicts: BTreeMap<FilterCode, OutlierVerdict>,
    /// Same-exposure field offsets keyed by outlier row, filled only when
    /// outliers are checked
    pub field_offsets: BTreeMap<usize, FieldOffset>,
}

impl ArchiveAnalysis {
    /// True if any filter has accepted outliers.
    pub fn outliers_exist(&self) -> bool {
        self.verdicts.values().any(|v| v.outliers_exist)
    }

    /// Fill in reference magnitudes from `lookup`.
    ///
    /// Returns the primary ids still missing, which must be re-queried from
    /// the archive.
    pub fn resolve_references(&mut self, lookup: &dyn ReferenceLookup) -> Vec<String> {
        let mut missing = Vec::new();
        for (filter, oid) in &self.primary_ids {
            let refmag = lookup
                .lookup(oid)
                .filter(|record| record.filter() == Some(*filter))
                .map(|record| record.refmag);
            match refmag {
                Some(mag) => log::info!("Primary OID {oid} refmag ({filter}mag) {mag:.3}"),
                None => {
                    log::info!("No cached refmag for primary OID {oid} ({filter}), must re-query");
                    missing.push(oid.clone());
                }
            }
            self.reference_mags.insert(*filter, refmag);
        }
        missing
    }
}

/// Runs the per-object pipeline with one configuration, source and noise model.
pub struct ObjectAnalyzer<'a> {
    config: &'a LightcurveConfig,
    archives: Vec<&'static ArchiveDescriptor>,
    source: &'a dyn LightcurveSource,
    references: &'a dyn ReferenceLookup,
    model: &'a dyn NoiseModel,
    classifier: OutlierClassifier,
}

impl<'a> ObjectAnalyzer<'a> {
    /// # Arguments
    /// * `config` - Validated configuration; its archive list is resolved here
    /// * `source` - Where lightcurves come from
    /// * `references` - Catalogue reference magnitude lookup
    /// * `model` - Noise model used for the outlier band
    pub fn new(
        config: &'a LightcurveConfig,
        source: &'a dyn LightcurveSource,
        references: &'a dyn ReferenceLookup,
        model: &'a dyn NoiseModel,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            config,
            archives: config.archive_list()?,
            source,
            references,
            model,
            classifier: OutlierClassifier::new(config.thresholds, &config.disabled_filters),
        })
    }

    pub fn archives(&self) -> &[&'static ArchiveDescriptor] {
        &self.archives
    }

    /// Analyse one object against every configured archive.
    ///
    /// Archives without data give `None` in their slot.
    pub fn analyze(
        &self,
        object: &AstroObject,
    ) -> Vec<(&'static ArchiveDescriptor, Option<ArchiveAnalysis>)> {
        self.archives
            .iter()
            .map(|&archive| (archive, self.analyze_archive(object, archive)))
            .collect()
    }

    /// Analyse one object against one archive.
    pub fn analyze_archive(
        &self,
        object: &AstroObject,
        archive: &'static ArchiveDescriptor,
    ) -> Option<ArchiveAnalysis> {
        let radius_deg = self.config.cone_radius_deg();
        let outcome = match self.source.fetch_object(archive, object, radius_deg) {
            Ok(outcome) => outcome,
            Err(e) => {
                log::warn!("{} query for {} failed: {}", archive.name, object.name, e);
                return None;
            }
        };
        let Some(mut table) = outcome.into_table() else {
            log::info!("No data available or retrieved from {} for {}", archive.name, object.name);
            return None;
        };

        let selection: String = archive
            .filters_requested(&self.config.filter_selection)
            .into_iter()
            .collect();
        table.retain_filters(&selection);
        if table.is_empty() {
            log::info!(
                "{} returned no rows in filters '{}' for {}",
                archive.name,
                selection,
                object.name
            );
            return None;
        }

        let stats = PerFilterStats::from_table(&table);
        let verdicts = self.classifier.classify(&table, archive, &stats, self.model);
        let mut analysis = ArchiveAnalysis {
            archive,
            primary_ids: table.primary_ids(),
            table,
            stats,
            reference_mags: BTreeMap::new(),
            verdicts,
            field_offsets: BTreeMap::new(),
        };
        analysis.resolve_references(self.references);
        Some(analysis)
    }
}
