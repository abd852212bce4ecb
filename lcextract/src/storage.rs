//! On-disk layout of the lightcurve data directory.
//!
//! Everything lives under one root (`data/` by default):
//!
//! ```text
//! data/
//! ├── LC/
//! │   ├── <group>/<archive><filters><object>.csv   # cached lightcurves
//! │   ├── OIDList.csv                               # OID cross-reference cache
//! │   └── NoLCList.csv                              # ids with no lightcurve
//! └── calibration/
//!     ├── reference_sample.csv
//!     ├── calibration.csv
//!     └── noise_model.json
//! ```
//!
//! Lightcurves are grouped by reference magnitude bin for calibration runs and
//! under `objects` for ad hoc object lists.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use lightcurve::archive::{FilterCode, ZTF};
use lightcurve::table::TableError;
use lightcurve::{ArchiveDescriptor, MeasurementTable};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retrieval::ReferenceLookup;

/// Group used for lightcurves of objects not tied to a magnitude bin
pub const OBJECT_GROUP: &str = "objects";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Lightcurve table error: {0}")]
    Table(#[from] TableError),
}

/// Directory name for a magnitude bin group, e.g. "16.25"
pub fn magnitude_group(mag: f64) -> String {
    format!("{mag:.2}")
}

/// Data directory manager.
///
/// Only computes paths and creates directories on save; nothing is touched
/// on construction.
#[derive(Debug, Clone)]
pub struct LightcurveStore {
    root_path: PathBuf,
}

impl Default for LightcurveStore {
    fn default() -> Self {
        Self::with_path(PathBuf::from("data"))
    }
}

impl LightcurveStore {
    pub fn with_path(root_path: PathBuf) -> Self {
        Self { root_path }
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    fn lightcurve_dir(&self) -> PathBuf {
        self.root_path.join("LC")
    }

    fn calibration_dir(&self) -> PathBuf {
        self.root_path.join("calibration")
    }

    /// Cached lightcurve file for one object, archive and filter selection.
    pub fn lightcurve_path(
        &self,
        group: &str,
        archive: &ArchiveDescriptor,
        filters: &str,
        object_name: &str,
    ) -> PathBuf {
        // Object names are free text; keep them to one path component
        let name_safe = object_name.replace(['/', '\\'], "_");
        self.lightcurve_dir()
            .join(group)
            .join(format!("{}{}{}.csv", archive.name, filters, name_safe))
    }

    pub fn oid_list_path(&self) -> PathBuf {
        self.lightcurve_dir().join("OIDList.csv")
    }

    pub fn no_lightcurve_path(&self) -> PathBuf {
        self.lightcurve_dir().join("NoLCList.csv")
    }

    pub fn reference_sample_path(&self) -> PathBuf {
        self.calibration_dir().join("reference_sample.csv")
    }

    pub fn calibration_table_path(&self) -> PathBuf {
        self.calibration_dir().join("calibration.csv")
    }

    pub fn noise_model_path(&self) -> PathBuf {
        self.calibration_dir().join("noise_model.json")
    }

    /// Cached lightcurve, if one exists.
    ///
    /// Returns None if nothing is cached.
    /// Returns Some(Err) if the file exists but cannot be loaded.
    pub fn get_lightcurve(
        &self,
        group: &str,
        archive: &ArchiveDescriptor,
        filters: &str,
        object_name: &str,
    ) -> Option<Result<MeasurementTable, StorageError>> {
        let path = self.lightcurve_path(group, archive, filters, object_name);
        if !path.exists() {
            return None;
        }
        Some(MeasurementTable::load_csv(&path).map_err(StorageError::from))
    }

    /// Save a lightcurve, creating its group directory. Returns the path written.
    pub fn save_lightcurve(
        &self,
        group: &str,
        archive: &ArchiveDescriptor,
        filters: &str,
        object_name: &str,
        table: &MeasurementTable,
    ) -> Result<PathBuf, StorageError> {
        let path = self.lightcurve_path(group, archive, filters, object_name);
        table.save_csv(&path)?;
        Ok(path)
    }

    /// Returns Ok(true) if the file was deleted, Ok(false) if it didn't exist.
    pub fn delete_lightcurve(
        &self,
        group: &str,
        archive: &ArchiveDescriptor,
        filters: &str,
        object_name: &str,
    ) -> Result<bool, StorageError> {
        let path = self.lightcurve_path(group, archive, filters, object_name);
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(path)?;
        Ok(true)
    }
}

/// Open `path` for appending CSV records, writing the header only when the
/// file is new or empty.
fn append_writer(path: &Path) -> Result<csv::Writer<std::fs::File>, StorageError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let needs_header = std::fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(csv::WriterBuilder::new()
        .has_headers(needs_header)
        .from_writer(file))
}

fn read_records<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>, StorageError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = csv::Reader::from_path(path)?;
    let records = reader.deserialize().collect::<Result<Vec<T>, csv::Error>>()?;
    Ok(records)
}

/// One row of the ZTF object catalogue (`ztf_objects`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OidRecord {
    pub oid: String,
    /// Raw ZTF filter code, e.g. "zg"
    pub filtercode: String,
    pub ra: f64,
    pub dec: f64,
    pub ngoodobs: u32,
    /// Reference image magnitude
    pub refmag: f64,
    pub refmagerr: f64,
}

impl OidRecord {
    pub fn filter(&self) -> Option<FilterCode> {
        ZTF.filter_from_raw(&self.filtercode)
    }
}

/// Append-only cache of catalogue records keyed by OID.
#[derive(Debug, Clone, Default)]
pub struct OidCache {
    path: Option<PathBuf>,
    records: HashMap<String, OidRecord>,
}

impl OidCache {
    /// Cache not backed by a file.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the cache from `path`; a missing file gives an empty cache that
    /// is created on the first append.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let records = read_records::<OidRecord>(&path)?
            .into_iter()
            .map(|r| (r.oid.clone(), r))
            .collect();
        Ok(Self {
            path: Some(path),
            records,
        })
    }

    pub fn get(&self, oid: &str) -> Option<&OidRecord> {
        self.records.get(oid)
    }

    pub fn contains(&self, oid: &str) -> bool {
        self.records.contains_key(oid)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Add a record, writing it to the backing file. Known OIDs are ignored.
    pub fn append(&mut self, record: OidRecord) -> Result<bool, StorageError> {
        if self.records.contains_key(&record.oid) {
            return Ok(false);
        }
        if let Some(path) = &self.path {
            let mut writer = append_writer(path)?;
            writer.serialize(&record)?;
            writer.flush()?;
        }
        self.records.insert(record.oid.clone(), record);
        Ok(true)
    }
}

impl ReferenceLookup for OidCache {
    fn lookup(&self, oid: &str) -> Option<OidRecord> {
        self.get(oid).cloned()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct NoLightcurveEntry {
    id: String,
    mag: f64,
}

/// Ids already queried without returning a lightcurve.
#[derive(Debug, Clone, Default)]
pub struct NoLightcurveList {
    path: Option<PathBuf>,
    entries: Vec<NoLightcurveEntry>,
}

impl NoLightcurveList {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let entries = read_records(&path)?;
        Ok(Self {
            path: Some(path),
            entries,
        })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record `id` as having no data at sample magnitude `mag`.
    ///
    /// Returns Ok(false) if the id was already listed.
    pub fn add(&mut self, id: &str, mag: f64) -> Result<bool, StorageError> {
        if self.contains(id) {
            return Ok(false);
        }
        let entry = NoLightcurveEntry {
            id: id.to_string(),
            mag,
        };
        if let Some(path) = &self.path {
            let mut writer = append_writer(path)?;
            writer.serialize(&entry)?;
            writer.flush()?;
        }
        self.entries.push(entry);
        Ok(true)
    }
}
