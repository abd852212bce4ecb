//! Lightcurve retrieval.
//!
//! [`LightcurveSource`] is the seam between the analysis pipeline and the
//! archives. Implementations:
//!
//! - [`ZtfClient`]: IRSA ZTF lightcurve service over HTTP
//! - [`CachedSource`]: wraps another source with the on-disk lightcurve cache
//!
//! Failing to get data is an ordinary outcome: sources return
//! [`FetchOutcome::NoData`] for an empty result, and the pipeline treats a
//! [`RetrievalError`] the same way after logging it.

pub mod cache;
pub mod ztf;

use lightcurve::{ArchiveDescriptor, FieldCheckConfig, Measurement, MeasurementTable};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::object::AstroObject;
use crate::storage::{OidRecord, StorageError};

pub use cache::CachedSource;
pub use ztf::ZtfClient;

#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] ureq::Error),
    #[error("CSV parse error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Archive {0} is not served by this source")]
    UnsupportedArchive(&'static str),
    #[error("Invalid object id '{0}'")]
    InvalidOid(String),
}

/// Equatorial position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkyPosition {
    pub ra_deg: f64,
    pub dec_deg: f64,
}

impl SkyPosition {
    pub fn new(ra_deg: f64, dec_deg: f64) -> Self {
        Self { ra_deg, dec_deg }
    }
}

/// Result of a successful query.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Data(MeasurementTable),
    NoData,
}

impl FetchOutcome {
    /// `NoData` for an empty table.
    pub fn from_table(table: MeasurementTable) -> Self {
        if table.is_empty() {
            FetchOutcome::NoData
        } else {
            FetchOutcome::Data(table)
        }
    }

    pub fn into_table(self) -> Option<MeasurementTable> {
        match self {
            FetchOutcome::Data(table) => Some(table),
            FetchOutcome::NoData => None,
        }
    }
}

/// Anything that can produce the lightcurve around a sky position.
pub trait LightcurveSource {
    /// Measurements from `archive` within `radius_deg` of `position`.
    fn fetch(
        &self,
        archive: &ArchiveDescriptor,
        position: SkyPosition,
        radius_deg: f64,
    ) -> Result<FetchOutcome, RetrievalError>;

    /// Measurements for a named object. Sources that key storage by object
    /// name override this; the default queries by position.
    fn fetch_object(
        &self,
        archive: &ArchiveDescriptor,
        object: &AstroObject,
        radius_deg: f64,
    ) -> Result<FetchOutcome, RetrievalError> {
        self.fetch(archive, object.position(), radius_deg)
    }
}

impl<S: LightcurveSource + ?Sized> LightcurveSource for &S {
    fn fetch(
        &self,
        archive: &ArchiveDescriptor,
        position: SkyPosition,
        radius_deg: f64,
    ) -> Result<FetchOutcome, RetrievalError> {
        (**self).fetch(archive, position, radius_deg)
    }

    fn fetch_object(
        &self,
        archive: &ArchiveDescriptor,
        object: &AstroObject,
        radius_deg: f64,
    ) -> Result<FetchOutcome, RetrievalError> {
        (**self).fetch_object(archive, object, radius_deg)
    }
}

/// Archive queries behind the same-exposure check of an outlier.
pub trait FieldSource {
    /// Detections near `position` in the outlier's filter whose time and
    /// magnitude fall within `window` of the outlier.
    fn field_measurements(
        &self,
        position: SkyPosition,
        outlier: &Measurement,
        window: &FieldCheckConfig,
    ) -> Result<MeasurementTable, RetrievalError>;

    /// Catalogue records of `oids`. Unknown ids are absent from the result.
    fn field_references(&self, oids: &[String]) -> Result<Vec<OidRecord>, RetrievalError>;
}

/// Local lookup of catalogue reference magnitudes by object id.
///
/// A miss means the id must be re-queried from the archive; it is not an
/// error.
pub trait ReferenceLookup {
    fn lookup(&self, oid: &str) -> Option<OidRecord>;
}
