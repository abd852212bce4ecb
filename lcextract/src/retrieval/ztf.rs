//! ZTF lightcurves and object catalogue from the IRSA web services.
//!
//! Two endpoints are used:
//!
//! - the lightcurve service (`nph_light_curves`), a cone search returning every
//!   detection with catalogue flags outside [`BAD_CATFLAGS_MASK`]
//! - the TAP sync service, queried against `ztf_objects_dr5` for the reference
//!   magnitudes of object ids
//!
//! The lightcurve service also serves the field check of an outlier: a wider
//! cone restricted by `TIME` and `MAG` windows, of which only detections from
//! the outlier's own exposure are kept.
//!
//! Both respond with CSV. Responses are streamed straight into the `csv`
//! reader.

use std::io::Read;
use std::time::Duration;

use lightcurve::archive::{FilterCode, ZTF};
use lightcurve::{ArchiveDescriptor, FieldCheckConfig, Measurement, MeasurementTable};
use serde::Deserialize;

use super::{FetchOutcome, FieldSource, LightcurveSource, RetrievalError, SkyPosition};
use crate::storage::{OidCache, OidRecord};

pub const LIGHTCURVE_URL: &str = "https://irsa.ipac.caltech.edu/cgi-bin/ZTF/nph_light_curves";
pub const TAP_SYNC_URL: &str = "https://irsa.ipac.caltech.edu/TAP/sync";

/// Catalogue flag bits that mark a detection as unusable
pub const BAD_CATFLAGS_MASK: u32 = 32768;

/// Object catalogue table queried for reference magnitudes
pub const OBJECT_TABLE: &str = "ztf_objects_dr5";

/// Object ids per catalogue query
pub const OBJECT_QUERY_BATCH: usize = 100;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// One detection as served by the lightcurve service. Extra columns are ignored.
#[derive(Debug, Deserialize)]
struct IrsaRow {
    oid: String,
    mjd: f64,
    mag: f64,
    magerr: f64,
    filtercode: String,
    #[serde(default)]
    field: Option<u32>,
    #[serde(default)]
    ccdid: Option<u32>,
    #[serde(default)]
    qid: Option<u32>,
    #[serde(default)]
    filefracday: Option<u64>,
}

/// Parse a lightcurve service response, keeping rows in `filters`.
///
/// # Arguments
/// * `reader` - CSV response body
/// * `filters` - Filter codes to keep; rows in other filters are dropped
///
/// # Returns
/// * `Ok(MeasurementTable)` - Rows in response order, possibly empty
/// * `Err(RetrievalError)` - Malformed CSV or a required column missing
pub fn parse_lightcurve_csv<R: Read>(
    reader: R,
    filters: &[FilterCode],
) -> Result<MeasurementTable, RetrievalError> {
    let mut csv_reader = csv::Reader::from_reader(reader);
    let mut table = MeasurementTable::default();
    let mut skipped = 0usize;

    for row in csv_reader.deserialize::<IrsaRow>() {
        let row = row?;
        let Some(filter) = ZTF.filter_from_raw(&row.filtercode) else {
            skipped += 1;
            continue;
        };
        if !filters.contains(&filter) {
            skipped += 1;
            continue;
        }
        table.push(Measurement {
            oid: row.oid,
            filter,
            mjd: row.mjd,
            mag: row.mag,
            magerr: row.magerr,
            field: row.field,
            ccdid: row.ccdid,
            qid: row.qid,
            filefracday: row.filefracday,
        });
    }

    if skipped > 0 {
        log::debug!("Dropped {skipped} ZTF rows outside the requested filters");
    }
    Ok(table)
}

/// Parse an object catalogue response.
pub fn parse_object_csv<R: Read>(reader: R) -> Result<Vec<OidRecord>, RetrievalError> {
    let mut csv_reader = csv::Reader::from_reader(reader);
    let records = csv_reader
        .deserialize()
        .collect::<Result<Vec<OidRecord>, csv::Error>>()?;
    Ok(records)
}

/// Blocking client for the IRSA ZTF services.
#[derive(Debug, Clone)]
pub struct ZtfClient {
    agent: ureq::Agent,
    lightcurve_url: String,
    tap_url: String,
    filter_selection: String,
}

impl ZtfClient {
    /// Client for the public IRSA endpoints, requesting filters in
    /// `filter_selection`.
    pub fn new(filter_selection: &str) -> Self {
        Self::with_urls(filter_selection, LIGHTCURVE_URL, TAP_SYNC_URL, DEFAULT_TIMEOUT)
    }

    pub fn with_urls(
        filter_selection: &str,
        lightcurve_url: &str,
        tap_url: &str,
        timeout: Duration,
    ) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build();
        Self {
            agent: config.into(),
            lightcurve_url: lightcurve_url.to_string(),
            tap_url: tap_url.to_string(),
            filter_selection: filter_selection.to_string(),
        }
    }

    /// Query parameters of a cone search for `bands`.
    pub fn lightcurve_params(
        position: SkyPosition,
        radius_deg: f64,
        bands: &[FilterCode],
    ) -> Vec<(&'static str, String)> {
        let band_list = bands
            .iter()
            .map(|b| b.to_string())
            .collect::<Vec<_>>()
            .join(",");
        vec![
            (
                "POS",
                format!(
                    "CIRCLE {} {} {:.5}",
                    position.ra_deg, position.dec_deg, radius_deg
                ),
            ),
            ("BANDNAME", band_list),
            ("FORMAT", "CSV".to_string()),
            ("BAD_CATFLAGS_MASK", BAD_CATFLAGS_MASK.to_string()),
        ]
    }

    /// Cone search parameters narrowed to one filter and to the time and
    /// magnitude windows around `outlier`.
    pub fn field_params(
        position: SkyPosition,
        outlier: &Measurement,
        window: &FieldCheckConfig,
    ) -> Vec<(&'static str, String)> {
        let mut params = Self::lightcurve_params(position, window.radius_deg(), &[outlier.filter]);
        params.push((
            "TIME",
            format!(
                "{:.6} {:.6}",
                outlier.mjd - window.time_window_days,
                outlier.mjd + window.time_window_days
            ),
        ));
        params.push((
            "MAG",
            format!(
                "{:.3} {:.3}",
                outlier.mag - window.mag_window,
                outlier.mag + window.mag_window
            ),
        ));
        params
    }

    /// ADQL selecting the catalogue record of one object id.
    ///
    /// Ids are numeric; anything else is refused rather than interpolated.
    pub fn object_query(oid: &str) -> Result<String, RetrievalError> {
        Self::objects_query(&[oid])
    }

    /// ADQL selecting the catalogue records of several object ids.
    pub fn objects_query<S: AsRef<str>>(oids: &[S]) -> Result<String, RetrievalError> {
        let mut terms = Vec::with_capacity(oids.len());
        for oid in oids {
            let oid = oid.as_ref();
            if oid.is_empty() || !oid.chars().all(|c| c.is_ascii_digit()) {
                return Err(RetrievalError::InvalidOid(oid.to_string()));
            }
            terms.push(format!("oid={oid}"));
        }
        if terms.is_empty() {
            return Err(RetrievalError::InvalidOid(String::new()));
        }
        let order = if terms.len() > 1 { " ORDER BY oid" } else { "" };
        Ok(format!(
            "SELECT oid,filtercode,ra,dec,ngoodobs,refmag,refmagerr FROM {OBJECT_TABLE} WHERE {}{order}",
            terms.join(" OR ")
        ))
    }

    fn run_object_query(&self, query: &str) -> Result<Vec<OidRecord>, RetrievalError> {
        let response = self
            .agent
            .get(&self.tap_url)
            .query("QUERY", query)
            .query("FORMAT", "csv")
            .call()?;
        parse_object_csv(response.into_body().into_reader())
    }

    /// Catalogue records for `oid`. An unknown id gives an empty list.
    pub fn lookup_object(&self, oid: &str) -> Result<Vec<OidRecord>, RetrievalError> {
        let query = Self::object_query(oid)?;
        log::debug!("Querying {OBJECT_TABLE} for oid {oid}");
        self.run_object_query(&query)
    }

    /// Catalogue records for `oids`, queried in batches of
    /// [`OBJECT_QUERY_BATCH`].
    pub fn lookup_objects(&self, oids: &[String]) -> Result<Vec<OidRecord>, RetrievalError> {
        let mut records = Vec::new();
        for batch in oids.chunks(OBJECT_QUERY_BATCH) {
            let query = Self::objects_query(batch)?;
            log::debug!("Querying {OBJECT_TABLE} for {} oids", batch.len());
            records.extend(self.run_object_query(&query)?);
        }
        Ok(records)
    }

    /// Query each of `oids` and append the records found to `cache`.
    ///
    /// A failed query is logged and skipped. Returns the number of records
    /// added.
    pub fn refresh_cache(
        &self,
        cache: &mut OidCache,
        oids: &[String],
    ) -> Result<usize, RetrievalError> {
        let mut added = 0;
        for oid in oids.iter() {
            if cache.contains(oid) {
                continue;
            }
            let records = match self.lookup_object(oid) {
                Ok(records) => records,
                Err(e) => {
                    log::warn!("Reference lookup for oid {oid} failed: {e}");
                    continue;
                }
            };
            if records.is_empty() {
                log::info!("oid {oid} not found in {OBJECT_TABLE}");
            }
            for record in records {
                if cache.append(record)? {
                    added += 1;
                }
            }
        }
        Ok(added)
    }
}

impl LightcurveSource for ZtfClient {
    fn fetch(
        &self,
        archive: &ArchiveDescriptor,
        position: SkyPosition,
        radius_deg: f64,
    ) -> Result<FetchOutcome, RetrievalError> {
        if archive.code != ZTF.code {
            return Err(RetrievalError::UnsupportedArchive(archive.name));
        }
        let bands = archive.filters_requested(&self.filter_selection);
        if bands.is_empty() {
            log::info!(
                "No {} filters in selection '{}'",
                archive.name,
                self.filter_selection
            );
            return Ok(FetchOutcome::NoData);
        }

        log::debug!(
            "ZTF cone search at ({}, {}) radius {} deg",
            position.ra_deg,
            position.dec_deg,
            radius_deg
        );
        let response = self
            .agent
            .get(&self.lightcurve_url)
            .query_pairs(Self::lightcurve_params(position, radius_deg, &bands))
            .call()?;
        let table = parse_lightcurve_csv(response.into_body().into_reader(), &bands)?;
        log::info!("Retrieved {} ZTF measurements", table.len());
        Ok(FetchOutcome::from_table(table))
    }
}

impl FieldSource for ZtfClient {
    fn field_measurements(
        &self,
        position: SkyPosition,
        outlier: &Measurement,
        window: &FieldCheckConfig,
    ) -> Result<MeasurementTable, RetrievalError> {
        let response = self
            .agent
            .get(&self.lightcurve_url)
            .query_pairs(Self::field_params(position, outlier, window))
            .call()?;
        let table = parse_lightcurve_csv(response.into_body().into_reader(), &[outlier.filter])?;
        log::debug!(
            "{} field detections within {:.4} d of MJD {:.5}",
            table.len(),
            window.time_window_days,
            outlier.mjd
        );
        Ok(table)
    }

    fn field_references(&self, oids: &[String]) -> Result<Vec<OidRecord>, RetrievalError> {
        self.lookup_objects(oids)
    }
}
