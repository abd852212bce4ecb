//! Reference star samples and the noise calibration pipeline.
//!
//! A reference sample holds one [`ReferenceStar`] per star and filter: the
//! summary statistics of that star's own lightcurve plus the archive
//! reference magnitude of its primary object id. Calibration re-bins the
//! sample by reference magnitude, sigma clips each bin, and fits the noise
//! curve to the clipped median scatter.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use lightcurve::archive::{FilterCode, ZTF};
use lightcurve::calibrate::{CalibrationError, ReferenceCalibrator};
use lightcurve::{
    CalibrationConfig, CalibrationTable, LightcurveConfig, MeasurementTable,
    NoiseModelCoefficients, PerFilterStats, ScatterSample,
};
use serde::{Deserialize, Serialize};

use crate::object::AstroObject;
use crate::retrieval::{CachedSource, FetchOutcome, LightcurveSource, ReferenceLookup};
use crate::storage::{magnitude_group, LightcurveStore, NoLightcurveList, StorageError};

/// Lightcurve summary of one reference star in one filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceStar {
    pub name: String,
    pub ra: f64,
    pub dec: f64,
    /// Catalogue magnitude the star was selected by
    pub catalog_mag: f64,
    pub filter: FilterCode,
    /// Primary archive object id, empty when there is no lightcurve
    pub oid: String,
    pub samples: usize,
    pub mad: f64,
    pub sd: f64,
    pub median: f64,
    pub mean: f64,
    /// False once the star has been clipped from its calibration bin
    pub included: bool,
    /// Archive reference image magnitude of `oid`
    pub ref_mag: Option<f64>,
}

impl ReferenceStar {
    /// Star with no lightcurve in `filter`.
    pub fn without_data(object: &AstroObject, catalog_mag: f64, filter: FilterCode) -> Self {
        Self {
            name: object.name.clone(),
            ra: object.ra,
            dec: object.dec,
            catalog_mag,
            filter,
            oid: String::new(),
            samples: 0,
            mad: f64::NAN,
            sd: f64::NAN,
            median: f64::NAN,
            mean: f64::NAN,
            included: false,
            ref_mag: None,
        }
    }

    /// One record per filter present in `table`.
    ///
    /// Reference magnitudes come from `lookup`; a miss leaves `ref_mag` empty.
    pub fn from_table(
        object: &AstroObject,
        catalog_mag: f64,
        table: &MeasurementTable,
        lookup: &dyn ReferenceLookup,
    ) -> Vec<Self> {
        let stats = PerFilterStats::from_table(table);
        table
            .primary_ids()
            .into_iter()
            .filter_map(|(filter, oid)| {
                let series = stats.series(filter)?;
                let ref_mag = lookup
                    .lookup(&oid)
                    .filter(|r| r.filter() == Some(filter))
                    .map(|r| r.refmag);
                Some(Self {
                    name: object.name.clone(),
                    ra: object.ra,
                    dec: object.dec,
                    catalog_mag,
                    filter,
                    oid,
                    samples: series.count,
                    mad: series.mad,
                    sd: series.std_dev,
                    median: series.median,
                    mean: series.mean,
                    included: series.count > 0,
                    ref_mag,
                })
            })
            .collect()
    }

    /// Calibration input, if the star has a reference magnitude.
    pub fn scatter_sample(&self) -> Option<ScatterSample> {
        let ref_mag = self.ref_mag.filter(|m| m.is_finite())?;
        Some(ScatterSample {
            id: self.sample_id(),
            ref_mag,
            sd: self.sd,
            samples: self.samples,
        })
    }

    fn sample_id(&self) -> String {
        format!("{}:{}", self.name, self.filter)
    }
}

/// Result of one calibration run.
#[derive(Debug, Clone)]
pub struct Calibration {
    pub table: CalibrationTable,
    pub model: NoiseModelCoefficients,
}

/// A set of reference stars across filters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceSample {
    stars: Vec<ReferenceStar>,
}

impl ReferenceSample {
    pub fn new(stars: Vec<ReferenceStar>) -> Self {
        Self { stars }
    }

    pub fn stars(&self) -> &[ReferenceStar] {
        &self.stars
    }

    pub fn len(&self) -> usize {
        self.stars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stars.is_empty()
    }

    pub fn extend<I: IntoIterator<Item = ReferenceStar>>(&mut self, stars: I) {
        self.stars.extend(stars);
    }

    /// Filters present, in first-seen order.
    pub fn filters(&self) -> Vec<FilterCode> {
        let mut filters = Vec::new();
        for star in &self.stars {
            if !filters.contains(&star.filter) {
                filters.push(star.filter);
            }
        }
        filters
    }

    /// Fill missing reference magnitudes from `lookup`.
    ///
    /// Returns the object ids still unresolved.
    pub fn fill_reference_mags(&mut self, lookup: &dyn ReferenceLookup) -> Vec<String> {
        let mut missing = Vec::new();
        let pending = self
            .stars
            .iter_mut()
            .filter(|s| s.ref_mag.is_none() && !s.oid.is_empty());
        for star in pending {
            star.ref_mag = lookup
                .lookup(&star.oid)
                .filter(|r| r.filter() == Some(star.filter))
                .map(|r| r.refmag);
            if star.ref_mag.is_none() {
                missing.push(star.oid.clone());
            }
        }
        missing
    }

    /// Calibration inputs of one filter inside the configured magnitude range.
    pub fn scatter_samples(
        &self,
        filter: FilterCode,
        config: &CalibrationConfig,
    ) -> Vec<ScatterSample> {
        self.stars
            .iter()
            .filter(|s| s.filter == filter && s.samples > 0)
            .filter_map(ReferenceStar::scatter_sample)
            .filter(|s| (config.min_mag..=config.max_mag).contains(&s.ref_mag))
            .collect()
    }

    /// Re-bin, sigma clip and summarise every filter.
    ///
    /// Afterwards a star is included only if it survived clipping in its
    /// bin. Stars outside `[min_mag, max_mag]` and stars beyond the
    /// `sample_size` cap of their bin are marked as not included too. Blank
    /// rows are removed from the returned table.
    pub fn calibrate(&mut self, config: &CalibrationConfig) -> CalibrationTable {
        let calibrator = ReferenceCalibrator::from_config(config);
        let mut table = CalibrationTable::new();
        let filters = self.filters();
        let mut used: HashSet<String> = HashSet::new();

        for &filter in &filters {
            let samples = self.scatter_samples(filter, config);
            log::info!("Calibrating filter {filter} from {} reference stars", samples.len());
            let capped = cap_per_bin(samples, config);
            for (row, bin) in calibrator.calibrate_bins(filter, &capped, config.step_mag) {
                used.extend(bin.included().map(|s| s.id.clone()));
                table.push(row);
            }
        }

        let mut dropped = 0;
        for star in self.stars.iter_mut().filter(|s| filters.contains(&s.filter)) {
            let keep = used.contains(&star.sample_id());
            if star.included && !keep {
                dropped += 1;
            }
            star.included = keep;
        }
        log::debug!("{dropped} reference stars left out of calibration");
        table.remove_blanks();
        table
    }

    /// Calibrate, then fit the noise curve of `config.fit_degree`.
    pub fn calibrate_and_fit(
        &mut self,
        config: &CalibrationConfig,
    ) -> Result<Calibration, CalibrationError> {
        let table = self.calibrate(config);
        let model = table.fit_noise_model(config.fit_degree)?;
        Ok(Calibration { table, model })
    }

    pub fn load_csv<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let mut reader = csv::Reader::from_path(path)?;
        let stars = reader
            .deserialize()
            .collect::<Result<Vec<ReferenceStar>, csv::Error>>()?;
        Ok(Self { stars })
    }

    pub fn save_csv<P: AsRef<Path>>(&self, path: P) -> Result<(), StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(path)?;
        for star in &self.stars {
            writer.serialize(star)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Candidate reference star with the catalogue magnitude it was selected by.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub object: AstroObject,
    pub catalog_mag: f64,
}

#[derive(Debug, Deserialize)]
struct CandidateRow {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "RA")]
    ra: f64,
    #[serde(rename = "DEC")]
    dec: f64,
    #[serde(rename = "Description", default)]
    description: String,
    #[serde(rename = "Mag")]
    mag: f64,
}

/// Load candidates from CSV with columns `Name,RA,DEC,Description,Mag`.
pub fn load_candidates<P: AsRef<Path>>(path: P) -> Result<Vec<Candidate>, StorageError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)?;
    let mut candidates = Vec::new();
    for row in reader.deserialize::<CandidateRow>() {
        let row = row?;
        candidates.push(Candidate {
            object: AstroObject::new(&row.name, row.ra, row.dec, &row.description),
            catalog_mag: row.mag,
        });
    }
    Ok(candidates)
}

/// Build a ZTF reference sample from candidate stars.
///
/// Lightcurves are cached under each candidate's magnitude group. Candidates
/// already on the no-lightcurve list are not queried; candidates that come
/// back empty are added to it. Every candidate yields one record per
/// requested filter, blank where there is no data.
pub fn gather_sample(
    candidates: &[Candidate],
    source: &dyn LightcurveSource,
    store: &LightcurveStore,
    config: &LightcurveConfig,
    references: &dyn ReferenceLookup,
    no_lightcurve: &mut NoLightcurveList,
) -> Result<ReferenceSample, StorageError> {
    let filters = ZTF.filters_requested(&config.filter_selection);
    let mut sample = ReferenceSample::default();

    for (i, candidate) in candidates.iter().enumerate() {
        let object = &candidate.object;
        let blanks = |present: &[FilterCode]| -> Vec<ReferenceStar> {
            filters
                .iter()
                .filter(|f| !present.contains(*f))
                .map(|&f| ReferenceStar::without_data(object, candidate.catalog_mag, f))
                .collect()
        };

        if no_lightcurve.contains(&object.name) {
            log::debug!("{} is on the no-lightcurve list", object.name);
            sample.extend(blanks(&[]));
            continue;
        }

        let cached = CachedSource::new(
            source,
            store.clone(),
            &magnitude_group(candidate.catalog_mag),
            &config.filter_selection,
        );
        match cached.fetch_object(&ZTF, object, config.cone_radius_deg()) {
            Ok(FetchOutcome::Data(table)) => {
                let stars =
                    ReferenceStar::from_table(object, candidate.catalog_mag, &table, references);
                let present: Vec<FilterCode> = stars.iter().map(|s| s.filter).collect();
                sample.extend(stars.into_iter().filter(|s| filters.contains(&s.filter)));
                sample.extend(blanks(&present));
            }
            Ok(FetchOutcome::NoData) => {
                no_lightcurve.add(&object.name, candidate.catalog_mag)?;
                sample.extend(blanks(&[]));
            }
            Err(e) => {
                log::warn!("Lightcurve query for {} failed: {}", object.name, e);
                sample.extend(blanks(&[]));
            }
        }
        log::debug!("Sampled candidate {} of {}", i + 1, candidates.len());
    }
    Ok(sample)
}

/// Keep at most `sample_size` stars in each bin of the grid.
fn cap_per_bin(samples: Vec<ScatterSample>, config: &CalibrationConfig) -> Vec<ScatterSample> {
    let step = config.step_mag;
    let mut counts: HashMap<i64, usize> = HashMap::new();
    let before = samples.len();
    let kept: Vec<ScatterSample> = samples
        .into_iter()
        .filter(|s| {
            let slot = counts.entry((s.ref_mag / step).round() as i64).or_insert(0);
            *slot += 1;
            *slot <= config.sample_size
        })
        .collect();
    if kept.len() < before {
        log::info!("Dropped {} stars beyond {} per bin", before - kept.len(), config.sample_size);
    }
    kept
}
