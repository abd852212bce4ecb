//! Lightcurve retrieval, caching and batch analysis tools.
//!
//! This crate wires the analysis core in [`lightcurve`] to the outside world:
//!
//! - [`retrieval`]: the [`LightcurveSource`] seam, the IRSA ZTF client and the
//!   on-disk lightcurve cache
//! - [`storage`]: data directory layout, the OID cross-reference cache and the
//!   list of objects known to have no lightcurve
//! - [`object`]: object lists and the per-object analysis pipeline
//! - [`reference`]: reference star samples and the noise calibration pipeline
//! - [`field_check`]: same-exposure field offsets of accepted outliers
//! - [`report`]: console summary tables
//!
//! The `lc_extract` and `ref_calibrate` binaries drive the two pipelines.

pub mod field_check;
pub mod object;
pub mod reference;
pub mod report;
pub mod retrieval;
pub mod shared_args;
pub mod storage;

pub use object::{ArchiveAnalysis, AstroObject, ObjectAnalyzer};
pub use reference::{ReferenceSample, ReferenceStar};
pub use retrieval::{FetchOutcome, FieldSource, LightcurveSource, RetrievalError, SkyPosition};
pub use storage::{LightcurveStore, NoLightcurveList, OidCache, OidRecord, StorageError};
