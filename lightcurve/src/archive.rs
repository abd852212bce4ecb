//! Survey archive descriptors.
//!
//! Each archive publishes lightcurves with its own column names and its own
//! encoding of the photometric filter. An [`ArchiveDescriptor`] captures those
//! conventions once so the rest of the crate can stay archive agnostic.

/// Single character photometric bandpass identifier ('g', 'r', 'i', 'z', 'y', 'R').
pub type FilterCode = char;

/// Immutable description of one survey archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveDescriptor {
    /// Display name, e.g. "ZTF"
    pub name: &'static str,
    /// Short code used in configuration and file names, e.g. 'z'
    pub code: char,
    /// Filters the archive can return, in archive order
    pub filters: &'static str,
    /// Column holding the magnitude
    pub mag_field: &'static str,
    /// Column holding the 1-sigma magnitude error
    pub mag_err_field: &'static str,
    /// Column holding the observation time (MJD)
    pub time_field: &'static str,
    /// Column holding the filter identifier
    pub filter_field: &'static str,
    /// Column holding the archive object id
    pub oid_field: &'static str,
    /// Marker used when plotting this archive's points
    pub marker: char,
    /// Raw archive filter identifiers and the filter code each maps to
    pub filter_codes: &'static [(&'static str, FilterCode)],
}

/// Zwicky Transient Facility lightcurves served by IRSA.
pub const ZTF: ArchiveDescriptor = ArchiveDescriptor {
    name: "ZTF",
    code: 'z',
    filters: "gri",
    mag_field: "mag",
    mag_err_field: "magerr",
    time_field: "mjd",
    filter_field: "filterID",
    oid_field: "oid",
    marker: '.',
    filter_codes: &[("zg", 'g'), ("zr", 'r'), ("zi", 'i')],
};

/// Pan-STARRS DR2 detections served by MAST.
pub const PANSTARRS: ArchiveDescriptor = ArchiveDescriptor {
    name: "Pan-STARRS",
    code: 'p',
    filters: "grizy",
    mag_field: "psfMag",
    mag_err_field: "psfMagErr",
    time_field: "obsTime",
    filter_field: "filtercode",
    oid_field: "objID",
    marker: '^',
    filter_codes: &[("1", 'g'), ("2", 'r'), ("3", 'i'), ("4", 'z'), ("5", 'y')],
};

/// Palomar Transient Factory lightcurves served by IRSA.
pub const PTF: ArchiveDescriptor = ArchiveDescriptor {
    name: "PTF",
    code: 't',
    filters: "gR",
    mag_field: "mag_autocorr",
    mag_err_field: "magerr_auto",
    time_field: "obsmjd",
    filter_field: "filterID",
    oid_field: "oid",
    marker: 's',
    filter_codes: &[("1", 'g'), ("2", 'R')],
};

/// All archives known to the crate, in default query order.
pub const ALL_ARCHIVES: [ArchiveDescriptor; 3] = [ZTF, PANSTARRS, PTF];

impl ArchiveDescriptor {
    /// Look up a built-in archive by its short code.
    pub fn by_code(code: char) -> Option<&'static ArchiveDescriptor> {
        ALL_ARCHIVES.iter().find(|a| a.code == code)
    }

    /// Whether this archive can return data in `filter`.
    pub fn supports(&self, filter: FilterCode) -> bool {
        self.filters.contains(filter)
    }

    /// Translate a raw archive filter identifier into a filter code.
    ///
    /// Values that are already a supported single filter character are
    /// accepted as-is, which lets cached tables round-trip.
    pub fn filter_from_raw(&self, raw: &str) -> Option<FilterCode> {
        let raw = raw.trim();
        if let Some((_, code)) = self.filter_codes.iter().find(|(id, _)| *id == raw) {
            return Some(*code);
        }
        let mut chars = raw.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if self.supports(c) => Some(c),
            _ => None,
        }
    }

    /// Raw archive identifier for a filter code (e.g. 'g' -> "zg" for ZTF).
    pub fn raw_filter_id(&self, filter: FilterCode) -> Option<&'static str> {
        self.filter_codes
            .iter()
            .find(|(_, code)| *code == filter)
            .map(|(id, _)| *id)
    }

    /// Subset of this archive's filters that are present in `selection`.
    ///
    /// Archive order is preserved. An empty selection means "everything the
    /// archive offers".
    pub fn filters_requested(&self, selection: &str) -> Vec<FilterCode> {
        self.filters
            .chars()
            .filter(|f| selection.is_empty() || selection.contains(*f))
            .collect()
    }
}

/// Whether any built-in archive supports `filter`.
pub fn is_known_filter(filter: FilterCode) -> bool {
    ALL_ARCHIVES.iter().any(|a| a.supports(filter))
}
