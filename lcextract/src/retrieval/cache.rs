//! On-disk lightcurve cache in front of another source.

use lightcurve::ArchiveDescriptor;

use super::{FetchOutcome, LightcurveSource, RetrievalError, SkyPosition};
use crate::object::AstroObject;
use crate::storage::LightcurveStore;

/// Serves lightcurves from the data directory, falling back to `inner` and
/// saving what it returns.
///
/// Only non-empty results are cached, so objects without data are
/// re-queried on the next run.
#[derive(Debug, Clone)]
pub struct CachedSource<S> {
    inner: S,
    store: LightcurveStore,
    group: String,
    filter_selection: String,
}

impl<S: LightcurveSource> CachedSource<S> {
    /// # Arguments
    /// * `inner` - Source queried on a cache miss
    /// * `store` - Data directory
    /// * `group` - Cache subdirectory, a magnitude bin or `objects`
    /// * `filter_selection` - Configured filters, part of the cache key
    pub fn new(inner: S, store: LightcurveStore, group: &str, filter_selection: &str) -> Self {
        Self {
            inner,
            store,
            group: group.to_string(),
            filter_selection: filter_selection.to_string(),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn store(&self) -> &LightcurveStore {
        &self.store
    }

    fn filter_key(&self, archive: &ArchiveDescriptor) -> String {
        archive
            .filters_requested(&self.filter_selection)
            .into_iter()
            .collect()
    }

    fn fetch_keyed<F>(
        &self,
        archive: &ArchiveDescriptor,
        name: &str,
        query: F,
    ) -> Result<FetchOutcome, RetrievalError>
    where
        F: FnOnce() -> Result<FetchOutcome, RetrievalError>,
    {
        let filters = self.filter_key(archive);
        match self.store.get_lightcurve(&self.group, archive, &filters, name) {
            Some(Ok(table)) => {
                log::debug!("{} lightcurve for {} loaded from cache", archive.name, name);
                return Ok(FetchOutcome::from_table(table));
            }
            Some(Err(e)) => {
                log::warn!("Ignoring unreadable cached lightcurve for {name}: {e}");
            }
            None => {}
        }

        let outcome = query()?;
        if let FetchOutcome::Data(table) = &outcome {
            let path = self
                .store
                .save_lightcurve(&self.group, archive, &filters, name, table)?;
            log::debug!("Cached {} rows at {}", table.len(), path.display());
        }
        Ok(outcome)
    }
}

impl<S: LightcurveSource> LightcurveSource for CachedSource<S> {
    /// Anonymous positions are keyed by their coordinates.
    fn fetch(
        &self,
        archive: &ArchiveDescriptor,
        position: SkyPosition,
        radius_deg: f64,
    ) -> Result<FetchOutcome, RetrievalError> {
        let name = format!("{:.5}{:+.5}", position.ra_deg, position.dec_deg);
        self.fetch_keyed(archive, &name, || {
            self.inner.fetch(archive, position, radius_deg)
        })
    }

    fn fetch_object(
        &self,
        archive: &ArchiveDescriptor,
        object: &AstroObject,
        radius_deg: f64,
    ) -> Result<FetchOutcome, RetrievalError> {
        self.fetch_keyed(archive, &object.name, || {
            self.inner.fetch_object(archive, object, radius_deg)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lightcurve::archive::ZTF;
    use lightcurve::{Measurement, MeasurementTable};
    use std::cell::Cell;
    use tempfile::TempDir;

    /// Counts queries and answers with a fixed outcome.
    struct CountingSource {
        calls: Cell<usize>,
        outcome: FetchOutcome,
    }

    impl LightcurveSource for CountingSource {
        fn fetch(
            &self,
            _archive: &ArchiveDescriptor,
            _position: SkyPosition,
            _radius_deg: f64,
        ) -> Result<FetchOutcome, RetrievalError> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.outcome.clone())
        }
    }

    fn object() -> AstroObject {
        AstroObject::new("Test Star", 150.0, 2.0, "")
    }

    #[test]
    fn test_second_fetch_served_from_disk() {
        let dir = TempDir::new().unwrap();
        let table = MeasurementTable::new(vec![Measurement::new("9", 'g', 58000.0, 17.0, 0.02)]);
        let source = CountingSource {
            calls: Cell::new(0),
            outcome: FetchOutcome::Data(table.clone()),
        };
        let store = LightcurveStore::with_path(dir.path().to_path_buf());
        let cached = CachedSource::new(source, store.clone(), "objects", "gr");

        let first = cached.fetch_object(&ZTF, &object(), 0.001).unwrap();
        let second = cached.fetch_object(&ZTF, &object(), 0.001).unwrap();
        assert_eq!(first, FetchOutcome::Data(table.clone()));
        assert_eq!(second, first);
        assert_eq!(cached.inner().calls.get(), 1);
        assert!(store
            .lightcurve_path("objects", &ZTF, "gr", "Test Star")
            .exists());
    }

    #[test]
    fn test_no_data_not_cached() {
        let dir = TempDir::new().unwrap();
        let source = CountingSource {
            calls: Cell::new(0),
            outcome: FetchOutcome::NoData,
        };
        let cached = CachedSource::new(
            source,
            LightcurveStore::with_path(dir.path().to_path_buf()),
            "objects",
            "gr",
        );
        for _ in 0..2 {
            assert_eq!(
                cached.fetch(&ZTF, SkyPosition::new(10.0, -5.0), 0.001).unwrap(),
                FetchOutcome::NoData
            );
        }
        assert_eq!(cached.inner().calls.get(), 2);
    }
}
