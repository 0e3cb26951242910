//! Readers turn a source into rendered features in a store.
//!
//! Both readers share the same tail: the profile fills a [`FeatureCollector`] per source
//! feature, every collected feature is rendered into per-tile entries, and a single
//! `write` stage hands the entries to the store.

pub mod multipolygon;
pub mod node_locations;
pub mod osm;
pub mod relation_graph;
pub mod simple;

use std::sync::{Mutex, MutexGuard};

use log::debug;

use crate::data::feature::SourceFeature;
use crate::errors::{Error, Result};
use crate::pipeline::{Counter, WorkQueue};
use crate::profile::Profile;
use crate::render::{FeatureCollector, FeatureRenderer, RenderedFeature};
use crate::store::SharedFeatureStore;

pub(crate) fn lock<'a, T: ?Sized>(mutex: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>> {
    mutex
        .lock()
        .map_err(|_| Error::pipeline_fault(format!("{what} lock poisoned")))
}

/// Runs the profile on `source` and pushes every rendered entry to `next`.
///
/// Features the profile started without a usable geometry, and features the renderer
/// rejects as malformed, are counted in `malformed` and skipped. Any other error is
/// returned. Returns the number of entries pushed.
pub(crate) fn emit_features(
    profile: &dyn Profile,
    renderer: &FeatureRenderer,
    source: &SourceFeature,
    next: &WorkQueue<RenderedFeature>,
    malformed: &Counter,
) -> Result<u64> {
    let mut collector = FeatureCollector::new(source);
    profile.process_feature(source, &mut collector)?;
    malformed.add(collector.malformed());

    let mut emitted = 0;
    for feature in collector.into_features() {
        if feature.geometry().is_none() {
            continue;
        }
        match renderer.render(&feature) {
            Ok(entries) => {
                for entry in entries {
                    next.put(entry)?;
                    emitted += 1;
                }
            }
            Err(err) if err.is_recoverable() => {
                debug!(source = source.source.as_str(), id = source.id; "Dropping feature: {}", err);
                malformed.inc();
            }
            Err(err) => return Err(err),
        }
    }
    Ok(emitted)
}

/// The `write` stage: hands each entry to the store and tracks the store size.
pub(crate) fn write_to_store(
    store: SharedFeatureStore,
    written: Counter,
    storage_bytes: Counter,
) -> impl FnMut(RenderedFeature) -> Result<()> + Send + 'static {
    move |entry| {
        let mut store = lock(&*store, "feature store")?;
        store.accept(&entry)?;
        written.inc();
        storage_bytes.set(store.storage_size());
        Ok(())
    }
}
