use std::sync::Arc;

use geo::{Intersects, Rect};
use log::{debug, info};

use crate::config::IngestConfig;
use crate::data::feature::SourceFeature;
use crate::errors::Result;
use crate::pipeline::{Counter, ProgressLoggers, Topology, WorkQueue};
use crate::profile::Profile;
use crate::reader::{emit_features, write_to_store};
use crate::render::{FeatureRenderer, RenderedFeature};
use crate::source::FeatureSource;
use crate::store::SharedFeatureStore;

const QUEUE_CAPACITY: usize = 1_000;

#[derive(Debug, Clone, Default)]
pub struct SimpleStats {
    pub read: Counter,
    /// Features outside the configured bounds.
    pub skipped: Counter,
    pub written: Counter,
    pub malformed: Counter,
    pub storage_bytes: Counter,
}

/// Single-pass reader for sources whose features already carry geometry.
pub struct SimpleReader {
    source: Arc<dyn FeatureSource>,
    profile: Arc<dyn Profile>,
    config: IngestConfig,
    stats: SimpleStats,
}

struct SimpleWorker {
    profile: Arc<dyn Profile>,
    renderer: Arc<FeatureRenderer>,
    bounds: Option<Rect<f64>>,
    stats: SimpleStats,
}

impl SimpleWorker {
    fn in_bounds(&self, feature: &SourceFeature) -> bool {
        match (self.bounds, feature.bounding_rect()) {
            (None, _) => true,
            (Some(bounds), Some(envelope)) => bounds.intersects(&envelope),
            (Some(_), None) => false,
        }
    }

    fn process(&self, prev: &WorkQueue<SourceFeature>, next: &WorkQueue<RenderedFeature>) -> Result<()> {
        while let Some(feature) = prev.get() {
            self.stats.read.inc();
            if !self.in_bounds(&feature) {
                debug!(source = feature.source.as_str(), id = feature.id; "Skipping feature outside bounds");
                self.stats.skipped.inc();
                continue;
            }
            emit_features(
                self.profile.as_ref(),
                &self.renderer,
                &feature,
                next,
                &self.stats.malformed,
            )?;
        }
        Ok(())
    }
}

impl SimpleReader {
    pub fn new(source: Arc<dyn FeatureSource>, profile: Arc<dyn Profile>, config: IngestConfig) -> Self {
        SimpleReader {
            source,
            profile,
            config,
            stats: SimpleStats::default(),
        }
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    pub fn stats(&self) -> &SimpleStats {
        &self.stats
    }

    /// Approximate number of source features.
    pub fn count(&self) -> Result<u64> {
        self.source.count()
    }

    /// Reads every feature once and writes the rendered entries into `store`. Returns the
    /// number of entries written.
    pub fn run(&mut self, renderer: Arc<FeatureRenderer>, store: SharedFeatureStore) -> Result<u64> {
        let total = self.source.count()?;
        let worker = Arc::new(SimpleWorker {
            profile: Arc::clone(&self.profile),
            renderer,
            bounds: self.config.bounds_rect(),
            stats: self.stats.clone(),
        });
        let source = Arc::clone(&self.source);
        let topology = Topology::start(self.source.name())
            .from_generator("read", move |next| source.read(next))
            .add_buffer("read_queue", QUEUE_CAPACITY)
            .add_worker("process", self.config.threads, move |prev, next| worker.process(prev, next))
            .add_buffer("write_queue", QUEUE_CAPACITY)
            .sink_to_consumer(
                "write",
                write_to_store(store, self.stats.written.clone(), self.stats.storage_bytes.clone()),
            );

        let mut loggers = ProgressLoggers::new(self.source.name())
            .add_rate_percent_counter("read", total, &self.stats.read)
            .add_rate_counter("write", &self.stats.written)
            .add_byte_gauge("storage", {
                let storage_bytes = self.stats.storage_bytes.clone();
                move || storage_bytes.get()
            })
            .add_topology_stats();
        topology.await_and_log(&mut loggers, self.config.log_interval())?;

        info!(
            source = self.source.name(),
            read = self.stats.read.get(),
            skipped = self.stats.skipped.get(),
            features = self.stats.written.get(),
            malformed = self.stats.malformed.get();
            "Finished reading"
        );
        Ok(self.stats.written.get())
    }

    pub fn release(&self) {
        self.profile.release();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use geo::{LineString, Point};

    use super::*;
    use crate::data::attributes::Attributes;
    use crate::data::feature::SourceGeometry;
    use crate::errors::{Error, ErrorKind};
    use crate::render::{FeatureCollector, RenderConfig};
    use crate::source::memory::InMemoryFeatureSource;
    use crate::store::InMemoryFeatureStore;

    struct Centroids;

    impl Profile for Centroids {
        fn name(&self) -> &str {
            "centroids"
        }

        fn process_feature(&self, source: &SourceFeature, features: &mut FeatureCollector) -> Result<()> {
            if source.has_tag("fail", "yes") {
                return Err(Error::new(ErrorKind::Config, "profile refused feature"));
            }
            features.centroid("labels").copy_attrs(&source.tags, &["name"]);
            Ok(())
        }
    }

    fn point(id: i64, lon: f64, lat: f64, tags: &[(&str, &str)]) -> SourceFeature {
        SourceFeature::new(
            "shapes",
            id,
            Attributes::from_tags(tags.iter().copied()),
            SourceGeometry::Point(Point::new(lon, lat)),
        )
    }

    fn reader(features: Vec<SourceFeature>, bounds: Option<[f64; 4]>) -> SimpleReader {
        let mut config = IngestConfig::new("memory");
        config.threads = 2;
        config.bounds = bounds;
        SimpleReader::new(
            Arc::new(InMemoryFeatureSource::new("shapes", features)),
            Arc::new(Centroids),
            config,
        )
    }

    fn renderer() -> Arc<FeatureRenderer> {
        Arc::new(FeatureRenderer::new(RenderConfig {
            max_zoom: 0,
            ..RenderConfig::default()
        }))
    }

    #[test]
    fn features_outside_bounds_are_skipped() {
        let line = SourceFeature::new(
            "shapes",
            3,
            Attributes::new(),
            SourceGeometry::line(LineString::from(vec![(9.0, 9.0), (11.0, 11.0)])),
        );
        let mut reader = reader(
            vec![
                point(1, 5.0, 5.0, &[("name", "inside")]),
                point(2, 50.0, 50.0, &[("name", "outside")]),
                line,
            ],
            Some([0.0, 0.0, 10.0, 10.0]),
        );
        let store = Arc::new(Mutex::new(InMemoryFeatureStore::new()));
        let written = reader.run(renderer(), store.clone()).unwrap();

        assert_eq!(written, 2);
        assert_eq!(reader.stats().read.get(), 3);
        assert_eq!(reader.stats().skipped.get(), 1);
        let ids: Vec<i64> = store
            .lock()
            .unwrap()
            .sorted_features()
            .unwrap()
            .iter()
            .map(|feature| feature.id)
            .collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn profile_error_stops_the_reader() {
        let features = (0..500)
            .map(|id| {
                let tags: &[(&str, &str)] = if id == 250 { &[("fail", "yes")] } else { &[] };
                point(id, 1.0, 1.0, tags)
            })
            .collect();
        let mut reader = reader(features, None);
        let store = Arc::new(Mutex::new(InMemoryFeatureStore::new()));
        let err = reader.run(renderer(), store).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Config);
        assert!(reader.stats().read.get() <= 500);
    }
}
