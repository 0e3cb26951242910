#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use osm_tiler::config::IngestConfig;
use osm_tiler::data::attributes::Attributes;
use osm_tiler::data::feature::SourceFeature;
use osm_tiler::data::osm::{ElementType, Member, Node, OsmElement, OsmId, Relation, Way};
use osm_tiler::errors::Result;
use osm_tiler::profile::Profile;
use osm_tiler::reader::osm::OsmIngestor;
use osm_tiler::render::{FeatureCollector, FeatureRenderer, RenderConfig, RenderedFeature, TileValue};
use osm_tiler::source::memory::InMemoryOsmSource;
use osm_tiler::store::InMemoryFeatureStore;

pub fn node(id: OsmId, lon: f64, lat: f64) -> OsmElement {
    OsmElement::Node(Node {
        id,
        lon,
        lat,
        tags: Attributes::new(),
    })
}

pub fn way(id: OsmId, node_ids: &[OsmId], tags: &[(&str, &str)]) -> OsmElement {
    OsmElement::Way(Way {
        id,
        node_ids: node_ids.to_vec(),
        tags: Attributes::from_tags(tags.iter().copied()),
    })
}

/// A relation whose members are all ways.
pub fn relation(id: OsmId, tags: &[(&str, &str)], ways: &[(OsmId, &str)]) -> OsmElement {
    OsmElement::Relation(Relation {
        id,
        members: ways
            .iter()
            .map(|(reference, role)| Member {
                member_type: ElementType::Way,
                reference: *reference,
                role: role.to_string(),
            })
            .collect(),
        tags: Attributes::from_tags(tags.iter().copied()),
    })
}

/// Emits buildings as polygons carrying their area in square degrees and highways as
/// lines.
pub struct AreaProfile;

impl Profile for AreaProfile {
    fn name(&self) -> &str {
        "areas"
    }

    fn process_feature(&self, source: &SourceFeature, features: &mut FeatureCollector) -> Result<()> {
        if source.has_key("building") && source.can_be_polygon() {
            features
                .polygon("buildings")
                .set_attr("area", source.area())
                .set_min_pixel_size(0.0);
        } else if source.has_key("highway") && source.can_be_line() {
            features.line("roads").set_min_pixel_size(0.0);
        }
        Ok(())
    }
}

pub fn config(threads: usize) -> IngestConfig {
    let mut config = IngestConfig::new("memory");
    config.threads = threads;
    config.read_queue_capacity = 64;
    config.feature_queue_capacity = 64;
    config
}

pub fn renderer(config: &IngestConfig, max_zoom: u8) -> Arc<FeatureRenderer> {
    Arc::new(FeatureRenderer::new(RenderConfig {
        max_zoom,
        tile_order: config.tile_order,
        ..RenderConfig::default()
    }))
}

pub struct Ingested {
    pub result: Result<u64>,
    pub ingestor: OsmIngestor,
    pub features: Vec<RenderedFeature>,
}

pub fn ingest(elements: Vec<OsmElement>, config: IngestConfig, max_zoom: u8) -> Ingested {
    let renderer = renderer(&config, max_zoom);
    let source = Arc::new(InMemoryOsmSource::new("osm", elements));
    let mut ingestor = OsmIngestor::new(source, Arc::new(AreaProfile), config);
    let store = Arc::new(Mutex::new(InMemoryFeatureStore::new()));
    let result = ingestor.run(renderer, store.clone());
    let features = store.lock().unwrap().sorted_features().unwrap();
    Ingested {
        result,
        ingestor,
        features,
    }
}

pub fn number(feature: &RenderedFeature, key: &str) -> f64 {
    match feature.attr(key) {
        Some(TileValue::Number(value)) => *value,
        other => panic!("expected number for {key}, got {other:?}"),
    }
}
