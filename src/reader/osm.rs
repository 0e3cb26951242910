//! Two-pass OSM ingestion.
//!
//! Pass 1 streams the file once to collect node locations and relation side tables.
//! Pass 2 streams it again, rebuilds way and multipolygon geometry from those tables and
//! hands every element to the profile.

use std::mem::size_of;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use geo::LineString;
use log::{debug, info};

use crate::config::IngestConfig;
use crate::data::feature::{SourceFeature, SourceGeometry};
use crate::data::osm::{ElementType, OsmElement, OsmId, Relation, Way};
use crate::data::projection::{decode_flat_location, encode_flat_location};
use crate::errors::{Error, ErrorKind, Result};
use crate::memory::{format_bytes, MemoryEstimate};
use crate::pipeline::{Counter, ProgressLoggers, RendezvousGate, Topology, WorkQueue};
use crate::profile::Profile;
use crate::reader::multipolygon::build_multipolygon;
use crate::reader::node_locations::NodeLocationStore;
use crate::reader::relation_graph::RelationGraph;
use crate::reader::{emit_features, lock, write_to_store};
use crate::render::{FeatureRenderer, RenderedFeature};
use crate::source::OsmSource;
use crate::store::SharedFeatureStore;

/// Element counts seen in pass 1.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OsmTotals {
    pub nodes: u64,
    pub ways: u64,
    pub relations: u64,
}

/// Live counters of pass 2.
#[derive(Debug, Clone, Default)]
pub struct OsmStats {
    pub nodes: Counter,
    pub ways: Counter,
    pub relations: Counter,
    /// Entries accepted by the store.
    pub written: Counter,
    /// Elements and features dropped for bad or missing geometry.
    pub malformed: Counter,
    pub storage_bytes: Counter,
}

struct Pass1Tables {
    nodes: Box<dyn NodeLocationStore>,
    graph: RelationGraph,
}

impl MemoryEstimate for Pass1Tables {
    fn estimate_memory_usage_bytes(&self) -> u64 {
        self.nodes.estimate_memory_usage_bytes() + self.graph.estimate_memory_usage_bytes()
    }
}

fn check_capacity(used: u64, limit: Option<u64>) -> Result<()> {
    match limit {
        Some(limit) if used > limit => Err(Error::new(
            ErrorKind::CapacityExceeded,
            format!(
                "Side tables need {} but the limit is {}",
                format_bytes(used),
                format_bytes(limit)
            ),
        )),
        _ => Ok(()),
    }
}

pub struct OsmIngestor {
    source: Arc<dyn OsmSource>,
    profile: Arc<dyn Profile>,
    config: IngestConfig,
    totals: OsmTotals,
    estimated_elements: u64,
    node_locations: Option<Arc<dyn NodeLocationStore>>,
    relation_graph: Option<Arc<RelationGraph>>,
    way_geometries: Arc<DashMap<OsmId, Vec<u64>>>,
    way_geometry_bytes: Counter,
    stats: OsmStats,
}

impl OsmIngestor {
    pub fn new(source: Arc<dyn OsmSource>, profile: Arc<dyn Profile>, config: IngestConfig) -> Self {
        OsmIngestor {
            source,
            profile,
            config,
            totals: OsmTotals::default(),
            estimated_elements: 0,
            node_locations: None,
            relation_graph: None,
            way_geometries: Arc::new(DashMap::new()),
            way_geometry_bytes: Counter::new(),
            stats: OsmStats::default(),
        }
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    pub fn totals(&self) -> OsmTotals {
        self.totals
    }

    /// Element count the source reported before pass 1.
    pub fn estimated_elements(&self) -> u64 {
        self.estimated_elements
    }

    pub fn stats(&self) -> &OsmStats {
        &self.stats
    }

    pub fn node_locations(&self) -> Option<&dyn NodeLocationStore> {
        self.node_locations.as_deref()
    }

    pub fn relation_graph(&self) -> Option<&RelationGraph> {
        self.relation_graph.as_deref()
    }

    /// Reads the source once, storing every node location and the relation tables the
    /// profile asks for.
    pub fn osm_pass1(&mut self) -> Result<OsmTotals> {
        self.estimated_elements = self.source.count()?;
        info!(source = self.source.name(), estimated_elements = self.estimated_elements; "Starting pass 1");
        let tables = Arc::new(Mutex::new(Pass1Tables {
            nodes: self.config.node_location_store.create(),
            graph: RelationGraph::new(),
        }));
        let nodes = Counter::new();
        let ways = Counter::new();
        let relations = Counter::new();
        let side_table_bytes = Counter::new();
        let elements = Counter::new();

        let topology = {
            let source = Arc::clone(&self.source);
            let profile = Arc::clone(&self.profile);
            let tables = Arc::clone(&tables);
            let reader_threads = self.config.process_threads();
            let limit = self.config.max_side_table_bytes;
            let (nodes, ways, relations, side_table_bytes, elements) = (
                nodes.clone(),
                ways.clone(),
                relations.clone(),
                side_table_bytes.clone(),
                elements.clone(),
            );
            Topology::start("osm_pass1")
                .from_generator("read", move |next| source.read(reader_threads, next))
                .add_buffer("reader_queue", self.config.read_queue_capacity)
                .sink_to_consumer("process", move |element| {
                    let mut tables = lock(&*tables, "pass 1 tables")?;
                    elements.inc();
                    match element {
                        OsmElement::Node(node) => {
                            nodes.inc();
                            tables.nodes.put(node.id, encode_flat_location(node.lon, node.lat))?;
                        }
                        OsmElement::Way(_) => ways.inc(),
                        OsmElement::Relation(relation) => {
                            relations.inc();
                            let infos = profile.preprocess_osm_relation(&relation);
                            tables.graph.add_relation(&relation, infos);
                        }
                    }
                    let used = tables.estimate_memory_usage_bytes();
                    side_table_bytes.set(used);
                    check_capacity(used, limit)
                })
        };

        let mut loggers = ProgressLoggers::new("osm_pass1")
            .add_rate_percent_counter("elements", self.estimated_elements, &elements)
            .add_rate_counter("nodes", &nodes)
            .add_rate_counter("ways", &ways)
            .add_rate_counter("rels", &relations)
            .add_byte_gauge("side_tables", {
                let side_table_bytes = side_table_bytes.clone();
                move || side_table_bytes.get()
            })
            .add_topology_stats();
        topology.await_and_log(&mut loggers, self.config.log_interval())?;

        let tables = Arc::try_unwrap(tables)
            .map_err(|_| Error::pipeline_fault("pass 1 tables are still shared"))?
            .into_inner()
            .map_err(|_| Error::pipeline_fault("pass 1 tables lock poisoned"))?;
        let Pass1Tables { nodes: mut node_store, graph } = tables;
        node_store.finish();
        let graph = graph.freeze();

        self.totals = OsmTotals {
            nodes: nodes.get(),
            ways: ways.get(),
            relations: relations.get(),
        };
        info!(
            source = self.source.name(),
            nodes = self.totals.nodes,
            ways = self.totals.ways,
            relations = self.totals.relations,
            relations_with_info = graph.relations_with_info(),
            multipolygon_ways = graph.multipolygon_ways(),
            side_tables = format_bytes(node_store.estimate_memory_usage_bytes() + graph.estimate_memory_usage_bytes()).as_str();
            "Finished pass 1"
        );
        self.node_locations = Some(Arc::from(node_store));
        self.relation_graph = Some(graph);
        Ok(self.totals)
    }

    /// Reads the source a second time and emits rendered features into `store`.
    /// Returns the number of entries written.
    pub fn osm_pass2(&mut self, renderer: Arc<FeatureRenderer>, store: SharedFeatureStore) -> Result<u64> {
        let (Some(nodes), Some(graph)) = (self.node_locations.clone(), self.relation_graph.clone()) else {
            return Err(Error::contract_violation("osm_pass2 needs the tables built by osm_pass1"));
        };
        let process_threads = self.config.process_threads();
        let reader_threads = (self.config.threads / 4).max(1);
        let base_bytes = nodes.estimate_memory_usage_bytes() + graph.estimate_memory_usage_bytes();

        let worker = Arc::new(Pass2Worker {
            source_name: self.source.name().to_string(),
            profile: Arc::clone(&self.profile),
            renderer,
            nodes,
            graph,
            way_geometries: Arc::clone(&self.way_geometries),
            way_geometry_bytes: self.way_geometry_bytes.clone(),
            base_bytes,
            limit: self.config.max_side_table_bytes,
            gate: RendezvousGate::new(process_threads),
            stats: self.stats.clone(),
        });
        let source = Arc::clone(&self.source);
        let topology = Topology::start("osm_pass2")
            .from_generator("read", move |next| source.read(reader_threads, next))
            .add_buffer("reader_queue", self.config.read_queue_capacity)
            .add_worker("process", process_threads, move |prev, next| worker.process(prev, next))
            .add_buffer("feature_queue", self.config.feature_queue_capacity)
            .sink_to_consumer(
                "write",
                write_to_store(store, self.stats.written.clone(), self.stats.storage_bytes.clone()),
            );

        let totals = self.totals;
        let mut loggers = ProgressLoggers::new("osm_pass2")
            .add_rate_percent_counter("nodes", totals.nodes, &self.stats.nodes)
            .add_rate_percent_counter("ways", totals.ways, &self.stats.ways)
            .add_rate_percent_counter("rels", totals.relations, &self.stats.relations)
            .add_rate_counter("features", &self.stats.written)
            .add_byte_gauge("side_tables", {
                let way_geometry_bytes = self.way_geometry_bytes.clone();
                move || base_bytes + way_geometry_bytes.get()
            })
            .add_byte_gauge("storage", {
                let storage_bytes = self.stats.storage_bytes.clone();
                move || storage_bytes.get()
            })
            .add_topology_stats();
        topology.await_and_log(&mut loggers, self.config.log_interval())?;

        info!(
            source = self.source.name(),
            features = self.stats.written.get(),
            malformed = self.stats.malformed.get(),
            multipolygon_ways = self.way_geometries.len();
            "Finished pass 2"
        );
        Ok(self.stats.written.get())
    }

    /// Runs both passes and releases the side tables.
    pub fn run(&mut self, renderer: Arc<FeatureRenderer>, store: SharedFeatureStore) -> Result<u64> {
        let written = self.osm_pass1().and_then(|_| self.osm_pass2(renderer, store));
        self.release();
        written
    }

    /// Drops every side table and lets the profile release its own state.
    pub fn release(&mut self) {
        self.node_locations = None;
        self.relation_graph = None;
        self.way_geometries.clear();
        self.way_geometries.shrink_to_fit();
        self.way_geometry_bytes.set(0);
        self.profile.release();
    }
}

impl MemoryEstimate for OsmIngestor {
    fn estimate_memory_usage_bytes(&self) -> u64 {
        self.node_locations
            .as_ref()
            .map_or(0, |nodes| nodes.estimate_memory_usage_bytes())
            + self
                .relation_graph
                .as_ref()
                .map_or(0, |graph| graph.estimate_memory_usage_bytes())
            + self.way_geometry_bytes.get()
    }
}

/// State shared by the pass 2 `process` threads.
struct Pass2Worker {
    source_name: String,
    profile: Arc<dyn Profile>,
    renderer: Arc<FeatureRenderer>,
    nodes: Arc<dyn NodeLocationStore>,
    graph: Arc<RelationGraph>,
    way_geometries: Arc<DashMap<OsmId, Vec<u64>>>,
    way_geometry_bytes: Counter,
    base_bytes: u64,
    limit: Option<u64>,
    gate: RendezvousGate,
    stats: OsmStats,
}

impl Pass2Worker {
    fn process(&self, prev: &WorkQueue<OsmElement>, next: &WorkQueue<RenderedFeature>) -> Result<()> {
        // Arrives when this thread sees its first relation, or on return.
        let mut ticket = self.gate.ticket();
        while let Some(element) = prev.get() {
            let feature = match element {
                OsmElement::Node(node) => {
                    self.stats.nodes.inc();
                    Some(SourceFeature::osm_node(&self.source_name, node))
                }
                OsmElement::Way(way) => {
                    self.stats.ways.inc();
                    self.way_feature(way)?
                }
                OsmElement::Relation(relation) => {
                    ticket.wait();
                    self.stats.relations.inc();
                    if relation.is_multipolygon() {
                        self.multipolygon_feature(relation)
                    } else {
                        None
                    }
                }
            };
            if let Some(feature) = feature {
                emit_features(
                    self.profile.as_ref(),
                    &self.renderer,
                    &feature,
                    next,
                    &self.stats.malformed,
                )?;
            }
        }
        Ok(())
    }

    fn way_feature(&self, way: Way) -> Result<Option<SourceFeature>> {
        let locations = match resolve_way_nodes(self.nodes.as_ref(), &way) {
            Ok(locations) => locations,
            Err(err) => {
                debug!(way = way.id; "Dropping way: {}", err);
                self.stats.malformed.inc();
                return Ok(None);
            }
        };

        let in_multipolygon = self.graph.is_in_multipolygon(way.id);
        if in_multipolygon {
            let bytes = (locations.len() * size_of::<u64>() + size_of::<(OsmId, Vec<u64>)>()) as u64;
            self.way_geometries.insert(way.id, locations.clone());
            self.way_geometry_bytes.add(bytes);
            check_capacity(self.base_bytes + self.way_geometry_bytes.get(), self.limit)?;
        }
        if locations.len() < 2 {
            debug!(way = way.id, nodes = locations.len(); "Dropping way with fewer than 2 nodes");
            self.stats.malformed.inc();
            return Ok(None);
        }

        let line: LineString<f64> = locations
            .iter()
            .map(|location| decode_flat_location(*location))
            .collect();
        let mut feature = SourceFeature::new(self.source_name.as_str(), way.id, way.tags, SourceGeometry::line(line));
        feature.element = Some(ElementType::Way);
        feature.relations = self.graph.memberships(way.id);
        feature.in_multipolygon = in_multipolygon;
        Ok(Some(feature))
    }

    fn multipolygon_feature(&self, relation: Relation) -> Option<SourceFeature> {
        let (outer, inner) = match member_rings(&self.way_geometries, &relation) {
            Ok(rings) => rings,
            Err(err) => {
                debug!(relation = relation.id; "Dropping multipolygon: {}", err);
                self.stats.malformed.inc();
                return None;
            }
        };

        match build_multipolygon(relation.id, &outer, &inner) {
            Ok(polygons) => {
                let mut feature = SourceFeature::new(
                    self.source_name.as_str(),
                    relation.id,
                    relation.tags,
                    SourceGeometry::Polygon(polygons),
                );
                feature.element = Some(ElementType::Relation);
                feature.relation_info = self.graph.relation_info(relation.id).to_vec();
                Some(feature)
            }
            Err(err) => {
                debug!(relation = relation.id; "Dropping multipolygon: {}", err);
                self.stats.malformed.inc();
                None
            }
        }
    }
}

/// Encoded locations of every node of `way`, in order.
fn resolve_way_nodes(nodes: &dyn NodeLocationStore, way: &Way) -> Result<Vec<u64>> {
    way.node_ids
        .iter()
        .map(|node_id| {
            nodes
                .get(*node_id)
                .ok_or_else(|| Error::referential_gap(format!("way {} references missing node {}", way.id, node_id)))
        })
        .collect()
}

/// Splits the retained member geometries of a multipolygon into outer and inner segments.
fn member_rings(
    way_geometries: &DashMap<OsmId, Vec<u64>>,
    relation: &Relation,
) -> Result<(Vec<Vec<u64>>, Vec<Vec<u64>>)> {
    let mut outer = Vec::new();
    let mut inner = Vec::new();
    for member in relation.way_members() {
        let locations = way_geometries.get(&member.reference).ok_or_else(|| {
            Error::referential_gap(format!(
                "relation {} references missing way {}",
                relation.id, member.reference
            ))
        })?;
        if member.role == "inner" {
            inner.push(locations.value().clone());
        } else {
            outer.push(locations.value().clone());
        }
    }
    Ok((outer, inner))
}

#[cfg(test)]
mod tests {
    use std::any::Any;

    use super::*;
    use crate::data::attributes::Attributes;
    use crate::data::osm::{Member, Node};
    use crate::profile::RelationInfo;
    use crate::reader::node_locations::SortedTableNodeLocations;
    use crate::render::{FeatureCollector, RenderConfig, TileValue};
    use crate::source::memory::InMemoryOsmSource;
    use crate::store::{FeatureStore, InMemoryFeatureStore};

    #[derive(Debug)]
    struct Route(String);

    impl RelationInfo for Route {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct TestProfile;

    impl Profile for TestProfile {
        fn name(&self) -> &str {
            "test"
        }

        fn preprocess_osm_relation(&self, relation: &Relation) -> Option<Vec<Arc<dyn RelationInfo>>> {
            relation.has_tag("type", "route").then(|| {
                let name = relation.tags.get_string("ref").unwrap_or_default().to_string();
                vec![Arc::new(Route(name)) as Arc<dyn RelationInfo>]
            })
        }

        fn process_feature(&self, source: &SourceFeature, features: &mut FeatureCollector) -> Result<()> {
            if source.can_be_line() && !source.in_multipolygon {
                let routes: Vec<String> = source
                    .relation_info::<Route>()
                    .iter()
                    .map(|(_, route)| route.0.clone())
                    .collect();
                features
                    .line("lines")
                    .set_attr("routes", routes.join(","))
                    .set_min_pixel_size(0.0);
            }
            Ok(())
        }
    }

    fn node(id: OsmId, lon: f64, lat: f64) -> OsmElement {
        OsmElement::Node(Node {
            id,
            lon,
            lat,
            tags: Attributes::new(),
        })
    }

    fn way(id: OsmId, node_ids: &[OsmId]) -> OsmElement {
        OsmElement::Way(Way {
            id,
            node_ids: node_ids.to_vec(),
            tags: Attributes::from_tags([("highway", "primary")]),
        })
    }

    fn ingestor(elements: Vec<OsmElement>, max_side_table_bytes: Option<u64>) -> OsmIngestor {
        let mut config = IngestConfig::new("memory");
        config.threads = 3;
        config.max_side_table_bytes = max_side_table_bytes;
        let source = Arc::new(InMemoryOsmSource::new("osm", elements));
        OsmIngestor::new(source, Arc::new(TestProfile), config)
    }

    fn renderer() -> Arc<FeatureRenderer> {
        Arc::new(FeatureRenderer::new(RenderConfig {
            max_zoom: 0,
            ..RenderConfig::default()
        }))
    }

    #[test]
    fn missing_node_drops_only_that_way() {
        let mut ingestor = ingestor(
            vec![
                node(1, 0.0, 0.0),
                node(2, 1.0, 1.0),
                node(3, 2.0, 0.0),
                way(10, &[1, 2]),
                way(11, &[1, 99]),
                way(12, &[2, 3]),
            ],
            None,
        );
        let store = Arc::new(Mutex::new(InMemoryFeatureStore::new()));
        let written = ingestor.run(renderer(), store.clone()).unwrap();

        assert_eq!(written, 2);
        assert_eq!(ingestor.stats().malformed.get(), 1);
        assert_eq!(ingestor.totals().ways, 3);
        let ids: Vec<i64> = store
            .lock()
            .unwrap()
            .sorted_features()
            .unwrap()
            .iter()
            .map(|feature| feature.id)
            .collect();
        assert_eq!(ids, vec![10, 12]);
    }

    #[test]
    fn route_info_reaches_member_ways() {
        let route = OsmElement::Relation(Relation {
            id: 100,
            members: vec![Member {
                member_type: ElementType::Way,
                reference: 10,
                role: String::new(),
            }],
            tags: Attributes::from_tags([("type", "route"), ("ref", "U2")]),
        });
        let mut ingestor = ingestor(vec![node(1, 0.0, 0.0), node(2, 1.0, 1.0), way(10, &[1, 2]), route], None);
        ingestor.osm_pass1().unwrap();
        assert_eq!(ingestor.estimated_elements(), 4);
        assert_eq!(ingestor.relation_graph().unwrap().relations_with_info(), 1);
        assert_eq!(ingestor.node_locations().unwrap().len(), 2);
        assert!(ingestor.estimate_memory_usage_bytes() > 0);

        let store = Arc::new(Mutex::new(InMemoryFeatureStore::new()));
        ingestor.osm_pass2(renderer(), store.clone()).unwrap();
        let features = store.lock().unwrap().sorted_features().unwrap();
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].attr("routes"), Some(&TileValue::String("U2".to_string())));

        ingestor.release();
        assert!(ingestor.node_locations().is_none());
        assert_eq!(ingestor.estimate_memory_usage_bytes(), 0);
    }

    #[test]
    fn unresolved_references_are_referential_gaps() {
        let mut nodes = SortedTableNodeLocations::new();
        nodes.put(1, encode_flat_location(0.0, 0.0)).unwrap();
        nodes.put(2, encode_flat_location(1.0, 1.0)).unwrap();
        nodes.finish();
        let complete = Way {
            id: 10,
            node_ids: vec![1, 2],
            tags: Attributes::new(),
        };
        let broken = Way {
            id: 11,
            node_ids: vec![1, 99],
            ..complete.clone()
        };
        assert_eq!(resolve_way_nodes(&nodes, &complete).unwrap().len(), 2);
        let err = resolve_way_nodes(&nodes, &broken).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ReferentialGap);
        assert!(err.is_recoverable());

        let way_geometries = DashMap::new();
        way_geometries.insert(10, vec![1, 2, 3, 1]);
        let member = |reference, role: &str| Member {
            member_type: ElementType::Way,
            reference,
            role: role.to_string(),
        };
        let relation = Relation {
            id: 100,
            members: vec![member(10, "outer")],
            tags: Attributes::from_tags([("type", "multipolygon")]),
        };
        let (outer, inner) = member_rings(&way_geometries, &relation).unwrap();
        assert_eq!((outer.len(), inner.len()), (1, 0));
        let relation = Relation {
            members: vec![member(10, "outer"), member(12, "inner")],
            ..relation
        };
        assert_eq!(member_rings(&way_geometries, &relation).unwrap_err().kind, ErrorKind::ReferentialGap);
    }

    #[test]
    fn pass2_needs_pass1() {
        let mut ingestor = ingestor(vec![node(1, 0.0, 0.0)], None);
        let store = Arc::new(Mutex::new(InMemoryFeatureStore::new()));
        let err = ingestor.osm_pass2(renderer(), store).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ContractViolation);
    }

    #[test]
    fn side_table_limit_fails_pass1() {
        let elements = (1..=1_000).map(|id| node(id, 0.0, 0.0)).collect();
        let mut ingestor = ingestor(elements, Some(1_024));
        let store = Arc::new(Mutex::new(InMemoryFeatureStore::new()));
        let err = ingestor.run(renderer(), store.clone()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::CapacityExceeded);
        assert!(store.lock().unwrap().is_empty());
    }
}
