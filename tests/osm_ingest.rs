mod common;

use common::{config, ingest, node, number, relation, way};
use osm_tiler::data::osm::OsmElement;
use osm_tiler::data::tile::{TileCoord, TileOrder};
use osm_tiler::errors::ErrorKind;
use osm_tiler::render::RenderedGeometry;

const AREA_TOLERANCE: f64 = 1e-5;

fn unit_square_in_two_halves() -> Vec<OsmElement> {
    vec![
        node(1, 0.0, 0.0),
        node(2, 1.0, 0.0),
        node(3, 1.0, 1.0),
        node(4, 0.0, 1.0),
        way(10, &[1, 2, 3], &[]),
        way(11, &[3, 4, 1], &[]),
        relation(100, &[("type", "multipolygon"), ("building", "yes")], &[(10, "outer"), (11, "outer")]),
    ]
}

#[test]
fn unit_square_multipolygon_has_unit_area() {
    let ingested = ingest(unit_square_in_two_halves(), config(3), 0);
    assert_eq!(ingested.result.unwrap(), 1);
    assert_eq!(ingested.features.len(), 1);
    let building = &ingested.features[0];
    assert_eq!(building.id, 100);
    assert_eq!(building.layer, "buildings");
    assert!((number(building, "area") - 1.0).abs() < AREA_TOLERANCE);
    assert!(matches!(building.geometry, RenderedGeometry::Polygons(_)));
    assert_eq!(ingested.ingestor.stats().malformed.get(), 0);
}

#[test]
fn inner_ring_becomes_a_hole() {
    let elements = vec![
        node(1, 0.0, 0.0),
        node(2, 4.0, 0.0),
        node(3, 4.0, 4.0),
        node(4, 0.0, 4.0),
        node(5, 1.0, 1.0),
        node(6, 2.0, 1.0),
        node(7, 2.0, 2.0),
        node(8, 1.0, 2.0),
        way(10, &[1, 2, 3, 4, 1], &[]),
        way(11, &[5, 6, 7], &[]),
        way(12, &[7, 8, 5], &[]),
        relation(
            100,
            &[("type", "multipolygon"), ("building", "yes")],
            &[(10, "outer"), (11, "inner"), (12, "inner")],
        ),
    ];
    let ingested = ingest(elements, config(4), 0);
    ingested.result.unwrap();
    assert_eq!(ingested.features.len(), 1);
    assert!((number(&ingested.features[0], "area") - 15.0).abs() < AREA_TOLERANCE * 16.0);
}

/// The last member way before the relation is slow to resolve. Four process threads
/// race through the input, so the worker that picks up the relation must hold it until
/// the slow way has been stored.
#[test]
fn relations_wait_for_every_way() {
    const REPEATED_REFS: usize = 200_000;
    let mut slow_ring = vec![5, 6];
    slow_ring.extend(std::iter::repeat(7).take(REPEATED_REFS));
    slow_ring.extend([8, 5]);

    let mut elements = vec![
        node(1, 0.0, 0.0),
        node(2, 1.0, 0.0),
        node(3, 1.0, 1.0),
        node(4, 0.0, 1.0),
        node(5, 2.0, 0.0),
        node(6, 3.0, 0.0),
        node(7, 3.0, 1.0),
        node(8, 2.0, 1.0),
    ];
    for index in 0..200 {
        elements.push(way(10_000 + index, &[1, 3], &[("highway", "service")]));
    }
    elements.push(way(100, &[1, 2, 3, 4, 1], &[]));
    elements.push(way(101, &slow_ring, &[]));
    elements.push(relation(1, &[("type", "multipolygon"), ("building", "yes")], &[(100, "outer"), (101, "outer")]));

    for _ in 0..5 {
        // threads - 1 = 4 process threads share the gate.
        let ingested = ingest(elements.clone(), config(5), 0);
        assert_eq!(ingested.result.unwrap(), 201);
        let buildings: Vec<_> = ingested
            .features
            .iter()
            .filter(|feature| feature.layer == "buildings")
            .collect();
        assert_eq!(buildings.len(), 1);
        assert!((number(buildings[0], "area") - 2.0).abs() < AREA_TOLERANCE * 2.0);
        assert_eq!(ingested.ingestor.stats().malformed.get(), 0);
    }
}

#[test]
fn missing_node_drops_the_way_and_its_multipolygon() {
    let mut elements = unit_square_in_two_halves();
    elements.remove(3);
    elements.insert(3, way(20, &[1, 2], &[("highway", "primary")]));
    let ingested = ingest(elements, config(3), 0);
    assert_eq!(ingested.result.unwrap(), 1);
    assert_eq!(ingested.features.len(), 1);
    assert_eq!(ingested.features[0].id, 20);
    // way 11 lost node 4, then relation 100 lost way 11
    assert_eq!(ingested.ingestor.stats().malformed.get(), 2);
    assert_eq!(ingested.ingestor.totals().nodes, 3);
}

#[test]
fn multipolygon_without_closed_outer_is_dropped() {
    let elements = vec![
        node(1, 0.0, 0.0),
        node(2, 1.0, 0.0),
        node(3, 1.0, 1.0),
        way(10, &[1, 2, 3], &[]),
        relation(100, &[("type", "multipolygon"), ("building", "yes")], &[(10, "outer")]),
    ];
    let ingested = ingest(elements, config(2), 0);
    assert_eq!(ingested.result.unwrap(), 0);
    assert_eq!(ingested.ingestor.stats().malformed.get(), 1);
}

#[test]
fn way_geometries_count_against_the_side_table_limit() {
    let mut elements = Vec::new();
    let mut members = Vec::new();
    for id in 1..=4 {
        elements.push(node(id, id as f64 * 0.1, 0.0));
    }
    for id in 0..2_000 {
        elements.push(way(100 + id, &[1, 2, 3, 4, 1], &[]));
        members.push((100 + id, "outer"));
    }
    elements.push(relation(1, &[("type", "multipolygon")], &members));

    let unlimited = ingest(elements.clone(), config(3), 0);
    unlimited.result.unwrap();
    let mut limited = config(3);
    // Enough for pass 1, not for the way geometries of pass 2.
    limited.max_side_table_bytes = Some(100_000);
    let err = ingest(elements, limited, 0).result.unwrap_err();
    assert_eq!(err.kind, ErrorKind::CapacityExceeded);
}

#[test]
fn output_does_not_depend_on_thread_count() {
    let mut elements = unit_square_in_two_halves();
    for id in 0..200 {
        elements.insert(6, way(1_000 + id, &[1, 3], &[("highway", "residential")]));
    }
    let single = ingest(elements.clone(), config(1), 3);
    let parallel = ingest(elements, config(8), 3);
    single.result.unwrap();
    parallel.result.unwrap();
    assert!(!single.features.is_empty());
    assert_eq!(single.features, parallel.features);
}

#[test]
fn hilbert_order_keys_entries_by_hilbert_index() {
    let mut config = config(3);
    config.tile_order = TileOrder::Hilbert;
    let ingested = ingest(unit_square_in_two_halves(), config, 4);
    ingested.result.unwrap();

    let tiles: Vec<TileCoord> = ingested
        .features
        .iter()
        .map(|feature| TileOrder::Hilbert.decode(feature.tile).unwrap())
        .collect();
    assert!(tiles.iter().all(|tile| tile.z() <= 4));
    assert_eq!(tiles.iter().filter(|tile| tile.z() == 0).count(), 1);
    let center = TileCoord::around_lng_lat(0.5, 0.5, 4).unwrap();
    assert!(tiles.contains(&center));
    let position = tiles.iter().position(|tile| *tile == center).unwrap();
    assert_eq!(ingested.features[position].tile, center.hilbert_encoded());
}
