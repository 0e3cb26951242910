//! Builds multipolygon geometry from the member ways of a relation.
//!
//! Member ways are chained end to end into closed rings. Rings from `inner` members
//! become holes of the smallest outer ring that contains them, every other role is
//! treated as outer.

use std::collections::HashMap;

use geo::{Area, Contains, InteriorPoint, LineString, MultiPolygon, Polygon};
use log::debug;

use crate::data::osm::OsmId;
use crate::data::projection::decode_flat_location;
use crate::errors::{Error, Result};

/// Joins way segments (packed locations, see `encode_flat_location`) into closed rings.
/// Segments that cannot be closed are dropped, as are rings of fewer than 4 points.
pub fn join_rings(segments: &[Vec<u64>]) -> Vec<Vec<u64>> {
    let mut by_end: HashMap<u64, Vec<usize>> = HashMap::new();
    for (index, segment) in segments.iter().enumerate() {
        if let (Some(first), Some(last)) = (segment.first(), segment.last()) {
            by_end.entry(*first).or_default().push(index);
            if first != last {
                by_end.entry(*last).or_default().push(index);
            }
        }
    }

    let mut used = vec![false; segments.len()];
    let mut rings = Vec::new();
    for start in 0..segments.len() {
        if used[start] || segments[start].is_empty() {
            continue;
        }
        used[start] = true;
        let mut ring = segments[start].clone();
        loop {
            let (first, last) = (ring[0], ring[ring.len() - 1]);
            if ring.len() > 1 && first == last {
                if ring.len() >= 4 {
                    rings.push(ring);
                }
                break;
            }
            let next = by_end
                .get(&last)
                .and_then(|candidates| candidates.iter().copied().find(|candidate| !used[*candidate]));
            let Some(next) = next else {
                break;
            };
            used[next] = true;
            let segment = &segments[next];
            if segment[0] == last {
                ring.extend_from_slice(&segment[1..]);
            } else {
                ring.extend(segment.iter().rev().skip(1));
            }
        }
    }
    rings
}

fn to_line_string(ring: &[u64]) -> LineString<f64> {
    ring.iter().map(|location| decode_flat_location(*location)).collect()
}

/// Assembles the outer and inner member segments of relation `relation_id`.
pub fn build_multipolygon(relation_id: OsmId, outer: &[Vec<u64>], inner: &[Vec<u64>]) -> Result<MultiPolygon<f64>> {
    let mut outers: Vec<(Polygon<f64>, Vec<LineString<f64>>)> = join_rings(outer)
        .iter()
        .map(|ring| (Polygon::new(to_line_string(ring), vec![]), Vec::new()))
        .collect();
    if outers.is_empty() {
        return Err(Error::malformed(format!("multipolygon {relation_id} has no closed outer ring")));
    }
    outers.sort_by(|(a, _), (b, _)| a.unsigned_area().total_cmp(&b.unsigned_area()));

    for ring in join_rings(inner) {
        let hole = to_line_string(&ring);
        let Some(inside) = Polygon::new(hole.clone(), vec![]).interior_point() else {
            continue;
        };
        match outers.iter_mut().find(|(outer, _)| outer.contains(&inside)) {
            Some((_, holes)) => holes.push(hole),
            None => debug!(relation = relation_id; "Inner ring outside every outer ring"),
        }
    }

    Ok(MultiPolygon::new(
        outers
            .into_iter()
            .map(|(outer, holes)| Polygon::new(outer.into_inner().0, holes))
            .collect(),
    ))
}
