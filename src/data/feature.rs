use std::sync::Arc;

use geo::{Area, BoundingRect, Centroid, LineString, MultiPolygon, Point, Polygon, Rect};

use crate::data::attributes::{AttrValue, Attributes};
use crate::data::osm::{ElementType, Node, OsmId};
use crate::errors::{Error, Result};
use crate::profile::RelationInfo;

/// Geometry of a feature as read from the source, in lon/lat degrees.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceGeometry {
    Point(Point<f64>),
    /// A node sequence. Closed sequences of at least 4 coordinates can also be read as
    /// polygons.
    Line { line: LineString<f64>, closed: bool },
    Polygon(MultiPolygon<f64>),
}

impl SourceGeometry {
    pub fn line(line: LineString<f64>) -> SourceGeometry {
        let closed = line.0.len() >= 4 && line.is_closed();
        SourceGeometry::Line { line, closed }
    }
}

/// Membership of a way in a relation that the profile chose to keep info for.
#[derive(Debug, Clone)]
pub struct RelationMembership {
    pub relation_id: OsmId,
    pub role: String,
    pub info: Arc<dyn RelationInfo>,
}

/// A feature handed to the profile: tags plus one geometry variant.
#[derive(Debug, Clone)]
pub struct SourceFeature {
    pub id: i64,
    pub source: String,
    pub element: Option<ElementType>,
    pub tags: Attributes,
    pub geometry: SourceGeometry,
    /// Relations this way belongs to, with their preprocessed info.
    pub relations: Vec<RelationMembership>,
    /// Preprocessed info of the relation this feature was built from.
    pub relation_info: Vec<Arc<dyn RelationInfo>>,
    /// The way is part of a multipolygon outline.
    pub in_multipolygon: bool,
}

impl SourceFeature {
    pub fn new(source: impl Into<String>, id: i64, tags: Attributes, geometry: SourceGeometry) -> Self {
        SourceFeature {
            id,
            source: source.into(),
            element: None,
            tags,
            geometry,
            relations: Vec::new(),
            relation_info: Vec::new(),
            in_multipolygon: false,
        }
    }

    pub fn osm_node(source: &str, node: Node) -> Self {
        let mut feature = SourceFeature::new(
            source,
            node.id,
            node.tags,
            SourceGeometry::Point(Point::new(node.lon, node.lat)),
        );
        feature.element = Some(ElementType::Node);
        feature
    }

    pub fn is_point(&self) -> bool {
        matches!(self.geometry, SourceGeometry::Point(_))
    }

    pub fn can_be_line(&self) -> bool {
        matches!(self.geometry, SourceGeometry::Line { .. })
    }

    pub fn can_be_polygon(&self) -> bool {
        match self.geometry {
            SourceGeometry::Point(_) => false,
            SourceGeometry::Line { closed, .. } => closed,
            SourceGeometry::Polygon(_) => true,
        }
    }

    pub fn has_tag(&self, key: &str, value: &str) -> bool {
        self.tags.has(key, value)
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.tags.contains_key(key)
    }

    pub fn tag(&self, key: &str) -> Option<&AttrValue> {
        self.tags.get(key)
    }

    pub fn point(&self) -> Result<Point<f64>> {
        match &self.geometry {
            SourceGeometry::Point(point) => Ok(*point),
            _ => Err(Error::malformed(format!("{} {} is not a point", self.source, self.id))),
        }
    }

    pub fn centroid(&self) -> Result<Point<f64>> {
        let centroid = match &self.geometry {
            SourceGeometry::Point(point) => Some(*point),
            SourceGeometry::Line { line, closed: true } => {
                Polygon::new(line.clone(), vec![]).centroid()
            }
            SourceGeometry::Line { line, .. } => line.centroid(),
            SourceGeometry::Polygon(polygons) => polygons.centroid(),
        };
        centroid.ok_or_else(|| Error::malformed(format!("{} {} has no centroid", self.source, self.id)))
    }

    pub fn line(&self) -> Result<LineString<f64>> {
        match &self.geometry {
            SourceGeometry::Line { line, .. } => Ok(line.clone()),
            _ => Err(Error::malformed(format!("{} {} is not a line", self.source, self.id))),
        }
    }

    pub fn polygon(&self) -> Result<MultiPolygon<f64>> {
        match &self.geometry {
            SourceGeometry::Line { line, closed: true } => {
                Ok(MultiPolygon::new(vec![Polygon::new(line.clone(), vec![])]))
            }
            SourceGeometry::Polygon(polygons) => Ok(polygons.clone()),
            _ => Err(Error::malformed(format!("{} {} is not a polygon", self.source, self.id))),
        }
    }

    /// Planar area in square degrees, 0 for features that cannot be polygons.
    pub fn area(&self) -> f64 {
        self.polygon().map(|polygons| polygons.unsigned_area()).unwrap_or(0.0)
    }

    pub fn bounding_rect(&self) -> Option<Rect<f64>> {
        match &self.geometry {
            SourceGeometry::Point(point) => Some(point.bounding_rect()),
            SourceGeometry::Line { line, .. } => line.bounding_rect(),
            SourceGeometry::Polygon(polygons) => polygons.bounding_rect(),
        }
    }

    /// Relation memberships whose info is of type `T`.
    pub fn relation_info<T: RelationInfo + 'static>(&self) -> Vec<(&RelationMembership, &T)> {
        self.relations
            .iter()
            .filter_map(|membership| {
                membership
                    .info
                    .as_any()
                    .downcast_ref::<T>()
                    .map(|info| (membership, info))
            })
            .collect()
    }

    /// Info attached to the relation this feature was built from, of type `T`.
    pub fn own_relation_info<T: RelationInfo + 'static>(&self) -> Vec<&T> {
        self.relation_info
            .iter()
            .filter_map(|info| info.as_any().downcast_ref::<T>())
            .collect()
    }
}
