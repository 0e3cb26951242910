use geo::{coord, BoundingRect, Geometry, Intersects, LineString, MapCoords, Polygon, Rect};

use crate::config::IngestConfig;
use crate::data::attributes::{AttrValue, Attributes};
use crate::data::projection::{world_x, world_y};
use crate::data::tile::{TileCoord, TileExtents, TileOrder, MAX_ZOOM};
use crate::errors::{Error, Result};
use crate::render::Feature;

const TILE_PIXELS: f64 = 256.0;

/// Scalar attribute value as written to a tile.
#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Clone, PartialEq)]
pub enum TileValue {
    String(String),
    Number(f64),
    Bool(bool),
}

impl TileValue {
    fn from_attr(value: &AttrValue) -> Result<TileValue> {
        Ok(match value {
            AttrValue::String(value) => TileValue::String(value.clone()),
            AttrValue::Number(value) => TileValue::Number(*value),
            AttrValue::Bool(value) => TileValue::Bool(*value),
            nested => TileValue::String(serde_json::to_string(nested)?),
        })
    }
}

/// Geometry in world coordinates (0..1, origin at the north-west corner).
#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Clone, PartialEq)]
pub enum RenderedGeometry {
    Points(Vec<[f64; 2]>),
    Lines(Vec<Vec<[f64; 2]>>),
    /// Each polygon is its exterior ring followed by its holes.
    Polygons(Vec<Vec<Vec<[f64; 2]>>>),
}

fn ring(line: &LineString<f64>) -> Vec<[f64; 2]> {
    line.coords().map(|c| [c.x, c.y]).collect()
}

fn rings(polygon: &Polygon<f64>) -> Vec<Vec<[f64; 2]>> {
    std::iter::once(polygon.exterior())
        .chain(polygon.interiors())
        .map(ring)
        .collect()
}

impl RenderedGeometry {
    fn from_world(geometry: &Geometry<f64>) -> Result<RenderedGeometry> {
        Ok(match geometry {
            Geometry::Point(point) => RenderedGeometry::Points(vec![[point.x(), point.y()]]),
            Geometry::MultiPoint(points) => {
                RenderedGeometry::Points(points.iter().map(|point| [point.x(), point.y()]).collect())
            }
            Geometry::LineString(line) => RenderedGeometry::Lines(vec![ring(line)]),
            Geometry::MultiLineString(lines) => RenderedGeometry::Lines(lines.iter().map(ring).collect()),
            Geometry::Polygon(polygon) => RenderedGeometry::Polygons(vec![rings(polygon)]),
            Geometry::MultiPolygon(polygons) => {
                RenderedGeometry::Polygons(polygons.iter().map(rings).collect())
            }
            other => {
                return Err(Error::malformed(format!("unsupported output geometry {:?}", other)));
            }
        })
    }

    pub fn is_points(&self) -> bool {
        matches!(self, RenderedGeometry::Points(_))
    }
}

/// One feature as it appears in one tile.
#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Clone, PartialEq)]
pub struct RenderedFeature {
    /// Tile index in the configured order.
    pub tile: u64,
    pub layer: String,
    pub id: i64,
    pub sort_key: i32,
    pub geometry: RenderedGeometry,
    pub attrs: Vec<(String, TileValue)>,
}

impl RenderedFeature {
    pub fn attr(&self, key: &str) -> Option<&TileValue> {
        self.attrs.iter().find(|(name, _)| name == key).map(|(_, value)| value)
    }
}

fn flatten_attrs(attrs: &Attributes) -> Result<Vec<(String, TileValue)>> {
    attrs
        .iter()
        .map(|(key, value)| Ok((key.clone(), TileValue::from_attr(value)?)))
        .collect()
}

#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub min_zoom: u8,
    pub max_zoom: u8,
    pub tile_order: TileOrder,
    pub extents: TileExtents,
}

impl RenderConfig {
    pub fn from_config(config: &IngestConfig) -> Self {
        RenderConfig {
            min_zoom: config.min_zoom,
            max_zoom: config.max_zoom.min(MAX_ZOOM),
            tile_order: config.tile_order,
            extents: config.tile_extents(),
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        RenderConfig {
            min_zoom: 0,
            max_zoom: 14,
            tile_order: TileOrder::Tms,
            extents: TileExtents::world(),
        }
    }
}

/// Turns collected features into per-tile entries.
///
/// Geometry is projected to world coordinates once and written unclipped to every tile
/// it touches (including the feature's pixel buffer) at every zoom both the feature and
/// the configuration allow.
#[derive(Debug, Clone, Default)]
pub struct FeatureRenderer {
    config: RenderConfig,
}

impl FeatureRenderer {
    pub fn new(config: RenderConfig) -> Self {
        FeatureRenderer { config }
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn render(&self, feature: &Feature) -> Result<Vec<RenderedFeature>> {
        let geometry = feature.geometry().ok_or_else(|| {
            Error::malformed(format!("{} feature {} has no geometry", feature.layer(), feature.id()))
        })?;
        let world = geometry.map_coords(|c| coord! { x: world_x(c.x), y: world_y(c.y) });
        let bounds = world.bounding_rect().ok_or_else(|| {
            Error::malformed(format!("{} feature {} is empty", feature.layer(), feature.id()))
        })?;
        let rendered = RenderedGeometry::from_world(&world)?;
        let attrs = flatten_attrs(feature.attrs())?;

        let min_zoom = feature.min_zoom().max(self.config.min_zoom);
        let max_zoom = feature.max_zoom().min(self.config.max_zoom);
        let buffer = feature.buffer_pixels() / TILE_PIXELS;
        let mut entries = Vec::new();
        for z in min_zoom..=max_zoom {
            let scale = f64::from(1u32 << z);
            if !rendered.is_points() {
                let size_pixels = bounds.width().max(bounds.height()) * scale * TILE_PIXELS;
                if size_pixels < feature.min_pixel_size() {
                    continue;
                }
            }
            let extents = self.config.extents.for_zoom(z);
            let tile_range = |min: f64, max: f64, lo: u32, hi: u32| -> (u32, u32) {
                let first = ((min * scale - buffer).floor().max(0.0) as u32).max(lo);
                let last = ((max * scale + buffer).floor().max(0.0) as u32).min(hi - 1);
                (first, last)
            };
            let (min_x, max_x) = tile_range(bounds.min().x, bounds.max().x, extents.min_x, extents.max_x);
            let (min_y, max_y) = tile_range(bounds.min().y, bounds.max().y, extents.min_y, extents.max_y);
            if min_x > max_x || min_y > max_y {
                continue;
            }
            let single_tile = min_x == max_x && min_y == max_y;
            for x in min_x..=max_x {
                for y in min_y..=max_y {
                    if !single_tile {
                        let tile_area = Rect::new(
                            coord! { x: (f64::from(x) - buffer) / scale, y: (f64::from(y) - buffer) / scale },
                            coord! { x: (f64::from(x + 1) + buffer) / scale, y: (f64::from(y + 1) + buffer) / scale },
                        );
                        if !world.intersects(&tile_area) {
                            continue;
                        }
                    }
                    let tile = TileCoord::of_xyz(x, y, z)?;
                    entries.push(RenderedFeature {
                        tile: self.config.tile_order.index_of(&tile),
                        layer: feature.layer().to_string(),
                        id: feature.id(),
                        sort_key: feature.sort_key(),
                        geometry: rendered.clone(),
                        attrs: attrs.clone(),
                    });
                }
            }
        }
        Ok(entries)
    }
}
