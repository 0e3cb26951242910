use geo::Geometry;
use log::debug;

use crate::data::attributes::{AttrValue, Attributes};
use crate::data::feature::SourceFeature;
use crate::data::tile::MAX_ZOOM;
use crate::errors::Result;

/// An output feature under construction: target layer, geometry in lon/lat degrees and
/// the rendering settings the profile chose.
#[derive(Debug, Clone)]
pub struct Feature {
    layer: String,
    id: i64,
    geometry: Option<Geometry<f64>>,
    attrs: Attributes,
    min_zoom: u8,
    max_zoom: u8,
    buffer_pixels: f64,
    sort_key: i32,
    min_pixel_size: f64,
}

impl Feature {
    pub fn new(layer: &str, id: i64, geometry: Option<Geometry<f64>>) -> Self {
        Feature {
            layer: layer.to_string(),
            id,
            geometry,
            attrs: Attributes::new(),
            min_zoom: 0,
            max_zoom: MAX_ZOOM,
            buffer_pixels: 4.0,
            sort_key: 0,
            min_pixel_size: 1.0,
        }
    }

    pub fn set_attr(&mut self, key: &str, value: impl Into<AttrValue>) -> &mut Self {
        self.attrs.insert(key, value);
        self
    }

    /// Copies the listed keys that are present in `attrs`.
    pub fn copy_attrs(&mut self, attrs: &Attributes, keys: &[&str]) -> &mut Self {
        for key in keys {
            if let Some(value) = attrs.get(key) {
                self.attrs.insert(*key, value.clone());
            }
        }
        self
    }

    pub fn set_zoom_range(&mut self, min_zoom: u8, max_zoom: u8) -> &mut Self {
        self.min_zoom = min_zoom.min(MAX_ZOOM);
        self.max_zoom = max_zoom.min(MAX_ZOOM);
        self
    }

    pub fn set_min_zoom(&mut self, min_zoom: u8) -> &mut Self {
        self.min_zoom = min_zoom.min(MAX_ZOOM);
        self
    }

    pub fn set_buffer_pixels(&mut self, buffer_pixels: f64) -> &mut Self {
        self.buffer_pixels = buffer_pixels.max(0.0);
        self
    }

    pub fn set_sort_key(&mut self, sort_key: i32) -> &mut Self {
        self.sort_key = sort_key;
        self
    }

    /// Lines and polygons whose extent is below this many pixels at a zoom are left out
    /// of that zoom.
    pub fn set_min_pixel_size(&mut self, min_pixel_size: f64) -> &mut Self {
        self.min_pixel_size = min_pixel_size.max(0.0);
        self
    }

    pub fn layer(&self) -> &str {
        &self.layer
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn geometry(&self) -> Option<&Geometry<f64>> {
        self.geometry.as_ref()
    }

    pub fn attrs(&self) -> &Attributes {
        &self.attrs
    }

    pub fn min_zoom(&self) -> u8 {
        self.min_zoom
    }

    pub fn max_zoom(&self) -> u8 {
        self.max_zoom
    }

    pub fn buffer_pixels(&self) -> f64 {
        self.buffer_pixels
    }

    pub fn sort_key(&self) -> i32 {
        self.sort_key
    }

    pub fn min_pixel_size(&self) -> f64 {
        self.min_pixel_size
    }
}

/// Collects the output features a profile derives from one source feature.
///
/// Geometry is taken from the source feature when a feature is started. If the source
/// cannot provide the requested shape the feature is still returned for chaining, but it
/// carries no geometry, is counted as malformed and never reaches the store.
pub struct FeatureCollector<'a> {
    source: &'a SourceFeature,
    features: Vec<Feature>,
    malformed: u64,
}

impl<'a> FeatureCollector<'a> {
    pub fn new(source: &'a SourceFeature) -> Self {
        FeatureCollector {
            source,
            features: Vec::new(),
            malformed: 0,
        }
    }

    pub fn source(&self) -> &SourceFeature {
        self.source
    }

    fn start(&mut self, layer: &str, geometry: Result<Geometry<f64>>) -> &mut Feature {
        let geometry = match geometry {
            Ok(geometry) => Some(geometry),
            Err(err) => {
                debug!(layer = layer, id = self.source.id; "Dropping feature geometry: {}", err);
                self.malformed += 1;
                None
            }
        };
        let index = self.features.len();
        self.features.push(Feature::new(layer, self.source.id, geometry));
        &mut self.features[index]
    }

    pub fn point(&mut self, layer: &str) -> &mut Feature {
        let geometry = self.source.point().map(Geometry::Point);
        self.start(layer, geometry)
    }

    /// A point at the centroid of any source geometry.
    pub fn centroid(&mut self, layer: &str) -> &mut Feature {
        let geometry = self.source.centroid().map(Geometry::Point);
        self.start(layer, geometry)
    }

    pub fn line(&mut self, layer: &str) -> &mut Feature {
        let geometry = self.source.line().map(Geometry::LineString);
        self.start(layer, geometry)
    }

    pub fn polygon(&mut self, layer: &str) -> &mut Feature {
        let geometry = self.source.polygon().map(Geometry::MultiPolygon);
        self.start(layer, geometry)
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn malformed(&self) -> u64 {
        self.malformed
    }

    pub fn into_features(self) -> Vec<Feature> {
        self.features
    }
}

#[cfg(test)]
mod tests {
    use geo::{line_string, Point};

    use super::*;
    use crate::data::feature::SourceGeometry;

    #[test]
    fn features_take_geometry_from_source() {
        let source = SourceFeature::new(
            "osm",
            3,
            Attributes::from_tags([("name", "Baker Street"), ("railway", "station")]),
            SourceGeometry::Point(Point::new(-0.157, 51.522)),
        );
        let mut features = FeatureCollector::new(&source);
        features
            .point("stations")
            .copy_attrs(&source.tags, &["name", "missing"])
            .set_attr("rank", 2)
            .set_zoom_range(10, 20);
        assert_eq!(features.len(), 1);
        let feature = &features.features()[0];
        assert_eq!(feature.layer(), "stations");
        assert_eq!(feature.id(), 3);
        assert_eq!(feature.max_zoom(), MAX_ZOOM);
        assert_eq!(feature.attrs().get_string("name"), Some("Baker Street"));
        assert_eq!(feature.attrs().get_number("rank"), Some(2.0));
        assert!(!feature.attrs().contains_key("missing"));
        assert_eq!(features.malformed(), 0);
    }

    #[test]
    fn impossible_geometry_is_counted() {
        let line = line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 1.0)];
        let source = SourceFeature::new("osm", 4, Attributes::new(), SourceGeometry::line(line));
        let mut features = FeatureCollector::new(&source);
        features.polygon("parks");
        features.line("roads");
        assert_eq!(features.malformed(), 1);
        let features = features.into_features();
        assert!(features[0].geometry().is_none());
        assert!(features[1].geometry().is_some());
    }
}
