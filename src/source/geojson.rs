use std::fs;
use std::path::{Path, PathBuf};

use ::geojson::{feature::Id, FeatureCollection, GeoJson};
use geo::{Geometry, MultiPolygon};
use log::debug;

use crate::data::attributes::Attributes;
use crate::data::feature::{SourceFeature, SourceGeometry};
use crate::errors::Result;
use crate::pipeline::WorkQueue;
use crate::source::FeatureSource;

/// A GeoJSON file holding a feature collection, a single feature or a bare geometry.
pub struct GeoJsonSource {
    name: String,
    path: PathBuf,
}

fn to_source_geometry(geometry: Geometry<f64>) -> Option<SourceGeometry> {
    match geometry {
        Geometry::Point(point) => Some(SourceGeometry::Point(point)),
        Geometry::MultiPoint(mut points) if points.0.len() == 1 => points.0.pop().map(SourceGeometry::Point),
        Geometry::LineString(line) => Some(SourceGeometry::line(line)),
        Geometry::MultiLineString(mut lines) if lines.0.len() == 1 => lines.0.pop().map(SourceGeometry::line),
        Geometry::Polygon(polygon) => Some(SourceGeometry::Polygon(MultiPolygon::new(vec![polygon]))),
        Geometry::MultiPolygon(polygons) => Some(SourceGeometry::Polygon(polygons)),
        _ => None,
    }
}

impl GeoJsonSource {
    pub fn new(name: &str, path: &Path) -> Self {
        GeoJsonSource {
            name: name.to_string(),
            path: path.to_path_buf(),
        }
    }

    fn load(&self) -> Result<FeatureCollection> {
        let text = fs::read_to_string(&self.path)?;
        let geojson: GeoJson = text.parse()?;
        Ok(match geojson {
            GeoJson::FeatureCollection(collection) => collection,
            GeoJson::Feature(feature) => FeatureCollection {
                bbox: None,
                features: vec![feature],
                foreign_members: None,
            },
            GeoJson::Geometry(geometry) => FeatureCollection {
                bbox: None,
                features: vec![::geojson::Feature::from(geometry)],
                foreign_members: None,
            },
        })
    }
}

impl FeatureSource for GeoJsonSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn count(&self) -> Result<u64> {
        Ok(self.load()?.features.len() as u64)
    }

    fn read(&self, next: &WorkQueue<SourceFeature>) -> Result<()> {
        for (index, feature) in self.load()?.features.into_iter().enumerate() {
            let id = match &feature.id {
                Some(Id::Number(number)) => number.as_i64().unwrap_or(index as i64),
                Some(Id::String(value)) => value.parse().unwrap_or(index as i64),
                None => index as i64,
            };
            let Some(geometry) = feature.geometry else {
                debug!(source = self.name.as_str(), id = id; "Skipping feature without geometry");
                continue;
            };
            let geometry = Geometry::<f64>::try_from(geometry)?;
            let Some(geometry) = to_source_geometry(geometry) else {
                debug!(source = self.name.as_str(), id = id; "Skipping feature with unsupported geometry");
                continue;
            };
            let tags = Attributes::from_json(feature.properties.unwrap_or_default());
            next.put(SourceFeature::new(self.name.as_str(), id, tags, geometry))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::errors::ErrorKind;

    #[test]
    fn reads_features_with_properties() {
        let mut file = tempfile::Builder::new().suffix(".geojson").tempfile().unwrap();
        write!(
            file,
            r#"{{"type": "FeatureCollection", "features": [
                {{"type": "Feature", "id": 7, "properties": {{"name": "Hyde Park", "area": 1.4, "open": true}},
                  "geometry": {{"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,1],[0,0]]]}}}},
                {{"type": "Feature", "properties": null,
                  "geometry": {{"type": "LineString", "coordinates": [[0,0],[2,2]]}}}},
                {{"type": "Feature", "properties": {{}}, "geometry": null}}
            ]}}"#
        )
        .unwrap();
        let source = GeoJsonSource::new("parks", file.path());
        assert_eq!(source.count().unwrap(), 3);

        let queue = WorkQueue::new("test", 10, 1);
        source.read(&queue).unwrap();
        queue.close_producer();
        let features: Vec<SourceFeature> = std::iter::from_fn(|| queue.get()).collect();
        assert_eq!(features.len(), 2);
        assert_eq!(features[0].id, 7);
        assert_eq!(features[0].source, "parks");
        assert!(features[0].can_be_polygon());
        assert_eq!(features[0].tags.get_string("name"), Some("Hyde Park"));
        assert_eq!(features[0].tags.get_bool("open"), Some(true));
        assert_eq!(features[1].id, 1);
        assert!(features[1].can_be_line());
    }

    #[test]
    fn invalid_json_is_a_parse_error() {
        let mut file = tempfile::Builder::new().suffix(".geojson").tempfile().unwrap();
        write!(file, "{{ not json").unwrap();
        let source = GeoJsonSource::new("bad", file.path());
        let queue = WorkQueue::new("test", 10, 1);
        assert_eq!(source.read(&queue).unwrap_err().kind, ErrorKind::Parse);
    }
}
