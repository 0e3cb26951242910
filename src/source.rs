//! Input adapters. OSM sources stream raw elements and can be read more than once;
//! feature sources stream elements that already carry their geometry.

pub mod geojson;
pub mod memory;
pub mod pbf;
pub mod xml;

use std::path::Path;

use crate::data::feature::SourceFeature;
use crate::data::osm::OsmElement;
use crate::errors::{Error, ErrorKind, Result};
use crate::pipeline::WorkQueue;

pub trait OsmSource: Send + Sync {
    fn name(&self) -> &str;

    /// Approximate number of elements, for progress only.
    fn count(&self) -> Result<u64>;

    /// Streams every element in file order (nodes, then ways, then relations) into
    /// `next`. `threads` is a hint for sources that can decode in parallel.
    fn read(&self, threads: usize, next: &WorkQueue<OsmElement>) -> Result<()>;
}

pub trait FeatureSource: Send + Sync {
    fn name(&self) -> &str;

    fn count(&self) -> Result<u64>;

    fn read(&self, next: &WorkQueue<SourceFeature>) -> Result<()>;
}

/// Picks the OSM adapter from the file extension: `.pbf` or `.osm`, `.xml`, `.osm.xz`.
pub fn open_osm_source(name: &str, path: &Path) -> Result<Box<dyn OsmSource>> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| Error::new(ErrorKind::Config, format!("Bad input path {}", path.display())))?;
    if file_name.ends_with(".pbf") {
        Ok(Box::new(pbf::PbfSource::new(name, path)))
    } else if file_name.ends_with(".osm") || file_name.ends_with(".xml") || file_name.ends_with(".xz") {
        Ok(Box::new(xml::XmlSource::new(name, path)))
    } else {
        Err(Error::new(
            ErrorKind::Config,
            format!("No OSM reader for {}", path.display()),
        ))
    }
}

pub fn is_geojson(path: &Path) -> bool {
    path.extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| extension == "geojson" || extension == "json")
}

/// Size-based element estimate for file sources.
pub(crate) fn estimate_count(path: &Path, bytes_per_element: u64) -> Result<u64> {
    let size = std::fs::metadata(path)?.len();
    Ok(size / bytes_per_element.max(1))
}
