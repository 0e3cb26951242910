use crate::data::feature::SourceFeature;
use crate::data::osm::OsmElement;
use crate::errors::Result;
use crate::pipeline::WorkQueue;
use crate::source::{FeatureSource, OsmSource};

/// Elements held in memory, replayed in order on every read.
pub struct InMemoryOsmSource {
    name: String,
    elements: Vec<OsmElement>,
}

impl InMemoryOsmSource {
    pub fn new(name: &str, elements: Vec<OsmElement>) -> Self {
        InMemoryOsmSource {
            name: name.to_string(),
            elements,
        }
    }
}

impl OsmSource for InMemoryOsmSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn count(&self) -> Result<u64> {
        Ok(self.elements.len() as u64)
    }

    fn read(&self, _threads: usize, next: &WorkQueue<OsmElement>) -> Result<()> {
        for element in &self.elements {
            next.put(element.clone())?;
        }
        Ok(())
    }
}

pub struct InMemoryFeatureSource {
    name: String,
    features: Vec<SourceFeature>,
}

impl InMemoryFeatureSource {
    pub fn new(name: &str, features: Vec<SourceFeature>) -> Self {
        InMemoryFeatureSource {
            name: name.to_string(),
            features,
        }
    }
}

impl FeatureSource for InMemoryFeatureSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn count(&self) -> Result<u64> {
        Ok(self.features.len() as u64)
    }

    fn read(&self, next: &WorkQueue<SourceFeature>) -> Result<()> {
        for feature in &self.features {
            next.put(feature.clone())?;
        }
        Ok(())
    }
}
