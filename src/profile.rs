//! The policy boundary: which source features become which output features.

use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;

use crate::data::feature::SourceFeature;
use crate::data::osm::Relation;
use crate::errors::Result;
use crate::render::FeatureCollector;

/// Data a profile extracts from a relation in the first OSM pass, to be read back when
/// the relation's member ways are processed in the second pass.
pub trait RelationInfo: Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;

    fn estimate_memory_usage_bytes(&self) -> u64 {
        0
    }
}

pub trait Profile: Send + Sync {
    fn name(&self) -> &str;

    /// Called once per relation in pass 1. Returning `Some` keeps the infos and records
    /// every member way of the relation so pass 2 can attach them.
    fn preprocess_osm_relation(&self, _relation: &Relation) -> Option<Vec<Arc<dyn RelationInfo>>> {
        None
    }

    /// Appends zero or more output features for `feature`. An error aborts the reader.
    fn process_feature(&self, feature: &SourceFeature, features: &mut FeatureCollector) -> Result<()>;

    /// Called after a reader finishes.
    fn release(&self) {}
}
