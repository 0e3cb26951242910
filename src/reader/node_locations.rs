//! Node id to packed location lookup, written once in pass 1 and read in pass 2.

use std::collections::HashMap;
use std::mem::size_of;

use log::debug;
use serde::Deserialize;

use crate::data::osm::OsmId;
use crate::errors::{Error, Result};
use crate::memory::{hash_map_size, vec_size, MemoryEstimate};

/// Single writer during pass 1, then sealed with [`finish`](NodeLocationStore::finish)
/// and shared read-only.
pub trait NodeLocationStore: MemoryEstimate + Send + Sync {
    fn put(&mut self, id: OsmId, location: u64) -> Result<()>;

    /// Seals the store. Lookups before this are undefined.
    fn finish(&mut self);

    fn get(&self, id: OsmId) -> Option<u64>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeLocationStoreKind {
    /// Flat id-sorted table, 16 bytes per node.
    #[default]
    Sorted,
    Hash,
}

impl NodeLocationStoreKind {
    pub fn create(&self) -> Box<dyn NodeLocationStore> {
        match self {
            NodeLocationStoreKind::Sorted => Box::new(SortedTableNodeLocations::new()),
            NodeLocationStoreKind::Hash => Box::new(HashNodeLocations::new()),
        }
    }
}

/// Parallel id and location arrays searched by binary search. Extracts list nodes in id
/// order, so appends normally keep the table sorted; otherwise it is sorted on finish.
#[derive(Debug, Default)]
pub struct SortedTableNodeLocations {
    ids: Vec<OsmId>,
    locations: Vec<u64>,
    sorted: bool,
    finished: bool,
}

impl SortedTableNodeLocations {
    pub fn new() -> Self {
        SortedTableNodeLocations {
            sorted: true,
            ..Default::default()
        }
    }
}

impl NodeLocationStore for SortedTableNodeLocations {
    fn put(&mut self, id: OsmId, location: u64) -> Result<()> {
        if self.finished {
            return Err(Error::contract_violation(format!("node {id} written after the store was sealed")));
        }
        if let Some(last) = self.ids.last() {
            if *last >= id {
                self.sorted = false;
            }
        }
        self.ids.push(id);
        self.locations.push(location);
        Ok(())
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        if !self.sorted {
            debug!(nodes = self.ids.len(); "Sorting node locations");
            let mut pairs: Vec<(OsmId, u64)> = self.ids.drain(..).zip(self.locations.drain(..)).collect();
            pairs.sort_by_key(|(id, _)| *id);
            // Later duplicates win.
            pairs.reverse();
            pairs.dedup_by_key(|(id, _)| *id);
            pairs.reverse();
            (self.ids, self.locations) = pairs.into_iter().unzip();
            self.sorted = true;
        }
        self.ids.shrink_to_fit();
        self.locations.shrink_to_fit();
        self.finished = true;
    }

    fn get(&self, id: OsmId) -> Option<u64> {
        self.ids
            .binary_search(&id)
            .ok()
            .map(|index| self.locations[index])
    }

    fn len(&self) -> usize {
        self.ids.len()
    }
}

impl MemoryEstimate for SortedTableNodeLocations {
    fn estimate_memory_usage_bytes(&self) -> u64 {
        vec_size(&self.ids) + vec_size(&self.locations)
    }
}

#[derive(Debug, Default)]
pub struct HashNodeLocations {
    locations: HashMap<OsmId, u64>,
}

impl HashNodeLocations {
    pub fn new() -> Self {
        HashNodeLocations::default()
    }
}

impl NodeLocationStore for HashNodeLocations {
    fn put(&mut self, id: OsmId, location: u64) -> Result<()> {
        self.locations.insert(id, location);
        Ok(())
    }

    fn finish(&mut self) {
        self.locations.shrink_to_fit();
    }

    fn get(&self, id: OsmId) -> Option<u64> {
        self.locations.get(&id).copied()
    }

    fn len(&self) -> usize {
        self.locations.len()
    }
}

impl MemoryEstimate for HashNodeLocations {
    fn estimate_memory_usage_bytes(&self) -> u64 {
        hash_map_size(&self.locations) + size_of::<Self>() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(mut store: Box<dyn NodeLocationStore>) {
        store.put(10, 100).unwrap();
        store.put(3, 30).unwrap();
        store.put(7, 70).unwrap();
        store.put(3, 31).unwrap();
        store.finish();
        assert_eq!(store.len(), 3);
        assert_eq!(store.get(3), Some(31));
        assert_eq!(store.get(7), Some(70));
        assert_eq!(store.get(10), Some(100));
        assert_eq!(store.get(4), None);
        assert!(store.estimate_memory_usage_bytes() > 0);
    }

    #[test]
    fn sorted_table_handles_unsorted_input() {
        exercise(NodeLocationStoreKind::Sorted.create());
    }

    #[test]
    fn hash_table_lookups() {
        exercise(NodeLocationStoreKind::Hash.create());
    }

    #[test]
    fn sorted_table_rejects_writes_after_finish() {
        let mut store = SortedTableNodeLocations::new();
        store.put(1, 1).unwrap();
        store.finish();
        assert!(store.put(2, 2).is_err());
        assert_eq!(store.get(1), Some(1));
    }
}
