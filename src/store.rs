use std::sync::{Arc, Mutex};

use rkyv::AlignedVec;

use crate::errors::{Error, ErrorKind, Result};
use crate::render::RenderedFeature;

/// Destination of rendered features. Entries arrive in any order; implementations are
/// responsible for handing them out sorted by tile.
pub trait FeatureStore: Send {
    fn accept(&mut self, entry: &RenderedFeature) -> Result<()>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes held by the stored entries.
    fn storage_size(&self) -> u64;
}

/// Store handle shared between a reader's write stage and its caller.
pub type SharedFeatureStore = Arc<Mutex<dyn FeatureStore>>;

struct StoredEntry {
    tile: u64,
    layer: String,
    sort_key: i32,
    id: i64,
    data: AlignedVec,
}

/// Keeps serialized entries in memory and sorts them on read.
#[derive(Default)]
pub struct InMemoryFeatureStore {
    entries: Vec<StoredEntry>,
    bytes: u64,
    sorted: bool,
}

impl InMemoryFeatureStore {
    pub fn new() -> Self {
        InMemoryFeatureStore::default()
    }

    fn sort(&mut self) {
        if !self.sorted {
            self.entries.sort_by(|a, b| {
                (a.tile, &a.layer, a.sort_key, a.id, a.data.as_slice())
                    .cmp(&(b.tile, &b.layer, b.sort_key, b.id, b.data.as_slice()))
            });
            self.sorted = true;
        }
    }

    /// All entries ordered by tile, then layer, sort key and id.
    pub fn sorted_features(&mut self) -> Result<Vec<RenderedFeature>> {
        self.sort();
        self.entries
            .iter()
            .map(|entry| {
                // SAFETY: every buffer was produced by `rkyv::to_bytes` in `accept`.
                unsafe { rkyv::from_bytes_unchecked::<RenderedFeature>(&entry.data) }
                    .map_err(|err| Error::new(ErrorKind::Io, format!("Could not deserialize feature: {:?}", err)))
            })
            .collect()
    }

    /// Distinct tile indexes with the number of entries in each, in tile order.
    pub fn tiles(&mut self) -> Vec<(u64, usize)> {
        self.sort();
        let mut tiles: Vec<(u64, usize)> = Vec::new();
        for entry in &self.entries {
            match tiles.last_mut() {
                Some((tile, count)) if *tile == entry.tile => *count += 1,
                _ => tiles.push((entry.tile, 1)),
            }
        }
        tiles
    }
}

impl FeatureStore for InMemoryFeatureStore {
    fn accept(&mut self, entry: &RenderedFeature) -> Result<()> {
        let data = rkyv::to_bytes::<_, 256>(entry)
            .map_err(|err| Error::new(ErrorKind::Io, format!("Could not serialize feature: {:?}", err)))?;
        self.bytes += (data.len() + entry.layer.len()) as u64;
        self.entries.push(StoredEntry {
            tile: entry.tile,
            layer: entry.layer.clone(),
            sort_key: entry.sort_key,
            id: entry.id,
            data,
        });
        self.sorted = false;
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn storage_size(&self) -> u64 {
        self.bytes
    }
}
