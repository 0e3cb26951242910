use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::thread;
use std::time::Duration;

use geo::{coord, Rect};
use serde::Deserialize;

use crate::data::tile::{TileExtents, TileOrder, MAX_ZOOM};
use crate::errors::{Error, ErrorKind, Result};
use crate::reader::node_locations::NodeLocationStoreKind;

/// Run configuration, read from a JSON file.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    pub data_path: String,
    #[serde(default = "default_source_name")]
    pub source_name: String,
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default = "default_log_interval_secs")]
    pub log_interval_secs: u64,
    #[serde(default)]
    pub min_zoom: u8,
    #[serde(default = "default_max_zoom")]
    pub max_zoom: u8,
    #[serde(default)]
    pub tile_order: TileOrder,
    #[serde(default)]
    pub node_location_store: NodeLocationStoreKind,
    /// Upper limit on node locations plus relation side tables. Unlimited when absent.
    #[serde(default)]
    pub max_side_table_bytes: Option<u64>,
    /// `[min_lon, min_lat, max_lon, max_lat]`. The whole world when absent.
    #[serde(default)]
    pub bounds: Option<[f64; 4]>,
    #[serde(default = "default_queue_capacity")]
    pub read_queue_capacity: usize,
    #[serde(default = "default_queue_capacity")]
    pub feature_queue_capacity: usize,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_source_name() -> String {
    "osm".to_string()
}

fn default_threads() -> usize {
    thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

fn default_log_interval_secs() -> u64 {
    10
}

fn default_max_zoom() -> u8 {
    14
}

fn default_queue_capacity() -> usize {
    50_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl IngestConfig {
    pub fn new(data_path: &str) -> Self {
        IngestConfig {
            data_path: data_path.to_string(),
            source_name: default_source_name(),
            threads: default_threads(),
            log_interval_secs: default_log_interval_secs(),
            min_zoom: 0,
            max_zoom: default_max_zoom(),
            tile_order: TileOrder::default(),
            node_location_store: NodeLocationStoreKind::default(),
            max_side_table_bytes: None,
            bounds: None,
            read_queue_capacity: default_queue_capacity(),
            feature_queue_capacity: default_queue_capacity(),
            log_level: default_log_level(),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| {
            Error::new(ErrorKind::Config, format!("Could not open config file {}: {}", path.display(), err))
        })?;
        let config: IngestConfig = serde_json::from_reader(BufReader::new(file)).map_err(|err| {
            Error::new(ErrorKind::Config, format!("Could not parse config {}: {}", path.display(), err))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| Err(Error::new(ErrorKind::Config, message));
        if self.max_zoom > MAX_ZOOM {
            return invalid(format!("max_zoom {} is above {}", self.max_zoom, MAX_ZOOM));
        }
        if self.min_zoom > self.max_zoom {
            return invalid(format!("min_zoom {} is above max_zoom {}", self.min_zoom, self.max_zoom));
        }
        if self.threads == 0 {
            return invalid("threads must be at least 1".to_string());
        }
        if self.read_queue_capacity == 0 || self.feature_queue_capacity == 0 {
            return invalid("queue capacities must be at least 1".to_string());
        }
        if let Some([min_lon, min_lat, max_lon, max_lat]) = self.bounds {
            if !(min_lon < max_lon && min_lat < max_lat) {
                return invalid(format!("bounds {:?} are empty", self.bounds));
            }
        }
        Ok(())
    }

    pub fn log_interval(&self) -> Duration {
        Duration::from_secs(self.log_interval_secs.max(1))
    }

    /// Worker count for stages that leave one thread to the reader.
    pub fn process_threads(&self) -> usize {
        self.threads.saturating_sub(1).max(1)
    }

    pub fn bounds_rect(&self) -> Option<Rect<f64>> {
        self.bounds.map(|[min_lon, min_lat, max_lon, max_lat]| {
            Rect::new(coord! { x: min_lon, y: min_lat }, coord! { x: max_lon, y: max_lat })
        })
    }

    pub fn tile_extents(&self) -> TileExtents {
        match self.bounds_rect() {
            Some(bounds) => TileExtents::from_bounds(&bounds),
            None => TileExtents::world(),
        }
    }
}
