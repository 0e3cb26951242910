use std::env;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};

use log::info;
use structured_logger::json::new_writer;
use structured_logger::Builder;

use osm_tiler::config::IngestConfig;
use osm_tiler::errors::{Error, Result};
use osm_tiler::etl::ingest_osm::IngestOsmEtl;
use osm_tiler::etl::read_features::ReadFeaturesEtl;
use osm_tiler::etl::Etl;
use osm_tiler::memory::format_bytes;
use osm_tiler::profile::Profile;
use osm_tiler::profiles::SemanticProfile;
use osm_tiler::reader::osm::OsmIngestor;
use osm_tiler::reader::simple::SimpleReader;
use osm_tiler::render::{FeatureRenderer, RenderConfig};
use osm_tiler::source::geojson::GeoJsonSource;
use osm_tiler::source::{is_geojson, open_osm_source, OsmSource};
use osm_tiler::store::{FeatureStore, InMemoryFeatureStore};

const DEFAULT_CONFIG_PATH: &str = "config/london.json";
const DEBUG_URL: &str = "https://www.openstreetmap.org/#map={z}/{lat}/{lon}";

fn setup_logging(level: &str) {
    Builder::with_level(level)
        .with_target_writer("*", new_writer(io::stdout()))
        .init();
}

fn summarize(config: &IngestConfig, store: &mut InMemoryFeatureStore) -> Result<()> {
    let tiles = store.tiles();
    let Some((busiest, count)) = tiles.iter().copied().max_by_key(|(_, count)| *count) else {
        info!(features = 0; "No features were written");
        return Ok(());
    };
    let tile = config.tile_order.decode(busiest)?;
    info!(
        tiles = tiles.len(),
        features = store.len(),
        storage = format_bytes(store.storage_size()).as_str(),
        busiest_tile = tile.to_string().as_str(),
        busiest_tile_features = count,
        busiest_tile_progress = tile.progress_on_level(&config.tile_extents()),
        busiest_tile_url = tile.debug_url(DEBUG_URL).as_str();
        "Finished"
    );
    Ok(())
}

fn main() -> Result<()> {
    let config_path = env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = IngestConfig::load(&config_path)?;
    setup_logging(&config.log_level);
    info!(
        config = config_path.as_str(),
        data_path = config.data_path.as_str(),
        threads = config.threads;
        "Loaded config"
    );

    let profile: Arc<dyn Profile> = Arc::new(SemanticProfile::new()?);
    let renderer = Arc::new(FeatureRenderer::new(RenderConfig::from_config(&config)));
    let store = Arc::new(Mutex::new(InMemoryFeatureStore::new()));

    let path = Path::new(&config.data_path);
    if is_geojson(path) {
        let source = Arc::new(GeoJsonSource::new(&config.source_name, path));
        let reader = SimpleReader::new(source, profile, config.clone());
        ReadFeaturesEtl::new(reader, renderer, store.clone()).process()?;
    } else {
        let source: Arc<dyn OsmSource> = Arc::from(open_osm_source(&config.source_name, path)?);
        let ingestor = OsmIngestor::new(source, profile, config.clone());
        IngestOsmEtl::new(ingestor, renderer, store.clone()).process()?;
    }

    let mut store = store
        .lock()
        .map_err(|_| Error::pipeline_fault("feature store lock poisoned"))?;
    summarize(&config, &mut store)
}
