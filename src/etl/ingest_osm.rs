use std::sync::Arc;

use log::info;

use crate::errors::Result;
use crate::etl::Etl;
use crate::reader::osm::{OsmIngestor, OsmTotals};
use crate::render::FeatureRenderer;
use crate::store::SharedFeatureStore;

pub const ETL_NAME: &str = "ingest_osm";

/// Extract runs pass 1, transform runs pass 2, load releases the side tables. A failed
/// pass releases them too.
pub struct IngestOsmEtl {
    ingestor: OsmIngestor,
    renderer: Arc<FeatureRenderer>,
    store: SharedFeatureStore,
}

impl IngestOsmEtl {
    pub fn new(ingestor: OsmIngestor, renderer: Arc<FeatureRenderer>, store: SharedFeatureStore) -> Self {
        IngestOsmEtl {
            ingestor,
            renderer,
            store,
        }
    }

    pub fn ingestor(&self) -> &OsmIngestor {
        &self.ingestor
    }
}

impl Etl for IngestOsmEtl {
    type Input = OsmTotals;
    type Output = u64;

    fn etl_name(&self) -> &str {
        ETL_NAME
    }

    fn malformed_count(&self) -> u64 {
        self.ingestor.stats().malformed.get()
    }

    fn extract(&mut self) -> Result<Self::Input> {
        let totals = self.ingestor.osm_pass1();
        if totals.is_err() {
            self.ingestor.release();
        }
        totals
    }

    fn transform(&mut self, input: Self::Input) -> Result<Self::Output> {
        info!(
            etl_name = ETL_NAME,
            nodes = input.nodes,
            ways = input.ways,
            relations = input.relations;
            "Emitting features"
        );
        let written = self
            .ingestor
            .osm_pass2(Arc::clone(&self.renderer), Arc::clone(&self.store));
        if written.is_err() {
            self.ingestor.release();
        }
        written
    }

    fn load(&mut self, output: Self::Output) -> Result<()> {
        info!(
            etl_name = ETL_NAME,
            source = self.ingestor.source_name(),
            features = output,
            malformed = self.malformed_count();
            "Features emitted"
        );
        self.ingestor.release();
        Ok(())
    }
}
