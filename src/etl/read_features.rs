use std::sync::Arc;

use log::info;

use crate::errors::Result;
use crate::etl::Etl;
use crate::reader::simple::SimpleReader;
use crate::render::FeatureRenderer;
use crate::store::SharedFeatureStore;

pub const ETL_NAME: &str = "read_features";

pub struct ReadFeaturesEtl {
    reader: SimpleReader,
    renderer: Arc<FeatureRenderer>,
    store: SharedFeatureStore,
}

impl ReadFeaturesEtl {
    pub fn new(reader: SimpleReader, renderer: Arc<FeatureRenderer>, store: SharedFeatureStore) -> Self {
        ReadFeaturesEtl {
            reader,
            renderer,
            store,
        }
    }

    pub fn reader(&self) -> &SimpleReader {
        &self.reader
    }
}

impl Etl for ReadFeaturesEtl {
    type Input = u64;
    type Output = u64;

    fn etl_name(&self) -> &str {
        ETL_NAME
    }

    fn malformed_count(&self) -> u64 {
        self.reader.stats().malformed.get()
    }

    fn extract(&mut self) -> Result<Self::Input> {
        self.reader.count()
    }

    fn transform(&mut self, input: Self::Input) -> Result<Self::Output> {
        info!(etl_name = ETL_NAME, source = self.reader.source_name(), features = input; "Reading features");
        self.reader.run(Arc::clone(&self.renderer), Arc::clone(&self.store))
    }

    fn load(&mut self, output: Self::Output) -> Result<()> {
        info!(
            etl_name = ETL_NAME,
            source = self.reader.source_name(),
            features = output,
            malformed = self.malformed_count();
            "Features emitted"
        );
        self.reader.release();
        Ok(())
    }
}
