pub mod ingest_osm;
pub mod read_features;

use log::{error, info};

use crate::errors::Result;

/// A reader run split into three logged steps.
pub trait Etl {
    type Input;
    type Output;

    fn etl_name(&self) -> &str;

    /// Elements and features dropped so far, reported when a step fails.
    fn malformed_count(&self) -> u64 {
        0
    }

    fn extract(&mut self) -> Result<Self::Input>;
    fn transform(&mut self, input: Self::Input) -> Result<Self::Output>;
    fn load(&mut self, output: Self::Output) -> Result<()>;

    fn process(&mut self) -> Result<()> {
        info!(etl_name = self.etl_name(); "Starting ETL process");

        info!(etl_name = self.etl_name(); "Extracting");
        let extracted = self.extract();
        let input = self.log_failure("Extraction", extracted)?;

        info!(etl_name = self.etl_name(); "Transforming");
        let transformed = self.transform(input);
        let output = self.log_failure("Transformation", transformed)?;

        info!(etl_name = self.etl_name(); "Loading");
        let loaded = self.load(output);
        self.log_failure("Loading", loaded)?;

        info!(etl_name = self.etl_name(); "Process finished");
        Ok(())
    }

    fn log_failure<T>(&self, step: &str, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            error!(
                etl_name = self.etl_name(),
                step = step,
                err = err.to_string().as_str(),
                malformed = self.malformed_count();
                "ETL step failed with error"
            );
        }
        result
    }
}
