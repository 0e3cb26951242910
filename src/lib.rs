pub mod config;
pub mod data;
pub mod errors;
pub mod etl;
pub mod memory;
pub mod pipeline;
pub mod profile;
pub mod profiles;
pub mod reader;
pub mod render;
pub mod source;
pub mod store;
