//! Profile output: the collector a profile writes features into and the renderer that
//! cuts them into per-tile entries for the feature store.

pub mod collector;
pub mod renderer;

pub use collector::{Feature, FeatureCollector};
pub use renderer::{FeatureRenderer, RenderConfig, RenderedFeature, RenderedGeometry, TileValue};
