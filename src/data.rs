pub mod attributes;
pub mod feature;
pub mod osm;
pub mod projection;
pub mod tile;
