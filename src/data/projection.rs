//! Spherical web mercator helpers. World coordinates run from 0 to 1 with (0, 0) at the
//! north-west corner of the map.

use std::f64::consts::PI;

/// Latitude where web mercator becomes square.
pub const MAX_LAT: f64 = 85.051_128_779_806_59;

const QUANTIZED_WORLD_SIZE: f64 = (1u64 << 31) as f64;
const LOWER_32_BIT_MASK: u64 = 0xFFFF_FFFF;

pub fn world_x(lon: f64) -> f64 {
    (lon + 180.0) / 360.0
}

pub fn world_y(lat: f64) -> f64 {
    let lat = lat.clamp(-MAX_LAT, MAX_LAT);
    let sin = lat.to_radians().sin();
    let y = 0.5 - ((1.0 + sin) / (1.0 - sin)).ln() / (4.0 * PI);
    y.clamp(0.0, 1.0)
}

pub fn world_lon(x: f64) -> f64 {
    x * 360.0 - 180.0
}

pub fn world_lat(y: f64) -> f64 {
    let n = PI - 2.0 * PI * y;
    (0.5 * (n.exp() - (-n).exp())).atan().to_degrees()
}

/// Packs a lon/lat pair into 64 bits: 32 bits of quantized world x over 32 bits of
/// quantized world y.
pub fn encode_flat_location(lon: f64, lat: f64) -> u64 {
    let x = (world_x(lon) * QUANTIZED_WORLD_SIZE).round() as u64;
    let y = (world_y(lat) * QUANTIZED_WORLD_SIZE).round() as u64;
    (x << 32) | (y & LOWER_32_BIT_MASK)
}

pub fn decode_flat_lon(encoded: u64) -> f64 {
    world_lon((encoded >> 32) as f64 / QUANTIZED_WORLD_SIZE)
}

pub fn decode_flat_lat(encoded: u64) -> f64 {
    world_lat((encoded & LOWER_32_BIT_MASK) as f64 / QUANTIZED_WORLD_SIZE)
}

pub fn decode_flat_location(encoded: u64) -> geo::Coord<f64> {
    geo::Coord {
        x: decode_flat_lon(encoded),
        y: decode_flat_lat(encoded),
    }
}
