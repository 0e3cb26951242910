//! Slippy map tile coordinates and the flat index used to sort features by tile.
//!
//! Tiles are numbered zoom level by zoom level: 1 index for z=0, 4 for z=1, and so on, so
//! zoom `z` occupies `[S(z), S(z) + 4^z)` with `S(z) = 4^0 + ... + 4^(z-1)`. Within a
//! level the default order is TMS (x ascending, y descending, matching the MBTiles
//! index). A Hilbert order over the same range restarts the curve at every level.

use std::fmt;

use geo::{Coord, Rect};
use serde::Deserialize;

use crate::data::projection::{world_lat, world_lon, world_x, world_y};
use crate::errors::{Error, Result};

pub const MAX_ZOOM: u8 = 15;

const ZOOM_LEVELS: usize = MAX_ZOOM as usize + 1;

const ZOOM_START_INDEX: [u64; ZOOM_LEVELS + 1] = zoom_start_index();

const fn zoom_start_index() -> [u64; ZOOM_LEVELS + 1] {
    let mut starts = [0u64; ZOOM_LEVELS + 1];
    let mut z = 1;
    while z <= ZOOM_LEVELS {
        starts[z] = starts[z - 1] + (1u64 << (2 * (z - 1)));
        z += 1;
    }
    starts
}

/// One past the last valid index.
pub const END_INDEX: u64 = ZOOM_START_INDEX[ZOOM_LEVELS];

pub fn start_index_for_zoom(z: u8) -> u64 {
    ZOOM_START_INDEX[usize::from(z.min(MAX_ZOOM + 1))]
}

fn zoom_for_index(index: u64) -> Result<u8> {
    if index >= END_INDEX {
        return Err(Error::contract_violation(format!(
            "tile index {index} is past the last tile at z{MAX_ZOOM}"
        )));
    }
    (0..=MAX_ZOOM)
        .rev()
        .find(|z| ZOOM_START_INDEX[usize::from(*z)] <= index)
        .ok_or_else(|| Error::contract_violation(format!("bad tile index {index}")))
}

/// Which traversal order a tile index is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TileOrder {
    #[default]
    Tms,
    Hilbert,
}

impl TileOrder {
    pub fn index_of(&self, tile: &TileCoord) -> u64 {
        match self {
            TileOrder::Tms => tile.encoded(),
            TileOrder::Hilbert => tile.hilbert_encoded(),
        }
    }

    pub fn decode(&self, index: u64) -> Result<TileCoord> {
        match self {
            TileOrder::Tms => TileCoord::decode(index),
            TileOrder::Hilbert => TileCoord::hilbert_decode(index),
        }
    }
}

/// The coordinate of a slippy map tile. `encoded` is always the TMS index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoord {
    encoded: u64,
    x: u32,
    y: u32,
    z: u8,
}

fn check_xyz(x: u32, y: u32, z: u8) -> Result<()> {
    if z > MAX_ZOOM {
        return Err(Error::contract_violation(format!(
            "zoom {z} is above the maximum of {MAX_ZOOM}"
        )));
    }
    let dim = 1u32 << z;
    if x >= dim || y >= dim {
        return Err(Error::contract_violation(format!(
            "tile {x}/{y} is outside the {dim}x{dim} grid of z{z}"
        )));
    }
    Ok(())
}

impl TileCoord {
    pub fn of_xyz(x: u32, y: u32, z: u8) -> Result<TileCoord> {
        Ok(TileCoord {
            encoded: Self::encode(x, y, z)?,
            x,
            y,
            z,
        })
    }

    pub fn encode(x: u32, y: u32, z: u8) -> Result<u64> {
        check_xyz(x, y, z)?;
        Ok(start_index_for_zoom(z) + tms_xy_to_position(z, x, y))
    }

    pub fn decode(encoded: u64) -> Result<TileCoord> {
        let z = zoom_for_index(encoded)?;
        let (x, y) = tms_position_to_xy(z, encoded - start_index_for_zoom(z));
        Ok(TileCoord { encoded, x, y, z })
    }

    pub fn hilbert_encode(x: u32, y: u32, z: u8) -> Result<u64> {
        check_xyz(x, y, z)?;
        Ok(start_index_for_zoom(z) + hilbert_xy_to_position(z, x, y))
    }

    /// Decodes a Hilbert index back into a coordinate (which carries its TMS index).
    pub fn hilbert_decode(index: u64) -> Result<TileCoord> {
        let z = zoom_for_index(index)?;
        let (x, y) = hilbert_position_to_xy(z, index - start_index_for_zoom(z));
        TileCoord::of_xyz(x, y, z)
    }

    /// Returns the tile containing a longitude/latitude at a zoom level.
    pub fn around_lng_lat(lng: f64, lat: f64, z: u8) -> Result<TileCoord> {
        if z > MAX_ZOOM {
            return Err(Error::contract_violation(format!(
                "zoom {z} is above the maximum of {MAX_ZOOM}"
            )));
        }
        let dim = 1u32 << z;
        let factor = f64::from(dim);
        let x = (world_x(lng) * factor).floor().clamp(0.0, factor - 1.0) as u32;
        let y = (world_y(lat) * factor).floor().clamp(0.0, factor - 1.0) as u32;
        TileCoord::of_xyz(x, y, z)
    }

    pub fn encoded(&self) -> u64 {
        self.encoded
    }

    pub fn x(&self) -> u32 {
        self.x
    }

    pub fn y(&self) -> u32 {
        self.y
    }

    pub fn z(&self) -> u8 {
        self.z
    }

    /// The index of this tile when levels are laid out in Hilbert order.
    pub fn hilbert_encoded(&self) -> u64 {
        start_index_for_zoom(self.z) + hilbert_xy_to_position(self.z, self.x, self.y)
    }

    pub fn parent(&self) -> Result<TileCoord> {
        if self.z == 0 {
            return Err(Error::contract_violation("the z0 tile has no parent"));
        }
        TileCoord::of_xyz(self.x / 2, self.y / 2, self.z - 1)
    }

    /// Geographic bounds of the tile, x is longitude and y is latitude.
    pub fn bounds_lng_lat(&self) -> Rect<f64> {
        let world_width = f64::from(1u32 << self.z);
        let x = f64::from(self.x);
        let y = f64::from(self.y);
        Rect::new(
            Coord {
                x: world_lon(x / world_width),
                y: world_lat((y + 1.0) / world_width),
            },
            Coord {
                x: world_lon((x + 1.0) / world_width),
                y: world_lat(y / world_width),
            },
        )
    }

    /// Pixel position of a longitude/latitude relative to the top-left corner of this tile,
    /// assuming 256x256 px tiles.
    pub fn lng_lat_to_tile_coords(&self, lng: f64, lat: f64) -> Coord<f64> {
        let factor = f64::from(1u32 << self.z);
        Coord {
            x: (world_x(lng) * factor - f64::from(self.x)) * 256.0,
            y: (world_y(lat) * factor - f64::from(self.y)) * 256.0,
        }
    }

    /// Approximate fraction of the way through the columns of `extents` at this zoom.
    pub fn progress_on_level(&self, extents: &TileExtents) -> f64 {
        let bounds = extents.for_zoom(self.z);
        let width = bounds.max_x.saturating_sub(bounds.min_x).max(1);
        f64::from(self.x.saturating_sub(bounds.min_x)) / f64::from(width)
    }

    pub fn hilbert_progress_on_level(&self) -> f64 {
        hilbert_xy_to_position(self.z, self.x, self.y) as f64 / (1u64 << (2 * self.z)) as f64
    }

    /// Substitutes `{lat}`, `{lon}` and `{z}` (or `{latitude}`, `{longitude}`, `{zoom}`)
    /// in `pattern` with the center of this tile.
    pub fn debug_url(&self, pattern: &str) -> String {
        let center = self.bounds_lng_lat().center();
        let lat = format_coordinate(center.y);
        let lon = format_coordinate(center.x);
        let zoom = format!("{}.5", self.z);
        pattern
            .replace("{latitude}", &lat)
            .replace("{lat}", &lat)
            .replace("{longitude}", &lon)
            .replace("{lon}", &lon)
            .replace("{zoom}", &zoom)
            .replace("{z}", &zoom)
    }
}

fn format_coordinate(value: f64) -> String {
    let formatted = format!("{value:.5}");
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    if trimmed == "-0" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{x={} y={} z={}}}", self.x, self.y, self.z)
    }
}

pub fn tms_xy_to_position(z: u8, x: u32, y: u32) -> u64 {
    let dim = 1u64 << z;
    u64::from(x) * dim + (dim - 1 - u64::from(y))
}

pub fn tms_position_to_xy(z: u8, position: u64) -> (u32, u32) {
    let dim = 1u64 << z;
    let x = position / dim;
    let y = dim - 1 - position % dim;
    (x as u32, y as u32)
}

fn hilbert_rotate(n: u64, x: &mut u64, y: &mut u64, rx: u64, ry: u64) {
    if ry == 0 {
        if rx == 1 {
            *x = n - 1 - *x;
            *y = n - 1 - *y;
        }
        std::mem::swap(x, y);
    }
}

pub fn hilbert_xy_to_position(z: u8, x: u32, y: u32) -> u64 {
    let n = 1u64 << z;
    let (mut x, mut y) = (u64::from(x), u64::from(y));
    let mut d = 0;
    let mut s = n / 2;
    while s > 0 {
        let rx = u64::from(x & s != 0);
        let ry = u64::from(y & s != 0);
        d += s * s * ((3 * rx) ^ ry);
        hilbert_rotate(n, &mut x, &mut y, rx, ry);
        s /= 2;
    }
    d
}

pub fn hilbert_position_to_xy(z: u8, position: u64) -> (u32, u32) {
    let n = 1u64 << z;
    let (mut x, mut y) = (0u64, 0u64);
    let mut t = position;
    let mut s = 1;
    while s < n {
        let rx = 1 & (t / 2);
        let ry = 1 & (t ^ rx);
        hilbert_rotate(s, &mut x, &mut y, rx, ry);
        x += s * rx;
        y += s * ry;
        t /= 4;
        s *= 2;
    }
    (x as u32, y as u32)
}

/// Column and row range (max exclusive) covered at one zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoomExtents {
    pub min_x: u32,
    pub max_x: u32,
    pub min_y: u32,
    pub max_y: u32,
}

impl ZoomExtents {
    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.min_x && x < self.max_x && y >= self.min_y && y < self.max_y
    }
}

/// Tile ranges covered by a geographic bounding box at every zoom level.
#[derive(Debug, Clone)]
pub struct TileExtents {
    levels: [ZoomExtents; ZOOM_LEVELS],
}

impl TileExtents {
    pub fn world() -> TileExtents {
        let mut levels = [ZoomExtents { min_x: 0, max_x: 1, min_y: 0, max_y: 1 }; ZOOM_LEVELS];
        for (z, level) in levels.iter_mut().enumerate() {
            let dim = 1u32 << z;
            *level = ZoomExtents { min_x: 0, max_x: dim, min_y: 0, max_y: dim };
        }
        TileExtents { levels }
    }

    /// `bounds` is in lon/lat degrees.
    pub fn from_bounds(bounds: &Rect<f64>) -> TileExtents {
        let min_world_x = world_x(bounds.min().x);
        let max_world_x = world_x(bounds.max().x);
        let min_world_y = world_y(bounds.max().y);
        let max_world_y = world_y(bounds.min().y);

        let mut extents = TileExtents::world();
        for (z, level) in extents.levels.iter_mut().enumerate() {
            let dim = 1u32 << z;
            let factor = f64::from(dim);
            let clamp = |value: f64| value.clamp(0.0, factor) as u32;
            let min_x = clamp((min_world_x * factor).floor());
            let min_y = clamp((min_world_y * factor).floor());
            *level = ZoomExtents {
                min_x: min_x.min(dim - 1),
                max_x: clamp((max_world_x * factor).ceil()).max(min_x + 1).min(dim),
                min_y: min_y.min(dim - 1),
                max_y: clamp((max_world_y * factor).ceil()).max(min_y + 1).min(dim),
            };
        }
        extents
    }

    pub fn for_zoom(&self, z: u8) -> ZoomExtents {
        self.levels[usize::from(z.min(MAX_ZOOM))]
    }

    pub fn contains(&self, tile: &TileCoord) -> bool {
        self.for_zoom(tile.z()).contains(tile.x(), tile.y())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::errors::ErrorKind;

    const TESTED_ZOOM: u8 = 7;

    #[test]
    fn zoom_start_table() {
        assert_eq!(start_index_for_zoom(0), 0);
        assert_eq!(start_index_for_zoom(1), 1);
        assert_eq!(start_index_for_zoom(2), 5);
        assert_eq!(start_index_for_zoom(3), 21);
        assert_eq!(END_INDEX, (4u64.pow(16) - 1) / 3);
    }

    #[test]
    fn first_tiles() {
        assert_eq!(TileCoord::encode(0, 0, 0).unwrap(), 0);
        let z1: HashSet<u64> = [(0, 0), (0, 1), (1, 0), (1, 1)]
            .iter()
            .map(|(x, y)| TileCoord::encode(*x, *y, 1).unwrap())
            .collect();
        assert_eq!(z1, (1..5).collect::<HashSet<u64>>());
        // x ascending, y descending
        assert_eq!(TileCoord::encode(0, 1, 1).unwrap(), 1);
        assert_eq!(TileCoord::encode(0, 0, 1).unwrap(), 2);
        assert_eq!(TileCoord::encode(1, 1, 1).unwrap(), 3);
        assert_eq!(TileCoord::encode(1, 0, 1).unwrap(), 4);
    }

    #[test]
    fn tms_round_trip_and_coverage() {
        for z in 0..=TESTED_ZOOM {
            let dim = 1u32 << z;
            let mut seen = HashSet::new();
            for x in 0..dim {
                for y in 0..dim {
                    let index = TileCoord::encode(x, y, z).unwrap();
                    let decoded = TileCoord::decode(index).unwrap();
                    assert_eq!((decoded.x(), decoded.y(), decoded.z()), (x, y, z));
                    assert!(seen.insert(index));
                }
            }
            let start = start_index_for_zoom(z);
            assert_eq!(seen, (start..start + 4u64.pow(u32::from(z))).collect::<HashSet<u64>>());
        }
    }

    #[test]
    fn hilbert_round_trip_and_coverage() {
        for z in 0..=TESTED_ZOOM {
            let dim = 1u32 << z;
            let mut seen = HashSet::new();
            for x in 0..dim {
                for y in 0..dim {
                    let index = TileCoord::hilbert_encode(x, y, z).unwrap();
                    let decoded = TileCoord::hilbert_decode(index).unwrap();
                    assert_eq!((decoded.x(), decoded.y(), decoded.z()), (x, y, z));
                    assert_eq!(decoded.hilbert_encoded(), index);
                    assert!(seen.insert(index));
                }
            }
            let start = start_index_for_zoom(z);
            assert_eq!(seen, (start..start + 4u64.pow(u32::from(z))).collect::<HashSet<u64>>());
        }
    }

    #[test]
    fn hilbert_neighbors_are_adjacent_tiles() {
        let z = 5;
        let start = start_index_for_zoom(z);
        let mut previous = TileCoord::hilbert_decode(start).unwrap();
        for index in start + 1..start + 4u64.pow(u32::from(z)) {
            let tile = TileCoord::hilbert_decode(index).unwrap();
            let distance = previous.x().abs_diff(tile.x()) + previous.y().abs_diff(tile.y());
            assert_eq!(distance, 1, "{previous} -> {tile}");
            previous = tile;
        }
    }

    #[test]
    fn max_zoom_corners() {
        let max = (1u32 << MAX_ZOOM) - 1;
        for (x, y) in [(0, 0), (max, 0), (0, max), (max, max)] {
            let tile = TileCoord::of_xyz(x, y, MAX_ZOOM).unwrap();
            assert_eq!(TileCoord::decode(tile.encoded()).unwrap(), tile);
            assert_eq!(TileCoord::hilbert_decode(tile.hilbert_encoded()).unwrap(), tile);
        }
        assert_eq!(TileCoord::decode(END_INDEX - 1).unwrap().z(), MAX_ZOOM);
    }

    #[test]
    fn contract_violations_are_rejected() {
        let err = TileCoord::of_xyz(0, 0, MAX_ZOOM + 1).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ContractViolation);
        assert!(TileCoord::of_xyz(2, 0, 1).is_err());
        assert!(TileCoord::of_xyz(0, 2, 1).is_err());
        assert!(TileCoord::decode(END_INDEX).is_err());
        assert!(TileCoord::hilbert_decode(END_INDEX).is_err());
        assert!(TileCoord::of_xyz(0, 0, 0).unwrap().parent().is_err());
    }

    #[test]
    fn parent_bounds_contain_child_bounds() {
        let eps = 1e-9;
        for z in 1..=6u8 {
            let dim = 1u32 << z;
            for x in (0..dim).step_by(3) {
                for y in (0..dim).step_by(5) {
                    let child = TileCoord::of_xyz(x, y, z).unwrap();
                    let parent = child.parent().unwrap();
                    assert_eq!(parent.z(), z - 1);
                    let (c, p) = (child.bounds_lng_lat(), parent.bounds_lng_lat());
                    assert!(p.min().x <= c.min().x + eps && p.min().y <= c.min().y + eps);
                    assert!(p.max().x + eps >= c.max().x && p.max().y + eps >= c.max().y);
                }
            }
        }
    }

    #[test]
    fn bounds_of_root_tile_cover_the_world() {
        let bounds = TileCoord::of_xyz(0, 0, 0).unwrap().bounds_lng_lat();
        assert!((bounds.min().x + 180.0).abs() < 1e-9);
        assert!((bounds.max().x - 180.0).abs() < 1e-9);
        assert!((bounds.max().y - crate::data::projection::MAX_LAT).abs() < 1e-6);
    }

    #[test]
    fn around_lng_lat_finds_containing_tile() {
        let tile = TileCoord::around_lng_lat(-0.1276, 51.5072, 10).unwrap();
        assert_eq!((tile.x(), tile.y()), (511, 340));
        let bounds = tile.bounds_lng_lat();
        assert!(bounds.min().x <= -0.1276 && bounds.max().x >= -0.1276);
        let pixel = tile.lng_lat_to_tile_coords(-0.1276, 51.5072);
        assert!((0.0..256.0).contains(&pixel.x) && (0.0..256.0).contains(&pixel.y));
    }

    #[test]
    fn tile_order_dispatch() {
        let tile = TileCoord::of_xyz(3, 5, 4).unwrap();
        assert_eq!(TileOrder::Tms.decode(TileOrder::Tms.index_of(&tile)).unwrap(), tile);
        assert_eq!(TileOrder::Hilbert.decode(TileOrder::Hilbert.index_of(&tile)).unwrap(), tile);
    }

    #[test]
    fn extents_and_progress() {
        let extents = TileExtents::from_bounds(&Rect::new(
            Coord { x: -10.0, y: -10.0 },
            Coord { x: 10.0, y: 10.0 },
        ));
        let z4 = extents.for_zoom(4);
        assert_eq!((z4.min_x, z4.max_x), (7, 9));
        let tile = TileCoord::of_xyz(8, 8, 4).unwrap();
        assert!(extents.contains(&tile));
        assert!((tile.progress_on_level(&extents) - 0.5).abs() < 1e-9);
        assert!(!extents.contains(&TileCoord::of_xyz(0, 0, 4).unwrap()));
        assert!(TileCoord::of_xyz(0, 0, 3).unwrap().hilbert_progress_on_level() < 1e-9);
    }

    #[test]
    fn debug_url_uses_tile_center() {
        let tile = TileCoord::of_xyz(0, 0, 0).unwrap();
        let url = tile.debug_url("https://www.openstreetmap.org/#map={z}/{lat}/{lon}");
        assert_eq!(url, "https://www.openstreetmap.org/#map=0.5/0/0");
        assert_eq!(format!("{tile}"), "{x=0 y=0 z=0}");
    }
}
