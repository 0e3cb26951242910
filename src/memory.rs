//! Rough heap size estimates for the large side tables.

use std::collections::{HashMap, HashSet};
use std::mem::size_of;

pub trait MemoryEstimate {
    fn estimate_memory_usage_bytes(&self) -> u64;
}

/// Hash tables keep one control byte per bucket and run at most 7/8 full.
pub fn hash_map_size<K, V>(map: &HashMap<K, V>) -> u64 {
    (map.capacity() as u64) * (size_of::<K>() + size_of::<V>() + 1) as u64
}

pub fn hash_set_size<K>(set: &HashSet<K>) -> u64 {
    (set.capacity() as u64) * (size_of::<K>() + 1) as u64
}

pub fn vec_size<T>(values: &Vec<T>) -> u64 {
    (size_of::<Vec<T>>() + values.capacity() * size_of::<T>()) as u64
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "kB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes}{}", UNITS[0])
    } else {
        format!("{value:.1}{}", UNITS[unit])
    }
}
