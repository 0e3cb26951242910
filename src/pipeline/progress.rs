use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use log::info;

use crate::memory::format_bytes;
use crate::pipeline::Topology;

/// Shared counter updated by stage threads and read by progress logging.
#[derive(Debug, Clone, Default)]
pub struct Counter(Arc<AtomicU64>);

impl Counter {
    pub fn new() -> Self {
        Counter::default()
    }

    pub fn inc(&self) {
        self.add(1);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    /// Overwrites the value, for gauges such as byte sizes.
    pub fn set(&self, value: u64) {
        self.0.store(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

enum Entry {
    Rate {
        label: String,
        counter: Counter,
        last: u64,
    },
    Percent {
        label: String,
        total: u64,
        counter: Counter,
        last: u64,
    },
    Gauge {
        label: String,
        value: Box<dyn Fn() -> u64 + Send>,
        bytes: bool,
    },
    Queues,
}

/// Periodic one-line progress report for a running topology.
pub struct ProgressLoggers {
    name: String,
    entries: Vec<Entry>,
    last_log: Instant,
}

impl ProgressLoggers {
    pub fn new(name: &str) -> Self {
        ProgressLoggers {
            name: name.to_string(),
            entries: Vec::new(),
            last_log: Instant::now(),
        }
    }

    pub fn add_rate_counter(mut self, label: &str, counter: &Counter) -> Self {
        self.entries.push(Entry::Rate {
            label: label.to_string(),
            counter: counter.clone(),
            last: counter.get(),
        });
        self
    }

    /// Rate counter that also reports completion against an expected total.
    pub fn add_rate_percent_counter(mut self, label: &str, total: u64, counter: &Counter) -> Self {
        self.entries.push(Entry::Percent {
            label: label.to_string(),
            total,
            counter: counter.clone(),
            last: counter.get(),
        });
        self
    }

    pub fn add_gauge<F>(mut self, label: &str, value: F) -> Self
    where
        F: Fn() -> u64 + Send + 'static,
    {
        self.entries.push(Entry::Gauge {
            label: label.to_string(),
            value: Box::new(value),
            bytes: false,
        });
        self
    }

    /// Gauge reported as a byte size, for memory estimates and store sizes.
    pub fn add_byte_gauge<F>(mut self, label: &str, value: F) -> Self
    where
        F: Fn() -> u64 + Send + 'static,
    {
        self.entries.push(Entry::Gauge {
            label: label.to_string(),
            value: Box::new(value),
            bytes: true,
        });
        self
    }

    pub fn add_topology_stats(mut self) -> Self {
        self.entries.push(Entry::Queues);
        self
    }

    pub fn get_log(&mut self, topology: Option<&Topology>) -> String {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_log).as_secs_f64().max(1e-3);
        let mut line = String::new();
        for entry in self.entries.iter_mut() {
            if !line.is_empty() {
                line.push(' ');
            }
            match entry {
                Entry::Rate { label, counter, last } => {
                    let value = counter.get();
                    let rate = (value - (*last).min(value)) as f64 / elapsed;
                    *last = value;
                    let _ = write!(line, "{label}: [ {} {}/s ]", format_count(value), format_count(rate as u64));
                }
                Entry::Percent {
                    label,
                    total,
                    counter,
                    last,
                } => {
                    let value = counter.get();
                    let rate = (value - (*last).min(value)) as f64 / elapsed;
                    *last = value;
                    let percent = if *total == 0 {
                        100.0
                    } else {
                        (value as f64 * 100.0 / *total as f64).min(100.0)
                    };
                    let _ = write!(
                        line,
                        "{label}: [ {} {percent:.0}% {}/s ]",
                        format_count(value),
                        format_count(rate as u64)
                    );
                }
                Entry::Gauge { label, value, bytes } => {
                    let value = value();
                    let formatted = if *bytes { format_bytes(value) } else { format_count(value) };
                    let _ = write!(line, "{label}: {formatted}");
                }
                Entry::Queues => {
                    if let Some(topology) = topology {
                        let queues: Vec<String> = topology
                            .queues()
                            .iter()
                            .map(|queue| format!("{} {}/{}", queue.name, queue.len, queue.capacity))
                            .collect();
                        let _ = write!(line, "queues: [ {} ]", queues.join(" -> "));
                    }
                }
            }
        }
        self.last_log = now;
        line
    }

    pub fn log(&mut self, topology: Option<&Topology>) {
        let line = self.get_log(topology);
        info!(topology = self.name.as_str(); "{}", line);
    }
}

/// Compact human count: 999, 1.2k, 3.4M, 5.6B.
pub fn format_count(value: u64) -> String {
    match value {
        0..=999 => value.to_string(),
        1_000..=999_999 => format!("{:.1}k", value as f64 / 1e3),
        1_000_000..=999_999_999 => format!("{:.1}M", value as f64 / 1e6),
        _ => format!("{:.1}B", value as f64 / 1e9),
    }
}
