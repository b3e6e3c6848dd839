//! Platform memory sampling
//!
//! Only Linux-style `/proc` files are understood. Elsewhere the reads fail with
//! an I/O error, which the resource monitor turns into a degraded reading.

use std::fs;
use std::io;

const MEMINFO_PATH: &str = "/proc/meminfo";
const SELF_STATUS_PATH: &str = "/proc/self/status";

/// Source of memory readings for the resource monitor
///
/// Implementations must be cheap and must not block for long: they are called
/// on every sampling tick and at every fetch attempt boundary.
pub trait MemorySampler: Send + Sync {
    /// System-wide memory utilization in percent (0-100)
    fn system_memory_percent(&self) -> io::Result<f64>;

    /// Resident set size of the current process in MB
    fn process_rss_mb(&self) -> io::Result<f64>;
}

/// Reads memory figures from `/proc/meminfo` and `/proc/self/status`
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcMemorySampler;

impl ProcMemorySampler {
    pub fn new() -> Self {
        Self
    }
}

impl MemorySampler for ProcMemorySampler {
    fn system_memory_percent(&self) -> io::Result<f64> {
        let content = fs::read_to_string(MEMINFO_PATH)?;
        parse_meminfo_percent(&content).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} has no usable MemTotal/MemAvailable", MEMINFO_PATH),
            )
        })
    }

    fn process_rss_mb(&self) -> io::Result<f64> {
        let content = fs::read_to_string(SELF_STATUS_PATH)?;
        parse_vm_rss_mb(&content).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} has no VmRSS line", SELF_STATUS_PATH),
            )
        })
    }
}

/// Reads a `Key:   1234 kB` line and returns the value in kB
fn kb_field(content: &str, key: &str) -> Option<f64> {
    content.lines().find_map(|line| {
        let (name, rest) = line.split_once(':')?;
        if name.trim() != key {
            return None;
        }
        rest.split_whitespace().next()?.parse::<f64>().ok()
    })
}

/// Computes used memory percent from `/proc/meminfo` content
///
/// Kernels without `MemAvailable` fall back to free + buffers + page cache.
pub(crate) fn parse_meminfo_percent(content: &str) -> Option<f64> {
    let total = kb_field(content, "MemTotal")?;
    if total <= 0.0 {
        return None;
    }

    let available = kb_field(content, "MemAvailable").or_else(|| {
        let free = kb_field(content, "MemFree")?;
        let buffers = kb_field(content, "Buffers").unwrap_or(0.0);
        let cached = kb_field(content, "Cached").unwrap_or(0.0);
        Some(free + buffers + cached)
    })?;

    let used = (total - available).clamp(0.0, total);
    Some(used / total * 100.0)
}

/// Extracts the process RSS in MB from `/proc/self/status` content
pub(crate) fn parse_vm_rss_mb(content: &str) -> Option<f64> {
    kb_field(content, "VmRSS").map(|kb| kb / 1024.0)
}
