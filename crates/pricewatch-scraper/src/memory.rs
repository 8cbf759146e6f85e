//! System memory probe used by the rate limiter's pressure gate.

use std::fs;

/// Reports overall memory utilization as a fraction in `0.0..=1.0`.
pub trait MemoryGauge: Send + Sync {
    fn utilization(&self) -> f64;
}

/// Reads `/proc/meminfo`. On non-Linux hosts or read errors it reports 0.0,
/// which disables the pressure gate rather than stalling the pipeline.
#[derive(Debug, Default)]
pub struct ProcMeminfo;

impl MemoryGauge for ProcMeminfo {
    fn utilization(&self) -> f64 {
        fs::read_to_string("/proc/meminfo")
            .ok()
            .and_then(|text| parse_meminfo(&text))
            .unwrap_or(0.0)
    }
}

fn parse_meminfo(text: &str) -> Option<f64> {
    let mut total = None;
    let mut available = None;
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            total = parse_kib(rest);
        } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
            available = parse_kib(rest);
        }
        if total.is_some() && available.is_some() {
            break;
        }
    }
    let (total, available) = (total?, available?);
    if total == 0.0 {
        return None;
    }
    Some((1.0 - available / total).clamp(0.0, 1.0))
}

fn parse_kib(rest: &str) -> Option<f64> {
    rest.split_whitespace().next()?.parse::<f64>().ok()
}
