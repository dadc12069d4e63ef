//! Size and unit conventions.
//!
//! Storage capacities are bytes with decimal shorthand suffixes (KB, MB, GB,
//! TB, PB). Bandwidth is bits per second (Kbps, Mbps, Gbps). Latency is
//! milliseconds. Simulator time is fractional seconds.

use crate::SimError;

/// Parse a byte size with an optional decimal suffix: `"1048576"`, `"64MB"`,
/// `"1.5GB"`, `"2tb"`.
pub fn parse_size(value: &str) -> Result<u64, SimError> {
    let (number, multiplier) = split_suffix(
        value,
        &[
            ("pb", 1_000_000_000_000_000.0),
            ("tb", 1_000_000_000_000.0),
            ("gb", 1_000_000_000.0),
            ("mb", 1_000_000.0),
            ("kb", 1_000.0),
            ("b", 1.0),
        ],
    );
    let parsed: f64 = number
        .trim()
        .parse()
        .map_err(|_| SimError::InvalidArgument(format!("unparsable size '{value}'")))?;
    if parsed < 0.0 {
        return Err(SimError::InvalidArgument(format!(
            "size must be non-negative, got '{value}'"
        )));
    }
    Ok((parsed * multiplier) as u64)
}

/// Parse a bandwidth in bits per second: `"1Gbps"`, `"250mbps"`, `"1000000"`.
pub fn parse_bandwidth(value: &str) -> Result<u64, SimError> {
    let (number, multiplier) = split_suffix(
        value,
        &[
            ("gbps", 1_000_000_000.0),
            ("mbps", 1_000_000.0),
            ("kbps", 1_000.0),
            ("bps", 1.0),
        ],
    );
    let parsed: f64 = number
        .trim()
        .parse()
        .map_err(|_| SimError::InvalidArgument(format!("unparsable bandwidth '{value}'")))?;
    if parsed <= 0.0 {
        return Err(SimError::InvalidArgument(format!(
            "bandwidth must be positive, got '{value}'"
        )));
    }
    Ok((parsed * multiplier) as u64)
}

/// Parse a latency in milliseconds: `"10"`, `"0.5ms"`, `"2s"`.
pub fn parse_latency_ms(value: &str) -> Result<f64, SimError> {
    let (number, multiplier) = split_suffix(value, &[("ms", 1.0), ("s", 1_000.0)]);
    let parsed: f64 = number
        .trim()
        .parse()
        .map_err(|_| SimError::InvalidArgument(format!("unparsable latency '{value}'")))?;
    if parsed < 0.0 {
        return Err(SimError::InvalidArgument(format!(
            "latency must be non-negative, got '{value}'"
        )));
    }
    Ok(parsed * multiplier)
}

/// Render a byte count with the largest decimal unit that keeps 3 digits.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [(&str, f64); 5] = [
        ("PB", 1e15),
        ("TB", 1e12),
        ("GB", 1e9),
        ("MB", 1e6),
        ("KB", 1e3),
    ];
    for (unit, scale) in UNITS {
        if bytes as f64 >= scale {
            return format!("{:.2} {}", bytes as f64 / scale, unit);
        }
    }
    format!("{bytes} B")
}

/// Render a bit rate in the largest decimal unit.
pub fn format_bandwidth(bps: u64) -> String {
    const UNITS: [(&str, f64); 3] = [("Gbps", 1e9), ("Mbps", 1e6), ("Kbps", 1e3)];
    for (unit, scale) in UNITS {
        if bps as f64 >= scale {
            return format!("{:.2} {}", bps as f64 / scale, unit);
        }
    }
    format!("{bps} bps")
}

fn split_suffix<'a>(value: &'a str, suffixes: &[(&str, f64)]) -> (&'a str, f64) {
    let trimmed = value.trim();
    let lower = trimmed.to_ascii_lowercase();
    for (suffix, multiplier) in suffixes {
        if lower.ends_with(suffix) {
            return (&trimmed[..trimmed.len() - suffix.len()], *multiplier);
        }
    }
    (trimmed, 1.0)
}
