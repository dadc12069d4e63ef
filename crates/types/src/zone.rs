//! Availability-zone catalog.

/// Zones nodes can be placed in when the caller does not pick one.
pub const ZONE_CATALOG: [&str; 10] = [
    "us-east-1a",
    "us-east-1b",
    "us-east-2a",
    "us-west-1a",
    "us-west-2b",
    "eu-central-1a",
    "eu-west-1b",
    "ap-south-1a",
    "ap-northeast-1c",
    "sa-east-1a",
];

/// Region portion of a zone name (`"us-east-1a"` → `"us-east-1"`).
pub fn zone_region(zone: &str) -> &str {
    let tokens: Vec<usize> = zone
        .char_indices()
        .filter(|(_, c)| *c == '-')
        .map(|(i, _)| i)
        .collect();
    if tokens.len() < 2 {
        return zone;
    }
    // Region is everything up to the trailing zone letter.
    match zone.rfind(|c: char| c.is_ascii_digit()) {
        Some(idx) => &zone[..=idx],
        None => zone,
    }
}
