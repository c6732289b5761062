//! Service Configuration
//!
//! All settings come from environment variables with compiled-in defaults, so
//! a three-node cluster can be started on one machine without any setup. The
//! node list is a static, comma-separated set of base URLs; the ring is built
//! from it once at startup.

use std::time::Duration;

/// Default node set used when `DHT_NODES` is not provided.
const DEFAULT_NODES: &str = "http://localhost:8082,http://localhost:8083,http://localhost:8084";

#[derive(Debug, Clone)]
pub struct Config {
    /// Port the public gateway listens on.
    pub gateway_port: u16,
    /// Port a storage node listens on.
    pub node_port: u16,
    /// Port the replication coordinator listens on.
    pub replicator_port: u16,
    /// Port of the external identity provider (user manager).
    pub usermanager_port: u16,
    /// Stable identifier of this storage node; also names its WAL file.
    pub node_id: String,
    /// Base URLs of all storage nodes in the cluster.
    pub nodes: Vec<String>,
    /// Directory holding per-node WAL files.
    pub data_dir: String,
}

impl Config {
    /// Loads configuration from the environment, falling back to defaults.
    pub fn load() -> Self {
        Self {
            gateway_port: env_port("GATEWAY_PORT", 8080),
            node_port: env_port("DHTNODE_PORT", 8082),
            replicator_port: env_port("REPLICATOR_PORT", 8085),
            usermanager_port: env_port("USERMANAGER_PORT", 8081),
            node_id: env_string("NODE_ID", "node-1"),
            nodes: env_string("DHT_NODES", DEFAULT_NODES)
                .split(',')
                .map(|node| node.trim().trim_end_matches('/').to_string())
                .filter(|node| !node.is_empty())
                .collect(),
            data_dir: env_string("DATA_DIR", "data"),
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_port(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(default)
}

/// Parses a duration of the form `<int><unit>[<int><unit>...]` with units
/// `ns`, `us`, `ms`, `s`, `m`, `h` (e.g. `300ms`, `2h45m`). This is the wire
/// grammar of the `ttl` query parameter; replica sets must agree on it.
///
/// Returns `None` for anything that does not match the grammar. Callers on
/// the write path treat an unparseable TTL as "no TTL" rather than rejecting
/// the request.
pub fn parse_duration(input: &str) -> Option<Duration> {
    let s = input.trim();
    if s.is_empty() {
        return None;
    }

    let bytes = s.as_bytes();
    let mut pos = 0;
    let mut total_ns: u64 = 0;

    while pos < bytes.len() {
        let digits_start = pos;
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            pos += 1;
        }
        if pos == digits_start {
            return None;
        }
        let value: u64 = s[digits_start..pos].parse().ok()?;

        let unit_start = pos;
        while pos < bytes.len() && !bytes[pos].is_ascii_digit() {
            pos += 1;
        }
        let unit_ns: u64 = match &s[unit_start..pos] {
            "ns" => 1,
            "us" => 1_000,
            "ms" => 1_000_000,
            "s" => 1_000_000_000,
            "m" => 60 * 1_000_000_000,
            "h" => 3_600 * 1_000_000_000,
            _ => return None,
        };

        total_ns = total_ns.checked_add(value.checked_mul(unit_ns)?)?;
    }

    Some(Duration::from_nanos(total_ns))
}

/// Formats a duration in the same grammar `parse_duration` accepts, using the
/// largest unit that divides the value evenly (`90s` rather than `1m30s`).
pub fn format_duration(duration: Duration) -> String {
    let ns = duration.as_nanos() as u64;
    if ns == 0 {
        return "0s".to_string();
    }

    const UNITS: [(&str, u64); 6] = [
        ("h", 3_600 * 1_000_000_000),
        ("m", 60 * 1_000_000_000),
        ("s", 1_000_000_000),
        ("ms", 1_000_000),
        ("us", 1_000),
        ("ns", 1),
    ];

    for (unit, unit_ns) in UNITS {
        if ns % unit_ns == 0 {
            return format!("{}{}", ns / unit_ns, unit);
        }
    }
    format!("{}ns", ns)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_single_units() {
        assert_eq!(parse_duration("500ns"), Some(Duration::from_nanos(500)));
        assert_eq!(parse_duration("250us"), Some(Duration::from_micros(250)));
        assert_eq!(parse_duration("300ms"), Some(Duration::from_millis(300)));
        assert_eq!(parse_duration("45s"), Some(Duration::from_secs(45)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("2h"), Some(Duration::from_secs(7200)));
    }

    #[test]
    fn test_parse_duration_compound() {
        assert_eq!(parse_duration("1h30m"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_duration("2m30s"), Some(Duration::from_secs(150)));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("abc"), None);
        assert_eq!(parse_duration("10"), None);
        assert_eq!(parse_duration("s"), None);
        assert_eq!(parse_duration("10x"), None);
        assert_eq!(parse_duration("-5s"), None);
        assert_eq!(parse_duration("1.5h"), None);
    }

    #[test]
    fn test_format_duration_round_trips() {
        for input in ["500ns", "300ms", "45s", "5m", "2h", "90s"] {
            let parsed = parse_duration(input).unwrap();
            assert_eq!(parse_duration(&format_duration(parsed)), Some(parsed));
        }
    }

    #[test]
    fn test_format_duration_picks_largest_even_unit() {
        assert_eq!(format_duration(Duration::from_secs(90)), "90s");
        assert_eq!(format_duration(Duration::from_secs(120)), "2m");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1500ms");
        assert_eq!(format_duration(Duration::from_secs(0)), "0s");
    }

    #[test]
    fn test_config_defaults() {
        // Only assert on keys the test environment does not set.
        let config = Config::load();
        assert_eq!(config.nodes.len(), 3);
        assert!(config.nodes.iter().all(|node| node.starts_with("http://")));
    }
}
