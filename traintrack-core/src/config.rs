//! Environment configuration for the traintrack daemons.
//!
//! Two knobs, both externally supplied: the UDP listen port for the
//! ingestion bridge and the WebSocket listen port for the broadcast
//! server. CLI flags in the binaries override these.

use crate::types::{Result, TrackError};

pub const DEFAULT_UDP_PORT: u16 = 9999;
pub const DEFAULT_WS_PORT: u16 = 8080;

const UDP_PORT_VAR: &str = "TRAINTRACK_UDP_PORT";
const WS_PORT_VAR: &str = "TRAINTRACK_WS_PORT";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub udp_port: u16,
    pub ws_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            udp_port: DEFAULT_UDP_PORT,
            ws_port: DEFAULT_WS_PORT,
        }
    }
}

impl Config {
    /// Load from the environment. Unset variables fall back to defaults;
    /// set-but-invalid values are an error, not a silent default.
    pub fn from_env() -> Result<Config> {
        Ok(Config {
            udp_port: port_from_env(UDP_PORT_VAR, DEFAULT_UDP_PORT)?,
            ws_port: port_from_env(WS_PORT_VAR, DEFAULT_WS_PORT)?,
        })
    }
}

fn port_from_env(name: &str, default: u16) -> Result<u16> {
    match std::env::var(name) {
        Ok(val) => parse_port(name, &val),
        Err(_) => Ok(default),
    }
}

/// Validate a port string: positive integer, fits in u16.
fn parse_port(name: &str, val: &str) -> Result<u16> {
    let port: u16 = val
        .trim()
        .parse()
        .map_err(|_| TrackError::Config(format!("{name}: invalid port {val:?}")))?;
    if port == 0 {
        return Err(TrackError::Config(format!("{name}: port must be positive")));
    }
    Ok(port)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.udp_port, 9999);
        assert_eq!(config.ws_port, 8080);
    }

    #[test]
    fn test_parse_port_valid() {
        assert_eq!(parse_port("X", "9000").unwrap(), 9000);
        assert_eq!(parse_port("X", " 8080 ").unwrap(), 8080);
    }

    #[test]
    fn test_parse_port_rejects_zero() {
        assert!(parse_port("X", "0").is_err());
    }

    #[test]
    fn test_parse_port_rejects_garbage() {
        assert!(parse_port("X", "not-a-port").is_err());
        assert!(parse_port("X", "-1").is_err());
        assert!(parse_port("X", "70000").is_err());
        assert!(parse_port("X", "").is_err());
    }

    #[test]
    fn test_from_env_roundtrip() {
        // Single test mutates the env to avoid races between env tests
        std::env::set_var(UDP_PORT_VAR, "9100");
        std::env::set_var(WS_PORT_VAR, "9200");
        let config = Config::from_env().unwrap();
        assert_eq!(config.udp_port, 9100);
        assert_eq!(config.ws_port, 9200);

        std::env::set_var(UDP_PORT_VAR, "zero");
        assert!(Config::from_env().is_err());

        std::env::remove_var(UDP_PORT_VAR);
        std::env::remove_var(WS_PORT_VAR);
        assert_eq!(Config::from_env().unwrap(), Config::default());
    }
}
