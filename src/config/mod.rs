//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use crate::util::time::{DEFAULT_MATCHMAKING_INTERVAL_MS, DEFAULT_TICK_RATE};

const DEFAULT_ADDR: &str = "0.0.0.0:8080";

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Simulation ticks per second for every lobby
    pub tick_rate: u32,
    /// Pause between matchmaking scans
    pub matchmaking_interval: Duration,
    /// Allowed client origin for CORS; any origin when unset
    pub client_origin: Option<String>,

    /// Supabase project URL
    pub supabase_url: Option<String>,
    /// Supabase service role key (bypasses RLS - server only!)
    pub supabase_service_role_key: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = match lookup("PORT") {
            Some(port) => format!("0.0.0.0:{}", port),
            None => lookup("SERVER_ADDR").unwrap_or_else(|| DEFAULT_ADDR.to_string()),
        };

        let tick_rate = parse_or(&lookup, "TICK_RATE", DEFAULT_TICK_RATE)?;
        if tick_rate == 0 {
            return Err(ConfigError::Invalid("TICK_RATE"));
        }
        let interval_ms = parse_or(&lookup, "MATCHMAKING_INTERVAL_MS", DEFAULT_MATCHMAKING_INTERVAL_MS)?;

        let supabase_url = lookup("SUPABASE_URL").filter(|v| !v.is_empty());
        let supabase_service_role_key = lookup("SUPABASE_SERVICE_ROLE_KEY").filter(|v| !v.is_empty());
        if supabase_url.is_some() != supabase_service_role_key.is_some() {
            return Err(ConfigError::Missing(if supabase_url.is_some() {
                "SUPABASE_SERVICE_ROLE_KEY"
            } else {
                "SUPABASE_URL"
            }));
        }

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            tick_rate,
            matchmaking_interval: Duration::from_millis(interval_ms.max(1)),
            client_origin: lookup("CLIENT_ORIGIN").filter(|v| !v.is_empty()),
            supabase_url,
            supabase_service_role_key,
        })
    }

    /// Supabase URL and key when both are set
    pub fn supabase(&self) -> Option<(&str, &str)> {
        match (&self.supabase_url, &self.supabase_service_role_key) {
            (Some(url), Some(key)) => Some((url, key)),
            _ => None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            log_level: "info".to_string(),
            tick_rate: DEFAULT_TICK_RATE,
            matchmaking_interval: Duration::from_millis(DEFAULT_MATCHMAKING_INTERVAL_MS),
            client_origin: None,
            supabase_url: None,
            supabase_service_role_key: None,
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        None => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.server_addr.port(), 8080);
        assert_eq!(config.tick_rate, 30);
        assert_eq!(config.matchmaking_interval, Duration::from_millis(100));
        assert!(config.supabase().is_none());
        assert!(config.client_origin.is_none());
    }

    #[test]
    fn test_port_wins_over_server_addr() {
        let config = load(&[("PORT", "9000"), ("SERVER_ADDR", "127.0.0.1:1")]).unwrap();
        assert_eq!(config.server_addr.port(), 9000);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(load(&[("TICK_RATE", "fast")]), Err(ConfigError::Invalid("TICK_RATE"))));
        assert!(matches!(load(&[("TICK_RATE", "0")]), Err(ConfigError::Invalid("TICK_RATE"))));
        assert!(matches!(load(&[("SERVER_ADDR", "nowhere")]), Err(ConfigError::InvalidAddress)));
    }

    #[test]
    fn test_supabase_needs_both_keys() {
        assert!(matches!(
            load(&[("SUPABASE_URL", "https://x.supabase.co")]),
            Err(ConfigError::Missing("SUPABASE_SERVICE_ROLE_KEY"))
        ));
        let config = load(&[("SUPABASE_URL", "https://x.supabase.co"), ("SUPABASE_SERVICE_ROLE_KEY", "k")]).unwrap();
        assert_eq!(config.supabase(), Some(("https://x.supabase.co", "k")));
    }
}
