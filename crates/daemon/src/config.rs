//! Daemon configuration loaded from environment variables.

use std::time::Duration;

use engine::{EngineConfig, SweeperConfig};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Daemon configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `DATABASE_URL`: PostgreSQL connection string (unset: in-memory store)
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default: `5`)
/// - `SWEEP_INTERVAL_SECS`: seconds between sweeper passes (default: `300`)
/// - `RESERVATION_TTL_SECS`: age at which Pending orders expire (default: `900`)
/// - `TRANSFER_TTL_SECS`: age at which Pending transfers fail (default: `900`)
/// - `SWEEP_BATCH_SIZE`: records of each kind per pass (default: `100`)
/// - `MAX_CONFLICT_RETRIES`: attempts before a conflict is surfaced (default: `5`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `pretty` or `json` (default: `pretty`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub sweep_interval: Duration,
    pub reservation_ttl: Duration,
    pub transfer_ttl: Duration,
    pub sweep_batch_size: usize,
    pub max_conflict_retries: u32,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from any key lookup. Unparsable values fall back
    /// to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        let seconds = |key: &str, default: Duration| {
            parsed(key)
                .filter(|&secs| secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        Self {
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            database_max_connections: parsed("DATABASE_MAX_CONNECTIONS")
                .and_then(|n| u32::try_from(n).ok())
                .filter(|&n| n > 0)
                .unwrap_or(defaults.database_max_connections),
            sweep_interval: seconds("SWEEP_INTERVAL_SECS", defaults.sweep_interval),
            reservation_ttl: seconds("RESERVATION_TTL_SECS", defaults.reservation_ttl),
            transfer_ttl: seconds("TRANSFER_TTL_SECS", defaults.transfer_ttl),
            sweep_batch_size: parsed("SWEEP_BATCH_SIZE")
                .and_then(|n| usize::try_from(n).ok())
                .filter(|&n| n > 0)
                .unwrap_or(defaults.sweep_batch_size),
            max_conflict_retries: parsed("MAX_CONFLICT_RETRIES")
                .and_then(|n| u32::try_from(n).ok())
                .filter(|&n| n > 0)
                .unwrap_or(defaults.max_conflict_retries),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match lookup("LOG_FORMAT").as_deref().map(str::trim) {
                Some(format) if format.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        }
    }

    /// The engine settings this configuration describes.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_conflict_retries: self.max_conflict_retries,
            sweeper: SweeperConfig {
                interval: self.sweep_interval,
                reservation_ttl: self.reservation_ttl,
                transfer_ttl: self.transfer_ttl,
                batch_size: self.sweep_batch_size,
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            database_url: None,
            database_max_connections: 5,
            sweep_interval: engine.sweeper.interval,
            reservation_ttl: engine.sweeper.reservation_ttl,
            transfer_ttl: engine.sweeper.transfer_ttl,
            sweep_batch_size: engine.sweeper.batch_size,
            max_conflict_retries: engine.max_conflict_retries,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.database_url, None);
        assert_eq!(config.database_max_connections, 5);
        assert_eq!(config.sweep_interval, Duration::from_secs(300));
        assert_eq!(config.reservation_ttl, Duration::from_secs(900));
        assert_eq!(config.transfer_ttl, Duration::from_secs(900));
        assert_eq!(config.sweep_batch_size, 100);
        assert_eq!(config.max_conflict_retries, 5);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn test_empty_environment_gives_defaults() {
        assert_eq!(from_pairs(&[]), Config::default());
    }

    #[test]
    fn test_values_are_read() {
        let config = from_pairs(&[
            ("DATABASE_URL", "postgres://inventory@localhost/inventory"),
            ("DATABASE_MAX_CONNECTIONS", "12"),
            ("SWEEP_INTERVAL_SECS", "60"),
            ("RESERVATION_TTL_SECS", "120"),
            ("TRANSFER_TTL_SECS", "30"),
            ("SWEEP_BATCH_SIZE", "25"),
            ("MAX_CONFLICT_RETRIES", "8"),
            ("RUST_LOG", "engine=debug"),
            ("LOG_FORMAT", "JSON"),
        ]);

        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://inventory@localhost/inventory")
        );
        assert_eq!(config.database_max_connections, 12);
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
        assert_eq!(config.log_level, "engine=debug");
        assert_eq!(config.log_format, LogFormat::Json);

        let engine = config.engine_config();
        assert_eq!(engine.max_conflict_retries, 8);
        assert_eq!(engine.sweeper.reservation_ttl, Duration::from_secs(120));
        assert_eq!(engine.sweeper.transfer_ttl, Duration::from_secs(30));
        assert_eq!(engine.sweeper.batch_size, 25);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = from_pairs(&[
            ("DATABASE_URL", "  "),
            ("SWEEP_INTERVAL_SECS", "0"),
            ("SWEEP_BATCH_SIZE", "many"),
            ("MAX_CONFLICT_RETRIES", "-1"),
            ("LOG_FORMAT", "xml"),
        ]);
        assert_eq!(config, Config::default());
    }
}
