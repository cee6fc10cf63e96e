//! Engine configuration.

use std::time::Duration;

/// Expiry sweeper settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweeperConfig {
    /// Time between the end of one pass and the start of the next.
    pub interval: Duration,
    /// Age after which a Pending order and its reservations expire.
    pub reservation_ttl: Duration,
    /// Age after which a Pending transfer is marked Failed.
    pub transfer_ttl: Duration,
    /// Maximum records of each kind handled per pass.
    pub batch_size: usize,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5 * 60),
            reservation_ttl: Duration::from_secs(15 * 60),
            transfer_ttl: Duration::from_secs(15 * 60),
            batch_size: 100,
        }
    }
}

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Attempts per operation before a persistent conflict is surfaced.
    pub max_conflict_retries: u32,
    pub sweeper: SweeperConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: 5,
            sweeper: SweeperConfig::default(),
        }
    }
}
