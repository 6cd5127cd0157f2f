//! Configuration for caches, the push channel and pagination.

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level sync configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub cache: CacheConfig,
    pub connection: ConnectionConfig,
    pub pagination: PaginationConfig,
}

impl SyncConfig {
    /// Parse a JSON document. Missing fields fall back to defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: SyncConfig = serde_json::from_str(json)
            .map_err(|e| SyncError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the state machines cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.cache.max_entries == 0 {
            return Err(SyncError::InvalidConfig("cache.max_entries must be > 0".into()));
        }
        if self.pagination.per_page == 0 {
            return Err(SyncError::InvalidConfig("pagination.per_page must be > 0".into()));
        }
        let conn = &self.connection;
        if conn.heartbeat_timeout_ms <= conn.heartbeat_interval_ms {
            return Err(SyncError::InvalidConfig(format!(
                "connection.heartbeat_timeout_ms ({}) must exceed heartbeat_interval_ms ({})",
                conn.heartbeat_timeout_ms, conn.heartbeat_interval_ms
            )));
        }
        if conn.max_reconnect_delay_ms < conn.reconnect_delay_ms {
            return Err(SyncError::InvalidConfig(
                "connection.max_reconnect_delay_ms must be >= reconnect_delay_ms".into(),
            ));
        }
        Ok(())
    }
}

/// Collection cache settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Max cached collections per kind.
    /// Default: 50
    pub max_entries: usize,

    /// Entry lifetime.
    /// Default: 5 minutes
    pub ttl_ms: u64,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 50,
            ttl_ms: 5 * 60 * 1000,
        }
    }
}

/// Push channel settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Collections the channel subscribes to.
    pub topics: Vec<String>,

    /// Backoff base delay.
    pub reconnect_delay_ms: u64,

    /// Backoff cap.
    pub max_reconnect_delay_ms: u64,

    /// How often liveness is checked.
    pub heartbeat_interval_ms: u64,

    /// Silence longer than this forces a reconnect.
    pub heartbeat_timeout_ms: u64,

    /// Delay between the last unsubscribe and closing the connection.
    pub teardown_grace_ms: u64,

    /// Forced reconnects closer together than this are coalesced.
    pub force_reconnect_debounce_ms: u64,
}

impl ConnectionConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.max_reconnect_delay_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn teardown_grace(&self) -> Duration {
        Duration::from_millis(self.teardown_grace_ms)
    }

    pub fn force_reconnect_debounce(&self) -> Duration {
        Duration::from_millis(self.force_reconnect_debounce_ms)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            topics: vec!["posts".into(), "comments".into(), "notifications".into()],
            reconnect_delay_ms: 1_000,
            max_reconnect_delay_ms: 30_000,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 60_000,
            teardown_grace_ms: 5_000,
            force_reconnect_debounce_ms: 2_000,
        }
    }
}

/// Page loading settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    pub per_page: u32,

    /// A page that takes longer than this fails with `FetchTimeout`.
    pub fetch_timeout_ms: u64,
}

impl PaginationConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            per_page: 20,
            fetch_timeout_ms: 15_000,
        }
    }
}
