//! Pool tunables and per-engine defaults

use crate::models::StorageEngine;
use crate::storage::PoolSettings;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Hard ceiling on max connections
pub const MAX_CONNECTIONS_CEILING: u32 = 100;

/// Ceiling for growth triggered by connection waits
pub const WAIT_GROWTH_CEILING: u32 = 80;

/// Connection lifetimes never drop below this
pub const MIN_CONN_LIFETIME: Duration = Duration::from_secs(30);

/// Serialize durations as whole seconds
pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

/// Tunables owned by the pool optimizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub min_connections: u32,
    pub max_connections: u32,
    pub max_idle: u32,
    #[serde(with = "duration_secs")]
    pub conn_max_lifetime: Duration,
    #[serde(with = "duration_secs")]
    pub conn_max_idle_time: Duration,
    pub auto_optimize: bool,
    #[serde(with = "duration_secs")]
    pub optimize_interval: Duration,
    /// CPU proxy above which the pool shrinks
    pub load_threshold: f64,
    /// Memory proxy above which connections are recycled faster
    pub memory_threshold: f64,
    /// Connections removed per CPU-pressure decision
    pub adjustment_step: u32,
    pub environment: String,
    pub engine: StorageEngine,
}

impl PoolConfig {
    /// Defaults for the given engine
    pub fn for_engine(engine: StorageEngine) -> Self {
        let (min, max, idle, lifetime, idle_time) = if engine.is_lightweight() {
            (1, 5, 2, Duration::from_secs(600), Duration::from_secs(300))
        } else {
            (10, 50, 10, Duration::from_secs(300), Duration::from_secs(120))
        };

        Self {
            min_connections: min,
            max_connections: max,
            max_idle: idle,
            conn_max_lifetime: lifetime,
            conn_max_idle_time: idle_time,
            auto_optimize: true,
            optimize_interval: Duration::from_secs(30),
            load_threshold: 0.7,
            memory_threshold: 0.8,
            adjustment_step: 5,
            environment: "test".to_string(),
            engine,
        }
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    /// Settings pushed to the storage handle
    pub fn to_settings(&self) -> PoolSettings {
        PoolSettings {
            max_open: self.max_connections,
            max_idle: self.max_idle,
            max_lifetime: self.conn_max_lifetime,
            max_idle_time: self.conn_max_idle_time,
        }
    }

    /// Force the bounds invariants, returning one message per correction
    pub fn normalize(&mut self) -> Vec<String> {
        let mut corrections = Vec::new();

        if self.max_connections > MAX_CONNECTIONS_CEILING {
            corrections.push(format!(
                "max_connections {} capped at {}",
                self.max_connections, MAX_CONNECTIONS_CEILING
            ));
            self.max_connections = MAX_CONNECTIONS_CEILING;
        }
        if self.min_connections > self.max_connections {
            corrections.push(format!(
                "max_connections {} raised to min_connections {}",
                self.max_connections, self.min_connections
            ));
            self.max_connections = self.min_connections.min(MAX_CONNECTIONS_CEILING);
            self.min_connections = self.min_connections.min(self.max_connections);
        }
        if self.max_connections == 0 {
            corrections.push("max_connections raised to 1".to_string());
            self.max_connections = 1;
        }
        if self.max_idle > self.max_connections {
            corrections.push(format!(
                "max_idle {} clamped to max_connections {}",
                self.max_idle, self.max_connections
            ));
            self.max_idle = self.max_connections;
        }
        if self.conn_max_lifetime < MIN_CONN_LIFETIME {
            corrections.push(format!(
                "conn_max_lifetime raised to {}s",
                MIN_CONN_LIFETIME.as_secs()
            ));
            self.conn_max_lifetime = MIN_CONN_LIFETIME;
        }
        if self.adjustment_step == 0 {
            corrections.push("adjustment_step raised to 1".to_string());
            self.adjustment_step = 1;
        }

        corrections
    }

    /// True when every bound invariant holds
    pub fn is_valid(&self) -> bool {
        self.min_connections <= self.max_connections
            && self.max_connections <= MAX_CONNECTIONS_CEILING
            && self.max_idle <= self.max_connections
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::for_engine(StorageEngine::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_defaults() {
        let sqlite = PoolConfig::for_engine(StorageEngine::Sqlite);
        assert_eq!(
            (sqlite.min_connections, sqlite.max_connections, sqlite.max_idle),
            (1, 5, 2)
        );
        assert_eq!(sqlite.conn_max_lifetime, Duration::from_secs(600));

        let postgres = PoolConfig::for_engine(StorageEngine::Postgres);
        assert_eq!(
            (postgres.min_connections, postgres.max_connections, postgres.max_idle),
            (10, 50, 10)
        );
        assert_eq!(postgres.conn_max_idle_time, Duration::from_secs(120));
        assert_eq!(postgres.adjustment_step, 5);
        assert!(postgres.is_valid());
    }

    #[test]
    fn test_normalize_raises_max_to_min() {
        let mut config = PoolConfig {
            min_connections: 20,
            max_connections: 10,
            max_idle: 15,
            ..PoolConfig::for_engine(StorageEngine::Mysql)
        };

        let corrections = config.normalize();

        assert_eq!(corrections.len(), 1);
        assert_eq!(config.max_connections, 20);
        assert_eq!(config.max_idle, 15);
        assert!(config.is_valid());
    }

    #[test]
    fn test_normalize_caps_and_clamps() {
        let mut config = PoolConfig {
            min_connections: 150,
            max_connections: 200,
            max_idle: 500,
            conn_max_lifetime: Duration::from_secs(1),
            ..PoolConfig::default()
        };

        config.normalize();

        assert_eq!(config.max_connections, MAX_CONNECTIONS_CEILING);
        assert_eq!(config.min_connections, MAX_CONNECTIONS_CEILING);
        assert_eq!(config.max_idle, MAX_CONNECTIONS_CEILING);
        assert_eq!(config.conn_max_lifetime, MIN_CONN_LIFETIME);
        assert!(config.is_valid());
    }

    #[test]
    fn test_serialized_durations_are_seconds() {
        let json = serde_json::to_value(PoolConfig::default()).unwrap();
        assert_eq!(json["conn_max_lifetime"], 600);
        assert_eq!(json["engine"], "sqlite");
    }
}
