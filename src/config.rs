use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use tracing::{error, warn};

use crate::outbox::{PublisherConfig, SweeperConfig};
use crate::utils::RetryConfig;

// ============================================================================
// Application configuration
// ============================================================================
//
// Read from `RESTAURANT_*` environment variables (a `.env` file is loaded
// first if present). Unset variables take the default; invalid ones are
// logged and also fall back to the default.
//
// ============================================================================

pub const DEFAULT_BROKERS: &str = "localhost:9092";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres { database_url: String, max_connections: u32 },
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerBackend {
    Kafka { brokers: String },
    Memory,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub storage: StorageBackend,
    pub broker: BrokerBackend,
    pub publisher: PublisherConfig,
    pub publisher_workers: usize,
    pub sweeper: SweeperConfig,
    pub health_check_interval: Duration,
    /// Run a sample order through the pipeline at start-up
    pub demo: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage: StorageBackend::Memory,
            broker: BrokerBackend::Memory,
            publisher: PublisherConfig::default(),
            publisher_workers: 1,
            sweeper: SweeperConfig::default(),
            health_check_interval: Duration::from_secs(10),
            demo: false,
        }
    }
}

impl AppConfig {
    pub fn from_env_or_default() -> Self {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                warn!("🪛️ Could not read .env file: {e}");
            }
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key/value source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let env = Lookup(&lookup);

        let database_url = env.get("DATABASE_URL");
        let storage = match env.get("RESTAURANT_STORAGE").as_deref() {
            Some("memory") => StorageBackend::Memory,
            Some("postgres") | None if database_url.is_some() => StorageBackend::Postgres {
                database_url: database_url.unwrap_or_default(),
                max_connections: env.parse("RESTAURANT_DB_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS),
            },
            Some("postgres") => {
                error!("🪛️ RESTAURANT_STORAGE=postgres but DATABASE_URL is not set. Using in-memory storage.");
                StorageBackend::Memory
            }
            None => StorageBackend::Memory,
            Some(other) => {
                error!("🪛️ Unknown RESTAURANT_STORAGE '{other}'. Using in-memory storage.");
                StorageBackend::Memory
            }
        };

        let broker = match env.get("RESTAURANT_BROKER").as_deref() {
            Some("kafka") => BrokerBackend::Kafka {
                brokers: env
                    .get("RESTAURANT_BROKERS")
                    .unwrap_or_else(|| DEFAULT_BROKERS.to_string()),
            },
            Some("memory") | None => BrokerBackend::Memory,
            Some(other) => {
                error!("🪛️ Unknown RESTAURANT_BROKER '{other}'. Using the in-memory broker.");
                BrokerBackend::Memory
            }
        };

        let publisher = PublisherConfig {
            topic: env.get("RESTAURANT_TOPIC").unwrap_or(defaults.publisher.topic),
            batch_size: env.parse("RESTAURANT_BATCH_SIZE", defaults.publisher.batch_size).max(1),
            min_age: env.millis("RESTAURANT_MIN_AGE_MS", defaults.publisher.min_age),
            lease: env.secs("RESTAURANT_LEASE_SECS", defaults.publisher.lease),
            ack_timeout: env.millis("RESTAURANT_PUBLISH_TIMEOUT_MS", defaults.publisher.ack_timeout),
            poll_interval: env.millis("RESTAURANT_POLL_INTERVAL_MS", defaults.publisher.poll_interval),
        };

        let backoff = RetryConfig {
            initial_delay: env.millis("RESTAURANT_BACKOFF_BASE_MS", defaults.sweeper.backoff.initial_delay),
            max_delay: env.secs("RESTAURANT_BACKOFF_CAP_SECS", defaults.sweeper.backoff.max_delay),
            ..defaults.sweeper.backoff
        };

        let sweeper = SweeperConfig {
            max_attempts: env.parse("RESTAURANT_MAX_ATTEMPTS", defaults.sweeper.max_attempts).max(1),
            backoff,
            retention: env.secs("RESTAURANT_RETENTION_SECS", defaults.sweeper.retention),
            interval: env.secs("RESTAURANT_SWEEP_INTERVAL_SECS", defaults.sweeper.interval),
            batch_size: defaults.sweeper.batch_size,
        };

        Self {
            storage,
            broker,
            publisher,
            publisher_workers: env
                .parse("RESTAURANT_PUBLISHER_WORKERS", defaults.publisher_workers)
                .max(1),
            sweeper,
            health_check_interval: env.secs(
                "RESTAURANT_HEALTH_INTERVAL_SECS",
                defaults.health_check_interval,
            ),
            demo: env.flag("RESTAURANT_DEMO"),
        }
    }
}

struct Lookup<'a, F>(&'a F);

impl<F: Fn(&str) -> Option<String>> Lookup<'_, F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn parse<T>(&self, key: &str, default: T) -> T
    where
        T: FromStr + Display,
        T::Err: Display,
    {
        match self.get(key) {
            None => default,
            Some(raw) => raw.trim().parse().unwrap_or_else(|e| {
                error!("🪛️ {raw} is not a valid value for {key}. {e} Using the default, {default}, instead.");
                default
            }),
        }
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        Duration::from_millis(self.parse(key, default.as_millis() as u64))
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        Duration::from_secs(self.parse(key, default.as_secs()))
    }

    fn flag(&self, key: &str) -> bool {
        self.get(key)
            .map(|s| s == "1" || s.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> AppConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_run_fully_in_memory() {
        let config = from_pairs(&[]);

        assert_eq!(config.storage, StorageBackend::Memory);
        assert_eq!(config.broker, BrokerBackend::Memory);
        assert_eq!(config.sweeper.max_attempts, 5);
        assert_eq!(config.sweeper.backoff.initial_delay, Duration::from_secs(1));
        assert_eq!(config.sweeper.backoff.max_delay, Duration::from_secs(60));
        assert!(!config.demo);
    }

    #[test]
    fn test_database_url_selects_postgres() {
        let config = from_pairs(&[("DATABASE_URL", "postgres://localhost/restaurant")]);

        assert_eq!(
            config.storage,
            StorageBackend::Postgres {
                database_url: "postgres://localhost/restaurant".to_string(),
                max_connections: DEFAULT_MAX_CONNECTIONS,
            }
        );
    }

    #[test]
    fn test_explicit_memory_wins_over_database_url() {
        let config = from_pairs(&[
            ("DATABASE_URL", "postgres://localhost/restaurant"),
            ("RESTAURANT_STORAGE", "memory"),
        ]);
        assert_eq!(config.storage, StorageBackend::Memory);
    }

    #[test]
    fn test_overrides_and_invalid_values() {
        let config = from_pairs(&[
            ("RESTAURANT_BROKER", "kafka"),
            ("RESTAURANT_BROKERS", "redpanda:9092"),
            ("RESTAURANT_MAX_ATTEMPTS", "8"),
            ("RESTAURANT_BACKOFF_BASE_MS", "250"),
            ("RESTAURANT_BATCH_SIZE", "lots"),
            ("RESTAURANT_PUBLISHER_WORKERS", "0"),
            ("RESTAURANT_DEMO", "true"),
        ]);

        assert_eq!(
            config.broker,
            BrokerBackend::Kafka {
                brokers: "redpanda:9092".to_string()
            }
        );
        assert_eq!(config.sweeper.max_attempts, 8);
        assert_eq!(config.sweeper.backoff.initial_delay, Duration::from_millis(250));
        assert_eq!(config.publisher.batch_size, PublisherConfig::default().batch_size);
        assert_eq!(config.publisher_workers, 1);
        assert!(config.demo);
    }

    #[test]
    fn test_zero_sizes_are_raised_to_one() {
        let config = from_pairs(&[
            ("RESTAURANT_BATCH_SIZE", "0"),
            ("RESTAURANT_MAX_ATTEMPTS", "0"),
        ]);

        assert_eq!(config.publisher.batch_size, 1);
        assert_eq!(config.sweeper.max_attempts, 1);
    }
}
