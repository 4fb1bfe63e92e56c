/// Configuration management for the pipeloom server
///
/// Handles server binding, storage location and the engine's external collaborators.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Engine collaborators
    pub engine: EngineConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// SQLite storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Directory holding `pipeloom.db` (default: "data")
    pub data_dir: String,
}

impl DatabaseConfig {
    /// sqlx connection URL of the pipeline database
    pub fn url(&self) -> String {
        format!("sqlite://{}/pipeloom.db?mode=rwc", self.data_dir)
    }
}

/// External services called by node runners
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Endpoint of the AI transformation route
    pub transform_url: String,
    pub transform_timeout_secs: u64,
    pub integration_timeout_secs: u64,
}

impl EngineConfig {
    pub fn transform_timeout(&self) -> Duration {
        Duration::from_secs(self.transform_timeout_secs)
    }

    pub fn integration_timeout(&self) -> Duration {
        Duration::from_secs(self.integration_timeout_secs)
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: env_or("PIPELOOM_HOST", "0.0.0.0"),
                port: env_parse("PIPELOOM_PORT", 3004),
            },
            database: DatabaseConfig {
                data_dir: env_or("PIPELOOM_DATA_DIR", "data"),
            },
            engine: EngineConfig {
                transform_url: env_or(
                    "PIPELOOM_TRANSFORM_URL",
                    "http://127.0.0.1:3000/api/transform",
                ),
                transform_timeout_secs: env_parse("PIPELOOM_TRANSFORM_TIMEOUT_SECS", 120),
                integration_timeout_secs: env_parse("PIPELOOM_INTEGRATION_TIMEOUT_SECS", 60),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_url_points_into_the_data_dir() {
        let db = DatabaseConfig {
            data_dir: "/var/lib/pipeloom".into(),
        };
        assert_eq!(db.url(), "sqlite:///var/lib/pipeloom/pipeloom.db?mode=rwc");
    }

    #[test]
    fn unset_values_fall_back_to_defaults() {
        assert_eq!(env_parse("PIPELOOM_TEST_UNSET_PORT", 3004u16), 3004);
    }
}
