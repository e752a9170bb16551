//! # Configuration Management
//!
//! Centralized configuration for the shard network core.
//!
//! This module provides structured configuration for the two listeners, the
//! event loop, and diagnostics, loadable from TOML files or environment
//! overrides.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment-specific overrides via `from_env()`

use std::fs::File;
use std::io::Read;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{NetError, Result};

/// Default login listener port
pub const DEFAULT_LOGIN_PORT: u16 = 2593;

/// Default game listener port
pub const DEFAULT_GAME_PORT: u16 = 2594;

/// Scheduler defaults: 20 Hz tick, bounded per-tick work
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 50;
pub const DEFAULT_MAX_ACTIONS_PER_TICK: usize = 100;
pub const DEFAULT_SLOW_ACTION_THRESHOLD_MS: u64 = 50;

/// How long `stop()` waits for the loop task before giving up
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 5;

/// How long a pending migration may sit unclaimed
pub const DEFAULT_MIGRATION_TTL_SECS: u64 = 30;

/// Main configuration structure for the gateway and its scheduler.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetConfig {
    /// Login listener configuration
    #[serde(default = "ListenerConfig::login_default")]
    pub login: ListenerConfig,

    /// Game listener configuration
    #[serde(default = "ListenerConfig::game_default")]
    pub game: ListenerConfig,

    /// Shard identity advertised in the server list
    #[serde(default)]
    pub shard: ShardConfig,

    /// Event loop configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Packet diagnostics configuration
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            login: ListenerConfig::login_default(),
            game: ListenerConfig::game_default(),
            shard: ShardConfig::default(),
            scheduler: SchedulerConfig::default(),
            diagnostics: DiagnosticsConfig::default(),
        }
    }
}

impl NetConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| NetError::Config(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| NetError::Config(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| NetError::Config(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(port) = std::env::var("SHARDNET_LOGIN_PORT") {
            if let Ok(val) = port.parse::<u16>() {
                config.login.port = val;
            }
        }

        if let Ok(port) = std::env::var("SHARDNET_GAME_PORT") {
            if let Ok(val) = port.parse::<u16>() {
                config.game.port = val;
            }
        }

        if let Ok(interval) = std::env::var("SHARDNET_TICK_INTERVAL_MS") {
            if let Ok(val) = interval.parse::<u64>() {
                config.scheduler.tick_interval = Duration::from_millis(val);
            }
        }

        if let Ok(budget) = std::env::var("SHARDNET_MAX_ACTIONS_PER_TICK") {
            if let Ok(val) = budget.parse::<usize>() {
                config.scheduler.max_actions_per_tick = val;
            }
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Validate the configuration for common misconfigurations.
    ///
    /// Returns a list of validation errors; empty means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.login.validate("login"));
        errors.extend(self.game.validate("game"));
        if self.login.port == self.game.port && self.login.bind == self.game.bind {
            errors.push("Login and game listeners share a bind address and port".to_string());
        }
        errors.extend(self.shard.validate());
        errors.extend(self.scheduler.validate());
        errors.extend(self.diagnostics.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(NetError::Config(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// One listener's bind and advertised addresses.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenerConfig {
    /// Listener name used in logs and connection ids
    pub name: String,

    /// Local bind address (e.g. "0.0.0.0")
    pub bind: String,

    pub port: u16,

    /// IPv4 address advertised to clients in redirects and server lists;
    /// usually differs from `bind` behind NAT
    pub public_address: String,
}

impl ListenerConfig {
    fn login_default() -> Self {
        Self {
            name: String::from("login"),
            bind: String::from("0.0.0.0"),
            port: DEFAULT_LOGIN_PORT,
            public_address: String::from("127.0.0.1"),
        }
    }

    fn game_default() -> Self {
        Self {
            name: String::from("game"),
            bind: String::from("0.0.0.0"),
            port: DEFAULT_GAME_PORT,
            public_address: String::from("127.0.0.1"),
        }
    }

    /// The advertised address parsed as IPv4 (the wire format has no room
    /// for anything else).
    pub fn public_ipv4(&self) -> Result<Ipv4Addr> {
        self.public_address
            .parse::<Ipv4Addr>()
            .map_err(|_| NetError::Config(format!("Invalid IPv4 address: {}", self.public_address)))
    }

    fn validate(&self, label: &str) -> Vec<String> {
        let mut errors = Vec::new();

        if self.name.is_empty() {
            errors.push(format!("{label} listener name cannot be empty"));
        }

        if self.bind.parse::<std::net::IpAddr>().is_err() {
            errors.push(format!(
                "Invalid {label} bind address: '{}' (expected e.g. '0.0.0.0')",
                self.bind
            ));
        }

        if self.port == 0 {
            errors.push(format!("{label} listener port cannot be 0"));
        }

        if self.public_address.parse::<Ipv4Addr>().is_err() {
            errors.push(format!(
                "Invalid {label} public address: '{}' (must be IPv4)",
                self.public_address
            ));
        }

        errors
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self::login_default()
    }
}

/// Shard identity as shown in the 0xA8 server list.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ShardConfig {
    /// Shard name; the wire field is 32 ASCII bytes
    pub name: String,

    pub timezone: u8,

    /// Server-list flags byte expected by the client
    pub list_flags: u8,

    /// How long a pending migration may wait before it is purged
    #[serde(with = "duration_serde")]
    pub migration_ttl: Duration,
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            name: String::from("ModernUO"),
            timezone: 2,
            list_flags: 0x5D,
            migration_ttl: Duration::from_secs(DEFAULT_MIGRATION_TTL_SECS),
        }
    }
}

impl ShardConfig {
    fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.name.is_empty() {
            errors.push("Shard name cannot be empty".to_string());
        } else if self.name.len() > 32 {
            errors.push(format!(
                "Shard name too long: {} characters (wire field is 32)",
                self.name.len()
            ));
        }

        if self.migration_ttl.as_secs() < 5 {
            errors.push("Migration TTL too short (minimum: 5s)".to_string());
        } else if self.migration_ttl.as_secs() > 600 {
            errors.push("Migration TTL too long (maximum: 600s)".to_string());
        }

        errors
    }
}

/// Event loop configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    /// Target tick cadence
    #[serde(with = "duration_serde")]
    pub tick_interval: Duration,

    /// Hard cap on actions executed within one tick
    pub max_actions_per_tick: usize,

    /// Actions slower than this are logged by name
    #[serde(with = "duration_serde")]
    pub slow_action_threshold: Duration,

    /// How long `stop()` waits for the loop task
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(DEFAULT_TICK_INTERVAL_MS),
            max_actions_per_tick: DEFAULT_MAX_ACTIONS_PER_TICK,
            slow_action_threshold: Duration::from_millis(DEFAULT_SLOW_ACTION_THRESHOLD_MS),
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
        }
    }
}

impl SchedulerConfig {
    fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.tick_interval.as_millis() == 0 {
            errors.push("Tick interval cannot be 0".to_string());
        } else if self.tick_interval.as_millis() > 1000 {
            errors.push("Tick interval too long (maximum: 1000ms)".to_string());
        }

        if self.max_actions_per_tick == 0 {
            errors.push("Max actions per tick must be greater than 0".to_string());
        }

        if self.slow_action_threshold.as_millis() == 0 {
            errors.push("Slow action threshold cannot be 0".to_string());
        }

        if self.shutdown_timeout.as_secs() == 0 {
            errors.push("Shutdown timeout too short (minimum: 1s)".to_string());
        } else if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        errors
    }
}

/// Packet diagnostics configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct DiagnosticsConfig {
    /// Whether to append hex dumps of every buffer to a log file
    pub packet_log_enabled: bool,

    /// Path of the packet log (required when enabled)
    pub packet_log_path: Option<String>,
}

impl DiagnosticsConfig {
    fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.packet_log_enabled {
            if let Some(ref path) = self.packet_log_path {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Packet log directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push(
                    "packet_log_path must be specified when packet_log_enabled is true".to_string(),
                );
            }
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
