// Copyright (c) 2026 pkgbroker contributors
// SPDX-License-Identifier: AGPL-3.0
//! Daemon configuration
//!
//! YAML file, discovered in this order:
//! 1. explicit `--config` path (must exist and parse)
//! 2. `PKGBROKER_CONFIG_PATH`
//! 3. `./pkgbroker.yaml`
//! 4. `/etc/pkgbroker/config.yaml`
//!
//! Missing file means defaults. Environment overrides are applied last.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::watchdog::WatchdogPolicy;

pub const DEFAULT_SOCKET_PATH: &str = "/run/pkgbroker/bus.sock";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub bus: BusConfig,

    #[serde(default)]
    pub watchdog: WatchdogConfig,

    #[serde(default)]
    pub authorization: AuthorizationConfig,

    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observability: Option<ObservabilityConfig>,

    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Permission bits applied to the socket file after binding.
    #[serde(default = "default_socket_mode")]
    pub socket_mode: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_tick_interval", with = "humantime_serde")]
    pub tick_interval: Duration,

    /// Ticks tolerated with nobody holding the lock.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,

    /// Ticks tolerated with the lock held but no calls coming in.
    #[serde(default = "default_locked_timeout")]
    pub locked_timeout: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthorizationConfig {
    #[serde(default = "default_true")]
    pub allow_root: bool,

    #[serde(default)]
    pub allowed_uids: Vec<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendConfig {
    /// YAML catalog for the in-memory engine. Empty catalog when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_health_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Prometheus exporter port; no exporter when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_port: Option<u16>,
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_socket_path() -> PathBuf {
    PathBuf::from(DEFAULT_SOCKET_PATH)
}

fn default_socket_mode() -> u32 {
    0o666
}

fn default_tick_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_idle_timeout() -> u64 {
    20
}

fn default_locked_timeout() -> u64 {
    600
}

fn default_health_port() -> u16 {
    8090
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            socket_mode: default_socket_mode(),
        }
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval: default_tick_interval(),
            idle_timeout: default_idle_timeout(),
            locked_timeout: default_locked_timeout(),
        }
    }
}

impl WatchdogConfig {
    pub fn policy(&self) -> WatchdogPolicy {
        WatchdogPolicy {
            idle_timeout: self.idle_timeout,
            locked_timeout: self.locked_timeout,
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bus: BusConfig::default(),
            watchdog: WatchdogConfig::default(),
            authorization: AuthorizationConfig {
                allow_root: true,
                allowed_uids: Vec::new(),
            },
            backend: BackendConfig::default(),
            health: None,
            observability: None,
            log_level: default_log_level(),
        }
    }
}

impl DaemonConfig {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    pub fn to_yaml_string(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("PKGBROKER_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./pkgbroker.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        let system_config = PathBuf::from("/etc/pkgbroker/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        let mut config = if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            Self::from_yaml_file(config_path)?
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("PKGBROKER_SOCKET_PATH") {
            tracing::info!("Environment override: PKGBROKER_SOCKET_PATH={}", val);
            self.bus.socket_path = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("PKGBROKER_LOG_LEVEL") {
            tracing::info!("Environment override: PKGBROKER_LOG_LEVEL={}", val);
            self.log_level = val;
        }

        if let Ok(val) = std::env::var("PKGBROKER_WATCHDOG") {
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => self.watchdog.enabled = true,
                "false" | "0" | "no" | "off" => self.watchdog.enabled = false,
                _ => {
                    tracing::warn!(
                        "Invalid value for PKGBROKER_WATCHDOG: '{}'. Expected true/false. Ignoring.",
                        val
                    );
                }
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bus.socket_path.as_os_str().is_empty() {
            anyhow::bail!("bus.socket_path cannot be empty");
        }

        if self.bus.socket_mode > 0o777 {
            anyhow::bail!("bus.socket_mode {:o} is not a permission mode", self.bus.socket_mode);
        }

        if self.watchdog.tick_interval.is_zero() {
            anyhow::bail!("watchdog.tick_interval must be greater than zero");
        }

        if self.watchdog.idle_timeout == 0 || self.watchdog.locked_timeout == 0 {
            anyhow::bail!("watchdog timeouts must be greater than zero");
        }

        if self.watchdog.locked_timeout < self.watchdog.idle_timeout {
            anyhow::bail!(
                "watchdog.locked_timeout ({}) must not be smaller than watchdog.idle_timeout ({})",
                self.watchdog.locked_timeout,
                self.watchdog.idle_timeout
            );
        }

        if !self.authorization.allow_root && self.authorization.allowed_uids.is_empty() {
            tracing::warn!("authorization grants nobody; every privileged call will be denied");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DaemonConfig::default();
        assert!(config.watchdog.enabled);
        assert_eq!(config.watchdog.tick_interval, Duration::from_secs(1));
        assert_eq!(config.watchdog.policy(), WatchdogPolicy::default());
        assert_eq!(config.bus.socket_path, PathBuf::from(DEFAULT_SOCKET_PATH));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = r#"
bus:
  socket_path: /tmp/pkgbroker-test.sock
watchdog:
  tick_interval: 250ms
  idle_timeout: 5
authorization:
  allow_root: false
  allowed_uids: [1000]
health:
  port: 9100
"#;
        let config = DaemonConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.bus.socket_path, PathBuf::from("/tmp/pkgbroker-test.sock"));
        assert_eq!(config.bus.socket_mode, 0o666);
        assert_eq!(config.watchdog.tick_interval, Duration::from_millis(250));
        assert_eq!(config.watchdog.idle_timeout, 5);
        assert_eq!(config.watchdog.locked_timeout, 600);
        assert_eq!(config.authorization.allowed_uids, vec![1000]);
        assert_eq!(config.health.unwrap().port, 9100);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let mut config = DaemonConfig::default();
        config.watchdog.locked_timeout = 900;
        std::fs::write(&path, config.to_yaml_string().unwrap()).unwrap();

        let loaded = DaemonConfig::from_yaml_file(&path).unwrap();
        assert_eq!(loaded.watchdog.locked_timeout, 900);
    }

    #[test]
    fn test_validation() {
        let mut config = DaemonConfig::default();

        config.watchdog.idle_timeout = 0;
        assert!(config.validate().is_err());
        config.watchdog.idle_timeout = 20;

        config.watchdog.locked_timeout = 10;
        assert!(config.validate().is_err());
        config.watchdog.locked_timeout = 600;

        config.watchdog.tick_interval = Duration::ZERO;
        assert!(config.validate().is_err());
        config.watchdog.tick_interval = Duration::from_secs(1);

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_explicit_missing_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.yaml");
        assert!(DaemonConfig::load_or_default(Some(missing)).is_err());
    }
}
