//! Configuration file support for pixerlink.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (PIXERLINK_*)
//! 3. Local config file (./pixerlink.toml)
//! 4. Global config file (~/.config/pixerlink/config.toml)

use directories::ProjectDirs;
use log::{debug, warn};
use pixerlink::upgrade::BATTERY_THRESHOLD;
use pixerlink::{TcpConfig, UpgradeThresholds};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the per-directory config file.
pub const LOCAL_CONFIG_FILE: &str = "pixerlink.toml";

/// Default BLE firmware file.
pub const DEFAULT_BLE_BIN: &str = "ble.bin";

/// Default ITE firmware file.
pub const DEFAULT_ITE_BIN: &str = "ite.bin";

/// Default main board firmware file.
pub const DEFAULT_BSP_BIN: &str = "pixer.bin";

/// Device connection settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device host name or IP address.
    pub host: Option<String>,
    /// Device TCP port.
    pub port: Option<u16>,
    /// Connection attempts before giving up.
    pub attempts: Option<usize>,
    /// Per-attempt connect timeout in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Delay between attempts in milliseconds.
    pub retry_delay_ms: Option<u64>,
}

/// Upgrade thresholds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpgradeConfig {
    /// Minimum BLE version number.
    pub ble_version: Option<u32>,
    /// Minimum ITE version number.
    pub ite_version: Option<u32>,
    /// Minimum board version number.
    pub bsp_version: Option<u32>,
    /// Battery percentage that must be exceeded; values below 15 are ignored.
    pub battery_threshold: Option<u32>,
}

/// Firmware binary locations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FirmwareConfig {
    /// BLE image.
    pub ble: Option<PathBuf>,
    /// ITE image.
    pub ite: Option<PathBuf>,
    /// Main board image.
    pub bsp: Option<PathBuf>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Device settings.
    #[serde(default)]
    pub device: DeviceConfig,
    /// Upgrade thresholds.
    #[serde(default)]
    pub upgrade: UpgradeConfig,
    /// Firmware files.
    #[serde(default)]
    pub firmware: FirmwareConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "pixerlink").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one. Set values in `other` win.
    fn merge(&mut self, other: Self) {
        let Self {
            device,
            upgrade,
            firmware,
        } = other;

        merge_opt(&mut self.device.host, device.host);
        merge_opt(&mut self.device.port, device.port);
        merge_opt(&mut self.device.attempts, device.attempts);
        merge_opt(&mut self.device.timeout_ms, device.timeout_ms);
        merge_opt(&mut self.device.retry_delay_ms, device.retry_delay_ms);

        merge_opt(&mut self.upgrade.ble_version, upgrade.ble_version);
        merge_opt(&mut self.upgrade.ite_version, upgrade.ite_version);
        merge_opt(&mut self.upgrade.bsp_version, upgrade.bsp_version);
        merge_opt(&mut self.upgrade.battery_threshold, upgrade.battery_threshold);

        merge_opt(&mut self.firmware.ble, firmware.ble);
        merge_opt(&mut self.firmware.ite, firmware.ite);
        merge_opt(&mut self.firmware.bsp, firmware.bsp);
    }

    /// Connection settings, with CLI/env values taking precedence.
    pub fn tcp_config(&self, host: Option<&str>, port: Option<u16>) -> TcpConfig {
        let mut tcp = TcpConfig::default();
        if let Some(host) = host.map(str::to_string).or_else(|| self.device.host.clone()) {
            tcp.host = host;
        }
        if let Some(port) = port.or(self.device.port) {
            tcp.port = port;
        }
        if let Some(attempts) = self.device.attempts {
            tcp.connect_attempts = attempts.max(1);
        }
        if let Some(ms) = self.device.timeout_ms {
            tcp.timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.device.retry_delay_ms {
            tcp.retry_delay = Duration::from_millis(ms);
        }
        tcp
    }

    /// Upgrade thresholds, falling back to the built-in defaults.
    ///
    /// The battery threshold can be raised but never set below
    /// [`BATTERY_THRESHOLD`].
    pub fn thresholds(&self) -> UpgradeThresholds {
        let defaults = UpgradeThresholds::default();
        let battery = match self.upgrade.battery_threshold {
            Some(level) if level < BATTERY_THRESHOLD => {
                warn!(
                    "Ignoring battery_threshold {level}%, it cannot be lower than {BATTERY_THRESHOLD}%"
                );
                BATTERY_THRESHOLD
            },
            Some(level) => level,
            None => defaults.battery,
        };
        UpgradeThresholds {
            ble: self.upgrade.ble_version.unwrap_or(defaults.ble),
            ite: self.upgrade.ite_version.unwrap_or(defaults.ite),
            bsp: self.upgrade.bsp_version.unwrap_or(defaults.bsp),
            battery,
        }
    }
}

fn merge_opt<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.device.host.is_none());
        assert!(config.device.port.is_none());
        assert!(config.upgrade.ble_version.is_none());
        assert!(config.firmware.bsp.is_none());
    }

    #[test]
    fn test_default_tcp_config() {
        let tcp = Config::default().tcp_config(None, None);
        assert_eq!(tcp.address(), "192.168.1.1:6000");
        assert_eq!(tcp.connect_attempts, 10);
    }

    #[test]
    fn test_cli_values_override_file() {
        let mut config = Config::default();
        config.device.host = Some("10.0.0.2".to_string());
        config.device.port = Some(7000);

        assert_eq!(config.tcp_config(None, None).address(), "10.0.0.2:7000");
        assert_eq!(
            config.tcp_config(Some("10.0.0.9"), None).address(),
            "10.0.0.9:7000"
        );
        assert_eq!(
            config.tcp_config(None, Some(6001)).address(),
            "10.0.0.2:6001"
        );
    }

    #[test]
    fn test_retry_settings() {
        let mut config = Config::default();
        config.device.attempts = Some(0);
        config.device.timeout_ms = Some(250);
        config.device.retry_delay_ms = Some(10);

        let tcp = config.tcp_config(None, None);
        assert_eq!(tcp.connect_attempts, 1);
        assert_eq!(tcp.timeout, Duration::from_millis(250));
        assert_eq!(tcp.retry_delay, Duration::from_millis(10));
    }

    #[test]
    fn test_default_thresholds() {
        let thresholds = Config::default().thresholds();
        assert_eq!(thresholds.ble, 14);
        assert_eq!(thresholds.ite, 35);
        assert_eq!(thresholds.bsp, 1702061);
        assert_eq!(thresholds.battery, 15);
    }

    #[test]
    fn test_battery_threshold_cannot_drop_below_floor() {
        let mut config = Config::default();

        config.upgrade.battery_threshold = Some(0);
        assert_eq!(config.thresholds().battery, 15);

        config.upgrade.battery_threshold = Some(14);
        assert_eq!(config.thresholds().battery, 15);

        config.upgrade.battery_threshold = Some(15);
        assert_eq!(config.thresholds().battery, 15);

        config.upgrade.battery_threshold = Some(40);
        assert_eq!(config.thresholds().battery, 40);
    }

    #[test]
    fn test_config_merge_overrides() {
        let mut base = Config::default();
        base.device.host = Some("192.168.4.1".to_string());
        base.upgrade.ble_version = Some(12);

        let mut other = Config::default();
        other.upgrade.ble_version = Some(15);
        other.firmware.ble = Some(PathBuf::from("fw/ble.bin"));

        base.merge(other);

        assert_eq!(base.device.host.as_deref(), Some("192.168.4.1"));
        assert_eq!(base.upgrade.ble_version, Some(15));
        assert_eq!(base.firmware.ble, Some(PathBuf::from("fw/ble.bin")));
    }

    #[test]
    fn test_config_merge_does_not_overwrite_with_none() {
        let mut base = Config::default();
        base.device.port = Some(6001);
        base.upgrade.battery_threshold = Some(20);

        base.merge(Config::default());

        assert_eq!(base.device.port, Some(6001));
        assert_eq!(base.upgrade.battery_threshold, Some(20));
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
[device]
host = "192.168.1.50"
port = 6000
attempts = 3

[upgrade]
ble_version = 14
ite_version = 35
bsp_version = 1702061

[firmware]
ble = "ble.bin"
ite = "ite.bin"
bsp = "pixer.bin"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.device.host.as_deref(), Some("192.168.1.50"));
        assert_eq!(config.device.attempts, Some(3));
        assert_eq!(config.upgrade.bsp_version, Some(1702061));
        assert_eq!(config.firmware.bsp, Some(PathBuf::from("pixer.bin")));
    }

    #[test]
    fn test_config_from_empty_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.device.host.is_none());
        assert!(config.firmware.ble.is_none());
    }

    #[test]
    fn test_config_roundtrip_toml() {
        let mut config = Config::default();
        config.device.host = Some("pixer.local".to_string());
        config.upgrade.ite_version = Some(36);

        let serialized = toml::to_string_pretty(&config).unwrap();
        let deserialized: Config = toml::from_str(&serialized).unwrap();

        assert_eq!(deserialized.device.host.as_deref(), Some("pixer.local"));
        assert_eq!(deserialized.upgrade.ite_version, Some(36));
    }

    #[test]
    fn test_load_from_path_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        fs::write(
            &path,
            r#"
[device]
host = "10.1.1.1"
[upgrade]
battery_threshold = 30
"#,
        )
        .unwrap();

        let config = Config::load_from_path(&path);
        assert_eq!(config.device.host.as_deref(), Some("10.1.1.1"));
        assert_eq!(config.thresholds().battery, 30);
    }

    #[test]
    fn test_load_from_path_invalid_toml_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "invalid toml [[[").unwrap();

        let config = Config::load_from_path(&path);
        assert!(config.device.host.is_none());
    }

    #[test]
    fn test_load_from_path_nonexistent() {
        let config = Config::load_from_path(Path::new("/nonexistent/path/config.toml"));
        assert!(config.device.host.is_none());
    }

    #[test]
    fn test_global_config_path() {
        if let Some(p) = Config::global_config_path() {
            let s = p.to_string_lossy();
            assert!(s.contains("pixerlink"));
            assert!(s.ends_with("config.toml"));
        }
    }
}
