//! Configuration management

use crate::usb::{DEFAULT_POLL_INTERVAL, SessionOptions};
use anyhow::{Context, Result, anyhow};
use common::{HotplugFilter, VidPidSet, parse_hex_id};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralSettings,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub hotplug: HotplugSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralSettings {
    #[serde(default = "GeneralSettings::default_log_level")]
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

impl GeneralSettings {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

/// Which devices to open and how to prepare them for transfers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Devices to open, as "0xVVVV:0xPPPP"
    #[serde(default)]
    pub devices: Vec<String>,
    /// Configuration value to activate after opening
    #[serde(default)]
    pub configuration: Option<u8>,
    /// Interface to claim before transfers
    #[serde(default)]
    pub interface: Option<u8>,
    /// Hand interfaces back to the kernel driver on release
    #[serde(default)]
    pub reattach_kernel_driver: bool,
    /// Bulk transfer timeout in milliseconds (0 = wait forever)
    #[serde(default = "SessionSettings::default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            devices: Vec::new(),
            configuration: None,
            interface: None,
            reattach_kernel_driver: false,
            timeout_ms: Self::default_timeout_ms(),
        }
    }
}

impl SessionSettings {
    fn default_timeout_ms() -> u64 {
        1000
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Hotplug callback filter; absent fields match any device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotplugSettings {
    #[serde(default)]
    pub device_class: Option<String>,
    #[serde(default)]
    pub vendor_id: Option<String>,
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default = "HotplugSettings::default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for HotplugSettings {
    fn default() -> Self {
        Self {
            device_class: None,
            vendor_id: None,
            product_id: None,
            poll_interval_ms: Self::default_poll_interval_ms(),
        }
    }
}

impl HotplugSettings {
    fn default_poll_interval_ms() -> u64 {
        DEFAULT_POLL_INTERVAL.as_millis() as u64
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn filter(&self) -> Result<HotplugFilter> {
        let device_class = self
            .device_class
            .as_deref()
            .map(parse_class)
            .transpose()?;
        let vendor_id = self
            .vendor_id
            .as_deref()
            .map(|id| parse_id(id, "vendor_id"))
            .transpose()?;
        let product_id = self
            .product_id
            .as_deref()
            .map(|id| parse_id(id, "product_id"))
            .transpose()?;

        Ok(HotplugFilter {
            device_class,
            vendor_id,
            product_id,
        })
    }
}

fn parse_id(id: &str, name: &str) -> Result<u16> {
    parse_hex_id(id).ok_or_else(|| anyhow!("Invalid {} '{}', expected a hex id", name, id))
}

fn parse_class(class: &str) -> Result<u8> {
    let value = parse_id(class, "device_class")?;
    u8::try_from(value).map_err(|_| anyhow!("Invalid device_class '{}', must fit in a byte", class))
}

impl Config {
    /// Candidate files, most specific first
    fn search_paths() -> [PathBuf; 2] {
        [
            Self::default_path(),
            PathBuf::from("/etc/usbcomm/usbcomm.toml"),
        ]
    }

    /// Load configuration from `path`, or from the first existing file in
    /// the search paths
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(path) => path,
            None => Self::search_paths()
                .into_iter()
                .find(|candidate| candidate.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?,
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", config_path.display()))?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("usbcomm").join("usbcomm.toml")
        } else {
            PathBuf::from(".config/usbcomm/usbcomm.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
        if !LOG_LEVELS.contains(&self.general.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.general.log_level,
                LOG_LEVELS.join(", ")
            ));
        }

        for device in &self.session.devices {
            Self::validate_filter(device)?;
        }

        let hotplug = &self.hotplug;
        if let Some(class) = &hotplug.device_class {
            Self::validate_hex_id(class, "device_class")?;
            parse_class(class)?;
        }
        if let Some(id) = &hotplug.vendor_id {
            Self::validate_hex_id(id, "vendor_id")?;
        }
        if let Some(id) = &hotplug.product_id {
            Self::validate_hex_id(id, "product_id")?;
        }
        if hotplug.poll_interval_ms == 0 {
            return Err(anyhow!("hotplug.poll_interval_ms must be greater than 0"));
        }

        Ok(())
    }

    /// Validate a device entry (`0xVVVV:0xPPPP`)
    fn validate_filter(device: &str) -> Result<()> {
        let (vid, pid) = device.split_once(':').ok_or_else(|| {
            anyhow!(
                "Invalid device '{}', expected VID:PID (e.g., '0x04b4:0x00f1')",
                device
            )
        })?;

        Self::validate_hex_id(vid, "VID")?;
        Self::validate_hex_id(pid, "PID")
    }

    /// Ids must be written as `0x` followed by 1-4 hex digits
    fn validate_hex_id(id: &str, name: &str) -> Result<()> {
        let has_prefix = id.starts_with("0x") || id.starts_with("0X");
        if !has_prefix || parse_hex_id(id).is_none() {
            return Err(anyhow!(
                "Invalid {} '{}', expected 0x followed by 1-4 hex digits (e.g., '0x1234')",
                name,
                id
            ));
        }
        Ok(())
    }

    /// Devices to open as a vendor/product set
    pub fn device_set(&self) -> Result<VidPidSet> {
        self.session
            .devices
            .iter()
            .map(|device| {
                VidPidSet::parse_pair(device)
                    .ok_or_else(|| anyhow!("Invalid device '{}', expected VID:PID", device))
            })
            .collect()
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            reattach_kernel_driver: self.session.reattach_kernel_driver,
        }
    }
}

/// Load configuration from a path that may start with `~`
pub fn load_config(path: &str) -> Result<Config> {
    let path_buf = PathBuf::from(shellexpand::tilde(path).as_ref());
    Config::load(Some(path_buf))
}
