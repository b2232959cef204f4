// Configuration load/save

use crate::backends::shaping::ifb_redirect::DEFAULT_REDIRECT_DEVICE;
use crate::backends::shaping::manager::DEFAULT_MARK_LOSS_PERCENT;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_DIR: &str = "netshaper";
const CONFIG_FILE: &str = "config.json";

/// Interfaces tried first during auto-detection, in order
pub const DEFAULT_PREFERRED_INTERFACES: [&str; 4] = ["eth0", "usb0", "tether0", "wlan0"];

/// Configuration file structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Interface to shape; auto-detected when unset
    #[serde(default)]
    pub interface: Option<String>,

    /// Names preferred by auto-detection
    #[serde(default = "default_preferred_interfaces")]
    pub preferred_interfaces: Vec<String>,

    /// IFB device used for ingress shaping
    #[serde(default = "default_redirect_device")]
    pub redirect_device: String,

    /// Kill any tc/ip/iptables call running longer than this
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    /// Loss applied to marked flows when a request does not give one
    #[serde(default = "default_mark_loss_percent")]
    pub mark_loss_percent: u8,

    /// Tear down any existing shaping on startup
    #[serde(default)]
    pub reset_on_start: bool,
}

fn default_preferred_interfaces() -> Vec<String> {
    DEFAULT_PREFERRED_INTERFACES
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_redirect_device() -> String {
    DEFAULT_REDIRECT_DEVICE.to_string()
}

fn default_command_timeout_secs() -> u64 {
    10
}

fn default_mark_loss_percent() -> u8 {
    DEFAULT_MARK_LOSS_PERCENT
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interface: None,
            preferred_interfaces: default_preferred_interfaces(),
            redirect_device: default_redirect_device(),
            command_timeout_secs: default_command_timeout_secs(),
            mark_loss_percent: default_mark_loss_percent(),
            reset_on_start: false,
        }
    }
}

impl Config {
    /// Get the config file path
    pub fn config_path() -> Result<PathBuf> {
        let base = dirs::config_dir().ok_or_else(|| anyhow!("No config directory for this user"))?;
        Ok(base.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from `path`, using defaults when it does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("Config file {:?} not found, using defaults", path);
            return Ok(Config::default());
        }

        let contents =
            fs::read_to_string(path).context(format!("Failed to read config file: {:?}", path))?;

        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config file")?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::config_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .context(format!("Failed to create config directory: {:?}", dir))?;
        }

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, contents).context(format!("Failed to write config file: {:?}", path))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }
}
