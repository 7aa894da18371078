//! Configuration file support for modemo.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (MODEMO_*)
//! 3. Local config file (./modemo.toml)
//! 4. Global config file (~/.config/modemo/config.toml)
//!
//! Files are only ever read.

use directories::ProjectDirs;
use log::{debug, warn};
use modemo::{
    detect::DetectConfig,
    probe::{ProbeConfig, ProbeMode},
    service::MODEM_MANAGER,
};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Local configuration file name.
pub const LOCAL_CONFIG: &str = "modemo.toml";

/// Preferred connection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PortSection {
    /// Serial port to use without detection (e.g., "/dev/ttyUSB2" or "COM3").
    pub name: Option<String>,
    /// Baud rate for that port and for `--port`.
    pub baud: Option<u32>,
}

/// Auto-detection tuning.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DetectSection {
    /// Ports never probed (full path or device name).
    #[serde(default)]
    pub skip_ports: Vec<String>,
    /// Rate tried first on every port.
    pub primary_baud: Option<u32>,
    /// Rates tried when nothing answers at the primary rate.
    pub fallback_bauds: Option<Vec<u32>>,
    /// Bound on a single quick probe.
    pub quick_timeout_ms: Option<u64>,
    /// Bound on a single full probe.
    pub full_timeout_ms: Option<u64>,
}

/// What to do about a running port-management service during detection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopPolicy {
    /// Prompt when interactive, leave it running otherwise.
    #[default]
    Ask,
    /// Stop it without asking.
    Always,
    /// Never touch it.
    Never,
}

/// Port-management service settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceSection {
    /// Unit name (default: ModemManager).
    pub name: Option<String>,
    /// Stop policy.
    pub stop_during_detect: Option<StopPolicy>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Port configuration.
    #[serde(default)]
    pub port: PortSection,
    /// Detection configuration.
    #[serde(default)]
    pub detect: DetectSection,
    /// Service configuration.
    #[serde(default)]
    pub service: ServiceSection,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG)) {
            debug!("Loaded local config from {LOCAL_CONFIG}");
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

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => Self::parse(&content, path),
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    fn parse(content: &str, path: &Path) -> Option<Self> {
        match toml::from_str(content) {
            Ok(config) => Some(config),
            Err(e) => {
                warn!("Failed to parse config file {} (invalid TOML): {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "modemo").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other.port.name.is_some() {
            self.port.name = other.port.name;
        }
        if other.port.baud.is_some() {
            self.port.baud = other.port.baud;
        }

        for port in other.detect.skip_ports {
            if !self.detect.skip_ports.contains(&port) {
                self.detect.skip_ports.push(port);
            }
        }
        if other.detect.primary_baud.is_some() {
            self.detect.primary_baud = other.detect.primary_baud;
        }
        if other.detect.fallback_bauds.is_some() {
            self.detect.fallback_bauds = other.detect.fallback_bauds;
        }
        if other.detect.quick_timeout_ms.is_some() {
            self.detect.quick_timeout_ms = other.detect.quick_timeout_ms;
        }
        if other.detect.full_timeout_ms.is_some() {
            self.detect.full_timeout_ms = other.detect.full_timeout_ms;
        }

        if other.service.name.is_some() {
            self.service.name = other.service.name;
        }
        if other.service.stop_during_detect.is_some() {
            self.service.stop_during_detect = other.service.stop_during_detect;
        }
    }

    /// Probe settings, with `extra_skip` appended to the configured deny-list.
    pub fn probe_config(&self, extra_skip: &[String]) -> ProbeConfig {
        let mut deny_list = self.detect.skip_ports.clone();
        for port in extra_skip {
            let port = port.trim();
            if !port.is_empty() && !deny_list.iter().any(|p| p == port) {
                deny_list.push(port.to_string());
            }
        }
        let mut probe = ProbeConfig {
            deny_list,
            ..ProbeConfig::default()
        };
        if let Some(ms) = self.detect.quick_timeout_ms {
            probe.quick.overall_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.detect.full_timeout_ms {
            probe.full.overall_timeout = Duration::from_millis(ms);
        }
        debug!(
            "{} bound {:.1}s, {} bound {:.1}s, {} port(s) skipped",
            ProbeMode::Quick,
            probe.quick.overall_timeout.as_secs_f64(),
            ProbeMode::Full,
            probe.full.overall_timeout.as_secs_f64(),
            probe.deny_list.len()
        );
        probe
    }

    /// Baud scan settings.
    pub fn detect_config(&self) -> DetectConfig {
        let mut detect = DetectConfig::default();
        if let Some(baud) = self.detect.primary_baud {
            detect.primary_baud = baud;
        }
        if let Some(bauds) = &self.detect.fallback_bauds {
            detect.fallback_bauds = bauds.clone();
        }
        detect
    }

    /// Name of the port-management service.
    pub fn service_name(&self) -> &str {
        self.service
            .name
            .as_deref()
            .unwrap_or(MODEM_MANAGER)
    }

    /// Stop policy during detection.
    pub fn stop_policy(&self) -> StopPolicy {
        self.service
            .stop_during_detect
            .unwrap_or_default()
    }
}
