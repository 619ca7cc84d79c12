//! Watcher configuration: the raw, user-facing lists and their validated,
//! platform-narrowed form.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::path::Path;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::capability::PlatformCapabilities;
use crate::metric::{LoadWindow, UtilizationType, Window};

/// Requested metrics as they appear in an agent config file.
///
/// Windows use the `avgN` form (`avg1`, `avg5`, ...); type names are
/// case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawConfig {
    #[serde(alias = "cpu_load_data_gathering_mode")]
    pub load_average_windows: Vec<String>,
    #[serde(alias = "cpu_utilisation_gathering_mode")]
    pub utilization_windows: Vec<String>,
    #[serde(alias = "cpu_utilisation_types")]
    pub utilization_types: Vec<String>,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self::defaults_for(std::env::consts::OS)
    }
}

impl RawConfig {
    /// Agent defaults for `os`. Windows has no load average and no iowait.
    pub fn defaults_for(os: &str) -> Self {
        if os == "windows" {
            Self {
                load_average_windows: Vec::new(),
                utilization_windows: strings(&["avg1"]),
                utilization_types: strings(&["user", "system", "idle"]),
            }
        } else {
            Self {
                load_average_windows: strings(&["avg1"]),
                utilization_windows: strings(&["avg1"]),
                utilization_types: strings(&["user", "system", "idle", "iowait"]),
            }
        }
    }

    /// Read a JSON config file. Missing keys fall back to the defaults.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Json {
            path: path.display().to_string(),
            source,
        })
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A requested metric that was dropped during configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    LoadAverageUnavailable { os: String },
    UnsupportedLoadWindow(u32),
    InvalidWindow(String),
    UnknownUtilizationType(String),
    UnsupportedUtilizationType { kind: UtilizationType, os: String },
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoadAverageUnavailable { os } => {
                write!(f, "load average metric unavailable on {os}")
            }
            Self::UnsupportedLoadWindow(m) => write!(
                f,
                "unsupported load average window avg{m}; supported values: avg1, avg5, avg15"
            ),
            Self::InvalidWindow(raw) => write!(f, "failed to parse window '{raw}'"),
            Self::UnknownUtilizationType(raw) => {
                write!(f, "unknown utilization metric '{raw}'")
            }
            Self::UnsupportedUtilizationType { kind, os } => {
                write!(f, "utilization metric '{kind}' not implemented on {os}")
            }
        }
    }
}

/// Validated, immutable watcher configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatcherConfig {
    load_average_windows: BTreeSet<LoadWindow>,
    utilization_windows: BTreeSet<Window>,
    utilization_types: BTreeSet<UtilizationType>,
}

impl WatcherConfig {
    /// Parse `raw` and drop everything `caps` cannot provide.
    ///
    /// Each dropped element produces one warning, which is logged and
    /// returned. An empty result is a valid configuration.
    pub fn configure(raw: &RawConfig, caps: &PlatformCapabilities) -> (Self, Vec<ConfigWarning>) {
        let mut config = Self::default();
        let mut warnings = Vec::new();

        if !raw.load_average_windows.is_empty() {
            if caps.load_average {
                for entry in dedup(&raw.load_average_windows) {
                    match entry.parse::<Window>() {
                        Ok(w) => match LoadWindow::from_minutes(w.as_minutes()) {
                            Some(lw) => {
                                config.load_average_windows.insert(lw);
                            }
                            None => {
                                warnings.push(ConfigWarning::UnsupportedLoadWindow(w.as_minutes()))
                            }
                        },
                        Err(_) => warnings.push(ConfigWarning::InvalidWindow(entry.to_string())),
                    }
                }
            } else {
                warnings.push(ConfigWarning::LoadAverageUnavailable {
                    os: caps.os.clone(),
                });
            }
        }

        for entry in dedup(&raw.utilization_windows) {
            match entry.parse::<Window>() {
                Ok(w) => {
                    config.utilization_windows.insert(w);
                }
                Err(_) => warnings.push(ConfigWarning::InvalidWindow(entry.to_string())),
            }
        }

        for name in dedup(&raw.utilization_types) {
            match name.parse::<UtilizationType>() {
                Ok(kind) if caps.supports(kind) => {
                    config.utilization_types.insert(kind);
                }
                Ok(kind) => warnings.push(ConfigWarning::UnsupportedUtilizationType {
                    kind,
                    os: caps.os.clone(),
                }),
                Err(_) => warnings.push(ConfigWarning::UnknownUtilizationType(name.to_string())),
            }
        }

        for warning in &warnings {
            warn!("[CPU] {warning}");
        }
        (config, warnings)
    }

    pub fn load_average_windows(&self) -> &BTreeSet<LoadWindow> {
        &self.load_average_windows
    }

    pub fn utilization_windows(&self) -> &BTreeSet<Window> {
        &self.utilization_windows
    }

    pub fn utilization_types(&self) -> &BTreeSet<UtilizationType> {
        &self.utilization_types
    }

    /// True when at least one type and one window are enabled, i.e. when
    /// sampling has anything to record.
    pub fn utilization_enabled(&self) -> bool {
        !self.utilization_windows.is_empty() && !self.utilization_types.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.load_average_windows.is_empty() && !self.utilization_enabled()
    }
}

/// Trimmed, case-folded entries in first-seen order, duplicates removed.
fn dedup(items: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .iter()
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| seen.insert(s.clone()))
        .collect()
}
