//! Settings for the worker process.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level settings loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub network: NetworkSettings,
    pub render: RenderSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    /// Address to accept coordinators on.
    pub listen_address: String,
    pub listen_port: u16,
    /// Interval between keep-alives to the coordinator. 0 disables them.
    pub heartbeat_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    /// Simulated time spent drawing each frame.
    pub frame_cost_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0".into(),
            listen_port: 4242,
            heartbeat_secs: 5,
        }
    }
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self { frame_cost_ms: 16 }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

/// Where loaded settings came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsSource {
    File,
    /// No file at the path; defaults are used.
    Missing,
    /// The file did not parse; defaults are used.
    Invalid(String),
}

impl SettingsSource {
    pub fn log(&self, path: &Path) {
        match self {
            Self::File => tracing::info!("settings loaded from {}", path.display()),
            Self::Missing => tracing::info!("no settings at {}; using defaults", path.display()),
            Self::Invalid(e) => {
                tracing::warn!("invalid settings {}: {e}; using defaults", path.display())
            }
        }
    }
}

impl WorkerSettings {
    /// Load settings from a TOML file, falling back to defaults.
    ///
    /// Nothing is logged here; the returned [`SettingsSource`] says where
    /// the settings came from so it can be reported once logging is up.
    pub fn load(path: &Path) -> (Self, SettingsSource) {
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(settings) => (settings, SettingsSource::File),
                Err(e) => (Self::default(), SettingsSource::Invalid(e.to_string())),
            },
            Err(_) => (Self::default(), SettingsSource::Missing),
        }
    }

    /// Write the default settings to a file.
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    pub fn listen_address(&self) -> String {
        format!(
            "{}:{}",
            self.network.listen_address, self.network.listen_port
        )
    }

    pub fn heartbeat(&self) -> Option<Duration> {
        (self.network.heartbeat_secs > 0).then(|| Duration::from_secs(self.network.heartbeat_secs))
    }

    pub fn frame_cost(&self) -> Duration {
        Duration::from_millis(self.render.frame_cost_ms)
    }
}

// ── Tests ────────────────────────────────────────────────────────
