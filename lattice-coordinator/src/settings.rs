//! Settings for a coordinator run.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level settings loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorSettings {
    pub cluster: ClusterSettings,
    pub launch: LaunchSettings,
    /// One entry per render node.
    pub nodes: Vec<NodeSettings>,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSettings {
    /// Frames the cluster may run behind the coordinator.
    pub latency: u32,
    /// Frames to render before exiting.
    pub frames: u32,
    /// Upper bound for every blocking operation. 0 waits forever.
    pub barrier_timeout_ms: u64,
    pub init_id: u32,
}

/// How workers are started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaunchMode {
    /// Workers run as tasks inside the coordinator.
    Local,
    /// Each node's launch command starts a `lattice-worker` process.
    Process,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchSettings {
    pub mode: LaunchMode,
    /// What `%c` in a launch command runs.
    pub worker_command: String,
    /// Keep-alive interval on worker connections. 0 disables it.
    pub heartbeat_secs: u64,
    /// Simulated frame time of local workers.
    pub frame_cost_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSettings {
    /// Connection description text, e.g. `render1:4242`.
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            cluster: ClusterSettings::default(),
            launch: LaunchSettings::default(),
            nodes: vec![NodeSettings::default()],
            logging: LoggingSettings::default(),
        }
    }
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            latency: 1,
            frames: 100,
            barrier_timeout_ms: 0,
            init_id: 1,
        }
    }
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            mode: LaunchMode::Local,
            worker_command: "lattice-worker".into(),
            heartbeat_secs: 5,
            frame_cost_ms: 16,
        }
    }
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            description: "localhost:4242".into(),
        }
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

impl CoordinatorSettings {
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

    pub fn barrier_timeout(&self) -> Option<Duration> {
        (self.cluster.barrier_timeout_ms > 0)
            .then(|| Duration::from_millis(self.cluster.barrier_timeout_ms))
    }

    pub fn heartbeat(&self) -> Option<Duration> {
        (self.launch.heartbeat_secs > 0).then(|| Duration::from_secs(self.launch.heartbeat_secs))
    }

    pub fn frame_cost(&self) -> Duration {
        Duration::from_millis(self.launch.frame_cost_ms)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_toml() {
        let text = toml::to_string_pretty(&CoordinatorSettings::default()).unwrap();
        assert!(text.contains("[[nodes]]"));
        let parsed: CoordinatorSettings = toml::from_str(&text).unwrap();
        assert_eq!(parsed.cluster.latency, 1);
        assert_eq!(parsed.launch.mode, LaunchMode::Local);
        assert_eq!(parsed.nodes.len(), 1);
    }

    #[test]
    fn node_list_and_mode_parse() {
        let text = r#"
            [cluster]
            frames = 12
            barrier_timeout_ms = 2500

            [launch]
            mode = "process"

            [[nodes]]
            description = "render1:4242"

            [[nodes]]
            description = "render2:4242"
        "#;
        let parsed: CoordinatorSettings = toml::from_str(text).unwrap();
        assert_eq!(parsed.cluster.frames, 12);
        assert_eq!(parsed.cluster.latency, 1);
        assert_eq!(parsed.barrier_timeout(), Some(Duration::from_millis(2500)));
        assert_eq!(parsed.launch.mode, LaunchMode::Process);
        assert_eq!(parsed.launch.worker_command, "lattice-worker");
        assert_eq!(parsed.nodes[1].description, "render2:4242");
    }

    #[test]
    fn unreadable_settings_are_reported_not_logged() {
        let path = std::env::temp_dir().join(format!("lattice-{}.toml", std::process::id()));
        std::fs::write(&path, "[cluster]\nframes = -3\n").unwrap();
        let (settings, source) = CoordinatorSettings::load(&path);
        std::fs::remove_file(&path).unwrap();
        assert_eq!(settings.cluster.frames, 100);
        assert!(matches!(source, SettingsSource::Invalid(_)));

        let (_, source) = CoordinatorSettings::load(Path::new("/nonexistent/lattice.toml"));
        assert_eq!(source, SettingsSource::Missing);
    }

    #[test]
    fn zero_timeout_waits_forever() {
        assert_eq!(CoordinatorSettings::default().barrier_timeout(), None);
    }
}
