use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_true")]
    pub show_file_line: bool,
    #[serde(default = "default_true")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_true(),
            // Transport callbacks arrive on arbitrary threads.
            show_thread_ids: default_true(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "face_tracker_link".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Link configuration. Read-only: this crate never writes it back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkSettings {
    /// Discovery duration, 0 = platform default.
    #[serde(default = "default_scan_timeout_ms")]
    pub scan_timeout_ms: u32,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Upper bound on a connect attempt, 0 disables the deadline.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Peer to connect to on startup, see `keepalive::start`.
    #[serde(default)]
    pub auto_connect_address: Option<String>,
    #[serde(default)]
    pub log_settings: LogSettings,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            scan_timeout_ms: default_scan_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            auto_connect_address: None,
            log_settings: LogSettings::default(),
        }
    }
}

fn default_scan_timeout_ms() -> u32 {
    10_000
}
fn default_heartbeat_interval_ms() -> u64 {
    1_000
}
fn default_connect_timeout_ms() -> u64 {
    15_000
}

impl LinkSettings {
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn default_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("FaceTrackerLink");
        path.push("link.json");
        Ok(path)
    }

    /// Loads from [`Self::default_path`], falling back to defaults.
    pub fn load_or_default() -> Self {
        let loaded = Self::default_path().and_then(|path| {
            if path.exists() {
                Self::load_from_file(&path).map(Some)
            } else {
                Ok(None)
            }
        });

        match loaded {
            Ok(Some(settings)) => settings,
            Ok(None) => Self::default(),
            Err(e) => {
                warn!("Failed to load link settings, using defaults: {}", e);
                Self::default()
            }
        }
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.scan_timeout_ms))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.connect_timeout_ms > 0).then(|| Duration::from_millis(self.connect_timeout_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_json_uses_defaults() {
        let settings = LinkSettings::from_json_str("{}").unwrap();
        assert_eq!(settings, LinkSettings::default());
        assert_eq!(settings.scan_timeout(), Duration::from_secs(10));
        assert_eq!(settings.connect_timeout(), Some(Duration::from_secs(15)));
    }

    #[test]
    fn test_partial_json_overrides() {
        let settings = LinkSettings::from_json_str(
            r#"{"scan_timeout_ms": 0, "connect_timeout_ms": 0,
                "auto_connect_address": "24:0A:C4:12:34:56",
                "log_settings": {"level": "debug"}}"#,
        )
        .unwrap();
        assert_eq!(settings.scan_timeout_ms, 0);
        assert_eq!(settings.connect_timeout(), None);
        assert_eq!(
            settings.auto_connect_address.as_deref(),
            Some("24:0A:C4:12:34:56")
        );
        assert_eq!(settings.log_settings.level, "debug");
        assert_eq!(settings.log_settings.rotation, "daily");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"heartbeat_interval_ms": 250}}"#).unwrap();

        let settings = LinkSettings::load_from_file(file.path()).unwrap();
        assert_eq!(settings.heartbeat_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(LinkSettings::load_from_file(file.path()).is_err());
    }
}
