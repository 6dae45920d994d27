//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Global daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Default recording settings.
    pub recording: RecordingDefaults,

    /// Administrative lockdown policy.
    pub lockdown: LockdownConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Default recording parameters, overridable per request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingDefaults {
    /// Default frame rate.
    pub framerate: u32,

    /// Whether the cursor is embedded in the capture by default.
    pub draw_cursor: bool,
}

/// Administrative lockdown policy.
///
/// Checked at every start request rather than once at startup, so a policy
/// change takes effect without restarting the daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LockdownConfig {
    /// Refuse any recording that would write to disk.
    pub disable_save_to_disk: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "castd=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,
}

impl Default for RecordingDefaults {
    fn default() -> Self {
        Self {
            framerate: 30,
            draw_cursor: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }
}

/// Standard config file location.
fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("castd").join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_recording_contract() {
        let config = AppConfig::default();
        assert_eq!(config.recording.framerate, 30);
        assert!(config.recording.draw_cursor);
        assert!(!config.lockdown.disable_save_to_disk);
    }

    #[test]
    fn partial_config_fills_missing_fields() {
        let config: AppConfig =
            serde_json::from_str(r#"{"lockdown": {"disable_save_to_disk": true}}"#).unwrap();
        assert!(config.lockdown.disable_save_to_disk);
        assert_eq!(config.recording.framerate, 30);
    }
}
