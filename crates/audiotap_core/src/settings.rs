//! Persistent Settings Management
//!
//! # Storage Locations
//! - Linux: `~/.config/audiotap/settings.json`
//! - Windows: `%APPDATA%\audiotap\audiotap\config\settings.json`
//! - macOS: `~/Library/Application Support/com.audiotap.audiotap/settings.json`

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::config::TapConfig;
use crate::error::{TapError, TapResult};

/// Root settings structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TapSettings {
    pub config: TapConfig,
    /// Endpoint name to capture from when none is given
    pub preferred_endpoint: Option<String>,
    /// Last session volume per process name (0.0-1.0)
    pub app_volumes: HashMap<String, f32>,
    /// Processes left out of session listings
    pub hidden_apps: HashSet<String>,
    pub saved_at: Option<DateTime<Utc>>,
}

impl TapSettings {
    /// Load settings from disk, or return default if missing/corrupt
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => {
                info!("No config directory; using default settings");
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            info!("Using default settings");
            return Self::default();
        }

        match fs::File::open(path) {
            Ok(file) => match serde_json::from_reader(file) {
                Ok(settings) => {
                    info!("Settings loaded from {:?}", path);
                    settings
                }
                Err(e) => {
                    error!("Failed to parse settings file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                error!("Failed to open settings file: {}", e);
                Self::default()
            }
        }
    }

    /// Save settings to the platform config directory
    pub fn save(&mut self) -> TapResult<PathBuf> {
        let path = Self::config_path()
            .ok_or_else(|| TapError::ConfigError("Could not determine config path".into()))?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&mut self, path: &Path) -> TapResult<()> {
        self.config.validate().map_err(TapError::ConfigError)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        self.saved_at = Some(Utc::now());
        let file = fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;

        info!("Settings saved to {:?}", path);
        Ok(())
    }

    /// Remembered volume for a process, if any
    pub fn app_volume(&self, process_name: &str) -> Option<f32> {
        self.app_volumes.get(process_name).copied()
    }

    pub fn remember_app_volume(&mut self, process_name: &str, volume: f32) {
        self.app_volumes
            .insert(process_name.to_string(), volume.clamp(0.0, 1.0));
    }

    pub fn is_hidden(&self, process_name: &str) -> bool {
        self.hidden_apps.contains(process_name)
    }

    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "audiotap", "audiotap")
            .map(|proj| proj.config_dir().join("settings.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("audiotap-settings-{}-{}", std::process::id(), name))
            .join("settings.json")
    }

    #[test]
    fn test_default_settings() {
        let settings = TapSettings::default();
        assert!(settings.preferred_endpoint.is_none());
        assert!(settings.app_volumes.is_empty());
        assert!(settings.hidden_apps.is_empty());
        assert!(settings.saved_at.is_none());
        assert_eq!(settings.config, TapConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let path = temp_path("roundtrip");
        let mut settings = TapSettings::default();
        settings.preferred_endpoint = Some("Speakers".into());
        settings.remember_app_volume("firefox", 0.4);
        settings.hidden_apps.insert("svchost".into());

        settings.save_to(&path).unwrap();
        assert!(settings.saved_at.is_some());

        let loaded = TapSettings::load_from(&path);
        assert_eq!(loaded, settings);
        assert_eq!(loaded.app_volume("firefox"), Some(0.4));
        assert!(loaded.is_hidden("svchost"));

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let loaded = TapSettings::load_from(&temp_path("missing"));
        assert_eq!(loaded, TapSettings::default());
    }

    #[test]
    fn test_corrupt_file_gives_defaults() {
        let path = temp_path("corrupt");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{ not json").unwrap();

        assert_eq!(TapSettings::load_from(&path), TapSettings::default());
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_backward_compat_missing_fields() {
        let old_json = r#"{ "preferred_endpoint": "Headphones" }"#;
        let settings: TapSettings = serde_json::from_str(old_json).unwrap();

        assert_eq!(settings.preferred_endpoint.as_deref(), Some("Headphones"));
        assert!(settings.app_volumes.is_empty());
        assert_eq!(settings.config, TapConfig::default());
    }

    #[test]
    fn test_invalid_config_is_not_saved() {
        let path = temp_path("invalid");
        let mut settings = TapSettings::default();
        settings.config.capture.queue_capacity = 0;

        assert!(matches!(settings.save_to(&path), Err(TapError::ConfigError(_))));
        assert!(!path.exists());
    }

    #[test]
    fn test_app_volume_is_clamped() {
        let mut settings = TapSettings::default();
        settings.remember_app_volume("spotify", 1.7);
        assert_eq!(settings.app_volume("spotify"), Some(1.0));
        assert_eq!(settings.app_volume("unknown"), None);
    }
}
