//! Configuration management for crabcall
//!
//! Provides loading, saving, and validation of the coordinator's runtime
//! options: initial capture intent, aspect-ratio tracking, signaling event
//! names, and the optional reconnect policy.

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    pub capture: CaptureSettings,
    pub signaling: SignalingSettings,
    pub reconnect: ReconnectPolicy,
}

/// Initial capture intent and surface tracking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureSettings {
    /// Microphone state before the first toggle
    pub mic_enabled: bool,
    /// Camera state before the first toggle
    pub cam_enabled: bool,
    /// Aspect ratio assumed until the first surface observation
    pub initial_aspect_ratio: f64,
    /// Ratio changes smaller than this are treated as layout jitter
    pub ratio_epsilon: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalingSettings {
    /// Signaling endpoint, passed through to the transport untouched
    pub server_url: String,
    pub events: EventNames,
}

/// Wire names of the signaling events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventNames {
    pub join_room: String,
    pub joined_room: String,
    pub roster: String,
    pub peer_left: String,
    pub update_stream: String,
}

/// Automatic rejoin after a transport disconnect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    pub auto_reconnect: bool,
    /// Consecutive failed attempts before giving up
    pub max_attempts: u32,
    /// Delay before each rejoin in milliseconds
    pub delay_ms: u64,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            mic_enabled: false,
            cam_enabled: true,
            initial_aspect_ratio: 16.0 / 9.0,
            ratio_epsilon: 1e-6,
        }
    }
}

impl Default for EventNames {
    fn default() -> Self {
        Self {
            join_room: "join-room".to_string(),
            joined_room: "joined-room".to_string(),
            roster: "roster".to_string(),
            peer_left: "peer-left".to_string(),
            update_stream: "update-stream".to_string(),
        }
    }
}

impl Default for SignalingSettings {
    fn default() -> Self {
        Self {
            server_url: "ws://localhost:5000".to_string(),
            events: EventNames::default(),
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            auto_reconnect: false,
            max_attempts: 3,
            delay_ms: 1000,
        }
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            capture: CaptureSettings::default(),
            signaling: SignalingSettings::default(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl EventNames {
    fn all(&self) -> [&str; 5] {
        [
            self.join_room.as_str(),
            self.joined_room.as_str(),
            self.roster.as_str(),
            self.peer_left.as_str(),
            self.update_stream.as_str(),
        ]
    }
}

impl CoordinatorConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;
        let config: CoordinatorConfig = toml::from_str(&contents)?;
        config.validate()?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let toml_string = toml::to_string_pretty(self)?;
        fs::write(path, toml_string)?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("crabcall.toml")
    }

    /// Load from default location or fall back to defaults
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ratio = self.capture.initial_aspect_ratio;
        if !ratio.is_finite() || ratio <= 0.0 {
            return Err(ConfigError::Invalid(
                "Initial aspect ratio must be a positive number".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.capture.ratio_epsilon) {
            return Err(ConfigError::Invalid(
                "Ratio epsilon must be in [0.0, 1.0)".to_string(),
            ));
        }

        let names = self.signaling.events.all();
        if names.iter().any(|name| name.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "Signaling event names must not be empty".to_string(),
            ));
        }
        let unique: HashSet<&str> = names.iter().copied().collect();
        if unique.len() != names.len() {
            return Err(ConfigError::Invalid(
                "Signaling event names must be distinct".to_string(),
            ));
        }

        if self.reconnect.auto_reconnect && self.reconnect.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "Reconnect attempts must be at least 1 when auto-reconnect is enabled"
                    .to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CoordinatorConfig::default();
        assert!(!config.capture.mic_enabled);
        assert!(config.capture.cam_enabled);
        assert!((config.capture.initial_aspect_ratio - 1.777_777_777_777_777_7).abs() < 1e-12);
        assert!(!config.reconnect.auto_reconnect);
        assert_eq!(config.signaling.events.join_room, "join-room");
    }

    #[test]
    fn test_config_validation() {
        let config = CoordinatorConfig::default();
        assert!(config.validate().is_ok());

        let mut bad_ratio = config.clone();
        bad_ratio.capture.initial_aspect_ratio = 0.0;
        assert!(bad_ratio.validate().is_err());

        let mut nan_ratio = config.clone();
        nan_ratio.capture.initial_aspect_ratio = f64::NAN;
        assert!(nan_ratio.validate().is_err());

        let mut bad_epsilon = config.clone();
        bad_epsilon.capture.ratio_epsilon = -0.1;
        assert!(bad_epsilon.validate().is_err());

        let mut duplicate_events = config.clone();
        duplicate_events.signaling.events.roster = "peer-left".to_string();
        assert!(duplicate_events.validate().is_err());

        let mut empty_event = config.clone();
        empty_event.signaling.events.update_stream = " ".to_string();
        assert!(empty_event.validate().is_err());

        let mut bad_reconnect = config;
        bad_reconnect.reconnect.auto_reconnect = true;
        bad_reconnect.reconnect.max_attempts = 0;
        assert!(bad_reconnect.validate().is_err());
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("nested").join("crabcall.toml");

        let mut config = CoordinatorConfig::default();
        config.capture.mic_enabled = true;
        config.reconnect.delay_ms = 250;
        assert!(config.save_to_file(&config_path).is_ok());

        let loaded = CoordinatorConfig::load_from_file(&config_path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_toml_format() {
        let config = CoordinatorConfig::default();
        let toml_string = toml::to_string_pretty(&config).unwrap();

        assert!(toml_string.contains("[capture]"));
        assert!(toml_string.contains("[signaling]"));
        assert!(toml_string.contains("[signaling.events]"));
        assert!(toml_string.contains("[reconnect]"));
        assert!(toml_string.contains("ratio_epsilon"));
        assert!(toml_string.contains("auto_reconnect"));
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = CoordinatorConfig::load_from_file("nonexistent_crabcall.toml");
        assert!(result.is_ok());
        assert!(result.unwrap().capture.cam_enabled);
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("bad.toml");

        let mut config = CoordinatorConfig::default();
        config.signaling.events.joined_room = "roster".to_string();
        config.save_to_file(&config_path).unwrap();

        let result = CoordinatorConfig::load_from_file(&config_path);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
