//! Application configuration
//!
//! TOML file under the platform config directory; every field falls back
//! to a sensible default so a missing file is not an error.

use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::constants::{
    DISCOVERY_POLL_INTERVAL, FRAME_SAMPLES, PLAYBACK_QUEUE_CAPACITY, SESSION_CONNECT_TIMEOUT,
};
use crate::error::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Human-readable name announced to peers
    pub device_name: String,
    pub audio: AudioConfig,
    pub session: SessionConfig,
    pub companion: CompanionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Samples per channel per captured frame
    pub frame_samples: usize,
    /// Per-peer playback queue capacity in frames
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Session invitation timeout in seconds
    pub connect_timeout_secs: u64,
    /// Discovery poll interval in milliseconds
    pub discovery_poll_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompanionConfig {
    /// Directory for received clips; defaults to the platform data dir
    pub clip_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            device_name: default_device_name(),
            audio: AudioConfig::default(),
            session: SessionConfig::default(),
            companion: CompanionConfig::default(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            frame_samples: FRAME_SAMPLES,
            queue_capacity: PLAYBACK_QUEUE_CAPACITY,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: SESSION_CONNECT_TIMEOUT.as_secs(),
            discovery_poll_ms: DISCOVERY_POLL_INTERVAL.as_millis() as u64,
        }
    }
}

impl Default for CompanionConfig {
    fn default() -> Self {
        Self { clip_dir: None }
    }
}

impl AppConfig {
    /// Load from the config file, or defaults when it does not exist
    pub fn load() -> crate::Result<Self> {
        match Self::config_path() {
            Some(path) if path.exists() => {
                let raw = std::fs::read_to_string(&path)?;
                toml::from_str(&raw).map_err(|e| Error::Config(e.to_string()))
            }
            _ => Ok(Self::default()),
        }
    }

    /// Write the current config to disk
    pub fn save(&self) -> crate::Result<()> {
        let path = Self::config_path()
            .ok_or_else(|| Error::Config("no config directory".to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    pub fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "voicemesh").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.session.connect_timeout_secs)
    }

    pub fn discovery_poll(&self) -> Duration {
        Duration::from_millis(self.session.discovery_poll_ms.max(100))
    }

    /// Directory where received clips are written
    pub fn clip_dir(&self) -> PathBuf {
        if let Some(dir) = &self.companion.clip_dir {
            return dir.clone();
        }
        ProjectDirs::from("", "", "voicemesh")
            .map(|dirs| dirs.data_dir().join("clips"))
            .unwrap_or_else(|| PathBuf::from("clips"))
    }
}

fn default_device_name() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "voicemesh node".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_constants() {
        let config = AppConfig::default();
        assert_eq!(config.audio.frame_samples, FRAME_SAMPLES);
        assert_eq!(config.audio.queue_capacity, PLAYBACK_QUEUE_CAPACITY);
        assert_eq!(config.connect_timeout(), SESSION_CONNECT_TIMEOUT);
        assert!(!config.device_name.is_empty());
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            device_name = "studio mic"

            [session]
            connect_timeout_secs = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.device_name, "studio mic");
        assert_eq!(config.connect_timeout(), Duration::from_secs(3));
        assert_eq!(config.audio.frame_samples, FRAME_SAMPLES);
    }

    #[test]
    fn round_trips_through_toml() {
        let mut config = AppConfig::default();
        config.device_name = "porch".to_string();
        config.audio.queue_capacity = 16;

        let raw = toml::to_string_pretty(&config).unwrap();
        let back: AppConfig = toml::from_str(&raw).unwrap();
        assert_eq!(back.device_name, "porch");
        assert_eq!(back.audio.queue_capacity, 16);
    }

    #[test]
    fn discovery_poll_has_a_floor() {
        let mut config = AppConfig::default();
        config.session.discovery_poll_ms = 1;
        assert_eq!(config.discovery_poll(), Duration::from_millis(100));
    }

    #[test]
    fn explicit_clip_dir_wins() {
        let mut config = AppConfig::default();
        config.companion.clip_dir = Some(PathBuf::from("/tmp/clips"));
        assert_eq!(config.clip_dir(), PathBuf::from("/tmp/clips"));
    }
}
