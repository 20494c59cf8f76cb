// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Configuration management for Verdant

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    /// External classification service
    pub classifier: ClassifierConfig,

    /// Prompt templates
    #[serde(default)]
    pub prompts: PromptConfig,

    /// Location lookup settings
    #[serde(default)]
    pub geolocation: GeolocationConfig,

    /// Image capture settings
    #[serde(default)]
    pub capture: CaptureConfig,

    /// Where profiles and history live
    #[serde(default)]
    pub storage: StorageConfig,

    /// Live progress display
    #[serde(default)]
    pub progress: ProgressConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ClassifierConfig {
    pub url: String,
    pub model: String,
    /// Connection setup only. Classification requests themselves are never timed out.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default)]
    pub temperature: f32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PromptConfig {
    #[serde(default = "default_identify_prompt")]
    pub identify: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GeolocationConfig {
    #[serde(default = "default_geo_timeout")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub source: LocationSource,
}

/// Where coordinates come from
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LocationSource {
    /// No location capability
    #[default]
    None,
    /// A fixed position, e.g. a greenhouse
    Fixed { lat: f64, lng: f64 },
    /// An HTTP endpoint returning `{"latitude": .., "longitude": ..}`
    Http { url: String },
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CaptureConfig {
    #[serde(default = "default_formats")]
    pub formats: Vec<String>,
    #[serde(default = "default_camera_device")]
    pub camera_device: String,
    #[serde(default = "default_camera_input_format")]
    pub camera_input_format: String,
    #[serde(default = "default_label")]
    pub default_label: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_profiles_path")]
    pub profiles_path: String,
    #[serde(default = "default_history_path")]
    pub history_path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProgressConfig {
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

// Default value functions
fn default_connect_timeout() -> u64 { 10 }
fn default_geo_timeout() -> u64 { 3000 }
fn default_camera_device() -> String { "/dev/video0".to_string() }
fn default_camera_input_format() -> String { "v4l2".to_string() }
fn default_label() -> String { "New Plant".to_string() }
fn default_profiles_path() -> String { "verdant_profiles.json".to_string() }
fn default_history_path() -> String { "verdant_history.jsonl".to_string() }
fn default_tick_ms() -> u64 { 10 }

fn default_formats() -> Vec<String> {
    vec!["jpg", "jpeg", "png", "webp", "gif", "bmp", "tiff", "tif", "heic", "heif", "avif"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_identify_prompt() -> String {
    "You are a plant identification assistant working against a closed reference set. \
     Compare the photo ONLY against the reference profiles listed below. Treat that list \
     as the complete ground truth and ignore any broader botanical knowledge you have."
        .to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            classifier: ClassifierConfig {
                url: "http://localhost:11434".to_string(),
                model: "llava".to_string(),
                connect_timeout_secs: default_connect_timeout(),
                temperature: 0.0,
            },
            prompts: PromptConfig::default(),
            geolocation: GeolocationConfig::default(),
            capture: CaptureConfig::default(),
            storage: StorageConfig::default(),
            progress: ProgressConfig::default(),
        }
    }
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            identify: default_identify_prompt(),
        }
    }
}

impl Default for GeolocationConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_geo_timeout(),
            source: LocationSource::None,
        }
    }
}

impl GeolocationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            formats: default_formats(),
            camera_device: default_camera_device(),
            camera_input_format: default_camera_input_format(),
            default_label: default_label(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            profiles_path: default_profiles_path(),
            history_path: default_history_path(),
        }
    }
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
        }
    }
}

impl ProgressConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }
}

impl AppConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> crate::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = serde_json::from_str(&content)
                .map_err(|e| crate::VerdantError::Config(format!("Failed to parse config: {}", e)))?;
            config.validate()?;
            Ok(config)
        } else {
            tracing::info!("Config file not found at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings that cannot work at runtime
    pub fn validate(&self) -> crate::Result<()> {
        if self.classifier.url.trim().is_empty() {
            return Err(crate::VerdantError::Config("classifier.url is empty".to_string()));
        }
        if self.classifier.model.trim().is_empty() {
            return Err(crate::VerdantError::Config("classifier.model is empty".to_string()));
        }
        if self.capture.formats.is_empty() {
            return Err(crate::VerdantError::Config("capture.formats is empty".to_string()));
        }
        if let LocationSource::Fixed { lat, lng } = self.geolocation.source {
            if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
                return Err(crate::VerdantError::Config(format!(
                    "fixed location out of range: {}, {}",
                    lat, lng
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.geolocation.timeout_ms, 3000);
        assert_eq!(config.progress.tick_ms, 10);
        assert_eq!(config.geolocation.source, LocationSource::None);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "classifier": { "url": "http://gpu-box:11434", "model": "llama3.2-vision" },
                "geolocation": { "source": { "kind": "fixed", "lat": 51.5, "lng": -0.12 } }
            }"#,
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.classifier.model, "llama3.2-vision");
        assert_eq!(config.classifier.connect_timeout_secs, 10);
        assert_eq!(config.geolocation.timeout_ms, 3000);
        assert_eq!(config.geolocation.source, LocationSource::Fixed { lat: 51.5, lng: -0.12 });
        assert_eq!(config.capture.default_label, "New Plant");
    }

    #[test]
    fn test_out_of_range_fixed_location_rejected() {
        let mut config = AppConfig::default();
        config.geolocation.source = LocationSource::Fixed { lat: 95.0, lng: 0.0 };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = AppConfig::default();
        config.storage.history_path = "elsewhere.jsonl".to_string();
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.storage.history_path, "elsewhere.jsonl");
    }
}
