// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Reference profiles the classifier matches against

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::capture::EncodedImage;
use crate::{Result, VerdantError};

/// A labeled reference plant
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceProfile {
    pub id: String,
    pub common_name: String,
    pub scientific_name: String,
    pub is_invasive: bool,
    #[serde(default)]
    pub sample_images: Vec<EncodedImage>,
    #[serde(default)]
    pub notes: String,
    pub created_at: DateTime<Utc>,
}

/// The image-free summary of a profile sent to the classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub id: String,
    pub common_name: String,
    pub scientific_name: String,
    pub is_invasive: bool,
    pub sample_count: usize,
}

impl From<&ReferenceProfile> for ManifestEntry {
    fn from(profile: &ReferenceProfile) -> Self {
        Self {
            id: profile.id.clone(),
            common_name: profile.common_name.clone(),
            scientific_name: profile.scientific_name.clone(),
            is_invasive: profile.is_invasive,
            sample_count: profile.sample_images.len(),
        }
    }
}

/// Build the manifest for a profile snapshot, preserving order
pub fn manifest(profiles: &[ReferenceProfile]) -> Vec<ManifestEntry> {
    profiles.iter().map(ManifestEntry::from).collect()
}

/// Fields for a new profile
#[derive(Debug, Clone)]
pub struct NewProfile {
    pub common_name: String,
    pub scientific_name: String,
    pub is_invasive: bool,
    pub notes: String,
    pub sample_images: Vec<EncodedImage>,
}

/// JSON file of reference profiles, owned by the training workflow
pub struct ProfileStore {
    path: PathBuf,
}

impl ProfileStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Read every profile. A missing file is an empty set.
    pub fn load(&self) -> Result<Vec<ReferenceProfile>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&content)
            .map_err(|e| VerdantError::Profile(format!("Failed to parse {:?}: {}", self.path, e)))
    }

    fn save(&self, profiles: &[ReferenceProfile]) -> Result<()> {
        let content = serde_json::to_string_pretty(profiles)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }

    /// Add a profile with a fresh id and return it
    pub fn add(&self, new: NewProfile) -> Result<ReferenceProfile> {
        if new.common_name.trim().is_empty() {
            return Err(VerdantError::Profile("common name is empty".to_string()));
        }

        let mut profiles = self.load()?;
        let profile = ReferenceProfile {
            id: uuid::Uuid::new_v4().to_string(),
            common_name: new.common_name.trim().to_string(),
            scientific_name: new.scientific_name.trim().to_string(),
            is_invasive: new.is_invasive,
            sample_images: new.sample_images,
            notes: new.notes,
            created_at: Utc::now(),
        };
        profiles.push(profile.clone());
        self.save(&profiles)?;

        info!("Added profile {} ({})", profile.common_name, profile.id);
        Ok(profile)
    }

    /// Remove a profile by id. Returns whether it existed.
    pub fn remove(&self, id: &str) -> Result<bool> {
        let mut profiles = self.load()?;
        let before = profiles.len();
        profiles.retain(|p| p.id != id);
        if profiles.len() == before {
            return Ok(false);
        }
        self.save(&profiles)?;
        Ok(true)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(n: u8) -> EncodedImage {
        EncodedImage::from_bytes(&[n; 16], "image/jpeg", format!("sample{}.jpg", n))
    }

    fn new_profile(name: &str, samples: usize) -> NewProfile {
        NewProfile {
            common_name: name.to_string(),
            scientific_name: format!("{} scientifica", name),
            is_invasive: false,
            notes: String::new(),
            sample_images: (0..samples as u8).map(sample).collect(),
        }
    }

    #[test]
    fn test_manifest_omits_images() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path().join("profiles.json"));
        store.add(new_profile("Japanese knotweed", 3)).unwrap();

        let profiles = store.load().unwrap();
        let entries = manifest(&profiles);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].sample_count, 3);

        let json = serde_json::to_value(&entries).unwrap();
        let keys: Vec<&String> = json[0].as_object().unwrap().keys().collect();
        assert_eq!(keys.len(), 5);
        assert!(!json.to_string().contains("sampleImages"));
        assert_eq!(json[0]["commonName"], "Japanese knotweed");
    }

    #[test]
    fn test_add_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path().join("profiles.json"));
        assert!(store.load().unwrap().is_empty());

        let fern = store.add(new_profile("Bracken", 1)).unwrap();
        let ivy = store.add(new_profile("Ivy", 2)).unwrap();
        assert_ne!(fern.id, ivy.id);
        assert_eq!(store.load().unwrap().len(), 2);

        assert!(store.remove(&fern.id).unwrap());
        assert!(!store.remove(&fern.id).unwrap());
        let left = store.load().unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].common_name, "Ivy");
    }

    #[test]
    fn test_blank_name_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path().join("profiles.json"));
        assert!(store.add(new_profile("  ", 1)).is_err());
    }
}
