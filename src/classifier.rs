// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Closed-set classification client
//!
//! Sends one photo plus an image-free manifest of the reference profiles to a
//! vision model, constrains the answer with a JSON schema, and validates the
//! reply strictly. Nothing is cached and nothing is retried here.
//!
//! # Confidence semantics
//!
//! `confidence` means two different things depending on the match:
//!
//! * matched to a profile: confidence that the photo shows that profile;
//! * [`MatchedProfile::Unknown`]: confidence that the specimen is **absent**
//!   from the reference set.
//!
//! A `confidence` of 1.0 is therefore a certain match in the first case and a
//! certain non-match in the second. Use [`ClassificationOutcome::match_confidence`]
//! and [`ClassificationOutcome::absence_confidence`] rather than reading the
//! raw field.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::capture::EncodedImage;
use crate::config::AppConfig;
use crate::error::ClassificationError;
use crate::profiles::{manifest, ManifestEntry, ReferenceProfile};

/// `matchedName` reported when nothing in the set matches
pub const NO_MATCH: &str = "no match";

/// `matchedProfileId` reported when nothing in the set matches
pub const UNKNOWN_PROFILE: &str = "unknown";

/// Which profile, if any, the classifier picked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MatchedProfile {
    Profile(String),
    Unknown,
}

impl From<String> for MatchedProfile {
    fn from(id: String) -> Self {
        if id == UNKNOWN_PROFILE {
            MatchedProfile::Unknown
        } else {
            MatchedProfile::Profile(id)
        }
    }
}

impl From<MatchedProfile> for String {
    fn from(matched: MatchedProfile) -> Self {
        match matched {
            MatchedProfile::Profile(id) => id,
            MatchedProfile::Unknown => UNKNOWN_PROFILE.to_string(),
        }
    }
}

impl fmt::Display for MatchedProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchedProfile::Profile(id) => f.write_str(id),
            MatchedProfile::Unknown => f.write_str(UNKNOWN_PROFILE),
        }
    }
}

/// The classifier's validated answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationOutcome {
    /// A profile's common name, or [`NO_MATCH`]
    pub matched_name: String,
    pub scientific_name: String,
    pub is_invasive: bool,
    /// See the module docs: match confidence, or absence confidence when unknown
    pub confidence: f64,
    pub explanation: String,
    pub matched_profile_id: MatchedProfile,
}

impl ClassificationOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self.matched_profile_id, MatchedProfile::Profile(_))
    }

    /// Confidence the photo shows the matched profile
    pub fn match_confidence(&self) -> Option<f64> {
        self.is_match().then_some(self.confidence)
    }

    /// Confidence the specimen is not in the reference set
    pub fn absence_confidence(&self) -> Option<f64> {
        (!self.is_match()).then_some(self.confidence)
    }
}

/// Something that can identify a photo against a profile set
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        image: &EncodedImage,
        profiles: &[ReferenceProfile],
    ) -> Result<ClassificationOutcome, ClassificationError>;
}

/// One structured-output request to a vision model
#[derive(Debug, Clone)]
pub struct VisionRequest {
    pub model: String,
    pub prompt: String,
    pub image_base64: String,
    pub schema: serde_json::Value,
    pub temperature: f32,
}

/// Transport to a vision model. Returns the raw text of the answer.
#[async_trait]
pub trait VisionBackend: Send + Sync {
    async fn complete(&self, request: &VisionRequest) -> Result<String, ClassificationError>;
}

/// Classifier that asks a vision model to choose from the manifest
pub struct ClassificationClient {
    backend: Arc<dyn VisionBackend>,
    model: String,
    directive: String,
    temperature: f32,
}

impl ClassificationClient {
    pub fn new(backend: Arc<dyn VisionBackend>, model: &str, directive: &str) -> Self {
        Self {
            backend,
            model: model.to_string(),
            directive: directive.to_string(),
            temperature: 0.0,
        }
    }

    pub fn from_config(backend: Arc<dyn VisionBackend>, config: &AppConfig) -> Self {
        let mut client = Self::new(backend, &config.classifier.model, &config.prompts.identify);
        client.temperature = config.classifier.temperature;
        client
    }
}

#[async_trait]
impl Classifier for ClassificationClient {
    async fn classify(
        &self,
        image: &EncodedImage,
        profiles: &[ReferenceProfile],
    ) -> Result<ClassificationOutcome, ClassificationError> {
        if profiles.is_empty() {
            return Err(ClassificationError::EmptyDatabase);
        }

        let entries = manifest(profiles);
        let request = VisionRequest {
            model: self.model.clone(),
            prompt: build_prompt(&self.directive, &entries),
            image_base64: image.data.clone(),
            schema: response_schema(&entries),
            temperature: self.temperature,
        };

        debug!(
            "Classifying {} ({}) against {} profiles with {}",
            image.origin,
            image.short_digest(),
            entries.len(),
            self.model
        );

        let text = self.backend.complete(&request).await?;
        parse_outcome(&text, profiles)
    }
}

/// Natural-language instructions plus the manifest
pub fn build_prompt(directive: &str, entries: &[ManifestEntry]) -> String {
    let manifest_json = serde_json::Value::Array(
        entries
            .iter()
            .map(|e| {
                json!({
                    "id": e.id,
                    "commonName": e.common_name,
                    "scientificName": e.scientific_name,
                    "isInvasive": e.is_invasive,
                    "sampleCount": e.sample_count,
                })
            })
            .collect(),
    );

    format!(
        "{directive}\n\n\
         Reference profiles:\n{manifest_json}\n\n\
         Rules:\n\
         1. Use ONLY the reference profiles above as ground truth. Never answer with a plant that is not listed.\n\
         2. If the photo matches a profile, copy its commonName into matchedName, its scientificName, \
         its isInvasive and its id into matchedProfileId. Set confidence to how sure you are of the match, 0.0 to 1.0.\n\
         3. If no profile matches, set matchedName to \"{no_match}\", matchedProfileId to \"{unknown}\", \
         scientificName to \"\" and isInvasive to false. In this case confidence is the probability that \
         the plant is ABSENT from the reference profiles, not a match score.\n\
         4. explanation: one or two sentences describing the visual evidence.\n\
         Reply with a single JSON object and nothing else.",
        directive = directive.trim(),
        manifest_json = format!("{:#}", manifest_json),
        no_match = NO_MATCH,
        unknown = UNKNOWN_PROFILE,
    )
}

/// JSON schema the answer must satisfy. Profile ids are enumerated.
pub fn response_schema(entries: &[ManifestEntry]) -> serde_json::Value {
    let mut ids: Vec<&str> = entries.iter().map(|e| e.id.as_str()).collect();
    ids.push(UNKNOWN_PROFILE);

    json!({
        "type": "object",
        "properties": {
            "matchedName": { "type": "string" },
            "scientificName": { "type": "string" },
            "isInvasive": { "type": "boolean" },
            "confidence": { "type": "number", "minimum": 0.0, "maximum": 1.0 },
            "explanation": { "type": "string" },
            "matchedProfileId": { "type": "string", "enum": ids }
        },
        "required": [
            "matchedName",
            "scientificName",
            "isInvasive",
            "confidence",
            "explanation",
            "matchedProfileId"
        ],
        "additionalProperties": false
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct WireOutcome {
    matched_name: String,
    scientific_name: String,
    is_invasive: bool,
    confidence: f64,
    explanation: String,
    matched_profile_id: String,
}

/// Parse and validate a raw answer against the schema and the profile set
pub fn parse_outcome(
    text: &str,
    profiles: &[ReferenceProfile],
) -> Result<ClassificationOutcome, ClassificationError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ClassificationError::MalformedResponse("empty response".to_string()));
    }

    let wire: WireOutcome = serde_json::from_str(text)
        .map_err(|e| ClassificationError::MalformedResponse(e.to_string()))?;

    if !wire.confidence.is_finite() || !(0.0..=1.0).contains(&wire.confidence) {
        return Err(ClassificationError::MalformedResponse(format!(
            "confidence {} outside [0, 1]",
            wire.confidence
        )));
    }

    let matched = MatchedProfile::from(wire.matched_profile_id);
    match &matched {
        MatchedProfile::Unknown => {
            if wire.matched_name != NO_MATCH {
                return Err(ClassificationError::MalformedResponse(format!(
                    "unknown profile id with matchedName {:?}",
                    wire.matched_name
                )));
            }
        }
        MatchedProfile::Profile(id) => {
            let profile = profiles.iter().find(|p| &p.id == id).ok_or_else(|| {
                ClassificationError::MalformedResponse(format!(
                    "matchedProfileId {:?} is not in the reference set",
                    id
                ))
            })?;
            if wire.matched_name != profile.common_name {
                return Err(ClassificationError::MalformedResponse(format!(
                    "profile {} is {:?} but matchedName is {:?}",
                    id, profile.common_name, wire.matched_name
                )));
            }
        }
    }

    Ok(ClassificationOutcome {
        matched_name: wire.matched_name,
        scientific_name: wire.scientific_name,
        is_invasive: wire.is_invasive,
        confidence: wire.confidence,
        explanation: wire.explanation,
        matched_profile_id: matched,
    })
}
