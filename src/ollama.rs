// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Ollama API client for local vision inference

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::classifier::{VisionBackend, VisionRequest};
use crate::error::ClassificationError;
use crate::{Result, VerdantError};

/// Ollama API client
pub struct OllamaClient {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    images: [&'a str; 1],
    format: &'a serde_json::Value,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    models: Vec<ModelInfo>,
}

#[derive(Deserialize)]
struct ModelInfo {
    name: String,
}

impl OllamaClient {
    /// Create a new Ollama client.
    ///
    /// Only connection setup is bounded; a generate call runs until the model answers.
    pub fn new(base_url: &str, connect_timeout: Duration) -> Result<Self> {
        let client = Client::builder().connect_timeout(connect_timeout).build()?;

        // Normalize URL
        let base_url = base_url
            .trim_end_matches('/')
            .replace("/api/generate", "")
            .replace("/api/chat", "");

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check if Ollama is available
    pub async fn health_check(&self) -> Result<()> {
        let url = format!("{}/api/tags", self.base_url);

        self.client
            .get(&url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| {
                VerdantError::ClassifierUnavailable(format!(
                    "Cannot connect to Ollama at {}: {}",
                    self.base_url, e
                ))
            })?;

        Ok(())
    }

    /// List available models
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self.client
            .get(&url)
            .timeout(Duration::from_secs(10))
            .send()
            .await?;

        let tags: TagsResponse = response.json().await?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// Check if a specific model is available
    pub async fn model_available(&self, model: &str) -> Result<bool> {
        let models = self.list_models().await?;
        Ok(models.iter().any(|m| is_same_model(m, model)))
    }
}

fn is_same_model(listed: &str, wanted: &str) -> bool {
    listed == wanted || listed == format!("{}:latest", wanted) || listed.starts_with(&format!("{}:", wanted))
}

#[async_trait]
impl VisionBackend for OllamaClient {
    async fn complete(&self, request: &VisionRequest) -> std::result::Result<String, ClassificationError> {
        let url = format!("{}/api/generate", self.base_url);

        let body = GenerateRequest {
            model: &request.model,
            prompt: &request.prompt,
            stream: false,
            images: [request.image_base64.as_str()],
            format: &request.schema,
            options: GenerateOptions {
                temperature: request.temperature,
            },
        };

        debug!("Sending vision request to Ollama: model={}", request.model);

        let response = self.client.post(&url).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ClassificationError::Transport(format!(
                "Ollama returned status {}: {}",
                status,
                detail.trim()
            )));
        }

        let raw = response.text().await?;
        let envelope: GenerateResponse = serde_json::from_str(&raw)
            .map_err(|e| ClassificationError::MalformedResponse(format!("bad Ollama envelope: {}", e)))?;

        Ok(envelope.response)
    }
}
