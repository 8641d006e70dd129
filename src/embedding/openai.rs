use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

use super::{deterministic_vector, EmbeddingProvider, EmbeddingVector, DETERMINISTIC_MODEL};
use crate::config::EmbeddingConfig;
use crate::error::EmbeddingError;

/// Embedding provider using the OpenAI API.
///
/// Calls `POST {base_url}/embeddings` with the configured model, one text per
/// request. There is no retry: any transport error, non-success status, or
/// malformed body is logged and answered with the deterministic vector for the
/// same text instead.
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dims: usize,
    endpoint: String,
}

impl OpenAiProvider {
    pub fn new(config: &EmbeddingConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            dims: config.dims,
            endpoint: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
        })
    }

    async fn request(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbeddingError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Request(format!(
                "OpenAI API error {}: {}",
                status, body_text
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;
        parse_openai_response(&json)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<EmbeddingVector, EmbeddingError> {
        tracing::debug!(chars = text.chars().count(), "requesting OpenAI embedding");
        match self.request(text).await {
            Ok(vector) => Ok(EmbeddingVector {
                vector,
                model: self.model.clone(),
            }),
            Err(e) => {
                tracing::warn!(error = %e, "embedding API failed; falling back to deterministic embedding");
                Ok(EmbeddingVector {
                    vector: deterministic_vector(text, self.dims),
                    model: DETERMINISTIC_MODEL.to_string(),
                })
            }
        }
    }
}

/// Extracts `data[0].embedding` from an embeddings API response.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<f32>, EmbeddingError> {
    let embedding = json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|d| d.first())
        .and_then(|item| item.get("embedding"))
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            EmbeddingError::InvalidResponse("missing data[0].embedding".to_string())
        })?;

    embedding
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| EmbeddingError::InvalidResponse("non-numeric value".to_string()))
        })
        .collect()
}
