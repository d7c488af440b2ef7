use super::{GenerationProvider, GenerationRequest};
use crate::breaker::Dependency;
use crate::config::GenerationConfig;
use crate::context::Role;
use crate::errors::SwitchboardError;
use crate::providers::errors::ProviderErrorHandler;
use crate::providers::provider_http_client;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Gemini `generateContent` client.
pub struct GeminiProvider {
    api_key: String,
    model: String,
    base_url: String,
    client: Client,
}

impl GeminiProvider {
    pub fn new(config: &GenerationConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client: provider_http_client(config.timeout_secs),
        }
    }

    /// Point the provider at another endpoint (tests, proxies).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn build_payload(request: GenerationRequest<'_>) -> Value {
        let mut contents: Vec<Value> = request
            .history
            .iter()
            .filter(|m| !m.body.trim().is_empty())
            .map(|m| {
                let role = match m.role {
                    Role::Assistant => "model",
                    Role::User => "user",
                };
                json!({"role": role, "parts": [{"text": m.body}]})
            })
            .collect();
        contents.push(json!({"role": "user", "parts": [{"text": request.message}]}));

        json!({
            "systemInstruction": {"parts": [{"text": request.system_prompt}]},
            "contents": contents,
            "generationConfig": {
                "temperature": 0.7,
                "maxOutputTokens": 512,
            },
        })
    }

    /// Concatenate the text parts of the first candidate. A prompt blocked by
    /// the provider's own safety filter is a permanent rejection; a missing
    /// candidate yields an empty string.
    fn parse_response(json: &Value) -> Result<String, SwitchboardError> {
        if let Some(reason) = json
            .get("promptFeedback")
            .and_then(|f| f.get("blockReason"))
            .and_then(Value::as_str)
        {
            return Err(SwitchboardError::permanent(
                Dependency::Generation,
                format!("prompt blocked by provider: {reason}"),
            ));
        }

        let text = json["candidates"]
            .as_array()
            .and_then(|arr| arr.first())
            .and_then(|c| c["content"]["parts"].as_array())
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        Ok(text)
    }
}

#[async_trait]
impl GenerationProvider for GeminiProvider {
    async fn generate(&self, request: GenerationRequest<'_>) -> Result<String, SwitchboardError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let resp = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&Self::build_payload(request))
            .send()
            .await
            .map_err(|e| ProviderErrorHandler::classify_transport(Dependency::Generation, &e))?;

        let json = ProviderErrorHandler::check_response(resp, Dependency::Generation).await?;
        Self::parse_response(&json)
    }

    fn name(&self) -> &str {
        "gemini"
    }
}
