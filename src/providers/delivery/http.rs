use super::{DeliveryProvider, DeliveryReceipt, DeliveryRequest};
use crate::breaker::Dependency;
use crate::config::DeliveryConfig;
use crate::errors::SwitchboardError;
use crate::providers::errors::ProviderErrorHandler;
use crate::providers::provider_http_client;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

#[derive(Serialize)]
struct SendBody<'a> {
    number: &'a str,
    body: &'a str,
    #[serde(rename = "idempotencyKey")]
    idempotency_key: &'a str,
}

/// Whaticket-style send endpoint: bearer auth, JSON body, optional `{"id"}`
/// in the response.
pub struct HttpDeliveryProvider {
    api_url: String,
    bearer_token: String,
    client: Client,
}

impl HttpDeliveryProvider {
    pub fn new(config: &DeliveryConfig) -> Self {
        Self {
            api_url: config.api_url.clone(),
            bearer_token: config.bearer_token.clone(),
            client: provider_http_client(config.timeout_secs),
        }
    }

    #[must_use]
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    fn external_id(json: &Value) -> Option<String> {
        let id = json
            .get("id")
            .or_else(|| json.get("message").and_then(|m| m.get("id")))?;
        match id {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

#[async_trait]
impl DeliveryProvider for HttpDeliveryProvider {
    async fn send(&self, request: DeliveryRequest<'_>) -> Result<DeliveryReceipt, SwitchboardError> {
        let mut builder = self
            .client
            .post(&self.api_url)
            .header(IDEMPOTENCY_HEADER, request.idempotency_key)
            .json(&SendBody {
                number: request.recipient,
                body: request.body,
                idempotency_key: request.idempotency_key,
            });
        if !self.bearer_token.is_empty() {
            builder = builder.bearer_auth(&self.bearer_token);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| ProviderErrorHandler::classify_transport(Dependency::Delivery, &e))?;
        let resp = ProviderErrorHandler::check_http_status(resp, Dependency::Delivery).await?;
        // Accepted: an unreadable body only loses the external id
        let json = resp
            .text()
            .await
            .ok()
            .and_then(|text| serde_json::from_str::<Value>(&text).ok())
            .unwrap_or(Value::Null);
        Ok(DeliveryReceipt {
            external_id: Self::external_id(&json),
        })
    }
}
