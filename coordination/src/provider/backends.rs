//! HTTP wire adapters for each provider dialect.
//!
//! Each adapter translates a [`GenerationRequest`] into its provider's JSON
//! body and maps the provider's response back into a [`RawCompletion`].
//! Provider-specific shapes never leave this module.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::catalog::ModelLister;
use super::spec::{ProviderId, ProviderSpec, WireFormat};
use crate::error::{EnsembleError, ModelError};
use crate::request::GenerationRequest;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Longest provider error body echoed into an error message.
const MAX_ERROR_BODY: usize = 500;

/// Normalized output of one backend call, before pricing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawCompletion {
    pub content: String,
    /// Input tokens billed at the full rate.
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Input tokens served from the provider's prompt cache.
    pub cached_input_tokens: u64,
}

/// One round trip to a backend for a specific model id.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(
        &self,
        model_id: &str,
        request: &GenerationRequest,
    ) -> Result<RawCompletion, ModelError>;
}

/// reqwest-backed adapter for any [`WireFormat`].
pub struct HttpBackend {
    provider: ProviderId,
    wire: WireFormat,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(spec: &ProviderSpec, api_key: String) -> Result<Self, EnsembleError> {
        let client = reqwest::Client::builder().build().map_err(|e| {
            EnsembleError::Configuration(format!("{}: failed to create HTTP client: {e}", spec.provider))
        })?;
        Ok(Self {
            provider: spec.provider,
            wire: spec.provider.wire_format(),
            base_url: spec.base_url().to_string(),
            api_key,
            client,
        })
    }

    fn endpoint(&self, model_id: &str) -> String {
        match self.wire {
            WireFormat::AnthropicMessages => format!("{}/v1/messages", self.base_url),
            WireFormat::OpenAiChat => format!("{}/chat/completions", self.base_url),
            WireFormat::GeminiGenerate => {
                format!("{}/v1beta/models/{}:generateContent", self.base_url, model_id)
            }
        }
    }

    fn models_endpoint(&self) -> String {
        match self.wire {
            WireFormat::AnthropicMessages => format!("{}/v1/models", self.base_url),
            WireFormat::OpenAiChat => format!("{}/models", self.base_url),
            WireFormat::GeminiGenerate => format!("{}/v1beta/models", self.base_url),
        }
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.wire {
            WireFormat::AnthropicMessages => builder
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION),
            WireFormat::OpenAiChat => {
                builder.header("Authorization", format!("Bearer {}", self.api_key))
            }
            WireFormat::GeminiGenerate => builder.header("x-goog-api-key", &self.api_key),
        }
    }
}

#[async_trait]
impl CompletionBackend for HttpBackend {
    async fn complete(
        &self,
        model_id: &str,
        request: &GenerationRequest,
    ) -> Result<RawCompletion, ModelError> {
        let body = build_body(self.wire, model_id, request);
        let url = self.endpoint(model_id);
        debug!(provider = %self.provider, model = model_id, %url, "sending completion request");

        let response = self
            .authorize(self.client.post(&url))
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(self.provider, model_id, status.as_u16(), &body));
        }

        let resp_json: Value = response
            .json()
            .await
            .map_err(|e| ModelError::MalformedResponse(e.to_string()))?;
        parse_completion(self.wire, &resp_json)
    }
}

#[async_trait]
impl ModelLister for HttpBackend {
    async fn list_models(&self) -> Result<Vec<String>, ModelError> {
        let url = self.models_endpoint();
        debug!(provider = %self.provider, %url, "listing models");

        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| ModelError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(self.provider, "", status.as_u16(), &body));
        }

        let resp_json: Value = response
            .json()
            .await
            .map_err(|e| ModelError::MalformedResponse(e.to_string()))?;
        parse_model_list(self.wire, &resp_json)
    }
}

/// Model ids from a provider's model-list response. Gemini names carry a
/// `models/` prefix, which is stripped.
pub fn parse_model_list(wire: WireFormat, resp: &Value) -> Result<Vec<String>, ModelError> {
    let (entries, field) = match wire {
        WireFormat::AnthropicMessages | WireFormat::OpenAiChat => (&resp["data"], "id"),
        WireFormat::GeminiGenerate => (&resp["models"], "name"),
    };
    let entries = entries
        .as_array()
        .ok_or_else(|| ModelError::MalformedResponse("missing model list".into()))?;
    Ok(entries
        .iter()
        .filter_map(|m| m[field].as_str())
        .map(|id| id.strip_prefix("models/").unwrap_or(id).to_string())
        .collect())
}

/// Request body for `model_id` in the given dialect.
pub fn build_body(wire: WireFormat, model_id: &str, request: &GenerationRequest) -> Value {
    match wire {
        WireFormat::AnthropicMessages => {
            let mut body = json!({
                "model": model_id,
                "max_tokens": request.max_output_tokens,
                "temperature": request.temperature,
                "messages": [{ "role": "user", "content": request.prompt }],
            });
            if let Some(system) = &request.system {
                body["system"] = json!(system);
            }
            body
        }
        WireFormat::OpenAiChat => {
            let mut messages = Vec::with_capacity(2);
            if let Some(system) = &request.system {
                messages.push(json!({ "role": "system", "content": system }));
            }
            messages.push(json!({ "role": "user", "content": request.prompt }));
            json!({
                "model": model_id,
                "max_tokens": request.max_output_tokens,
                "temperature": request.temperature,
                "messages": messages,
            })
        }
        WireFormat::GeminiGenerate => {
            let mut body = json!({
                "contents": [{ "role": "user", "parts": [{ "text": request.prompt }] }],
                "generationConfig": {
                    "temperature": request.temperature,
                    "maxOutputTokens": request.max_output_tokens,
                },
            });
            if let Some(system) = &request.system {
                body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
            }
            body
        }
    }
}

fn token(value: &Value) -> u64 {
    value.as_u64().unwrap_or(0)
}

/// Map a provider response body into a [`RawCompletion`].
pub fn parse_completion(wire: WireFormat, resp: &Value) -> Result<RawCompletion, ModelError> {
    match wire {
        WireFormat::AnthropicMessages => {
            let blocks = resp["content"]
                .as_array()
                .ok_or_else(|| ModelError::MalformedResponse("missing content blocks".into()))?;
            let content = blocks
                .iter()
                .filter(|b| b["type"] == "text")
                .filter_map(|b| b["text"].as_str())
                .collect::<Vec<_>>()
                .join("");
            let usage = &resp["usage"];
            Ok(RawCompletion {
                content,
                input_tokens: token(&usage["input_tokens"]),
                output_tokens: token(&usage["output_tokens"]),
                cached_input_tokens: token(&usage["cache_read_input_tokens"]),
            })
        }
        WireFormat::OpenAiChat => {
            let content = resp["choices"][0]["message"]["content"]
                .as_str()
                .ok_or_else(|| ModelError::MalformedResponse("missing choices[0].message".into()))?
                .to_string();
            let usage = &resp["usage"];
            // OpenAI reports cached tokens inside prompt_tokens; DeepSeek
            // reports them as a separate hit count.
            let cached = usage["prompt_tokens_details"]["cached_tokens"]
                .as_u64()
                .or_else(|| usage["prompt_cache_hit_tokens"].as_u64())
                .unwrap_or(0);
            let prompt = token(&usage["prompt_tokens"]);
            Ok(RawCompletion {
                content,
                input_tokens: prompt.saturating_sub(cached),
                output_tokens: token(&usage["completion_tokens"]),
                cached_input_tokens: cached,
            })
        }
        WireFormat::GeminiGenerate => {
            let parts = resp["candidates"][0]["content"]["parts"]
                .as_array()
                .ok_or_else(|| ModelError::MalformedResponse("missing candidates[0]".into()))?;
            let content = parts
                .iter()
                .filter_map(|p| p["text"].as_str())
                .collect::<Vec<_>>()
                .join("");
            let usage = &resp["usageMetadata"];
            let cached = token(&usage["cachedContentTokenCount"]);
            Ok(RawCompletion {
                content,
                input_tokens: token(&usage["promptTokenCount"]).saturating_sub(cached),
                output_tokens: token(&usage["candidatesTokenCount"]),
                cached_input_tokens: cached,
            })
        }
    }
}

fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &body[..end])
}

fn mentions_unavailable_model(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    lower.contains("model")
        && [
            "not found",
            "not_found",
            "does not exist",
            "deprecated",
            "decommissioned",
            "unavailable",
        ]
        .iter()
        .any(|needle| lower.contains(needle))
}

/// Classify a non-success HTTP status into the error taxonomy.
pub fn classify_status(provider: ProviderId, model_id: &str, status: u16, body: &str) -> ModelError {
    let message = truncate_body(body);
    match status {
        401 | 403 => ModelError::Auth { provider, message },
        // 529 is Anthropic's "overloaded".
        404 | 503 | 529 => ModelError::ModelUnavailable {
            model_id: model_id.to_string(),
            message,
        },
        429 => ModelError::Transport(format!("rate limited ({status}): {message}")),
        400..=499 if mentions_unavailable_model(body) => ModelError::ModelUnavailable {
            model_id: model_id.to_string(),
            message,
        },
        400..=499 => ModelError::Provider { status, message },
        _ => ModelError::Transport(format!("server error ({status}): {message}")),
    }
}
