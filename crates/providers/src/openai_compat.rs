//! OpenAI-compatible provider implementation.
//!
//! Works with: OpenAI, OpenRouter, Ollama, vLLM, and any endpoint exposing
//! `/chat/completions` with the vision message format.
//!
//! Supports:
//! - Multimodal chat completions (text and `image_url` parts)
//! - Model listing and health checks

use async_trait::async_trait;
use chatterbox_core::error::ProviderError;
use chatterbox_core::message::{ContentPart, RoleBlock};
use chatterbox_core::provider::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// An OpenAI-compatible model provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a provider whose HTTP calls give up after `timeout`.
    pub fn with_timeout(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        })
    }

    /// Convert role blocks to OpenAI API messages.
    ///
    /// A block holding one text part is sent as a plain string; anything
    /// else becomes a parts array.
    fn to_api_messages(blocks: &[RoleBlock]) -> Vec<ApiMessage> {
        blocks
            .iter()
            .map(|b| {
                let content = match b.parts.as_slice() {
                    [ContentPart::Text { text }] => ApiContent::Text(text.clone()),
                    parts => ApiContent::Parts(
                        parts
                            .iter()
                            .map(|p| match p {
                                ContentPart::Text { text } => ApiPart::Text { text: text.clone() },
                                ContentPart::Image { url } => ApiPart::ImageUrl {
                                    image_url: ApiImageUrl { url: url.clone() },
                                },
                            })
                            .collect(),
                    ),
                };
                ApiMessage {
                    role: b.role.as_str().to_string(),
                    content,
                }
            })
            .collect()
    }

    fn map_transport_error(e: reqwest::Error) -> ProviderError {
        if e.is_timeout() {
            ProviderError::Timeout(e.to_string())
        } else {
            ProviderError::Network(e.to_string())
        }
    }

    /// Map a non-200 status to a provider error.
    fn map_status(status: u16, retry_after: Option<u64>, body: String, model: &str) -> ProviderError {
        match status {
            429 => ProviderError::RateLimited {
                retry_after_secs: retry_after.unwrap_or(5),
            },
            401 | 403 => ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ),
            404 => ProviderError::ModelNotFound(model.to_string()),
            _ => ProviderError::ApiError {
                status_code: status,
                message: body,
            },
        }
    }

    fn parse_response(api_response: ApiResponse) -> Result<ProviderResponse, ProviderError> {
        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::EmptyCompletion("no choices in response".into()))?;

        let text = choice
            .message
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ProviderError::EmptyCompletion("completion has no text".into()))?;

        let usage = api_response.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(ProviderResponse {
            text,
            model: api_response.model,
            usage,
        })
    }
}

#[async_trait]
impl chatterbox_core::Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.blocks),
            "temperature": request.temperature,
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        debug!(
            provider = %self.name,
            model = %request.model,
            blocks = request.blocks.len(),
            "Sending completion request"
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        let status = response.status().as_u16();

        if status != 200 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider returned error");
            return Err(Self::map_status(status, retry_after, error_body, &request.model));
        }

        let api_response: ApiResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        Self::parse_response(api_response)
    }

    async fn list_models(&self) -> std::result::Result<Vec<String>, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        if !response.status().is_success() {
            return Ok(Vec::new());
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let mut models: Vec<String> = body["data"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| m["id"].as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();
        models.sort();

        Ok(models)
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        Ok(response.status().is_success())
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: ApiContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ApiContent {
    Text(String),
    Parts(Vec<ApiPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiPart {
    Text { text: String },
    ImageUrl { image_url: ApiImageUrl },
}

#[derive(Debug, Serialize)]
struct ApiImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatterbox_core::Provider;
    use chatterbox_core::message::Role;

    #[test]
    fn constructor_trims_trailing_slash() {
        let p = OpenAiCompatProvider::with_timeout(
            "local",
            "http://localhost:11434/v1/",
            "k",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(p.name(), "local");
        assert_eq!(p.base_url, "http://localhost:11434/v1");
    }

    #[test]
    fn single_text_block_serializes_as_string() {
        let msgs = OpenAiCompatProvider::to_api_messages(&[RoleBlock::system("Be brief")]);
        let json = serde_json::to_value(&msgs).unwrap();
        assert_eq!(json[0]["role"], "system");
        assert_eq!(json[0]["content"], "Be brief");
    }

    #[test]
    fn image_block_serializes_as_parts() {
        let block = RoleBlock {
            role: Role::User,
            parts: vec![
                ContentPart::Text {
                    text: "Bob: what is this".into(),
                },
                ContentPart::Image {
                    url: "https://cdn/x.jpg".into(),
                },
            ],
        };
        let json = serde_json::to_value(OpenAiCompatProvider::to_api_messages(&[block])).unwrap();
        let parts = json[0]["content"].as_array().unwrap();
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[0]["text"], "Bob: what is this");
        assert_eq!(parts[1]["type"], "image_url");
        assert_eq!(parts[1]["image_url"]["url"], "https://cdn/x.jpg");
    }

    #[test]
    fn lone_image_still_uses_parts() {
        let block = RoleBlock {
            role: Role::User,
            parts: vec![ContentPart::Image {
                url: "https://cdn/y.png".into(),
            }],
        };
        let json = serde_json::to_value(OpenAiCompatProvider::to_api_messages(&[block])).unwrap();
        assert!(json[0]["content"].is_array());
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(
            OpenAiCompatProvider::map_status(429, Some(12), String::new(), "m"),
            ProviderError::RateLimited {
                retry_after_secs: 12
            }
        ));
        assert!(matches!(
            OpenAiCompatProvider::map_status(401, None, String::new(), "m"),
            ProviderError::AuthenticationFailed(_)
        ));
        assert!(matches!(
            OpenAiCompatProvider::map_status(404, None, String::new(), "gpt-x"),
            ProviderError::ModelNotFound(m) if m == "gpt-x"
        ));
        assert!(matches!(
            OpenAiCompatProvider::map_status(500, None, "boom".into(), "m"),
            ProviderError::ApiError { status_code: 500, .. }
        ));
    }

    #[test]
    fn parse_completion() {
        let raw = r#"{
            "model": "gpt-4o-mini-2024-07-18",
            "choices": [{"message": {"role": "assistant", "content": "Hello!"}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 2, "total_tokens": 12}
        }"#;
        let resp = OpenAiCompatProvider::parse_response(serde_json::from_str(raw).unwrap()).unwrap();
        assert_eq!(resp.text, "Hello!");
        assert_eq!(resp.model, "gpt-4o-mini-2024-07-18");
        assert_eq!(resp.usage.unwrap().total_tokens, 12);
    }

    #[test]
    fn empty_completion_is_an_error() {
        let raw = r#"{"model": "m", "choices": [{"message": {"content": "  "}}]}"#;
        let err = OpenAiCompatProvider::parse_response(serde_json::from_str(raw).unwrap()).unwrap_err();
        assert!(matches!(err, ProviderError::EmptyCompletion(_)));

        let raw = r#"{"model": "m", "choices": []}"#;
        assert!(OpenAiCompatProvider::parse_response(serde_json::from_str(raw).unwrap()).is_err());
    }
}
