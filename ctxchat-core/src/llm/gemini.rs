//! Gemini HTTP client: wire types plus the collaborator trait impls.
//!
//! One client implements both [`TokenCounter`] (`:countTokens`) and
//! [`GenerationBackend`] (`:streamGenerateContent` / `:generateContent`).
//! Replies come back as raw chunked bytes; decoding happens downstream in
//! [`crate::stream`].

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client as HttpClient, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SafetySetting;
use crate::config::constants::urls;

use super::provider::{
    ByteStream, GenerationBackend, GenerationRequest, LLMError, Message, TokenCounter,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Part {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    pub role: String,
    pub parts: Vec<Part>,
}

impl Content {
    fn text(role: &str, text: &str) -> Self {
        Self {
            role: role.to_string(),
            parts: vec![Part {
                text: text.to_string(),
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub safety_settings: Vec<SafetySetting>,
}

#[derive(Debug, Clone, Serialize)]
struct CountTokensRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CountTokensResponse {
    total_tokens: usize,
}

/// HTTP client for the Gemini API.
pub struct GeminiClient {
    http: HttpClient,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: HttpClient::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: urls::GEMINI_API_BASE.to_string(),
        }
    }

    /// Override the API base URL, e.g. for a local proxy.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn contents_from_messages(messages: &[Message]) -> Vec<Content> {
        messages
            .iter()
            .map(|message| Content::text(message.role.as_str(), &message.text))
            .collect()
    }

    fn network_error(err: &reqwest::Error) -> LLMError {
        LLMError::NetworkError {
            message: format!("Gemini request failed: {err}"),
        }
    }

    fn http_error(status: StatusCode, body: &str, retry_after: Option<String>) -> LLMError {
        if status == StatusCode::TOO_MANY_REQUESTS {
            return LLMError::RateLimit { retry_after };
        }
        LLMError::ApiError {
            message: format!("Gemini returned HTTP {status}: {body}"),
        }
    }

    async fn post_json<T: Serialize>(
        &self,
        url: &str,
        body: &T,
    ) -> Result<reqwest::Response, LLMError> {
        let response = self
            .http
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|err| Self::network_error(&err))?;

        if !response.status().is_success() {
            let status = response.status();
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned);
            let body = response.text().await.unwrap_or_default();
            return Err(Self::http_error(status, &body, retry_after));
        }

        Ok(response)
    }
}

#[async_trait]
impl TokenCounter for GeminiClient {
    async fn count(&self, text: &str) -> Result<usize, LLMError> {
        self.count_batch(&[text]).await
    }

    async fn count_batch(&self, texts: &[&str]) -> Result<usize, LLMError> {
        let url = format!("{}/models/{}:countTokens", self.base_url, self.model);
        let request = CountTokensRequest {
            contents: texts
                .iter()
                .map(|text| Content::text("user", text))
                .collect(),
        };

        debug!(texts = texts.len(), "requesting exact token count");
        let response = self.post_json(&url, &request).await?;
        let parsed: CountTokensResponse =
            response.json().await.map_err(|err| LLMError::ApiError {
                message: format!("Gemini count response failed to parse: {err}"),
            })?;
        Ok(parsed.total_tokens)
    }
}

#[async_trait]
impl GenerationBackend for GeminiClient {
    async fn stream_generate(&self, request: &GenerationRequest) -> Result<ByteStream, LLMError> {
        let method = if request.settings.stream {
            "streamGenerateContent"
        } else {
            "generateContent"
        };
        let url = format!("{}/models/{}:{}", self.base_url, request.model, method);

        let settings = &request.settings;
        let body = GenerateContentRequest {
            contents: Self::contents_from_messages(&request.messages),
            generation_config: Some(GenerationConfig {
                temperature: settings.temperature,
                top_p: settings.top_p,
                top_k: settings.top_k,
                max_output_tokens: settings.max_output_tokens,
                stop_sequences: settings.stop_sequences.clone(),
            }),
            safety_settings: settings.safety_settings.clone(),
        };

        debug!(
            model = %request.model,
            messages = request.messages.len(),
            method,
            "starting generation request"
        );
        let response = self.post_json(&url, &body).await?;

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|err| Self::network_error(&err)));
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GenerationSettings;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn generate_request_serializes_camel_case() {
        let request = GenerateContentRequest {
            contents: vec![Content::text("user", "hello")],
            generation_config: Some(GenerationConfig {
                temperature: Some(0.5),
                top_p: None,
                top_k: None,
                max_output_tokens: Some(256),
                stop_sequences: vec!["END".to_string()],
            }),
            safety_settings: vec![SafetySetting::new("HARM_CATEGORY_HARASSMENT", "BLOCK_NONE")],
        };

        let value = serde_json::to_value(&request).expect("serialize");
        assert_eq!(
            value,
            json!({
                "contents": [{"role": "user", "parts": [{"text": "hello"}]}],
                "generationConfig": {
                    "temperature": 0.5,
                    "maxOutputTokens": 256,
                    "stopSequences": ["END"]
                },
                "safetySettings": [
                    {"category": "HARM_CATEGORY_HARASSMENT", "threshold": "BLOCK_NONE"}
                ]
            })
        );
    }

    #[test]
    fn count_response_parses_total_tokens() {
        let parsed: CountTokensResponse =
            serde_json::from_str(r#"{"totalTokens": 42}"#).expect("parse");
        assert_eq!(parsed.total_tokens, 42);
    }

    #[test]
    fn messages_map_to_wire_roles() {
        let contents = GeminiClient::contents_from_messages(&[
            Message::user("question"),
            Message::model("answer"),
        ]);
        assert_eq!(contents[0].role, "user");
        assert_eq!(contents[1].role, "model");
        assert_eq!(contents[1].parts[0].text, "answer");
    }

    #[test]
    fn default_settings_omit_unset_generation_fields() {
        let settings = GenerationSettings::default();
        let config = GenerationConfig {
            temperature: settings.temperature,
            top_p: settings.top_p,
            top_k: settings.top_k,
            max_output_tokens: settings.max_output_tokens,
            stop_sequences: settings.stop_sequences,
        };
        let value = serde_json::to_value(&config).expect("serialize");
        assert_eq!(value, json!({}));
    }
}
