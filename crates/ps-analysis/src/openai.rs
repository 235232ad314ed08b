//! OpenAI-compatible chat completion client.
//!
//! Works against any endpoint that speaks the `/chat/completions` protocol,
//! streamed (server-sent events) or not.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use ps_core::ApiConfig;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::{AnalysisClient, AnalysisRequest};
use crate::error::AnalysisError;

/// HTTP client for an OpenAI-compatible API.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    stream: bool,
    temperature: Option<f32>,
    timeout_secs: u64,
}

impl OpenAiClient {
    /// Builds a client from the API section of the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::NotConfigured`] when no API key is available
    /// and [`AnalysisError::Http`] if the HTTP client cannot be built.
    pub fn from_config(config: &ApiConfig) -> Result<Self, AnalysisError> {
        let api_key = config.resolved_api_key().ok_or_else(|| {
            AnalysisError::not_configured(format!(
                "no API key set (configure api.api_key or {})",
                ps_core::config::API_KEY_ENV
            ))
        })?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            stream: config.stream,
            temperature: config.temperature,
            timeout_secs: config.timeout_secs,
        })
    }

    fn transport_error(&self, err: reqwest::Error) -> AnalysisError {
        if err.is_timeout() {
            AnalysisError::Timeout(self.timeout_secs)
        } else if err.is_decode() {
            AnalysisError::malformed(err.to_string())
        } else {
            AnalysisError::Http(err)
        }
    }

    async fn read_stream(
        &self,
        response: reqwest::Response,
        request: &AnalysisRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<String, AnalysisError> {
        let mut decoder = SseDecoder::default();
        let mut body = response.bytes_stream();
        loop {
            let next = tokio::select! {
                () = cancel.cancelled() => return Err(AnalysisError::Cancelled),
                next = body.next() => next,
            };
            let Some(bytes) = next else { break };
            let bytes = bytes.map_err(|e| self.transport_error(e))?;
            decoder.feed(&bytes, |delta| request.emit(delta))?;
            if decoder.is_done() {
                break;
            }
        }
        decoder.finish()
    }

    async fn read_full(&self, response: reqwest::Response) -> Result<String, AnalysisError> {
        let text = response.text().await.map_err(|e| self.transport_error(e))?;
        let parsed: ChatResponse =
            serde_json::from_str(&text).map_err(|e| AnalysisError::malformed(e.to_string()))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(AnalysisError::EmptyContent);
        }
        Ok(content)
    }
}

#[async_trait]
impl AnalysisClient for OpenAiClient {
    async fn analyze(
        &self,
        request: AnalysisRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<String, AnalysisError> {
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: request.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: request.prompt,
                },
            ],
            stream: self.stream,
            temperature: self.temperature,
        };

        debug!(
            model = %self.model,
            prompt_len = request.prompt.len(),
            stream = self.stream,
            "sending completion request"
        );

        let send = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send();
        let response = tokio::select! {
            () = cancel.cancelled() => return Err(AnalysisError::Cancelled),
            response = send => response.map_err(|e| self.transport_error(e))?,
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "completion request failed");
            return Err(AnalysisError::from_api(status.as_u16(), &text));
        }

        if self.stream {
            self.read_stream(response, &request, cancel).await
        } else {
            tokio::select! {
                () = cancel.cancelled() => Err(AnalysisError::Cancelled),
                result = self.read_full(response) => result,
            }
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

/// Incremental decoder for `text/event-stream` completion bodies.
#[derive(Debug, Default)]
struct SseDecoder {
    pending: Vec<u8>,
    content: String,
    done: bool,
}

impl SseDecoder {
    /// Feeds raw bytes, calling `on_delta` for each content fragment.
    fn feed(&mut self, bytes: &[u8], mut on_delta: impl FnMut(&str)) -> Result<(), AnalysisError> {
        self.pending.extend_from_slice(bytes);
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let Some(data) = line.trim().strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data == "[DONE]" {
                self.done = true;
                return Ok(());
            }
            if data.is_empty() {
                continue;
            }
            let chunk: StreamChunk =
                serde_json::from_str(data).map_err(|e| AnalysisError::malformed(e.to_string()))?;
            if let Some(error) = chunk.error {
                return Err(AnalysisError::from_api(200, &error.to_string()));
            }
            for choice in chunk.choices {
                if let Some(delta) = choice.delta.content.filter(|d| !d.is_empty()) {
                    on_delta(&delta);
                    self.content.push_str(&delta);
                }
            }
        }
        Ok(())
    }

    const fn is_done(&self) -> bool {
        self.done
    }

    fn finish(self) -> Result<String, AnalysisError> {
        if self.content.trim().is_empty() {
            return Err(AnalysisError::EmptyContent);
        }
        Ok(self.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(decoder: &mut SseDecoder, parts: &[&str]) -> Vec<String> {
        let mut seen = Vec::new();
        for part in parts {
            decoder
                .feed(part.as_bytes(), |d| seen.push(d.to_owned()))
                .unwrap();
        }
        seen
    }

    #[test]
    fn test_sse_decoder_joins_deltas() {
        let mut decoder = SseDecoder::default();
        let seen = feed_all(
            &mut decoder,
            &[
                "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"风险等级\"}}]}\n",
                "\ndata: {\"choices\":[{\"delta\":{\"content\":\": 高危\"}}]}\n\n",
                "data: [DONE]\n\n",
            ],
        );
        assert_eq!(seen, vec!["风险等级", ": 高危"]);
        assert!(decoder.is_done());
        assert_eq!(decoder.finish().unwrap(), "风险等级: 高危");
    }

    #[test]
    fn test_sse_decoder_handles_split_lines() {
        let mut decoder = SseDecoder::default();
        let seen = feed_all(
            &mut decoder,
            &["data: {\"choices\":[{\"del", "ta\":{\"content\":\"ok\"}}]}\n"],
        );
        assert_eq!(seen, vec!["ok"]);
    }

    #[test]
    fn test_sse_decoder_ignores_comments() {
        let mut decoder = SseDecoder::default();
        feed_all(&mut decoder, &[": keep-alive\n", "event: ping\n"]);
        assert!(matches!(decoder.finish(), Err(AnalysisError::EmptyContent)));
    }

    #[test]
    fn test_sse_decoder_malformed_chunk() {
        let mut decoder = SseDecoder::default();
        let err = decoder.feed(b"data: {not json}\n", |_| {}).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_sse_decoder_inline_error() {
        let mut decoder = SseDecoder::default();
        let err = decoder
            .feed(
                b"data: {\"error\":{\"code\":\"data_inspection_failed\"}}\n",
                |_| {},
            )
            .unwrap_err();
        assert!(err.is_non_fatal());
    }

    #[test]
    fn test_from_config_requires_key() {
        let config = ApiConfig {
            api_key: Some(String::new()),
            ..ApiConfig::default()
        };
        // A blank configured key still falls through to the environment.
        if std::env::var(ps_core::config::API_KEY_ENV).is_err() {
            let err = OpenAiClient::from_config(&config).unwrap_err();
            assert!(matches!(err, AnalysisError::NotConfigured(_)));
        }
    }

    #[test]
    fn test_from_config_endpoint() {
        let config = ApiConfig {
            base_url: "http://localhost:8000/v1/".to_owned(),
            api_key: Some("sk-test".to_owned()),
            model: "qwen-plus".to_owned(),
            ..ApiConfig::default()
        };
        let client = OpenAiClient::from_config(&config).unwrap();
        assert_eq!(client.endpoint, "http://localhost:8000/v1/chat/completions");
        assert_eq!(client.model_name(), "qwen-plus");
    }
}
