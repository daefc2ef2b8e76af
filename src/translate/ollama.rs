use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::config::{ClientSettings, GlobalSettings};
use crate::error::{Result, TranslateError};
use super::prompt::{self, ChatRequest};
use super::stream::ChatStreamDecoder;
use super::{ChunkCallback, StreamChunk, Translator};

/// Settings one job translates with. Taken from the settings store when the
/// job starts and never modified afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslationSettings {
    pub endpoint: String,
    pub model: String,
    pub temperature: f32,
    pub custom_prompt: Option<String>,
}

impl From<&GlobalSettings> for TranslationSettings {
    fn from(settings: &GlobalSettings) -> Self {
        Self {
            endpoint: settings.ollama_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            temperature: settings.temperature,
            custom_prompt: settings.custom_prompt.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub models: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

/// Why a single attempt failed. Only `Cancelled` and `ModelNotFound` end the
/// retry loop early.
#[derive(Error, Debug)]
enum AttemptError {
    #[error("Translation cancelled")]
    Cancelled,

    #[error("Model not found")]
    ModelNotFound,

    #[error("Ollama API error: {0}")]
    Status(StatusCode),

    #[error("Request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("{0}")]
    Transport(#[from] reqwest::Error),
}

/// Streaming translation client for an ollama `/api/chat` endpoint.
pub struct OllamaClient {
    client: Client,
    settings: TranslationSettings,
    tuning: ClientSettings,
    token: CancellationToken,
}

impl OllamaClient {
    pub fn new(
        settings: TranslationSettings,
        tuning: ClientSettings,
        token: CancellationToken,
    ) -> Result<Self> {
        let client = Client::builder().build()?;

        Ok(Self {
            client,
            settings,
            tuning,
            token,
        })
    }

    pub fn settings(&self) -> &TranslationSettings {
        &self.settings
    }

    /// Probe `/api/tags`. Any failure counts as not connected.
    pub async fn check_connection(&self) -> ConnectionStatus {
        probe(&self.client, &self.settings.endpoint, self.tuning.probe_timeout()).await
    }

    pub async fn available_models(&self) -> Vec<String> {
        self.check_connection().await.models
    }

    /// One streaming request. Content deltas are passed to `on_chunk` as they
    /// are decoded; the concatenation of all deltas is returned.
    async fn attempt(
        &self,
        request: &ChatRequest,
        on_chunk: &mut (dyn FnMut(StreamChunk<'_>) + Send),
    ) -> std::result::Result<String, AttemptError> {
        let guard = self.token.register_request();
        let url = format!("{}/api/chat", self.settings.endpoint);

        debug!("Sending translation request to: {}", url);

        let send = self.client.post(&url).json(request).send();
        let response = tokio::select! {
            biased;
            _ = guard.aborted() => return Err(AttemptError::Cancelled),
            response = send => response?,
        };

        if !response.status().is_success() {
            let status = response.status();
            let error_text = tokio::select! {
                biased;
                _ = guard.aborted() => return Err(AttemptError::Cancelled),
                body = response.text() => body.unwrap_or_default(),
            };
            if is_model_not_found(&error_text) {
                return Err(AttemptError::ModelNotFound);
            }
            debug!("Ollama API error {}: {}", status, error_text);
            return Err(AttemptError::Status(status));
        }

        let mut stream = response.bytes_stream();
        let mut decoder = ChatStreamDecoder::new();
        let mut full_text = String::new();

        loop {
            if self.token.is_cancelled() {
                return Err(AttemptError::Cancelled);
            }

            let next = tokio::select! {
                biased;
                _ = guard.aborted() => return Err(AttemptError::Cancelled),
                next = stream.next() => next,
            };

            let Some(bytes) = next else { break };
            for delta in decoder.push(&bytes?) {
                full_text.push_str(&delta);
                on_chunk(StreamChunk {
                    delta: &delta,
                    accumulated: &full_text,
                });
            }
        }

        if let Some(delta) = decoder.finish() {
            full_text.push_str(&delta);
            on_chunk(StreamChunk {
                delta: &delta,
                accumulated: &full_text,
            });
        }

        Ok(full_text)
    }

    /// Run attempts until one succeeds, a non-retryable failure occurs, or
    /// retries run out.
    async fn translate_with_retries(
        &self,
        request: &ChatRequest,
        on_chunk: &mut (dyn FnMut(StreamChunk<'_>) + Send),
    ) -> std::result::Result<String, TranslateError> {
        let max_retries = self.tuning.max_retries;
        let attempts = max_retries.saturating_add(1);
        let timeout = self.tuning.request_timeout();
        let mut last_error: Option<AttemptError> = None;

        for attempt in 0..=max_retries {
            if self.token.is_cancelled() {
                return Err(TranslateError::Cancelled);
            }

            let outcome = match tokio::time::timeout(timeout, self.attempt(request, &mut *on_chunk)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(AttemptError::Timeout(timeout)),
            };

            match outcome {
                Ok(translation) => {
                    debug!("Translation finished on attempt {}", attempt.saturating_add(1));
                    return Ok(translation);
                }
                Err(AttemptError::Cancelled) => return Err(TranslateError::Cancelled),
                Err(AttemptError::ModelNotFound) => {
                    warn!("Model '{}' is not available on {}", self.settings.model, self.settings.endpoint);
                    return Err(TranslateError::ModelNotFound {
                        model: self.settings.model.clone(),
                    });
                }
                Err(e) => {
                    if self.token.is_cancelled() {
                        return Err(TranslateError::Cancelled);
                    }
                    warn!("Attempt {}/{} failed: {}", attempt.saturating_add(1), attempts, e);
                    last_error = Some(e);
                }
            }

            if attempt < max_retries {
                tokio::time::sleep(backoff_delay(self.tuning.retry_base_delay(), attempt)).await;
            }
        }

        let status = self.check_connection().await;
        if !status.connected {
            warn!("Ollama at {} is unreachable", self.settings.endpoint);
            return Err(TranslateError::ServiceOffline);
        }

        let message = last_error
            .map(|e| e.to_string())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| "Translation failed".to_string());
        Err(TranslateError::NetworkError(message))
    }
}

#[async_trait]
impl Translator for OllamaClient {
    async fn translate(
        &self,
        text: &str,
        target_language: &str,
        source_language: Option<&str>,
        on_chunk: Option<ChunkCallback<'_>>,
    ) -> std::result::Result<String, TranslateError> {
        let request = prompt::chat_request(
            &self.settings.model,
            self.settings.temperature,
            self.settings.custom_prompt.as_deref(),
            text,
            target_language,
            source_language,
        );

        debug!("Translating {} chars to {}", text.len(), target_language);

        match on_chunk {
            Some(callback) => self.translate_with_retries(&request, callback).await,
            None => {
                self.translate_with_retries(&request, &mut |_: StreamChunk<'_>| {})
                    .await
            }
        }
    }
}

/// Delay before the retry that follows `attempt` (0-based): the base delay
/// times the retry number, saturating instead of overflowing.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.checked_mul(attempt.saturating_add(1))
        .unwrap_or(Duration::MAX)
}

/// The endpoint has no structured error code for a missing model, so the
/// error body is matched instead.
fn is_model_not_found(body: &str) -> bool {
    body.contains("model") && body.contains("not found")
}

async fn probe(client: &Client, endpoint: &str, timeout: Duration) -> ConnectionStatus {
    let url = format!("{}/api/tags", endpoint.trim_end_matches('/'));

    let response = match client.get(&url).timeout(timeout).send().await {
        Ok(response) if response.status().is_success() => response,
        Ok(response) => {
            debug!("Ollama probe returned {}", response.status());
            return ConnectionStatus::default();
        }
        Err(e) => {
            debug!("Ollama probe failed: {}", e);
            return ConnectionStatus::default();
        }
    };

    match response.json::<TagsResponse>().await {
        Ok(tags) => ConnectionStatus {
            connected: true,
            models: tags.models.into_iter().map(|m| m.name).collect(),
        },
        Err(e) => {
            debug!("Failed to parse model list: {}", e);
            ConnectionStatus::default()
        }
    }
}

/// Probe an endpoint without building a full client.
pub async fn check_connection(endpoint: &str, timeout: Duration) -> ConnectionStatus {
    let status = probe(&Client::new(), endpoint, timeout).await;
    if status.connected {
        info!("Ollama at {} is up with {} models", endpoint, status.models.len());
    }
    status
}
