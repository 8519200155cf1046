//! Extraction provider adapter: recognized text → [`PatentRecord`].
//!
//! Every provider receives the same system instruction and the same prompt
//! (see [`crate::prompts`]). The backends differ only in HTTP mechanics:
//! endpoint, auth header, request/response envelope and how JSON mode is
//! requested. Those mechanics sit behind [`CompletionBackend`]; everything
//! else (truncation, repair, record mapping) lives once in [`Extractor`].
//!
//! Any backend fault is converted into an [`ExtractionFailure`] here and
//! never escapes as a panic or a fatal error.

mod claude;
mod gemini;
mod openai;

pub use claude::ClaudeBackend;
pub use gemini::GeminiBackend;
pub use openai::OpenAiBackend;

use crate::config::{PipelineConfig, ProviderKind, ProviderSettings};
use crate::error::{FileError, PatentError};
use crate::prompts::{extraction_prompt, EXTRACTION_SYSTEM_PROMPT};
use crate::record::PatentRecord;
use crate::repair::{repair_and_parse, RepairError};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Longest slice of an error body kept in a [`BackendError`].
const MAX_ERROR_BODY_CHARS: usize = 300;

/// One chat-style completion call against a provider.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &str;

    /// Model identifier sent with each request.
    fn model(&self) -> &str;

    /// Send `system` + `prompt`, return the model's raw text reply.
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, BackendError>;
}

/// Transport and protocol failures of a single backend call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("request timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("authentication rejected (HTTP {status}): {body}")]
    Auth { status: u16, body: String },

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body did not have the provider's documented shape.
    #[error("unexpected response envelope: {0}")]
    Envelope(String),
}

/// Why a file produced no record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionFailure {
    /// The backend could not produce a reply.
    #[error("{0}")]
    Backend(#[from] BackendError),

    /// The reply could not be turned into a record.
    #[error("{0}")]
    Malformed(String),
}

impl ExtractionFailure {
    /// Map onto the per-file error taxonomy.
    pub fn into_file_error(self, file: impl Into<String>) -> FileError {
        let file = file.into();
        match self {
            ExtractionFailure::Backend(e) => FileError::CollaboratorUnavailable {
                file,
                detail: e.to_string(),
            },
            ExtractionFailure::Malformed(detail) => FileError::MalformedReply { file, detail },
        }
    }
}

impl From<RepairError> for ExtractionFailure {
    fn from(e: RepairError) -> Self {
        ExtractionFailure::Malformed(e.to_string())
    }
}

/// Turns recognized certificate text into a [`PatentRecord`].
///
/// Cheap to clone; the backend is shared.
#[derive(Clone)]
pub struct Extractor {
    backend: Arc<dyn CompletionBackend>,
    max_input_chars: usize,
}

impl Extractor {
    pub fn new(backend: Arc<dyn CompletionBackend>, max_input_chars: usize) -> Self {
        Self {
            backend,
            max_input_chars: max_input_chars.max(1),
        }
    }

    /// Build the backend for `settings` and wrap it.
    pub fn from_settings(
        settings: &ProviderSettings,
        config: &PipelineConfig,
    ) -> Result<Self, PatentError> {
        let backend = build_backend(settings, config)?;
        Ok(Self::new(backend, config.max_input_chars))
    }

    pub fn provider_name(&self) -> &str {
        self.backend.name()
    }

    pub fn model(&self) -> &str {
        self.backend.model()
    }

    /// Extract one record from `text`.
    ///
    /// The returned record has `source_path` set. On failure nothing is
    /// returned; there is no heuristic fallback.
    pub async fn extract(
        &self,
        text: &str,
        source_path: &Path,
    ) -> Result<PatentRecord, ExtractionFailure> {
        let label = source_path.display().to_string();
        let start = Instant::now();
        let prompt = extraction_prompt(truncate_chars(text, self.max_input_chars));

        let result = self.request_record(&prompt).await;
        match result {
            Ok(mut record) => {
                debug!(
                    "{}: extracted via {} ({}) in {:?}",
                    label,
                    self.backend.name(),
                    self.backend.model(),
                    start.elapsed()
                );
                record.source_path = source_path.to_string_lossy().into_owned();
                Ok(record)
            }
            Err(e) => {
                warn!("{}: {} extraction failed: {}", label, self.backend.name(), e);
                Err(e)
            }
        }
    }

    async fn request_record(&self, prompt: &str) -> Result<PatentRecord, ExtractionFailure> {
        let reply = self
            .backend
            .complete(EXTRACTION_SYSTEM_PROMPT, prompt)
            .await?;
        let object = repair_and_parse(&reply)?;
        serde_json::from_value::<PatentRecord>(Value::Object(object))
            .map_err(|e| ExtractionFailure::Malformed(format!("record fields: {e}")))
    }
}

/// Build the backend for a resolved provider.
pub fn build_backend(
    settings: &ProviderSettings,
    config: &PipelineConfig,
) -> Result<Arc<dyn CompletionBackend>, PatentError> {
    let client = http_client(config.api_timeout_secs)?;
    let backend: Arc<dyn CompletionBackend> = match settings.kind {
        ProviderKind::Gemini => Arc::new(GeminiBackend::new(client, settings, config)),
        ProviderKind::Claude => Arc::new(ClaudeBackend::new(client, settings, config)),
        ProviderKind::OpenAi => Arc::new(OpenAiBackend::new(client, settings, config)),
    };
    debug!(
        "Extraction backend: {} (model {})",
        backend.name(),
        backend.model()
    );
    Ok(backend)
}

fn http_client(timeout_secs: u64) -> Result<HttpClient, PatentError> {
    let inner = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| PatentError::Internal(format!("HTTP client: {e}")))?;
    Ok(HttpClient {
        inner,
        timeout_secs,
    })
}

/// A `reqwest` client plus the timeout it was built with, for error reports.
#[derive(Clone)]
pub(crate) struct HttpClient {
    pub(crate) inner: reqwest::Client,
    timeout_secs: u64,
}

impl HttpClient {
    /// Send a prepared request and decode a JSON response envelope.
    pub(crate) async fn send_json<R: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<R, BackendError> {
        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error(e))?;

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(BackendError::Auth {
                status: status.as_u16(),
                body: truncate_chars(&body, MAX_ERROR_BODY_CHARS).to_string(),
            });
        }
        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                body: truncate_chars(&body, MAX_ERROR_BODY_CHARS).to_string(),
            });
        }

        serde_json::from_str(&body).map_err(|e| BackendError::Envelope(e.to_string()))
    }

    fn transport_error(&self, e: reqwest::Error) -> BackendError {
        if e.is_timeout() {
            BackendError::Timeout {
                secs: self.timeout_secs,
            }
        } else {
            BackendError::Transport(e.to_string())
        }
    }
}

/// First `max_chars` characters of `s`, cut on a char boundary.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
