//! HTTP client for the Ollama server.
//!
//! Covers the four outbound operations: chat generation (with a bounded
//! two-attempt state machine), model catalog listing (single retry),
//! a reachability probe, and optional server autostart.
//!
//! # Retry strategy
//!
//! Attempt 1 of a chat runs with a long timeout; only a failure classified
//! as [`ChatErrorKind::TransientConnection`] (reset, DNS failure, abrupt
//! close) earns a single second attempt after a 1 s delay, with a shorter
//! timeout and the same payload. Timeouts, model-not-found rejections, and
//! everything else are terminal on the first attempt. The catalog fetch
//! follows the same classification with 10 s / 5 s timeouts and degrades
//! to an empty list plus an error detail instead of failing the caller.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, warn};

use crate::config::SettingsStore;
use crate::models::{ChatErrorKind, ModelDescriptor, ModelList, SamplingOptions};

/// Model id that older settings files still carry; no longer pullable.
pub const STALE_MODEL: &str = "llama3.2:latest";
/// Substitute written back to settings when [`STALE_MODEL`] is configured.
pub const FALLBACK_MODEL: &str = "phi4-mini:latest";

/// Fixed persona preamble for every prompt.
const SYSTEM_PROMPT: &str = "Du bist ein hilfsbereit deutscher KI-Assistent. \
                             Antworte immer auf Deutsch und sei höflich und präzise.";

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const AUTOSTART_WAIT: Duration = Duration::from_secs(3);

/// Per-operation request deadlines and the inter-attempt delay.
///
/// The defaults match a local Ollama instance; embedding hosts can tune
/// them through [`OllamaClient::with_timeouts`].
#[derive(Debug, Clone, Copy)]
pub struct RequestTimeouts {
    /// First chat attempt.
    pub chat: Duration,
    /// Second chat attempt after a transient failure.
    pub chat_retry: Duration,
    /// First catalog fetch.
    pub tags: Duration,
    /// Second catalog fetch after a transient failure.
    pub tags_retry: Duration,
    /// Pause between the first and second attempt.
    pub retry_delay: Duration,
}

impl Default for RequestTimeouts {
    fn default() -> Self {
        Self {
            chat: Duration::from_secs(120),
            chat_retry: Duration::from_secs(60),
            tags: Duration::from_secs(10),
            tags_retry: Duration::from_secs(5),
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Request-layer failure with its classification.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Modell \"{model}\" nicht gefunden. Verfügbare Modelle: phi4-mini:latest, gemma3:latest. Bitte Einstellungen prüfen.")]
    ModelNotFound { model: String },
    #[error("{0}")]
    Transient(String),
    #[error("{0}")]
    Timeout(String),
    #[error("{0}")]
    Unknown(String),
}

impl ChatError {
    pub fn kind(&self) -> ChatErrorKind {
        match self {
            ChatError::ModelNotFound { .. } => ChatErrorKind::ModelNotFound,
            ChatError::Transient(_) => ChatErrorKind::TransientConnection,
            ChatError::Timeout(_) => ChatErrorKind::Timeout,
            ChatError::Unknown(_) => ChatErrorKind::Unknown,
        }
    }
}

/// Client for the Ollama HTTP API.
///
/// Holds the injected [`SettingsStore`]; the server address and model id
/// are re-read from it at the start of every call, and the stale-model
/// correction is written back through it.
pub struct OllamaClient {
    http: reqwest::Client,
    settings: Arc<dyn SettingsStore>,
    timeouts: RequestTimeouts,
}

impl OllamaClient {
    pub fn new(settings: Arc<dyn SettingsStore>) -> Result<Self> {
        Self::with_timeouts(settings, RequestTimeouts::default())
    }

    pub fn with_timeouts(
        settings: Arc<dyn SettingsStore>,
        timeouts: RequestTimeouts,
    ) -> Result<Self> {
        // Timeouts are per request; attempts 1 and 2 use different ones.
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            settings,
            timeouts,
        })
    }

    /// Build the prompt, embedding normalized document text when present.
    pub fn build_prompt(message: &str, context: Option<&str>) -> String {
        match context {
            Some(context) => format!(
                "{}\n\nKontext aus hochgeladener Datei:\n{}\n\nBenutzer-Frage: {}\n\nAntworte auf Deutsch:",
                SYSTEM_PROMPT, context, message
            ),
            None => format!("{}\n\nBenutzer: {}\n\nAssistent:", SYSTEM_PROMPT, message),
        }
    }

    /// Resolve the model id for this call, correcting a stale configured id
    /// and persisting the correction for subsequent calls.
    fn resolve_model(&self) -> Result<String, ChatError> {
        let configured = self.settings.server().default_model;
        if configured == STALE_MODEL {
            warn!(stale = %configured, fallback = FALLBACK_MODEL, "correcting stale model id");
            self.settings
                .set_default_model(FALLBACK_MODEL)
                .map_err(|e| ChatError::Unknown(format!("Einstellungen nicht speicherbar: {}", e)))?;
            Ok(FALLBACK_MODEL.to_string())
        } else {
            Ok(configured)
        }
    }

    /// Perform one chat completion, with the single transient-failure retry.
    pub async fn generate(&self, message: &str, context: Option<&str>) -> Result<String, ChatError> {
        let server = self.settings.server();
        let model = self.resolve_model()?;
        let prompt = Self::build_prompt(message, context);
        let url = format!("{}/api/generate", server.base_url);
        let body = serde_json::json!({
            "model": model,
            "prompt": prompt,
            "stream": false,
            "options": SamplingOptions::default(),
        });

        debug!(%model, context = context.is_some(), "sending generate request");
        match self
            .post_generate(&url, &body, &model, self.timeouts.chat)
            .await
        {
            Ok(response) => Ok(response),
            Err(err) if err.kind() == ChatErrorKind::TransientConnection => {
                debug!(error = %err, "transient failure, retrying once");
                tokio::time::sleep(self.timeouts.retry_delay).await;
                self.post_generate(&url, &body, &model, self.timeouts.chat_retry)
                    .await
                    // A failed second attempt reports as transient with the
                    // second error's detail, whatever its own class.
                    .map_err(|second| ChatError::Transient(second.to_string()))
            }
            Err(err) => Err(err),
        }
    }

    async fn post_generate(
        &self,
        url: &str,
        body: &serde_json::Value,
        model: &str,
        timeout: Duration,
    ) -> Result<String, ChatError> {
        let response = self
            .http
            .post(url)
            .header("Connection", "close")
            .json(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        if status.is_success() {
            let json: serde_json::Value = response
                .json()
                .await
                .map_err(|e| ChatError::Unknown(error_chain(&e)))?;
            return Ok(json
                .get("response")
                .and_then(|r| r.as_str())
                .unwrap_or_default()
                .to_string());
        }

        let body_text = response.text().await.unwrap_or_default();
        let server_error = serde_json::from_str::<serde_json::Value>(&body_text)
            .ok()
            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
            .unwrap_or(body_text);

        if server_error.contains("not found") {
            return Err(ChatError::ModelNotFound {
                model: model.to_string(),
            });
        }
        Err(ChatError::Unknown(format!(
            "{} (HTTP {})",
            server_error,
            status.as_u16()
        )))
    }

    /// List models known to the server.
    ///
    /// Soft-fails: a terminal failure yields an empty list plus an error
    /// detail, never an `Err`.
    pub async fn list_models(&self) -> ModelList {
        let server = self.settings.server();
        let url = format!("{}/api/tags", server.base_url);

        match self.fetch_tags(&url, self.timeouts.tags).await {
            Ok(models) => ModelList {
                models,
                error: None,
            },
            Err(err) if err.kind() == ChatErrorKind::TransientConnection => {
                debug!(error = %err, "transient failure listing models, retrying once");
                tokio::time::sleep(self.timeouts.retry_delay).await;
                match self.fetch_tags(&url, self.timeouts.tags_retry).await {
                    Ok(models) => ModelList {
                        models,
                        error: None,
                    },
                    Err(second) => ModelList {
                        models: Vec::new(),
                        error: Some(second.to_string()),
                    },
                }
            }
            Err(err) => ModelList {
                models: Vec::new(),
                error: Some(err.to_string()),
            },
        }
    }

    async fn fetch_tags(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<Vec<ModelDescriptor>, ChatError> {
        let response = self
            .http
            .get(url)
            .header("Connection", "close")
            .timeout(timeout)
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(ChatError::Unknown(format!(
                "{} (HTTP {})",
                body_text,
                status.as_u16()
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ChatError::Unknown(error_chain(&e)))?;
        // An absent array means an empty catalog response, not an error.
        match json.get("models") {
            Some(models) => serde_json::from_value(models.clone())
                .map_err(|e| ChatError::Unknown(format!("ungültige Modell-Liste: {}", e))),
            None => Ok(Vec::new()),
        }
    }

    /// Probe the server's listing endpoint.
    pub async fn check_server_reachable(&self) -> bool {
        let server = self.settings.server();
        let url = format!("{}/api/tags", server.base_url);
        match self.http.get(&url).timeout(PROBE_TIMEOUT).send().await {
            Ok(response) => {
                debug!(status = %response.status(), "server probe");
                response.status().is_success()
            }
            Err(err) => {
                debug!(error = %error_chain(&err), "server probe failed");
                false
            }
        }
    }

    /// Probe the server and, when unreachable and `auto_start` is set,
    /// spawn a detached `ollama serve` and probe again after a grace
    /// period. Every failure path is a soft `false`.
    pub async fn ensure_server_running(&self) -> bool {
        if self.check_server_reachable().await {
            return true;
        }
        if !self.settings.server().auto_start {
            return false;
        }

        debug!("server unreachable, attempting autostart");
        let spawned = tokio::process::Command::new("ollama")
            .arg("serve")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        match spawned {
            Ok(_child) => {
                tokio::time::sleep(AUTOSTART_WAIT).await;
                self.check_server_reachable().await
            }
            Err(err) => {
                warn!(error = %err, "could not start ollama");
                false
            }
        }
    }
}

/// Classify a request-level (pre-response) failure.
///
/// Connection resets, refused/failed connects, DNS failures, and abrupt
/// closes ("socket hang up") are transient; a fired timeout is its own
/// terminal kind.
fn classify_send_error(err: reqwest::Error) -> ChatError {
    let detail = error_chain(&err);
    if err.is_timeout() {
        return ChatError::Timeout(detail);
    }
    if err.is_connect() {
        return ChatError::Transient(detail);
    }

    let mut source = std::error::Error::source(&err);
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            match io.kind() {
                std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::NotConnected
                | std::io::ErrorKind::UnexpectedEof => return ChatError::Transient(detail),
                _ => {}
            }
        }
        source = cause.source();
    }

    // hyper reports a server closing mid-response as a plain message.
    if detail.contains("connection closed before message completed")
        || detail.contains("IncompleteMessage")
    {
        return ChatError::Transient(detail);
    }
    ChatError::Unknown(detail)
}

/// Join an error with its source chain into one human-readable line.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
