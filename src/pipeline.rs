//! The host-facing operation surface.
//!
//! [`Notebook`] is what the shell layer talks to: it composes the
//! extractor, the normalizer, and the Ollama client behind the five
//! operations the host calls, and converts every failure into a result
//! value — nothing here returns `Err` to the host.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::client::OllamaClient;
use crate::config::SettingsStore;
use crate::extract;
use crate::models::{ChatOutcome, DocumentText, ExtractionOutcome, ModelList};
use crate::normalize;

pub struct Notebook {
    client: OllamaClient,
}

impl Notebook {
    pub fn new(settings: Arc<dyn SettingsStore>) -> Result<Self> {
        Ok(Self {
            client: OllamaClient::new(settings)?,
        })
    }

    pub async fn check_server_reachable(&self) -> bool {
        self.client.check_server_reachable().await
    }

    /// Reachability probe honoring the `auto_start` setting.
    pub async fn ensure_server_running(&self) -> bool {
        self.client.ensure_server_running().await
    }

    /// One chat completion; `context` is normalized document text the host
    /// obtained from [`Notebook::read_and_normalize_document`].
    pub async fn send_chat(&self, message: &str, context: Option<&str>) -> ChatOutcome {
        match self.client.generate(message, context).await {
            Ok(response) => ChatOutcome::ok(response),
            Err(err) => ChatOutcome::failed(err.kind(), err.to_string()),
        }
    }

    pub async fn list_models(&self) -> ModelList {
        self.client.list_models().await
    }

    /// Classify by extension and extract plain text from a document file.
    ///
    /// An unsupported extension is rejected before the file is read.
    pub async fn extract_document_text(&self, path: &Path) -> ExtractionOutcome {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        if extension.is_empty() {
            return ExtractionOutcome::failed(
                "Datei ohne Dateiendung wird nicht unterstützt".to_string(),
            );
        }
        if !extract::supported(extension) {
            return ExtractionOutcome::failed(
                extract::ExtractError::UnsupportedFormat(extension.to_ascii_lowercase())
                    .to_string(),
            );
        }

        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) => return ExtractionOutcome::failed(err.to_string()),
        };

        debug!(path = %path.display(), bytes = bytes.len(), "extracting document");
        match extract::extract_bytes(extension, &bytes) {
            Ok((text, meta)) => ExtractionOutcome::ok(text, meta),
            Err(err) => ExtractionOutcome::failed(err.to_string()),
        }
    }

    /// Extraction and normalization composed into one call; both an
    /// extraction failure and "no readable text" surface as a single
    /// failed value with a human-readable message.
    pub async fn read_and_normalize_document(&self, path: &Path) -> DocumentText {
        let extracted = self.extract_document_text(path).await;
        if !extracted.success {
            return DocumentText {
                success: false,
                content: None,
                error: extracted.error,
                metadata: None,
            };
        }

        let normalized = normalize::normalize(extracted.text.as_deref().unwrap_or_default());
        debug!(
            original = normalized.original_length,
            cleaned = normalized.cleaned_length,
            "normalized document text"
        );
        DocumentText {
            success: true,
            content: Some(normalized.content),
            error: None,
            metadata: extracted.metadata,
        }
    }
}
