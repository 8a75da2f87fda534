//! Core data models used throughout Notizbuch.
//!
//! These are the request-scoped values that flow between the extraction,
//! normalization, and model-request layers and out to the host. The host
//! boundary mirrors the `{ success, ... }` shapes the desktop shell expects,
//! so every outcome type serializes with `serde`.

use serde::{Deserialize, Serialize};

/// Which format-specific decoder produced a text result.
///
/// Diagnostic only — callers never branch on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtractionMethod {
    Pdf,
    Docx,
    Xlsx,
    DirectRead,
}

/// Metadata attached to a successful extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionMeta {
    #[serde(rename = "extractionMethod")]
    pub method: ExtractionMethod,
    /// PDF only.
    #[serde(rename = "pageCount", skip_serializing_if = "Option::is_none")]
    pub page_count: Option<usize>,
    /// PDF only; absent when the document tree could not be opened.
    #[serde(rename = "pdfVersion", skip_serializing_if = "Option::is_none")]
    pub pdf_version: Option<String>,
    /// Workbook formats only.
    #[serde(rename = "sheetCount", skip_serializing_if = "Option::is_none")]
    pub sheet_count: Option<usize>,
    /// Non-fatal decoder complaints (e.g. unreadable text runs in a DOCX).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl ExtractionMeta {
    pub fn new(method: ExtractionMethod) -> Self {
        Self {
            method,
            page_count: None,
            pdf_version: None,
            sheet_count: None,
            warnings: Vec::new(),
        }
    }
}

/// Host-facing result of `extract_document_text`.
///
/// `success == false` implies `text` is absent; `success == true` implies
/// `text` is present (and, for PDF, non-empty after trimming — an
/// all-whitespace PDF is reported as a failure instead).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ExtractionMeta>,
}

impl ExtractionOutcome {
    pub fn ok(text: String, metadata: ExtractionMeta) -> Self {
        Self {
            success: true,
            text: Some(text),
            error: None,
            metadata: Some(metadata),
        }
    }

    pub fn failed(error: String) -> Self {
        Self {
            success: false,
            text: None,
            error: Some(error),
            metadata: None,
        }
    }
}

/// Model-ready text produced by the normalizer, with length bookkeeping.
///
/// Invariant: `cleaned_length <= original_length`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedText {
    pub content: String,
    #[serde(rename = "originalLength")]
    pub original_length: usize,
    #[serde(rename = "cleanedLength")]
    pub cleaned_length: usize,
}

/// Host-facing result of `read_and_normalize_document` (extraction and
/// normalization composed into one call).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentText {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ExtractionMeta>,
}

/// Sampling options sent with every generate request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SamplingOptions {
    pub temperature: f64,
    pub top_p: f64,
    pub repeat_penalty: f64,
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            repeat_penalty: 1.1,
        }
    }
}

/// Failure classification for the request layer.
///
/// `TransientConnection` is the only kind that triggers the automatic
/// second attempt; everything else is terminal for the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ChatErrorKind {
    ModelNotFound,
    TransientConnection,
    Timeout,
    Unknown,
}

/// Host-facing result of `send_chat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(rename = "errorKind", skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ChatErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChatOutcome {
    pub fn ok(response: String) -> Self {
        Self {
            success: true,
            response: Some(response),
            error_kind: None,
            error: None,
        }
    }

    pub fn failed(kind: ChatErrorKind, detail: String) -> Self {
        Self {
            success: false,
            response: None,
            error_kind: Some(kind),
            error: Some(detail),
        }
    }
}

/// A model known to the Ollama server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    #[serde(default)]
    pub size: i64,
}

/// Host-facing result of `list_models`.
///
/// An empty `models` with a non-null `error` means "unknown", not
/// "zero models exist" — callers must not cache it as an empty catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelList {
    pub models: Vec<ModelDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
