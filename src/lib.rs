//! # Notizbuch
//!
//! Document ingestion and Ollama request pipeline for a local-first,
//! German-language notebook assistant.
//!
//! The crate covers the integration core the desktop shell builds on:
//! classifying and extracting text from heterogeneous document formats,
//! normalizing it for model consumption, and issuing chat requests to a
//! locally running Ollama server with bounded retry behavior.
//!
//! ## Architecture
//!
//! ```text
//! file path ──▶ extract ──▶ normalize ──▶ client ──▶ Ollama /api/generate
//!                  │                        │
//!                  │                        └──▶ /api/tags (catalog, probe)
//!                  └── pdf-extract / zip+quick-xml / UTF-8 read
//! ```
//!
//! The [`pipeline::Notebook`] facade is the surface hosts call; every
//! failure comes back as a result value (`{ success, error, ... }`), never
//! as a propagated error.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | Settings file and the injected [`config::SettingsStore`] seam |
//! | [`models`] | Request-scoped value types shared with the host |
//! | [`extract`] | Extension-dispatched text extraction (PDF, DOCX, XLSX, plain) |
//! | [`normalize`] | Whitespace normalization for context text |
//! | [`client`] | Ollama HTTP client: chat, catalog, probe, autostart |
//! | [`pipeline`] | Host-facing operation surface |

pub mod client;
pub mod config;
pub mod extract;
pub mod models;
pub mod normalize;
pub mod pipeline;
