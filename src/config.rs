//! Settings file handling and the [`SettingsStore`] seam.
//!
//! The desktop shell owns a small persisted settings file (server base URL,
//! default model, autostart flag). The request layer reads it at the start
//! of every call and may write a corrected model id back (see
//! [`crate::client`]), so the store is an injected trait rather than
//! ambient global state.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Connection settings for the Ollama server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_auto_start")]
    pub auto_start: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            default_model: default_model(),
            auto_start: default_auto_start(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_model() -> String {
    "phi4-mini:latest".to_string()
}
fn default_auto_start() -> bool {
    true
}

/// Top-level settings file contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
}

/// Read/write access to the persisted settings.
///
/// `server` returns a snapshot; `set_default_model` is a write-through
/// correction observable by later calls. There is no locking across
/// processes — concurrent writers racing on the file is an accepted risk
/// of the single-user desktop deployment.
pub trait SettingsStore: Send + Sync {
    fn server(&self) -> ServerSettings;
    fn set_default_model(&self, model: &str) -> Result<()>;
}

/// File-backed store (TOML), the production implementation.
pub struct FileSettings {
    path: PathBuf,
    inner: RwLock<Settings>,
}

impl FileSettings {
    /// Load settings from `path`, creating the file with defaults when it
    /// does not exist yet.
    pub fn load_or_init(path: &Path) -> Result<Self> {
        let settings = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
            toml::from_str(&content).with_context(|| "Failed to parse settings file")?
        } else {
            let settings = Settings::default();
            write_settings(path, &settings)?;
            settings
        };

        if settings.server.base_url.trim().is_empty() {
            anyhow::bail!("server.base_url must not be empty");
        }
        if settings.server.default_model.trim().is_empty() {
            anyhow::bail!("server.default_model must not be empty");
        }

        Ok(Self {
            path: path.to_path_buf(),
            inner: RwLock::new(settings),
        })
    }
}

fn write_settings(path: &Path, settings: &Settings) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create settings dir: {}", parent.display()))?;
        }
    }
    let content = toml::to_string_pretty(settings)?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write settings file: {}", path.display()))?;
    Ok(())
}

impl SettingsStore for FileSettings {
    fn server(&self) -> ServerSettings {
        self.inner.read().expect("settings lock poisoned").server.clone()
    }

    fn set_default_model(&self, model: &str) -> Result<()> {
        let mut guard = self.inner.write().expect("settings lock poisoned");
        guard.server.default_model = model.to_string();
        write_settings(&self.path, &guard)
    }
}

/// In-memory store for tests and embedding hosts that manage persistence
/// themselves.
pub struct MemorySettings {
    inner: RwLock<Settings>,
}

impl MemorySettings {
    pub fn new(server: ServerSettings) -> Self {
        Self {
            inner: RwLock::new(Settings { server }),
        }
    }
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self::new(ServerSettings::default())
    }
}

impl SettingsStore for MemorySettings {
    fn server(&self) -> ServerSettings {
        self.inner.read().expect("settings lock poisoned").server.clone()
    }

    fn set_default_model(&self, model: &str) -> Result<()> {
        let mut guard = self.inner.write().expect("settings lock poisoned");
        guard.server.default_model = model.to_string();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_shipped_configuration() {
        let s = ServerSettings::default();
        assert_eq!(s.base_url, "http://localhost:11434");
        assert_eq!(s.default_model, "phi4-mini:latest");
        assert!(s.auto_start);
    }

    #[test]
    fn memory_store_persists_model_correction() {
        let store = MemorySettings::default();
        store.set_default_model("gemma3:latest").unwrap();
        assert_eq!(store.server().default_model, "gemma3:latest");
    }

    #[test]
    fn partial_settings_file_fills_defaults() {
        let settings: Settings = toml::from_str("[server]\nauto_start = false\n").unwrap();
        assert_eq!(settings.server.base_url, "http://localhost:11434");
        assert!(!settings.server.auto_start);
    }
}
