//! Application configuration.
//!
//! Everything except secrets lives in a JSON settings file; secrets
//! (`LIBRARY_API_ID`, `LIBRARY_API_KEY`, provider keys) come from the
//! environment only and are never written to disk.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::chunker::ChunkerConfig;

/// Which embedding backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingApi {
    /// In-process model via mistralrs
    Local,
    /// OpenAI-compatible embeddings endpoint
    Remote,
}

/// Embedding model selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub api: EmbeddingApi,
    /// HF repo id for `Local`, endpoint model name for `Remote`
    pub model: String,
    /// Vector dimensions produced by the model
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api: EmbeddingApi::Local,
            model: "BAAI/bge-base-en-v1.5".to_string(),
            dimensions: 768,
        }
    }
}

/// Which chat backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatApi {
    Anthropic,
    #[serde(rename = "openai")]
    OpenAi,
}

/// Chat model selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    pub api: ChatApi,
    pub name: String,
    pub temperature: f32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api: ChatApi::Anthropic,
            name: "claude-sonnet-4-5".to_string(),
            temperature: 0.0,
        }
    }
}

/// Tuning for the iterative research loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    /// Maximum number of query/retrieve/judge rounds before forced finalization
    pub max_search_depth: u32,
    /// Documents kept per search round after deduplication
    pub max_docs_per_search: usize,
    /// Result count for ad-hoc `search` queries
    pub k_documents: usize,
    /// Hits with a distance above this are dropped before ranking
    pub relevance_threshold: f32,
    /// Drop chunks whose deepest heading mentions "reference"
    pub exclude_references: bool,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_search_depth: 5,
            max_docs_per_search: 10,
            k_documents: 4,
            relevance_threshold: 1.5,
            exclude_references: false,
        }
    }
}

/// Application configuration, persisted as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Reference-manager data directory containing `storage/<key>/<*.pdf>`
    pub library_root: PathBuf,
    /// Cache of converter output: `<markdown_root>/<storage_key>/<stem>.md`
    pub markdown_root: PathBuf,
    /// Directory holding one vector-index collection per embedding identity
    pub vector_storage_root: PathBuf,
    /// Logical collection name; the embedding api/model are appended to it
    pub collection_name: String,
    pub force_reindex: bool,
    pub skip_existing_markdown: bool,
    pub chunker: ChunkerConfig,
    pub embedding: EmbeddingConfig,
    pub chat: ChatConfig,
    pub research: ResearchConfig,
    /// External PDF→Markdown command; `{pdf}`, `{out_dir}` and `{stem}`
    /// placeholders are substituted before spawning
    pub converter_command: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lectern");

        Self {
            library_root: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("Zotero"),
            markdown_root: data_dir.join("markdown"),
            vector_storage_root: data_dir.join("index"),
            collection_name: "library".to_string(),
            force_reindex: false,
            skip_existing_markdown: true,
            chunker: ChunkerConfig::default(),
            embedding: EmbeddingConfig::default(),
            chat: ChatConfig::default(),
            research: ResearchConfig::default(),
            converter_command: None,
        }
    }
}

impl Config {
    /// Default location of the settings file.
    pub fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lectern")
            .join("settings.json")
    }

    /// Load configuration from a settings file, or use defaults when the
    /// file does not exist. A malformed file is a configuration error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No settings file, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Malformed settings file {}", path.display()))?;
        Ok(config)
    }

    /// Write the configuration back to a settings file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw)
            .with_context(|| format!("Failed to write settings file {}", path.display()))?;
        Ok(())
    }

    /// Ensure all directories the core writes to exist.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.markdown_root)?;
        std::fs::create_dir_all(&self.vector_storage_root)?;
        Ok(())
    }
}

/// Reference-manager API credentials, environment-only.
#[derive(Debug, Clone)]
pub struct Secrets {
    pub library_api_id: String,
    pub library_api_key: String,
}

impl Secrets {
    /// Read credentials from `LIBRARY_API_ID` / `LIBRARY_API_KEY`.
    ///
    /// Fails fast so a misconfigured environment is caught at construction.
    pub fn from_env() -> Result<Self> {
        let library_api_id =
            std::env::var("LIBRARY_API_ID").context("LIBRARY_API_ID is not set")?;
        let library_api_key =
            std::env::var("LIBRARY_API_KEY").context("LIBRARY_API_KEY is not set")?;
        Ok(Self {
            library_api_id,
            library_api_key,
        })
    }
}
