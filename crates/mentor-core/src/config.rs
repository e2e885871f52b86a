use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{MentorError, Result};

/// Top-level configuration for the Mentor engine.
///
/// Loaded from `~/.mentor/config.toml` by default. Each section corresponds
/// to one subsystem.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MentorConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
}

impl MentorConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: MentorConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| MentorError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory for the database and index files.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// SQLite database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "./data/mentor.db".to_string(),
        }
    }
}

/// Embedding provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Directory containing `model.onnx` and `tokenizer.json` for the
    /// sentence-transformer export. Empty means no model is configured and
    /// the deterministic mock provider is used instead.
    pub model_dir: String,
    /// Embedding dimensionality (all-MiniLM-L6-v2 produces 384).
    pub dimension: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_dir: String::new(),
            dimension: 384,
        }
    }
}

/// Vector index persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Path of the vector data file.
    pub vectors_path: String,
    /// Path of the slot-to-advisor mapping file (JSON).
    pub mapping_path: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            vectors_path: "./data/advisor_embeddings.bin".to_string(),
            mapping_path: "./data/advisor_mapping.json".to_string(),
        }
    }
}

/// External bibliographic feed settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Base URL of the OpenAlex-compatible API.
    pub base_url: String,
    /// Contact email sent with requests (polite pool).
    pub mailto: Option<String>,
    /// Records requested per page.
    pub per_page: u32,
    /// Delay between successive page fetches, in milliseconds.
    pub page_delay_ms: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openalex.org".to_string(),
            mailto: None,
            per_page: 200,
            page_delay_ms: 100,
        }
    }
}

/// Match orchestration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Default number of matches returned by `find_matches`.
    pub default_top_k: usize,
    /// Hard cap on results for any single request.
    pub max_results: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            default_top_k: 50,
            max_results: 100,
        }
    }
}
