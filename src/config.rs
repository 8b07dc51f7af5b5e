//! Service configuration.
//!
//! Settings come from a TOML file selected by `VECTORD_ENV` (default
//! `local`, resolving `config/<env>.toml`), with `VECTORD_*` environment
//! variables overriding individual keys (`VECTORD_SERVER__BIND`, etc).

use crate::error::{Error, Result};
use crate::index::IndexKind;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub index: IndexConfig,
    pub store: StoreConfig,
    pub retrieval: RetrievalConfig,
    pub models: ModelsConfig,
    pub generation: GenerationConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: SocketAddr,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Directory holding the persisted index files.
    pub dir: PathBuf,
    /// Embedding dimension; every vector entering the index must match.
    pub embedding_dim: usize,
    pub flat_file: String,
    pub hnsw_file: String,
    /// Max neighbors per HNSW node.
    pub hnsw_m: usize,
    /// Construction-time search width.
    pub hnsw_ef_construction: usize,
    /// Query-time search width.
    pub hnsw_ef_search: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path of the redb database file.
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Candidates fetched from the index before reranking.
    pub top_n: usize,
    /// Results returned after reranking.
    pub top_k: usize,
    /// Backend queried when the request doesn't pick one.
    pub backend: IndexKind,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// `local` runs fastembed in-process; `remote` calls the model server.
    pub embedding_provider: EmbeddingProviderKind,
    /// Base URL of the embedding/summarization/rerank model server.
    pub base_url: String,
    /// Cache directory for locally downloaded embedding models.
    pub cache_dir: PathBuf,
    /// Request timeout for model server calls, in seconds.
    pub timeout_secs: u64,
    /// Floor for the summary length, in tokens.
    pub summary_min_len: usize,
    /// Baseline cap for the summary length; long inputs raise it.
    pub summary_max_len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProviderKind {
    Local,
    Remote,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Base URL of the text-generation engine.
    pub base_url: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            index: IndexConfig::default(),
            store: StoreConfig::default(),
            retrieval: RetrievalConfig::default(),
            models: ModelsConfig::default(),
            generation: GenerationConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8400".parse().expect("valid default bind"),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./vectorstore"),
            embedding_dim: 384,
            flat_file: "flat.index".to_string(),
            hnsw_file: "hnsw.index".to_string(),
            hnsw_m: 32,
            hnsw_ef_construction: 200,
            hnsw_ef_search: 64,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./vectorstore/documents.redb"),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_n: 10,
            top_k: 5,
            backend: IndexKind::Exact,
        }
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            embedding_provider: EmbeddingProviderKind::Local,
            base_url: "http://127.0.0.1:8300".to_string(),
            cache_dir: PathBuf::from("./models"),
            timeout_secs: 60,
            summary_min_len: 100,
            summary_max_len: 100,
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8200".to_string(),
            max_tokens: 512,
            temperature: 0.7,
            top_p: 0.95,
        }
    }
}

impl Config {
    /// Load configuration from an explicit file, or from
    /// `config/<VECTORD_ENV>.toml` when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let env = std::env::var("VECTORD_ENV").unwrap_or_else(|_| "local".to_string());
                PathBuf::from("config").join(format!("{env}.toml"))
            }
        };

        if !file.exists() {
            return Err(Error::Config(format!(
                "configuration file {} not found",
                file.display()
            )));
        }

        let settings = config::Config::builder()
            .add_source(config::File::from(file.as_path()))
            .add_source(config::Environment::with_prefix("VECTORD").separator("__"))
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;

        let parsed: Config = settings
            .try_deserialize()
            .map_err(|e| Error::Config(e.to_string()))?;

        parsed.validate()?;
        Ok(parsed)
    }

    /// Reject configurations the service cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.index.embedding_dim == 0 {
            return Err(Error::Config(
                "index.embedding_dim must be greater than zero".to_string(),
            ));
        }
        if self.index.hnsw_m == 0 {
            return Err(Error::Config(
                "index.hnsw_m must be greater than zero".to_string(),
            ));
        }
        if self.retrieval.top_n == 0 {
            return Err(Error::Config(
                "retrieval.top_n must be greater than zero".to_string(),
            ));
        }
        if self.retrieval.top_k > self.retrieval.top_n {
            return Err(Error::Config(format!(
                "retrieval.top_k ({}) must not exceed retrieval.top_n ({})",
                self.retrieval.top_k, self.retrieval.top_n
            )));
        }
        Ok(())
    }
}
