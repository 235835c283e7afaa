pub mod ask;
pub mod clear;
pub mod collections;
pub mod index;
pub mod search;
pub mod stats;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use lectern_core::{Config, Embedder, Secrets, VectorIndex, ZoteroClient};

/// Load settings from the given path or the default location.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load(path)?,
        None => Config::load(&Config::default_path())?,
    };
    config
        .ensure_dirs()
        .context("Failed to create data directories")?;
    Ok(config)
}

/// Open the vector index for the configured collection.
pub async fn open_index(config: &Config) -> Result<Arc<VectorIndex>> {
    let embedder = Embedder::from_config(&config.embedding)
        .await
        .context("Failed to initialize embedder")?;
    let index = VectorIndex::open(
        &config.vector_storage_root,
        &config.collection_name,
        embedder,
    )
    .context("Failed to open vector index")?;
    Ok(Arc::new(index))
}

/// Library client from environment credentials.
pub fn library_client(config: &Config) -> Result<Arc<ZoteroClient>> {
    let secrets = Secrets::from_env()?;
    Ok(Arc::new(ZoteroClient::new(&secrets, &config.library_root)))
}
