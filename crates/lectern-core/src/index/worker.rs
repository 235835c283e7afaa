//! Write worker for the vector index.
//!
//! Owns the write side of the milli index, processing operations in a
//! dedicated OS thread so LMDB and rayon never block the async runtime.
//! LMDB only allows one writer at a time, so serializing writes through a
//! single worker is both correct and efficient.

use std::sync::Arc;
use std::thread;

use milli::update::IndexerConfig;
use milli::Index;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};

use super::{clear_all_documents, delete_documents_by_id, index_documents_batch};

/// Request to the index worker.
enum IndexRequest {
    /// Insert or replace a batch of documents.
    Index {
        docs: Vec<Map<String, Value>>,
        dimensions: Option<usize>,
        response_tx: oneshot::Sender<anyhow::Result<()>>,
    },
    /// Delete documents by external id.
    Delete {
        ids: Vec<String>,
        response_tx: oneshot::Sender<anyhow::Result<()>>,
    },
    /// Drop every document.
    Clear {
        response_tx: oneshot::Sender<anyhow::Result<u64>>,
    },
}

/// Handle to send requests to the index worker.
///
/// The worker stops when all handles are dropped (channel closes).
#[derive(Clone)]
pub struct IndexWorkerHandle {
    tx: mpsc::Sender<IndexRequest>,
}

impl IndexWorkerHandle {
    /// Index a batch of documents. Returns when the write is committed.
    pub async fn index_documents(
        &self,
        docs: Vec<Map<String, Value>>,
        dimensions: Option<usize>,
    ) -> anyhow::Result<()> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(IndexRequest::Index {
                docs,
                dimensions,
                response_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("Index worker channel closed"))?;
        response_rx
            .await
            .map_err(|_| anyhow::anyhow!("Index worker dropped response"))?
    }

    /// Delete documents by external id in a single transaction.
    pub async fn delete_documents(&self, ids: Vec<String>) -> anyhow::Result<()> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(IndexRequest::Delete { ids, response_tx })
            .await
            .map_err(|_| anyhow::anyhow!("Index worker channel closed"))?;
        response_rx
            .await
            .map_err(|_| anyhow::anyhow!("Index worker dropped response"))?
    }

    /// Drop every document. Returns the number removed.
    pub async fn clear(&self) -> anyhow::Result<u64> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(IndexRequest::Clear { response_tx })
            .await
            .map_err(|_| anyhow::anyhow!("Index worker channel closed"))?;
        response_rx
            .await
            .map_err(|_| anyhow::anyhow!("Index worker dropped response"))?
    }
}

/// Spawn the index worker thread.
pub fn spawn_index_worker(index: Arc<Index>, indexer_config: IndexerConfig) -> IndexWorkerHandle {
    let (tx, mut rx) = mpsc::channel::<IndexRequest>(64);

    thread::Builder::new()
        .name("index-worker".into())
        .spawn(move || {
            tracing::debug!("Index worker started");

            while let Some(request) = rx.blocking_recv() {
                process_request(&index, &indexer_config, request);
            }

            tracing::debug!("Index worker stopped");
        })
        .expect("Failed to spawn index worker thread");

    IndexWorkerHandle { tx }
}

fn process_request(index: &Index, indexer_config: &IndexerConfig, request: IndexRequest) {
    match request {
        IndexRequest::Index {
            docs,
            dimensions,
            response_tx,
        } => {
            let doc_count = docs.len();
            let result = index_documents_batch(index, indexer_config, docs, dimensions);
            if let Err(ref e) = result {
                tracing::error!(error = %e, "Failed to index documents");
            } else {
                tracing::debug!(doc_count, "Indexed documents");
            }
            let _ = response_tx.send(result);
        }

        IndexRequest::Delete { ids, response_tx } => {
            let result = delete_documents_by_id(index, indexer_config, &ids);
            if let Err(ref e) = result {
                tracing::error!(error = %e, "Failed to delete documents");
            }
            let _ = response_tx.send(result);
        }

        IndexRequest::Clear { response_tx } => {
            let result = clear_all_documents(index);
            if let Err(ref e) = result {
                tracing::error!(error = %e, "Failed to clear index");
            }
            let _ = response_tx.send(result);
        }
    }
}
