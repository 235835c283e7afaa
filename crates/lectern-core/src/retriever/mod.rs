//! Retrieval over the vector index.
//!
//! Thin query layer used by the CLI and the research loop: single-shot
//! similarity search, per-item search, and multi-query retrieval with
//! `(item_id, split_id)` deduplication and distance re-ranking.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;

use crate::index::{IndexStats, RetrievedChunk, VectorIndex};

/// Retriever over one collection.
pub struct Retriever {
    index: Arc<VectorIndex>,
    /// Hits with a distance above this are dropped before ranking
    relevance_threshold: f32,
}

impl Retriever {
    pub fn new(index: Arc<VectorIndex>, relevance_threshold: f32) -> Self {
        Self {
            index,
            relevance_threshold,
        }
    }

    /// Single similarity search.
    pub async fn semantic(&self, query: &str, k: usize) -> Result<Vec<RetrievedChunk>> {
        let hits = self.index.search(query, k).await?;
        Ok(self.apply_threshold(hits))
    }

    /// Similarity search restricted to one item.
    pub async fn by_item(
        &self,
        item_id: &str,
        query: &str,
        k: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        let mut filter = BTreeMap::new();
        filter.insert("item_id".to_string(), item_id.to_string());
        let hits = self.index.search_filtered(query, &filter, k).await?;
        Ok(self.apply_threshold(hits))
    }

    /// Run every query, union the results, deduplicate by
    /// `(item_id, split_id)` and return the `k` closest.
    ///
    /// Lower distance wins a duplicate; ties keep the hit from the earliest
    /// query in the input list.
    pub async fn multi_query(&self, queries: &[String], k: usize) -> Result<Vec<RetrievedChunk>> {
        let mut all = Vec::new();
        for query in queries {
            let hits = self.semantic(query, k).await?;
            tracing::debug!(query = %query, hit_count = hits.len(), "Multi-query leg");
            all.extend(hits);
        }
        Ok(merge_ranked(all, k))
    }

    /// Snapshot of what is indexed.
    pub fn list_indexed(&self) -> Result<IndexStats> {
        self.index.stats()
    }

    fn apply_threshold(&self, hits: Vec<RetrievedChunk>) -> Vec<RetrievedChunk> {
        apply_threshold(hits, self.relevance_threshold)
    }
}

/// Drop hits whose distance exceeds `threshold`.
pub(crate) fn apply_threshold(hits: Vec<RetrievedChunk>, threshold: f32) -> Vec<RetrievedChunk> {
    hits.into_iter()
        .filter(|hit| hit.distance <= threshold)
        .collect()
}

/// Deduplicate by `(item_id, split_id)` keeping the lower distance, then
/// sort ascending by distance and truncate to `k`.
///
/// The input order encodes query priority: a strictly lower distance
/// replaces an earlier duplicate, an equal one does not, and the final sort
/// is stable, so ties resolve to the earliest query.
pub(crate) fn merge_ranked(hits: Vec<RetrievedChunk>, k: usize) -> Vec<RetrievedChunk> {
    let mut kept: Vec<RetrievedChunk> = Vec::new();
    let mut by_key: HashMap<(String, usize), usize> = HashMap::new();

    for hit in hits {
        let key = (hit.chunk.item_id.clone(), hit.chunk.split_id);
        match by_key.get(&key) {
            Some(&slot) => {
                if hit.distance < kept[slot].distance {
                    kept[slot] = hit;
                }
            }
            None => {
                by_key.insert(key, kept.len());
                kept.push(hit);
            }
        }
    }

    kept.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    kept.truncate(k);
    kept
}
