//! Shared state of the research loop.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::config::ResearchConfig;
use crate::index::{ItemStats, RetrievedChunk};

/// Seed entry for `search_queries`.
pub const SEED_QUERY: &str = "No prior queries. Use user input to find general information.";
/// Seed entry for `knowledge_strings`.
pub const SEED_KNOWLEDGE: &str = "First synthesis.";
/// Seed entry for `assessment_strings`.
pub const SEED_ASSESSMENT: &str = "First search; initial knowledge.";

/// State threaded through the node graph.
///
/// The four parallel sequences (`search_queries`, `retrieved_documents`,
/// `knowledge_strings`, `assessment_strings`) each start with one seed
/// entry and grow by exactly one element per completed round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchState {
    pub user_query: String,
    /// Snapshot of indexed items, loaded by the init node
    pub indexed_items: BTreeMap<String, ItemStats>,
    pub search_queries: Vec<String>,
    pub retrieved_documents: Vec<Vec<RetrievedChunk>>,
    pub knowledge_strings: Vec<String>,
    pub assessment_strings: Vec<String>,
    pub search_loop_count: u32,
    pub max_search_depth: u32,
    pub max_docs_per_search: usize,
    pub exclude_references: bool,
    pub final_response: String,
}

impl ResearchState {
    pub fn new(config: &ResearchConfig) -> Self {
        Self {
            user_query: String::new(),
            indexed_items: BTreeMap::new(),
            search_queries: vec![SEED_QUERY.to_string()],
            retrieved_documents: vec![Vec::new()],
            knowledge_strings: vec![SEED_KNOWLEDGE.to_string()],
            assessment_strings: vec![SEED_ASSESSMENT.to_string()],
            search_loop_count: 0,
            max_search_depth: config.max_search_depth,
            max_docs_per_search: config.max_docs_per_search,
            exclude_references: config.exclude_references,
            final_response: String::new(),
        }
    }

    pub fn with_query(config: &ResearchConfig, user_query: &str) -> Self {
        Self {
            user_query: user_query.to_string(),
            ..Self::new(config)
        }
    }

    /// Completed rounds (seed entries excluded).
    pub fn rounds(&self) -> usize {
        self.search_queries.len().saturating_sub(1)
    }

    /// Chunk identities retrieved in any round so far.
    pub(crate) fn seen_keys(&self) -> HashSet<(String, usize)> {
        self.retrieved_documents
            .iter()
            .flatten()
            .map(|hit| (hit.chunk.item_id.clone(), hit.chunk.split_id))
            .collect()
    }

    /// Citation keys appearing in any retrieved chunk.
    pub fn cited_keys(&self) -> HashSet<String> {
        self.retrieved_documents
            .iter()
            .flatten()
            .map(|hit| hit.chunk.citation_key.clone())
            .filter(|key| !key.is_empty())
            .collect()
    }
}
