//! Persistent vector index for chunks.
//!
//! Built on milli (LMDB) with user-provided vectors. One index directory per
//! collection identity `<logical_name>_<embedding_api>_<embedding_model>`,
//! so switching embedding models yields a disjoint collection.
//!
//! Reads go straight to the shared `Index`; all writes are funneled through
//! a dedicated worker thread ([`worker`]) because LMDB allows one writer at
//! a time.

mod worker;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use bumpalo::Bump;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use milli::documents::mmap_from_objects;
use milli::heed::{EnvOpenOptions, RoTxn};
use milli::progress::Progress;
use milli::prompt::Prompt;
use milli::score_details::ScoringStrategy;
use milli::update::new::indexer::{self, DocumentOperation};
use milli::update::{ClearDocuments, IndexerConfig, Setting};
use milli::vector::settings::{EmbedderSource, EmbeddingSettings};
use milli::vector::{embedder::manual, Embedder as MilliEmbedder, RuntimeEmbedder, RuntimeEmbedders};
use milli::{FilterableAttributesRule, Index, TermsMatchingStrategy};

use crate::chunker::{Chunk, TableFlag};
use crate::embed::Embedder;

pub use worker::{spawn_index_worker, IndexWorkerHandle};

/// Default map size for the LMDB environment (10 GB)
const DEFAULT_MAP_SIZE: usize = 10 * 1024 * 1024 * 1024;

/// Name under which the user-provided embedder is registered in milli
const EMBEDDER_NAME: &str = "default";

/// Maximum documents per write batch
const BATCH_SIZE: usize = 50;

/// Deepest heading level stored as a flat field
const MAX_LEVEL: usize = 7;

/// A chunk returned from a search, with its distance (lower is better).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    pub distance: f32,
}

/// Per-item aggregate in [`IndexStats`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemStats {
    pub count: usize,
    pub title: String,
    pub storage_key: String,
    pub citation_key: String,
}

/// Snapshot of index contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_chunks: usize,
    pub items: BTreeMap<String, ItemStats>,
}

/// Vector index over one collection.
pub struct VectorIndex {
    index: Arc<Index>,
    worker: IndexWorkerHandle,
    embedder: Embedder,
    collection: String,
    path: PathBuf,
}

impl VectorIndex {
    /// Open (or create) the collection for `logical_name` and the embedder's
    /// identity under `root`.
    pub fn open(root: &Path, logical_name: &str, embedder: Embedder) -> Result<Self> {
        let collection = collection_name(logical_name, embedder.api_name(), embedder.model_name());
        let path = root.join(&collection);

        let index = open_index(&path)?;
        let indexer_config = IndexerConfig::default();
        configure_embedder(&index, &indexer_config, EMBEDDER_NAME, embedder.dimensions)?;

        let index = Arc::new(index);
        let worker = spawn_index_worker(index.clone(), indexer_config);

        tracing::info!(collection = %collection, path = %path.display(), "Vector index opened");

        Ok(Self {
            index,
            worker,
            embedder,
            collection,
            path,
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Embed and insert a batch of chunks.
    ///
    /// The whole batch is embedded before anything is written, so an
    /// embedding failure aborts the call without partial insert. `added_at`
    /// is stamped here. Returns the assigned ids (the chunk uids).
    pub async fn add(&self, chunks: Vec<Chunk>) -> Result<Vec<String>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }
        validate_batch(&chunks)?;

        let contents: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self
            .embedder
            .embed_batch(&contents)
            .await
            .context("Embedding failed, nothing inserted")?;
        if vectors.len() != chunks.len() {
            bail!(
                "embedder returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            );
        }

        let added_at = chrono::Utc::now().timestamp();
        let mut ids = Vec::with_capacity(chunks.len());
        let mut docs = Vec::with_capacity(chunks.len());
        for (mut chunk, vector) in chunks.into_iter().zip(vectors) {
            chunk.added_at = added_at;
            ids.push(chunk.chunk_uid.clone());
            docs.push(chunk_to_doc(&chunk, Some(vector)));
        }

        self.worker
            .index_documents(docs, Some(self.embedder.dimensions))
            .await?;

        tracing::debug!(chunk_count = ids.len(), "Added chunks to index");
        Ok(ids)
    }

    /// Similarity search over the whole collection.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievedChunk>> {
        self.search_inner(query, None, k).await
    }

    /// Similarity search restricted to chunks matching `filter` (equality
    /// on stored keys).
    pub async fn search_filtered(
        &self,
        query: &str,
        filter: &BTreeMap<String, String>,
        k: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        self.search_inner(query, Some(filter), k).await
    }

    async fn search_inner(
        &self,
        query: &str,
        filter: Option<&BTreeMap<String, String>>,
        k: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        let query_vector = self.embedder.embed(query).await?;
        let filter_str = filter.map(filter_string);

        let rtxn = self.index.read_txn()?;
        let mut search = milli::Search::new(&rtxn, &self.index);
        search.query(query);
        search.limit(k);
        search.scoring_strategy(ScoringStrategy::Detailed);
        search.terms_matching_strategy(TermsMatchingStrategy::Last);
        apply_filter(&mut search, filter_str.as_deref())?;

        let result = execute_semantic_search(&self.index, &rtxn, &mut search, query_vector)?;

        let mut hits = Vec::new();
        for (doc_id, scores) in result.documents_ids.into_iter().zip(result.document_scores) {
            let Some(doc) = get_document(&self.index, &rtxn, doc_id)? else {
                continue;
            };
            let score = milli::score_details::ScoreDetails::global_score(scores.iter());
            hits.push(RetrievedChunk {
                chunk: doc_to_chunk(&doc),
                distance: (1.0 - score) as f32,
            });
        }
        Ok(hits)
    }

    /// Chunks matching `filter` without vector scoring. Unordered.
    pub fn filter_only(&self, filter: &BTreeMap<String, String>, k: usize) -> Result<Vec<Chunk>> {
        let filter_str = filter_string(filter);
        let rtxn = self.index.read_txn()?;
        let docs = placeholder_docs(&self.index, &rtxn, Some(&filter_str), k)?;
        Ok(docs.iter().map(doc_to_chunk).collect())
    }

    /// All internal ids attached to `item_id`.
    pub fn uids_for_item(&self, item_id: &str) -> Result<Vec<String>> {
        let filter_str = format!("item_id = {}", quote_filter_value(item_id));
        let rtxn = self.index.read_txn()?;
        let docs = placeholder_docs(&self.index, &rtxn, Some(&filter_str), usize::MAX)?;
        Ok(docs
            .iter()
            .filter_map(|d| d.get("id").and_then(Value::as_str).map(String::from))
            .collect())
    }

    /// Remove every chunk with `item_id`. Returns the count removed.
    ///
    /// The removal happens in one write transaction, so observers see
    /// either all targeted chunks or none.
    pub async fn delete_by_item(&self, item_id: &str) -> Result<usize> {
        let uids = self.uids_for_item(item_id)?;
        if uids.is_empty() {
            return Ok(0);
        }
        let count = uids.len();
        self.worker.delete_documents(uids).await?;
        tracing::debug!(item_id = %item_id, deleted = count, "Deleted chunks for item");
        Ok(count)
    }

    /// Aggregate statistics derived from current contents.
    pub fn stats(&self) -> Result<IndexStats> {
        let rtxn = self.index.read_txn()?;
        let docs = placeholder_docs(&self.index, &rtxn, None, usize::MAX)?;

        let mut items: BTreeMap<String, ItemStats> = BTreeMap::new();
        for doc in &docs {
            let item_id = doc
                .get("item_id")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            let entry = items.entry(item_id).or_insert_with(|| ItemStats {
                count: 0,
                title: str_field(doc, "title"),
                storage_key: str_field(doc, "storage_key"),
                citation_key: str_field(doc, "citation_key"),
            });
            entry.count += 1;
        }

        Ok(IndexStats {
            total_chunks: docs.len(),
            items,
        })
    }

    /// Drop every document, keeping the collection itself.
    pub async fn clear(&self) -> Result<()> {
        let cleared = self.worker.clear().await?;
        tracing::info!(collection = %self.collection, cleared, "Cleared vector index");
        Ok(())
    }
}

/// Collection identity; filesystem-safe.
fn collection_name(logical_name: &str, api: &str, model: &str) -> String {
    let sanitize = |s: &str| {
        s.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '-'
                }
            })
            .collect::<String>()
    };
    format!(
        "{}_{}_{}",
        sanitize(logical_name),
        sanitize(api),
        sanitize(model)
    )
}

/// Within-batch invariant check; a violation is a bug upstream and rejects
/// the whole batch before anything is embedded or written.
fn validate_batch(chunks: &[Chunk]) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for chunk in chunks {
        if chunk.item_id.is_empty() {
            bail!("chunk {} has no item_id", chunk.chunk_uid);
        }
        if !seen.insert((chunk.item_id.as_str(), chunk.split_id)) {
            bail!(
                "duplicate split_id {} for item {} in batch",
                chunk.split_id,
                chunk.item_id
            );
        }
        if chunk.length != chunk.content.chars().count() {
            bail!(
                "chunk {} length {} does not match content",
                chunk.chunk_uid,
                chunk.length
            );
        }
    }
    Ok(())
}

// ============================================================================
// milli plumbing
// ============================================================================

/// Open or create a milli index with our filterable attributes.
fn open_index(path: &Path) -> Result<Index> {
    std::fs::create_dir_all(path)?;

    let mut env_options = EnvOpenOptions::new();
    env_options.map_size(DEFAULT_MAP_SIZE);
    let env_options = env_options.read_txn_without_tls();

    let index = Index::new(env_options, path, true).context("Failed to create milli index")?;

    let filterable = ["item_id", "storage_key", "citation_key"];
    let needs_setup = {
        let rtxn = index.read_txn()?;
        let current_rules = index.filterable_attributes_rules(&rtxn)?;
        !filterable.iter().all(|field| {
            current_rules
                .iter()
                .any(|rule| matches!(rule, FilterableAttributesRule::Field(f) if f == field))
        })
    };

    if needs_setup {
        let indexer_config = IndexerConfig::default();
        let mut wtxn = index.write_txn()?;
        let mut settings = milli::update::Settings::new(&mut wtxn, &index, &indexer_config);
        settings.set_primary_key("id".to_string());
        settings.set_filterable_fields(
            filterable
                .iter()
                .map(|f| FilterableAttributesRule::Field(f.to_string()))
                .collect(),
        );
        settings.execute(&|| false, &Progress::default(), Default::default())?;
        wtxn.commit()?;
        tracing::info!("Configured primary key and filterable attributes");
    }

    Ok(index)
}

/// Register the user-provided embedder so milli indexes and searches the
/// vectors stored in documents.
fn configure_embedder(
    index: &Index,
    indexer_config: &IndexerConfig,
    embedder_name: &str,
    dimensions: usize,
) -> Result<()> {
    {
        let rtxn = index.read_txn()?;
        let embedders = index.embedding_configs();
        if embedders.embedder_id(&rtxn, embedder_name)?.is_some() {
            return Ok(());
        }
    }

    let mut wtxn = index.write_txn()?;
    let mut settings = milli::update::Settings::new(&mut wtxn, index, indexer_config);

    let embedder_settings = EmbeddingSettings {
        source: Setting::Set(EmbedderSource::UserProvided),
        model: Setting::NotSet,
        revision: Setting::NotSet,
        pooling: Setting::NotSet,
        api_key: Setting::NotSet,
        dimensions: Setting::Set(dimensions),
        binary_quantized: Setting::NotSet,
        document_template: Setting::NotSet,
        document_template_max_bytes: Setting::NotSet,
        url: Setting::NotSet,
        indexing_fragments: Setting::NotSet,
        search_fragments: Setting::NotSet,
        request: Setting::NotSet,
        response: Setting::NotSet,
        headers: Setting::NotSet,
        search_embedder: Setting::NotSet,
        indexing_embedder: Setting::NotSet,
        distribution: Setting::NotSet,
    };

    let mut embedders_map = BTreeMap::new();
    embedders_map.insert(embedder_name.to_string(), Setting::Set(embedder_settings));
    settings.set_embedder_settings(embedders_map);

    settings.execute(&|| false, &Progress::default(), Default::default())?;
    wtxn.commit()?;

    tracing::info!(
        embedder_name = embedder_name,
        dimensions = dimensions,
        "Embedder configured for vector search"
    );

    Ok(())
}

/// Embedder instance from the index's stored configuration.
fn get_embedder_from_index(
    index: &Index,
    rtxn: &RoTxn<'_>,
    embedder_name: &str,
) -> Result<Option<(Arc<MilliEmbedder>, bool)>> {
    let embedders = index.embedding_configs();

    let embedder_id = embedders.embedder_id(rtxn, embedder_name)?;
    if embedder_id.is_none() {
        return Ok(None);
    }

    let configs = embedders.embedding_configs(rtxn)?;
    let config = configs.iter().find(|c| c.name == embedder_name);

    match config {
        Some(cfg) => {
            let embedder = MilliEmbedder::new(cfg.config.embedder_options.clone(), 0)
                .map_err(|e| anyhow::anyhow!("Failed to create embedder: {}", e))?;
            let quantized = cfg.config.quantized.unwrap_or(false);
            Ok(Some((Arc::new(embedder), quantized)))
        }
        None => Ok(None),
    }
}

/// RuntimeEmbedders telling milli to accept pre-computed vectors from the
/// `_vectors` field without generating new ones.
fn create_user_provided_embedders(embedder_name: &str, dimensions: usize) -> RuntimeEmbedders {
    let manual_embedder = manual::Embedder::new(manual::EmbedderOptions {
        dimensions,
        distribution: None,
    });
    let embedder = Arc::new(MilliEmbedder::UserProvided(manual_embedder));
    let prompt = Prompt::default();

    let runtime_embedder = Arc::new(RuntimeEmbedder::new(embedder, prompt, vec![], false));

    let mut map = std::collections::HashMap::new();
    map.insert(embedder_name.to_string(), runtime_embedder);
    RuntimeEmbedders::new(map)
}

/// Pure-semantic search; falls back to keyword search only if the embedder
/// configuration is missing.
fn execute_semantic_search<'a>(
    index: &Index,
    rtxn: &'a RoTxn<'a>,
    search: &mut milli::Search<'a>,
    query_vector: Vec<f32>,
) -> Result<milli::SearchResult> {
    let Some((embedder, quantized)) = get_embedder_from_index(index, rtxn, EMBEDDER_NAME)? else {
        tracing::warn!("Embedder not configured, falling back to keyword search");
        return Ok(search.execute()?);
    };

    search.semantic(
        EMBEDDER_NAME.to_string(),
        embedder,
        quantized,
        Some(query_vector),
        None,
    );

    match search.execute_hybrid(1.0) {
        Ok((result, _)) => Ok(result),
        Err(e) => {
            tracing::error!(error = %e, "Semantic search failed, falling back to keyword");
            Ok(search.execute()?)
        }
    }
}

fn apply_filter(search: &mut milli::Search<'_>, filter_str: Option<&str>) -> Result<()> {
    if let Some(fs) = filter_str {
        if let Some(f) =
            milli::Filter::from_str(fs).map_err(|e| anyhow::anyhow!("Filter error: {:?}", e))?
        {
            search.filter(f);
        }
    }
    Ok(())
}

/// Equality predicate map → milli filter expression.
fn filter_string(filter: &BTreeMap<String, String>) -> String {
    filter
        .iter()
        .map(|(key, value)| format!("{} = {}", key, quote_filter_value(value)))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn quote_filter_value(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\\\""))
}

/// Placeholder search (no vector scoring) returning raw documents.
fn placeholder_docs(
    index: &Index,
    rtxn: &RoTxn<'_>,
    filter_str: Option<&str>,
    limit: usize,
) -> Result<Vec<Map<String, Value>>> {
    let mut search = milli::Search::new(rtxn, index);
    search.query("");
    search.limit(limit);
    apply_filter(&mut search, filter_str)?;

    let result = search.execute()?;
    let mut docs = Vec::with_capacity(result.documents_ids.len());
    for doc_id in result.documents_ids {
        if let Some(doc) = get_document(index, rtxn, doc_id)? {
            docs.push(doc);
        }
    }
    Ok(docs)
}

/// Fetch one document as a JSON object.
fn get_document(
    index: &Index,
    rtxn: &RoTxn<'_>,
    doc_id: u32,
) -> Result<Option<Map<String, Value>>> {
    let fields_ids_map = index.fields_ids_map(rtxn)?;
    let docs = index.documents(rtxn, [doc_id])?;
    if let Some((_id, obkv)) = docs.first() {
        let obj = milli::all_obkv_to_json(obkv, &fields_ids_map)?;
        Ok(Some(obj))
    } else {
        Ok(None)
    }
}

fn str_field(doc: &Map<String, Value>, key: &str) -> String {
    doc.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Flatten a chunk into the document shape milli stores.
fn chunk_to_doc(chunk: &Chunk, vector: Option<Vec<f32>>) -> Map<String, Value> {
    let mut m = Map::new();
    m.insert("id".to_string(), Value::String(chunk.chunk_uid.clone()));
    m.insert("item_id".to_string(), Value::String(chunk.item_id.clone()));
    m.insert(
        "storage_key".to_string(),
        Value::String(chunk.storage_key.clone()),
    );
    m.insert(
        "citation_key".to_string(),
        Value::String(chunk.citation_key.clone()),
    );
    m.insert("title".to_string(), Value::String(chunk.title.clone()));
    m.insert("authors".to_string(), Value::String(chunk.authors.clone()));
    m.insert("date".to_string(), Value::String(chunk.date.clone()));
    m.insert("split_id".to_string(), Value::Number(chunk.split_id.into()));
    m.insert(
        "table".to_string(),
        serde_json::to_value(chunk.table).unwrap_or(Value::Bool(false)),
    );
    m.insert("length".to_string(), Value::Number(chunk.length.into()));
    m.insert("added_at".to_string(), Value::Number(chunk.added_at.into()));
    m.insert("content".to_string(), Value::String(chunk.content.clone()));
    for (key, text) in &chunk.levels {
        m.insert(key.clone(), Value::String(text.clone()));
    }
    if !chunk.extra.is_empty() {
        m.insert(
            "extra".to_string(),
            Value::Object(chunk.extra.clone().into_iter().collect()),
        );
    }
    if let Some(vector) = vector {
        m.insert("_vectors".to_string(), json!({ EMBEDDER_NAME: [vector] }));
    }
    m
}

/// Rebuild a chunk from a stored document.
fn doc_to_chunk(doc: &Map<String, Value>) -> Chunk {
    let levels = (1..=MAX_LEVEL)
        .filter_map(|depth| {
            let key = format!("level{depth}");
            doc.get(&key)
                .and_then(Value::as_str)
                .map(|text| (key, text.to_string()))
        })
        .collect();

    let table = doc
        .get("table")
        .cloned()
        .and_then(|v| serde_json::from_value::<TableFlag>(v).ok())
        .unwrap_or(TableFlag::None);

    let extra = doc
        .get("extra")
        .and_then(Value::as_object)
        .map(|obj| obj.clone().into_iter().collect())
        .unwrap_or_default();

    Chunk {
        chunk_uid: str_field(doc, "id"),
        item_id: str_field(doc, "item_id"),
        storage_key: str_field(doc, "storage_key"),
        citation_key: str_field(doc, "citation_key"),
        title: str_field(doc, "title"),
        authors: str_field(doc, "authors"),
        date: str_field(doc, "date"),
        split_id: doc.get("split_id").and_then(Value::as_u64).unwrap_or(0) as usize,
        levels,
        table,
        length: doc.get("length").and_then(Value::as_u64).unwrap_or(0) as usize,
        added_at: doc.get("added_at").and_then(Value::as_i64).unwrap_or(0),
        content: str_field(doc, "content"),
        extra,
    }
}

/// Index a batch of documents, splitting into write batches.
pub(crate) fn index_documents_batch(
    index: &Index,
    indexer_config: &IndexerConfig,
    docs: Vec<Map<String, Value>>,
    dimensions: Option<usize>,
) -> Result<()> {
    if docs.is_empty() {
        return Ok(());
    }
    for batch in docs.chunks(BATCH_SIZE) {
        index_document_batch(index, indexer_config, batch, dimensions)?;
    }
    Ok(())
}

fn index_document_batch(
    index: &Index,
    indexer_config: &IndexerConfig,
    docs: &[Map<String, Value>],
    dimensions: Option<usize>,
) -> Result<()> {
    let mmap = mmap_from_objects(docs.to_vec());

    let rtxn = index.read_txn()?;
    let db_fields_ids_map = index.fields_ids_map(&rtxn)?;
    let mut new_fields_ids_map = db_fields_ids_map.clone();

    let mut operation = DocumentOperation::new();
    operation.replace_documents(&mmap)?;

    let indexer_alloc = Bump::new();
    let (document_changes, operation_stats, primary_key) = operation.into_changes(
        &indexer_alloc,
        index,
        &rtxn,
        None,
        &mut new_fields_ids_map,
        &|| false,
        Progress::default(),
        None,
    )?;

    if let Some(error) = operation_stats.into_iter().find_map(|stat| stat.error) {
        anyhow::bail!("Document operation error: {}", error);
    }

    let mut wtxn = index.write_txn()?;

    let embedders = dimensions
        .map(|dims| create_user_provided_embedders(EMBEDDER_NAME, dims))
        .unwrap_or_default();

    indexer_config
        .thread_pool
        .install(|| {
            indexer::index(
                &mut wtxn,
                index,
                &indexer_config.thread_pool,
                indexer_config.grenad_parameters(),
                &db_fields_ids_map,
                new_fields_ids_map,
                primary_key,
                &document_changes,
                embedders,
                &|| false,
                &Progress::default(),
                &Default::default(),
            )
        })
        .map_err(|e| anyhow::anyhow!("Thread pool error: {}", e))??;

    wtxn.commit()?;

    Ok(())
}

/// Delete documents by external id in one write transaction.
pub(crate) fn delete_documents_by_id(
    index: &Index,
    indexer_config: &IndexerConfig,
    ids: &[String],
) -> Result<()> {
    if ids.is_empty() {
        return Ok(());
    }

    let id_refs: Vec<&str> = ids.iter().map(|s| s.as_str()).collect();

    let rtxn = index.read_txn()?;
    let db_fields_ids_map = index.fields_ids_map(&rtxn)?;
    let mut new_fields_ids_map = db_fields_ids_map.clone();

    let mut operation = DocumentOperation::new();
    operation.delete_documents(&id_refs);

    let indexer_alloc = Bump::new();
    let (document_changes, operation_stats, primary_key) = operation.into_changes(
        &indexer_alloc,
        index,
        &rtxn,
        None,
        &mut new_fields_ids_map,
        &|| false,
        Progress::default(),
        None,
    )?;

    if let Some(error) = operation_stats.into_iter().find_map(|stat| stat.error) {
        anyhow::bail!("Document deletion error: {}", error);
    }

    let mut wtxn = index.write_txn()?;

    indexer_config
        .thread_pool
        .install(|| {
            indexer::index(
                &mut wtxn,
                index,
                &indexer_config.thread_pool,
                indexer_config.grenad_parameters(),
                &db_fields_ids_map,
                new_fields_ids_map,
                primary_key,
                &document_changes,
                RuntimeEmbedders::default(),
                &|| false,
                &Progress::default(),
                &Default::default(),
            )
        })
        .map_err(|e| anyhow::anyhow!("Thread pool error: {}", e))??;

    wtxn.commit()?;

    tracing::debug!(deleted = ids.len(), "Deleted documents from index");

    Ok(())
}

/// Drop every document from the index.
pub(crate) fn clear_all_documents(index: &Index) -> Result<u64> {
    let mut wtxn = index.write_txn()?;
    let cleared = ClearDocuments::new(&mut wtxn, index).execute()?;
    wtxn.commit()?;
    Ok(cleared)
}
