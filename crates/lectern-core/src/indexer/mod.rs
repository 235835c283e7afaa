//! Indexing pipeline orchestration.
//!
//! Resolves items from the library, converts their PDFs to Markdown,
//! chunks, and upserts into the vector index. Items are processed
//! sequentially; one item failing is recorded and the batch continues.
//! Re-indexing is idempotent: an already-indexed item is skipped unless
//! `force` is set, in which case its old chunks are deleted before any new
//! chunk is inserted.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use crate::chunker::{self, ChunkerConfig};
use crate::convert::ConverterGateway;
use crate::index::VectorIndex;
use crate::library::{BibItem, ItemSelector, LibrarySource};

/// Progress callback, invoked as `(done, total)` after each item.
///
/// Called from the task driving the pipeline; it must not block long.
pub type ProgressFn = dyn Fn(usize, usize) + Send + Sync;

/// Why one item failed to index. The batch continues past any of these.
#[derive(Debug, thiserror::Error)]
pub enum ItemFailure {
    #[error("no pdf")]
    NoPdf,
    #[error("markdown conversion failed: {0}")]
    Conversion(String),
    #[error("chunking failed: {0}")]
    Chunking(String),
    #[error("no chunks")]
    NoChunks,
    #[error("index write failed: {0}")]
    IndexWrite(String),
    #[error("delete of existing chunks failed: {0}")]
    Delete(String),
    #[error("library lookup failed: {0}")]
    Lookup(String),
    #[error("item not found in library")]
    ItemNotFound,
}

/// Per-item failure record.
#[derive(Debug)]
pub struct FailedItem {
    pub pdf_path: Option<PathBuf>,
    pub item_id: String,
    pub title: String,
    pub reason: ItemFailure,
}

/// Aggregated outcome of an indexing run.
#[derive(Debug, Default)]
pub struct IndexingResult {
    pub total: usize,
    pub successful: usize,
    /// Already indexed and not forced; not counted as failed
    pub skipped: usize,
    pub failed: usize,
    pub failed_items: Vec<FailedItem>,
    pub chunks_created: usize,
}

impl IndexingResult {
    fn record_failure(&mut self, item: &BibItem, reason: ItemFailure) {
        tracing::warn!(
            item_id = %item.item_id,
            title = %item.title,
            reason = %reason,
            "Item failed to index"
        );
        self.failed += 1;
        self.failed_items.push(FailedItem {
            pdf_path: item.pdf_path.clone(),
            item_id: item.item_id.clone(),
            title: item.title.clone(),
            reason,
        });
    }
}

/// Indexing behavior knobs.
#[derive(Debug, Clone)]
pub struct IndexingConfig {
    pub markdown_root: PathBuf,
    pub force_reindex: bool,
    pub chunker: ChunkerConfig,
}

/// Orchestrates library → converter → chunker → vector index.
pub struct Indexer {
    library: Arc<dyn LibrarySource>,
    gateway: ConverterGateway,
    index: Arc<VectorIndex>,
    config: IndexingConfig,
    cancel: CancellationToken,
}

impl Indexer {
    pub fn new(
        library: Arc<dyn LibrarySource>,
        gateway: ConverterGateway,
        index: Arc<VectorIndex>,
        config: IndexingConfig,
    ) -> Self {
        Self {
            library,
            gateway,
            index,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that cancels the run between items.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Index every item the selector resolves to.
    pub async fn update_index(
        &self,
        selector: &ItemSelector,
        force: bool,
        progress: Option<&ProgressFn>,
    ) -> Result<IndexingResult> {
        let force = force || self.config.force_reindex;
        let items = self
            .library
            .get_items(selector)
            .await
            .context("Failed to resolve items from library")?;

        tracing::info!(item_count = items.len(), force, "Starting index update");
        let result = self.index_items(&items, force, progress).await?;
        tracing::info!(
            total = result.total,
            successful = result.successful,
            skipped = result.skipped,
            failed = result.failed,
            chunks_created = result.chunks_created,
            "Index update complete"
        );
        Ok(result)
    }

    async fn index_items(
        &self,
        items: &[BibItem],
        force: bool,
        progress: Option<&ProgressFn>,
    ) -> Result<IndexingResult> {
        let total = items.len();
        let mut result = IndexingResult {
            total,
            ..IndexingResult::default()
        };

        for (i, item) in items.iter().enumerate() {
            if self.cancel.is_cancelled() {
                tracing::info!(done = i, total, "Indexing cancelled");
                break;
            }

            match self.index_one(item, force).await {
                Ok(Some(chunk_count)) => {
                    result.successful += 1;
                    result.chunks_created += chunk_count;
                    tracing::info!(
                        item_id = %item.item_id,
                        chunk_count,
                        "Indexed item {}/{}",
                        i + 1,
                        total
                    );
                }
                Ok(None) => {
                    tracing::debug!(item_id = %item.item_id, "Already indexed, skipping");
                    result.skipped += 1;
                }
                Err(reason) => result.record_failure(item, reason),
            }

            if let Some(callback) = progress {
                callback(i + 1, total);
            }
        }

        Ok(result)
    }

    /// Index one item. `Ok(None)` means it was already indexed and skipped.
    async fn index_one(&self, item: &BibItem, force: bool) -> Result<Option<usize>, ItemFailure> {
        let existing = self
            .index
            .uids_for_item(&item.item_id)
            .map_err(|e| ItemFailure::IndexWrite(e.to_string()))?;

        if !existing.is_empty() {
            if !force {
                return Ok(None);
            }
            // Old generation goes away before any new chunk is inserted
            self.index
                .delete_by_item(&item.item_id)
                .await
                .map_err(|e| ItemFailure::Delete(e.to_string()))?;
        }

        let Some(pdf_path) = &item.pdf_path else {
            return Err(ItemFailure::NoPdf);
        };

        let storage_key = item
            .storage_key
            .clone()
            .unwrap_or_else(|| item.item_id.clone());
        let stem = pdf_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        let md_path = self
            .config
            .markdown_root
            .join(&storage_key)
            .join(format!("{stem}.md"));

        self.gateway
            .convert(pdf_path, &md_path)
            .await
            .map_err(|e| ItemFailure::Conversion(e.to_string()))?;

        self.chunk_and_add(&md_path, item).await.map(Some)
    }

    /// Steps shared with [`Self::index_local_markdown`]: chunk a cached
    /// Markdown file and add the chunks.
    async fn chunk_and_add(
        &self,
        md_path: &std::path::Path,
        item: &BibItem,
    ) -> Result<usize, ItemFailure> {
        let chunks = chunker::chunk(md_path, &self.config.chunker, &item.chunk_meta())
            .map_err(|e| ItemFailure::Chunking(e.to_string()))?;

        if chunks.is_empty() {
            return Err(ItemFailure::NoChunks);
        }

        let count = chunks.len();
        self.index
            .add(chunks)
            .await
            .map_err(|e| ItemFailure::IndexWrite(e.to_string()))?;
        Ok(count)
    }

    /// Re-index from the local Markdown cache, skipping conversion.
    ///
    /// Walks `markdown_root`, infers the storage key from each parent
    /// directory name, looks the owning item up by that storage key and
    /// runs chunk → add.
    pub async fn index_local_markdown(
        &self,
        force: bool,
        progress: Option<&ProgressFn>,
    ) -> Result<IndexingResult> {
        let force = force || self.config.force_reindex;
        let entries = local_markdown_entries(&self.config.markdown_root)?;
        let total = entries.len();
        tracing::info!(file_count = total, "Indexing local markdown cache");

        let mut result = IndexingResult {
            total,
            ..IndexingResult::default()
        };

        for (i, (storage_key, md_path)) in entries.iter().enumerate() {
            if self.cancel.is_cancelled() {
                break;
            }

            let item = match self.library.get_item_by_storage_key(storage_key).await {
                Ok(Some(item)) => item,
                Ok(None) => {
                    result.record_failure(
                        &BibItem {
                            item_id: storage_key.clone(),
                            storage_key: Some(storage_key.clone()),
                            ..BibItem::default()
                        },
                        ItemFailure::ItemNotFound,
                    );
                    continue;
                }
                Err(e) => {
                    result.record_failure(
                        &BibItem {
                            item_id: storage_key.clone(),
                            storage_key: Some(storage_key.clone()),
                            ..BibItem::default()
                        },
                        ItemFailure::Lookup(e.to_string()),
                    );
                    continue;
                }
            };

            let existing = self
                .index
                .uids_for_item(&item.item_id)
                .unwrap_or_default();
            if !existing.is_empty() {
                if !force {
                    result.skipped += 1;
                    continue;
                }
                if let Err(e) = self.index.delete_by_item(&item.item_id).await {
                    result.record_failure(&item, ItemFailure::Delete(e.to_string()));
                    continue;
                }
            }

            match self.chunk_and_add(md_path, &item).await {
                Ok(count) => {
                    result.successful += 1;
                    result.chunks_created += count;
                }
                Err(reason) => result.record_failure(&item, reason),
            }

            if let Some(callback) = progress {
                callback(i + 1, total);
            }
        }

        Ok(result)
    }
}

/// `(storage_key, markdown_path)` pairs under the markdown root.
fn local_markdown_entries(markdown_root: &std::path::Path) -> Result<Vec<(String, PathBuf)>> {
    let mut entries = Vec::new();
    if !markdown_root.exists() {
        return Ok(entries);
    }

    for dir_entry in std::fs::read_dir(markdown_root)? {
        let dir_entry = dir_entry?;
        if !dir_entry.file_type()?.is_dir() {
            continue;
        }
        let storage_key = dir_entry.file_name().to_string_lossy().into_owned();
        for file_entry in std::fs::read_dir(dir_entry.path())? {
            let path = file_entry?.path();
            if path.extension().map(|e| e == "md").unwrap_or(false) {
                entries.push((storage_key.clone(), path));
            }
        }
    }

    entries.sort();
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    use crate::convert::{ConverterGateway, FixtureConverter};
    use crate::embed::Embedder;
    use crate::library::MemoryLibrary;

    const MARKDOWN: &str = "\
# Introduction
This paper studies neural criticality in some depth.
## Results
Avalanche statistics follow a power law distribution.
";

    struct Fixture {
        _dir: tempfile::TempDir,
        library: MemoryLibrary,
        markdown_root: PathBuf,
        index: Arc<VectorIndex>,
    }

    fn make_item(dir: &std::path::Path, id: &str) -> BibItem {
        let storage = dir.join("storage").join(format!("S-{id}"));
        std::fs::create_dir_all(&storage).unwrap();
        let pdf = storage.join(format!("{id}.pdf"));
        std::fs::write(&pdf, format!("%PDF fake {id}")).unwrap();

        BibItem {
            item_id: id.to_string(),
            storage_key: Some(format!("S-{id}")),
            title: format!("Paper {id}"),
            authors: "Doe, Jane".to_string(),
            date: "2021".to_string(),
            citation_key: format!("doe_{id}_2021"),
            pdf_path: Some(pdf),
            ..BibItem::default()
        }
    }

    fn fixture(item_ids: &[&str]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let items: Vec<BibItem> = item_ids.iter().map(|id| make_item(dir.path(), id)).collect();
        let ids: Vec<&str> = item_ids.to_vec();
        let library = MemoryLibrary::new(items).with_collection("Papers", "C1", &ids);
        let markdown_root = dir.path().join("markdown");
        let index = Arc::new(
            VectorIndex::open(&dir.path().join("index"), "test", Embedder::mock(4)).unwrap(),
        );
        Fixture {
            _dir: dir,
            library,
            markdown_root,
            index,
        }
    }

    fn indexer(fx: &Fixture, converter: FixtureConverter) -> Indexer {
        Indexer::new(
            Arc::new(fx.library.clone()),
            ConverterGateway::new(Box::new(converter), true),
            fx.index.clone(),
            IndexingConfig {
                markdown_root: fx.markdown_root.clone(),
                force_reindex: false,
                chunker: ChunkerConfig::default(),
            },
        )
    }

    #[tokio::test]
    async fn fresh_index_of_collection() {
        let fx = fixture(&["A", "B", "C"]);
        let indexer = indexer(&fx, FixtureConverter::new(MARKDOWN));

        let result = indexer
            .update_index(&ItemSelector::ByCollectionId("C1".to_string()), false, None)
            .await
            .unwrap();

        assert_eq!(result.total, 3);
        assert_eq!(result.successful, 3);
        assert_eq!(result.failed, 0);
        assert!(result.chunks_created > 0);

        let stats = fx.index.stats().unwrap();
        assert_eq!(stats.items.len(), 3);
    }

    #[tokio::test]
    async fn second_run_skips_everything() {
        let fx = fixture(&["A", "B"]);
        let indexer = indexer(&fx, FixtureConverter::new(MARKDOWN));
        let selector = ItemSelector::ByCollectionId("C1".to_string());

        let first = indexer.update_index(&selector, false, None).await.unwrap();
        assert_eq!(first.successful, 2);

        let second = indexer.update_index(&selector, false, None).await.unwrap();
        assert_eq!(second.successful, 0);
        assert_eq!(second.skipped, 2);
        assert_eq!(second.chunks_created, 0);

        // stats unchanged
        assert_eq!(
            fx.index.stats().unwrap().total_chunks,
            first.chunks_created
        );
    }

    #[tokio::test]
    async fn forced_reindex_replaces_chunks_with_fresh_uids() {
        let fx = fixture(&["A"]);
        let indexer = indexer(&fx, FixtureConverter::new(MARKDOWN));
        let selector = ItemSelector::ById("A".to_string());

        let first = indexer.update_index(&selector, false, None).await.unwrap();
        let uids_before: HashSet<String> =
            fx.index.uids_for_item("A").unwrap().into_iter().collect();

        let second = indexer.update_index(&selector, true, None).await.unwrap();
        assert_eq!(second.successful, 1);
        assert_eq!(second.chunks_created, first.chunks_created);

        let uids_after: HashSet<String> =
            fx.index.uids_for_item("A").unwrap().into_iter().collect();
        assert_eq!(uids_before.len(), uids_after.len());
        assert!(uids_before.is_disjoint(&uids_after));

        // (item_id, split_id) set is identical across generations
        let stats = fx.index.stats().unwrap();
        assert_eq!(stats.total_chunks, first.chunks_created);
    }

    #[tokio::test]
    async fn item_without_pdf_fails_but_batch_continues() {
        let fx = fixture(&["A", "B"]);
        let mut items = fx.library.items.clone();
        items[0].pdf_path = None;
        let library = MemoryLibrary::new(items);

        let indexer = Indexer::new(
            Arc::new(library.clone()),
            ConverterGateway::new(Box::new(FixtureConverter::new(MARKDOWN)), true),
            fx.index.clone(),
            IndexingConfig {
                markdown_root: fx.markdown_root.clone(),
                force_reindex: false,
                chunker: ChunkerConfig::default(),
            },
        );

        let result = indexer
            .update_index(&ItemSelector::Explicit(library.items.clone()), false, None)
            .await
            .unwrap();

        assert_eq!(result.successful, 1);
        assert_eq!(result.failed, 1);
        assert!(matches!(result.failed_items[0].reason, ItemFailure::NoPdf));
        assert_eq!(result.failed_items[0].item_id, "A");
    }

    #[tokio::test]
    async fn conversion_failure_is_recorded() {
        let fx = fixture(&["A"]);
        let indexer = indexer(&fx, FixtureConverter::failing());

        let result = indexer
            .update_index(&ItemSelector::ById("A".to_string()), false, None)
            .await
            .unwrap();

        assert_eq!(result.failed, 1);
        assert!(matches!(
            result.failed_items[0].reason,
            ItemFailure::Conversion(_)
        ));
    }

    #[tokio::test]
    async fn empty_markdown_records_no_chunks() {
        let fx = fixture(&["A"]);
        let indexer = indexer(&fx, FixtureConverter::new(""));

        let result = indexer
            .update_index(&ItemSelector::ById("A".to_string()), false, None)
            .await
            .unwrap();

        assert_eq!(result.failed, 1);
        assert!(matches!(
            result.failed_items[0].reason,
            ItemFailure::NoChunks
        ));
    }

    #[tokio::test]
    async fn progress_is_reported_per_item() {
        let fx = fixture(&["A", "B", "C"]);
        let indexer = indexer(&fx, FixtureConverter::new(MARKDOWN));

        let seen: Arc<Mutex<Vec<(usize, usize)>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let progress = move |done: usize, total: usize| {
            seen_clone.lock().unwrap().push((done, total));
        };

        indexer
            .update_index(
                &ItemSelector::ByCollectionId("C1".to_string()),
                false,
                Some(&progress),
            )
            .await
            .unwrap();

        assert_eq!(&*seen.lock().unwrap(), &[(1, 3), (2, 3), (3, 3)]);
    }

    #[tokio::test]
    async fn cancellation_stops_between_items() {
        let fx = fixture(&["A", "B", "C"]);
        let indexer = indexer(&fx, FixtureConverter::new(MARKDOWN));
        indexer.cancel_token().cancel();

        let result = indexer
            .update_index(&ItemSelector::ByCollectionId("C1".to_string()), false, None)
            .await
            .unwrap();

        assert_eq!(result.successful, 0);
        assert_eq!(result.failed, 0);
    }

    #[tokio::test]
    async fn local_markdown_reindex() {
        let fx = fixture(&["A"]);
        // The cache directory is named by the storage key, which differs
        // from the item id, exactly as update_index lays it out
        let md_dir = fx.markdown_root.join("S-A");
        std::fs::create_dir_all(&md_dir).unwrap();
        std::fs::write(md_dir.join("paper.md"), MARKDOWN).unwrap();

        let indexer = indexer(&fx, FixtureConverter::new(MARKDOWN));
        let result = indexer.index_local_markdown(false, None).await.unwrap();

        assert_eq!(result.total, 1);
        assert_eq!(result.successful, 1);
        assert!(result.chunks_created > 0);

        // Chunks are attributed to the owning item, not the storage key
        assert!(!fx.index.uids_for_item("A").unwrap().is_empty());
        assert!(fx.index.uids_for_item("S-A").unwrap().is_empty());

        // Second pass skips
        let again = indexer.index_local_markdown(false, None).await.unwrap();
        assert_eq!(again.skipped, 1);
    }

    #[tokio::test]
    async fn local_markdown_walks_update_index_layout() {
        let fx = fixture(&["A"]);
        let indexer = indexer(&fx, FixtureConverter::new(MARKDOWN));
        indexer
            .update_index(&ItemSelector::ById("A".to_string()), false, None)
            .await
            .unwrap();

        // Drop the chunks but keep the markdown cache, then rebuild from it
        fx.index.delete_by_item("A").await.unwrap();
        let result = indexer.index_local_markdown(false, None).await.unwrap();

        assert_eq!(result.total, 1);
        assert_eq!(result.successful, 1);
        assert!(!fx.index.uids_for_item("A").unwrap().is_empty());
    }

    #[tokio::test]
    async fn local_markdown_unknown_item_is_recorded() {
        let fx = fixture(&["A"]);
        let md_dir = fx.markdown_root.join("UNKNOWN");
        std::fs::create_dir_all(&md_dir).unwrap();
        std::fs::write(md_dir.join("ghost.md"), MARKDOWN).unwrap();

        let indexer = indexer(&fx, FixtureConverter::new(MARKDOWN));
        let result = indexer.index_local_markdown(false, None).await.unwrap();

        assert_eq!(result.failed, 1);
        assert!(matches!(
            result.failed_items[0].reason,
            ItemFailure::ItemNotFound
        ));
    }
}
