//! Read-only access to the user's reference library.
//!
//! [`BibItem`] is the canonical projection of one parent bibliographic entry;
//! [`LibrarySource`] is the seam the indexer talks through, implemented by
//! the remote [`ZoteroClient`] and by [`MemoryLibrary`] for tests.

pub mod zotero;

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::chunker::ChunkMeta;

pub use zotero::ZoteroClient;

/// A bibliographic record corresponding to one parent entry in the library.
///
/// `pdf_path` is set only when a PDF attachment exists and resolves on disk;
/// an item without one is unindexable and gets skipped by the indexer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BibItem {
    pub item_id: String,
    /// Directory key under which the reference manager stores attachments
    pub storage_key: Option<String>,
    pub title: String,
    /// Creators joined as "Last, First; Last, First"
    pub authors: String,
    pub date: String,
    pub abstract_note: String,
    pub doi: String,
    pub url: String,
    pub publication: String,
    pub item_type: String,
    pub tags: Vec<String>,
    /// Collection names joined as a ": "-separated path
    pub collections: String,
    pub citation_key: String,
    pub pdf_path: Option<PathBuf>,
}

impl BibItem {
    /// Metadata merged into every chunk produced from this item.
    pub fn chunk_meta(&self) -> ChunkMeta {
        let mut extra = BTreeMap::new();
        extra.insert("source".to_string(), serde_json::json!("Zotero"));
        if !self.abstract_note.is_empty() {
            extra.insert("abstract".to_string(), serde_json::json!(self.abstract_note));
        }
        if !self.doi.is_empty() {
            extra.insert("doi".to_string(), serde_json::json!(self.doi));
        }
        if !self.url.is_empty() {
            extra.insert("url".to_string(), serde_json::json!(self.url));
        }
        if !self.publication.is_empty() {
            extra.insert("publication".to_string(), serde_json::json!(self.publication));
        }
        if !self.item_type.is_empty() {
            extra.insert("item_type".to_string(), serde_json::json!(self.item_type));
        }
        if !self.tags.is_empty() {
            extra.insert("tags".to_string(), serde_json::json!(self.tags.join("; ")));
        }
        if !self.collections.is_empty() {
            extra.insert("collections".to_string(), serde_json::json!(self.collections));
        }

        ChunkMeta {
            item_id: self.item_id.clone(),
            storage_key: self.storage_key.clone().unwrap_or_default(),
            citation_key: self.citation_key.clone(),
            title: self.title.clone(),
            authors: self.authors.clone(),
            date: self.date.clone(),
            extra,
        }
    }
}

/// How to select items from the library.
#[derive(Debug, Clone)]
pub enum ItemSelector {
    /// Title/creator/year search
    ByName(String),
    ById(String),
    ByCollectionId(String),
    ByCollectionName(String),
    /// Pre-resolved items, passed through unchanged
    Explicit(Vec<BibItem>),
}

/// Read operations over the external reference manager.
#[async_trait]
pub trait LibrarySource: Send + Sync {
    /// Total number of items in the library.
    async fn count_items(&self) -> Result<u64>;

    /// Collections as a name → id map.
    async fn list_collections(&self) -> Result<BTreeMap<String, String>>;

    /// Fetch a single parent item. Child/attachment items resolve to `None`.
    async fn get_item(&self, item_id: &str) -> Result<Option<BibItem>>;

    /// Fetch the parent item whose attachment lives under `storage_key`.
    ///
    /// The storage key is usually the attachment child's own key, not the
    /// parent's, so this resolves through the attachment when needed.
    async fn get_item_by_storage_key(&self, storage_key: &str) -> Result<Option<BibItem>>;

    /// Resolve items for a selector. A single item failing to resolve is
    /// skipped, never aborting the whole query.
    async fn get_items(&self, selector: &ItemSelector) -> Result<Vec<BibItem>>;
}

/// In-memory library for tests and offline runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryLibrary {
    pub items: Vec<BibItem>,
    /// name → id
    pub collections: BTreeMap<String, String>,
    /// collection id → member item ids
    pub members: BTreeMap<String, Vec<String>>,
}

impl MemoryLibrary {
    pub fn new(items: Vec<BibItem>) -> Self {
        Self {
            items,
            ..Self::default()
        }
    }

    pub fn with_collection(mut self, name: &str, id: &str, member_ids: &[&str]) -> Self {
        self.collections.insert(name.to_string(), id.to_string());
        self.members.insert(
            id.to_string(),
            member_ids.iter().map(|s| s.to_string()).collect(),
        );
        self
    }
}

#[async_trait]
impl LibrarySource for MemoryLibrary {
    async fn count_items(&self) -> Result<u64> {
        Ok(self.items.len() as u64)
    }

    async fn list_collections(&self) -> Result<BTreeMap<String, String>> {
        Ok(self.collections.clone())
    }

    async fn get_item(&self, item_id: &str) -> Result<Option<BibItem>> {
        Ok(self.items.iter().find(|i| i.item_id == item_id).cloned())
    }

    async fn get_item_by_storage_key(&self, storage_key: &str) -> Result<Option<BibItem>> {
        Ok(self
            .items
            .iter()
            .find(|i| i.storage_key.as_deref() == Some(storage_key))
            .cloned())
    }

    async fn get_items(&self, selector: &ItemSelector) -> Result<Vec<BibItem>> {
        match selector {
            ItemSelector::ByName(q) => {
                let needle = q.to_lowercase();
                Ok(self
                    .items
                    .iter()
                    .filter(|i| i.title.to_lowercase().contains(&needle))
                    .cloned()
                    .collect())
            }
            ItemSelector::ById(id) => Ok(self.get_item(id).await?.into_iter().collect()),
            ItemSelector::ByCollectionId(cid) => {
                let Some(member_ids) = self.members.get(cid) else {
                    return Ok(Vec::new());
                };
                Ok(self
                    .items
                    .iter()
                    .filter(|i| member_ids.contains(&i.item_id))
                    .cloned()
                    .collect())
            }
            ItemSelector::ByCollectionName(name) => {
                let Some(cid) = self.collections.get(name) else {
                    tracing::warn!(collection = %name, "Collection not found");
                    return Ok(Vec::new());
                };
                let cid = cid.clone();
                self.get_items(&ItemSelector::ByCollectionId(cid)).await
            }
            ItemSelector::Explicit(items) => Ok(items.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, title: &str) -> BibItem {
        BibItem {
            item_id: id.to_string(),
            title: title.to_string(),
            ..BibItem::default()
        }
    }

    #[tokio::test]
    async fn memory_library_selectors() {
        let lib = MemoryLibrary::new(vec![
            item("A", "Criticality in EEG"),
            item("B", "Neural avalanches"),
            item("C", "Climate models"),
        ])
        .with_collection("Neuro", "C1", &["A", "B"]);

        assert_eq!(lib.count_items().await.unwrap(), 3);

        let by_name = lib
            .get_items(&ItemSelector::ByName("eeg".to_string()))
            .await
            .unwrap();
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].item_id, "A");

        let by_collection = lib
            .get_items(&ItemSelector::ByCollectionId("C1".to_string()))
            .await
            .unwrap();
        assert_eq!(by_collection.len(), 2);

        let by_collection_name = lib
            .get_items(&ItemSelector::ByCollectionName("Neuro".to_string()))
            .await
            .unwrap();
        assert_eq!(by_collection_name.len(), 2);

        let missing = lib
            .get_items(&ItemSelector::ByCollectionName("Nope".to_string()))
            .await
            .unwrap();
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn memory_library_storage_key_lookup() {
        let mut bib = item("A", "Criticality in EEG");
        bib.storage_key = Some("STOR-A".to_string());
        let lib = MemoryLibrary::new(vec![bib]);

        let found = lib.get_item_by_storage_key("STOR-A").await.unwrap();
        assert_eq!(found.unwrap().item_id, "A");

        // The item id is not a storage key
        assert!(lib.get_item_by_storage_key("A").await.unwrap().is_none());
        assert!(lib.get_item_by_storage_key("missing").await.unwrap().is_none());
    }

    #[test]
    fn chunk_meta_copies_identity_fields() {
        let bib = BibItem {
            item_id: "I1".to_string(),
            storage_key: Some("S1".to_string()),
            citation_key: "doe_2021".to_string(),
            title: "Title".to_string(),
            authors: "Doe, Jane".to_string(),
            date: "2021".to_string(),
            tags: vec!["eeg".to_string(), "sleep".to_string()],
            ..BibItem::default()
        };
        let meta = bib.chunk_meta();
        assert_eq!(meta.item_id, "I1");
        assert_eq!(meta.storage_key, "S1");
        assert_eq!(meta.citation_key, "doe_2021");
        assert_eq!(meta.extra.get("source").unwrap(), "Zotero");
        assert_eq!(meta.extra.get("tags").unwrap(), "eeg; sleep");
    }
}
