//! Zotero web API client.
//!
//! Wraps the v3 REST API (`/users/{library_id}` prefix, `Zotero-API-Key`
//! header) and resolves each parent item to a [`BibItem`] with a local PDF
//! path when one exists under `<library_root>/storage/<storage_key>/`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::RwLock;

use super::{BibItem, ItemSelector, LibrarySource};
use crate::config::Secrets;

const ZOTERO_API_URL: &str = "https://api.zotero.org";
const PDF_CONTENT_TYPE: &str = "application/pdf";
const PAGE_LIMIT: usize = 100;

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Client for one user library.
pub struct ZoteroClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    library_root: PathBuf,
    /// Collection id → name, fetched once per client lifetime
    collection_names: RwLock<Option<BTreeMap<String, String>>>,
}

impl ZoteroClient {
    pub fn new(secrets: &Secrets, library_root: &Path) -> Self {
        Self::with_base_url(ZOTERO_API_URL, secrets, library_root)
    }

    /// Point the client at a different API host (local Zotero instance,
    /// test server).
    pub fn with_base_url(api_url: &str, secrets: &Secrets, library_root: &Path) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: format!(
                "{}/users/{}",
                api_url.trim_end_matches('/'),
                secrets.library_api_id
            ),
            api_key: secrets.library_api_key.clone(),
            library_root: library_root.to_path_buf(),
            collection_names: RwLock::new(None),
        }
    }

    /// GET with bounded retry on transport errors and 5xx responses.
    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        let mut delay = RETRY_BASE_DELAY;
        let mut last_error = None;

        for attempt in 1..=RETRY_ATTEMPTS {
            let request = self
                .client
                .get(&url)
                .header("Zotero-API-Key", &self.api_key)
                .header("Zotero-API-Version", "3")
                .query(query);

            match request.send().await {
                Ok(response) if response.status().is_server_error() => {
                    tracing::warn!(
                        url = %url,
                        status = %response.status(),
                        attempt,
                        "Server error from reference manager, retrying"
                    );
                    last_error = Some(anyhow::anyhow!(
                        "server error {} from {}",
                        response.status(),
                        url
                    ));
                }
                Ok(response) => return Ok(response),
                Err(e) => {
                    tracing::warn!(url = %url, attempt, error = %e, "Request failed, retrying");
                    last_error = Some(e.into());
                }
            }

            if attempt < RETRY_ATTEMPTS {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("request to {} failed", url)))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let response = self.get(path, query).await?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("reference manager returned {} for {}", status, path);
        }
        response
            .json::<T>()
            .await
            .with_context(|| format!("Failed to decode response from {path}"))
    }

    /// Collection id → name map, cached for the client lifetime.
    async fn collection_name_map(&self) -> Result<BTreeMap<String, String>> {
        if let Some(cached) = self.collection_names.read().await.as_ref() {
            return Ok(cached.clone());
        }

        let mut by_id = BTreeMap::new();
        let mut start = 0usize;
        loop {
            let page: Vec<ApiCollection> = self
                .get_json(
                    "/collections",
                    &[
                        ("limit", PAGE_LIMIT.to_string()),
                        ("start", start.to_string()),
                    ],
                )
                .await?;
            let page_len = page.len();
            for collection in page {
                by_id.insert(collection.data.key, collection.data.name);
            }
            if page_len < PAGE_LIMIT {
                break;
            }
            start += page_len;
        }

        *self.collection_names.write().await = Some(by_id.clone());
        Ok(by_id)
    }

    /// Fetch the stored full text for an item, if the server has one.
    pub async fn fulltext(&self, item_id: &str) -> Result<Option<String>> {
        let response = self.get(&format!("/items/{item_id}/fulltext"), &[]).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            anyhow::bail!(
                "fulltext fetch for {} returned {}",
                item_id,
                response.status()
            );
        }
        let body: FulltextResponse = response.json().await?;
        Ok(Some(body.content))
    }

    /// Convert one API item into a [`BibItem`], resolving its PDF.
    ///
    /// Returns `None` for child items (attachments, notes).
    async fn process_item(&self, item: ApiItem) -> Result<Option<BibItem>> {
        if item.data.parent_item.is_some() {
            return Ok(None);
        }

        let item_id = item.key.clone();
        let storage_key = self.resolve_storage_key(&item).await?;
        let pdf_path = storage_key
            .as_deref()
            .and_then(|key| find_pdf_in(&self.library_root.join("storage").join(key)));

        let collections = {
            let names = self.collection_name_map().await.unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Failed to resolve collection names");
                BTreeMap::new()
            });
            item.data
                .collections
                .iter()
                .filter_map(|id| names.get(id).cloned())
                .collect::<Vec<_>>()
                .join(": ")
        };

        let data = &item.data;
        Ok(Some(BibItem {
            item_id,
            storage_key: storage_key.or_else(|| Some(item.key.clone())),
            title: data.title.clone(),
            authors: join_creators(&data.creators),
            date: data.date.clone(),
            abstract_note: data.abstract_note.clone(),
            doi: data.doi.clone(),
            url: data.url.clone(),
            publication: data.publication.clone(),
            item_type: data.item_type.clone(),
            tags: data.tags.iter().map(|t| t.tag.clone()).collect(),
            collections,
            citation_key: citation_key_for(data),
            pdf_path,
        }))
    }

    /// Find the storage key holding this item's PDF attachment.
    ///
    /// The primary attachment link wins when it is a PDF; otherwise the
    /// first PDF child does.
    async fn resolve_storage_key(&self, item: &ApiItem) -> Result<Option<String>> {
        if let Some(attachment) = &item.links.attachment {
            if attachment.attachment_type == PDF_CONTENT_TYPE {
                if let Some(key) = attachment.href.rsplit('/').next() {
                    if !key.is_empty() {
                        return Ok(Some(key.to_string()));
                    }
                }
            }
        }

        let children: Vec<ApiItem> = self
            .get_json(&format!("/items/{}/children", item.key), &[])
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(item = %item.key, error = %e, "Failed to fetch children");
                Vec::new()
            });

        Ok(children
            .into_iter()
            .find(|child| child.data.content_type.as_deref() == Some(PDF_CONTENT_TYPE))
            .map(|child| child.key))
    }

    async fn fetch_and_process(&self, path: &str, query: &[(&str, String)]) -> Result<Vec<BibItem>> {
        let items: Vec<ApiItem> = self.get_json(path, query).await?;
        let mut results = Vec::new();
        for item in items {
            let key = item.key.clone();
            match self.process_item(item).await {
                Ok(Some(bib)) => results.push(bib),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(item = %key, error = %e, "Skipping item that failed to resolve");
                }
            }
        }
        Ok(results)
    }
}

#[async_trait]
impl LibrarySource for ZoteroClient {
    async fn count_items(&self) -> Result<u64> {
        let response = self.get("/items", &[("limit", "1".to_string())]).await?;
        if !response.status().is_success() {
            anyhow::bail!("item count request returned {}", response.status());
        }
        let total = response
            .headers()
            .get("Total-Results")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .context("Missing Total-Results header")?;
        Ok(total)
    }

    async fn list_collections(&self) -> Result<BTreeMap<String, String>> {
        let by_id = self.collection_name_map().await?;
        Ok(by_id.into_iter().map(|(id, name)| (name, id)).collect())
    }

    async fn get_item(&self, item_id: &str) -> Result<Option<BibItem>> {
        let response = self.get(&format!("/items/{item_id}"), &[]).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            anyhow::bail!("item fetch for {} returned {}", item_id, response.status());
        }
        let item: ApiItem = response.json().await?;
        self.process_item(item).await
    }

    /// The storage key names the attachment's own item in the common case,
    /// so a hit with a parent reference is resolved to that parent. Only
    /// items that never had a resolvable attachment carry their own key.
    async fn get_item_by_storage_key(&self, storage_key: &str) -> Result<Option<BibItem>> {
        let response = self.get(&format!("/items/{storage_key}"), &[]).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            anyhow::bail!(
                "item fetch for {} returned {}",
                storage_key,
                response.status()
            );
        }
        let item: ApiItem = response.json().await?;
        match item.data.parent_item.clone() {
            Some(parent_id) => self.get_item(&parent_id).await,
            None => self.process_item(item).await,
        }
    }

    async fn get_items(&self, selector: &ItemSelector) -> Result<Vec<BibItem>> {
        match selector {
            ItemSelector::ByName(q) => {
                self.fetch_and_process(
                    "/items/top",
                    &[
                        ("q", q.clone()),
                        ("qmode", "titleCreatorYear".to_string()),
                    ],
                )
                .await
            }
            ItemSelector::ById(id) => Ok(self.get_item(id).await?.into_iter().collect()),
            ItemSelector::ByCollectionId(cid) => {
                self.fetch_and_process(&format!("/collections/{cid}/items/top"), &[])
                    .await
            }
            ItemSelector::ByCollectionName(name) => {
                let collections = self.list_collections().await?;
                let Some(cid) = collections.get(name) else {
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

/// First `*.pdf` in the storage directory, if the directory exists.
fn find_pdf_in(dir: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    let mut pdfs: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .map(|ext| ext.eq_ignore_ascii_case("pdf"))
                .unwrap_or(false)
        })
        .collect();
    pdfs.sort();
    pdfs.into_iter().next()
}

/// "Last, First; Last, First" display string.
fn join_creators(creators: &[Creator]) -> String {
    creators
        .iter()
        .filter_map(|c| {
            let joined = format!("{}, {}", c.last_name, c.first_name);
            let joined = joined.trim_matches(|ch: char| ch == ',' || ch.is_whitespace());
            if joined.is_empty() {
                None
            } else {
                Some(joined.to_string())
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}

fn citation_key_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^(?:Citation Key|Citekey):\s*(.+)$").expect("valid citation key regex")
    })
}

fn year_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d{4}").expect("valid year regex"))
}

/// Citation key: dedicated field, then the "extra" free-text line, then a
/// synthesized `author_title_year` fallback.
fn citation_key_for(data: &ItemData) -> String {
    if let Some(key) = &data.citation_key {
        if !key.is_empty() {
            return key.clone();
        }
    }

    if let Some(captures) = citation_key_regex().captures(&data.extra) {
        return captures[1].trim().to_string();
    }

    let author = data
        .creators
        .first()
        .map(|c| c.last_name.to_lowercase())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "anon".to_string());
    let title_word = data
        .title
        .split_whitespace()
        .next()
        .map(|w| w.to_lowercase())
        .unwrap_or_else(|| "untitled".to_string());
    let year = year_regex()
        .find(&data.date)
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "nodate".to_string());

    format!("{author}_{title_word}_{year}")
}

// ============================================================================
// API types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ApiItem {
    key: String,
    data: ItemData,
    #[serde(default)]
    links: Links,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ItemData {
    title: String,
    creators: Vec<Creator>,
    #[serde(rename = "abstractNote")]
    abstract_note: String,
    #[serde(rename = "DOI")]
    doi: String,
    date: String,
    url: String,
    #[serde(rename = "publicationTitle")]
    publication: String,
    #[serde(rename = "itemType")]
    item_type: String,
    tags: Vec<ApiTag>,
    collections: Vec<String>,
    extra: String,
    #[serde(rename = "citationKey")]
    citation_key: Option<String>,
    #[serde(rename = "parentItem")]
    parent_item: Option<String>,
    #[serde(rename = "contentType")]
    content_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Creator {
    #[serde(rename = "lastName")]
    last_name: String,
    #[serde(rename = "firstName")]
    first_name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiTag {
    tag: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Links {
    attachment: Option<AttachmentLink>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AttachmentLink {
    href: String,
    #[serde(rename = "attachmentType")]
    attachment_type: String,
}

#[derive(Debug, Deserialize)]
struct ApiCollection {
    data: CollectionData,
}

#[derive(Debug, Deserialize)]
struct CollectionData {
    key: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct FulltextResponse {
    content: String,
}
