//! Lectern Core - research assistant over a personal reference library
//!
//! This crate contains the whole pipeline:
//! - Library client (Zotero web API + local attachment storage)
//! - PDF → Markdown conversion gateway with a content-addressed cache
//! - Heading-aware Markdown chunking
//! - Vector index (milli) with metadata filtering
//! - Indexing orchestration (idempotent, resumable, progress-reporting)
//! - Retrieval (single, per-item, multi-query)
//! - Iterative research loop (query-gen → retrieve → synthesize → judge)

pub mod chat;
pub mod chunker;
pub mod config;
pub mod convert;
pub mod embed;
pub mod index;
pub mod indexer;
pub mod library;
pub mod research;
pub mod retriever;

pub use chat::{AnthropicChat, ChatModel, OpenAiChat};
pub use chunker::{Chunk, ChunkerConfig, ChunkingStrategy, TableFlag};
pub use config::{ChatApi, Config, EmbeddingApi, Secrets};
pub use convert::{CommandConverter, ConverterGateway, PdfConverter};
pub use embed::Embedder;
pub use index::{IndexStats, ItemStats, RetrievedChunk, VectorIndex};
pub use indexer::{Indexer, IndexingConfig, IndexingResult, ItemFailure};
pub use library::{BibItem, ItemSelector, LibrarySource, ZoteroClient};
pub use research::{ResearchLoop, ResearchState, RunOutcome};
pub use retriever::Retriever;
