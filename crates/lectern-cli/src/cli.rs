use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "lectern")]
#[command(about = "Research assistant over your personal reference library")]
pub struct Cli {
    /// Settings file (defaults to the platform data directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Index items from the reference library into the vector index
    Index(IndexArgs),
    /// Similarity search over indexed chunks
    Search(SearchArgs),
    /// Ask a research question (iterative retrieval loop)
    Ask(AskArgs),
    /// Show what is indexed
    Stats,
    /// Delete every chunk in the collection
    Clear(ClearArgs),
    /// List collections in the reference library
    Collections,
}

#[derive(Args, Debug)]
pub struct IndexArgs {
    /// Index a collection by name
    #[arg(long, conflicts_with_all = ["collection_id", "item", "query", "local_markdown"])]
    pub collection: Option<String>,

    /// Index a collection by id
    #[arg(long, conflicts_with_all = ["item", "query", "local_markdown"])]
    pub collection_id: Option<String>,

    /// Index a single item by id
    #[arg(long, conflicts_with_all = ["query", "local_markdown"])]
    pub item: Option<String>,

    /// Index items matching a title/creator/year search
    #[arg(long, conflicts_with = "local_markdown")]
    pub query: Option<String>,

    /// Re-index from the local markdown cache, skipping conversion
    #[arg(long)]
    pub local_markdown: bool,

    /// Delete existing chunks and re-index
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Query text
    #[arg(long)]
    pub query: String,

    /// Restrict the search to one item id
    #[arg(long)]
    pub item: Option<String>,

    /// Number of results (defaults to k_documents from settings)
    #[arg(long)]
    pub k: Option<usize>,
}

#[derive(Args, Debug)]
pub struct AskArgs {
    /// Research question; prompted for interactively when omitted
    #[arg(long)]
    pub question: Option<String>,
}

#[derive(Args, Debug)]
pub struct ClearArgs {
    /// Required; clearing is destructive
    #[arg(long)]
    pub confirm: bool,
}
