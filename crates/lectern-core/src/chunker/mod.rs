//! Markdown chunking for the indexing pipeline.
//!
//! A converted document is split in two passes: a line walk that tracks the
//! ATX heading trail (levels 1-7), then a recursive character splitter that
//! bounds each chunk to `chunk_size` with `chunk_overlap` carry-over.
//! Consecutive chunks that render a Markdown table are tagged with a shared
//! run id so they can be reassembled at answer time.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Split preference order. Paragraph and line breaks first, then sentence
/// and clause punctuation; a chunk that fits no separator is cut hard.
const SEPARATORS: &[&str] = &["\n\n", "\n", ".", "!", "?", ",", ";"];

/// Deepest ATX heading level tracked in the trail.
const MAX_HEADING_DEPTH: usize = 7;

/// How a Markdown file is segmented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkingStrategy {
    /// Heading-aware line walk followed by recursive character splitting
    MarkdownRecursive,
    /// Embedding-driven segmentation; accepted in config, not implemented
    Semantic,
}

/// Chunker parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub strategy: ChunkingStrategy,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            strategy: ChunkingStrategy::MarkdownRecursive,
        }
    }
}

/// Table membership of a chunk: either not a table, or part of run `n`.
///
/// Serializes as `false` or a positive integer, which is also the shape the
/// vector index stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "TableFlagRepr", into = "TableFlagRepr")]
pub enum TableFlag {
    None,
    Run(u32),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum TableFlagRepr {
    Flag(bool),
    Run(u32),
}

impl From<TableFlagRepr> for TableFlag {
    fn from(repr: TableFlagRepr) -> Self {
        match repr {
            TableFlagRepr::Flag(_) => TableFlag::None,
            TableFlagRepr::Run(n) => TableFlag::Run(n),
        }
    }
}

impl From<TableFlag> for TableFlagRepr {
    fn from(flag: TableFlag) -> Self {
        match flag {
            TableFlag::None => TableFlagRepr::Flag(false),
            TableFlag::Run(n) => TableFlagRepr::Run(n),
        }
    }
}

/// Bibliographic metadata copied onto every chunk of an item.
#[derive(Debug, Clone, Default)]
pub struct ChunkMeta {
    pub item_id: String,
    pub storage_key: String,
    pub citation_key: String,
    pub title: String,
    pub authors: String,
    pub date: String,
    /// Additional caller-supplied keys carried alongside the fixed schema
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// The unit of retrieval: a bounded, heading-tagged text segment.
///
/// Chunk identity across re-indexing is `(item_id, split_id)`; `chunk_uid`
/// is freshly generated on every chunking run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_uid: String,
    pub item_id: String,
    pub storage_key: String,
    pub citation_key: String,
    pub title: String,
    pub authors: String,
    pub date: String,
    /// Ordinal in document reading order, dense from 0 within one item
    pub split_id: usize,
    /// Most recent heading text per depth (`level1`..`level7`) when the
    /// chunk was emitted; deeper entries reset when a shallower one opens
    #[serde(default)]
    pub levels: BTreeMap<String, String>,
    pub table: TableFlag,
    /// Character count of `content`
    pub length: usize,
    /// Wall-clock seconds since epoch, stamped by the index at insert
    #[serde(default)]
    pub added_at: i64,
    pub content: String,
    #[serde(default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Chunk {
    /// Heading text of the deepest populated level, if any.
    pub fn deepest_level(&self) -> Option<&str> {
        (1..=MAX_HEADING_DEPTH)
            .rev()
            .find_map(|depth| self.levels.get(&level_key(depth)).map(String::as_str))
    }
}

fn level_key(depth: usize) -> String {
    format!("level{depth}")
}

/// Chunk a Markdown file, merging `meta` into every produced chunk.
///
/// An empty file yields an empty vec, not an error.
pub fn chunk(md_path: &Path, config: &ChunkerConfig, meta: &ChunkMeta) -> Result<Vec<Chunk>> {
    let markdown = std::fs::read_to_string(md_path)
        .with_context(|| format!("Failed to read markdown file {}", md_path.display()))?;
    chunk_text(&markdown, config, meta)
}

/// Chunk an in-memory Markdown string.
pub fn chunk_text(markdown: &str, config: &ChunkerConfig, meta: &ChunkMeta) -> Result<Vec<Chunk>> {
    if config.strategy == ChunkingStrategy::Semantic {
        bail!("semantic chunking strategy is not implemented");
    }
    if config.chunk_overlap >= config.chunk_size {
        bail!(
            "chunk_overlap ({}) must be smaller than chunk_size ({})",
            config.chunk_overlap,
            config.chunk_size
        );
    }

    let segments = split_by_headings(markdown);

    let mut chunks = Vec::new();
    for segment in &segments {
        for content in split_text(&segment.content, config.chunk_size, config.chunk_overlap) {
            chunks.push(Chunk {
                chunk_uid: uuid::Uuid::new_v4().simple().to_string(),
                item_id: meta.item_id.clone(),
                storage_key: meta.storage_key.clone(),
                citation_key: meta.citation_key.clone(),
                title: meta.title.clone(),
                authors: meta.authors.clone(),
                date: meta.date.clone(),
                split_id: 0,
                levels: segment.levels.clone(),
                table: TableFlag::None,
                length: content.chars().count(),
                added_at: 0,
                content,
                extra: meta.extra.clone(),
            });
        }
    }

    annotate_tables(&mut chunks);
    for (split_id, chunk) in chunks.iter_mut().enumerate() {
        chunk.split_id = split_id;
    }

    tracing::debug!(chunk_count = chunks.len(), "Chunked markdown");

    Ok(chunks)
}

/// A content line with the heading trail in effect when it was read.
struct Segment {
    content: String,
    levels: BTreeMap<String, String>,
}

/// Walk the Markdown line by line, tracking the ATX heading stack.
///
/// Heading lines open their level, clear everything deeper, and are not
/// emitted as content. Blank lines are dropped. Fenced code blocks are
/// opaque: a `#` inside a fence is content, not a heading.
fn split_by_headings(markdown: &str) -> Vec<Segment> {
    let mut trail: Vec<Option<String>> = vec![None; MAX_HEADING_DEPTH];
    let mut segments = Vec::new();
    let mut in_fence = false;

    for line in markdown.lines() {
        let trimmed = line.trim_end();

        if trimmed.trim_start().starts_with("```") || trimmed.trim_start().starts_with("~~~") {
            in_fence = !in_fence;
            segments.push(Segment {
                content: trimmed.to_string(),
                levels: trail_to_map(&trail),
            });
            continue;
        }

        if !in_fence {
            if let Some((depth, text)) = parse_heading(trimmed) {
                trail[depth - 1] = Some(text.to_string());
                for slot in trail.iter_mut().skip(depth) {
                    *slot = None;
                }
                continue;
            }
        }

        if trimmed.trim().is_empty() {
            continue;
        }

        segments.push(Segment {
            content: trimmed.to_string(),
            levels: trail_to_map(&trail),
        });
    }

    segments
}

/// Parse an ATX heading line into `(depth, text)` for depths 1-7.
fn parse_heading(line: &str) -> Option<(usize, &str)> {
    let depth = line.chars().take_while(|&c| c == '#').count();
    if depth == 0 || depth > MAX_HEADING_DEPTH {
        return None;
    }
    let rest = &line[depth..];
    if !rest.starts_with(' ') {
        return None;
    }
    Some((depth, rest.trim()))
}

fn trail_to_map(trail: &[Option<String>]) -> BTreeMap<String, String> {
    trail
        .iter()
        .enumerate()
        .filter_map(|(i, slot)| slot.as_ref().map(|text| (level_key(i + 1), text.clone())))
        .collect()
}

/// Tag table runs: a chunk whose content begins with `|` continues the
/// current run or opens a new one; run ids increment per new run.
fn annotate_tables(chunks: &mut [Chunk]) {
    let mut in_table = false;
    let mut run = 0u32;
    for chunk in chunks.iter_mut() {
        if chunk.content.starts_with('|') {
            if !in_table {
                run += 1;
            }
            chunk.table = TableFlag::Run(run);
            in_table = true;
        } else {
            chunk.table = TableFlag::None;
            in_table = false;
        }
    }
}

/// Split `text` into chunks of at most `chunk_size` characters, preferring
/// the separators in [`SEPARATORS`] order and carrying `chunk_overlap`
/// characters of trailing context between adjacent chunks.
fn split_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let atoms = split_recursive(text, SEPARATORS, chunk_size);
    merge_atoms(atoms, chunk_size, chunk_overlap)
}

/// Break `text` into pieces no longer than `chunk_size`, trying separators
/// in order and hard-cutting when none is left.
fn split_recursive(text: &str, separators: &[&str], chunk_size: usize) -> Vec<String> {
    if text.chars().count() <= chunk_size {
        return vec![text.to_string()];
    }

    let Some(position) = separators.iter().position(|sep| text.contains(sep)) else {
        return hard_cut(text, chunk_size);
    };
    let separator = separators[position];
    let remaining = &separators[position + 1..];

    let mut atoms = Vec::new();
    for piece in split_keep_separator(text, separator) {
        if piece.chars().count() <= chunk_size {
            atoms.push(piece);
        } else {
            atoms.extend(split_recursive(&piece, remaining, chunk_size));
        }
    }
    atoms
}

/// Split on `separator`, keeping it at the end of each preceding piece so
/// rejoining pieces reproduces the original text.
fn split_keep_separator(text: &str, separator: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut rest = text;
    while let Some(idx) = rest.find(separator) {
        let end = idx + separator.len();
        pieces.push(rest[..end].to_string());
        rest = &rest[end..];
    }
    if !rest.is_empty() {
        pieces.push(rest.to_string());
    }
    pieces
}

fn hard_cut(text: &str, chunk_size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(chunk_size)
        .map(|window| window.iter().collect())
        .collect()
}

/// Greedily pack atoms into chunks of at most `chunk_size` characters.
///
/// When a chunk is flushed, trailing atoms totaling at most `chunk_overlap`
/// characters seed the next chunk.
fn merge_atoms(atoms: Vec<String>, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut window: Vec<(String, usize)> = Vec::new();
    let mut window_len = 0usize;

    for atom in atoms {
        let atom_len = atom.chars().count();
        if !window.is_empty() && window_len + atom_len > chunk_size {
            push_window(&window, &mut chunks);
            while window_len > chunk_overlap
                || (window_len + atom_len > chunk_size && window_len > 0)
            {
                let (_, popped_len) = window.remove(0);
                window_len -= popped_len;
            }
        }
        window_len += atom_len;
        window.push((atom, atom_len));
    }

    push_window(&window, &mut chunks);
    chunks
}

fn push_window(window: &[(String, usize)], chunks: &mut Vec<String>) {
    let joined: String = window.iter().map(|(piece, _)| piece.as_str()).collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> ChunkMeta {
        ChunkMeta {
            item_id: "ITEM1".to_string(),
            storage_key: "STOR1".to_string(),
            citation_key: "smith_2020".to_string(),
            title: "A Paper".to_string(),
            authors: "Smith, Jane".to_string(),
            date: "2020".to_string(),
            extra: BTreeMap::new(),
        }
    }

    fn config() -> ChunkerConfig {
        ChunkerConfig::default()
    }

    #[test]
    fn empty_markdown_yields_no_chunks() {
        let chunks = chunk_text("", &config(), &meta()).unwrap();
        assert!(chunks.is_empty());

        let chunks = chunk_text("\n\n   \n", &config(), &meta()).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn heading_trail_resets_deeper_levels() {
        let md = "\
# Intro
intro text
## Background
background text
# Methods
methods text
";
        let chunks = chunk_text(md, &config(), &meta()).unwrap();
        assert_eq!(chunks.len(), 3);

        assert_eq!(chunks[0].levels.get("level1").unwrap(), "Intro");
        assert!(chunks[0].levels.get("level2").is_none());

        assert_eq!(chunks[1].levels.get("level1").unwrap(), "Intro");
        assert_eq!(chunks[1].levels.get("level2").unwrap(), "Background");

        // New level-1 heading clears level2
        assert_eq!(chunks[2].levels.get("level1").unwrap(), "Methods");
        assert!(chunks[2].levels.get("level2").is_none());
    }

    #[test]
    fn split_ids_are_dense_and_ascending() {
        let md = "# A\none\ntwo\nthree\n";
        let chunks = chunk_text(md, &config(), &meta()).unwrap();
        let ids: Vec<usize> = chunks.iter().map(|c| c.split_id).collect();
        assert_eq!(ids, (0..chunks.len()).collect::<Vec<_>>());
    }

    #[test]
    fn table_runs_are_contiguous_and_increment() {
        let md = "\
text before
| a | b |
| - | - |
| 1 | 2 |
text between
| c |
| 3 |
";
        let chunks = chunk_text(md, &config(), &meta()).unwrap();
        let flags: Vec<TableFlag> = chunks.iter().map(|c| c.table).collect();
        assert_eq!(
            flags,
            vec![
                TableFlag::None,
                TableFlag::Run(1),
                TableFlag::Run(1),
                TableFlag::Run(1),
                TableFlag::None,
                TableFlag::Run(2),
                TableFlag::Run(2),
            ]
        );
    }

    #[test]
    fn length_counts_characters() {
        let md = "Zabezpečenie štandardnej licenčnej podpory\n";
        let chunks = chunk_text(md, &config(), &meta()).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].length, chunks[0].content.chars().count());
        // Multi-byte input: byte length differs from char count
        assert_ne!(chunks[0].content.len(), chunks[0].length);
    }

    #[test]
    fn long_line_is_split_with_overlap() {
        let sentence = "This sentence repeats to exceed the chunk budget. ";
        let line = sentence.repeat(40);
        let cfg = ChunkerConfig {
            chunk_size: 200,
            chunk_overlap: 50,
            strategy: ChunkingStrategy::MarkdownRecursive,
        };
        let chunks = chunk_text(&line, &cfg, &meta()).unwrap();
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.length <= 200, "chunk exceeds budget: {}", c.length);
        }
        // Overlap: the start of chunk 2 repeats the tail of chunk 1
        let tail: String = chunks[0]
            .content
            .chars()
            .rev()
            .take(20)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        assert!(chunks[1].content.contains(tail.trim()));
    }

    #[test]
    fn metadata_does_not_affect_segmentation() {
        let md = "# A\nsome text here\n| t |\nmore text\n";
        let meta2 = ChunkMeta {
            item_id: "OTHER".to_string(),
            citation_key: "other_key".to_string(),
            ..meta()
        };

        let a = chunk_text(md, &config(), &meta()).unwrap();
        let b = chunk_text(md, &config(), &meta2).unwrap();

        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.content, y.content);
            assert_eq!(x.split_id, y.split_id);
            assert_eq!(x.levels, y.levels);
            assert_eq!(x.table, y.table);
            assert_eq!(x.length, y.length);
        }
    }

    #[test]
    fn chunk_uids_are_fresh_every_run() {
        let md = "# A\nsome text\n";
        let a = chunk_text(md, &config(), &meta()).unwrap();
        let b = chunk_text(md, &config(), &meta()).unwrap();
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert_ne!(x.chunk_uid, y.chunk_uid);
        }
    }

    #[test]
    fn headings_inside_code_fences_are_content() {
        let md = "\
# Real
```
# not a heading
```
after
";
        let chunks = chunk_text(md, &config(), &meta()).unwrap();
        // Fence lines and the commented line are content under "Real"
        assert!(chunks.iter().any(|c| c.content == "# not a heading"));
        for c in &chunks {
            assert_eq!(c.levels.get("level1").unwrap(), "Real");
        }
    }

    #[test]
    fn semantic_strategy_is_rejected() {
        let cfg = ChunkerConfig {
            strategy: ChunkingStrategy::Semantic,
            ..config()
        };
        assert!(chunk_text("text", &cfg, &meta()).is_err());
    }

    #[test]
    fn deepest_level_prefers_deeper_entries() {
        let md = "# One\n## Two\n### Three\nbody\n";
        let chunks = chunk_text(md, &config(), &meta()).unwrap();
        assert_eq!(chunks[0].deepest_level(), Some("Three"));
    }

    #[test]
    fn table_flag_serde_roundtrip() {
        let none: TableFlag = serde_json::from_value(serde_json::json!(false)).unwrap();
        assert_eq!(none, TableFlag::None);
        let run: TableFlag = serde_json::from_value(serde_json::json!(3)).unwrap();
        assert_eq!(run, TableFlag::Run(3));
        assert_eq!(serde_json::to_value(TableFlag::None).unwrap(), serde_json::json!(false));
        assert_eq!(serde_json::to_value(TableFlag::Run(2)).unwrap(), serde_json::json!(2));
    }
}
