
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::Result;
use crate::models::Document;

/// Splits a document into the ordered text spans that get embedded
pub trait Chunker: Send + Sync {
    /// Must yield the same sequence for the same document
    fn chunk(&self, document: &Document) -> Result<Vec<String>>;
}

/// Represents a chunk of content ready for embedding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentChunk {
    pub content: String,
    /// Markdown heading path, e.g. "Setup > Networking"
    pub heading_path: String,
    pub chunk_index: usize,
    pub token_count: usize,
    pub has_code_blocks: bool,
}

/// Configuration for content chunking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Target chunk size in tokens
    pub target_chunk_size: usize,
    /// Maximum chunk size in tokens before forced splitting
    pub max_chunk_size: usize,
    /// Minimum chunk size in tokens (smaller chunks will be merged)
    pub min_chunk_size: usize,
    /// Overlap size in tokens between adjacent chunks
    pub overlap_size: usize,
    /// Whether to preserve code blocks as single units
    pub preserve_code_blocks: bool,
    /// Whether to break at sentence boundaries when possible
    pub sentence_boundary_splitting: bool,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            target_chunk_size: 650,
            max_chunk_size: 1000,
            min_chunk_size: 100,
            overlap_size: 50,
            preserve_code_blocks: true,
            sentence_boundary_splitting: true,
        }
    }
}

/// Default chunker: markdown sections, then paragraphs, sentences and words
#[derive(Debug, Clone, Default)]
pub struct TextChunker {
    config: ChunkingConfig,
}

impl TextChunker {
    #[inline]
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    #[inline]
    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }
}

impl Chunker for TextChunker {
    #[inline]
    fn chunk(&self, document: &Document) -> Result<Vec<String>> {
        Ok(chunk_document(document, &self.config)
            .into_iter()
            .map(|c| c.content)
            .collect())
    }
}

#[derive(Debug, Clone)]
struct Section {
    heading_path: String,
    content: String,
    has_code_blocks: bool,
}

/// Chunk a document into embedding-ready pieces
#[inline]
pub fn chunk_document(document: &Document, config: &ChunkingConfig) -> Vec<ContentChunk> {
    let sections = split_sections(&document.content, &document.name);
    let chunks: Vec<ContentChunk> = sections
        .iter()
        .flat_map(|section| chunk_section(section, config))
        .collect();

    let mut chunks = merge_small_chunks(chunks, config);
    if config.overlap_size > 0 {
        add_overlap(&mut chunks, config.overlap_size);
    }
    for (index, chunk) in chunks.iter_mut().enumerate() {
        chunk.chunk_index = index;
    }

    let total_tokens: usize = chunks.iter().map(|c| c.token_count).sum();
    debug!(
        "Chunked '{}' into {} chunks ({} tokens)",
        document.name,
        chunks.len(),
        total_tokens
    );
    chunks
}

/// Split markdown into sections at ATX headings, ignoring `#` lines inside code fences
fn split_sections(content: &str, document_name: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut headings: Vec<(usize, String)> = Vec::new();
    let mut current = String::new();
    let mut in_code_block = false;
    let mut has_code_blocks = false;

    let heading_path = |headings: &[(usize, String)]| {
        if headings.is_empty() {
            document_name.to_string()
        } else {
            headings
                .iter()
                .map(|(_, h)| h.as_str())
                .collect::<Vec<_>>()
                .join(" > ")
        }
    };

    for line in content.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") {
            in_code_block = !in_code_block;
            has_code_blocks = true;
        }

        if !in_code_block {
            if let Some((level, title)) = parse_heading(trimmed) {
                if !current.trim().is_empty() {
                    sections.push(Section {
                        heading_path: heading_path(&headings),
                        content: current.trim().to_string(),
                        has_code_blocks,
                    });
                }
                current.clear();
                has_code_blocks = false;

                headings.retain(|(l, _)| *l < level);
                headings.push((level, title.to_string()));
                continue;
            }
        }

        current.push_str(line);
        current.push('\n');
    }

    if !current.trim().is_empty() {
        sections.push(Section {
            heading_path: heading_path(&headings),
            content: current.trim().to_string(),
            has_code_blocks,
        });
    }

    sections
}

fn parse_heading(line: &str) -> Option<(usize, &str)> {
    let level = line.chars().take_while(|c| *c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = line.get(level..)?;
    if !rest.starts_with(' ') {
        return None;
    }
    let title = rest.trim();
    if title.is_empty() {
        return None;
    }
    Some((level, title))
}

/// Chunk a single content section
fn chunk_section(section: &Section, config: &ChunkingConfig) -> Vec<ContentChunk> {
    let content = section.content.as_str();
    let spans = if estimate_token_count(content) <= config.target_chunk_size {
        vec![content.to_string()]
    } else if section.has_code_blocks && config.preserve_code_blocks {
        split_keeping_fences(content, config.max_chunk_size)
    } else {
        split_paragraphs(content, config)
    };

    spans
        .into_iter()
        .filter(|span| !span.trim().is_empty())
        .map(|span| ContentChunk {
            token_count: estimate_token_count(&span),
            has_code_blocks: section.has_code_blocks && contains_code_block(&span),
            heading_path: section.heading_path.clone(),
            chunk_index: 0,
            content: span,
        })
        .collect()
}

/// Greedily packs pieces into spans that stay within a token budget
struct Packer {
    budget: usize,
    separator: &'static str,
    buffer: String,
    tokens: usize,
    spans: Vec<String>,
}

impl Packer {
    fn new(budget: usize, separator: &'static str) -> Self {
        Self {
            budget,
            separator,
            buffer: String::new(),
            tokens: 0,
            spans: Vec::new(),
        }
    }

    fn is_full_for(&self, tokens: usize) -> bool {
        self.tokens + tokens > self.budget && !self.buffer.trim().is_empty()
    }

    fn flush(&mut self) {
        let span = self.buffer.trim();
        if !span.is_empty() {
            self.spans.push(span.to_string());
        }
        self.buffer.clear();
        self.tokens = 0;
    }

    fn append(&mut self, piece: &str, tokens: usize) {
        self.buffer.push_str(piece);
        self.buffer.push_str(self.separator);
        self.tokens += tokens;
    }

    fn push(&mut self, piece: &str, tokens: usize) {
        if self.is_full_for(tokens) {
            self.flush();
        }
        self.append(piece, tokens);
    }

    /// Emit already-split spans after whatever is buffered
    fn push_spans(&mut self, spans: Vec<String>) {
        self.flush();
        self.spans.extend(spans);
    }

    fn finish(mut self) -> Vec<String> {
        self.flush();
        self.spans
    }
}

/// Split line by line, only breaking outside fenced code blocks
fn split_keeping_fences(content: &str, budget: usize) -> Vec<String> {
    let mut packer = Packer::new(budget, "\n");
    let mut in_fence = false;

    for line in content.lines() {
        let tokens = estimate_token_count(line);
        if !in_fence && packer.is_full_for(tokens) {
            packer.flush();
        }
        if line.trim().starts_with("```") {
            in_fence = !in_fence;
        }
        packer.append(line, tokens);
    }

    packer.finish()
}

/// Pack paragraphs, breaking oversized ones at sentence or word boundaries
fn split_paragraphs(content: &str, config: &ChunkingConfig) -> Vec<String> {
    let mut packer = Packer::new(config.target_chunk_size, "\n\n");

    for paragraph in content.split("\n\n").filter(|p| !p.trim().is_empty()) {
        let tokens = estimate_token_count(paragraph);
        if tokens <= config.max_chunk_size {
            packer.push(paragraph, tokens);
            continue;
        }

        let pieces = if config.sentence_boundary_splitting {
            split_sentences(paragraph, config)
        } else {
            split_words(paragraph, config.target_chunk_size)
        };
        for piece in pieces {
            let tokens = estimate_token_count(&piece);
            packer.push(&piece, tokens);
        }
    }

    packer.finish()
}

fn split_sentences(text: &str, config: &ChunkingConfig) -> Vec<String> {
    let mut packer = Packer::new(config.target_chunk_size, " ");

    let sentences = text
        .split_inclusive(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty());
    for sentence in sentences {
        let tokens = estimate_token_count(sentence);
        if tokens > config.max_chunk_size {
            packer.push_spans(split_words(sentence, config.target_chunk_size));
        } else {
            packer.push(sentence, tokens);
        }
    }

    packer.finish()
}

fn split_words(text: &str, budget: usize) -> Vec<String> {
    let mut packer = Packer::new(budget, " ");
    for word in text.split_whitespace() {
        packer.push(word, estimate_token_count(word).max(1));
    }
    packer.finish()
}

impl ContentChunk {
    fn can_absorb(&self, next: &Self, config: &ChunkingConfig) -> bool {
        self.heading_path == next.heading_path
            && self.token_count + next.token_count <= config.max_chunk_size
    }

    fn absorb(&mut self, next: Self) {
        self.content.push_str("\n\n");
        self.content.push_str(&next.content);
        self.token_count += next.token_count;
        self.has_code_blocks |= next.has_code_blocks;
    }
}

/// Fold undersized chunks into the following chunk of the same section
fn merge_small_chunks(chunks: Vec<ContentChunk>, config: &ChunkingConfig) -> Vec<ContentChunk> {
    let mut merged = Vec::with_capacity(chunks.len());
    let mut carry: Option<ContentChunk> = None;

    for chunk in chunks {
        let current = match carry.take() {
            Some(mut small) if small.can_absorb(&chunk, config) => {
                small.absorb(chunk);
                small
            }
            Some(small) => {
                merged.push(small);
                chunk
            }
            None => chunk,
        };

        if current.token_count < config.min_chunk_size {
            carry = Some(current);
        } else {
            merged.push(current);
        }
    }

    merged.extend(carry);
    merged
}

/// Prefix each chunk with the tail of its predecessor from the same section.
/// The tail always comes from the predecessor's own text, never its prefix.
fn add_overlap(chunks: &mut [ContentChunk], overlap_size: usize) {
    let mut previous: Option<(String, String)> = None;

    for chunk in chunks.iter_mut() {
        let own = (chunk.heading_path.clone(), chunk.content.clone());
        if let Some((heading, content)) = &previous {
            let tail = overlap_tail(content, overlap_size);
            if *heading == chunk.heading_path && !tail.is_empty() {
                chunk.token_count += estimate_token_count(&tail);
                chunk.content = format!("{}\n\n{}", tail, chunk.content);
            }
        }
        previous = Some(own);
    }
}

/// Last words of a chunk, about `overlap_tokens` worth
fn overlap_tail(content: &str, overlap_tokens: usize) -> String {
    let words: Vec<&str> = content.split_whitespace().collect();
    let take = overlap_tokens * 3 / 4;

    if take == 0 || words.len() <= take {
        return String::new();
    }
    words[words.len() - take..].join(" ")
}

/// Rough token estimate: words at 0.75 words per token, plus a tenth per punctuation mark
#[inline]
pub fn estimate_token_count(text: &str) -> usize {
    let words = text.split_whitespace().count();
    let punctuation = text.chars().filter(char::is_ascii_punctuation).count();

    (punctuation as f64).mul_add(0.1, words as f64 / 0.75) as usize
}

/// Fenced or indented code
fn contains_code_block(text: &str) -> bool {
    text.contains("```") || text.lines().any(|line| line.starts_with("    "))
}
