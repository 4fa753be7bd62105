//! Semantic search over a directory of text files.
//!
//! Files under `scan_directory` (and one level of subdirectories) are split
//! into overlapping character chunks, embedded through an
//! [`EmbeddingProvider`] and kept in an in-memory cosine index. The index is
//! built on first use; a failed build is retried on the next call.
//!
//! No embedding model ships with this crate. The built-in registration uses
//! [`UnavailableEmbedder`] until an application registers `semantic_search`
//! again with [`factory_with_embedder`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::factory::{ToolMeta, ToolSpec};
use crate::params::{str_param, u64_param, ParamSpec};
use crate::tool::{Tool, ToolError, ToolOutcome};
use crate::tools::normalize_extensions;

const EMBED_BATCH: usize = 100;
const MAX_LIMIT: u64 = 100;
const PROVIDERS: &[&str] = &["huggingface", "vertexai"];

/// Turns text into fixed-length vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// One vector per input text, in order.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ToolError>;

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, ToolError> {
        self.embed_texts(&[query.to_string()])
            .await?
            .pop()
            .ok_or_else(|| ToolError::ExecutionFailed("embedding provider returned no vector".to_string()))
    }
}

/// Provider used when no embedding model has been wired in.
#[derive(Debug, Default)]
pub struct UnavailableEmbedder;

#[async_trait]
impl EmbeddingProvider for UnavailableEmbedder {
    async fn embed_texts(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, ToolError> {
        Err(ToolError::Unavailable(
            "no embedding provider is configured for semantic_search".to_string(),
        ))
    }
}

#[derive(Debug, Clone, Deserialize)]
struct SemanticSearchConfig {
    scan_directory: PathBuf,
    #[serde(default = "default_extensions")]
    file_extensions: Vec<String>,
    #[serde(
        default = "default_chunk_size",
        deserialize_with = "agentyard_core::de::usize_lenient"
    )]
    chunk_size: usize,
    #[serde(
        default = "default_chunk_overlap",
        deserialize_with = "agentyard_core::de::usize_lenient"
    )]
    chunk_overlap: usize,
    #[serde(default = "default_provider")]
    embedding_provider: String,
    #[serde(default = "default_hf_model")]
    huggingface_model: String,
    #[serde(default = "default_vertex_model")]
    vertexai_model: String,
    #[serde(
        default = "default_threshold",
        deserialize_with = "agentyard_core::de::f64_lenient"
    )]
    similarity_threshold: f64,
    #[serde(
        default = "default_limit",
        deserialize_with = "agentyard_core::de::u64_lenient"
    )]
    limit: u64,
}

fn default_extensions() -> Vec<String> {
    [".md", ".txt", ".py", ".js", ".ts", ".yaml", ".yml"]
        .iter()
        .map(|e| e.to_string())
        .collect()
}

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    200
}

fn default_provider() -> String {
    "huggingface".to_string()
}

fn default_hf_model() -> String {
    "all-MiniLM-L6-v2".to_string()
}

fn default_vertex_model() -> String {
    "text-embedding-004".to_string()
}

fn default_threshold() -> f64 {
    0.3
}

fn default_limit() -> u64 {
    10
}

impl SemanticSearchConfig {
    fn validate(&self) -> Result<(), ToolError> {
        let invalid = |msg: String| -> Result<(), ToolError> { Err(ToolError::InvalidConfig(msg)) };
        if !(100..=4000).contains(&self.chunk_size) {
            return invalid(format!("chunk_size must be 100..=4000, got {}", self.chunk_size));
        }
        if self.chunk_overlap > 500 || self.chunk_overlap >= self.chunk_size {
            return invalid(format!(
                "chunk_overlap must be at most 500 and below chunk_size, got {}",
                self.chunk_overlap
            ));
        }
        if !PROVIDERS.contains(&self.embedding_provider.as_str()) {
            return invalid(format!(
                "unsupported embedding provider: {} (supported: {})",
                self.embedding_provider,
                PROVIDERS.join(", ")
            ));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return invalid(format!(
                "similarity_threshold must be within 0..=1, got {}",
                self.similarity_threshold
            ));
        }
        if !(1..=MAX_LIMIT).contains(&self.limit) {
            return invalid(format!("limit must be 1..={MAX_LIMIT}, got {}", self.limit));
        }
        Ok(())
    }

    fn embedding_model(&self) -> &str {
        match self.embedding_provider.as_str() {
            "vertexai" => &self.vertexai_model,
            _ => &self.huggingface_model,
        }
    }
}

/// Split `text` into chunks of `size` characters, each starting `overlap`
/// characters before the previous one ended.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= size {
        return vec![text.to_string()];
    }
    let step_back = overlap.min(size.saturating_sub(1));
    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end >= chars.len() {
            break;
        }
        start = end - step_back;
    }
    chunks
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let (mut dot, mut na, mut nb) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

#[derive(Debug, Clone)]
struct Chunk {
    content: String,
    file_path: String,
    file_name: String,
    file_extension: String,
    chunk_index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Default)]
struct VectorIndex {
    chunks: Vec<Chunk>,
}

impl VectorIndex {
    /// Top `limit` chunks by cosine similarity, best first.
    fn search(&self, query: &[f32], limit: usize) -> Vec<(f64, &Chunk)> {
        let mut scored: Vec<(f64, &Chunk)> = self
            .chunks
            .iter()
            .map(|c| (cosine_similarity(query, &c.embedding), c))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.truncate(limit);
        scored
    }
}

/// Search an embedded index of a directory's text files.
pub struct SemanticSearchTool {
    meta: ToolMeta,
    config: SemanticSearchConfig,
    extensions: Vec<String>,
    embedder: Arc<dyn EmbeddingProvider>,
    index: OnceCell<VectorIndex>,
}

impl SemanticSearchTool {
    pub fn from_spec(spec: &ToolSpec, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self, ToolError> {
        let config: SemanticSearchConfig = spec.typed_config()?;
        config.validate()?;
        Ok(Self {
            meta: ToolMeta::from_spec(spec)?,
            extensions: normalize_extensions(&config.file_extensions),
            config,
            embedder,
            index: OnceCell::new(),
        })
    }

    /// Build the index if it is not built yet. Returns the number of chunks.
    pub async fn ensure_indexed(&self) -> Result<usize, ToolError> {
        Ok(self.index().await?.chunks.len())
    }

    async fn index(&self) -> Result<&VectorIndex, ToolError> {
        self.index.get_or_try_init(|| self.build_index()).await
    }

    fn wanted(&self, path: &Path) -> bool {
        let ext = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default();
        self.extensions.iter().any(|a| *a == ext)
    }

    /// Matching files in the scan directory and its direct subdirectories.
    async fn scan_files(&self) -> Result<Vec<PathBuf>, ToolError> {
        let root = &self.config.scan_directory;
        let mut top = tokio::fs::read_dir(root).await.map_err(|e| {
            ToolError::NotFound(format!("scan directory '{}' is not readable: {e}", root.display()))
        })?;

        let mut files = Vec::new();
        while let Some(entry) = top.next_entry().await? {
            let path = entry.path();
            let kind = entry.file_type().await?;
            if kind.is_file() && self.wanted(&path) {
                files.push(path);
            } else if kind.is_dir() {
                let mut sub = match tokio::fs::read_dir(&path).await {
                    Ok(sub) => sub,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "skipping unreadable subdirectory");
                        continue;
                    }
                };
                while let Some(entry) = sub.next_entry().await? {
                    let path = entry.path();
                    if entry.file_type().await?.is_file() && self.wanted(&path) {
                        files.push(path);
                    }
                }
            }
        }
        files.sort();
        Ok(files)
    }

    async fn build_index(&self) -> Result<VectorIndex, ToolError> {
        let files = self.scan_files().await?;
        let mut chunks = Vec::new();
        for path in &files {
            let bytes = match tokio::fs::read(path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to read file for indexing");
                    continue;
                }
            };
            let Ok(text) = String::from_utf8(bytes) else {
                debug!(path = %path.display(), "skipping non-UTF-8 file");
                continue;
            };
            let pieces = chunk_text(&text, self.config.chunk_size, self.config.chunk_overlap);
            for (chunk_index, content) in pieces.into_iter().enumerate() {
                if content.trim().is_empty() {
                    continue;
                }
                chunks.push(Chunk {
                    content,
                    file_path: path.display().to_string(),
                    file_name: path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                    file_extension: path
                        .extension()
                        .map(|e| format!(".{}", e.to_string_lossy()))
                        .unwrap_or_default(),
                    chunk_index,
                    embedding: Vec::new(),
                });
            }
        }

        for batch in chunks.chunks_mut(EMBED_BATCH) {
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let vectors = self.embedder.embed_texts(&texts).await?;
            if vectors.len() != batch.len() {
                return Err(ToolError::ExecutionFailed(format!(
                    "embedding provider returned {} vectors for {} texts",
                    vectors.len(),
                    batch.len()
                )));
            }
            for (chunk, vector) in batch.iter_mut().zip(vectors) {
                chunk.embedding = vector;
            }
        }

        info!(
            tool = %self.meta.name,
            files = files.len(),
            chunks = chunks.len(),
            "semantic index built"
        );
        Ok(VectorIndex { chunks })
    }
}

fn f64_param(params: &Value, key: &str) -> Option<f64> {
    match params.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Constructor for `semantic_search` bound to a specific embedding provider.
pub fn factory_with_embedder(
    embedder: Arc<dyn EmbeddingProvider>,
) -> impl Fn(&ToolSpec) -> Result<Arc<dyn Tool>, ToolError> + Send + Sync + 'static {
    move |spec| {
        let tool: Arc<dyn Tool> = Arc::new(SemanticSearchTool::from_spec(spec, embedder.clone())?);
        Ok(tool)
    }
}

#[async_trait]
impl Tool for SemanticSearchTool {
    fn name(&self) -> &str {
        &self.meta.name
    }

    fn description(&self) -> &str {
        &self.meta.description
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The query to search for"
                },
                "limit": {
                    "type": "integer",
                    "description": format!("Maximum number of results (default: {})", self.config.limit)
                },
                "similarity_threshold": {
                    "type": "number",
                    "description": format!(
                        "Minimum similarity score (default: {})",
                        self.config.similarity_threshold
                    )
                }
            },
            "required": ["query"]
        })
    }

    fn params(&self) -> &[ParamSpec] {
        &self.meta.params
    }

    async fn invoke(&self, params: Value) -> Result<ToolOutcome, ToolError> {
        let query = str_param(&params, "query")
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| ToolError::InvalidInput("query parameter is required".to_string()))?;
        let limit = u64_param(&params, "limit").unwrap_or(self.config.limit);
        if limit == 0 {
            return Err(ToolError::InvalidInput("limit must be at least 1".to_string()));
        }
        let limit = limit.min(MAX_LIMIT) as usize;
        let threshold =
            f64_param(&params, "similarity_threshold").unwrap_or(self.config.similarity_threshold);

        let index = self.index().await?;
        let embedding = self.embedder.embed_query(query).await?;
        debug!(tool = %self.meta.name, chunks = index.chunks.len(), "searching semantic index");

        let hits = index.search(&embedding, limit);
        let all_scores: Vec<f64> = hits.iter().map(|(s, _)| round4(*s)).collect();
        let results: Vec<Value> = hits
            .iter()
            .filter(|(score, _)| *score >= threshold)
            .map(|(score, chunk)| {
                serde_json::json!({
                    "content": chunk.content,
                    "similarity_score": round4(*score),
                    "file_path": chunk.file_path,
                    "file_name": chunk.file_name,
                    "chunk_index": chunk.chunk_index,
                    "file_extension": chunk.file_extension,
                })
            })
            .collect();

        Ok(ToolOutcome::success(serde_json::json!({
            "status": "success",
            "query": query,
            "results_count": results.len(),
            "results": results,
            "debug": {
                "all_similarity_scores": all_scores,
                "max_similarity": all_scores.first().copied().unwrap_or(0.0),
                "min_similarity": all_scores.last().copied().unwrap_or(0.0),
            },
            "config": {
                "limit": limit,
                "similarity_threshold": threshold,
                "indexed_directory": self.config.scan_directory.display().to_string(),
                "embedding_provider": self.config.embedding_provider,
                "embedding_model": self.config.embedding_model(),
            }
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const VOCAB: &[&str] = &["rust", "python", "cooking"];

    /// Counts vocabulary words; one dimension per word.
    #[derive(Default)]
    struct WordCounter {
        batches: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for WordCounter {
        async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ToolError> {
            self.batches.fetch_add(1, Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| {
                    let lower = t.to_lowercase();
                    VOCAB.iter().map(|w| lower.matches(w).count() as f32).collect()
                })
                .collect())
        }
    }

    fn tool(dir: &Path, extra: &str, embedder: Arc<dyn EmbeddingProvider>) -> SemanticSearchTool {
        let yaml = format!("scan_directory: '{}'\n{extra}", dir.display());
        let spec = ToolSpec::new("search", "semantic_search", serde_yaml::from_str(&yaml).unwrap());
        SemanticSearchTool::from_spec(&spec, embedder).unwrap()
    }

    fn corpus() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("rust.md"), "Rust ownership and rust traits").unwrap();
        std::fs::write(dir.path().join("food.txt"), "cooking pasta, cooking rice").unwrap();
        std::fs::write(dir.path().join("image.png"), "rust").unwrap();
        std::fs::create_dir_all(dir.path().join("notes/deeper")).unwrap();
        std::fs::write(dir.path().join("notes/py.md"), "python scripts").unwrap();
        std::fs::write(dir.path().join("notes/deeper/hidden.md"), "rust rust rust").unwrap();
        dir
    }

    #[test]
    fn chunks_overlap() {
        let chunks = chunk_text("abcdefghij", 4, 1);
        assert_eq!(chunks, vec!["abcd", "defg", "ghij"]);
        assert_eq!(chunk_text("short", 100, 10), vec!["short"]);
        assert_eq!(chunk_text("ééééé", 3, 0), vec!["ééé", "éé"]);
    }

    #[test]
    fn config_is_validated() {
        let dir = tempfile::tempdir().unwrap();
        let build = |extra: &str| {
            let yaml = format!("scan_directory: '{}'\n{extra}", dir.path().display());
            let spec = ToolSpec::new("s", "semantic_search", serde_yaml::from_str(&yaml).unwrap());
            SemanticSearchTool::from_spec(&spec, Arc::new(UnavailableEmbedder))
        };
        assert!(build("").is_ok());
        assert!(build("chunk_size: 50").is_err());
        assert!(build("chunk_size: 200\nchunk_overlap: 200").is_err());
        assert!(build("embedding_provider: openai").is_err());
        assert!(build("similarity_threshold: 1.5").is_err());
        assert!(build("limit: 0").is_err());

        let missing = ToolSpec::new("s", "semantic_search", serde_yaml::Value::Null);
        assert!(SemanticSearchTool::from_spec(&missing, Arc::new(UnavailableEmbedder)).is_err());
    }

    #[tokio::test]
    async fn ranks_matching_files_first() {
        let dir = corpus();
        let search = tool(dir.path(), "", Arc::new(WordCounter::default()));
        let outcome = search.execute(serde_json::json!({"query": "rust"})).await;
        assert!(outcome.success, "{:?}", outcome.error);

        let result = outcome.result.unwrap();
        assert_eq!(result["results_count"], 1);
        assert_eq!(result["results"][0]["file_name"], "rust.md");
        assert_eq!(result["results"][0]["similarity_score"], 1.0);
        assert_eq!(result["results"][0]["file_extension"], ".md");
        assert_eq!(result["debug"]["all_similarity_scores"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn scans_one_level_of_subdirectories() {
        let dir = corpus();
        let search = tool(dir.path(), "", Arc::new(WordCounter::default()));
        // rust.md, food.txt, notes/py.md; not image.png or notes/deeper/.
        assert_eq!(search.ensure_indexed().await.unwrap(), 3);

        let outcome = search.execute(serde_json::json!({"query": "python"})).await;
        assert_eq!(outcome.result.unwrap()["results"][0]["file_name"], "py.md");
    }

    #[tokio::test]
    async fn index_is_built_once() {
        let dir = corpus();
        let embedder = Arc::new(WordCounter::default());
        let search = tool(dir.path(), "", embedder.clone());
        for _ in 0..3 {
            assert!(search.execute(serde_json::json!({"query": "cooking"})).await.success);
        }
        // One indexing batch plus one embedding per query.
        assert_eq!(embedder.batches.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn limit_and_threshold_come_from_params() {
        let dir = corpus();
        let search = tool(dir.path(), "", Arc::new(WordCounter::default()));
        let outcome = search
            .execute(serde_json::json!({"query": "rust", "limit": 1, "similarity_threshold": 0}))
            .await;
        let result = outcome.result.unwrap();
        assert_eq!(result["results_count"], 1);
        assert_eq!(result["config"]["limit"], 1);
    }

    #[tokio::test]
    async fn missing_query_fails() {
        let dir = corpus();
        let outcome = tool(dir.path(), "", Arc::new(WordCounter::default()))
            .execute(serde_json::json!({"query": "  "}))
            .await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("query"));
    }

    #[tokio::test]
    async fn unavailable_embedder_reports_failure() {
        let dir = corpus();
        let outcome = tool(dir.path(), "", Arc::new(UnavailableEmbedder))
            .execute(serde_json::json!({"query": "rust"}))
            .await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("no embedding provider"));
    }

    #[tokio::test]
    async fn missing_directory_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("gone");
        let search = tool(&gone, "", Arc::new(WordCounter::default()));
        assert!(matches!(search.ensure_indexed().await, Err(ToolError::NotFound(_))));
    }
}
