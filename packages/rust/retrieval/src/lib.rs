//! Retrieval Index Adapter: provision a searchable corpus from uploaded
//! course files and answer questions against it.
//!
//! - [`RetrievalIndex`]: the contract used by the orchestrator and the graph builder
//! - [`VertexRagIndex`]: Vertex AI RAG Engine over REST
//! - [`StubIndex`]: deterministic in-process index for tests and offline runs

mod stub;
mod vertex;

use async_trait::async_trait;
use coursebase_shared::{CorpusHandle, CourseFile, Result};
use serde::Serialize;

pub use stub::StubIndex;
pub use vertex::VertexRagIndex;

/// Answer to a question asked against a corpus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryAnswer {
    pub answer: String,
    /// Source names the answer was grounded on, in retrieval order, without duplicates.
    pub sources: Vec<String>,
}

#[async_trait]
pub trait RetrievalIndex: Send + Sync {
    fn name(&self) -> &str;

    /// Create a corpus for `course_id` and ingest every file that has a
    /// `storage_uri`. Files without one are ignored.
    async fn provision(&self, course_id: &str, files: &[CourseFile]) -> Result<CorpusHandle>;

    /// Answer `question` from the corpus.
    async fn query(&self, corpus: &CorpusHandle, question: &str) -> Result<QueryAnswer>;

    /// Drop a corpus and everything ingested into it. Deleting a corpus that
    /// no longer exists succeeds.
    async fn delete(&self, corpus: &CorpusHandle) -> Result<()>;
}

/// Storage URIs of the uploaded files, in input order.
pub(crate) fn uploaded_uris(files: &[CourseFile]) -> Vec<&str> {
    files
        .iter()
        .filter_map(|f| f.storage_uri.as_deref())
        .collect()
}

/// Push `value` unless it is already present.
pub(crate) fn push_unique(list: &mut Vec<String>, value: &str) {
    if !value.is_empty() && !list.iter().any(|v| v == value) {
        list.push(value.to_string());
    }
}
