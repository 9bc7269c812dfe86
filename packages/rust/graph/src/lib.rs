//! Graph Builder: derive a topic knowledge graph for a course.
//!
//! - [`TopicList`]: the professor's topic string, parsed
//! - [`GraphBuilder`]: the contract the orchestrator calls
//! - [`IndexGraphBuilder`]: summarizes each topic from the retrieval corpus
//! - [`MockGraphBuilder`]: deterministic graph from topics and file names only

mod index;
mod mock;
mod topics;

use async_trait::async_trait;
use coursebase_shared::{CorpusHandle, CourseFile, KnowledgeGraph, Result};

pub use index::IndexGraphBuilder;
pub use mock::MockGraphBuilder;
pub use topics::{Topic, TopicList};

/// Relation between consecutive topics in the professor's order.
pub const PRECEDES: &str = "precedes";
/// Relation between topics whose summaries share a source.
pub const RELATED_TO: &str = "related_to";
/// Relation from a topic to a course file node.
pub const COVERED_IN: &str = "covered_in";

#[async_trait]
pub trait GraphBuilder: Send + Sync {
    fn name(&self) -> &str;

    /// Build the graph for `topics` over the corpus. `files` are the
    /// uploaded files the corpus was provisioned from.
    async fn build(
        &self,
        topics: &TopicList,
        corpus: &CorpusHandle,
        files: &[CourseFile],
    ) -> Result<KnowledgeGraph>;
}

/// Chain consecutive topics with `precedes` edges.
pub(crate) fn sequence_edges(topics: &TopicList) -> Vec<coursebase_shared::GraphEdge> {
    topics
        .iter()
        .zip(topics.iter().skip(1))
        .map(|(a, b)| coursebase_shared::GraphEdge {
            source: a.id.clone(),
            target: b.id.clone(),
            relation: PRECEDES.to_string(),
        })
        .collect()
}
