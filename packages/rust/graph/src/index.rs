//! Graph builder backed by the retrieval index.
//!
//! Each topic is summarized with one corpus query. Topics whose summaries
//! cite a common source are linked with `related_to`.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use coursebase_retrieval::RetrievalIndex;
use coursebase_shared::{
    CorpusHandle, CourseFile, GraphEdge, KnowledgeGraph, Result, TopicDetail,
};

use crate::{GraphBuilder, RELATED_TO, TopicList, sequence_edges};

pub struct IndexGraphBuilder {
    index: Arc<dyn RetrievalIndex>,
}

impl IndexGraphBuilder {
    pub fn new(index: Arc<dyn RetrievalIndex>) -> Self {
        Self { index }
    }

    fn question_for(topic: &str) -> String {
        format!("Summarize what the course materials cover about {topic}.")
    }
}

#[async_trait]
impl GraphBuilder for IndexGraphBuilder {
    fn name(&self) -> &str {
        "index"
    }

    #[instrument(skip_all, fields(corpus = %corpus, topics = topics.len()))]
    async fn build(
        &self,
        topics: &TopicList,
        corpus: &CorpusHandle,
        _files: &[CourseFile],
    ) -> Result<KnowledgeGraph> {
        let mut data = BTreeMap::new();
        let mut details = Vec::with_capacity(topics.len());

        for topic in topics {
            let answer = self.index.query(corpus, &Self::question_for(&topic.label)).await?;
            debug!(topic = %topic.label, sources = answer.sources.len(), "topic summarized");
            let detail = TopicDetail {
                summary: answer.answer,
                sources: answer.sources,
            };
            details.push(detail.clone());
            data.insert(topic.label.clone(), detail);
        }

        let mut edges = sequence_edges(topics);
        let listed: Vec<_> = topics.iter().collect();
        for i in 0..listed.len() {
            for j in (i + 1)..listed.len() {
                let shared = details[i]
                    .sources
                    .iter()
                    .any(|s| details[j].sources.contains(s));
                if shared {
                    edges.push(GraphEdge {
                        source: listed[i].id.clone(),
                        target: listed[j].id.clone(),
                        relation: RELATED_TO.to_string(),
                    });
                }
            }
        }

        let graph = KnowledgeGraph {
            nodes: topics.iter().map(|t| t.node()).collect(),
            edges,
            data,
        };
        info!(nodes = graph.nodes.len(), edges = graph.edges.len(), "knowledge graph built");
        Ok(graph)
    }
}
