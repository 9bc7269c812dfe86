//! Deterministic graph builder.
//!
//! Never touches the corpus. Topics become nodes in order, every file gets
//! a node, and topics are spread over files round-robin with `covered_in`
//! edges. Same input, same graph.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::debug;

use coursebase_shared::{
    CorpusHandle, CourseFile, GraphEdge, GraphNode, KnowledgeGraph, Result, TopicDetail,
};

use crate::{COVERED_IN, GraphBuilder, TopicList, sequence_edges};

#[derive(Debug, Default, Clone, Copy)]
pub struct MockGraphBuilder;

impl MockGraphBuilder {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl GraphBuilder for MockGraphBuilder {
    fn name(&self) -> &str {
        "mock"
    }

    async fn build(
        &self,
        topics: &TopicList,
        _corpus: &CorpusHandle,
        files: &[CourseFile],
    ) -> Result<KnowledgeGraph> {
        let mut nodes: Vec<GraphNode> = topics.iter().map(|t| t.node()).collect();
        nodes.extend(files.iter().map(|f| GraphNode {
            id: format!("file-{}", f.id),
            label: f.display_name.clone(),
        }));

        let mut edges = sequence_edges(topics);
        let mut data = BTreeMap::new();

        for (i, topic) in topics.iter().enumerate() {
            let file = (!files.is_empty()).then(|| &files[i % files.len()]);
            if let Some(file) = file {
                edges.push(GraphEdge {
                    source: topic.id.clone(),
                    target: format!("file-{}", file.id),
                    relation: COVERED_IN.to_string(),
                });
            }
            data.insert(
                topic.label.clone(),
                TopicDetail {
                    summary: format!("Overview of {} (topic {} of {}).", topic.label, i + 1, topics.len()),
                    sources: file.map(|f| vec![f.display_name.clone()]).unwrap_or_default(),
                },
            );
        }

        debug!(nodes = nodes.len(), edges = edges.len(), "mock graph built");
        Ok(KnowledgeGraph { nodes, edges, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files() -> Vec<CourseFile> {
        vec![
            CourseFile::new("101", "Chapter 3.pdf"),
            CourseFile::new("102", "Lecture 5.pdf"),
        ]
    }

    #[tokio::test]
    async fn round_robin_coverage() {
        let topics = TopicList::parse("Sorting, Graphs, Hashing");
        let graph = MockGraphBuilder
            .build(&topics, &CorpusHandle("c".into()), &files())
            .await
            .unwrap();

        assert_eq!(graph.nodes.len(), 5);
        let covered: Vec<(&str, &str)> = graph
            .edges
            .iter()
            .filter(|e| e.relation == COVERED_IN)
            .map(|e| (e.source.as_str(), e.target.as_str()))
            .collect();
        assert_eq!(
            covered,
            vec![
                ("topic-sorting", "file-101"),
                ("topic-graphs", "file-102"),
                ("topic-hashing", "file-101"),
            ]
        );
        assert_eq!(graph.data["Graphs"].sources, vec!["Lecture 5.pdf".to_string()]);
    }

    #[tokio::test]
    async fn deterministic_output() {
        let topics = TopicList::parse("Topic A,Topic B");
        let corpus = CorpusHandle("c".into());
        let a = MockGraphBuilder.build(&topics, &corpus, &files()).await.unwrap();
        let b = MockGraphBuilder.build(&topics, &corpus, &files()).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn no_files_still_builds_topics() {
        let graph = MockGraphBuilder
            .build(&TopicList::parse("Topic A"), &CorpusHandle("c".into()), &[])
            .await
            .unwrap();
        assert_eq!(graph.nodes.len(), 1);
        assert!(graph.edges.is_empty());
        assert!(graph.data["Topic A"].sources.is_empty());
    }
}
