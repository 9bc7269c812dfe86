//! Read paths over an initialized course.

use tracing::{debug, instrument};

use coursebase_retrieval::{QueryAnswer, RetrievalIndex};
use coursebase_shared::{
    CorpusHandle, CourseStatus, CoursebaseError, KnowledgeGraph, Result,
};
use coursebase_storage::CourseStateStore;

/// Answer a student's question from the course corpus. The course must be ACTIVE.
#[instrument(skip_all, fields(course_id = %course_id))]
pub async fn query_course(
    state: &dyn CourseStateStore,
    index: &dyn RetrievalIndex,
    course_id: &str,
    question: &str,
) -> Result<QueryAnswer> {
    let record = state.read(course_id).await?;
    let status = record
        .as_ref()
        .map(|r| r.status)
        .unwrap_or(CourseStatus::NeedsInit);

    let corpus = match record {
        Some(r) if r.status == CourseStatus::Active => r.corpus_id.ok_or_else(|| {
            CoursebaseError::persistence(format!("course {course_id} is ACTIVE but has no corpus_id"))
        })?,
        _ => {
            return Err(CoursebaseError::NotReady {
                course_id: course_id.to_string(),
                status,
            });
        }
    };

    let answer = index.query(&CorpusHandle(corpus), question).await?;
    debug!(sources = answer.sources.len(), "course query answered");
    Ok(answer)
}

/// The stored knowledge graph, or an empty graph unless the course is ACTIVE.
pub async fn course_graph(state: &dyn CourseStateStore, course_id: &str) -> Result<KnowledgeGraph> {
    Ok(state
        .read(course_id)
        .await?
        .filter(|r| r.status == CourseStatus::Active)
        .and_then(|r| r.graph())
        .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use coursebase_retrieval::StubIndex;
    use coursebase_shared::{CourseBundle, CourseFile, GraphNode};
    use coursebase_storage::InMemoryCourseStore;

    #[tokio::test]
    async fn query_requires_active() {
        let state = InMemoryCourseStore::new();
        let index = StubIndex::new();

        match query_course(&state, &index, "c1", "What is sorting?").await {
            Err(CoursebaseError::NotReady { status, .. }) => assert_eq!(status, CourseStatus::NeedsInit),
            other => panic!("expected not ready, got {other:?}"),
        }

        state.create("c1", "run-1").await.unwrap();
        match query_course(&state, &index, "c1", "What is sorting?").await {
            Err(CoursebaseError::NotReady { status, .. }) => assert_eq!(status, CourseStatus::Generating),
            other => panic!("expected not ready, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn query_and_graph_for_active_course() {
        let state = InMemoryCourseStore::new();
        let index = StubIndex::new();

        let mut file = CourseFile::new("101", "Chapter 3.pdf");
        file.storage_uri = Some("gs://bucket/courses/c1-0a1b2c3d4e5f/101_Chapter_3.pdf".into());
        let corpus = index.provision("c1", &[file]).await.unwrap();

        let mut graph = KnowledgeGraph::default();
        graph.nodes.push(GraphNode {
            id: "topic-sorting".into(),
            label: "Sorting".into(),
        });

        state.create("c1", "run-1").await.unwrap();
        assert!(course_graph(&state, "c1").await.unwrap().is_empty());

        state
            .finalize(
                "c1",
                "run-1",
                &CourseBundle {
                    corpus_id: corpus,
                    indexed_files: Default::default(),
                    graph: graph.clone(),
                },
            )
            .await
            .unwrap();

        let answer = query_course(&state, &index, "c1", "Sorting").await.unwrap();
        assert_eq!(answer.sources, vec!["Chapter 3.pdf".to_string()]);
        assert_eq!(course_graph(&state, "c1").await.unwrap(), graph);

        state.mark_error("c1", "run-1", "boom").await.unwrap();
        assert!(course_graph(&state, "c1").await.unwrap().is_empty());
    }
}
