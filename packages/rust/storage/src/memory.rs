//! In-memory [`CourseStateStore`] for tests and dry runs.
//!
//! Documents live in a `HashMap` behind `std::sync::RwLock`. Each operation
//! takes the lock once, so writes are atomic per document. Nothing survives
//! the process.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coursebase_shared::{CourseBundle, CourseRecord, CoursebaseError, CourseStatus, Result};

use crate::CourseStateStore;

/// Process-local course documents keyed by course ID.
#[derive(Default)]
pub struct InMemoryCourseStore {
    docs: RwLock<HashMap<String, CourseRecord>>,
}

impl InMemoryCourseStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> CoursebaseError {
        CoursebaseError::persistence("in-memory course store lock poisoned")
    }

    fn missing(course_id: &str) -> CoursebaseError {
        CoursebaseError::persistence(format!("course document {course_id} does not exist"))
    }

    /// The document `run_id` still owns, for a closing write.
    fn owned<'a>(
        docs: &'a mut HashMap<String, CourseRecord>,
        course_id: &str,
        run_id: &str,
    ) -> Result<&'a mut CourseRecord> {
        let record = docs.get_mut(course_id).ok_or_else(|| Self::missing(course_id))?;
        if record.run_id.as_deref() != Some(run_id) {
            return Err(CoursebaseError::Superseded {
                course_id: course_id.to_string(),
            });
        }
        Ok(record)
    }
}

#[async_trait]
impl CourseStateStore for InMemoryCourseStore {
    async fn create(&self, course_id: &str, run_id: &str) -> Result<()> {
        let mut docs = self.docs.write().map_err(|_| Self::poisoned())?;
        docs.insert(course_id.to_string(), CourseRecord::generating(course_id, run_id));
        Ok(())
    }

    async fn try_begin(&self, course_id: &str, run_id: &str, stale_before: DateTime<Utc>) -> Result<bool> {
        let mut docs = self.docs.write().map_err(|_| Self::poisoned())?;
        if let Some(existing) = docs.get(course_id) {
            let live = existing.status == CourseStatus::Generating
                && existing.updated_at.is_some_and(|at| at >= stale_before);
            if live {
                return Ok(false);
            }
        }
        docs.insert(course_id.to_string(), CourseRecord::generating(course_id, run_id));
        Ok(true)
    }

    async fn read(&self, course_id: &str) -> Result<Option<CourseRecord>> {
        let docs = self.docs.read().map_err(|_| Self::poisoned())?;
        Ok(docs.get(course_id).cloned())
    }

    async fn finalize(&self, course_id: &str, run_id: &str, bundle: &CourseBundle) -> Result<()> {
        let mut docs = self.docs.write().map_err(|_| Self::poisoned())?;
        let record = Self::owned(&mut docs, course_id, run_id)?;
        record.status = CourseStatus::Active;
        record.corpus_id = Some(bundle.corpus_id.to_string());
        record.indexed_files = Some(bundle.indexed_files.clone());
        record.kg_nodes = Some(bundle.graph.nodes.clone());
        record.kg_edges = Some(bundle.graph.edges.clone());
        record.kg_data = Some(bundle.graph.data.clone());
        record.error_message = None;
        record.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_error(&self, course_id: &str, run_id: &str, message: &str) -> Result<()> {
        let mut docs = self.docs.write().map_err(|_| Self::poisoned())?;
        let record = Self::owned(&mut docs, course_id, run_id)?;
        record.status = CourseStatus::Error;
        record.error_message = Some(message.to_string());
        record.corpus_id = None;
        record.indexed_files = None;
        record.kg_nodes = None;
        record.kg_edges = None;
        record.kg_data = None;
        record.updated_at = Some(Utc::now());
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coursebase_shared::{CorpusHandle, KnowledgeGraph};

    fn empty_bundle() -> CourseBundle {
        CourseBundle {
            corpus_id: CorpusHandle("stub-corpus".into()),
            indexed_files: Default::default(),
            graph: KnowledgeGraph::default(),
        }
    }

    #[tokio::test]
    async fn lifecycle_through_active() {
        let store = InMemoryCourseStore::new();
        assert_eq!(store.get_state("c1").await.unwrap(), CourseStatus::NeedsInit);

        store.create("c1", "run-1").await.unwrap();
        assert_eq!(store.get_state("c1").await.unwrap(), CourseStatus::Generating);
        assert!(store.owns("c1", "run-1").await.unwrap());

        store.finalize("c1", "run-1", &empty_bundle()).await.unwrap();

        let record = store.read("c1").await.unwrap().unwrap();
        assert_eq!(record.status, CourseStatus::Active);
        assert_eq!(record.corpus_id.as_deref(), Some("stub-corpus"));
        assert_eq!(record.run_id.as_deref(), Some("run-1"));
        assert!(record.is_consistent());
    }

    #[tokio::test]
    async fn try_begin_guards_generating() {
        let store = InMemoryCourseStore::new();
        let stale_before = Utc::now() - chrono::Duration::minutes(5);
        assert!(store.try_begin("c1", "run-1", stale_before).await.unwrap());
        assert!(!store.try_begin("c1", "run-2", stale_before).await.unwrap());
        assert!(store.owns("c1", "run-1").await.unwrap());

        let later = Utc::now() + chrono::Duration::minutes(5);
        assert!(store.try_begin("c1", "run-3", later).await.unwrap());
        assert!(store.owns("c1", "run-3").await.unwrap());
    }

    #[tokio::test]
    async fn mark_error_requires_document() {
        let store = InMemoryCourseStore::new();
        assert!(store.mark_error("c1", "run-1", "boom").await.is_err());

        store.create("c1", "run-1").await.unwrap();
        store.mark_error("c1", "run-1", "boom").await.unwrap();
        let record = store.read("c1").await.unwrap().unwrap();
        assert_eq!(record.status, CourseStatus::Error);
        assert_eq!(record.error_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn taken_over_run_cannot_write_its_outcome() {
        let store = InMemoryCourseStore::new();
        let stale_before = Utc::now() - chrono::Duration::minutes(5);
        assert!(store.try_begin("c1", "run-a", stale_before).await.unwrap());

        // run-b treats run-a as abandoned.
        let takeover = Utc::now() + chrono::Duration::minutes(5);
        assert!(store.try_begin("c1", "run-b", takeover).await.unwrap());

        let err = store.mark_error("c1", "run-a", "run A failed").await.unwrap_err();
        assert!(matches!(err, CoursebaseError::Superseded { .. }));
        let err = store.finalize("c1", "run-a", &empty_bundle()).await.unwrap_err();
        assert!(matches!(err, CoursebaseError::Superseded { .. }));
        assert!(!store.owns("c1", "run-a").await.unwrap());

        let record = store.read("c1").await.unwrap().unwrap();
        assert_eq!(record.status, CourseStatus::Generating);
        assert_eq!(record.run_id.as_deref(), Some("run-b"));
        assert!(record.error_message.is_none());

        // run-b is still live, so a third run is refused.
        assert!(!store.try_begin("c1", "run-c", stale_before).await.unwrap());
    }
}
