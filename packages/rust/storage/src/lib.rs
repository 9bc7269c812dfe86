//! Course State Store: lifecycle status and the final artifact bundle.
//!
//! The [`CourseStateStore`] trait is the only way the orchestrator touches
//! course documents. Two backends implement it:
//! - [`LibsqlCourseStore`]: durable, one row per course in a libSQL database
//! - [`InMemoryCourseStore`]: process-local map for tests and dry runs
//!
//! Every write touches exactly one document and is atomic on its own; no
//! cross-document transactions are needed. Each claim stamps the document
//! with the claiming run's ID, and the closing writes of a run only apply
//! while that ID is still on the document.

mod libsql_store;
mod memory;
mod migrations;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coursebase_shared::{CourseBundle, CourseRecord, CourseStatus, Result};

pub use libsql_store::LibsqlCourseStore;
pub use memory::InMemoryCourseStore;

/// Persistence contract for course documents.
#[async_trait]
pub trait CourseStateStore: Send + Sync {
    /// Current lifecycle state. An absent document is [`CourseStatus::NeedsInit`].
    async fn get_state(&self, course_id: &str) -> Result<CourseStatus> {
        Ok(self
            .read(course_id)
            .await?
            .map(|record| record.status)
            .unwrap_or(CourseStatus::NeedsInit))
    }

    /// Overwrite the document with a bare GENERATING record owned by `run_id`.
    async fn create(&self, course_id: &str, run_id: &str) -> Result<()>;

    /// Like [`create`](CourseStateStore::create), but only if no live run owns
    /// the document. A GENERATING document last touched before `stale_before`
    /// counts as abandoned. Returns `false` when the write was refused.
    async fn try_begin(&self, course_id: &str, run_id: &str, stale_before: DateTime<Utc>) -> Result<bool>;

    /// Fetch the full document, if any.
    async fn read(&self, course_id: &str) -> Result<Option<CourseRecord>>;

    /// Whether `run_id` still owns the document.
    async fn owns(&self, course_id: &str, run_id: &str) -> Result<bool> {
        Ok(self
            .read(course_id)
            .await?
            .is_some_and(|record| record.run_id.as_deref() == Some(run_id)))
    }

    /// Write the bundle and flip the document to ACTIVE.
    ///
    /// Fails with [`Superseded`](coursebase_shared::CoursebaseError::Superseded) when another run has since
    /// claimed the document.
    async fn finalize(&self, course_id: &str, run_id: &str, bundle: &CourseBundle) -> Result<()>;

    /// Flip the document to ERROR with `message`, dropping any bundle fields.
    ///
    /// Fails with [`Superseded`](coursebase_shared::CoursebaseError::Superseded) when another run has since
    /// claimed the document.
    async fn mark_error(&self, course_id: &str, run_id: &str, message: &str) -> Result<()>;

    /// Backend label for logs.
    fn backend(&self) -> &'static str;
}

/// Timestamp format shared by both backends; lexicographic order matches time order.
pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}
