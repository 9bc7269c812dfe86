//! File Source Adapter: pull a course's files out of the LMS.
//!
//! This crate provides:
//! - [`FileSource`]: the provider-neutral contract the orchestrator calls
//! - [`CanvasFileSource`]: Canvas REST API implementation
//! - [`StagingArea`]: the ephemeral local directory files are downloaded into

mod canvas;
mod staging;

use async_trait::async_trait;
use coursebase_shared::{CourseFile, LmsCredential, Result};

pub use canvas::CanvasFileSource;
pub use staging::StagingArea;

/// Retrieves a course's file list and stages the contents locally.
///
/// Implementations return files in the LMS's listing order, each with
/// `local_path` set. Files that cannot be downloaded are left out; a
/// listing failure is an error. An empty result is not an error here, the
/// caller decides what an empty course means.
#[async_trait]
pub trait FileSource: Send + Sync {
    /// Provider label for logs (e.g. `"canvas"`).
    fn name(&self) -> &str;

    /// List and download every file of `course_id` into `staging`.
    async fn fetch_files(
        &self,
        course_id: &str,
        credential: &LmsCredential,
        staging: &StagingArea,
    ) -> Result<Vec<CourseFile>>;
}
