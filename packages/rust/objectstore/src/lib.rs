//! Durable Store Adapter: persist staged course files under stable URIs.
//!
//! - [`DurableStore`]: the contract the orchestrator uploads through
//! - [`GcsObjectStore`]: Google Cloud Storage JSON API (`gs://` URIs)
//! - [`LocalDirStore`]: a directory on disk (`file://` URIs)

mod gcs;
mod local;

use async_trait::async_trait;
use coursebase_shared::{CourseFile, Result, course_key, file_object_name};

pub use gcs::GcsObjectStore;
pub use local::LocalDirStore;

/// Object storage for staged course files.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Backend label for logs.
    fn name(&self) -> &str;

    /// Upload one staged file and return its durable URI.
    ///
    /// The file must have `local_path` set. Uploading the same file twice
    /// overwrites the object and returns the same URI.
    async fn upload(&self, course_id: &str, file: &CourseFile) -> Result<String>;

    /// Remove every object stored for `course_id`. Returns how many were deleted.
    async fn delete_all(&self, course_id: &str) -> Result<usize>;
}

/// `<prefix>/<course key>/` with empty prefixes collapsed.
pub(crate) fn course_prefix(prefix: &str, course_id: &str) -> String {
    let prefix = prefix.trim_matches('/');
    let course = course_key(course_id);
    if prefix.is_empty() {
        format!("{course}/")
    } else {
        format!("{prefix}/{course}/")
    }
}

/// Full object name for a file: `<prefix>/<course key>/<id>_<filename>`.
pub(crate) fn object_name(prefix: &str, course_id: &str, file: &CourseFile) -> String {
    format!(
        "{}{}",
        course_prefix(prefix, course_id),
        file_object_name(&file.id, &file.filename)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_names_nest_under_course() {
        let file = CourseFile::new("101", "Chapter 3.pdf");
        let key = course_key("c1");
        let expected = format!("courses/{key}/101_Chapter_3.pdf");
        assert_eq!(object_name("courses", "c1", &file), expected);
        assert_eq!(object_name("/courses/", "c1", &file), expected);
        assert_eq!(object_name("", "c1", &file), format!("{key}/101_Chapter_3.pdf"));
    }

    #[test]
    fn prefixes_never_nest_across_courses() {
        let a = course_prefix("courses", "a b");
        let b = course_prefix("courses", "a_b");
        assert_ne!(a, b);
        assert!(!a.starts_with(&b) && !b.starts_with(&a));
    }
}
