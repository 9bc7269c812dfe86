//! Ephemeral local staging for downloaded course files.

use std::path::{Path, PathBuf};

use coursebase_shared::{CoursebaseError, Result, course_key, sanitize_component};
use tracing::debug;

/// Root directory holding one subdirectory per course being initialized.
#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Staging area private to one run: `<root>/runs/<run_id>`.
    ///
    /// Two runs of the same course never share a directory, so one run's
    /// cleanup cannot remove files another run is still uploading.
    pub fn for_run(&self, run_id: &str) -> Self {
        Self::new(self.root.join("runs").join(sanitize_component(run_id)))
    }

    /// Directory for a single course: `<root>/<course key>`.
    pub fn course_dir(&self, course_id: &str) -> PathBuf {
        self.root.join(course_key(course_id))
    }

    /// Create the course directory if needed and return it.
    pub async fn prepare(&self, course_id: &str) -> Result<PathBuf> {
        let dir = self.course_dir(course_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| CoursebaseError::io(&dir, e))?;
        Ok(dir)
    }

    /// Remove the staging root and everything in it.
    ///
    /// Returns `false` when there was nothing to remove.
    pub async fn remove_all(&self) -> Result<bool> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => {
                debug!(dir = %self.root.display(), "removed staging directory");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CoursebaseError::io(&self.root, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("coursebase-staging-{}", Uuid::now_v7()))
    }

    #[tokio::test]
    async fn prepare_and_remove() {
        let root = temp_root();
        let staging = StagingArea::new(&root).for_run("run-1");

        let dir = staging.prepare("c1").await.expect("prepare");
        tokio::fs::write(dir.join("101_notes.txt"), b"hello").await.unwrap();
        assert!(dir.starts_with(root.join("runs").join("run-1")));
        assert!(dir.exists());

        assert!(staging.remove_all().await.expect("remove"));
        assert!(!dir.exists());

        // A second removal finds nothing to do.
        assert!(!staging.remove_all().await.expect("remove again"));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn runs_do_not_share_directories() {
        let root = temp_root();
        let base = StagingArea::new(&root);
        let first = base.for_run("run-a");
        let second = base.for_run("run-b");

        let kept = second.prepare("c1").await.unwrap();
        tokio::fs::write(kept.join("101_notes.txt"), b"hello").await.unwrap();
        first.prepare("c1").await.unwrap();

        first.remove_all().await.unwrap();
        assert!(kept.join("101_notes.txt").exists());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn colliding_ids_get_distinct_dirs() {
        let staging = StagingArea::new("/tmp/coursebase");
        assert_ne!(staging.course_dir("a b"), staging.course_dir("a_b"));
        assert_ne!(staging.course_dir("a/b"), staging.course_dir("a_b"));
    }
}
