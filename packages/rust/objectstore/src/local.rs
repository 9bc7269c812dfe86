//! Filesystem-backed durable store for development and tests.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, instrument};
use url::Url;

use coursebase_shared::{AdapterError, CourseFile, CoursebaseError, Result};

use crate::{DurableStore, course_prefix, object_name};

const ADAPTER: &str = "object-store";

/// Copies staged files under `<root>/<prefix>/<course key>/`.
#[derive(Debug, Clone)]
pub struct LocalDirStore {
    root: PathBuf,
    prefix: String,
}

impl LocalDirStore {
    pub fn new(root: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            prefix: prefix.into(),
        }
    }

    fn absolute(path: &Path) -> Result<PathBuf> {
        std::path::absolute(path).map_err(|e| CoursebaseError::io(path, e))
    }
}

#[async_trait]
impl DurableStore for LocalDirStore {
    fn name(&self) -> &str {
        "local"
    }

    #[instrument(skip_all, fields(course_id = %course_id, file_id = %file.id))]
    async fn upload(&self, course_id: &str, file: &CourseFile) -> Result<String> {
        let source = file.local_path.as_deref().ok_or_else(|| {
            AdapterError::protocol(ADAPTER, format!("file {} has not been staged", file.id))
        })?;

        let dest = Self::absolute(&self.root.join(object_name(&self.prefix, course_id, file)))?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CoursebaseError::io(parent, e))?;
        }
        tokio::fs::copy(source, &dest)
            .await
            .map_err(|e| CoursebaseError::io(&dest, e))?;

        let uri = Url::from_file_path(&dest)
            .map_err(|()| AdapterError::protocol(ADAPTER, format!("{} is not a valid file URI", dest.display())))?;
        debug!(%uri, "object stored");
        Ok(uri.to_string())
    }

    #[instrument(skip_all, fields(course_id = %course_id))]
    async fn delete_all(&self, course_id: &str) -> Result<usize> {
        let dir = self.root.join(course_prefix(&self.prefix, course_id));
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(CoursebaseError::io(&dir, e)),
        };

        let mut count = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CoursebaseError::io(&dir, e))?
        {
            if entry.path().is_file() {
                count += 1;
            }
        }

        tokio::fs::remove_dir_all(&dir)
            .await
            .map_err(|e| CoursebaseError::io(&dir, e))?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coursebase_shared::course_key;
    use uuid::Uuid;

    fn temp_root(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("coursebase-{tag}-{}", Uuid::now_v7()))
    }

    #[tokio::test]
    async fn upload_then_delete_all() {
        let staging = temp_root("staged");
        tokio::fs::create_dir_all(&staging).await.unwrap();
        let local = staging.join("101_notes.txt");
        tokio::fs::write(&local, b"week one").await.unwrap();

        let mut file = CourseFile::new("101", "notes.txt");
        file.local_path = Some(local);

        let root = temp_root("objects");
        let store = LocalDirStore::new(&root, "courses");

        let uri = store.upload("c1", &file).await.expect("upload");
        assert!(uri.starts_with("file://"));
        assert!(uri.ends_with(&format!("/courses/{}/101_notes.txt", course_key("c1"))));

        // Re-upload overwrites in place.
        assert_eq!(store.upload("c1", &file).await.unwrap(), uri);

        assert_eq!(store.delete_all("c1").await.unwrap(), 1);
        assert_eq!(store.delete_all("c1").await.unwrap(), 0);

        let _ = std::fs::remove_dir_all(&root);
        let _ = std::fs::remove_dir_all(&staging);
    }

    #[tokio::test]
    async fn similar_course_ids_keep_separate_objects() {
        let staging = temp_root("staged");
        tokio::fs::create_dir_all(&staging).await.unwrap();
        let local = staging.join("101_notes.txt");
        tokio::fs::write(&local, b"week one").await.unwrap();

        let mut file = CourseFile::new("101", "notes.txt");
        file.local_path = Some(local);

        let root = temp_root("objects");
        let store = LocalDirStore::new(&root, "courses");

        let spaced = store.upload("a b", &file).await.unwrap();
        let underscored = store.upload("a_b", &file).await.unwrap();
        assert_ne!(spaced, underscored);

        assert_eq!(store.delete_all("a_b").await.unwrap(), 1);
        let surviving = Url::parse(&spaced).unwrap().to_file_path().unwrap();
        assert!(surviving.exists());

        let _ = std::fs::remove_dir_all(&root);
        let _ = std::fs::remove_dir_all(&staging);
    }
}
