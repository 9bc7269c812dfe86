//! Google Cloud Storage backend over the JSON API.
//!
//! Uploads use the simple media upload endpoint; cleanup lists the course
//! prefix page by page and deletes each object.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};
use url::Url;

use coursebase_shared::{AdapterError, CourseFile, CoursebaseError, ObjectStoreConfig, Result};

use crate::{DurableStore, course_prefix, object_name};

const ADAPTER: &str = "object-store";
const USER_AGENT: &str = concat!("coursebase/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct ObjectList {
    #[serde(default)]
    items: Vec<ObjectEntry>,
    #[serde(default, rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectEntry {
    name: String,
}

/// Durable store backed by a GCS bucket.
pub struct GcsObjectStore {
    client: Client,
    api_base: Url,
    bucket: String,
    prefix: String,
    access_token: String,
}

impl GcsObjectStore {
    /// Build a store for `config.bucket`, authenticating with `access_token`.
    pub fn new(config: &ObjectStoreConfig, access_token: impl Into<String>) -> Result<Self> {
        if config.bucket.trim().is_empty() {
            return Err(CoursebaseError::config(
                "object_store.bucket must be set for the gcs backend",
            ));
        }

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| CoursebaseError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_base: config.api_base.clone(),
            bucket: config.bucket.clone(),
            prefix: config.prefix.clone(),
            access_token: access_token.into(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| CoursebaseError::config(format!("object store API base {} cannot be a base", self.api_base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn uri_for(&self, name: &str) -> String {
        format!("gs://{}/{}", self.bucket, name)
    }

    /// Every object name under the course prefix.
    async fn list_course_objects(&self, course_id: &str) -> Result<Vec<String>> {
        let prefix = course_prefix(&self.prefix, course_id);
        let mut names = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = self.endpoint(&["storage", "v1", "b", &self.bucket, "o"])?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("prefix", &prefix);
                if let Some(token) = &page_token {
                    query.append_pair("pageToken", token);
                }
            }

            let response = self
                .client
                .get(url.as_str())
                .bearer_auth(&self.access_token)
                .send()
                .await
                .map_err(|e| AdapterError::transient(ADAPTER, format!("list {prefix}: {e}")))?;

            let status = response.status();
            if !status.is_success() {
                return Err(AdapterError::from_status(ADAPTER, status.as_u16(), format!("list {prefix}")).into());
            }

            let page: ObjectList = response
                .json()
                .await
                .map_err(|e| AdapterError::protocol(ADAPTER, format!("malformed object listing: {e}")))?;
            names.extend(page.items.into_iter().map(|o| o.name));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(names)
    }
}

#[async_trait]
impl DurableStore for GcsObjectStore {
    fn name(&self) -> &str {
        "gcs"
    }

    #[instrument(skip_all, fields(course_id = %course_id, file_id = %file.id))]
    async fn upload(&self, course_id: &str, file: &CourseFile) -> Result<String> {
        let local = file.local_path.as_deref().ok_or_else(|| {
            AdapterError::protocol(ADAPTER, format!("file {} has not been staged", file.id))
        })?;
        let bytes = tokio::fs::read(local)
            .await
            .map_err(|e| CoursebaseError::io(local, e))?;

        let name = object_name(&self.prefix, course_id, file);
        let mut url = self.endpoint(&["upload", "storage", "v1", "b", &self.bucket, "o"])?;
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", &name);

        let content_type = file
            .content_type
            .as_deref()
            .unwrap_or("application/octet-stream");

        let response = self
            .client
            .post(url.as_str())
            .bearer_auth(&self.access_token)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .map_err(|e| AdapterError::transient(ADAPTER, format!("upload {name}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AdapterError::from_status(ADAPTER, status.as_u16(), format!("upload {name}")).into());
        }

        let uri = self.uri_for(&name);
        debug!(%uri, "object uploaded");
        Ok(uri)
    }

    /// Deletes every object under the course prefix, carrying on past
    /// individual failures. The first failure is returned once the whole
    /// listing has been attempted.
    #[instrument(skip_all, fields(course_id = %course_id))]
    async fn delete_all(&self, course_id: &str) -> Result<usize> {
        let names = self.list_course_objects(course_id).await?;
        let mut deleted = 0;
        let mut failures: Vec<AdapterError> = Vec::new();

        for name in &names {
            let url = self.endpoint(&["storage", "v1", "b", &self.bucket, "o", name])?;
            let response = match self
                .client
                .delete(url.as_str())
                .bearer_auth(&self.access_token)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    warn!(%name, error = %e, "object delete failed");
                    failures.push(AdapterError::transient(ADAPTER, format!("delete {name}: {e}")));
                    continue;
                }
            };

            match response.status() {
                s if s.is_success() => deleted += 1,
                StatusCode::NOT_FOUND => warn!(%name, "object already gone"),
                s => {
                    warn!(%name, status = s.as_u16(), "object delete failed");
                    failures.push(AdapterError::from_status(ADAPTER, s.as_u16(), format!("delete {name}")));
                }
            }
        }

        if let Some(first) = failures.into_iter().next() {
            let failed = names.len() - deleted;
            warn!(deleted, failed, "course objects partially deleted");
            return Err(AdapterError::new(
                ADAPTER,
                first.kind,
                format!("{} ({deleted} deleted, {failed} left behind)", first.message),
            )
            .into());
        }

        info!(deleted, "course objects deleted");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coursebase_shared::{AdapterErrorKind, course_key};
    use uuid::Uuid;
    use wiremock::matchers::{body_bytes, header, method, path, path_regex, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store_for(server: &MockServer) -> GcsObjectStore {
        let config = ObjectStoreConfig {
            bucket: "course-files".into(),
            api_base: Url::parse(&server.uri()).unwrap(),
            ..ObjectStoreConfig::default()
        };
        GcsObjectStore::new(&config, "gcs-token").unwrap()
    }

    async fn staged_file(id: &str, name: &str, content: &[u8]) -> CourseFile {
        let dir = std::env::temp_dir().join(format!("coursebase-gcs-{}", Uuid::now_v7()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let local = dir.join(name);
        tokio::fs::write(&local, content).await.unwrap();
        let mut file = CourseFile::new(id, name);
        file.local_path = Some(local);
        file.content_type = Some("application/pdf".into());
        file
    }

    #[test]
    fn requires_bucket() {
        let err = GcsObjectStore::new(&ObjectStoreConfig::default(), "t").err().unwrap();
        assert!(matches!(err, CoursebaseError::Config { .. }));
    }

    /// `courses/<course key>/` for a course ID.
    fn prefix_of(course_id: &str) -> String {
        format!("courses/{}/", course_key(course_id))
    }

    #[tokio::test]
    async fn upload_returns_gs_uri() {
        let server = MockServer::start().await;
        let name = format!("{}101_Chapter_3.pdf", prefix_of("c1"));
        Mock::given(method("POST"))
            .and(path("/upload/storage/v1/b/course-files/o"))
            .and(query_param("uploadType", "media"))
            .and(query_param("name", name.as_str()))
            .and(header("authorization", "Bearer gcs-token"))
            .and(body_bytes(b"%PDF-1".to_vec()))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": name,
                "bucket": "course-files"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let file = staged_file("101", "Chapter 3.pdf", b"%PDF-1").await;
        let uri = store_for(&server).upload("c1", &file).await.expect("upload");
        assert_eq!(uri, format!("gs://course-files/{name}"));
    }

    #[tokio::test]
    async fn upload_maps_forbidden_to_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let file = staged_file("101", "a.pdf", b"x").await;
        match store_for(&server).upload("c1", &file).await {
            Err(CoursebaseError::Adapter(e)) => assert_eq!(e.kind, AdapterErrorKind::Auth),
            other => panic!("expected auth error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unstaged_file_is_rejected() {
        let server = MockServer::start().await;
        let file = CourseFile::new("101", "a.pdf");
        assert!(store_for(&server).upload("c1", &file).await.is_err());
    }

    #[tokio::test]
    async fn delete_all_walks_pages() {
        let server = MockServer::start().await;
        let prefix = prefix_of("c1");

        Mock::given(method("GET"))
            .and(path("/storage/v1/b/course-files/o"))
            .and(query_param("prefix", prefix.as_str()))
            .and(query_param_is_missing("pageToken"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{"name": format!("{prefix}101_a.pdf")}],
                "nextPageToken": "p2"
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/storage/v1/b/course-files/o"))
            .and(query_param("pageToken", "p2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{"name": format!("{prefix}102_b.pdf")}]
            })))
            .mount(&server)
            .await;

        Mock::given(method("DELETE"))
            .and(path_regex(r"^/storage/v1/b/course-files/o/.+"))
            .respond_with(ResponseTemplate::new(204))
            .expect(2)
            .mount(&server)
            .await;

        let deleted = store_for(&server).delete_all("c1").await.expect("delete_all");
        assert_eq!(deleted, 2);
    }

    #[tokio::test]
    async fn delete_all_on_empty_prefix() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/storage/v1/b/course-files/o"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        assert_eq!(store_for(&server).delete_all("c2").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_all_keeps_going_after_a_failed_delete() {
        let server = MockServer::start().await;
        let prefix = prefix_of("c1");

        Mock::given(method("GET"))
            .and(path("/storage/v1/b/course-files/o"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [
                    {"name": format!("{prefix}101_a.pdf")},
                    {"name": format!("{prefix}102_b.pdf")},
                    {"name": format!("{prefix}103_c.pdf")}
                ]
            })))
            .mount(&server)
            .await;

        Mock::given(method("DELETE"))
            .and(path_regex(r"101_a\.pdf$"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("DELETE"))
            .and(path_regex(r"10[23]_[bc]\.pdf$"))
            .respond_with(ResponseTemplate::new(204))
            .expect(2)
            .mount(&server)
            .await;

        match store_for(&server).delete_all("c1").await {
            Err(CoursebaseError::Adapter(e)) => {
                assert_eq!(e.kind, AdapterErrorKind::TransientIo);
                assert!(e.message.contains("101_a.pdf"));
                assert!(e.message.contains("2 deleted, 1 left behind"));
            }
            other => panic!("expected transient error, got {other:?}"),
        }
    }
}
