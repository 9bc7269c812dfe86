//! Canvas LMS file source.
//!
//! Lists `GET /api/v1/courses/:id/files` (following `Link: rel="next"`
//! pagination) and downloads each file into the staging area. The
//! professor's API token is only ever sent to the configured Canvas origin.

use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};
use url::Url;

use coursebase_shared::{
    AdapterError, CourseFile, CoursebaseError, LmsConfig, LmsCredential, Result, file_object_name,
};

use crate::FileSource;
use crate::staging::StagingArea;

/// User-Agent string for LMS requests.
const USER_AGENT: &str = concat!("coursebase/", env!("CARGO_PKG_VERSION"));

/// Adapter label used in errors.
const ADAPTER: &str = "lms";

/// Safety valve against a server that never stops paginating.
const MAX_PAGES: usize = 200;

static NEXT_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<([^>]+)>\s*;\s*rel="next""#).expect("static regex is valid")
});

/// One entry of the Canvas files listing.
#[derive(Debug, Clone, Deserialize)]
struct CanvasFile {
    id: u64,
    display_name: String,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default, rename = "content-type")]
    content_type: Option<String>,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    locked_for_user: bool,
}

/// Canvas REST API implementation of [`FileSource`].
pub struct CanvasFileSource {
    client: Client,
    base_url: Url,
    per_page: u32,
}

impl CanvasFileSource {
    /// Build a client for the configured Canvas instance.
    pub fn new(config: &LmsConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CoursebaseError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            per_page: config.per_page,
        })
    }

    /// `<base>/api/v1/courses/<course_id>/files?per_page=N`
    fn files_endpoint(&self, course_id: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| CoursebaseError::config(format!("LMS base URL {} cannot be a base", self.base_url)))?
            .pop_if_empty()
            .extend(["api", "v1", "courses", course_id, "files"]);
        url.query_pairs_mut()
            .append_pair("per_page", &self.per_page.to_string());
        Ok(url)
    }

    /// Walk every page of the files listing.
    async fn list_files(&self, course_id: &str, credential: &LmsCredential) -> Result<Vec<CanvasFile>> {
        let mut next = Some(self.files_endpoint(course_id)?);
        let mut files = Vec::new();
        let mut pages = 0;

        while let Some(url) = next.take() {
            pages += 1;
            if pages > MAX_PAGES {
                warn!(course_id, pages, "file listing pagination limit reached");
                break;
            }

            debug!(%url, "listing course files");
            let response = self
                .client
                .get(url.as_str())
                .bearer_auth(credential.expose())
                .send()
                .await
                .map_err(|e| AdapterError::transient(ADAPTER, format!("{url}: {e}")))?;

            let status = response.status();
            if !status.is_success() {
                return Err(AdapterError::from_status(
                    ADAPTER,
                    status.as_u16(),
                    format!("list files for course {course_id}"),
                )
                .into());
            }

            next = response
                .headers()
                .get(reqwest::header::LINK)
                .and_then(|v| v.to_str().ok())
                .and_then(next_page_url)
                .and_then(|link| self.same_origin(&link));

            let page: Vec<CanvasFile> = response.json().await.map_err(|e| {
                AdapterError::protocol(ADAPTER, format!("malformed files listing: {e}"))
            })?;
            files.extend(page);
        }

        Ok(files)
    }

    fn is_lms_origin(&self, url: &Url) -> bool {
        url.origin() == self.base_url.origin()
    }

    /// Only follow pagination links that stay on the configured Canvas host.
    fn same_origin(&self, link: &str) -> Option<Url> {
        let url = Url::parse(link).ok()?;
        if self.is_lms_origin(&url) {
            Some(url)
        } else {
            warn!(%url, "ignoring pagination link to a foreign host");
            None
        }
    }

    /// Download one file's bytes to `dest`. Returns the SHA-256 of the content.
    ///
    /// The bearer token is attached only when `source` is on the Canvas origin.
    async fn download(
        &self,
        source: &str,
        credential: &LmsCredential,
        dest: &Path,
    ) -> Result<(u64, String)> {
        let url = Url::parse(source)
            .map_err(|e| AdapterError::protocol(ADAPTER, format!("bad download URL {source}: {e}")))?;

        let mut request = self.client.get(url.as_str());
        if self.is_lms_origin(&url) {
            request = request.bearer_auth(credential.expose());
        } else {
            debug!(host = url.host_str().unwrap_or_default(), "downloading from a foreign host without the LMS token");
        }

        let response = request
            .send()
            .await
            .map_err(|e| AdapterError::transient(ADAPTER, format!("download {source}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AdapterError::from_status(ADAPTER, status.as_u16(), "download").into());
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AdapterError::transient(ADAPTER, format!("download body: {e}")))?;

        tokio::fs::write(dest, &bytes)
            .await
            .map_err(|e| CoursebaseError::io(dest, e))?;

        Ok((bytes.len() as u64, compute_hash(&bytes)))
    }
}

#[async_trait]
impl FileSource for CanvasFileSource {
    fn name(&self) -> &str {
        "canvas"
    }

    #[instrument(skip_all, fields(course_id = %course_id))]
    async fn fetch_files(
        &self,
        course_id: &str,
        credential: &LmsCredential,
        staging: &StagingArea,
    ) -> Result<Vec<CourseFile>> {
        let listing = self.list_files(course_id, credential).await?;
        info!(listed = listing.len(), "course files listed");

        if listing.is_empty() {
            return Ok(Vec::new());
        }

        let dir = staging.prepare(course_id).await?;
        let mut staged = Vec::with_capacity(listing.len());

        for entry in listing {
            let Some(source) = entry.url.as_deref().filter(|u| !u.is_empty()) else {
                warn!(file_id = entry.id, name = %entry.display_name, "no download URL, skipping");
                continue;
            };
            if entry.locked_for_user {
                warn!(file_id = entry.id, name = %entry.display_name, "file is locked, skipping");
                continue;
            }

            let filename = entry
                .filename
                .clone()
                .unwrap_or_else(|| entry.display_name.clone());
            let dest = dir.join(file_object_name(&entry.id.to_string(), &filename));

            match self.download(source, credential, &dest).await {
                Ok((len, hash)) => {
                    debug!(file_id = entry.id, bytes = len, "file staged");
                    staged.push(CourseFile {
                        id: entry.id.to_string(),
                        display_name: entry.display_name,
                        filename,
                        content_type: entry.content_type,
                        size: entry.size.or(Some(len)),
                        source_url: Some(source.to_string()),
                        local_path: Some(dest),
                        content_hash: Some(hash),
                        storage_uri: None,
                    });
                }
                Err(e) => {
                    warn!(file_id = entry.id, name = %entry.display_name, error = %e, "download failed, skipping file");
                }
            }
        }

        info!(staged = staged.len(), "course files staged");
        Ok(staged)
    }
}

/// Extract the `rel="next"` target from a `Link` header.
fn next_page_url(header: &str) -> Option<String> {
    header
        .split(',')
        .find_map(|part| NEXT_LINK.captures(part))
        .map(|caps| caps[1].to_string())
}

/// Compute SHA-256 hash of content.
fn compute_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}
