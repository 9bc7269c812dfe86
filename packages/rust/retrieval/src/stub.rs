//! Deterministic retrieval index.
//!
//! The corpus handle is a hash of the course ID and the ingested URIs, so
//! the same inputs always produce the same handle. Queries echo the
//! question and cite every file ingested by this process.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::debug;

use coursebase_shared::{AdapterError, AdapterErrorKind, CorpusHandle, CourseFile, Result};

use crate::{QueryAnswer, RetrievalIndex, push_unique, uploaded_uris};

const ADAPTER: &str = "retrieval";
const HANDLE_PREFIX: &str = "stub-corpus-";

#[derive(Default)]
pub struct StubIndex {
    /// Display names ingested per corpus.
    corpora: RwLock<HashMap<String, Vec<String>>>,
}

impl StubIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> AdapterError {
        AdapterError::protocol(ADAPTER, "stub index lock poisoned")
    }
}

#[async_trait]
impl RetrievalIndex for StubIndex {
    fn name(&self) -> &str {
        "stub"
    }

    async fn provision(&self, course_id: &str, files: &[CourseFile]) -> Result<CorpusHandle> {
        let uris = uploaded_uris(files);
        if uris.is_empty() {
            return Err(AdapterError::protocol(ADAPTER, "no uploaded files to index").into());
        }

        let mut hasher = Sha256::new();
        hasher.update(course_id.as_bytes());
        for uri in &uris {
            hasher.update([0u8]);
            hasher.update(uri.as_bytes());
        }
        let digest = format!("{:x}", hasher.finalize());
        let handle = CorpusHandle(format!("{HANDLE_PREFIX}{}", &digest[..16]));

        let mut names = Vec::new();
        for file in files.iter().filter(|f| f.is_uploaded()) {
            push_unique(&mut names, &file.display_name);
        }
        self.corpora
            .write()
            .map_err(|_| Self::poisoned())?
            .insert(handle.0.clone(), names);

        debug!(%handle, files = uris.len(), "stub corpus provisioned");
        Ok(handle)
    }

    async fn query(&self, corpus: &CorpusHandle, question: &str) -> Result<QueryAnswer> {
        let corpora = self.corpora.read().map_err(|_| Self::poisoned())?;
        let sources = match corpora.get(corpus.as_str()) {
            Some(names) => names.clone(),
            // Provisioned by another process; the handle is valid but the file names are gone.
            None if corpus.as_str().starts_with(HANDLE_PREFIX) => Vec::new(),
            None => {
                return Err(AdapterError::new(
                    ADAPTER,
                    AdapterErrorKind::NotFound,
                    format!("corpus {corpus} does not exist"),
                )
                .into());
            }
        };

        Ok(QueryAnswer {
            answer: format!("{} is covered in {} course file(s).", question.trim(), sources.len()),
            sources,
        })
    }

    async fn delete(&self, corpus: &CorpusHandle) -> Result<()> {
        let removed = self
            .corpora
            .write()
            .map_err(|_| Self::poisoned())?
            .remove(corpus.as_str());
        debug!(%corpus, existed = removed.is_some(), "stub corpus deleted");
        Ok(())
    }
}
