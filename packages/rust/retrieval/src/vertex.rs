//! Vertex AI RAG Engine client.
//!
//! Corpus creation and file import are long-running operations; both are
//! polled until `done`. Queries retrieve contexts from the corpus first and
//! then ask a Gemini model to answer from those contexts only.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};
use url::Url;

use coursebase_shared::{
    AdapterError, AdapterErrorKind, CorpusHandle, CourseFile, CoursebaseError, Result,
    RetrievalConfig,
};

use crate::{QueryAnswer, RetrievalIndex, push_unique, uploaded_uris};

const ADAPTER: &str = "retrieval";
const USER_AGENT: &str = concat!("coursebase/", env!("CARGO_PKG_VERSION"));

const NO_CONTEXT_ANSWER: &str = "I could not find anything about that in the course materials.";

#[derive(Debug, Deserialize)]
struct Operation {
    name: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<OperationError>,
    #[serde(default)]
    response: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct OperationError {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Default, Deserialize)]
struct RetrieveResponse {
    #[serde(default)]
    contexts: ContextList,
}

#[derive(Debug, Default, Deserialize)]
struct ContextList {
    #[serde(default)]
    contexts: Vec<RetrievedContext>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RetrievedContext {
    #[serde(default)]
    source_uri: Option<String>,
    #[serde(default)]
    source_display_name: Option<String>,
    #[serde(default)]
    text: String,
}

impl RetrievedContext {
    fn source(&self) -> Option<&str> {
        self.source_display_name
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.source_uri.as_deref())
    }
}

/// Vertex AI RAG Engine implementation of [`RetrievalIndex`].
pub struct VertexRagIndex {
    client: Client,
    api_root: String,
    parent: String,
    access_token: String,
    model: String,
    top_k: u32,
    poll_interval: Duration,
    max_polls: u32,
}

impl VertexRagIndex {
    pub fn new(config: &RetrievalConfig, project: &str, access_token: impl Into<String>) -> Result<Self> {
        if project.trim().is_empty() {
            return Err(CoursebaseError::config("cloud project ID is empty"));
        }

        let api_root = match &config.api_root {
            Some(url) => url.as_str().trim_end_matches('/').to_string(),
            None => format!("https://{}-aiplatform.googleapis.com/v1", config.location),
        };

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| CoursebaseError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_root,
            parent: format!("projects/{project}/locations/{}", config.location),
            access_token: access_token.into(),
            model: config.model.clone(),
            top_k: config.top_k,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            max_polls: config.max_polls,
        })
    }

    fn url(&self, resource: &str) -> Result<Url> {
        let raw = format!("{}/{}", self.api_root, resource.trim_start_matches('/'));
        Url::parse(&raw).map_err(|e| CoursebaseError::config(format!("invalid retrieval URL {raw}: {e}")))
    }

    async fn post_json<T: serde::de::DeserializeOwned>(&self, resource: &str, body: &Value) -> Result<T> {
        let url = self.url(resource)?;
        let response = self
            .client
            .post(url.as_str())
            .bearer_auth(&self.access_token)
            .json(body)
            .send()
            .await
            .map_err(|e| AdapterError::transient(ADAPTER, format!("{resource}: {e}")))?;
        Self::decode(resource, response).await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, resource: &str) -> Result<T> {
        let url = self.url(resource)?;
        let response = self
            .client
            .get(url.as_str())
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| AdapterError::transient(ADAPTER, format!("{resource}: {e}")))?;
        Self::decode(resource, response).await
    }

    async fn decode<T: serde::de::DeserializeOwned>(resource: &str, response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            return Err(AdapterError::from_status(ADAPTER, status.as_u16(), resource).into());
        }
        response
            .json()
            .await
            .map_err(|e| AdapterError::protocol(ADAPTER, format!("{resource}: malformed response: {e}")).into())
    }

    /// Poll a long-running operation until it completes and return its `response`.
    async fn wait(&self, mut op: Operation) -> Result<Value> {
        let mut polls = 0;
        while !op.done {
            if polls >= self.max_polls {
                return Err(AdapterError::transient(
                    ADAPTER,
                    format!("operation {} still running after {polls} polls", op.name),
                )
                .into());
            }
            polls += 1;
            tokio::time::sleep(self.poll_interval).await;
            debug!(operation = %op.name, polls, "polling operation");
            op = self.get_json(&op.name).await?;
        }

        if let Some(err) = op.error {
            return Err(AdapterError::protocol(ADAPTER, format!("operation {} failed: {}", op.name, err.message)).into());
        }
        Ok(op.response.unwrap_or(Value::Null))
    }

    /// Import the uploaded files into an existing corpus.
    async fn import(&self, corpus: &CorpusHandle, uris: &[&str]) -> Result<()> {
        let import = json!({
            "importRagFilesConfig": { "gcsSource": { "uris": uris } }
        });
        let op: Operation = self.post_json(&format!("{corpus}/ragFiles:import"), &import).await?;
        let imported = self.wait(op).await?;
        let failed = imported["failedRagFilesCount"].as_u64().unwrap_or(0);
        if failed > 0 {
            warn!(failed, "some files could not be imported");
        }
        Ok(())
    }

    async fn generate(&self, question: &str, contexts: &[RetrievedContext]) -> Result<String> {
        let mut prompt = String::from(
            "Answer the student's question using only the course material below. \
             If the material does not contain the answer, say so.\n\n",
        );
        for (i, ctx) in contexts.iter().enumerate() {
            prompt.push_str(&format!(
                "[{}] {}\n{}\n\n",
                i + 1,
                ctx.source().unwrap_or("course material"),
                ctx.text.trim()
            ));
        }
        prompt.push_str("Question: ");
        prompt.push_str(question);

        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }]
        });
        let resource = format!("{}/publishers/google/models/{}:generateContent", self.parent, self.model);
        let response: Value = self.post_json(&resource, &body).await?;

        let text: String = response["candidates"][0]["content"]["parts"]
            .as_array()
            .map(|parts| parts.iter().filter_map(|p| p["text"].as_str()).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(AdapterError::protocol(ADAPTER, "model returned no text").into());
        }
        Ok(text.trim().to_string())
    }
}

#[async_trait]
impl RetrievalIndex for VertexRagIndex {
    fn name(&self) -> &str {
        "vertex"
    }

    #[instrument(skip_all, fields(course_id = %course_id))]
    async fn provision(&self, course_id: &str, files: &[CourseFile]) -> Result<CorpusHandle> {
        let uris = uploaded_uris(files);
        if uris.is_empty() {
            return Err(AdapterError::protocol(ADAPTER, "no uploaded files to index").into());
        }

        let create = json!({ "displayName": format!("Course {course_id}") });
        let op: Operation = self.post_json(&format!("{}/ragCorpora", self.parent), &create).await?;
        let created = self.wait(op).await?;
        let corpus = CorpusHandle(
            created["name"]
                .as_str()
                .filter(|n| !n.is_empty())
                .ok_or_else(|| AdapterError::protocol(ADAPTER, "corpus operation returned no corpus name"))?
                .to_string(),
        );
        info!(%corpus, "corpus created");

        if let Err(e) = self.import(&corpus, &uris).await {
            warn!(%corpus, error = %e, "import failed, deleting corpus");
            if let Err(cleanup) = self.delete(&corpus).await {
                warn!(%corpus, error = %cleanup, "could not delete corpus after failed import");
            }
            return Err(e);
        }
        info!(files = uris.len(), "files imported into corpus");

        Ok(corpus)
    }

    #[instrument(skip_all, fields(corpus = %corpus))]
    async fn query(&self, corpus: &CorpusHandle, question: &str) -> Result<QueryAnswer> {
        let body = json!({
            "vertexRagStore": { "ragResources": [{ "ragCorpus": corpus.as_str() }] },
            "query": { "text": question, "similarityTopK": self.top_k }
        });
        let retrieved: RetrieveResponse = self
            .post_json(&format!("{}:retrieveContexts", self.parent), &body)
            .await
            .map_err(|e| match e {
                CoursebaseError::Adapter(a) if a.kind == AdapterErrorKind::NotFound => {
                    AdapterError::new(ADAPTER, AdapterErrorKind::NotFound, format!("corpus {corpus} does not exist")).into()
                }
                other => other,
            })?;

        let contexts = retrieved.contexts.contexts;
        if contexts.is_empty() {
            return Ok(QueryAnswer {
                answer: NO_CONTEXT_ANSWER.to_string(),
                sources: Vec::new(),
            });
        }

        let mut sources = Vec::new();
        for ctx in &contexts {
            if let Some(source) = ctx.source() {
                push_unique(&mut sources, source);
            }
        }

        let answer = self.generate(question, &contexts).await?;
        Ok(QueryAnswer { answer, sources })
    }

    #[instrument(skip_all, fields(corpus = %corpus))]
    async fn delete(&self, corpus: &CorpusHandle) -> Result<()> {
        let mut url = self.url(corpus.as_str())?;
        url.query_pairs_mut().append_pair("force", "true");
        let response = self
            .client
            .delete(url.as_str())
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| AdapterError::transient(ADAPTER, format!("delete {corpus}: {e}")))?;

        match response.status() {
            s if s.is_success() => {
                info!("corpus deleted");
                Ok(())
            }
            StatusCode::NOT_FOUND => {
                debug!("corpus already gone");
                Ok(())
            }
            s => Err(AdapterError::from_status(ADAPTER, s.as_u16(), format!("delete {corpus}")).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn index_for(server: &MockServer) -> VertexRagIndex {
        let config = RetrievalConfig {
            api_root: Some(Url::parse(&format!("{}/v1", server.uri())).unwrap()),
            poll_interval_ms: 1,
            max_polls: 3,
            ..RetrievalConfig::default()
        };
        VertexRagIndex::new(&config, "proj", "vertex-token").unwrap()
    }

    fn uploaded(id: &str) -> CourseFile {
        let mut file = CourseFile::new(id, format!("{id}.pdf"));
        file.storage_uri = Some(format!("gs://bucket/courses/c1/{id}.pdf"));
        file
    }

    const PARENT: &str = "/v1/projects/proj/locations/us-central1";

    #[tokio::test]
    async fn provision_creates_polls_and_imports() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(format!("{PARENT}/ragCorpora")))
            .and(body_partial_json(json!({ "displayName": "Course c1" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "projects/proj/locations/us-central1/operations/op-create",
                "done": false
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path(format!("{PARENT}/operations/op-create")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "projects/proj/locations/us-central1/operations/op-create",
                "done": true,
                "response": { "name": "projects/proj/locations/us-central1/ragCorpora/777" }
            })))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path(format!("{PARENT}/ragCorpora/777/ragFiles:import")))
            .and(body_partial_json(json!({
                "importRagFilesConfig": { "gcsSource": { "uris": [
                    "gs://bucket/courses/c1/101.pdf",
                    "gs://bucket/courses/c1/102.pdf"
                ] } }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "projects/proj/locations/us-central1/operations/op-import",
                "done": true,
                "response": { "importedRagFilesCount": "2" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let files = vec![uploaded("101"), CourseFile::new("999", "skipped.pdf"), uploaded("102")];
        let corpus = index_for(&server).provision("c1", &files).await.expect("provision");
        assert_eq!(corpus.as_str(), "projects/proj/locations/us-central1/ragCorpora/777");
    }

    #[tokio::test]
    async fn operation_that_never_finishes_times_out() {
        let server = MockServer::start().await;
        let pending = json!({ "name": "projects/proj/locations/us-central1/operations/slow", "done": false });

        Mock::given(method("POST"))
            .and(path(format!("{PARENT}/ragCorpora")))
            .respond_with(ResponseTemplate::new(200).set_body_json(pending.clone()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("{PARENT}/operations/slow")))
            .respond_with(ResponseTemplate::new(200).set_body_json(pending))
            .mount(&server)
            .await;

        match index_for(&server).provision("c1", &[uploaded("101")]).await {
            Err(CoursebaseError::Adapter(e)) => assert_eq!(e.kind, AdapterErrorKind::TransientIo),
            other => panic!("expected transient error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn query_retrieves_then_generates() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(format!("{PARENT}:retrieveContexts")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "contexts": { "contexts": [
                    { "sourceUri": "gs://b/101.pdf", "sourceDisplayName": "Chapter 3.pdf", "text": "Merge sort splits." },
                    { "sourceUri": "gs://b/102.pdf", "sourceDisplayName": "Lecture 5.pdf", "text": "Quick sort pivots." },
                    { "sourceUri": "gs://b/101.pdf", "sourceDisplayName": "Chapter 3.pdf", "text": "Merge sort merges." }
                ] }
            })))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path(format!("{PARENT}/publishers/google/models/gemini-2.0-flash:generateContent")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{ "content": { "parts": [{ "text": "Sorting orders elements. " }] } }]
            })))
            .mount(&server)
            .await;

        let answer = index_for(&server)
            .query(&CorpusHandle("projects/proj/locations/us-central1/ragCorpora/777".into()), "What is sorting?")
            .await
            .expect("query");
        assert_eq!(answer.answer, "Sorting orders elements.");
        assert_eq!(answer.sources, vec!["Chapter 3.pdf".to_string(), "Lecture 5.pdf".to_string()]);
    }

    #[tokio::test]
    async fn query_without_contexts_skips_generation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("{PARENT}:retrieveContexts")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let answer = index_for(&server)
            .query(&CorpusHandle("c".into()), "Anything?")
            .await
            .unwrap();
        assert!(answer.sources.is_empty());
        assert_eq!(answer.answer, NO_CONTEXT_ANSWER);
    }

    #[tokio::test]
    async fn failed_import_deletes_the_new_corpus() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(format!("{PARENT}/ragCorpora")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "projects/proj/locations/us-central1/operations/op-create",
                "done": true,
                "response": { "name": "projects/proj/locations/us-central1/ragCorpora/778" }
            })))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path(format!("{PARENT}/ragCorpora/778/ragFiles:import")))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        Mock::given(method("DELETE"))
            .and(path(format!("{PARENT}/ragCorpora/778")))
            .and(query_param("force", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "projects/proj/locations/us-central1/operations/op-delete"
            })))
            .expect(1)
            .mount(&server)
            .await;

        match index_for(&server).provision("c1", &[uploaded("101")]).await {
            Err(CoursebaseError::Adapter(e)) => assert_eq!(e.kind, AdapterErrorKind::TransientIo),
            other => panic!("expected transient error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn deleting_a_missing_corpus_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path(format!("{PARENT}/ragCorpora/404")))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        index_for(&server)
            .delete(&CorpusHandle("projects/proj/locations/us-central1/ragCorpora/404".into()))
            .await
            .expect("missing corpus counts as deleted");
    }
}
