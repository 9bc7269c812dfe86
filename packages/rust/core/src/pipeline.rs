//! End-to-end `initialize` pipeline: claim → fetch → upload → index → graph → cleanup → finalize.
//!
//! The course document is the durable record of a run. Once step 1 has
//! claimed it, the run ends either ACTIVE with the full bundle or ERROR with
//! the failure message, unless a newer run has taken the document over in
//! the meantime.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{Span, error, field, info, instrument, warn};
use uuid::Uuid;

use coursebase_graph::{GraphBuilder, TopicList};
use coursebase_lms::{FileSource, StagingArea};
use coursebase_objectstore::DurableStore;
use coursebase_retrieval::RetrievalIndex;
use coursebase_shared::{
    AdapterError, CorpusHandle, CourseBundle, CourseFile, CoursebaseError, IndexedFile,
    InitializeOutcome, KnowledgeGraph, LmsCredential, PipelineConfig, Result,
};
use coursebase_storage::CourseStateStore;

use crate::providers::Providers;

/// Input of one initialization run.
#[derive(Debug, Clone)]
pub struct InitializeRequest {
    pub course_id: String,
    /// Raw topic string as the professor typed it.
    pub topics: String,
    /// LMS token; a run without one is rejected before any state write.
    pub credential: Option<LmsCredential>,
}

/// Tunables for the orchestrator.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Maximum concurrent uploads.
    pub upload_concurrency: usize,
    /// Age after which a GENERATING document may be taken over.
    pub generation_timeout: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

impl From<&PipelineConfig> for PipelineSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            upload_concurrency: config.upload_concurrency.max(1) as usize,
            generation_timeout: Duration::from_secs(config.generation_timeout_secs),
        }
    }
}

/// A staged file the durable store did not accept.
#[derive(Debug, Clone, Serialize)]
pub struct UploadFailure {
    pub file_id: String,
    pub display_name: String,
    pub error: String,
}

/// Detailed result of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct InitializeReport {
    pub run_id: String,
    pub course_id: String,
    pub corpus_id: CorpusHandle,
    pub files_count: usize,
    pub uploaded_count: usize,
    pub upload_failures: Vec<UploadFailure>,
    pub topics: Vec<String>,
    pub graph_nodes: usize,
    pub graph_edges: usize,
    /// Objects removed from the durable store in step 7.
    pub remote_deleted: usize,
    /// Non-fatal cleanup problems (steps 6 and 7).
    pub cleanup_warnings: Vec<String>,
    #[serde(serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

impl InitializeReport {
    /// The caller-facing `{status: "complete", ...}` shape.
    pub fn outcome(&self) -> InitializeOutcome {
        InitializeOutcome::complete(&self.corpus_id, self.files_count, self.uploaded_count)
    }
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Collapse a run result into the caller-facing outcome.
pub fn outcome_of(result: &Result<InitializeReport>) -> InitializeOutcome {
    match result {
        Ok(report) => report.outcome(),
        Err(e) => InitializeOutcome::error(e.to_string()),
    }
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called for each file the LMS delivered.
    fn file_staged(&self, name: &str, current: usize, total: usize);
    /// Called for each file the durable store accepted.
    fn file_uploaded(&self, name: &str, current: usize, total: usize);
    /// Called when the pipeline completes successfully.
    fn done(&self, report: &InitializeReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn file_staged(&self, _name: &str, _current: usize, _total: usize) {}
    fn file_uploaded(&self, _name: &str, _current: usize, _total: usize) {}
    fn done(&self, _report: &InitializeReport) {}
}

/// What steps 2 to 5 produced.
struct Produced {
    files_count: usize,
    uploaded: Vec<CourseFile>,
    corpus: CorpusHandle,
    graph: KnowledgeGraph,
}

/// Bookkeeping that outlives a failed step.
#[derive(Default)]
struct RunLedger {
    /// Corpus the document pointed at before this run claimed it.
    previous_corpus: Option<CorpusHandle>,
    /// Corpus provisioned by this run.
    corpus: Option<CorpusHandle>,
    uploaded_any: bool,
    remote_cleaned: bool,
    upload_failures: Vec<UploadFailure>,
    cleanup_warnings: Vec<String>,
    remote_deleted: usize,
}

/// Sequences the adapters and the state store for one course at a time.
pub struct Orchestrator {
    files: Arc<dyn FileSource>,
    store: Arc<dyn DurableStore>,
    index: Arc<dyn RetrievalIndex>,
    graph: Arc<dyn GraphBuilder>,
    state: Arc<dyn CourseStateStore>,
    staging: StagingArea,
    settings: PipelineSettings,
}

impl Orchestrator {
    pub fn new(providers: Providers, settings: PipelineSettings) -> Self {
        Self {
            files: providers.files,
            store: providers.store,
            index: providers.index,
            graph: providers.graph,
            state: providers.state,
            staging: providers.staging,
            settings,
        }
    }

    pub fn state(&self) -> &Arc<dyn CourseStateStore> {
        &self.state
    }

    pub fn index(&self) -> &Arc<dyn RetrievalIndex> {
        &self.index
    }

    /// Run the full initialization for one course.
    ///
    /// 1. Claim the course document (GENERATING)
    /// 2. Fetch and stage files from the LMS
    /// 3. Upload staged files to the durable store
    /// 4. Provision the retrieval corpus
    /// 5. Build the knowledge graph
    /// 6. Remove local staged copies
    /// 7. Remove remote staged copies
    /// 8. Write the bundle (ACTIVE)
    ///
    /// A run that loses the document to a stale-run takeover stops touching
    /// the course: it skips remote cleanup and the ERROR write, and its
    /// finalize is refused with [`CoursebaseError::Superseded`].
    #[instrument(skip_all, fields(course_id = %request.course_id, run_id = field::Empty))]
    pub async fn initialize_course(
        &self,
        request: &InitializeRequest,
        progress: &dyn ProgressReporter,
    ) -> Result<InitializeReport> {
        let start = Instant::now();
        let run_id = Uuid::now_v7().to_string();
        Span::current().record("run_id", field::display(&run_id));

        let course_id = request.course_id.trim();
        if course_id.is_empty() {
            return Err(CoursebaseError::config("course_id must not be empty"));
        }
        let credential = request
            .credential
            .as_ref()
            .ok_or_else(|| CoursebaseError::config("no LMS access token available for this request"))?;
        let topics = TopicList::parse(&request.topics);

        info!(topics = topics.len(), "starting initialization");

        // --- Step 1: claim ---
        progress.phase("Claiming course");
        let previous = self
            .state
            .read(course_id)
            .await?
            .and_then(|record| record.corpus_id)
            .map(CorpusHandle);
        if !self.state.try_begin(course_id, &run_id, self.stale_before()).await? {
            warn!("course already generating, refusing run");
            return Err(CoursebaseError::AlreadyGenerating {
                course_id: course_id.to_string(),
            });
        }

        let staging = self.staging.for_run(&run_id);
        let mut ledger = RunLedger {
            previous_corpus: previous,
            ..RunLedger::default()
        };
        let produced = self
            .produce(course_id, credential, &topics, &staging, progress, &mut ledger)
            .await;

        // --- Step 6: local cleanup, both paths ---
        progress.phase("Cleaning up staged files");
        self.cleanup_local(&staging, &mut ledger).await;

        let produced = match produced {
            Ok(produced) => produced,
            Err(e) => return Err(self.fail_run(course_id, &run_id, e, &mut ledger).await),
        };

        // --- Step 7: remote cleanup ---
        match self.state.owns(course_id, &run_id).await {
            Ok(true) => self.cleanup_remote(course_id, &mut ledger).await,
            Ok(false) => {
                let superseded = CoursebaseError::Superseded {
                    course_id: course_id.to_string(),
                };
                return Err(self.fail_run(course_id, &run_id, superseded, &mut ledger).await);
            }
            Err(e) => return Err(self.fail_run(course_id, &run_id, e, &mut ledger).await),
        }

        // --- Step 8: finalize ---
        progress.phase("Saving course");
        let bundle = CourseBundle {
            corpus_id: produced.corpus.clone(),
            indexed_files: indexed_files(&produced.uploaded),
            graph: produced.graph,
        };
        if let Err(e) = self.state.finalize(course_id, &run_id, &bundle).await {
            return Err(self.fail_run(course_id, &run_id, e, &mut ledger).await);
        }

        // The document now points at the new corpus; the one it replaced is unreferenced.
        if let Some(previous) = ledger.previous_corpus.take() {
            if previous != produced.corpus {
                self.delete_corpus(&previous, &mut ledger).await;
            }
        }

        let report = InitializeReport {
            run_id,
            course_id: course_id.to_string(),
            corpus_id: produced.corpus,
            files_count: produced.files_count,
            uploaded_count: produced.uploaded.len(),
            upload_failures: ledger.upload_failures,
            topics: topics.labels().into_iter().map(str::to_string).collect(),
            graph_nodes: bundle.graph.nodes.len(),
            graph_edges: bundle.graph.edges.len(),
            remote_deleted: ledger.remote_deleted,
            cleanup_warnings: ledger.cleanup_warnings,
            elapsed: start.elapsed(),
        };

        progress.done(&report);
        info!(
            corpus_id = %report.corpus_id,
            files_count = report.files_count,
            uploaded_count = report.uploaded_count,
            elapsed_ms = report.elapsed.as_millis(),
            "course initialized"
        );

        Ok(report)
    }

    /// Steps 2 to 5. Every error here is fatal for the run.
    async fn produce(
        &self,
        course_id: &str,
        credential: &LmsCredential,
        topics: &TopicList,
        staging: &StagingArea,
        progress: &dyn ProgressReporter,
        ledger: &mut RunLedger,
    ) -> Result<Produced> {
        // --- Step 2: fetch ---
        progress.phase("Fetching course files");
        let staged = self
            .files
            .fetch_files(course_id, credential, staging)
            .await
            .inspect_err(|e| error!(error = %e, "fetching course files failed"))?;
        if staged.is_empty() {
            error!("no course files found");
            return Err(CoursebaseError::NoFilesFound);
        }
        let total = staged.len();
        for (i, file) in staged.iter().enumerate() {
            progress.file_staged(&file.display_name, i + 1, total);
        }
        info!(files = total, source = self.files.name(), "course files staged");

        // --- Step 3: upload ---
        progress.phase("Uploading files");
        let uploaded = self.upload_all(course_id, staged, progress, ledger).await;
        ledger.uploaded_any = !uploaded.is_empty();
        if uploaded.is_empty() {
            let first = ledger
                .upload_failures
                .first()
                .map(|f| f.error.clone())
                .unwrap_or_default();
            let err = AdapterError::transient(
                "object-store",
                format!("none of the {total} course files could be uploaded ({first})"),
            );
            error!(error = %err, "upload step failed");
            return Err(err.into());
        }
        info!(
            uploaded = uploaded.len(),
            failed = ledger.upload_failures.len(),
            "files uploaded"
        );

        // --- Step 4: index ---
        progress.phase("Indexing course files");
        let corpus = self
            .index
            .provision(course_id, &uploaded)
            .await
            .inspect_err(|e| error!(error = %e, "provisioning retrieval corpus failed"))?;
        ledger.corpus = Some(corpus.clone());
        info!(%corpus, "retrieval corpus provisioned");

        // --- Step 5: graph ---
        progress.phase("Building knowledge graph");
        let graph = self
            .graph
            .build(topics, &corpus, &uploaded)
            .await
            .inspect_err(|e| error!(error = %e, "building knowledge graph failed"))?;
        info!(nodes = graph.nodes.len(), edges = graph.edges.len(), "knowledge graph built");

        Ok(Produced {
            files_count: total,
            uploaded,
            corpus,
            graph,
        })
    }

    /// Upload on a bounded pool and return the accepted files in input order.
    async fn upload_all(
        &self,
        course_id: &str,
        staged: Vec<CourseFile>,
        progress: &dyn ProgressReporter,
        ledger: &mut RunLedger,
    ) -> Vec<CourseFile> {
        let total = staged.len();
        let semaphore = Arc::new(Semaphore::new(self.settings.upload_concurrency.max(1)));
        let mut handles = Vec::with_capacity(total);

        for file in staged {
            let semaphore = Arc::clone(&semaphore);
            let store = Arc::clone(&self.store);
            let course_id = course_id.to_string();
            let label = (file.id.clone(), file.display_name.clone());

            let handle = tokio::spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => store.upload(&course_id, &file).await,
                    Err(_) => Err(AdapterError::transient("object-store", "upload pool closed").into()),
                };
                (file, result)
            });
            handles.push((label, handle));
        }

        let mut uploaded = Vec::with_capacity(total);
        for ((file_id, display_name), handle) in handles {
            let error = match handle.await {
                Ok((mut file, Ok(uri))) => {
                    file.storage_uri = Some(uri);
                    uploaded.push(file);
                    progress.file_uploaded(&display_name, uploaded.len(), total);
                    continue;
                }
                Ok((_, Err(e))) => e.to_string(),
                Err(join) => format!("upload task failed: {join}"),
            };
            warn!(%file_id, name = %display_name, %error, "upload failed, skipping file");
            ledger.upload_failures.push(UploadFailure {
                file_id,
                display_name,
                error,
            });
        }

        uploaded
    }

    /// Failure path after the claim. Returns `cause` for the caller to propagate.
    ///
    /// The corpus this run created is always deleted. The corpus it displaced,
    /// remote cleanup and the ERROR write are only handled while the run still
    /// owns the document; otherwise they belong to the run that took it over.
    async fn fail_run(
        &self,
        course_id: &str,
        run_id: &str,
        cause: CoursebaseError,
        ledger: &mut RunLedger,
    ) -> CoursebaseError {
        error!(error = %cause, "initialization failed");

        let owned = match &cause {
            CoursebaseError::Superseded { .. } => false,
            _ => match self.state.owns(course_id, run_id).await {
                Ok(owned) => owned,
                Err(e) => {
                    warn!(error = %e, "could not confirm ownership, skipping remote cleanup");
                    ledger.cleanup_warnings.push(format!("ownership check: {e}"));
                    false
                }
            },
        };

        if owned && ledger.uploaded_any && !ledger.remote_cleaned {
            self.cleanup_remote(course_id, ledger).await;
        }

        let created = ledger.corpus.take();
        let previous = ledger.previous_corpus.take();
        if let Some(corpus) = &created {
            self.delete_corpus(corpus, ledger).await;
        }
        if let Some(corpus) = previous.filter(|p| owned && created.as_ref() != Some(p)) {
            self.delete_corpus(&corpus, ledger).await;
        }

        if matches!(cause, CoursebaseError::Superseded { .. }) {
            warn!("course was claimed by another run, leaving its document alone");
        } else {
            self.record_failure(course_id, run_id, &cause).await;
        }
        cause
    }

    async fn cleanup_local(&self, staging: &StagingArea, ledger: &mut RunLedger) {
        match staging.remove_all().await {
            Ok(removed) => info!(removed, "local staging cleaned"),
            Err(e) => {
                warn!(error = %e, "local staging cleanup failed");
                ledger.cleanup_warnings.push(format!("local cleanup: {e}"));
            }
        }
    }

    async fn cleanup_remote(&self, course_id: &str, ledger: &mut RunLedger) {
        ledger.remote_cleaned = true;
        match self.store.delete_all(course_id).await {
            Ok(deleted) => {
                ledger.remote_deleted = deleted;
                info!(deleted, "remote staged copies deleted");
            }
            Err(e) => {
                warn!(error = %e, "remote cleanup failed");
                ledger.cleanup_warnings.push(format!("remote cleanup: {e}"));
            }
        }
    }

    async fn delete_corpus(&self, corpus: &CorpusHandle, ledger: &mut RunLedger) {
        match self.index.delete(corpus).await {
            Ok(()) => info!(%corpus, "unreferenced corpus deleted"),
            Err(e) => {
                warn!(%corpus, error = %e, "corpus cleanup failed");
                ledger.cleanup_warnings.push(format!("corpus cleanup: {e}"));
            }
        }
    }

    /// Best-effort ERROR write; its own failure is only logged.
    async fn record_failure(&self, course_id: &str, run_id: &str, cause: &CoursebaseError) {
        match self.state.mark_error(course_id, run_id, &cause.to_string()).await {
            Ok(()) => {}
            Err(CoursebaseError::Superseded { .. }) => {
                warn!("course was claimed by another run, ERROR not recorded");
            }
            Err(e) => error!(error = %e, "could not record ERROR state"),
        }
    }

    /// Cut-off for treating a GENERATING document as abandoned.
    fn stale_before(&self) -> DateTime<Utc> {
        i64::try_from(self.settings.generation_timeout.as_secs())
            .ok()
            .and_then(TimeDelta::try_seconds)
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// `indexed_files` entries for the uploaded files, keyed by LMS file ID.
fn indexed_files(uploaded: &[CourseFile]) -> BTreeMap<String, IndexedFile> {
    uploaded
        .iter()
        .filter_map(|f| {
            f.storage_uri.as_ref().map(|uri| {
                (
                    f.id.clone(),
                    IndexedFile {
                        display_name: f.display_name.clone(),
                        storage_uri: uri.clone(),
                    },
                )
            })
        })
        .collect()
}
