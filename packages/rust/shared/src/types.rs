//! Core domain types for course provisioning.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// CourseStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a course document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CourseStatus {
    /// No document exists yet.
    NeedsInit,
    /// An initialization run owns the document.
    Generating,
    /// The bundle is written and the course can answer queries.
    Active,
    /// The last run failed; `error_message` holds the cause.
    Error,
    /// The document carries a status we do not recognize.
    NotReady,
}

impl CourseStatus {
    /// Value written to the `status` field of the course document.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NeedsInit => "NEEDS_INIT",
            Self::Generating => "GENERATING",
            Self::Active => "ACTIVE",
            Self::Error => "ERROR",
            Self::NotReady => "NOT_READY",
        }
    }

    /// Interpret a stored `status` value. Unknown values map to [`CourseStatus::NotReady`].
    pub fn from_stored(value: &str) -> Self {
        match value {
            "GENERATING" => Self::Generating,
            "ACTIVE" => Self::Active,
            "ERROR" => Self::Error,
            _ => Self::NotReady,
        }
    }
}

impl std::fmt::Display for CourseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Bearer token used against the LMS file API. Never printed.
#[derive(Clone)]
pub struct LmsCredential(String);

impl LmsCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token, for building the `Authorization` header.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for LmsCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LmsCredential(***)")
    }
}

// ---------------------------------------------------------------------------
// CourseFile
// ---------------------------------------------------------------------------

/// A course file while it moves through one initialization run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseFile {
    /// LMS file identifier.
    pub id: String,
    /// Human-readable name shown in the LMS.
    pub display_name: String,
    /// Filename on the LMS side (used to build staging/object names).
    pub filename: String,
    /// MIME type reported by the LMS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Size in bytes reported by the LMS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Where the LMS serves the file contents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    /// Ephemeral local copy, set once the file is staged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
    /// SHA-256 of the staged bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    /// Durable storage URI, set after a successful upload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_uri: Option<String>,
}

impl CourseFile {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        let display_name = display_name.into();
        Self {
            id: id.into(),
            filename: display_name.clone(),
            display_name,
            content_type: None,
            size: None,
            source_url: None,
            local_path: None,
            content_hash: None,
            storage_uri: None,
        }
    }

    /// Whether the durable store accepted this file.
    pub fn is_uploaded(&self) -> bool {
        self.storage_uri.is_some()
    }
}

/// Entry of the persisted `indexed_files` map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedFile {
    pub display_name: String,
    pub storage_uri: String,
}

// ---------------------------------------------------------------------------
// Corpus + knowledge graph
// ---------------------------------------------------------------------------

/// Opaque handle to a provisioned retrieval corpus.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorpusHandle(pub String);

impl CorpusHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CorpusHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub relation: String,
}

/// Derived material for a single topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicDetail {
    pub summary: String,
    /// Source identifiers the summary was drawn from, in retrieval order.
    #[serde(default)]
    pub sources: Vec<String>,
}

/// Topic knowledge graph produced once per initialization run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub data: BTreeMap<String, TopicDetail>,
}

impl KnowledgeGraph {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty() && self.data.is_empty()
    }
}

/// Everything written to the course document when a run succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseBundle {
    pub corpus_id: CorpusHandle,
    pub indexed_files: BTreeMap<String, IndexedFile>,
    pub graph: KnowledgeGraph,
}

// ---------------------------------------------------------------------------
// CourseRecord
// ---------------------------------------------------------------------------

/// The persisted course document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseRecord {
    pub course_id: String,
    pub status: CourseStatus,
    /// Run that last claimed the document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corpus_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexed_files: Option<BTreeMap<String, IndexedFile>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kg_nodes: Option<Vec<GraphNode>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kg_edges: Option<Vec<GraphEdge>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kg_data: Option<BTreeMap<String, TopicDetail>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl CourseRecord {
    /// A freshly created document owned by a new run.
    pub fn generating(course_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            course_id: course_id.into(),
            status: CourseStatus::Generating,
            run_id: Some(run_id.into()),
            corpus_id: None,
            indexed_files: None,
            kg_nodes: None,
            kg_edges: None,
            kg_data: None,
            error_message: None,
            updated_at: Some(Utc::now()),
        }
    }

    /// Reassemble the stored graph, if all three graph fields are present.
    pub fn graph(&self) -> Option<KnowledgeGraph> {
        match (&self.kg_nodes, &self.kg_edges, &self.kg_data) {
            (Some(nodes), Some(edges), Some(data)) => Some(KnowledgeGraph {
                nodes: nodes.clone(),
                edges: edges.clone(),
                data: data.clone(),
            }),
            _ => None,
        }
    }

    /// Corpus and graph fields are populated iff the course is ACTIVE.
    pub fn is_consistent(&self) -> bool {
        let bundle_fields = [
            self.corpus_id.is_some(),
            self.kg_nodes.is_some(),
            self.kg_edges.is_some(),
            self.kg_data.is_some(),
        ];
        if self.status == CourseStatus::Active {
            bundle_fields.iter().all(|present| *present)
        } else {
            bundle_fields.iter().all(|present| !present)
        }
    }
}

// ---------------------------------------------------------------------------
// InitializeOutcome
// ---------------------------------------------------------------------------

/// Caller-facing result of `initialize`: `{status, corpus_id?, files_count?, uploaded_count?, error?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializeOutcome {
    /// `"complete"` or `"error"`.
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corpus_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InitializeOutcome {
    pub fn complete(corpus_id: &CorpusHandle, files_count: usize, uploaded_count: usize) -> Self {
        Self {
            status: "complete".into(),
            corpus_id: Some(corpus_id.to_string()),
            files_count: Some(files_count),
            uploaded_count: Some(uploaded_count),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".into(),
            corpus_id: None,
            files_count: None,
            uploaded_count: None,
            error: Some(message.into()),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == "complete"
    }
}
