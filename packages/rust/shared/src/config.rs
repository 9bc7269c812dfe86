//! Application configuration for coursebase.
//!
//! User config lives at `~/.coursebase/coursebase.toml`.
//! CLI flags override config file values, which override defaults.
//! Secrets are never stored in the file: each section names the
//! environment variable that holds its credential.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{CoursebaseError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "coursebase.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".coursebase";

// ---------------------------------------------------------------------------
// Config structs (matching coursebase.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// LMS file source.
    #[serde(default)]
    pub lms: LmsConfig,

    /// Local staging area for downloaded files.
    #[serde(default)]
    pub staging: StagingConfig,

    /// Durable object storage.
    #[serde(default)]
    pub object_store: ObjectStoreConfig,

    /// Retrieval index provider.
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Knowledge graph builder.
    #[serde(default)]
    pub graph: GraphConfig,

    /// Course state store.
    #[serde(default)]
    pub state: StateConfig,

    /// Orchestrator tuning.
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// `[lms]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LmsConfig {
    /// Canvas instance root, e.g. `https://canvas.instructure.com`.
    #[serde(default = "default_lms_base_url")]
    pub base_url: Url,

    /// Name of the env var holding the Canvas API token.
    #[serde(default = "default_lms_token_env")]
    pub token_env: String,

    /// Page size requested from the files endpoint.
    #[serde(default = "default_per_page")]
    pub per_page: u32,

    /// Per-request timeout in seconds.
    #[serde(default = "default_lms_timeout")]
    pub timeout_secs: u64,
}

impl Default for LmsConfig {
    fn default() -> Self {
        Self {
            base_url: default_lms_base_url(),
            token_env: default_lms_token_env(),
            per_page: default_per_page(),
            timeout_secs: default_lms_timeout(),
        }
    }
}

fn default_lms_base_url() -> Url {
    Url::parse("https://canvas.instructure.com").expect("static URL is valid")
}
fn default_lms_token_env() -> String {
    "CANVAS_API_TOKEN".into()
}
fn default_per_page() -> u32 {
    100
}
fn default_lms_timeout() -> u64 {
    60
}

/// `[staging]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingConfig {
    /// Root directory; each course stages into `<root>/<course_id>/`.
    #[serde(default = "default_staging_root")]
    pub root: PathBuf,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            root: default_staging_root(),
        }
    }
}

fn default_staging_root() -> PathBuf {
    PathBuf::from("var/courses")
}

/// Which durable store implementation to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectStoreBackend {
    /// Google Cloud Storage JSON API.
    Gcs,
    /// A directory on the local filesystem.
    Local,
}

/// `[object_store]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStoreConfig {
    #[serde(default = "default_object_backend")]
    pub backend: ObjectStoreBackend,

    /// Bucket name (required for `gcs`).
    #[serde(default)]
    pub bucket: String,

    /// GCS API root.
    #[serde(default = "default_gcs_api_base")]
    pub api_base: Url,

    /// Name of the env var holding the OAuth access token.
    #[serde(default = "default_google_token_env")]
    pub access_token_env: String,

    /// Root directory for the `local` backend.
    #[serde(default = "default_local_object_root")]
    pub local_root: PathBuf,

    /// Object name prefix; objects land under `<prefix>/<course_id>/`.
    #[serde(default = "default_object_prefix")]
    pub prefix: String,
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            backend: default_object_backend(),
            bucket: String::new(),
            api_base: default_gcs_api_base(),
            access_token_env: default_google_token_env(),
            local_root: default_local_object_root(),
            prefix: default_object_prefix(),
        }
    }
}

fn default_object_backend() -> ObjectStoreBackend {
    ObjectStoreBackend::Gcs
}
fn default_gcs_api_base() -> Url {
    Url::parse("https://storage.googleapis.com").expect("static URL is valid")
}
fn default_google_token_env() -> String {
    "GOOGLE_OAUTH_ACCESS_TOKEN".into()
}
fn default_local_object_root() -> PathBuf {
    PathBuf::from("var/object-store")
}
fn default_object_prefix() -> String {
    "courses".into()
}

/// Which retrieval index implementation to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalProvider {
    /// Vertex AI RAG Engine REST API.
    Vertex,
    /// Deterministic in-process stub.
    Stub,
}

/// `[retrieval]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_retrieval_provider")]
    pub provider: RetrievalProvider,

    /// Name of the env var holding the cloud project ID.
    #[serde(default = "default_project_env")]
    pub project_env: String,

    /// Cloud region.
    #[serde(default = "default_location")]
    pub location: String,

    /// Override for the API root (defaults to `https://<location>-aiplatform.googleapis.com/v1`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_root: Option<Url>,

    /// Name of the env var holding the OAuth access token.
    #[serde(default = "default_google_token_env")]
    pub access_token_env: String,

    /// Generative model used to phrase answers.
    #[serde(default = "default_model")]
    pub model: String,

    /// Number of contexts retrieved per query.
    #[serde(default = "default_top_k")]
    pub top_k: u32,

    /// Delay between long-running-operation polls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Maximum polls before an operation is treated as timed out.
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            provider: default_retrieval_provider(),
            project_env: default_project_env(),
            location: default_location(),
            api_root: None,
            access_token_env: default_google_token_env(),
            model: default_model(),
            top_k: default_top_k(),
            poll_interval_ms: default_poll_interval(),
            max_polls: default_max_polls(),
        }
    }
}

fn default_retrieval_provider() -> RetrievalProvider {
    RetrievalProvider::Vertex
}
fn default_project_env() -> String {
    "GOOGLE_CLOUD_PROJECT".into()
}
fn default_location() -> String {
    "us-central1".into()
}
fn default_model() -> String {
    "gemini-2.0-flash".into()
}
fn default_top_k() -> u32 {
    5
}
fn default_poll_interval() -> u64 {
    2000
}
fn default_max_polls() -> u32 {
    150
}

/// Which graph builder implementation to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphBuilderKind {
    /// Summaries drawn from the retrieval index.
    Index,
    /// Deterministic graph from topics and file names only.
    Mock,
}

/// `[graph]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    #[serde(default = "default_graph_builder")]
    pub builder: GraphBuilderKind,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            builder: default_graph_builder(),
        }
    }
}

fn default_graph_builder() -> GraphBuilderKind {
    GraphBuilderKind::Index
}

/// Which course state store implementation to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    Libsql,
    Memory,
}

/// `[state]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default = "default_state_backend")]
    pub backend: StateBackend,

    /// Database file for the `libsql` backend.
    #[serde(default = "default_state_path")]
    pub path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            backend: default_state_backend(),
            path: default_state_path(),
        }
    }
}

fn default_state_backend() -> StateBackend {
    StateBackend::Libsql
}
fn default_state_path() -> PathBuf {
    PathBuf::from("var/coursebase.db")
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum concurrent uploads to the durable store.
    #[serde(default = "default_upload_concurrency")]
    pub upload_concurrency: u32,

    /// A GENERATING document older than this may be taken over by a new run.
    #[serde(default = "default_generation_timeout")]
    pub generation_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            upload_concurrency: default_upload_concurrency(),
            generation_timeout_secs: default_generation_timeout(),
        }
    }
}

fn default_upload_concurrency() -> u32 {
    4
}
fn default_generation_timeout() -> u64 {
    3600
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.coursebase/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| CoursebaseError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.coursebase/coursebase.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| CoursebaseError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        CoursebaseError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| CoursebaseError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| CoursebaseError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| CoursebaseError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read a secret from the named env var. Missing or empty values are config errors.
pub fn resolve_secret(var_name: &str, purpose: &str) -> Result<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Ok(val),
        _ => Err(CoursebaseError::config(format!(
            "{purpose} not found. Set the {var_name} environment variable."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("CANVAS_API_TOKEN"));
        assert!(toml_str.contains("upload_concurrency"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.lms.per_page, 100);
        assert_eq!(parsed.object_store.backend, ObjectStoreBackend::Gcs);
        assert_eq!(parsed.retrieval.provider, RetrievalProvider::Vertex);
        assert_eq!(parsed.state.backend, StateBackend::Libsql);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[object_store]
backend = "local"
local_root = "/tmp/objects"

[retrieval]
provider = "stub"

[graph]
builder = "mock"

[state]
backend = "memory"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.object_store.backend, ObjectStoreBackend::Local);
        assert_eq!(config.object_store.local_root, PathBuf::from("/tmp/objects"));
        assert_eq!(config.object_store.prefix, "courses");
        assert_eq!(config.retrieval.provider, RetrievalProvider::Stub);
        assert_eq!(config.graph.builder, GraphBuilderKind::Mock);
        assert_eq!(config.state.backend, StateBackend::Memory);
        assert_eq!(config.pipeline.upload_concurrency, 4);
        assert_eq!(config.lms.base_url.as_str(), "https://canvas.instructure.com/");
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let result: std::result::Result<AppConfig, _> = toml::from_str("[state]\nbackend = \"redis\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn missing_secret_is_config_error() {
        // Use a unique env var name to avoid interfering with other tests
        let result = resolve_secret("CB_TEST_NONEXISTENT_TOKEN_12345", "Canvas API token");
        let err = result.unwrap_err();
        assert!(matches!(err, CoursebaseError::Config { .. }));
        assert!(err.to_string().contains("CB_TEST_NONEXISTENT_TOKEN_12345"));
    }
}
