//! Provider wiring: build every adapter from [`AppConfig`].
//!
//! Clients are constructed once here and handed to the orchestrator; nothing
//! is held in process-wide globals. Secrets are read from the environment
//! variables the config names, and a missing secret fails with a config
//! error before any course document is touched.

use std::sync::Arc;

use tracing::{debug, info};

use coursebase_graph::{GraphBuilder, IndexGraphBuilder, MockGraphBuilder};
use coursebase_lms::{CanvasFileSource, FileSource, StagingArea};
use coursebase_objectstore::{DurableStore, GcsObjectStore, LocalDirStore};
use coursebase_retrieval::{RetrievalIndex, StubIndex, VertexRagIndex};
use coursebase_shared::{
    AppConfig, GraphBuilderKind, LmsCredential, ObjectStoreBackend, Result, RetrievalProvider,
    StateBackend, resolve_secret,
};
use coursebase_storage::{CourseStateStore, InMemoryCourseStore, LibsqlCourseStore};

/// The full set of collaborators an initialization run needs.
pub struct Providers {
    pub files: Arc<dyn FileSource>,
    pub store: Arc<dyn DurableStore>,
    pub index: Arc<dyn RetrievalIndex>,
    pub graph: Arc<dyn GraphBuilder>,
    pub state: Arc<dyn CourseStateStore>,
    pub staging: StagingArea,
}

impl Providers {
    /// Build every provider the config selects.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let files: Arc<dyn FileSource> = Arc::new(CanvasFileSource::new(&config.lms)?);
        let store = build_durable_store(config)?;
        let index = build_index(config)?;
        let graph = build_graph_builder(config, Arc::clone(&index));
        let state = open_state(config).await?;

        info!(
            files = files.name(),
            store = store.name(),
            index = index.name(),
            graph = graph.name(),
            state = state.backend(),
            "providers ready"
        );

        Ok(Self {
            files,
            store,
            index,
            graph,
            state,
            staging: StagingArea::new(&config.staging.root),
        })
    }
}

/// The professor's LMS token from the configured environment variable.
pub fn lms_credential(config: &AppConfig) -> Result<LmsCredential> {
    resolve_secret(&config.lms.token_env, "LMS API token").map(LmsCredential::new)
}

pub fn build_durable_store(config: &AppConfig) -> Result<Arc<dyn DurableStore>> {
    let section = &config.object_store;
    Ok(match section.backend {
        ObjectStoreBackend::Gcs => {
            let token = resolve_secret(&section.access_token_env, "Cloud Storage access token")?;
            Arc::new(GcsObjectStore::new(section, token)?)
        }
        ObjectStoreBackend::Local => {
            debug!(root = %section.local_root.display(), "using local object store");
            Arc::new(LocalDirStore::new(&section.local_root, section.prefix.clone()))
        }
    })
}

pub fn build_index(config: &AppConfig) -> Result<Arc<dyn RetrievalIndex>> {
    let section = &config.retrieval;
    Ok(match section.provider {
        RetrievalProvider::Vertex => {
            let project = resolve_secret(&section.project_env, "Cloud project ID")?;
            let token = resolve_secret(&section.access_token_env, "Vertex AI access token")?;
            Arc::new(VertexRagIndex::new(section, &project, token)?)
        }
        RetrievalProvider::Stub => Arc::new(StubIndex::new()),
    })
}

pub fn build_graph_builder(config: &AppConfig, index: Arc<dyn RetrievalIndex>) -> Arc<dyn GraphBuilder> {
    match config.graph.builder {
        GraphBuilderKind::Index => Arc::new(IndexGraphBuilder::new(index)),
        GraphBuilderKind::Mock => Arc::new(MockGraphBuilder::new()),
    }
}

/// Open the configured course state store. Read-only commands only need this.
pub async fn open_state(config: &AppConfig) -> Result<Arc<dyn CourseStateStore>> {
    Ok(match config.state.backend {
        StateBackend::Libsql => Arc::new(LibsqlCourseStore::open(&config.state.path).await?),
        StateBackend::Memory => Arc::new(InMemoryCourseStore::new()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use coursebase_shared::CoursebaseError;

    fn offline_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.object_store.backend = ObjectStoreBackend::Local;
        config.retrieval.provider = RetrievalProvider::Stub;
        config.graph.builder = GraphBuilderKind::Mock;
        config.state.backend = StateBackend::Memory;
        config
    }

    #[tokio::test]
    async fn offline_providers_need_no_secrets() {
        let providers = Providers::from_config(&offline_config()).await.expect("providers");
        assert_eq!(providers.store.name(), "local");
        assert_eq!(providers.index.name(), "stub");
        assert_eq!(providers.graph.name(), "mock");
        assert_eq!(providers.state.backend(), "memory");
        assert_eq!(providers.files.name(), "canvas");
    }

    #[test]
    fn missing_secret_is_config_error() {
        let mut config = offline_config();
        config.object_store.backend = ObjectStoreBackend::Gcs;
        config.object_store.bucket = "course-files".into();
        config.object_store.access_token_env = "COURSEBASE_TEST_UNSET_GCS_TOKEN".into();

        match build_durable_store(&config) {
            Err(CoursebaseError::Config { message }) => {
                assert!(message.contains("COURSEBASE_TEST_UNSET_GCS_TOKEN"));
            }
            Err(other) => panic!("expected config error, got {other:?}"),
            Ok(_) => panic!("expected config error"),
        }
    }
}
