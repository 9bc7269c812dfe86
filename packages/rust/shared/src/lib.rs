//! Shared types, error model, and configuration for coursebase.
//!
//! This crate is the foundation depended on by all other coursebase crates.
//! It provides:
//! - [`CoursebaseError`] and [`AdapterError`]: the unified error types
//! - Domain types ([`CourseStatus`], [`CourseRecord`], [`CourseFile`], [`KnowledgeGraph`])
//! - Configuration ([`AppConfig`], config loading, secret resolution)

pub mod config;
pub mod error;
pub mod paths;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, GraphBuilderKind, GraphConfig, LmsConfig, ObjectStoreBackend, ObjectStoreConfig,
    PipelineConfig, RetrievalConfig, RetrievalProvider, StagingConfig, StateBackend, StateConfig,
    config_dir, config_file_path, init_config, load_config, load_config_from, resolve_secret,
};
pub use error::{AdapterError, AdapterErrorKind, CoursebaseError, Result};
pub use paths::{course_key, file_object_name, sanitize_component};
pub use types::{
    CorpusHandle, CourseBundle, CourseFile, CourseRecord, CourseStatus, GraphEdge, GraphNode,
    IndexedFile, InitializeOutcome, KnowledgeGraph, LmsCredential, TopicDetail,
};
