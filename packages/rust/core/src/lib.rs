//! Course initialization orchestration for coursebase.
//!
//! This crate sequences the provider adapters (LMS file source, durable
//! store, retrieval index, graph builder) and the course state store into
//! the `initialize_course` run, and serves the read paths that depend on a
//! finished run (`query_course`, `course_graph`).

pub mod pipeline;
pub mod providers;
pub mod queries;

pub use pipeline::{
    InitializeReport, InitializeRequest, Orchestrator, PipelineSettings, ProgressReporter,
    SilentProgress, UploadFailure, outcome_of,
};
pub use providers::Providers;
pub use queries::{course_graph, query_course};
