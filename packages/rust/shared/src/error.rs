//! Error types for coursebase.
//!
//! Library crates use [`CoursebaseError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

use crate::types::CourseStatus;

/// Top-level error type for all coursebase operations.
#[derive(Debug, thiserror::Error)]
pub enum CoursebaseError {
    /// Missing credential, environment, or invalid configuration.
    #[error("config error: {message}")]
    Config { message: String },

    /// The LMS returned no usable files for the course.
    #[error("No course files found")]
    NoFilesFound,

    /// An external provider (LMS, object store, index, graph) failed.
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    /// The course state store could not be read or written.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Another initialization run owns the course document.
    #[error("course {course_id} is already being initialized")]
    AlreadyGenerating { course_id: String },

    /// The run lost the course document to a newer run that took it over.
    #[error("course {course_id} was claimed by another run")]
    Superseded { course_id: String },

    /// The course exists but is not in a state that can serve the request.
    #[error("course {course_id} is not ready (status {status})")]
    NotReady {
        course_id: String,
        status: CourseStatus,
    },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, CoursebaseError>;

impl CoursebaseError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a persistence error from any displayable message.
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// Adapter errors
// ---------------------------------------------------------------------------

/// Failure category reported by an external adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterErrorKind {
    /// Credential missing, expired, or rejected.
    Auth,
    /// The course, object, or corpus does not exist.
    NotFound,
    /// Network failure, timeout, throttling, or a 5xx from the provider.
    TransientIo,
    /// The provider answered, but not in a shape we understand.
    Protocol,
}

impl AdapterErrorKind {
    /// Classify an HTTP status code returned by a provider.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Auth,
            404 => Self::NotFound,
            408 | 429 | 500..=599 => Self::TransientIo,
            _ => Self::Protocol,
        }
    }
}

impl std::fmt::Display for AdapterErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Auth => "auth error",
            Self::NotFound => "not found",
            Self::TransientIo => "transient I/O error",
            Self::Protocol => "protocol error",
        };
        f.write_str(s)
    }
}

/// An error raised by one of the swappable provider adapters.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{adapter} {kind}: {message}")]
pub struct AdapterError {
    /// Short adapter label (`lms`, `object-store`, `retrieval`, `graph`).
    pub adapter: &'static str,
    pub kind: AdapterErrorKind,
    pub message: String,
}

impl AdapterError {
    pub fn new(adapter: &'static str, kind: AdapterErrorKind, msg: impl Into<String>) -> Self {
        Self {
            adapter,
            kind,
            message: msg.into(),
        }
    }

    /// Build an error from a non-success HTTP status and a body excerpt.
    pub fn from_status(adapter: &'static str, status: u16, context: impl std::fmt::Display) -> Self {
        Self::new(
            adapter,
            AdapterErrorKind::from_status(status),
            format!("{context}: HTTP {status}"),
        )
    }

    pub fn transient(adapter: &'static str, msg: impl Into<String>) -> Self {
        Self::new(adapter, AdapterErrorKind::TransientIo, msg)
    }

    pub fn protocol(adapter: &'static str, msg: impl Into<String>) -> Self {
        Self::new(adapter, AdapterErrorKind::Protocol, msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = CoursebaseError::config("CANVAS_API_TOKEN environment variable not set");
        assert_eq!(
            err.to_string(),
            "config error: CANVAS_API_TOKEN environment variable not set"
        );

        assert_eq!(CoursebaseError::NoFilesFound.to_string(), "No course files found");
        assert_eq!(
            CoursebaseError::Superseded { course_id: "c1".into() }.to_string(),
            "course c1 was claimed by another run"
        );
    }

    #[test]
    fn adapter_error_is_transparent() {
        let err: CoursebaseError =
            AdapterError::from_status("lms", 401, "GET /api/v1/courses/42/files").into();
        assert_eq!(
            err.to_string(),
            "lms auth error: GET /api/v1/courses/42/files: HTTP 401"
        );
    }

    #[test]
    fn status_classification() {
        assert_eq!(AdapterErrorKind::from_status(403), AdapterErrorKind::Auth);
        assert_eq!(AdapterErrorKind::from_status(404), AdapterErrorKind::NotFound);
        assert_eq!(AdapterErrorKind::from_status(429), AdapterErrorKind::TransientIo);
        assert_eq!(AdapterErrorKind::from_status(503), AdapterErrorKind::TransientIo);
        assert_eq!(AdapterErrorKind::from_status(400), AdapterErrorKind::Protocol);
    }
}
