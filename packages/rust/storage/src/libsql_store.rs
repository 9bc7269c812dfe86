//! libSQL (embedded, offline mode) backend for course documents.
//!
//! **Access rules:**
//! - The orchestrator opens read-write via [`LibsqlCourseStore::open`]
//! - Status/inspection commands may open read-only via [`LibsqlCourseStore::open_readonly`]

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coursebase_shared::{
    CourseBundle, CourseRecord, CourseStatus, CoursebaseError, Result,
};
use libsql::{Connection, Database, params};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::{CourseStateStore, migrations, timestamp};

/// Column list shared by every SELECT over `courses`.
const COURSE_COLUMNS: &str = "course_id, status, corpus_id, indexed_files, kg_nodes, kg_edges, \
                              kg_data, error_message, updated_at, run_id";

/// Durable course state store wrapping a libSQL database.
pub struct LibsqlCourseStore {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl LibsqlCourseStore {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| CoursebaseError::io(parent, e))?;
            }
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| CoursebaseError::persistence(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| CoursebaseError::persistence(e.to_string()))?;

        let store = Self {
            db,
            conn,
            readonly: false,
        };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| CoursebaseError::persistence(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| CoursebaseError::persistence(e.to_string()))?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        CoursebaseError::persistence(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Why a closing write matched no row: the document is gone, or another
    /// run has claimed it since.
    async fn refusal(&self, course_id: &str) -> CoursebaseError {
        match self.read(course_id).await {
            Ok(Some(_)) => CoursebaseError::Superseded {
                course_id: course_id.to_string(),
            },
            Ok(None) => CoursebaseError::persistence(format!(
                "course document {course_id} does not exist"
            )),
            Err(e) => e,
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(CoursebaseError::persistence(
                "database is opened in read-only mode",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl CourseStateStore for LibsqlCourseStore {
    async fn get_state(&self, course_id: &str) -> Result<CourseStatus> {
        let mut rows = self
            .conn
            .query(
                "SELECT status FROM courses WHERE course_id = ?1",
                params![course_id],
            )
            .await
            .map_err(|e| CoursebaseError::persistence(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let status: String = row
                    .get(0)
                    .map_err(|e| CoursebaseError::persistence(e.to_string()))?;
                Ok(CourseStatus::from_stored(&status))
            }
            Ok(None) => Ok(CourseStatus::NeedsInit),
            Err(e) => Err(CoursebaseError::persistence(e.to_string())),
        }
    }

    async fn create(&self, course_id: &str, run_id: &str) -> Result<()> {
        self.check_writable()?;
        let now = timestamp(Utc::now());
        self.conn
            .execute(
                "INSERT INTO courses (course_id, status, updated_at, run_id) VALUES (?1, 'GENERATING', ?2, ?3)
                 ON CONFLICT(course_id) DO UPDATE SET
                   status = 'GENERATING',
                   run_id = excluded.run_id,
                   corpus_id = NULL,
                   indexed_files = NULL,
                   kg_nodes = NULL,
                   kg_edges = NULL,
                   kg_data = NULL,
                   error_message = NULL,
                   updated_at = excluded.updated_at",
                params![course_id, now.as_str(), run_id],
            )
            .await
            .map_err(|e| CoursebaseError::persistence(e.to_string()))?;
        Ok(())
    }

    async fn try_begin(&self, course_id: &str, run_id: &str, stale_before: DateTime<Utc>) -> Result<bool> {
        self.check_writable()?;
        let now = timestamp(Utc::now());
        let stale = timestamp(stale_before);
        let changed = self
            .conn
            .execute(
                "INSERT INTO courses (course_id, status, updated_at, run_id) VALUES (?1, 'GENERATING', ?2, ?4)
                 ON CONFLICT(course_id) DO UPDATE SET
                   status = 'GENERATING',
                   run_id = excluded.run_id,
                   corpus_id = NULL,
                   indexed_files = NULL,
                   kg_nodes = NULL,
                   kg_edges = NULL,
                   kg_data = NULL,
                   error_message = NULL,
                   updated_at = excluded.updated_at
                 WHERE courses.status != 'GENERATING' OR courses.updated_at < ?3",
                params![course_id, now.as_str(), stale.as_str(), run_id],
            )
            .await
            .map_err(|e| CoursebaseError::persistence(e.to_string()))?;
        Ok(changed > 0)
    }

    async fn read(&self, course_id: &str) -> Result<Option<CourseRecord>> {
        let sql = format!("SELECT {COURSE_COLUMNS} FROM courses WHERE course_id = ?1");
        let mut rows = self
            .conn
            .query(&sql, params![course_id])
            .await
            .map_err(|e| CoursebaseError::persistence(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_record(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(CoursebaseError::persistence(e.to_string())),
        }
    }

    async fn finalize(&self, course_id: &str, run_id: &str, bundle: &CourseBundle) -> Result<()> {
        self.check_writable()?;
        let now = timestamp(Utc::now());
        let indexed_files = encode_json(&bundle.indexed_files, "indexed_files")?;
        let nodes = encode_json(&bundle.graph.nodes, "kg_nodes")?;
        let edges = encode_json(&bundle.graph.edges, "kg_edges")?;
        let data = encode_json(&bundle.graph.data, "kg_data")?;

        let changed = self
            .conn
            .execute(
                "UPDATE courses SET
                   status = 'ACTIVE',
                   corpus_id = ?2,
                   indexed_files = ?3,
                   kg_nodes = ?4,
                   kg_edges = ?5,
                   kg_data = ?6,
                   error_message = NULL,
                   updated_at = ?7
                 WHERE course_id = ?1 AND run_id = ?8",
                params![
                    course_id,
                    bundle.corpus_id.as_str(),
                    indexed_files.as_str(),
                    nodes.as_str(),
                    edges.as_str(),
                    data.as_str(),
                    now.as_str(),
                    run_id,
                ],
            )
            .await
            .map_err(|e| CoursebaseError::persistence(e.to_string()))?;

        if changed == 0 {
            return Err(self.refusal(course_id).await);
        }
        Ok(())
    }

    async fn mark_error(&self, course_id: &str, run_id: &str, message: &str) -> Result<()> {
        self.check_writable()?;
        let now = timestamp(Utc::now());
        let changed = self
            .conn
            .execute(
                "UPDATE courses SET
                   status = 'ERROR',
                   error_message = ?2,
                   corpus_id = NULL,
                   indexed_files = NULL,
                   kg_nodes = NULL,
                   kg_edges = NULL,
                   kg_data = NULL,
                   updated_at = ?3
                 WHERE course_id = ?1 AND run_id = ?4",
                params![course_id, message, now.as_str(), run_id],
            )
            .await
            .map_err(|e| CoursebaseError::persistence(e.to_string()))?;

        if changed == 0 {
            return Err(self.refusal(course_id).await);
        }
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "libsql"
    }
}

/// Serialize a bundle field into its JSON column.
fn encode_json<T: Serialize>(value: &T, column: &str) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| CoursebaseError::persistence(format!("encode {column}: {e}")))
}

/// Deserialize a nullable JSON column.
fn decode_json<T: DeserializeOwned>(raw: Option<String>, column: &str) -> Result<Option<T>> {
    raw.map(|s| {
        serde_json::from_str(&s)
            .map_err(|e| CoursebaseError::persistence(format!("decode {column}: {e}")))
    })
    .transpose()
}

/// Convert a `courses` row (in [`COURSE_COLUMNS`] order) to a [`CourseRecord`].
fn row_to_record(row: &libsql::Row) -> Result<CourseRecord> {
    let status: String = row
        .get(1)
        .map_err(|e| CoursebaseError::persistence(e.to_string()))?;
    let updated_at: String = row
        .get(8)
        .map_err(|e| CoursebaseError::persistence(e.to_string()))?;

    Ok(CourseRecord {
        course_id: row
            .get::<String>(0)
            .map_err(|e| CoursebaseError::persistence(e.to_string()))?,
        status: CourseStatus::from_stored(&status),
        run_id: row.get::<String>(9).ok(),
        corpus_id: row.get::<String>(2).ok(),
        indexed_files: decode_json(row.get::<String>(3).ok(), "indexed_files")?,
        kg_nodes: decode_json(row.get::<String>(4).ok(), "kg_nodes")?,
        kg_edges: decode_json(row.get::<String>(5).ok(), "kg_edges")?,
        kg_data: decode_json(row.get::<String>(6).ok(), "kg_data")?,
        error_message: row.get::<String>(7).ok(),
        updated_at: chrono::DateTime::parse_from_rfc3339(&updated_at)
            .map(|dt| dt.with_timezone(&Utc))
            .ok(),
    })
}
