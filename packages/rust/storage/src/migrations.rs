//! SQL migration definitions for the course state database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: one course document per course_id",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Course documents. JSON columns hold the serialized bundle.
CREATE TABLE IF NOT EXISTS courses (
    course_id     TEXT PRIMARY KEY,
    status        TEXT NOT NULL,
    corpus_id     TEXT,
    indexed_files TEXT,
    kg_nodes      TEXT,
    kg_edges      TEXT,
    kg_data       TEXT,
    error_message TEXT,
    updated_at    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_courses_status ON courses(status);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Run ownership: the ID of the run that last claimed the course",
            sql: r#"
ALTER TABLE courses ADD COLUMN run_id TEXT;

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
