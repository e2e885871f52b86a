//! Database schema migrations.
//!
//! Applies the initial schema: advisors, institutions, profiles, and the
//! schema_migrations tracking table.

use rusqlite::Connection;
use tracing::info;

use mentor_core::error::MentorError;

/// Run all pending database migrations.
///
/// Currently implements the initial schema (version 1). Future migrations
/// can be added by checking the current version and applying incremental
/// changes.
pub fn run_migrations(conn: &Connection) -> Result<(), MentorError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| MentorError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| MentorError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<(), MentorError> {
    conn.execute_batch(
        "
        -- Institutions referenced by advisors.
        CREATE TABLE IF NOT EXISTS institutions (
            id              TEXT PRIMARY KEY NOT NULL,
            name            TEXT NOT NULL,
            display_name    TEXT,
            country_code    TEXT,
            country         TEXT,
            city            TEXT,
            region          TEXT,
            kind            TEXT,
            homepage_url    TEXT,
            ror_id          TEXT,
            works_count     INTEGER NOT NULL DEFAULT 0,
            created_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_institutions_country
            ON institutions (country);

        -- Advisor records. concepts and embedding are JSON-encoded.
        CREATE TABLE IF NOT EXISTS advisors (
            id              TEXT PRIMARY KEY NOT NULL,
            name            TEXT NOT NULL,
            display_name    TEXT,
            institution_id  TEXT REFERENCES institutions(id),
            works_count     INTEGER NOT NULL DEFAULT 0,
            cited_by_count  INTEGER NOT NULL DEFAULT 0,
            h_index         INTEGER NOT NULL DEFAULT 0,
            i10_index       INTEGER NOT NULL DEFAULT 0,
            concepts        TEXT NOT NULL DEFAULT '[]',
            research_summary TEXT,
            orcid           TEXT,
            homepage_url    TEXT,
            embedding       TEXT,
            created_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            last_updated    INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_advisors_institution
            ON advisors (institution_id);

        CREATE INDEX IF NOT EXISTS idx_advisors_works_count
            ON advisors (works_count);

        CREATE INDEX IF NOT EXISTS idx_advisors_cited_by_count
            ON advisors (cited_by_count);

        -- Candidate profiles. research_interests and resume_embedding are
        -- JSON-encoded.
        CREATE TABLE IF NOT EXISTS profiles (
            id                  TEXT PRIMARY KEY NOT NULL,
            full_name           TEXT,
            field_of_study      TEXT,
            research_interests  TEXT NOT NULL DEFAULT '[]',
            resume_text         TEXT,
            resume_embedding    TEXT,
            created_at          INTEGER NOT NULL,
            updated_at          INTEGER NOT NULL
        );

        INSERT INTO schema_migrations (version, name) VALUES (1, 'initial_schema');
        ",
    )
    .map_err(|e| MentorError::Storage(format!("Migration v1 failed: {}", e)))?;

    Ok(())
}
