//! Database migration system
//!
//! Tracks schema versions and applies migrations in order.

use rusqlite::Connection;
use tracing::{info, instrument};

use crate::error::Result;

/// A database migration
pub struct Migration {
    /// Version number (must be sequential starting from 1)
    pub version: u32,
    /// Description of what this migration does
    pub description: &'static str,
    /// SQL to run for this migration
    pub sql: &'static str,
}

/// All migrations in order
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial schema",
        sql: r#"
            -- Accounts (managed externally, mirrored here for lookups)
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                first_name TEXT NOT NULL,
                last_name TEXT NOT NULL,
                role TEXT NOT NULL CHECK (role IN ('student', 'supervisor', 'dean')),
                created_at TEXT NOT NULL
            );

            -- Bearer sessions
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            -- Thesis topics
            CREATE TABLE IF NOT EXISTS topics (
                id TEXT PRIMARY KEY,
                supervisor_id TEXT NOT NULL,
                title TEXT NOT NULL UNIQUE,
                description TEXT NOT NULL DEFAULT '',
                prerequisites TEXT NOT NULL DEFAULT '',
                tags_json TEXT NOT NULL DEFAULT '[]',
                field_of_study_id INTEGER,
                status TEXT NOT NULL DEFAULT 'Ukryty',
                reserved_student_id TEXT,
                version INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (supervisor_id) REFERENCES users(id),
                FOREIGN KEY (reserved_student_id) REFERENCES users(id),
                CHECK (status IN ('Ukryty', 'Dostępny', 'Zarezerwowany', 'Student zaakceptowany', 'Zatwierdzony')),
                -- A student is attached exactly while the topic is claimed
                CHECK ((reserved_student_id IS NOT NULL) =
                       (status IN ('Zarezerwowany', 'Student zaakceptowany', 'Zatwierdzony'))),
                -- Published topics always carry a field of study
                CHECK (status = 'Ukryty' OR field_of_study_id IS NOT NULL)
            );

            -- Slot accounting per supervisor
            CREATE TABLE IF NOT EXISTS supervisor_capacity (
                supervisor_id TEXT PRIMARY KEY,
                total_slots INTEGER NOT NULL CHECK (total_slots >= 0),
                committed_count INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (supervisor_id) REFERENCES users(id) ON DELETE CASCADE,
                CHECK (committed_count >= 0 AND committed_count <= total_slots)
            );
        "#,
    },
    Migration {
        version: 2,
        description: "Add indexes and the one-claim-per-student constraint",
        sql: r#"
            -- Session indexes
            CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_expires ON sessions(expires_at);

            -- Topic lookups by owner and status
            CREATE INDEX IF NOT EXISTS idx_topics_supervisor ON topics(supervisor_id);
            CREATE INDEX IF NOT EXISTS idx_topics_supervisor_status ON topics(supervisor_id, status);

            -- A student holds at most one topic at a time
            CREATE UNIQUE INDEX IF NOT EXISTS idx_topics_active_claim
                ON topics(reserved_student_id)
                WHERE reserved_student_id IS NOT NULL;
        "#,
    },
];

/// Initialize the migrations table
fn init_migrations_table(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )",
        [],
    )?;
    Ok(())
}

/// Get the current schema version
fn get_current_version(conn: &Connection) -> Result<u32> {
    let version: Option<u32> = conn
        .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
            row.get(0)
        })
        .unwrap_or(None);
    Ok(version.unwrap_or(0))
}

/// Record that a migration was applied
fn record_migration(conn: &Connection, migration: &Migration) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![
            migration.version,
            migration.description,
            chrono::Utc::now().to_rfc3339()
        ],
    )?;
    Ok(())
}

/// Run all pending migrations
#[instrument(skip(conn))]
pub fn run_migrations(conn: &Connection) -> Result<()> {
    apply_migrations(conn, MIGRATIONS)
}

/// Apply each pending migration together with its record in one transaction
fn apply_migrations(conn: &Connection, migrations: &[Migration]) -> Result<()> {
    init_migrations_table(conn)?;

    let current_version = get_current_version(conn)?;
    info!(current_version, "Checking for pending migrations");

    for migration in migrations {
        if migration.version > current_version {
            info!(
                version = migration.version,
                description = migration.description,
                "Applying migration"
            );

            let tx = conn.unchecked_transaction()?;
            tx.execute_batch(migration.sql)?;
            record_migration(&tx, migration)?;
            tx.commit()?;

            info!(version = migration.version, "Migration complete");
        }
    }

    let new_version = get_current_version(conn)?;
    if new_version > current_version {
        info!(
            from = current_version,
            to = new_version,
            "Database schema updated"
        );
    }

    Ok(())
}
