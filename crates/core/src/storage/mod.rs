//! SQLite storage layer for thesis topics
//!
//! One `Database` wraps one connection. Concurrent callers each open their
//! own connection to the same file; write transactions are serialised by
//! SQLite and ordered by the per-row version check.

mod capacity;
mod migrations;
mod parse;
mod topics;
mod traits;
mod users;

use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::instrument;
use uuid::Uuid;

use crate::engine::WorkflowEngine;
use crate::error::Result;
use crate::models::{Actor, SupervisorCapacity, Topic};

pub use capacity::CapacityTracker;
pub use topics::TopicStore;
pub use traits::{IdentityProvider, Storage, TopicRepository};
pub use users::UserStore;

/// How long a connection waits for a competing writer before giving up
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Main database handle
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create database at the given path and apply migrations
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = Self::connect(path)?;
        db.init()?;
        Ok(db)
    }

    /// Open a connection to an already migrated database
    pub fn connect<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::configure(&conn)?;
        // WAL lets readers proceed while one writer holds the lock
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get::<_, String>(0))?;
        Ok(Self { conn })
    }

    /// Open in-memory database (for testing)
    #[instrument]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure(&conn)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn configure(conn: &Connection) -> Result<()> {
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
        conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
        Ok(())
    }

    /// Initialize database schema via migrations
    fn init(&self) -> Result<()> {
        migrations::run_migrations(&self.conn)?;
        Ok(())
    }

    /// Override how long to wait on a locked database
    pub fn set_busy_timeout(&self, timeout: Duration) -> Result<()> {
        self.conn.busy_timeout(timeout)?;
        Ok(())
    }

    /// Get current schema version
    pub fn schema_version(&self) -> u32 {
        self.conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap_or(0)
    }

    /// Get user store
    pub fn users(&self) -> UserStore<'_> {
        UserStore::new(&self.conn)
    }

    /// Get topic store
    pub fn topics(&self) -> TopicStore<'_> {
        TopicStore::new(&self.conn)
    }

    /// Get supervisor capacity tracker
    pub fn capacity(&self) -> CapacityTracker<'_> {
        CapacityTracker::new(&self.conn)
    }

    /// Get the workflow engine bound to this connection
    pub fn workflow(&self) -> WorkflowEngine<'_> {
        WorkflowEngine::new(self)
    }

    /// Start a write transaction that takes the database write lock up front
    pub(crate) fn begin_write(&self) -> Result<Transaction<'_>> {
        Ok(Transaction::new_unchecked(
            &self.conn,
            TransactionBehavior::Immediate,
        )?)
    }
}

impl IdentityProvider for Database {
    fn authenticate(&self, token: &str) -> Result<Option<Actor>> {
        self.users().authenticate(token)
    }
}

impl TopicRepository for Database {
    fn find_topic(&self, id: Uuid) -> Result<Option<Topic>> {
        self.topics().find_by_id(id)
    }

    fn list_topics_for_supervisor(&self, supervisor_id: Uuid) -> Result<Vec<Topic>> {
        self.topics().list_for_supervisor(supervisor_id)
    }

    fn find_capacity(&self, supervisor_id: Uuid) -> Result<Option<SupervisorCapacity>> {
        self.capacity().find(supervisor_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Role, Session, TopicContent, User};
    use tempfile::tempdir;

    #[test]
    fn test_file_database_reopens() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("thesis.db");

        let supervisor = User::new("prof@uni.edu", "Anna", "Maj", Role::Supervisor);
        let topic = Topic::new(supervisor.id, TopicContent::new("Persistence"));
        {
            let db = Database::open(&path).unwrap();
            db.users().create(&supervisor).unwrap();
            db.topics().insert(&topic).unwrap();
        }

        let db = Database::connect(&path).unwrap();
        assert_eq!(db.schema_version(), 2);
        assert_eq!(db.find_topic(topic.id).unwrap().unwrap().content.title, "Persistence");
        assert_eq!(db.list_topics_for_supervisor(supervisor.id).unwrap().len(), 1);
    }

    #[test]
    fn test_identity_provider() {
        let db = Database::open_in_memory().unwrap();
        let student = User::new("s@uni.edu", "Ola", "Wrona", Role::Student);
        db.users().create(&student).unwrap();
        let session = Session::new(student.id, 8);
        db.users().create_session(&session).unwrap();

        let actor = db.authenticate(&session.token()).unwrap().unwrap();
        assert_eq!(actor.role, Role::Student);
        assert_eq!(actor.id, student.id);
    }
}
