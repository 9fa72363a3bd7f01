//! Topic storage operations
//!
//! Every write is a compare-and-set on `version`: the row only changes if
//! it still carries the version the caller read, and each write bumps it.

use chrono::Utc;
use rusqlite::{params, Connection, Row};
use tracing::instrument;
use uuid::Uuid;

use super::parse::{
    constraint_violation, parse_datetime, parse_status, parse_tags, parse_uuid, parse_uuid_opt,
    OptionalExt,
};
use crate::error::{Error, Result};
use crate::models::{Topic, TopicContent, TopicStatus};

const TOPIC_COLUMNS: &str = "id, supervisor_id, title, description, prerequisites, tags_json,
     field_of_study_id, status, reserved_student_id, version, created_at, updated_at";

fn topic_from_row(row: &Row<'_>) -> rusqlite::Result<Topic> {
    Ok(Topic {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        supervisor_id: parse_uuid(&row.get::<_, String>(1)?)?,
        content: TopicContent {
            title: row.get(2)?,
            description: row.get(3)?,
            prerequisites: row.get(4)?,
            tags: parse_tags(&row.get::<_, String>(5)?)?,
        },
        field_of_study_id: row.get(6)?,
        status: parse_status(&row.get::<_, String>(7)?)?,
        reserved_student_id: parse_uuid_opt(row.get::<_, Option<String>>(8)?)?,
        version: row.get(9)?,
        created_at: parse_datetime(&row.get::<_, String>(10)?)?,
        updated_at: parse_datetime(&row.get::<_, String>(11)?)?,
    })
}

/// Translate constraint failures on topic writes into domain errors
fn map_write_error(err: rusqlite::Error, title: Option<&str>, student: Option<Uuid>) -> Error {
    match (constraint_violation(&err), student) {
        (Some(msg), Some(student)) if msg.contains("reserved_student_id") => {
            Error::StudentAlreadyReserved(student)
        }
        (Some(msg), _) if msg.contains("topics.title") => Error::InvalidOperation(format!(
            "a topic titled {:?} already exists",
            title.unwrap_or_default()
        )),
        _ => Error::Database(err),
    }
}

pub struct TopicStore<'a> {
    conn: &'a Connection,
}

impl<'a> TopicStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert a new topic
    #[instrument(skip(self, topic), fields(topic_id = %topic.id, supervisor_id = %topic.supervisor_id))]
    pub fn insert(&self, topic: &Topic) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO topics (id, supervisor_id, title, description, prerequisites, tags_json,
                     field_of_study_id, status, reserved_student_id, version, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    topic.id.to_string(),
                    topic.supervisor_id.to_string(),
                    topic.content.title,
                    topic.content.description,
                    topic.content.prerequisites,
                    serde_json::to_string(&topic.content.tags)?,
                    topic.field_of_study_id,
                    topic.status.as_str(),
                    topic.reserved_student_id.map(|s| s.to_string()),
                    topic.version,
                    topic.created_at.to_rfc3339(),
                    topic.updated_at.to_rfc3339(),
                ],
            )
            .map_err(|e| map_write_error(e, Some(&topic.content.title), topic.reserved_student_id))?;
        Ok(())
    }

    /// Find topic by ID
    #[instrument(skip(self))]
    pub fn find_by_id(&self, id: Uuid) -> Result<Option<Topic>> {
        let sql = format!("SELECT {TOPIC_COLUMNS} FROM topics WHERE id = ?1");
        let topic = self
            .conn
            .query_row(&sql, params![id.to_string()], topic_from_row)
            .optional()?;
        Ok(topic)
    }

    /// List topics owned by a supervisor, newest first
    #[instrument(skip(self))]
    pub fn list_for_supervisor(&self, supervisor_id: Uuid) -> Result<Vec<Topic>> {
        let sql = format!(
            "SELECT {TOPIC_COLUMNS} FROM topics WHERE supervisor_id = ?1 ORDER BY created_at DESC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let topics = stmt
            .query_map(params![supervisor_id.to_string()], topic_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(topics)
    }

    /// List every topic
    pub fn list_all(&self) -> Result<Vec<Topic>> {
        let sql = format!("SELECT {TOPIC_COLUMNS} FROM topics ORDER BY created_at");
        let mut stmt = self.conn.prepare(&sql)?;
        let topics = stmt
            .query_map([], topic_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(topics)
    }

    /// Topic currently claimed by a student, if any
    #[instrument(skip(self))]
    pub fn find_active_claim(&self, student_id: Uuid) -> Result<Option<Uuid>> {
        let claim = self
            .conn
            .query_row(
                "SELECT id FROM topics WHERE reserved_student_id = ?1",
                params![student_id.to_string()],
                |row| parse_uuid(&row.get::<_, String>(0)?),
            )
            .optional()?;
        Ok(claim)
    }

    /// Count a supervisor's topics in committed statuses
    pub fn count_committed(&self, supervisor_id: Uuid) -> Result<u32> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM topics WHERE supervisor_id = ?1 AND status IN (?2, ?3)",
            params![
                supervisor_id.to_string(),
                TopicStatus::StudentAccepted.as_str(),
                TopicStatus::Approved.as_str(),
            ],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Write a new status and claim holder if the version still matches.
    ///
    /// Returns `false` when the row moved on since `expected_version`.
    #[instrument(skip(self), fields(status = %status))]
    pub fn compare_and_set_status(
        &self,
        id: Uuid,
        expected_version: u64,
        status: TopicStatus,
        reserved_student_id: Option<Uuid>,
    ) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE topics SET status = ?1, reserved_student_id = ?2, version = version + 1, updated_at = ?3
                 WHERE id = ?4 AND version = ?5",
                params![
                    status.as_str(),
                    reserved_student_id.map(|s| s.to_string()),
                    Utc::now().to_rfc3339(),
                    id.to_string(),
                    expected_version,
                ],
            )
            .map_err(|e| map_write_error(e, None, reserved_student_id))?;
        Ok(changed == 1)
    }

    /// Replace the content fields while the topic is still editable
    #[instrument(skip(self, content))]
    pub fn compare_and_set_content(
        &self,
        id: Uuid,
        expected_version: u64,
        content: &TopicContent,
    ) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE topics SET title = ?1, description = ?2, prerequisites = ?3, tags_json = ?4,
                     version = version + 1, updated_at = ?5
                 WHERE id = ?6 AND version = ?7 AND status IN (?8, ?9, ?10)",
                params![
                    content.title,
                    content.description,
                    content.prerequisites,
                    serde_json::to_string(&content.tags)?,
                    Utc::now().to_rfc3339(),
                    id.to_string(),
                    expected_version,
                    TopicStatus::Hidden.as_str(),
                    TopicStatus::Available.as_str(),
                    TopicStatus::Reserved.as_str(),
                ],
            )
            .map_err(|e| map_write_error(e, Some(&content.title), None))?;
        Ok(changed == 1)
    }

    /// Set or clear the field of study while the topic is hidden
    #[instrument(skip(self))]
    pub fn compare_and_set_field_of_study(
        &self,
        id: Uuid,
        expected_version: u64,
        field_of_study_id: Option<i64>,
    ) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE topics SET field_of_study_id = ?1, version = version + 1, updated_at = ?2
             WHERE id = ?3 AND version = ?4 AND status = ?5",
            params![
                field_of_study_id,
                Utc::now().to_rfc3339(),
                id.to_string(),
                expected_version,
                TopicStatus::Hidden.as_str(),
            ],
        )?;
        Ok(changed == 1)
    }

    /// Delete a hidden topic
    #[instrument(skip(self))]
    pub fn delete_hidden(&self, id: Uuid, expected_version: u64) -> Result<bool> {
        let changed = self.conn.execute(
            "DELETE FROM topics WHERE id = ?1 AND version = ?2 AND status = ?3",
            params![id.to_string(), expected_version, TopicStatus::Hidden.as_str()],
        )?;
        Ok(changed == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Role, User};
    use crate::storage::Database;

    fn setup() -> (Database, User) {
        let db = Database::open_in_memory().unwrap();
        let supervisor = User::new("prof@uni.edu", "Anna", "Maj", Role::Supervisor);
        db.users().create(&supervisor).unwrap();
        (db, supervisor)
    }

    #[test]
    fn test_insert_and_find() {
        let (db, supervisor) = setup();
        let topic = Topic::new(
            supervisor.id,
            TopicContent::new("Type systems")
                .with_description("Gradual typing")
                .with_tags(["pl", "types"]),
        );
        db.topics().insert(&topic).unwrap();

        let found = db.topics().find_by_id(topic.id).unwrap().unwrap();
        assert_eq!(found.content, topic.content);
        assert_eq!(found.status, TopicStatus::Hidden);
        assert_eq!(found.version, 1);

        assert!(db.topics().find_by_id(Uuid::new_v4()).unwrap().is_none());
        assert_eq!(db.topics().list_for_supervisor(supervisor.id).unwrap().len(), 1);
    }

    #[test]
    fn test_duplicate_title_rejected() {
        let (db, supervisor) = setup();
        db.topics()
            .insert(&Topic::new(supervisor.id, TopicContent::new("Same")))
            .unwrap();
        let result = db
            .topics()
            .insert(&Topic::new(supervisor.id, TopicContent::new("Same")));
        assert!(matches!(result, Err(Error::InvalidOperation(_))));
    }

    #[test]
    fn test_compare_and_set_checks_version() {
        let (db, supervisor) = setup();
        let topic = Topic::new(supervisor.id, TopicContent::new("CAS")).with_field_of_study(3);
        db.topics().insert(&topic).unwrap();

        assert!(db
            .topics()
            .compare_and_set_status(topic.id, 1, TopicStatus::Available, None)
            .unwrap());
        // Stale version loses
        assert!(!db
            .topics()
            .compare_and_set_status(topic.id, 1, TopicStatus::Hidden, None)
            .unwrap());

        let found = db.topics().find_by_id(topic.id).unwrap().unwrap();
        assert_eq!(found.status, TopicStatus::Available);
        assert_eq!(found.version, 2);
    }

    #[test]
    fn test_second_claim_hits_unique_index() {
        let (db, supervisor) = setup();
        let student = User::new("s@uni.edu", "Ola", "Wrona", Role::Student);
        db.users().create(&student).unwrap();

        let first = Topic::new(supervisor.id, TopicContent::new("First")).with_field_of_study(1);
        let second = Topic::new(supervisor.id, TopicContent::new("Second")).with_field_of_study(1);
        db.topics().insert(&first).unwrap();
        db.topics().insert(&second).unwrap();

        assert!(db
            .topics()
            .compare_and_set_status(first.id, 1, TopicStatus::Reserved, Some(student.id))
            .unwrap());
        let result =
            db.topics()
                .compare_and_set_status(second.id, 1, TopicStatus::Reserved, Some(student.id));
        assert!(matches!(result, Err(Error::StudentAlreadyReserved(id)) if id == student.id));

        assert_eq!(db.topics().find_active_claim(student.id).unwrap(), Some(first.id));
    }

    #[test]
    fn test_content_frozen_in_store() {
        let (db, supervisor) = setup();
        let student = User::new("s@uni.edu", "Ola", "Wrona", Role::Student);
        db.users().create(&student).unwrap();
        let topic = Topic::new(supervisor.id, TopicContent::new("Frozen")).with_field_of_study(1);
        db.topics().insert(&topic).unwrap();
        db.topics()
            .compare_and_set_status(topic.id, 1, TopicStatus::StudentAccepted, Some(student.id))
            .unwrap();

        let edited = db
            .topics()
            .compare_and_set_content(topic.id, 2, &TopicContent::new("Changed"))
            .unwrap();
        assert!(!edited);
        assert_eq!(db.topics().count_committed(supervisor.id).unwrap(), 1);
    }

    #[test]
    fn test_delete_only_hidden() {
        let (db, supervisor) = setup();
        let topic = Topic::new(supervisor.id, TopicContent::new("Gone")).with_field_of_study(1);
        db.topics().insert(&topic).unwrap();
        db.topics()
            .compare_and_set_status(topic.id, 1, TopicStatus::Available, None)
            .unwrap();

        assert!(!db.topics().delete_hidden(topic.id, 2).unwrap());
        db.topics()
            .compare_and_set_status(topic.id, 2, TopicStatus::Hidden, None)
            .unwrap();
        assert!(db.topics().delete_hidden(topic.id, 3).unwrap());
        assert!(db.topics().find_by_id(topic.id).unwrap().is_none());
    }
}
