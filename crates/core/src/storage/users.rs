//! User and session storage operations

use chrono::Utc;
use rusqlite::{params, Connection, Row};
use tracing::instrument;
use uuid::Uuid;

use super::parse::{constraint_violation, parse_datetime, parse_role, parse_uuid, OptionalExt};
use crate::error::{Error, Result};
use crate::models::{Actor, Role, Session, StudentSummary, User};

pub struct UserStore<'a> {
    conn: &'a Connection,
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        email: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        role: parse_role(&row.get::<_, String>(4)?)?,
        created_at: parse_datetime(&row.get::<_, String>(5)?)?,
    })
}

impl<'a> UserStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Create a new user
    #[instrument(skip(self, user), fields(user_id = %user.id, role = %user.role))]
    pub fn create(&self, user: &User) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO users (id, email, first_name, last_name, role, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    user.id.to_string(),
                    user.email,
                    user.first_name,
                    user.last_name,
                    user.role.as_str(),
                    user.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| match constraint_violation(&e) {
                Some(msg) if msg.contains("users.email") => {
                    Error::InvalidOperation(format!("email {} is already registered", user.email))
                }
                _ => Error::Database(e),
            })?;
        Ok(())
    }

    /// Find user by ID
    #[instrument(skip(self))]
    pub fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, email, first_name, last_name, role, created_at FROM users WHERE id = ?1",
        )?;

        let user = stmt
            .query_row(params![id.to_string()], user_from_row)
            .optional()?;

        Ok(user)
    }

    /// Find a student and return the fields shown as `reservedBy`
    #[instrument(skip(self))]
    pub fn find_student(&self, id: Uuid) -> Result<Option<StudentSummary>> {
        Ok(self
            .find_by_id(id)?
            .filter(|user| user.role == Role::Student)
            .map(|user| StudentSummary {
                id: user.id,
                name: user.first_name,
                surname: user.last_name,
                email: user.email,
            }))
    }

    /// Create a session
    #[instrument(skip(self, session), fields(user_id = %session.user_id))]
    pub fn create_session(&self, session: &Session) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sessions (id, user_id, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                session.id.to_string(),
                session.user_id.to_string(),
                session.created_at.to_rfc3339(),
                session.expires_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Find valid session
    #[instrument(skip(self))]
    pub fn find_valid_session(&self, session_id: Uuid) -> Result<Option<Session>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, created_at, expires_at FROM sessions WHERE id = ?1 AND expires_at > ?2",
        )?;

        let now = Utc::now().to_rfc3339();
        let session = stmt
            .query_row(params![session_id.to_string(), now], |row| {
                Ok(Session {
                    id: parse_uuid(&row.get::<_, String>(0)?)?,
                    user_id: parse_uuid(&row.get::<_, String>(1)?)?,
                    created_at: parse_datetime(&row.get::<_, String>(2)?)?,
                    expires_at: parse_datetime(&row.get::<_, String>(3)?)?,
                })
            })
            .optional()?;

        Ok(session)
    }

    /// Resolve a bearer token to the acting identity
    #[instrument(skip(self, token))]
    pub fn authenticate(&self, token: &str) -> Result<Option<Actor>> {
        let Ok(session_id) = Uuid::parse_str(token.trim()) else {
            return Ok(None);
        };

        let Some(session) = self.find_valid_session(session_id)? else {
            return Ok(None);
        };

        Ok(self.find_by_id(session.user_id)?.map(|user| user.actor()))
    }

    /// Delete session
    pub fn delete_session(&self, session_id: Uuid) -> Result<()> {
        self.conn.execute(
            "DELETE FROM sessions WHERE id = ?1",
            params![session_id.to_string()],
        )?;
        Ok(())
    }

    /// Clean up expired sessions
    pub fn cleanup_expired_sessions(&self) -> Result<u64> {
        let count = self.conn.execute(
            "DELETE FROM sessions WHERE expires_at < ?1",
            params![Utc::now().to_rfc3339()],
        )?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;

    #[test]
    fn test_authenticate_session() {
        let db = Database::open_in_memory().unwrap();
        let user = User::new("jan@uni.edu", "Jan", "Kowalski", Role::Student);
        db.users().create(&user).unwrap();

        let session = Session::new(user.id, 1);
        db.users().create_session(&session).unwrap();

        let actor = db.users().authenticate(&session.token()).unwrap();
        assert_eq!(actor, Some(Actor::student(user.id)));

        assert_eq!(db.users().authenticate("garbage").unwrap(), None);
        assert_eq!(
            db.users().authenticate(&Uuid::new_v4().to_string()).unwrap(),
            None
        );

        db.users().delete_session(session.id).unwrap();
        assert_eq!(db.users().authenticate(&session.token()).unwrap(), None);
    }

    #[test]
    fn test_expired_session_rejected() {
        let db = Database::open_in_memory().unwrap();
        let user = User::new("dean@uni.edu", "Ewa", "Lis", Role::Dean);
        db.users().create(&user).unwrap();

        let session = Session::new(user.id, -1);
        db.users().create_session(&session).unwrap();

        assert_eq!(db.users().authenticate(&session.token()).unwrap(), None);
        assert_eq!(db.users().cleanup_expired_sessions().unwrap(), 1);
    }

    #[test]
    fn test_duplicate_email_rejected() {
        let db = Database::open_in_memory().unwrap();
        db.users()
            .create(&User::new("a@uni.edu", "A", "B", Role::Student))
            .unwrap();
        let result = db
            .users()
            .create(&User::new("a@uni.edu", "C", "D", Role::Student));
        assert!(matches!(result, Err(Error::InvalidOperation(_))));
    }

    #[test]
    fn test_find_student_ignores_other_roles() {
        let db = Database::open_in_memory().unwrap();
        let supervisor = User::new("prof@uni.edu", "Anna", "Maj", Role::Supervisor);
        db.users().create(&supervisor).unwrap();
        assert!(db.users().find_student(supervisor.id).unwrap().is_none());
    }
}
