//! Supervisor capacity tracker
//!
//! A bounded counter per supervisor. The bound is enforced by the conditional
//! UPDATE itself and again by the table's CHECK constraint.

use rusqlite::{params, Connection};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::parse::{constraint_violation, parse_uuid, OptionalExt};
use crate::error::{Error, Result};
use crate::models::SupervisorCapacity;

pub struct CapacityTracker<'a> {
    conn: &'a Connection,
}

impl<'a> CapacityTracker<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Create the capacity record if the supervisor has none yet
    #[instrument(skip(self))]
    pub fn ensure(&self, supervisor_id: Uuid, total_slots: u32) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO supervisor_capacity (supervisor_id, total_slots, committed_count)
             VALUES (?1, ?2, 0)",
            params![supervisor_id.to_string(), total_slots],
        )?;
        Ok(())
    }

    /// Get a supervisor's capacity record
    #[instrument(skip(self))]
    pub fn find(&self, supervisor_id: Uuid) -> Result<Option<SupervisorCapacity>> {
        let capacity = self
            .conn
            .query_row(
                "SELECT supervisor_id, total_slots, committed_count FROM supervisor_capacity
                 WHERE supervisor_id = ?1",
                params![supervisor_id.to_string()],
                |row| {
                    Ok(SupervisorCapacity {
                        supervisor_id: parse_uuid(&row.get::<_, String>(0)?)?,
                        total_slots: row.get(1)?,
                        committed_count: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(capacity)
    }

    /// List every capacity record
    pub fn list_all(&self) -> Result<Vec<SupervisorCapacity>> {
        let mut stmt = self.conn.prepare(
            "SELECT supervisor_id, total_slots, committed_count FROM supervisor_capacity",
        )?;
        let records = stmt
            .query_map([], |row| {
                Ok(SupervisorCapacity {
                    supervisor_id: parse_uuid(&row.get::<_, String>(0)?)?,
                    total_slots: row.get(1)?,
                    committed_count: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Take one slot. Supervisors without a record have no slots.
    #[instrument(skip(self))]
    pub fn reserve_committed_slot(&self, supervisor_id: Uuid) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE supervisor_capacity SET committed_count = committed_count + 1
             WHERE supervisor_id = ?1 AND committed_count < total_slots",
            params![supervisor_id.to_string()],
        )?;

        if changed == 0 {
            debug!(supervisor_id = %supervisor_id, "No free slot");
            return Err(Error::CapacityExceeded(supervisor_id));
        }
        Ok(())
    }

    /// Give one slot back
    #[instrument(skip(self))]
    pub fn release_committed_slot(&self, supervisor_id: Uuid) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE supervisor_capacity SET committed_count = committed_count - 1
             WHERE supervisor_id = ?1 AND committed_count > 0",
            params![supervisor_id.to_string()],
        )?;

        if changed == 0 {
            return match self.find(supervisor_id)? {
                None => Err(Error::NotFound(format!("capacity of supervisor {supervisor_id}"))),
                Some(_) => Err(Error::InvalidOperation(format!(
                    "supervisor {supervisor_id} has no committed slot to release"
                ))),
            };
        }
        Ok(())
    }

    /// Check that an already-held slot is still within the bound
    pub fn ensure_within_capacity(&self, supervisor_id: Uuid) -> Result<()> {
        match self.find(supervisor_id)? {
            Some(capacity) if capacity.committed_count <= capacity.total_slots => Ok(()),
            _ => Err(Error::CapacityExceeded(supervisor_id)),
        }
    }

    /// Set the number of slots, creating the record if needed.
    ///
    /// Refuses to go below the number of slots already committed.
    #[instrument(skip(self))]
    pub fn set_total_slots(&self, supervisor_id: Uuid, total_slots: u32) -> Result<SupervisorCapacity> {
        self.conn
            .execute(
                "INSERT INTO supervisor_capacity (supervisor_id, total_slots, committed_count)
                 VALUES (?1, ?2, 0)
                 ON CONFLICT(supervisor_id) DO UPDATE SET total_slots = excluded.total_slots",
                params![supervisor_id.to_string(), total_slots],
            )
            .map_err(|e| match constraint_violation(&e) {
                Some(msg) if msg.contains("CHECK") => Error::CapacityExceeded(supervisor_id),
                _ => Error::Database(e),
            })?;

        self.find(supervisor_id)?
            .ok_or_else(|| Error::NotFound(format!("capacity of supervisor {supervisor_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Role, User};
    use crate::storage::Database;

    fn setup(slots: u32) -> (Database, Uuid) {
        let db = Database::open_in_memory().unwrap();
        let supervisor = User::new("prof@uni.edu", "Anna", "Maj", Role::Supervisor);
        db.users().create(&supervisor).unwrap();
        db.capacity().ensure(supervisor.id, slots).unwrap();
        (db, supervisor.id)
    }

    #[test]
    fn test_reserve_until_full() {
        let (db, supervisor) = setup(2);
        db.capacity().reserve_committed_slot(supervisor).unwrap();
        db.capacity().reserve_committed_slot(supervisor).unwrap();

        let result = db.capacity().reserve_committed_slot(supervisor);
        assert!(matches!(result, Err(Error::CapacityExceeded(_))));

        let capacity = db.capacity().find(supervisor).unwrap().unwrap();
        assert_eq!(capacity.committed_count, 2);
        assert_eq!(capacity.available_slots(), 0);
    }

    #[test]
    fn test_release_slot() {
        let (db, supervisor) = setup(1);
        assert!(matches!(
            db.capacity().release_committed_slot(supervisor),
            Err(Error::InvalidOperation(_))
        ));

        db.capacity().reserve_committed_slot(supervisor).unwrap();
        db.capacity().release_committed_slot(supervisor).unwrap();
        assert_eq!(db.capacity().find(supervisor).unwrap().unwrap().committed_count, 0);

        assert!(matches!(
            db.capacity().release_committed_slot(Uuid::new_v4()),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_missing_record_has_no_slots() {
        let (db, _) = setup(1);
        let result = db.capacity().reserve_committed_slot(Uuid::new_v4());
        assert!(matches!(result, Err(Error::CapacityExceeded(_))));
    }

    #[test]
    fn test_cannot_shrink_below_committed() {
        let (db, supervisor) = setup(3);
        db.capacity().reserve_committed_slot(supervisor).unwrap();
        db.capacity().reserve_committed_slot(supervisor).unwrap();

        let result = db.capacity().set_total_slots(supervisor, 1);
        assert!(matches!(result, Err(Error::CapacityExceeded(_))));

        let capacity = db.capacity().set_total_slots(supervisor, 2).unwrap();
        assert_eq!(capacity.total_slots, 2);
        assert_eq!(capacity.committed_count, 2);
        db.capacity().ensure_within_capacity(supervisor).unwrap();
    }
}
