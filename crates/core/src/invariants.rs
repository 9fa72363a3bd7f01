//! Developer guardrails and invariants
//!
//! Debug assertions for detecting impossible states during development.
//! These checks are compiled out in release builds. [`audit`] runs the same
//! rules against stored data and reports instead of panicking.

use std::collections::HashMap;
use std::fmt;

use uuid::Uuid;

use crate::error::Result;
use crate::models::{SupervisorCapacity, Topic, TopicStatus};
use crate::storage::Database;

/// Validate that a topic's status and reservation agree
pub fn assert_topic_invariants(topic: &Topic) {
    // Only the reserving statuses carry a student
    debug_assert!(
        topic.status.holds_claim() == topic.reserved_student_id.is_some(),
        "Topic {} in status {} has reserved student {:?}",
        topic.id,
        topic.status,
        topic.reserved_student_id
    );

    // Nothing leaves Hidden without a field of study
    debug_assert!(
        !topic.status.requires_field_of_study() || topic.field_of_study_id.is_some(),
        "Topic {} is {} without a field of study",
        topic.id,
        topic.status
    );

    debug_assert!(topic.version >= 1, "Topic {} has version 0", topic.id);
}

/// Validate that a slot counter is within its bound
pub fn assert_capacity_invariants(capacity: &SupervisorCapacity) {
    debug_assert!(
        capacity.committed_count <= capacity.total_slots,
        "Supervisor {} has {} committed of {} slots",
        capacity.supervisor_id,
        capacity.committed_count,
        capacity.total_slots
    );
}

/// A broken rule found in stored data
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// One student holds more than one reserving topic
    DuplicateClaim { student_id: Uuid, topics: Vec<Uuid> },
    /// Reservation present in a free status or missing in a held one
    ReservationMismatch { topic_id: Uuid, status: TopicStatus },
    /// Published topic without a field of study
    MissingFieldOfStudy { topic_id: Uuid, status: TopicStatus },
    /// Counter disagrees with the number of committed topics
    CommittedCountDrift {
        supervisor_id: Uuid,
        recorded: u32,
        actual: u32,
    },
    /// More commitments than slots
    OverCapacity {
        supervisor_id: Uuid,
        committed: u32,
        total: u32,
    },
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateClaim { student_id, topics } => {
                write!(f, "student {student_id} holds {} topics", topics.len())
            }
            Self::ReservationMismatch { topic_id, status } => {
                write!(f, "topic {topic_id} reservation does not match status {status}")
            }
            Self::MissingFieldOfStudy { topic_id, status } => {
                write!(f, "topic {topic_id} is {status} without a field of study")
            }
            Self::CommittedCountDrift {
                supervisor_id,
                recorded,
                actual,
            } => write!(
                f,
                "supervisor {supervisor_id} records {recorded} committed topics but has {actual}"
            ),
            Self::OverCapacity {
                supervisor_id,
                committed,
                total,
            } => write!(
                f,
                "supervisor {supervisor_id} has {committed} committed topics for {total} slots"
            ),
        }
    }
}

/// Check every stored topic and slot counter
pub fn audit(db: &Database) -> Result<Vec<InvariantViolation>> {
    let topics = db.topics().list_all()?;
    let mut violations = Vec::new();
    let mut claims: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    let mut committed: HashMap<Uuid, u32> = HashMap::new();

    for topic in &topics {
        if topic.status.holds_claim() != topic.reserved_student_id.is_some() {
            violations.push(InvariantViolation::ReservationMismatch {
                topic_id: topic.id,
                status: topic.status,
            });
        }
        if topic.status.requires_field_of_study() && topic.field_of_study_id.is_none() {
            violations.push(InvariantViolation::MissingFieldOfStudy {
                topic_id: topic.id,
                status: topic.status,
            });
        }
        if let Some(student_id) = topic.reserved_student_id {
            claims.entry(student_id).or_default().push(topic.id);
        }
        if topic.status.is_committed() {
            *committed.entry(topic.supervisor_id).or_default() += 1;
        }
    }

    for (student_id, topics) in claims {
        if topics.len() > 1 {
            violations.push(InvariantViolation::DuplicateClaim { student_id, topics });
        }
    }

    for capacity in db.capacity().list_all()? {
        let actual = committed.remove(&capacity.supervisor_id).unwrap_or(0);
        if actual != capacity.committed_count {
            violations.push(InvariantViolation::CommittedCountDrift {
                supervisor_id: capacity.supervisor_id,
                recorded: capacity.committed_count,
                actual,
            });
        }
        if capacity.committed_count > capacity.total_slots {
            violations.push(InvariantViolation::OverCapacity {
                supervisor_id: capacity.supervisor_id,
                committed: capacity.committed_count,
                total: capacity.total_slots,
            });
        }
    }

    // Committed topics of supervisors that have no counter at all
    for (supervisor_id, actual) in committed {
        violations.push(InvariantViolation::CommittedCountDrift {
            supervisor_id,
            recorded: 0,
            actual,
        });
    }

    Ok(violations)
}
