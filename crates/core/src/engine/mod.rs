//! Reservation and assignment engine
//!
//! Orchestrates every topic mutation: status graph, policy, the one-claim
//! rule, slot accounting and the versioned write. All checks that depend on
//! other rows run inside a single `BEGIN IMMEDIATE` transaction together with
//! the compare-and-set, so a failed request leaves nothing behind.
//!
//! Losing a version race surfaces as [`Error::Conflict`]; the engine never
//! retries on its own.

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::invariants::{assert_capacity_invariants, assert_topic_invariants};
use crate::models::{
    Actor, Role, SupervisorCapacity, Topic, TopicContent, TopicDetails, TopicStatus, Transition,
};
use crate::permissions::TopicPolicy;
use crate::storage::{CapacityTracker, Database, TopicStore};

/// A request to move a topic to another status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRequest {
    pub topic_id: Uuid,
    pub to: TopicStatus,
    pub actor: Actor,
    /// Student to attach; required for the supervisor assign shortcut
    pub student_id: Option<Uuid>,
}

impl TransitionRequest {
    pub fn new(topic_id: Uuid, to: TopicStatus, actor: Actor) -> Self {
        Self {
            topic_id,
            to,
            actor,
            student_id: None,
        }
    }

    pub fn with_student(mut self, student_id: Uuid) -> Self {
        self.student_id = Some(student_id);
        self
    }
}

/// Workflow engine bound to one database connection
pub struct WorkflowEngine<'a> {
    db: &'a Database,
}

impl<'a> WorkflowEngine<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    fn load(&self, topic_id: Uuid) -> Result<Topic> {
        self.db
            .topics()
            .find_by_id(topic_id)?
            .ok_or_else(|| Error::NotFound(format!("topic {topic_id}")))
    }

    /// Move a topic along the status graph.
    ///
    /// Requesting the status the topic already has returns it unchanged,
    /// provided the actor is one of its participants.
    #[instrument(skip(self, request), fields(topic_id = %request.topic_id, to = %request.to, actor = %request.actor.id))]
    pub fn request_transition(&self, request: &TransitionRequest) -> Result<Topic> {
        let result = self.transition(request);
        match &result {
            Ok(topic) => debug!(version = topic.version, "Transition request handled"),
            Err(Error::Database(e)) => warn!(error = %e, "Transition failed"),
            Err(e) => debug!(error = %e, "Transition refused"),
        }
        result
    }

    /// Supervisor shortcut: attach a student to an available topic and
    /// accept them in one step.
    ///
    /// Only the owning supervisor may call it, and only while the topic is
    /// Available; it never confirms or repeats an existing claim.
    #[instrument(skip(self), fields(actor = %actor.id))]
    pub fn assign_student(&self, topic_id: Uuid, actor: &Actor, student_id: Uuid) -> Result<Topic> {
        let topic = self.load(topic_id)?;
        TopicPolicy::can_assign(actor, &topic).into_result()?;
        if topic.status != TopicStatus::Available {
            return Err(Error::InvalidTransition {
                from: topic.status,
                to: TopicStatus::StudentAccepted,
            });
        }

        self.request_transition(
            &TransitionRequest::new(topic_id, TopicStatus::StudentAccepted, *actor)
                .with_student(student_id),
        )
    }

    fn transition(&self, request: &TransitionRequest) -> Result<Topic> {
        let topic = self.load(request.topic_id)?;
        let actor = &request.actor;
        let from = topic.status;
        let to = request.to;

        // A named student must be the holder on any request that keeps the claim
        let names_other_student = request
            .student_id
            .is_some_and(|id| topic.reserved_student_id != Some(id));

        if from == to {
            TopicPolicy::can_hold(actor, &topic).into_result()?;
            if names_other_student {
                return Err(Error::Forbidden("named student does not hold this topic".into()));
            }
            return Ok(topic);
        }

        let transition = Transition::between(from, to, request.student_id.is_some())
            .ok_or(Error::InvalidTransition { from, to })?;
        TopicPolicy::can_transition(actor, &topic, from, to).into_result()?;

        let claimant = match transition {
            Transition::Reserve => {
                if request.student_id.is_some_and(|id| id != actor.id) {
                    return Err(Error::Forbidden(
                        "students can only reserve topics for themselves".into(),
                    ));
                }
                Some(actor.id)
            }
            Transition::Assign => {
                let student_id = request.student_id.ok_or(Error::InvalidTransition { from, to })?;
                if self.db.users().find_student(student_id)?.is_none() {
                    return Err(Error::NotFound(format!("student {student_id}")));
                }
                Some(student_id)
            }
            Transition::Confirm | Transition::Finalize => {
                if names_other_student {
                    return Err(Error::Forbidden("named student does not hold this topic".into()));
                }
                topic.reserved_student_id
            }
            Transition::Publish | Transition::Release | Transition::Hide => None,
        };

        let tx = self.db.begin_write()?;
        let topics = TopicStore::new(&tx);
        let capacity = CapacityTracker::new(&tx);

        if let (Transition::Reserve | Transition::Assign, Some(student_id)) = (transition, claimant) {
            if let Some(held) = topics.find_active_claim(student_id)? {
                if held != topic.id {
                    return Err(Error::StudentAlreadyReserved(student_id));
                }
            }
        }

        match (from.is_committed(), to.is_committed()) {
            (false, true) => capacity.reserve_committed_slot(topic.supervisor_id)?,
            (true, true) => capacity.ensure_within_capacity(topic.supervisor_id)?,
            (true, false) => capacity.release_committed_slot(topic.supervisor_id)?,
            (false, false) => {}
        }

        if !topics.compare_and_set_status(topic.id, topic.version, to, claimant)? {
            return Err(Error::Conflict(topic.id));
        }

        let updated = topics
            .find_by_id(topic.id)?
            .ok_or_else(|| Error::NotFound(format!("topic {}", topic.id)))?;
        let slots = capacity.find(topic.supervisor_id)?;
        tx.commit()?;

        assert_topic_invariants(&updated);
        if let Some(slots) = &slots {
            assert_capacity_invariants(slots);
        }

        info!(
            topic_id = %updated.id,
            from = %from,
            to = %to,
            actor = %actor.id,
            role = %actor.role,
            version = updated.version,
            "Topic status changed"
        );
        Ok(updated)
    }

    /// Create a new hidden topic owned by the acting supervisor
    #[instrument(skip(self, content), fields(actor = %actor.id, title = %content.title))]
    pub fn create_topic(
        &self,
        actor: &Actor,
        content: TopicContent,
        field_of_study_id: Option<i64>,
    ) -> Result<Topic> {
        TopicPolicy::can_create(actor).into_result()?;
        if content.title.trim().is_empty() {
            return Err(Error::InvalidOperation("topic title must not be empty".into()));
        }

        let mut topic = Topic::new(actor.id, content);
        topic.field_of_study_id = field_of_study_id;
        self.db.topics().insert(&topic)?;

        info!(topic_id = %topic.id, "Topic created");
        Ok(topic)
    }

    /// Replace the content of a topic the caller last saw at `expected_version`
    #[instrument(skip(self, content), fields(actor = %actor.id))]
    pub fn edit_content(
        &self,
        topic_id: Uuid,
        actor: &Actor,
        expected_version: u64,
        content: TopicContent,
    ) -> Result<Topic> {
        let topic = self.load(topic_id)?;
        TopicPolicy::can_edit_content(actor, &topic).into_result()?;
        if content.title.trim().is_empty() {
            return Err(Error::InvalidOperation("topic title must not be empty".into()));
        }
        if topic.version != expected_version {
            return Err(Error::Conflict(topic_id));
        }

        let tx = self.db.begin_write()?;
        let topics = TopicStore::new(&tx);
        if !topics.compare_and_set_content(topic_id, expected_version, &content)? {
            return Err(Error::Conflict(topic_id));
        }
        let updated = topics
            .find_by_id(topic_id)?
            .ok_or_else(|| Error::NotFound(format!("topic {topic_id}")))?;
        tx.commit()?;

        info!(topic_id = %topic_id, version = updated.version, "Topic content updated");
        Ok(updated)
    }

    /// Set or clear the field of study of a hidden topic
    #[instrument(skip(self), fields(actor = %actor.id))]
    pub fn set_field_of_study(
        &self,
        topic_id: Uuid,
        actor: &Actor,
        expected_version: u64,
        field_of_study_id: Option<i64>,
    ) -> Result<Topic> {
        let topic = self.load(topic_id)?;
        TopicPolicy::can_set_field_of_study(actor, &topic).into_result()?;
        if topic.version != expected_version {
            return Err(Error::Conflict(topic_id));
        }

        let tx = self.db.begin_write()?;
        let topics = TopicStore::new(&tx);
        if !topics.compare_and_set_field_of_study(topic_id, expected_version, field_of_study_id)? {
            return Err(Error::Conflict(topic_id));
        }
        let updated = topics
            .find_by_id(topic_id)?
            .ok_or_else(|| Error::NotFound(format!("topic {topic_id}")))?;
        tx.commit()?;

        info!(topic_id = %topic_id, field_of_study_id, "Field of study set");
        Ok(updated)
    }

    /// Delete a hidden topic
    #[instrument(skip(self), fields(actor = %actor.id))]
    pub fn delete_topic(&self, topic_id: Uuid, actor: &Actor, expected_version: u64) -> Result<()> {
        let topic = self.load(topic_id)?;
        TopicPolicy::can_delete(actor, &topic).into_result()?;
        if topic.version != expected_version {
            return Err(Error::Conflict(topic_id));
        }

        if !self.db.topics().delete_hidden(topic_id, expected_version)? {
            return Err(Error::Conflict(topic_id));
        }

        info!(topic_id = %topic_id, "Topic deleted");
        Ok(())
    }

    /// Full snapshot of a topic including the reserving student
    #[instrument(skip(self), fields(actor = %actor.id))]
    pub fn topic_details(&self, topic_id: Uuid, actor: &Actor) -> Result<TopicDetails> {
        let topic = self.load(topic_id)?;
        TopicPolicy::can_view(actor, &topic).into_result()?;
        self.describe(topic)
    }

    /// Attach the supervisor name and reserving student to a snapshot
    /// without reading the topic row again
    pub fn describe(&self, topic: Topic) -> Result<TopicDetails> {
        let supervisor_name = self
            .db
            .users()
            .find_by_id(topic.supervisor_id)?
            .map(|user| user.display_name())
            .unwrap_or_default();

        let reserved_by = match topic.reserved_student_id {
            Some(student_id) => self.db.users().find_student(student_id)?,
            None => None,
        };

        Ok(TopicDetails {
            topic,
            supervisor_name,
            reserved_by,
        })
    }

    /// Topics owned by the acting supervisor, newest first
    pub fn list_own_topics(&self, actor: &Actor) -> Result<Vec<Topic>> {
        TopicPolicy::can_create(actor).into_result()?;
        self.db.topics().list_for_supervisor(actor.id)
    }

    /// Slot record of a supervisor
    pub fn supervisor_capacity(&self, supervisor_id: Uuid) -> Result<SupervisorCapacity> {
        self.db
            .capacity()
            .find(supervisor_id)?
            .ok_or_else(|| Error::NotFound(format!("capacity of supervisor {supervisor_id}")))
    }

    /// Change how many theses a supervisor may take on
    #[instrument(skip(self), fields(actor = %actor.id))]
    pub fn set_supervisor_slots(
        &self,
        actor: &Actor,
        supervisor_id: Uuid,
        total_slots: u32,
    ) -> Result<SupervisorCapacity> {
        TopicPolicy::can_manage_capacity(actor).into_result()?;

        let is_supervisor = self
            .db
            .users()
            .find_by_id(supervisor_id)?
            .is_some_and(|user| user.role == Role::Supervisor);
        if !is_supervisor {
            return Err(Error::NotFound(format!("supervisor {supervisor_id}")));
        }

        let tx = self.db.begin_write()?;
        let capacity = CapacityTracker::new(&tx).set_total_slots(supervisor_id, total_slots)?;
        tx.commit()?;

        assert_capacity_invariants(&capacity);
        info!(supervisor_id = %supervisor_id, total_slots, "Supervisor slots updated");
        Ok(capacity)
    }
}
