//! Authorization policy for topic operations
//!
//! Every check is a pure function of the actor and the topic snapshot.
//! Database-wide conditions (other reservations, slot counts) are enforced
//! by the engine inside its transaction.

use crate::error::{Error, Result};
use crate::models::{Actor, Role, Topic, TopicStatus, Transition};

/// Why a request was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    Forbidden(&'static str),
    MissingField,
}

/// Outcome of a policy check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        *self == Decision::Allow
    }

    pub fn into_result(self) -> Result<()> {
        match self {
            Decision::Allow => Ok(()),
            Decision::Deny(DenyReason::Forbidden(reason)) => Err(Error::Forbidden(reason.into())),
            Decision::Deny(DenyReason::MissingField) => Err(Error::MissingField),
        }
    }

    fn forbid(reason: &'static str) -> Self {
        Decision::Deny(DenyReason::Forbidden(reason))
    }

    fn allow_if(condition: bool, reason: &'static str) -> Self {
        if condition {
            Decision::Allow
        } else {
            Decision::forbid(reason)
        }
    }
}

/// Policy matrix for topic operations
pub struct TopicPolicy;

impl TopicPolicy {
    /// Check whether `actor` may move `topic` from `from` to `to`.
    ///
    /// Pairs outside the status graph are always denied.
    pub fn can_transition(actor: &Actor, topic: &Topic, from: TopicStatus, to: TopicStatus) -> Decision {
        let Some(transition) = Transition::between(from, to, true) else {
            return Decision::forbid("transition is not part of the topic lifecycle");
        };

        let owner = actor.role == Role::Supervisor && topic.is_owned_by(actor.id);
        let holder = actor.role == Role::Student && topic.is_reserved_by(actor.id);

        match transition {
            Transition::Publish => {
                if !owner {
                    Decision::forbid("only the owning supervisor can publish")
                } else if topic.field_of_study_id.is_none() {
                    Decision::Deny(DenyReason::MissingField)
                } else {
                    Decision::Allow
                }
            }
            Transition::Reserve => {
                Decision::allow_if(actor.role == Role::Student, "only students can reserve")
            }
            Transition::Assign => {
                Decision::allow_if(owner, "only the owning supervisor can assign a student")
            }
            Transition::Confirm => Decision::allow_if(
                holder,
                "only the reserving student can accept the reservation",
            ),
            Transition::Release => Decision::allow_if(
                holder || owner,
                "only the reserving student or the owning supervisor can cancel",
            ),
            Transition::Finalize => Decision::allow_if(
                holder,
                "only the reserving student can approve the topic",
            ),
            Transition::Hide => {
                Decision::allow_if(owner, "only the owning supervisor can hide")
            }
        }
    }

    /// Supervisor shortcut that attaches a student directly
    pub fn can_assign(actor: &Actor, topic: &Topic) -> Decision {
        Decision::allow_if(
            Self::is_owner(actor, topic),
            "only the owning supervisor can assign a student",
        )
    }

    /// A request for the status the topic already has is a no-op for its
    /// participants only
    pub fn can_hold(actor: &Actor, topic: &Topic) -> Decision {
        let participant = match actor.role {
            Role::Supervisor => topic.is_owned_by(actor.id),
            Role::Student => topic.is_reserved_by(actor.id),
            Role::Dean => false,
        };
        Decision::allow_if(participant, "not a participant of this topic")
    }

    /// Title, description, prerequisites and tags
    pub fn can_edit_content(actor: &Actor, topic: &Topic) -> Decision {
        if !Self::is_owner(actor, topic) {
            return Decision::forbid("only the owning supervisor can edit content");
        }
        Decision::allow_if(
            topic.status.content_editable(),
            "content is frozen once a student is accepted",
        )
    }

    pub fn can_set_field_of_study(actor: &Actor, topic: &Topic) -> Decision {
        if !Self::is_owner(actor, topic) {
            return Decision::forbid("only the owning supervisor can change the field of study");
        }
        Decision::allow_if(
            topic.status == TopicStatus::Hidden,
            "field of study is fixed once the topic is published",
        )
    }

    pub fn can_create(actor: &Actor) -> Decision {
        Decision::allow_if(actor.role == Role::Supervisor, "only supervisors can create topics")
    }

    pub fn can_delete(actor: &Actor, topic: &Topic) -> Decision {
        if !Self::is_owner(actor, topic) {
            return Decision::forbid("only the owning supervisor can delete");
        }
        Decision::allow_if(
            topic.status == TopicStatus::Hidden,
            "only hidden topics can be deleted",
        )
    }

    /// Hidden topics are private to their owner and deans
    pub fn can_view(actor: &Actor, topic: &Topic) -> Decision {
        if topic.status != TopicStatus::Hidden {
            return Decision::Allow;
        }
        Decision::allow_if(
            actor.role == Role::Dean || Self::is_owner(actor, topic),
            "topic is hidden",
        )
    }

    pub fn can_manage_capacity(actor: &Actor) -> Decision {
        Decision::allow_if(actor.role == Role::Dean, "only deans can change supervisor slots")
    }

    fn is_owner(actor: &Actor, topic: &Topic) -> bool {
        actor.role == Role::Supervisor && topic.is_owned_by(actor.id)
    }
}
