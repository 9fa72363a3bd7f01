//! Thesis topic model - the resource shared between students and supervisors

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::StudentSummary;

/// Lifecycle status of a topic.
///
/// The serialized form is the Polish literal used by existing clients and
/// must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TopicStatus {
    #[serde(rename = "Ukryty")]
    Hidden,
    #[serde(rename = "Dostępny")]
    Available,
    #[serde(rename = "Zarezerwowany")]
    Reserved,
    #[serde(rename = "Student zaakceptowany")]
    StudentAccepted,
    #[serde(rename = "Zatwierdzony")]
    Approved,
}

impl TopicStatus {
    pub const ALL: [TopicStatus; 5] = [
        TopicStatus::Hidden,
        TopicStatus::Available,
        TopicStatus::Reserved,
        TopicStatus::StudentAccepted,
        TopicStatus::Approved,
    ];

    /// Wire literal for this status
    pub fn as_str(&self) -> &'static str {
        match self {
            TopicStatus::Hidden => "Ukryty",
            TopicStatus::Available => "Dostępny",
            TopicStatus::Reserved => "Zarezerwowany",
            TopicStatus::StudentAccepted => "Student zaakceptowany",
            TopicStatus::Approved => "Zatwierdzony",
        }
    }

    /// Statuses that occupy one of the supervisor's slots
    pub fn is_committed(&self) -> bool {
        matches!(self, TopicStatus::StudentAccepted | TopicStatus::Approved)
    }

    /// Statuses in which a student holds the topic
    pub fn holds_claim(&self) -> bool {
        matches!(
            self,
            TopicStatus::Reserved | TopicStatus::StudentAccepted | TopicStatus::Approved
        )
    }

    /// Statuses that require a field of study
    pub fn requires_field_of_study(&self) -> bool {
        *self != TopicStatus::Hidden
    }

    /// Content (title, description, prerequisites, tags) may still change
    pub fn content_editable(&self) -> bool {
        matches!(
            self,
            TopicStatus::Hidden | TopicStatus::Available | TopicStatus::Reserved
        )
    }

    pub fn is_terminal(&self) -> bool {
        *self == TopicStatus::Approved
    }
}

impl fmt::Display for TopicStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string is not one of the five status literals
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown topic status {:?}", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl FromStr for TopicStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TopicStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// Edges of the status graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    /// Hidden -> Available
    Publish,
    /// Available -> Reserved, by a student for themselves
    Reserve,
    /// Available -> StudentAccepted, supervisor picks the student
    Assign,
    /// Reserved -> StudentAccepted
    Confirm,
    /// Reserved -> Available, student cancel or supervisor revoke
    Release,
    /// StudentAccepted -> Approved
    Finalize,
    /// Available | Reserved -> Hidden
    Hide,
}

impl Transition {
    /// Resolve the edge between two statuses.
    ///
    /// `Available -> StudentAccepted` only exists when a student is named,
    /// which is the supervisor assign shortcut.
    pub fn between(from: TopicStatus, to: TopicStatus, with_student: bool) -> Option<Transition> {
        use TopicStatus::*;

        match (from, to) {
            (Hidden, Available) => Some(Transition::Publish),
            (Available, Reserved) => Some(Transition::Reserve),
            (Available, StudentAccepted) if with_student => Some(Transition::Assign),
            (Reserved, StudentAccepted) => Some(Transition::Confirm),
            (Reserved, Available) => Some(Transition::Release),
            (StudentAccepted, Approved) => Some(Transition::Finalize),
            (Available, Hidden) | (Reserved, Hidden) => Some(Transition::Hide),
            _ => None,
        }
    }
}

/// Editable content of a topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicContent {
    pub title: String,
    pub description: String,
    pub prerequisites: String,
    pub tags: Vec<String>,
}

impl TopicContent {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            prerequisites: String::new(),
            tags: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_prerequisites(mut self, prerequisites: impl Into<String>) -> Self {
        self.prerequisites = prerequisites.into();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// A thesis topic record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub id: Uuid,
    pub supervisor_id: Uuid,
    pub content: TopicContent,
    pub field_of_study_id: Option<i64>,
    pub status: TopicStatus,
    pub reserved_student_id: Option<Uuid>,
    /// Bumped by every successful write, compared on every mutation
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Topic {
    /// A fresh topic always starts hidden
    pub fn new(supervisor_id: Uuid, content: TopicContent) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            supervisor_id,
            content,
            field_of_study_id: None,
            status: TopicStatus::Hidden,
            reserved_student_id: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_field_of_study(mut self, field_of_study_id: i64) -> Self {
        self.field_of_study_id = Some(field_of_study_id);
        self
    }

    pub fn is_owned_by(&self, user_id: Uuid) -> bool {
        self.supervisor_id == user_id
    }

    pub fn is_reserved_by(&self, user_id: Uuid) -> bool {
        self.reserved_student_id == Some(user_id)
    }
}

/// Full read snapshot of a topic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicDetails {
    pub topic: Topic,
    pub supervisor_name: String,
    pub reserved_by: Option<StudentSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_literals_roundtrip() {
        for status in TopicStatus::ALL {
            assert_eq!(status.as_str().parse::<TopicStatus>().unwrap(), status);
        }
        assert!("Hidden".parse::<TopicStatus>().is_err());
    }

    #[test]
    fn test_status_serde_uses_wire_literal() {
        let json = serde_json::to_string(&TopicStatus::StudentAccepted).unwrap();
        assert_eq!(json, "\"Student zaakceptowany\"");

        let parsed: TopicStatus = serde_json::from_str("\"Dostępny\"").unwrap();
        assert_eq!(parsed, TopicStatus::Available);
    }

    #[test]
    fn test_status_graph() {
        use TopicStatus::*;

        assert_eq!(Transition::between(Hidden, Available, false), Some(Transition::Publish));
        assert_eq!(Transition::between(Reserved, Hidden, false), Some(Transition::Hide));
        assert_eq!(Transition::between(Available, StudentAccepted, false), None);
        assert_eq!(
            Transition::between(Available, StudentAccepted, true),
            Some(Transition::Assign)
        );
        assert_eq!(Transition::between(Hidden, Approved, false), None);
        assert_eq!(Transition::between(StudentAccepted, Hidden, false), None);

        for to in TopicStatus::ALL {
            assert_eq!(Transition::between(Approved, to, true), None);
        }
    }

    #[test]
    fn test_new_topic_is_hidden() {
        let topic = Topic::new(Uuid::new_v4(), TopicContent::new("Compilers"));
        assert_eq!(topic.status, TopicStatus::Hidden);
        assert_eq!(topic.version, 1);
        assert!(topic.reserved_student_id.is_none());
        assert!(topic.field_of_study_id.is_none());
    }
}
