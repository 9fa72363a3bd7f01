//! Network protocol message types
//!
//! All messages are JSON-serialized and length-prefixed on the wire.
//! Topic payloads use camelCase field names and the status literals shared
//! with existing clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status literals accepted and returned on the wire
pub const STATUS_LITERALS: [&str; 5] = [
    "Ukryty",
    "Dostępny",
    "Zarezerwowany",
    "Student zaakceptowany",
    "Zatwierdzony",
];

/// Student holding a topic, as shown to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentRef {
    pub id: Uuid,
    pub name: String,
    pub surname: String,
    pub email: String,
}

/// Full topic snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicView {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub prerequisites: String,
    pub tags: Vec<String>,
    pub supervisor_id: Uuid,
    pub supervisor_name: String,
    pub field_of_study_id: Option<i64>,
    /// One of [`STATUS_LITERALS`]
    pub status: String,
    pub reserved_by: Option<StudentRef>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Operations a client can call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Read `topic/{id}`
    #[serde(rename_all = "camelCase")]
    GetTopic { topic_id: Uuid },

    /// `PUT topic/{id}/status`
    #[serde(rename_all = "camelCase")]
    SetStatus { topic_id: Uuid, status: String },

    /// `PUT topic/{id}/assign_student`
    #[serde(rename_all = "camelCase")]
    AssignStudent { topic_id: Uuid, producer_id: Uuid },
}

/// Stable error discriminants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Forbidden,
    MissingField,
    InvalidTransition,
    StudentAlreadyReserved,
    CapacityExceeded,
    Conflict,
    NotFound,
    Unauthorized,
    BadRequest,
    Internal,
}

impl ErrorKind {
    /// Whether a fresh read and another attempt may succeed
    pub fn is_retryable(self) -> bool {
        self == ErrorKind::Conflict
    }
}

/// Typed failure returned to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub kind: ErrorKind,
    pub message: String,
}

impl WireError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Result of one call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Topic { topic: TopicView },
    Error { error: WireError },
}

impl Outcome {
    pub fn into_result(self) -> Result<TopicView, WireError> {
        match self {
            Outcome::Topic { topic } => Ok(topic),
            Outcome::Error { error } => Err(error),
        }
    }
}

impl From<Result<TopicView, WireError>> for Outcome {
    fn from(result: Result<TopicView, WireError>) -> Self {
        match result {
            Ok(topic) => Outcome::Topic { topic },
            Err(error) => Outcome::Error { error },
        }
    }
}

/// Network protocol messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// Client invokes an operation with its bearer token
    Call {
        request_id: u64,
        token: String,
        request: Request,
    },

    /// Server answers the call with the same id
    Reply { request_id: u64, outcome: Outcome },

    /// Server refuses the connection
    Rejected { reason: String },

    /// Ping to keep connection alive
    Ping,

    /// Pong response to ping
    Pong,
}

impl Message {
    /// Serialize message to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize message from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
