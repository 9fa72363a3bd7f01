//! Error types for Thesis Core

use thiserror::Error;

use crate::models::TopicStatus;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Field of study must be set before publishing")]
    MissingField,

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: TopicStatus, to: TopicStatus },

    #[error("Student {0} already holds an active reservation")]
    StudentAlreadyReserved(uuid::Uuid),

    #[error("Supervisor {0} has no free slots")]
    CapacityExceeded(uuid::Uuid),

    #[error("Topic {0} was modified concurrently")]
    Conflict(uuid::Uuid),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
