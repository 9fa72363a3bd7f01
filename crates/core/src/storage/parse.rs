//! Database value parsing utilities
//!
//! Provides error-safe parsing of stored values.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Error as SqlError, ErrorCode};
use uuid::Uuid;

use crate::models::{Role, TopicStatus};

fn conversion_error<E>(column: usize, err: E) -> SqlError
where
    E: std::error::Error + Send + Sync + 'static,
{
    SqlError::FromSqlConversionFailure(column, Type::Text, Box::new(err))
}

/// Parse a UUID from a database string column
pub fn parse_uuid(s: &str) -> Result<Uuid, SqlError> {
    Uuid::parse_str(s).map_err(|e| conversion_error(0, e))
}

/// Parse an optional UUID from a database string column
pub fn parse_uuid_opt(s: Option<String>) -> Result<Option<Uuid>, SqlError> {
    s.map(|s| parse_uuid(&s)).transpose()
}

/// Parse a DateTime from an RFC3339 string
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, SqlError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(0, e))
}

/// Parse a topic status from its stored wire literal
pub fn parse_status(s: &str) -> Result<TopicStatus, SqlError> {
    s.parse::<TopicStatus>().map_err(|e| conversion_error(0, e))
}

/// Parse a role name; unknown values are a storage corruption
pub fn parse_role(s: &str) -> Result<Role, SqlError> {
    Role::parse(s).ok_or_else(|| {
        conversion_error(
            0,
            std::io::Error::new(std::io::ErrorKind::InvalidData, format!("unknown role {s}")),
        )
    })
}

/// Parse the JSON array stored in `tags_json`
pub fn parse_tags(s: &str) -> Result<Vec<String>, SqlError> {
    serde_json::from_str(s).map_err(|e| conversion_error(0, e))
}

/// Message of a constraint violation, if that is what the error is
pub fn constraint_violation(err: &SqlError) -> Option<&str> {
    match err {
        SqlError::SqliteFailure(e, msg) if e.code == ErrorCode::ConstraintViolation => {
            Some(msg.as_deref().unwrap_or(""))
        }
        _ => None,
    }
}

/// Extension trait for converting rusqlite Results to Option
pub trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>, SqlError>;
}

impl<T> OptionalExt<T> for Result<T, SqlError> {
    fn optional(self) -> Result<Option<T>, SqlError> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(SqlError::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status_rejects_unknown() {
        assert_eq!(parse_status("Zatwierdzony").unwrap(), TopicStatus::Approved);
        assert!(parse_status("Approved").is_err());
    }

    #[test]
    fn test_parse_tags() {
        assert_eq!(parse_tags("[\"rust\",\"ml\"]").unwrap(), vec!["rust", "ml"]);
        assert!(parse_tags("not json").is_err());
    }
}
