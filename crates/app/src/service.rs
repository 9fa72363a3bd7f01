//! Topic service backed by the workflow engine
//!
//! Every call opens its own connection to the database file, so concurrent
//! calls on the blocking pool never share a connection and their writes are
//! ordered by SQLite and the topic version check.

use std::path::PathBuf;
use std::time::Duration;

use thesis_core::{
    Database, Error as CoreError, IdentityProvider, TopicDetails, TopicStatus, TransitionRequest,
};
use thesis_net::{ErrorKind, Outcome, Request, StudentRef, TopicService, TopicView, WireError};
use tracing::{debug, error};

pub struct EngineService {
    database_path: PathBuf,
    busy_timeout: Duration,
}

impl EngineService {
    pub fn new(database_path: impl Into<PathBuf>, busy_timeout: Duration) -> Self {
        Self {
            database_path: database_path.into(),
            busy_timeout,
        }
    }

    fn open(&self) -> thesis_core::Result<Database> {
        let db = Database::connect(&self.database_path)?;
        db.set_busy_timeout(self.busy_timeout)?;
        Ok(db)
    }

    fn dispatch(&self, token: &str, request: Request) -> Result<TopicView, WireError> {
        let db = self.open().map_err(to_wire_error)?;
        let actor = db
            .authenticate(token)
            .map_err(to_wire_error)?
            .ok_or_else(|| WireError::new(ErrorKind::Unauthorized, "invalid or expired token"))?;
        let engine = db.workflow();

        let details = match request {
            Request::GetTopic { topic_id } => engine.topic_details(topic_id, &actor),
            Request::SetStatus { topic_id, status } => {
                let to: TopicStatus = status
                    .parse()
                    .map_err(|e: thesis_core::UnknownStatus| {
                        WireError::new(ErrorKind::BadRequest, e.to_string())
                    })?;
                engine
                    .request_transition(&TransitionRequest::new(topic_id, to, actor))
                    .and_then(|topic| engine.describe(topic))
            }
            Request::AssignStudent {
                topic_id,
                producer_id,
            } => engine
                .assign_student(topic_id, &actor, producer_id)
                .and_then(|topic| engine.describe(topic)),
        };

        // Writes answer with the snapshot they committed, not a fresh read
        Ok(topic_view(details.map_err(to_wire_error)?))
    }
}

impl TopicService for EngineService {
    fn handle(&self, token: &str, request: Request) -> Outcome {
        let result = self.dispatch(token, request);
        if let Err(e) = &result {
            debug!(kind = ?e.kind, message = %e.message, "Call refused");
        }
        result.into()
    }
}

/// Map an engine error to its wire discriminant
pub fn to_wire_error(err: CoreError) -> WireError {
    let kind = match &err {
        CoreError::Forbidden(_) => ErrorKind::Forbidden,
        CoreError::MissingField => ErrorKind::MissingField,
        CoreError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
        CoreError::StudentAlreadyReserved(_) => ErrorKind::StudentAlreadyReserved,
        CoreError::CapacityExceeded(_) => ErrorKind::CapacityExceeded,
        CoreError::Conflict(_) => ErrorKind::Conflict,
        CoreError::NotFound(_) => ErrorKind::NotFound,
        CoreError::Authentication(_) => ErrorKind::Unauthorized,
        CoreError::InvalidOperation(_) => ErrorKind::BadRequest,
        CoreError::Database(_) | CoreError::Io(_) | CoreError::Serialization(_) => {
            error!(error = %err, "Storage failure");
            return WireError::new(ErrorKind::Internal, "internal error");
        }
    };
    WireError::new(kind, err.to_string())
}

fn topic_view(details: TopicDetails) -> TopicView {
    let TopicDetails {
        topic,
        supervisor_name,
        reserved_by,
    } = details;

    TopicView {
        id: topic.id,
        title: topic.content.title,
        description: topic.content.description,
        prerequisites: topic.content.prerequisites,
        tags: topic.content.tags,
        supervisor_id: topic.supervisor_id,
        supervisor_name,
        field_of_study_id: topic.field_of_study_id,
        status: topic.status.as_str().to_string(),
        reserved_by: reserved_by.map(|student| StudentRef {
            id: student.id,
            name: student.name,
            surname: student.surname,
            email: student.email,
        }),
        version: topic.version,
        created_at: topic.created_at,
        updated_at: topic.updated_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use thesis_core::{Role, Session, TopicContent, User};
    use uuid::Uuid;

    struct Setup {
        _dir: TempDir,
        service: EngineService,
        topic_id: Uuid,
        supervisor_token: String,
        student: User,
        student_token: String,
    }

    fn setup() -> Setup {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("thesis.db");
        let db = Database::open(&path).unwrap();

        let supervisor = User::new("prof@uni.edu", "Anna", "Maj", Role::Supervisor);
        let student = User::new("ola@uni.edu", "Ola", "Wrona", Role::Student);
        db.users().create(&supervisor).unwrap();
        db.users().create(&student).unwrap();
        db.capacity().ensure(supervisor.id, 1).unwrap();

        let supervisor_session = Session::new(supervisor.id, 8);
        let student_session = Session::new(student.id, 8);
        db.users().create_session(&supervisor_session).unwrap();
        db.users().create_session(&student_session).unwrap();

        let topic = db
            .workflow()
            .create_topic(&supervisor.actor(), TopicContent::new("Type inference"), Some(4))
            .unwrap();

        Setup {
            _dir: dir,
            service: EngineService::new(path, Duration::from_secs(1)),
            topic_id: topic.id,
            supervisor_token: supervisor_session.token(),
            student,
            student_token: student_session.token(),
        }
    }

    fn set_status(s: &Setup, token: &str, status: &str) -> Result<TopicView, WireError> {
        s.service
            .handle(
                token,
                Request::SetStatus {
                    topic_id: s.topic_id,
                    status: status.into(),
                },
            )
            .into_result()
    }

    #[test]
    fn test_reservation_flow_over_literals() {
        let s = setup();
        let topic = set_status(&s, &s.supervisor_token, "Dostępny").unwrap();
        assert_eq!(topic.status, "Dostępny");
        assert!(topic.reserved_by.is_none());

        let topic = set_status(&s, &s.student_token, "Zarezerwowany").unwrap();
        let reserved_by = topic.reserved_by.unwrap();
        assert_eq!(reserved_by.id, s.student.id);
        assert_eq!(reserved_by.name, "Ola");
        assert_eq!(reserved_by.surname, "Wrona");
        assert_eq!(reserved_by.email, "ola@uni.edu");
        assert_eq!(topic.supervisor_name, "Anna Maj");

        let topic = set_status(&s, &s.student_token, "Student zaakceptowany").unwrap();
        assert_eq!(topic.version, 4);
        let topic = set_status(&s, &s.student_token, "Zatwierdzony").unwrap();
        assert_eq!(topic.status, "Zatwierdzony");

        let error = set_status(&s, &s.supervisor_token, "Ukryty").unwrap_err();
        assert_eq!(error.kind, ErrorKind::InvalidTransition);
    }

    #[test]
    fn test_wire_literals_match_statuses() {
        for literal in thesis_net::STATUS_LITERALS {
            assert_eq!(literal.parse::<TopicStatus>().unwrap().as_str(), literal);
        }
    }

    #[test]
    fn test_unknown_literal_is_bad_request() {
        let s = setup();
        let error = set_status(&s, &s.supervisor_token, "Available").unwrap_err();
        assert_eq!(error.kind, ErrorKind::BadRequest);
    }

    #[test]
    fn test_invalid_token_is_unauthorized() {
        let s = setup();
        let error = set_status(&s, "not-a-session", "Dostępny").unwrap_err();
        assert_eq!(error.kind, ErrorKind::Unauthorized);

        let error = set_status(&s, &Uuid::new_v4().to_string(), "Dostępny").unwrap_err();
        assert_eq!(error.kind, ErrorKind::Unauthorized);
    }

    #[test]
    fn test_hidden_topic_read_and_typed_errors() {
        let s = setup();
        let read = |token: &str| {
            s.service
                .handle(token, Request::GetTopic { topic_id: s.topic_id })
                .into_result()
        };

        assert_eq!(read(&s.supervisor_token).unwrap().status, "Ukryty");
        assert_eq!(read(&s.student_token).unwrap_err().kind, ErrorKind::Forbidden);

        let error = set_status(&s, &s.student_token, "Zarezerwowany").unwrap_err();
        assert_eq!(error.kind, ErrorKind::InvalidTransition);
    }

    #[test]
    fn test_assign_student() {
        let s = setup();
        set_status(&s, &s.supervisor_token, "Dostępny").unwrap();

        let topic = s
            .service
            .handle(
                &s.supervisor_token,
                Request::AssignStudent {
                    topic_id: s.topic_id,
                    producer_id: s.student.id,
                },
            )
            .into_result()
            .unwrap();
        assert_eq!(topic.status, "Student zaakceptowany");
        assert_eq!(topic.reserved_by.unwrap().id, s.student.id);

        let error = s
            .service
            .handle(
                &s.student_token,
                Request::AssignStudent {
                    topic_id: s.topic_id,
                    producer_id: s.student.id,
                },
            )
            .into_result()
            .unwrap_err();
        assert_eq!(error.kind, ErrorKind::Forbidden);

        // Re-assigning an accepted topic is refused and leaves the holder
        let other = User::new("jan@uni.edu", "Jan", "Kos", Role::Student);
        Database::connect(&s.service.database_path)
            .unwrap()
            .users()
            .create(&other)
            .unwrap();
        let error = s
            .service
            .handle(
                &s.supervisor_token,
                Request::AssignStudent {
                    topic_id: s.topic_id,
                    producer_id: other.id,
                },
            )
            .into_result()
            .unwrap_err();
        assert_eq!(error.kind, ErrorKind::InvalidTransition);

        let topic = s
            .service
            .handle(&s.supervisor_token, Request::GetTopic { topic_id: s.topic_id })
            .into_result()
            .unwrap();
        assert_eq!(topic.reserved_by.unwrap().id, s.student.id);
    }

    #[test]
    fn test_error_mapping() {
        let id = Uuid::new_v4();
        let cases = [
            (CoreError::MissingField, ErrorKind::MissingField),
            (CoreError::Conflict(id), ErrorKind::Conflict),
            (CoreError::CapacityExceeded(id), ErrorKind::CapacityExceeded),
            (CoreError::StudentAlreadyReserved(id), ErrorKind::StudentAlreadyReserved),
            (CoreError::NotFound("x".into()), ErrorKind::NotFound),
            (CoreError::InvalidOperation("x".into()), ErrorKind::BadRequest),
            (CoreError::Io(std::io::Error::other("disk")), ErrorKind::Internal),
        ];
        for (err, kind) in cases {
            assert_eq!(to_wire_error(err).kind, kind);
        }
    }
}
