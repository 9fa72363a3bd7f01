//! Storage repository traits
//!
//! These traits define the read side of the storage interface and the
//! identity boundary, allowing for different implementations (SQLite,
//! mock, a remote account service).

use uuid::Uuid;

use crate::error::Result;
use crate::models::{Actor, SupervisorCapacity, Topic};

/// Resolves bearer credentials to an acting identity
pub trait IdentityProvider {
    /// `None` when the token is unknown or expired
    fn authenticate(&self, token: &str) -> Result<Option<Actor>>;
}

/// Read-only topic lookups
///
/// Writes go exclusively through the workflow engine.
pub trait TopicRepository {
    /// Find topic by ID
    fn find_topic(&self, id: Uuid) -> Result<Option<Topic>>;

    /// List a supervisor's topics
    fn list_topics_for_supervisor(&self, supervisor_id: Uuid) -> Result<Vec<Topic>>;

    /// Get a supervisor's slot record
    fn find_capacity(&self, supervisor_id: Uuid) -> Result<Option<SupervisorCapacity>>;
}

/// Combined storage interface
pub trait Storage: IdentityProvider + TopicRepository {}

// Blanket implementation: any type implementing all traits implements Storage
impl<T> Storage for T where T: IdentityProvider + TopicRepository {}
