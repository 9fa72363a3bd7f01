//! Thesis Core Library
//!
//! Topic models, access policy, storage and the reservation workflow for the
//! thesis topic service.

pub mod engine;
pub mod error;
pub mod invariants;
pub mod models;
pub mod permissions;
pub mod storage;

pub use engine::{TransitionRequest, WorkflowEngine};
pub use error::{Error, Result};
pub use invariants::{audit, InvariantViolation};
pub use models::*;
pub use permissions::*;
pub use storage::{
    CapacityTracker, Database, IdentityProvider, Storage, TopicRepository, TopicStore, UserStore,
};
