//! Data models for thesis topics

mod capacity;
mod topic;
mod user;

pub use capacity::*;
pub use topic::*;
pub use user::*;
