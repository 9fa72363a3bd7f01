//! Supervisor slot accounting

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-supervisor slot counter.
///
/// `committed_count` tracks topics in `StudentAccepted` or `Approved`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorCapacity {
    pub supervisor_id: Uuid,
    pub total_slots: u32,
    pub committed_count: u32,
}

impl SupervisorCapacity {
    pub fn new(supervisor_id: Uuid, total_slots: u32) -> Self {
        Self {
            supervisor_id,
            total_slots,
            committed_count: 0,
        }
    }

    pub fn available_slots(&self) -> u32 {
        self.total_slots.saturating_sub(self.committed_count)
    }

    pub fn has_free_slot(&self) -> bool {
        self.committed_count < self.total_slots
    }
}
