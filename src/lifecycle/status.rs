//! Discovery status signalling.
//!
//! The registry itself (what other services consult to route traffic here)
//! lives outside this crate; the server only reports local UP/DOWN.

use std::sync::atomic::{AtomicU8, Ordering};

/// Status reported to discovery.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    Starting = 0,
    Up = 1,
    Down = 2,
}

impl From<u8> for InstanceStatus {
    fn from(val: u8) -> Self {
        match val {
            1 => InstanceStatus::Up,
            2 => InstanceStatus::Down,
            _ => InstanceStatus::Starting,
        }
    }
}

/// Sink for local status changes.
pub trait StatusRegistry: Send + Sync {
    fn set_local_status(&self, status: InstanceStatus);
}

/// Keeps the last reported status in memory.
#[derive(Debug)]
pub struct LocalStatus {
    state: AtomicU8,
}

impl LocalStatus {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(InstanceStatus::Starting as u8),
        }
    }

    pub fn status(&self) -> InstanceStatus {
        self.state.load(Ordering::SeqCst).into()
    }
}

impl Default for LocalStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusRegistry for LocalStatus {
    fn set_local_status(&self, status: InstanceStatus) {
        let previous: InstanceStatus = self.state.swap(status as u8, Ordering::SeqCst).into();
        if previous != status {
            tracing::info!(from = ?previous, to = ?status, "Local status changed");
        }
    }
}
