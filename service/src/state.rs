//! Service lifecycle state.

use std::sync::Arc;

use parking_lot::RwLock;

/// Operational state of a [`RefreshService`](crate::RefreshService).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Built, worker pool not started yet.
    Starting,
    /// Accepting refresh requests.
    Running,
    /// Shutdown requested, waiting for workers to exit.
    ShuttingDown,
    /// Every worker has exited.
    Stopped,
}

impl ServiceState {
    /// Check if the service is accepting new refresh requests.
    pub fn accepts_requests(&self) -> bool {
        matches!(self, ServiceState::Running)
    }

    /// Check if the service is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ServiceState::Stopped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceState::Starting => "starting",
            ServiceState::Running => "running",
            ServiceState::ShuttingDown => "shutting_down",
            ServiceState::Stopped => "stopped",
        }
    }
}

/// State shared between the service and its recorder.
pub type SharedState = Arc<RwLock<ServiceState>>;
