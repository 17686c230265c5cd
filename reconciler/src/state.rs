//! Service state definitions.

/// Reconciler operational state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Service is wiring its components.
    Starting,
    /// Rate refresh is scheduled and the hook is live.
    Running,
    /// Background tasks are being stopped.
    ShuttingDown,
    /// Service is stopped.
    Stopped,
}

impl ServiceState {
    /// Check if the service is operational.
    pub fn is_operational(&self) -> bool {
        matches!(self, ServiceState::Running)
    }

    /// Check if the service is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ServiceState::Stopped)
    }
}
