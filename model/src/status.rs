use serde::{Deserialize, Serialize};

/// Lifecycle states of the control state machine (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Inactive,
    Connecting,
    Testing,
    Connected,
    Error,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::Inactive
    }
}
