use serde::{Deserialize, Serialize};

/// Logging consumer states
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoggerState {
    Running,
    /// Shutdown received, persisting what is left
    Draining,
    /// A write failed; the store accepts nothing more
    Failed { error_msg: String },
    Closed,
}

impl LoggerState {
    /// Check if transition from current state to target state is valid
    pub fn can_transition_to(&self, target: &LoggerState) -> bool {
        use LoggerState::*;

        matches!(
            (self, target),
            (Running, Draining) |
            (Running, Failed { .. }) |

            (Draining, Closed) |
            // Final flush failed
            (Draining, Failed { .. }) |

            (Failed { .. }, Closed)
        )
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Running => "Running",
            Self::Draining => "Draining",
            Self::Failed { .. } => "Failed",
            Self::Closed => "Closed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl Default for LoggerState {
    fn default() -> Self {
        Self::Running
    }
}
