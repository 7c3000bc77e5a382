use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::action::TerminalState;
use crate::msgs::{JointState, JointTrajectory};

/// What a command asked for, or what it actually did, echoed back in
/// failures.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum CommandPayload {
    #[default]
    None,
    JointState(JointState),
    Trajectory(JointTrajectory),
    Controllers {
        start: Vec<String>,
        stop: Vec<String>,
    },
}

/// The remote side completed a command but reported failure, or the goal
/// ended in an unexpected terminal state.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{message}")]
pub struct CommandFailed {
    pub message: String,
    pub terminal_state: TerminalState,
    pub requested: CommandPayload,
    pub executed: CommandPayload,
}

/// Error type shared by every crate of the client stack.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ControlError {
    #[error("Could not connect to action server {endpoint} within {timeout:?}")]
    Connection { endpoint: String, timeout: Duration },

    #[error(transparent)]
    CommandFailed(#[from] CommandFailed),

    #[error("Command was cancelled")]
    Cancelled,

    #[error("Timed out after {0:?} waiting for the command to finish")]
    Timeout(Duration),

    #[error("No goal handle is attached to this future")]
    NotSubmitted,

    #[error("Future is already resolved")]
    AlreadyResolved,

    #[error("Malformed trajectory: {0}")]
    MalformedTrajectory(String),

    #[error("Loading resource failed: {0}")]
    Resource(String),

    #[error("Switching controllers failed: {0}")]
    Switch(String),

    #[error("Transport Error: {0}")]
    Transport(String),

    #[error("Serialization Error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for ControlError {
    fn from(err: serde_json::Error) -> Self {
        ControlError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_failed_displays_message_only() {
        let failed = CommandFailed {
            message: "SetPosition action failed (ABORTED): success=false".into(),
            terminal_state: TerminalState::Aborted,
            requested: CommandPayload::None,
            executed: CommandPayload::None,
        };
        let err = ControlError::from(failed.clone());
        assert_eq!(err.to_string(), failed.message);
    }

    #[test]
    fn connection_error_names_endpoint() {
        let err = ControlError::Connection {
            endpoint: "/arm/set_position".into(),
            timeout: Duration::from_secs(2),
        };
        assert!(err.to_string().contains("/arm/set_position"));
    }

    #[test]
    fn serde_error_converts() {
        let bad = serde_json::from_str::<u32>("\"nope\"").unwrap_err();
        assert!(matches!(ControlError::from(bad), ControlError::Serialization(_)));
    }
}
