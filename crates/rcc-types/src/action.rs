//! Lifecycle vocabulary of the goal/feedback/result action protocol.
//!
//! A goal moves through two views of the same lifecycle:
//!
//! | View | Owner | Type |
//! |---|---|---|
//! | Server status | the remote action server | [`GoalStatus`] |
//! | Client comm state | the local transport | [`CommState`] |
//!
//! Once the client reaches [`CommState::Done`] the reason the goal ended is
//! read as a [`TerminalState`].

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of a single goal submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GoalId(pub Uuid);

impl GoalId {
    /// Generate a fresh random goal id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GoalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GoalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client-side lifecycle stage of an in-flight goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommState {
    WaitingForGoalAck,
    Pending,
    Active,
    WaitingForCancelAck,
    Recalling,
    Preempting,
    WaitingForResult,
    Done,
    Lost,
}

impl CommState {
    /// Progress rank used to keep client-side transitions monotonic.
    ///
    /// The cancel-related states share a rank with their non-cancel peers so
    /// that a late `ACTIVE` status cannot undo a `PREEMPTING` one.
    pub fn rank(self) -> u8 {
        match self {
            CommState::WaitingForGoalAck => 0,
            CommState::Pending => 1,
            CommState::WaitingForCancelAck => 2,
            CommState::Active => 2,
            CommState::Recalling => 3,
            CommState::Preempting => 3,
            CommState::WaitingForResult => 4,
            CommState::Done | CommState::Lost => 5,
        }
    }
}

impl fmt::Display for CommState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommState::WaitingForGoalAck => "WAITING_FOR_GOAL_ACK",
            CommState::Pending => "PENDING",
            CommState::Active => "ACTIVE",
            CommState::WaitingForCancelAck => "WAITING_FOR_CANCEL_ACK",
            CommState::Recalling => "RECALLING",
            CommState::Preempting => "PREEMPTING",
            CommState::WaitingForResult => "WAITING_FOR_RESULT",
            CommState::Done => "DONE",
            CommState::Lost => "LOST",
        };
        f.write_str(name)
    }
}

/// Why a goal's lifecycle ended. Only meaningful once the comm state is
/// [`CommState::Done`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminalState {
    Recalled,
    Rejected,
    Preempted,
    Aborted,
    Succeeded,
    Lost,
}

impl TerminalState {
    /// `true` for the outcomes that represent cooperative cancellation rather
    /// than failure.
    pub fn is_cancellation(self) -> bool {
        matches!(
            self,
            TerminalState::Rejected | TerminalState::Recalled | TerminalState::Preempted
        )
    }
}

impl fmt::Display for TerminalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TerminalState::Recalled => "RECALLED",
            TerminalState::Rejected => "REJECTED",
            TerminalState::Preempted => "PREEMPTED",
            TerminalState::Aborted => "ABORTED",
            TerminalState::Succeeded => "SUCCEEDED",
            TerminalState::Lost => "LOST",
        };
        f.write_str(name)
    }
}

/// Status of a goal as reported by the action server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GoalStatus {
    Pending,
    Active,
    Preempting,
    Recalling,
    Preempted,
    Succeeded,
    Aborted,
    Rejected,
    Recalled,
    Lost,
}

impl GoalStatus {
    /// The terminal classification of this status, or `None` while the goal
    /// is still in flight.
    pub fn terminal(self) -> Option<TerminalState> {
        match self {
            GoalStatus::Preempted => Some(TerminalState::Preempted),
            GoalStatus::Succeeded => Some(TerminalState::Succeeded),
            GoalStatus::Aborted => Some(TerminalState::Aborted),
            GoalStatus::Rejected => Some(TerminalState::Rejected),
            GoalStatus::Recalled => Some(TerminalState::Recalled),
            GoalStatus::Lost => Some(TerminalState::Lost),
            GoalStatus::Pending
            | GoalStatus::Active
            | GoalStatus::Preempting
            | GoalStatus::Recalling => None,
        }
    }

    /// The client comm state this status drives the goal towards.
    pub fn comm_state(self) -> CommState {
        match self {
            GoalStatus::Pending => CommState::Pending,
            GoalStatus::Active => CommState::Active,
            GoalStatus::Preempting => CommState::Preempting,
            GoalStatus::Recalling => CommState::Recalling,
            _ => CommState::WaitingForResult,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_map_to_terminal_states() {
        assert_eq!(GoalStatus::Succeeded.terminal(), Some(TerminalState::Succeeded));
        assert_eq!(GoalStatus::Recalled.terminal(), Some(TerminalState::Recalled));
        assert_eq!(GoalStatus::Active.terminal(), None);
        assert_eq!(GoalStatus::Preempting.terminal(), None);
    }

    #[test]
    fn cancellation_outcomes() {
        assert!(TerminalState::Rejected.is_cancellation());
        assert!(TerminalState::Recalled.is_cancellation());
        assert!(TerminalState::Preempted.is_cancellation());
        assert!(!TerminalState::Aborted.is_cancellation());
        assert!(!TerminalState::Lost.is_cancellation());
        assert!(!TerminalState::Succeeded.is_cancellation());
    }

    #[test]
    fn done_outranks_everything() {
        for state in [
            CommState::WaitingForGoalAck,
            CommState::Pending,
            CommState::Active,
            CommState::Preempting,
            CommState::WaitingForResult,
        ] {
            assert!(CommState::Done.rank() > state.rank(), "{state}");
        }
    }

    #[test]
    fn display_uses_protocol_constant_names() {
        assert_eq!(TerminalState::Preempted.to_string(), "PREEMPTED");
        assert_eq!(CommState::WaitingForResult.to_string(), "WAITING_FOR_RESULT");
    }

    #[test]
    fn status_serializes_as_screaming_case() {
        let json = serde_json::to_string(&GoalStatus::Succeeded).unwrap();
        assert_eq!(json, "\"SUCCEEDED\"");
    }
}
