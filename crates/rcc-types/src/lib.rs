//! `rcc-types` – shared vocabulary of the joint-control client stack.
//!
//! - [`action`] – goal ids and the lifecycle enums of the action protocol.
//! - [`msgs`] – joint states, trajectories and per-command goal/result pairs.
//! - [`frame`] – the envelope carried on the action bus.
//! - [`error`] – [`ControlError`] and [`CommandFailed`].

pub mod action;
pub mod error;
pub mod frame;
pub mod msgs;

pub use action::{CommState, GoalId, GoalStatus, TerminalState};
pub use error::{CommandFailed, CommandPayload, ControlError};
pub use frame::{Frame, FrameBody};
pub use msgs::{
    ControllerState, FollowJointTrajectoryFeedback, FollowJointTrajectoryGoal,
    FollowJointTrajectoryResult, Header, JointState, JointTrajectory, JointTrajectoryPoint,
    ListControllersGoal, ListControllersResult, SetPositionGoal, SetPositionResult, Strictness,
    SwitchControllerGoal, SwitchControllerResult, TrajectoryErrorCode, TriggerGoal, TriggerResult,
};
