//! Wire messages exchanged with the remote controllers.
//!
//! The shapes follow the conventional joint-control message set: joint
//! states, joint trajectories and the goal/result pairs of every command the
//! client can issue.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Standard message header.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub seq: u32,
    /// `None` until the message has been stamped.
    pub stamp: Option<DateTime<Utc>>,
    pub frame_id: String,
}

impl Header {
    /// A header stamped with the current wall-clock time.
    pub fn now() -> Self {
        Self {
            stamp: Some(Utc::now()),
            ..Self::default()
        }
    }
}

/// Snapshot of a set of named joints.
///
/// `position`, `velocity` and `effort` are parallel to `name`; any of them may
/// be empty when the publisher does not report that quantity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JointState {
    pub header: Header,
    pub name: Vec<String>,
    pub position: Vec<f64>,
    pub velocity: Vec<f64>,
    pub effort: Vec<f64>,
}

impl JointState {
    /// Build a position-only joint state from `(name, position)` pairs.
    pub fn from_positions<S: Into<String>>(pairs: impl IntoIterator<Item = (S, f64)>) -> Self {
        let (name, position) = pairs.into_iter().map(|(n, p)| (n.into(), p)).unzip();
        Self {
            name,
            position,
            ..Self::default()
        }
    }
}

/// One timestamped trajectory sample.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JointTrajectoryPoint {
    pub positions: Vec<f64>,
    /// Empty when the trajectory carries no velocities.
    pub velocities: Vec<f64>,
    /// Empty when the trajectory carries no accelerations.
    pub accelerations: Vec<f64>,
    pub effort: Vec<f64>,
    /// Offset from the trajectory's start.
    pub time_from_start: Duration,
}

/// An ordered list of waypoints over a fixed list of joints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JointTrajectory {
    pub header: Header,
    pub joint_names: Vec<String>,
    pub points: Vec<JointTrajectoryPoint>,
}

impl JointTrajectory {
    /// An empty trajectory over `joint_names`.
    pub fn with_joints(joint_names: Vec<String>) -> Self {
        Self {
            joint_names,
            ..Self::default()
        }
    }

    /// `time_from_start` of the final waypoint, or zero when empty.
    pub fn duration(&self) -> Duration {
        self.points
            .last()
            .map(|p| p.time_from_start)
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Trigger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerGoal {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerResult {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

// ---------------------------------------------------------------------------
// SetPosition
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetPositionGoal {
    pub command: JointState,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetPositionResult {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

// ---------------------------------------------------------------------------
// FollowJointTrajectory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FollowJointTrajectoryGoal {
    pub trajectory: JointTrajectory,
    pub goal_time_tolerance: Duration,
}

/// Result codes reported by a trajectory controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrajectoryErrorCode {
    #[default]
    Successful,
    InvalidGoal,
    InvalidJoints,
    OldHeaderTimestamp,
    PathToleranceViolated,
    GoalToleranceViolated,
}

impl fmt::Display for TrajectoryErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrajectoryErrorCode::Successful => "SUCCESSFUL",
            TrajectoryErrorCode::InvalidGoal => "INVALID_GOAL",
            TrajectoryErrorCode::InvalidJoints => "INVALID_JOINTS",
            TrajectoryErrorCode::OldHeaderTimestamp => "OLD_HEADER_TIMESTAMP",
            TrajectoryErrorCode::PathToleranceViolated => "PATH_TOLERANCE_VIOLATED",
            TrajectoryErrorCode::GoalToleranceViolated => "GOAL_TOLERANCE_VIOLATED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FollowJointTrajectoryResult {
    pub error_code: TrajectoryErrorCode,
    #[serde(default)]
    pub error_string: String,
}

/// Progress report emitted while a trajectory executes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FollowJointTrajectoryFeedback {
    pub header: Header,
    pub joint_names: Vec<String>,
    pub desired: JointTrajectoryPoint,
    pub actual: JointTrajectoryPoint,
    pub error: JointTrajectoryPoint,
}

// ---------------------------------------------------------------------------
// Controller manager
// ---------------------------------------------------------------------------

/// How the controller manager treats switch requests that cannot be fully
/// honoured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Strictness {
    BestEffort,
    #[default]
    Strict,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SwitchControllerGoal {
    pub start_controllers: Vec<String>,
    pub stop_controllers: Vec<String>,
    pub strictness: Strictness,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SwitchControllerResult {
    pub ok: bool,
}

/// Description of one loaded controller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControllerState {
    pub name: String,
    #[serde(rename = "type", default)]
    pub controller_type: String,
    /// `"running"` or `"stopped"`.
    pub state: String,
    /// Hardware resources (joints) claimed by the controller.
    #[serde(default)]
    pub resources: Vec<String>,
}

impl ControllerState {
    pub fn is_running(&self) -> bool {
        self.state == "running"
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListControllersGoal {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListControllersResult {
    pub controller: Vec<ControllerState>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joint_state_from_positions_keeps_order() {
        let js = JointState::from_positions([("j1", 0.1), ("j2", -0.4)]);
        assert_eq!(js.name, vec!["j1", "j2"]);
        assert_eq!(js.position, vec![0.1, -0.4]);
        assert!(js.velocity.is_empty());
    }

    #[test]
    fn trajectory_duration_is_last_time_from_start() {
        let mut traj = JointTrajectory::with_joints(vec!["a".into()]);
        assert_eq!(traj.duration(), Duration::ZERO);
        traj.points.push(JointTrajectoryPoint {
            positions: vec![0.0],
            time_from_start: Duration::from_millis(1500),
            ..Default::default()
        });
        assert_eq!(traj.duration(), Duration::from_millis(1500));
    }

    #[test]
    fn trigger_result_tolerates_missing_message() {
        let result: TriggerResult = serde_json::from_str(r#"{"success": true}"#).unwrap();
        assert!(result.success);
        assert!(result.message.is_empty());
    }

    #[test]
    fn controller_state_uses_type_key() {
        let json = r#"{"name":"arm","type":"position_controllers/JointGroup","state":"running"}"#;
        let info: ControllerState = serde_json::from_str(json).unwrap();
        assert!(info.is_running());
        assert_eq!(info.controller_type, "position_controllers/JointGroup");
        assert!(info.resources.is_empty());
    }

    #[test]
    fn error_code_display() {
        assert_eq!(
            TrajectoryErrorCode::GoalToleranceViolated.to_string(),
            "GOAL_TOLERANCE_VIOLATED"
        );
    }
}
