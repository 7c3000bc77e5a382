//! Executing a joint trajectory and collecting the points actually reached.

use chrono::TimeDelta;
use rcc_types::{
    CommandPayload, FollowJointTrajectoryFeedback, FollowJointTrajectoryGoal,
    FollowJointTrajectoryResult, JointTrajectory, TrajectoryErrorCode,
};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::command::{CommandKind, endpoint_name};

/// Execute a joint trajectory.
///
/// The executed payload is built from the `actual` point of every feedback
/// message; its header is stamped, on the first feedback, with the time
/// execution started. On success the executed trajectory is the output.
pub struct FollowTrajectory;

impl CommandKind for FollowTrajectory {
    const ACTION: &'static str = "FollowTrajectory";

    type Params = JointTrajectory;
    type Goal = FollowJointTrajectoryGoal;
    type Result = FollowJointTrajectoryResult;
    type Output = JointTrajectory;

    fn endpoint(namespace: &str, controller: &str) -> String {
        endpoint_name(namespace, &[controller, "follow_joint_trajectory"])
    }

    fn goal(params: &JointTrajectory) -> FollowJointTrajectoryGoal {
        FollowJointTrajectoryGoal {
            trajectory: params.clone(),
            goal_time_tolerance: Duration::ZERO,
        }
    }

    fn requested(params: &JointTrajectory) -> CommandPayload {
        CommandPayload::Trajectory(params.clone())
    }

    fn initial_executed(params: &JointTrajectory) -> CommandPayload {
        CommandPayload::Trajectory(JointTrajectory::with_joints(params.joint_names.clone()))
    }

    fn record_feedback(feedback: &Value, executed: &mut CommandPayload) {
        let CommandPayload::Trajectory(trajectory) = executed else {
            return;
        };
        let feedback: FollowJointTrajectoryFeedback = match serde_json::from_value(feedback.clone())
        {
            Ok(feedback) => feedback,
            Err(e) => {
                debug!(error = %e, "ignoring undecodable trajectory feedback");
                return;
            }
        };

        if trajectory.header.stamp.is_none() {
            let offset = TimeDelta::from_std(feedback.actual.time_from_start).unwrap_or_default();
            trajectory.header.stamp = feedback.header.stamp.map(|stamp| stamp - offset);
        }
        trajectory.points.push(feedback.actual);
    }

    fn succeeded(result: &FollowJointTrajectoryResult) -> bool {
        result.error_code == TrajectoryErrorCode::Successful
    }

    fn describe(result: &FollowJointTrajectoryResult) -> String {
        if result.error_string.is_empty() {
            result.error_code.to_string()
        } else {
            format!("{} {}", result.error_code, result.error_string)
        }
    }

    fn output(_result: FollowJointTrajectoryResult, executed: &CommandPayload) -> JointTrajectory {
        match executed {
            CommandPayload::Trajectory(trajectory) => trajectory.clone(),
            _ => JointTrajectory::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rcc_types::{Header, JointTrajectoryPoint};
    use serde_json::json;

    fn point(position: f64, secs: f64) -> JointTrajectoryPoint {
        JointTrajectoryPoint {
            positions: vec![position],
            time_from_start: Duration::from_secs_f64(secs),
            ..JointTrajectoryPoint::default()
        }
    }

    #[test]
    fn feedback_accumulates_actual_points() {
        let requested = JointTrajectory::with_joints(vec!["j1".into()]);
        let mut executed = FollowTrajectory::initial_executed(&requested);
        let stamp = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 10).unwrap();

        for (position, secs) in [(0.0, 0.5), (0.1, 1.0)] {
            let feedback = FollowJointTrajectoryFeedback {
                header: Header {
                    stamp: Some(stamp),
                    ..Header::default()
                },
                joint_names: vec!["j1".into()],
                actual: point(position, secs),
                ..FollowJointTrajectoryFeedback::default()
            };
            FollowTrajectory::record_feedback(&serde_json::to_value(feedback).unwrap(), &mut executed);
        }

        let CommandPayload::Trajectory(trajectory) = executed else {
            panic!("expected trajectory");
        };
        assert_eq!(trajectory.points, vec![point(0.0, 0.5), point(0.1, 1.0)]);
        // Stamped from the first feedback: 10s - 0.5s.
        assert_eq!(
            trajectory.header.stamp,
            Some(stamp - TimeDelta::milliseconds(500))
        );
    }

    #[test]
    fn garbage_feedback_is_ignored() {
        let requested = JointTrajectory::with_joints(vec!["j1".into()]);
        let mut executed = FollowTrajectory::initial_executed(&requested);
        FollowTrajectory::record_feedback(&json!({"bogus": 1}), &mut executed);
        assert_eq!(executed, FollowTrajectory::initial_executed(&requested));
    }

    #[test]
    fn success_depends_on_error_code() {
        let ok = FollowJointTrajectoryResult::default();
        let bad = FollowJointTrajectoryResult {
            error_code: TrajectoryErrorCode::PathToleranceViolated,
            error_string: "j1 deviated".into(),
        };
        assert!(FollowTrajectory::succeeded(&ok));
        assert!(!FollowTrajectory::succeeded(&bad));
        assert_eq!(
            FollowTrajectory::describe(&bad),
            "PATH_TOLERANCE_VIOLATED j1 deviated"
        );
    }
}
