//! Moving joints straight to fixed target positions.

use rcc_types::{CommandPayload, Header, JointState, SetPositionGoal, SetPositionResult};

use crate::command::{CommandKind, endpoint_name};

/// Move named joints to fixed positions.
pub struct SetPosition;

impl CommandKind for SetPosition {
    const ACTION: &'static str = "SetPosition";

    type Params = JointState;
    type Goal = SetPositionGoal;
    type Result = SetPositionResult;
    type Output = SetPositionResult;

    fn endpoint(namespace: &str, controller: &str) -> String {
        endpoint_name(namespace, &[controller, "set_position"])
    }

    fn goal(params: &JointState) -> SetPositionGoal {
        let mut command = params.clone();
        command.header.stamp = Header::now().stamp;
        SetPositionGoal { command }
    }

    fn requested(params: &JointState) -> CommandPayload {
        CommandPayload::JointState(params.clone())
    }

    // A position command has no intermediate progress: what ran is what was
    // asked for.
    fn initial_executed(params: &JointState) -> CommandPayload {
        CommandPayload::JointState(params.clone())
    }

    fn succeeded(result: &SetPositionResult) -> bool {
        result.success
    }

    fn describe(result: &SetPositionResult) -> String {
        format!("success={} {}", result.success, result.message)
            .trim_end()
            .to_string()
    }

    fn output(result: SetPositionResult, _executed: &CommandPayload) -> SetPositionResult {
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn goal_is_stamped_and_keeps_positions() {
        let cmd = JointState::from_positions([("j1", 1.5), ("j2", -0.5)]);
        let goal = SetPosition::goal(&cmd);
        assert!(goal.command.header.stamp.is_some());
        assert_eq!(goal.command.position, cmd.position);
        assert_eq!(goal.command.name, cmd.name);
        assert!(cmd.header.stamp.is_none());
    }

    #[test]
    fn endpoint_appends_set_position() {
        assert_eq!(
            SetPosition::endpoint("/right_arm", "position_controller"),
            "/right_arm/position_controller/set_position"
        );
    }
}
