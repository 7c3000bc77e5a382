//! Listing and switching controllers through the controller manager.

use rcc_types::{
    CommandPayload, ControllerState, ListControllersGoal, ListControllersResult, Strictness,
    SwitchControllerGoal, SwitchControllerResult,
};

use crate::command::{CommandKind, endpoint_name};

const CONTROLLER_MANAGER: &str = "controller_manager";

/// Controllers to start and stop in one atomic switch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SwitchRequest {
    pub start: Vec<String>,
    pub stop: Vec<String>,
    pub strictness: Strictness,
}

/// Start and stop controllers through the controller manager. The
/// controller argument of [`CommandKind::endpoint`] is ignored.
pub struct SwitchControllers;

impl CommandKind for SwitchControllers {
    const ACTION: &'static str = "SwitchControllers";

    type Params = SwitchRequest;
    type Goal = SwitchControllerGoal;
    type Result = SwitchControllerResult;
    type Output = SwitchControllerResult;

    fn endpoint(namespace: &str, _controller: &str) -> String {
        endpoint_name(namespace, &[CONTROLLER_MANAGER, "switch_controller"])
    }

    fn goal(params: &SwitchRequest) -> SwitchControllerGoal {
        SwitchControllerGoal {
            start_controllers: params.start.clone(),
            stop_controllers: params.stop.clone(),
            strictness: params.strictness,
        }
    }

    fn requested(params: &SwitchRequest) -> CommandPayload {
        CommandPayload::Controllers {
            start: params.start.clone(),
            stop: params.stop.clone(),
        }
    }

    fn succeeded(result: &SwitchControllerResult) -> bool {
        result.ok
    }

    fn describe(result: &SwitchControllerResult) -> String {
        format!("ok={}", result.ok)
    }

    fn output(result: SwitchControllerResult, _executed: &CommandPayload) -> SwitchControllerResult {
        result
    }
}

/// Query the controllers loaded in the controller manager.
pub struct ListControllers;

impl CommandKind for ListControllers {
    const ACTION: &'static str = "ListControllers";

    type Params = ();
    type Goal = ListControllersGoal;
    type Result = ListControllersResult;
    type Output = Vec<ControllerState>;

    fn endpoint(namespace: &str, _controller: &str) -> String {
        endpoint_name(namespace, &[CONTROLLER_MANAGER, "list_controllers"])
    }

    fn goal(_params: &()) -> ListControllersGoal {
        ListControllersGoal {}
    }

    fn succeeded(_result: &ListControllersResult) -> bool {
        true
    }

    fn describe(result: &ListControllersResult) -> String {
        format!("{} controllers", result.controller.len())
    }

    fn output(result: ListControllersResult, _executed: &CommandPayload) -> Vec<ControllerState> {
        result.controller
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manager_endpoints_ignore_controller() {
        assert_eq!(
            SwitchControllers::endpoint("/arm", "whatever"),
            "/arm/controller_manager/switch_controller"
        );
        assert_eq!(
            ListControllers::endpoint("", ""),
            "/controller_manager/list_controllers"
        );
    }

    #[test]
    fn switch_goal_mirrors_request() {
        let request = SwitchRequest {
            start: vec!["traj".into()],
            stop: vec!["pos".into()],
            strictness: Strictness::Strict,
        };
        let goal = SwitchControllers::goal(&request);
        assert_eq!(goal.start_controllers, vec!["traj"]);
        assert_eq!(goal.stop_controllers, vec!["pos"]);
        assert_eq!(
            SwitchControllers::requested(&request),
            CommandPayload::Controllers {
                start: vec!["traj".into()],
                stop: vec!["pos".into()],
            }
        );
    }
}
