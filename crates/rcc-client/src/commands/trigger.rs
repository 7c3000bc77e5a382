//! A parameterless trigger on a controller.

use rcc_types::{CommandPayload, TriggerGoal, TriggerResult};

use crate::command::{CommandKind, endpoint_name};

/// Parameterless command addressed directly to a controller.
pub struct Trigger;

impl CommandKind for Trigger {
    const ACTION: &'static str = "Trigger";

    type Params = ();
    type Goal = TriggerGoal;
    type Result = TriggerResult;
    type Output = TriggerResult;

    fn endpoint(namespace: &str, controller: &str) -> String {
        endpoint_name(namespace, &[controller])
    }

    fn goal(_params: &()) -> TriggerGoal {
        TriggerGoal {}
    }

    fn succeeded(result: &TriggerResult) -> bool {
        result.success
    }

    fn describe(result: &TriggerResult) -> String {
        format!("success={} {}", result.success, result.message)
            .trim_end()
            .to_string()
    }

    fn output(result: TriggerResult, _executed: &CommandPayload) -> TriggerResult {
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_is_controller_name() {
        assert_eq!(Trigger::endpoint("/arm", "tare"), "/arm/tare");
    }

    #[test]
    fn describe_includes_message() {
        let result = TriggerResult {
            success: false,
            message: "sensor offline".into(),
        };
        assert_eq!(Trigger::describe(&result), "success=false sensor offline");
    }
}
