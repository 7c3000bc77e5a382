//! A simulated arm served over an in-process [`ActionBus`].
//!
//! The simulation owns its own joint table (the "hardware"), exposes the
//! configured controller's trigger, set-position and trajectory endpoints,
//! a controller manager, and publishes joint states at a fixed rate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use rcc_client::{JointTable, RobotModel};
use rcc_middleware::{ActionBus, GoalContext, SimActionServer, Topic, Verdict};
use rcc_types::{
    ControlError, ControllerState, FollowJointTrajectoryFeedback, FollowJointTrajectoryGoal,
    FollowJointTrajectoryResult, Frame, FrameBody, Header, JointState, ListControllersResult,
    SetPositionGoal, SetPositionResult, Strictness, SwitchControllerGoal, SwitchControllerResult,
    TrajectoryErrorCode, TriggerResult,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::Config;

pub const SIM_JOINTS: [&str; 4] = ["shoulder_pan", "shoulder_lift", "elbow", "wrist"];

const PUBLISH_PERIOD: Duration = Duration::from_millis(50);

/// Running simulation. Dropping it stops every server and the publisher.
pub struct SimRobot {
    hardware: Arc<JointTable>,
    controllers: Arc<Mutex<Vec<ControllerState>>>,
    publishing: Arc<AtomicBool>,
    _servers: Vec<SimActionServer>,
}

impl SimRobot {
    pub fn start(bus: &ActionBus, cfg: &Config) -> Result<Self, ControlError> {
        let hardware = Arc::new(JointTable::new(SIM_JOINTS));
        let controllers = Arc::new(Mutex::new(initial_controllers(&cfg.controller)));
        let ns = cfg.namespace.trim_end_matches('/');
        let ctrl = cfg.controller.trim_matches('/');

        let mut servers = Vec::new();
        servers.push(SimActionServer::spawn(
            bus,
            format!("{ns}/{ctrl}"),
            |_: &Value, _: &GoalContext| {
                Verdict::Succeeded(to_json(TriggerResult {
                    success: true,
                    message: "triggered".into(),
                }))
            },
        )?);

        let hw = hardware.clone();
        servers.push(SimActionServer::spawn(
            bus,
            format!("{ns}/{ctrl}/set_position"),
            move |goal: &Value, _: &GoalContext| set_position(hw.as_ref(), goal),
        )?);

        let hw = hardware.clone();
        servers.push(SimActionServer::spawn(
            bus,
            format!("{ns}/{ctrl}/follow_joint_trajectory"),
            move |goal: &Value, ctx: &GoalContext| follow_trajectory(hw.as_ref(), goal, ctx),
        )?);

        let table = controllers.clone();
        servers.push(SimActionServer::spawn(
            bus,
            format!("{ns}/controller_manager/list_controllers"),
            move |_: &Value, _: &GoalContext| {
                let controller = table.lock().unwrap_or_else(PoisonError::into_inner).clone();
                Verdict::Succeeded(to_json(ListControllersResult { controller }))
            },
        )?);

        let table = controllers.clone();
        servers.push(SimActionServer::spawn(
            bus,
            format!("{ns}/controller_manager/switch_controller"),
            move |goal: &Value, _: &GoalContext| {
                let ok = serde_json::from_value::<SwitchControllerGoal>(goal.clone())
                    .map(|goal| {
                        let mut table = table.lock().unwrap_or_else(PoisonError::into_inner);
                        apply_switch(&mut table, &goal)
                    })
                    .unwrap_or(false);
                Verdict::Succeeded(to_json(SwitchControllerResult { ok }))
            },
        )?);

        let publishing = Arc::new(AtomicBool::new(true));
        spawn_publisher(
            bus.clone(),
            cfg.joint_states_topic.clone(),
            hardware.clone(),
            publishing.clone(),
        )?;

        info!(namespace = %ns, controller = %ctrl, "simulated robot started");
        Ok(Self {
            hardware,
            controllers,
            publishing,
            _servers: servers,
        })
    }

    /// Joint values as the simulated hardware sees them.
    pub fn hardware(&self) -> &JointTable {
        &self.hardware
    }

    pub fn controllers(&self) -> Vec<ControllerState> {
        self.controllers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Drop for SimRobot {
    fn drop(&mut self) {
        self.publishing.store(false, Ordering::SeqCst);
    }
}

fn to_json<T: Serialize>(value: T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn initial_controllers(active: &str) -> Vec<ControllerState> {
    let joints: Vec<String> = SIM_JOINTS.iter().map(|j| j.to_string()).collect();
    let mut controllers = vec![ControllerState {
        name: active.to_string(),
        controller_type: "JointTrajectoryController".into(),
        state: "running".into(),
        resources: joints.clone(),
    }];
    if active != "position_controller" {
        controllers.push(ControllerState {
            name: "position_controller".into(),
            controller_type: "JointPositionController".into(),
            state: "stopped".into(),
            resources: joints,
        });
    }
    controllers.push(ControllerState {
        name: "gripper_controller".into(),
        controller_type: "GripperCommandController".into(),
        state: "running".into(),
        resources: vec!["gripper".into()],
    });
    controllers
}

fn set_position(hardware: &JointTable, goal: &Value) -> Verdict {
    let refuse = |message: String| {
        Verdict::Succeeded(to_json(SetPositionResult {
            success: false,
            message,
        }))
    };
    let command = match serde_json::from_value::<SetPositionGoal>(goal.clone()) {
        Ok(goal) => goal.command,
        Err(e) => return refuse(format!("bad goal: {e}")),
    };
    if command.name.len() != command.position.len() {
        return refuse("name and position lengths differ".into());
    }

    let mut dofs = Vec::with_capacity(command.name.len());
    for name in &command.name {
        match hardware.dof_index(name) {
            Some(dof) => dofs.push(dof),
            None => return refuse(format!("unknown joint {name}")),
        }
    }
    hardware.set_dof_values(&dofs, &command.position);
    Verdict::Succeeded(to_json(SetPositionResult {
        success: true,
        message: String::new(),
    }))
}

fn follow_trajectory(hardware: &JointTable, goal: &Value, ctx: &GoalContext) -> Verdict {
    let result = |error_code, error_string: String| {
        to_json(FollowJointTrajectoryResult {
            error_code,
            error_string,
        })
    };
    let trajectory = match serde_json::from_value::<FollowJointTrajectoryGoal>(goal.clone()) {
        Ok(goal) => goal.trajectory,
        Err(e) => return Verdict::Aborted(result(TrajectoryErrorCode::InvalidGoal, e.to_string())),
    };
    let dofs: Option<Vec<usize>> = trajectory
        .joint_names
        .iter()
        .map(|name| hardware.dof_index(name))
        .collect();
    let Some(dofs) = dofs else {
        return Verdict::Aborted(result(
            TrajectoryErrorCode::InvalidJoints,
            format!("unknown joints in {:?}", trajectory.joint_names),
        ));
    };

    let mut elapsed = Duration::ZERO;
    for (index, point) in trajectory.points.iter().enumerate() {
        if point.positions.len() != dofs.len() {
            return Verdict::Aborted(result(
                TrajectoryErrorCode::InvalidGoal,
                format!("waypoint {index} has {} positions", point.positions.len()),
            ));
        }
        if ctx.wait_for_cancel(point.time_from_start.saturating_sub(elapsed)) {
            debug!(goal_id = %ctx.goal_id(), index, "trajectory preempted");
            return Verdict::Preempted(result(TrajectoryErrorCode::Successful, String::new()));
        }
        elapsed = point.time_from_start;
        hardware.set_dof_values(&dofs, &point.positions);
        ctx.publish_feedback(to_json(FollowJointTrajectoryFeedback {
            header: Header::now(),
            joint_names: trajectory.joint_names.clone(),
            desired: point.clone(),
            actual: point.clone(),
            ..FollowJointTrajectoryFeedback::default()
        }));
    }
    Verdict::Succeeded(result(TrajectoryErrorCode::Successful, String::new()))
}

/// Apply a switch request. A strict request naming an unknown controller is
/// refused, and no switch may leave two running controllers sharing a
/// resource.
fn apply_switch(controllers: &mut Vec<ControllerState>, goal: &SwitchControllerGoal) -> bool {
    let known = |name: &String| controllers.iter().any(|c| &c.name == name);
    if goal.strictness == Strictness::Strict
        && !goal
            .start_controllers
            .iter()
            .chain(&goal.stop_controllers)
            .all(known)
    {
        return false;
    }

    let mut next = controllers.clone();
    for controller in &mut next {
        if goal.stop_controllers.contains(&controller.name) {
            controller.state = "stopped".into();
        }
        if goal.start_controllers.contains(&controller.name) {
            controller.state = "running".into();
        }
    }

    let running: Vec<&ControllerState> = next.iter().filter(|c| c.is_running()).collect();
    let conflict = running.iter().enumerate().any(|(i, a)| {
        running[i + 1..]
            .iter()
            .any(|b| a.resources.iter().any(|r| b.resources.contains(r)))
    });
    if conflict {
        return false;
    }
    *controllers = next;
    true
}

fn spawn_publisher(
    bus: ActionBus,
    topic: String,
    hardware: Arc<JointTable>,
    publishing: Arc<AtomicBool>,
) -> Result<(), ControlError> {
    thread::Builder::new()
        .name("rcc-sim-joint-states".into())
        .spawn(move || {
            while publishing.load(Ordering::SeqCst) {
                let names = hardware.joint_names();
                let msg = JointState {
                    header: Header::now(),
                    name: names.to_vec(),
                    position: hardware.dof_values(),
                    velocity: vec![0.0; names.len()],
                    effort: Vec::new(),
                };
                // No subscribers is not an error for a publisher.
                let _ = bus.publish_to(
                    Topic::JointStates,
                    Frame::new(topic.as_str(), FrameBody::JointState(msg)),
                );
                thread::sleep(PUBLISH_PERIOD);
            }
        })
        .map_err(|e| ControlError::Transport(format!("failed to spawn joint state publisher: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcc_client::{
        ControllerManagerClient, ControllerSwitcher, JointStateClient, SetPositionClient,
        TrajectoryClient, TriggerClient,
    };
    use rcc_middleware::{ActionTransport, BusTransport};
    use rcc_types::{JointTrajectory, JointTrajectoryPoint};

    const WAIT: Duration = Duration::from_secs(5);

    fn setup() -> (ActionBus, Arc<BusTransport>, SimRobot, Config) {
        let bus = ActionBus::default();
        let transport = Arc::new(BusTransport::new(bus.clone()).unwrap());
        let cfg = Config::default();
        let sim = SimRobot::start(&bus, &cfg).unwrap();
        (bus, transport, sim, cfg)
    }

    fn controller(name: &str, running: bool, resources: &[&str]) -> ControllerState {
        ControllerState {
            name: name.into(),
            controller_type: String::new(),
            state: if running { "running" } else { "stopped" }.into(),
            resources: resources.iter().map(|r| r.to_string()).collect(),
        }
    }

    #[test]
    fn switch_refuses_unknown_controller_when_strict() {
        let mut table = vec![controller("a", true, &["j1"])];
        let goal = SwitchControllerGoal {
            start_controllers: vec!["ghost".into()],
            stop_controllers: vec![],
            strictness: Strictness::Strict,
        };
        assert!(!apply_switch(&mut table, &goal));
        assert!(table[0].is_running());
    }

    #[test]
    fn switch_refuses_resource_conflict() {
        let mut table = vec![controller("a", true, &["j1"]), controller("b", false, &["j1"])];
        let goal = SwitchControllerGoal {
            start_controllers: vec!["b".into()],
            stop_controllers: vec![],
            strictness: Strictness::Strict,
        };
        assert!(!apply_switch(&mut table, &goal));

        let goal = SwitchControllerGoal {
            start_controllers: vec!["b".into()],
            stop_controllers: vec!["a".into()],
            strictness: Strictness::Strict,
        };
        assert!(apply_switch(&mut table, &goal));
        assert!(!table[0].is_running());
        assert!(table[1].is_running());
    }

    #[test]
    fn set_position_rejects_unknown_joint() {
        let hardware = JointTable::new(SIM_JOINTS);
        let goal = to_json(SetPositionGoal {
            command: JointState::from_positions([("elbow", 1.0), ("knee", 2.0)]),
        });
        let Verdict::Succeeded(result) = set_position(&hardware, &goal) else {
            panic!("expected a SUCCEEDED verdict");
        };
        let result: SetPositionResult = serde_json::from_value(result).unwrap();
        assert!(!result.success);
        assert!(result.message.contains("knee"));
        assert_eq!(hardware.dof_values(), vec![0.0; 4]);
    }

    #[test]
    fn clients_drive_the_simulation() {
        let (_bus, transport, sim, cfg) = setup();
        let actions: Arc<dyn ActionTransport> = transport.clone();

        let trigger =
            TriggerClient::connect(actions.clone(), &cfg.namespace, &cfg.controller, WAIT).unwrap();
        assert!(trigger.execute(&()).unwrap().wait_timeout(WAIT).unwrap().success);

        let set =
            SetPositionClient::connect(actions.clone(), &cfg.namespace, &cfg.controller, WAIT)
                .unwrap();
        let cmd = JointState::from_positions([("elbow", 0.5)]);
        assert!(set.execute(&cmd).unwrap().wait_timeout(WAIT).unwrap().success);
        assert_eq!(sim.hardware().joint_value("elbow"), Some(0.5));

        let traj =
            TrajectoryClient::connect(actions, &cfg.namespace, &cfg.controller, WAIT).unwrap();
        let mut request = JointTrajectory::with_joints(vec!["wrist".into()]);
        for (i, position) in [0.1, 0.2, 0.3].into_iter().enumerate() {
            request.points.push(JointTrajectoryPoint {
                positions: vec![position],
                time_from_start: Duration::from_millis(10 * i as u64),
                ..JointTrajectoryPoint::default()
            });
        }
        let executed = traj.execute(&request).unwrap().wait_timeout(WAIT).unwrap();
        assert_eq!(executed.points.len(), 3);
        assert_eq!(sim.hardware().joint_value("wrist"), Some(0.3));
    }

    #[test]
    fn joint_states_reach_the_client_model() {
        let (_bus, transport, sim, cfg) = setup();
        sim.hardware().set_dof_values(&[2], &[1.25]);

        let model = Arc::new(JointTable::new(SIM_JOINTS));
        let client =
            JointStateClient::subscribe(transport.as_ref(), model.clone(), &cfg.joint_states_topic)
                .unwrap();
        assert!(client.wait_for_state(WAIT).is_some());
        assert_eq!(model.joint_value("elbow"), Some(1.25));
    }

    #[test]
    fn switcher_swaps_arm_controllers() {
        let (_bus, transport, sim, cfg) = setup();
        let manager = ControllerManagerClient::connect(transport, &cfg.namespace, WAIT).unwrap();

        let mut switcher = ControllerSwitcher::new(&manager, ["position_controller"]);
        let plan = switcher.switch().unwrap();
        assert_eq!(plan.start, vec!["position_controller"]);
        assert_eq!(plan.stop, vec![cfg.controller.clone()]);

        let running: Vec<String> = sim
            .controllers()
            .into_iter()
            .filter(|c| c.is_running())
            .map(|c| c.name)
            .collect();
        assert_eq!(running, vec!["position_controller", "gripper_controller"]);

        switcher.unswitch().unwrap();
        assert!(sim.controllers()[0].is_running());
    }
}
