//! `rcc-client` – asynchronous command clients for remote joint controllers.
//!
//! Each command returns an [`ActionFuture`] immediately; the goal's
//! lifecycle is tracked by a [`TransitionBridge`] running on the transport's
//! notification thread, which resolves the future exactly once.
//!
//! - [`future`] – [`ActionFuture`] and [`FutureState`].
//! - [`bridge`] – [`TransitionBridge`] and the [`Classifier`] seam.
//! - [`command`] / [`commands`] – the generic [`CommandClient`] and its kinds.
//! - [`trajectory`] – dense → wire trajectory conversion and joint padding.
//! - [`robot`] / [`joint_state`] – joint model and its live update.
//! - [`controller_manager`] – listing and switching controllers.
//! - [`resource`] – workspace resource lookup.

pub mod bridge;
pub mod command;
pub mod commands;
pub mod controller_manager;
pub mod future;
pub mod joint_state;
pub mod resource;
pub mod robot;
pub mod trajectory;

pub use bridge::{Classification, Classifier, TransitionBridge};
pub use command::{CommandClassifier, CommandClient, CommandKind};
pub use commands::{
    FollowTrajectory, ListControllers, ListControllersClient, SetPosition, SetPositionClient,
    SwitchControllers, SwitchControllersClient, SwitchRequest, TrajectoryClient, Trigger,
    TriggerClient,
};
pub use controller_manager::{
    ControllerManager, ControllerManagerClient, ControllerSwitcher, SwitchGuard, SwitchPlan,
    plan_switch,
};
pub use future::{ActionFuture, FutureState};
pub use joint_state::JointStateClient;
pub use resource::{find_resource, workspace_search_dirs};
pub use robot::{JointTable, RobotModel};
pub use trajectory::{
    DEFAULT_TIME_TOLERANCE, DenseSample, DenseTrajectory, TrajectoryError, pad_trajectory,
    to_wire_trajectory,
};
