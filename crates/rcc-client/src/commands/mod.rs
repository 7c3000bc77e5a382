//! The command kinds understood by the remote controllers.

mod controllers;
mod follow_trajectory;
mod set_position;
mod trigger;

pub use controllers::{ListControllers, SwitchControllers, SwitchRequest};
pub use follow_trajectory::FollowTrajectory;
pub use set_position::SetPosition;
pub use trigger::Trigger;

use crate::command::CommandClient;

pub type TriggerClient = CommandClient<Trigger>;
pub type SetPositionClient = CommandClient<SetPosition>;
pub type TrajectoryClient = CommandClient<FollowTrajectory>;
pub type SwitchControllersClient = CommandClient<SwitchControllers>;
pub type ListControllersClient = CommandClient<ListControllers>;
