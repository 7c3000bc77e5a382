//! [`JointStateClient`] – keeps a [`RobotModel`] in sync with a joint state
//! topic.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use rcc_middleware::{Subscription, TopicTransport};
use rcc_types::{ControlError, JointState};
use tracing::{debug, trace};

use crate::robot::RobotModel;

#[derive(Default)]
struct Latest {
    state: Mutex<Option<JointState>>,
    arrived: Condvar,
}

/// Writes every joint state published on a topic into a robot model.
///
/// Names the robot does not know are skipped. The subscription ends when the
/// client is dropped.
pub struct JointStateClient {
    latest: Arc<Latest>,
    subscription: Subscription,
}

impl JointStateClient {
    pub fn subscribe(
        transport: &dyn TopicTransport,
        robot: Arc<dyn RobotModel>,
        topic: &str,
    ) -> Result<Self, ControlError> {
        let latest = Arc::new(Latest::default());
        let sink = latest.clone();
        let subscription = transport.subscribe_joint_states(
            topic,
            Box::new(move |msg: &JointState| {
                apply_to_robot(robot.as_ref(), msg);
                *sink.state.lock().unwrap_or_else(PoisonError::into_inner) = Some(msg.clone());
                sink.arrived.notify_all();
            }),
        )?;
        debug!(topic, "joint state client subscribed");
        Ok(Self {
            latest,
            subscription,
        })
    }

    pub fn topic(&self) -> &str {
        self.subscription.topic()
    }

    /// The most recent message, if any has arrived.
    pub fn latest(&self) -> Option<JointState> {
        self.latest
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Wait up to `timeout` for the first message.
    pub fn wait_for_state(&self, timeout: Duration) -> Option<JointState> {
        let (state, _) = self
            .latest
            .arrived
            .wait_timeout_while(
                self.latest.state.lock().unwrap_or_else(PoisonError::into_inner),
                timeout,
                |state| state.is_none(),
            )
            .unwrap_or_else(PoisonError::into_inner);
        state.clone()
    }
}

/// Map names to DOFs and write the matching positions.
fn apply_to_robot(robot: &dyn RobotModel, msg: &JointState) {
    let (dofs, values): (Vec<usize>, Vec<f64>) = msg
        .name
        .iter()
        .zip(&msg.position)
        .filter_map(|(name, &position)| robot.dof_index(name).map(|dof| (dof, position)))
        .unzip();
    trace!(updated = dofs.len(), received = msg.name.len(), "joint state applied");
    robot.set_dof_values(&dofs, &values);
}
