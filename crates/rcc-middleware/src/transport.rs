//! The transport seam.
//!
//! Command clients never speak to a bus directly. They submit goals through an
//! [`ActionTransport`] and receive lifecycle notifications through a
//! [`GoalObserver`] they supply. Any transport that can deliver the action
//! protocol's transitions can sit behind these traits; the in-process
//! [`BusTransport`][crate::bus_transport::BusTransport] is the one shipped
//! here.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rcc_types::{CommState, ControlError, GoalId, JointState, TerminalState};
use serde_json::Value;

/// Receives the lifecycle notifications of one goal.
///
/// Both methods are invoked on a thread owned by the transport, never on the
/// caller's thread, and never while the transport holds an internal lock.
/// Implementations must not block.
pub trait GoalObserver: Send + Sync {
    /// The goal's comm state changed (or was redelivered).
    ///
    /// `terminal` and `result` are only populated once `state` is
    /// [`CommState::Done`].
    fn on_transition(&self, state: CommState, terminal: Option<TerminalState>, result: Option<&Value>);

    /// The server reported progress.
    fn on_feedback(&self, feedback: &Value);
}

/// Transport-side view of an in-flight goal.
pub trait GoalHandle: Send + Sync {
    fn goal_id(&self) -> GoalId;

    /// Ask the server to cancel the goal. Fire-and-forget: the outcome is
    /// reported later through the goal's [`GoalObserver`].
    fn cancel(&self) -> Result<(), ControlError>;

    /// Latest comm state known to the transport.
    fn comm_state(&self) -> CommState;
}

/// Cloneable, shared reference to an in-flight goal.
#[derive(Clone)]
pub struct ActionHandle(Arc<dyn GoalHandle>);

impl ActionHandle {
    pub fn new(handle: Arc<dyn GoalHandle>) -> Self {
        Self(handle)
    }

    pub fn goal_id(&self) -> GoalId {
        self.0.goal_id()
    }

    pub fn cancel(&self) -> Result<(), ControlError> {
        self.0.cancel()
    }

    pub fn comm_state(&self) -> CommState {
        self.0.comm_state()
    }
}

impl fmt::Debug for ActionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionHandle")
            .field("goal_id", &self.goal_id())
            .field("comm_state", &self.comm_state())
            .finish()
    }
}

/// Goal submission half of a transport.
pub trait ActionTransport: Send + Sync {
    /// Block until a server for `endpoint` is available or `timeout` elapses.
    fn wait_for_server(&self, endpoint: &str, timeout: Duration) -> bool;

    /// Submit `goal` to `endpoint`. `observer` receives every subsequent
    /// notification for this goal.
    fn send_goal(
        &self,
        endpoint: &str,
        goal: Value,
        observer: Arc<dyn GoalObserver>,
    ) -> Result<ActionHandle, ControlError>;
}

/// Callback invoked for every joint state message on a topic.
pub type JointStateCallback = Box<dyn Fn(&JointState) + Send + Sync>;

/// Topic subscription half of a transport.
pub trait TopicTransport: Send + Sync {
    /// Deliver every [`JointState`] published on `topic` to `callback` until
    /// the returned [`Subscription`] is dropped.
    fn subscribe_joint_states(
        &self,
        topic: &str,
        callback: JointStateCallback,
    ) -> Result<Subscription, ControlError>;
}

/// Keeps a topic subscription alive. Dropping it runs the transport's
/// teardown.
pub struct Subscription {
    topic: String,
    on_drop: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, on_drop: impl FnOnce() + Send + 'static) -> Self {
        Self {
            topic: topic.into(),
            on_drop: Some(Box::new(on_drop)),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(teardown) = self.on_drop.take() {
            teardown();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("topic", &self.topic).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FixedHandle(GoalId);

    impl GoalHandle for FixedHandle {
        fn goal_id(&self) -> GoalId {
            self.0
        }

        fn cancel(&self) -> Result<(), ControlError> {
            Err(ControlError::Transport("offline".into()))
        }

        fn comm_state(&self) -> CommState {
            CommState::Active
        }
    }

    #[test]
    fn action_handle_delegates() {
        let id = GoalId::new();
        let handle = ActionHandle::new(Arc::new(FixedHandle(id)));
        let clone = handle.clone();
        assert_eq!(clone.goal_id(), id);
        assert_eq!(clone.comm_state(), CommState::Active);
        assert!(handle.cancel().is_err());
        assert!(format!("{handle:?}").contains("Active"));
    }

    #[test]
    fn subscription_runs_teardown_once_on_drop() {
        let flag = Arc::new(AtomicBool::new(false));
        let seen = flag.clone();
        let sub = Subscription::new("/joint_states", move || seen.store(true, Ordering::SeqCst));
        assert_eq!(sub.topic(), "/joint_states");
        assert!(!flag.load(Ordering::SeqCst));
        drop(sub);
        assert!(flag.load(Ordering::SeqCst));
    }
}
