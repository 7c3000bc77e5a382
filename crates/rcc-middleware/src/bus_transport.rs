//! [`BusTransport`] – the client side of the action protocol over an
//! [`ActionBus`].
//!
//! Goals are published on [`Topic::GoalRequests`]. A single notification
//! thread (`rcc-notify`) drains [`Topic::GoalUpdates`], advances each goal's
//! [`CommStateMachine`] and hands the resulting transitions to the goal's
//! [`GoalObserver`]. Observers are always called after the goal table lock
//! has been released. A goal's entry is dropped as soon as it reaches
//! [`CommState::Done`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread;
use std::time::Duration;

use rcc_types::{CommState, ControlError, Frame, FrameBody, GoalId, TerminalState};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::bus::{ActionBus, Topic, TopicReceiver};
use crate::comm_state::CommStateMachine;
use crate::transport::{
    ActionHandle, ActionTransport, GoalHandle, GoalObserver, JointStateCallback, Subscription,
    TopicTransport,
};

struct GoalEntry {
    endpoint: String,
    machine: CommStateMachine,
    observer: Arc<dyn GoalObserver>,
}

type GoalTable = Mutex<HashMap<GoalId, GoalEntry>>;

/// A notification computed under the table lock and delivered after it.
enum Delivery {
    Transition {
        observer: Arc<dyn GoalObserver>,
        state: CommState,
        terminal: Option<TerminalState>,
        result: Option<Value>,
    },
    Feedback {
        observer: Arc<dyn GoalObserver>,
        feedback: Value,
    },
}

impl Delivery {
    fn deliver(self) {
        match self {
            Delivery::Transition {
                observer,
                state,
                terminal,
                result,
            } => observer.on_transition(state, terminal, result.as_ref()),
            Delivery::Feedback { observer, feedback } => observer.on_feedback(&feedback),
        }
    }
}

/// In-process [`ActionTransport`] and [`TopicTransport`] backed by an
/// [`ActionBus`].
pub struct BusTransport {
    bus: ActionBus,
    goals: Arc<GoalTable>,
}

impl BusTransport {
    /// Attach a transport to `bus` and start its notification thread.
    ///
    /// The thread exits once the transport has been dropped and the next
    /// update arrives, or when the bus closes.
    pub fn new(bus: ActionBus) -> Result<Self, ControlError> {
        let goals: Arc<GoalTable> = Arc::default();
        let receiver = bus.subscribe_to(Topic::GoalUpdates);
        let table = Arc::downgrade(&goals);
        thread::Builder::new()
            .name("rcc-notify".to_string())
            .spawn(move || dispatch_updates(receiver, table))
            .map_err(|e| ControlError::Transport(format!("failed to spawn notify thread: {e}")))?;
        Ok(Self { bus, goals })
    }

    /// The bus this transport talks over.
    pub fn bus(&self) -> &ActionBus {
        &self.bus
    }

    /// Number of goals that have not reached [`CommState::Done`] yet.
    pub fn in_flight(&self) -> usize {
        self.goals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl ActionTransport for BusTransport {
    fn wait_for_server(&self, endpoint: &str, timeout: Duration) -> bool {
        self.bus.wait_for_server(endpoint, timeout)
    }

    fn send_goal(
        &self,
        endpoint: &str,
        goal: Value,
        observer: Arc<dyn GoalObserver>,
    ) -> Result<ActionHandle, ControlError> {
        let goal_id = GoalId::new();
        // Register before publishing so that an immediate reply finds the entry.
        self.goals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                goal_id,
                GoalEntry {
                    endpoint: endpoint.to_string(),
                    machine: CommStateMachine::new(),
                    observer,
                },
            );

        let frame = Frame::new(endpoint, FrameBody::Goal { goal_id, goal });
        if let Err(e) = self.bus.publish_to(Topic::GoalRequests, frame) {
            self.goals
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&goal_id);
            return Err(e);
        }
        info!(endpoint, %goal_id, "goal sent");

        Ok(ActionHandle::new(Arc::new(BusGoalHandle {
            goal_id,
            endpoint: endpoint.to_string(),
            bus: self.bus.clone(),
            goals: Arc::downgrade(&self.goals),
        })))
    }
}

impl TopicTransport for BusTransport {
    fn subscribe_joint_states(
        &self,
        topic: &str,
        callback: JointStateCallback,
    ) -> Result<Subscription, ControlError> {
        let mut receiver = self.bus.subscribe_to(Topic::JointStates);
        let active = Arc::new(AtomicBool::new(true));
        let still_active = active.clone();
        let name = topic.to_string();

        thread::Builder::new()
            .name(format!("rcc-sub{topic}"))
            .spawn(move || {
                loop {
                    let frame = match receiver.blocking_recv() {
                        Ok(frame) => frame,
                        Err(RecvError::Lagged(n)) => {
                            warn!(topic = %name, lagged_by = n, "joint state subscriber lagged");
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    };
                    if !still_active.load(Ordering::SeqCst) {
                        break;
                    }
                    if frame.endpoint != name {
                        continue;
                    }
                    if let FrameBody::JointState(state) = &frame.body {
                        callback(state);
                    }
                }
                debug!(topic = %name, "joint state subscription closed");
            })
            .map_err(|e| ControlError::Transport(format!("failed to spawn subscriber: {e}")))?;

        Ok(Subscription::new(topic, move || {
            active.store(false, Ordering::SeqCst)
        }))
    }
}

// ---------------------------------------------------------------------------
// Goal handle
// ---------------------------------------------------------------------------

struct BusGoalHandle {
    goal_id: GoalId,
    endpoint: String,
    bus: ActionBus,
    goals: Weak<GoalTable>,
}

impl GoalHandle for BusGoalHandle {
    fn goal_id(&self) -> GoalId {
        self.goal_id
    }

    fn cancel(&self) -> Result<(), ControlError> {
        let Some(goals) = self.goals.upgrade() else {
            return Ok(());
        };
        {
            let mut table = goals.lock().unwrap_or_else(PoisonError::into_inner);
            match table.get_mut(&self.goal_id) {
                Some(entry) => {
                    entry.machine.on_cancel_requested();
                }
                // Already done: nothing left to cancel.
                None => return Ok(()),
            }
        }
        debug!(endpoint = %self.endpoint, goal_id = %self.goal_id, "cancel requested");
        let frame = Frame::new(
            &self.endpoint,
            FrameBody::Cancel {
                goal_id: Some(self.goal_id),
            },
        );
        self.bus.publish_to(Topic::GoalRequests, frame).map(|_| ())
    }

    fn comm_state(&self) -> CommState {
        self.goals
            .upgrade()
            .and_then(|goals| {
                goals
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get(&self.goal_id)
                    .map(|entry| entry.machine.state())
            })
            .unwrap_or(CommState::Done)
    }
}

// ---------------------------------------------------------------------------
// Notification thread
// ---------------------------------------------------------------------------

fn dispatch_updates(mut receiver: TopicReceiver, table: Weak<GoalTable>) {
    loop {
        let frame = match receiver.blocking_recv() {
            Ok(frame) => frame,
            // Unreachable on a lossless lane; a skipped result would leave its
            // goal pending forever, so every in-flight goal is given up.
            Err(RecvError::Lagged(n)) => {
                let Some(goals) = table.upgrade() else {
                    break;
                };
                warn!(lagged_by = n, "goal updates lost, failing in-flight goals");
                let deliveries = lose_all(&goals);
                drop(goals);
                for delivery in deliveries {
                    delivery.deliver();
                }
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        let Some(goals) = table.upgrade() else {
            break;
        };
        let deliveries = route_update(&goals, frame);
        drop(goals);
        for delivery in deliveries {
            delivery.deliver();
        }
    }
    debug!("notify thread exiting");
}

/// End every tracked goal as `LOST`.
fn lose_all(goals: &GoalTable) -> Vec<Delivery> {
    goals
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .drain()
        .map(|(_, entry)| Delivery::Transition {
            observer: entry.observer,
            state: CommState::Done,
            terminal: Some(TerminalState::Lost),
            result: None,
        })
        .collect()
}

fn route_update(goals: &GoalTable, frame: Frame) -> Vec<Delivery> {
    let mut table = goals.lock().unwrap_or_else(PoisonError::into_inner);
    let Some(goal_id) = frame.body.goal_id() else {
        return Vec::new();
    };
    let Some(entry) = table.get_mut(&goal_id) else {
        return Vec::new();
    };
    if entry.endpoint != frame.endpoint {
        return Vec::new();
    }

    let mut deliveries = Vec::new();
    let transition = |observer: &Arc<dyn GoalObserver>, state| Delivery::Transition {
        observer: observer.clone(),
        state,
        terminal: None,
        result: None,
    };

    match frame.body {
        FrameBody::Status { status, .. } => {
            if let Some(state) = entry.machine.on_status(status) {
                deliveries.push(transition(&entry.observer, state));
            }
        }
        FrameBody::Feedback {
            status, feedback, ..
        } => {
            if let Some(state) = entry.machine.on_status(status) {
                deliveries.push(transition(&entry.observer, state));
            }
            deliveries.push(Delivery::Feedback {
                observer: entry.observer.clone(),
                feedback,
            });
        }
        FrameBody::Result { status, result, .. } => {
            if let Some(state) = entry.machine.on_status(status) {
                deliveries.push(transition(&entry.observer, state));
            }
            if let Some((state, terminal)) = entry.machine.on_result(status) {
                deliveries.push(Delivery::Transition {
                    observer: entry.observer.clone(),
                    state,
                    terminal: Some(terminal),
                    result: Some(result),
                });
            }
            table.remove(&goal_id);
        }
        FrameBody::Goal { .. } | FrameBody::Cancel { .. } | FrameBody::JointState(_) => {}
    }
    deliveries
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcc_types::{GoalStatus, JointState};
    use serde_json::json;
    use std::sync::mpsc;

    /// Observer that forwards every notification to a channel.
    struct ChannelObserver(Mutex<mpsc::Sender<String>>);

    impl GoalObserver for ChannelObserver {
        fn on_transition(
            &self,
            state: CommState,
            terminal: Option<TerminalState>,
            result: Option<&Value>,
        ) {
            let line = match (terminal, result) {
                (Some(t), Some(r)) => format!("{state}:{t}:{r}"),
                _ => state.to_string(),
            };
            let _ = self.0.lock().unwrap().send(line);
        }

        fn on_feedback(&self, feedback: &Value) {
            let _ = self.0.lock().unwrap().send(format!("feedback:{feedback}"));
        }
    }

    fn observer() -> (Arc<ChannelObserver>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel();
        (Arc::new(ChannelObserver(Mutex::new(tx))), rx)
    }

    fn recv(rx: &mpsc::Receiver<String>) -> String {
        rx.recv_timeout(Duration::from_secs(5)).expect("notification")
    }

    /// Reply to the next goal request on `endpoint` with `frames`.
    fn scripted_server(bus: &ActionBus, endpoint: &str, statuses: Vec<GoalStatus>) {
        let mut requests = bus.subscribe_to(Topic::GoalRequests);
        let bus = bus.clone();
        let endpoint = endpoint.to_string();
        bus.advertise(&endpoint);
        thread::spawn(move || {
            let frame = requests.blocking_recv().unwrap();
            let goal_id = frame.body.goal_id().unwrap();
            for status in statuses {
                let body = if status.terminal().is_some() {
                    FrameBody::Result {
                        goal_id,
                        status,
                        result: json!({"success": true}),
                    }
                } else {
                    FrameBody::Status { goal_id, status }
                };
                bus.publish_to(Topic::GoalUpdates, Frame::new(&endpoint, body))
                    .unwrap();
            }
        });
    }

    #[test]
    fn delivers_transitions_and_result() {
        let bus = ActionBus::default();
        let transport = BusTransport::new(bus.clone()).unwrap();
        scripted_server(
            &bus,
            "/arm/trigger",
            vec![
                GoalStatus::Pending,
                GoalStatus::Active,
                GoalStatus::Active,
                GoalStatus::Succeeded,
            ],
        );

        let (obs, rx) = observer();
        let handle = transport
            .send_goal("/arm/trigger", json!({}), obs)
            .unwrap();

        assert_eq!(recv(&rx), "PENDING");
        assert_eq!(recv(&rx), "ACTIVE");
        assert_eq!(recv(&rx), "WAITING_FOR_RESULT");
        assert_eq!(recv(&rx), r#"DONE:SUCCEEDED:{"success":true}"#);
        assert_eq!(handle.comm_state(), CommState::Done);
        assert_eq!(transport.in_flight(), 0);
    }

    #[test]
    fn send_goal_fails_without_server_listener() {
        let bus = ActionBus::default();
        let transport = BusTransport::new(bus).unwrap();
        let (obs, _rx) = observer();
        let err = transport.send_goal("/nobody", json!({}), obs).unwrap_err();
        assert!(matches!(err, ControlError::Transport(_)));
        assert_eq!(transport.in_flight(), 0);
    }

    #[test]
    fn updates_for_other_endpoints_are_ignored() {
        let bus = ActionBus::default();
        let transport = BusTransport::new(bus.clone()).unwrap();
        let _requests = bus.subscribe_to(Topic::GoalRequests);
        let (obs, rx) = observer();
        let handle = transport.send_goal("/arm/a", json!({}), obs).unwrap();

        let wrong = Frame::new(
            "/arm/b",
            FrameBody::Status {
                goal_id: handle.goal_id(),
                status: GoalStatus::Active,
            },
        );
        bus.publish_to(Topic::GoalUpdates, wrong).unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert_eq!(handle.comm_state(), CommState::WaitingForGoalAck);
    }

    #[test]
    fn cancel_publishes_request_and_marks_state() {
        let bus = ActionBus::default();
        let transport = BusTransport::new(bus.clone()).unwrap();
        let mut requests = bus.subscribe_to(Topic::GoalRequests);
        let (obs, _rx) = observer();
        let handle = transport.send_goal("/arm/a", json!({}), obs).unwrap();
        let _goal = requests.blocking_recv().unwrap();

        handle.cancel().unwrap();
        let cancel = requests.blocking_recv().unwrap();
        assert!(matches!(
            cancel.body,
            FrameBody::Cancel { goal_id: Some(id) } if id == handle.goal_id()
        ));
        assert_eq!(handle.comm_state(), CommState::WaitingForCancelAck);
    }

    #[test]
    fn feedback_flood_on_small_bus_loses_nothing() {
        const FEEDBACK: usize = 2_000;
        let bus = ActionBus::new(4);
        let transport = BusTransport::new(bus.clone()).unwrap();
        let mut requests = bus.subscribe_to(Topic::GoalRequests);
        bus.advertise("/arm/traj");

        let server_bus = bus.clone();
        thread::spawn(move || {
            let goal_id = requests.blocking_recv().unwrap().body.goal_id().unwrap();
            for i in 0..FEEDBACK {
                let body = FrameBody::Feedback {
                    goal_id,
                    status: GoalStatus::Active,
                    feedback: json!(i),
                };
                server_bus
                    .publish_to(Topic::GoalUpdates, Frame::new("/arm/traj", body))
                    .unwrap();
            }
            let body = FrameBody::Result {
                goal_id,
                status: GoalStatus::Succeeded,
                result: json!({}),
            };
            server_bus
                .publish_to(Topic::GoalUpdates, Frame::new("/arm/traj", body))
                .unwrap();
        });

        let (obs, rx) = observer();
        transport.send_goal("/arm/traj", json!({}), obs).unwrap();

        let mut feedback = Vec::new();
        let last = loop {
            let line = recv(&rx);
            match line.strip_prefix("feedback:") {
                Some(n) => feedback.push(n.parse::<usize>().unwrap()),
                None if line.starts_with("DONE") => break line,
                None => {}
            }
        };
        assert_eq!(feedback, (0..FEEDBACK).collect::<Vec<_>>());
        assert_eq!(last, "DONE:SUCCEEDED:{}");
        assert_eq!(transport.in_flight(), 0);
    }

    #[test]
    fn lost_updates_fail_every_in_flight_goal() {
        let bus = ActionBus::default();
        let transport = BusTransport::new(bus.clone()).unwrap();
        let _requests = bus.subscribe_to(Topic::GoalRequests);
        let (first, first_rx) = observer();
        let (second, second_rx) = observer();
        transport.send_goal("/arm/a", json!({}), first).unwrap();
        transport.send_goal("/arm/b", json!({}), second).unwrap();

        let deliveries = lose_all(&transport.goals);
        assert_eq!(deliveries.len(), 2);
        for delivery in deliveries {
            delivery.deliver();
        }
        assert_eq!(recv(&first_rx), "DONE");
        assert_eq!(recv(&second_rx), "DONE");
        assert_eq!(transport.in_flight(), 0);
    }

    #[test]
    fn joint_state_subscription_filters_topic() {
        let bus = ActionBus::default();
        let transport = BusTransport::new(bus.clone()).unwrap();
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let _sub = transport
            .subscribe_joint_states(
                "/joint_states",
                Box::new(move |js| {
                    let _ = tx.lock().unwrap().send(js.position.clone());
                }),
            )
            .unwrap();

        let other = JointState::from_positions([("j1", 9.0)]);
        let wanted = JointState::from_positions([("j1", 0.25)]);
        bus.publish_to(
            Topic::JointStates,
            Frame::new("/other", FrameBody::JointState(other)),
        )
        .unwrap();
        bus.publish_to(
            Topic::JointStates,
            Frame::new("/joint_states", FrameBody::JointState(wanted)),
        )
        .unwrap();

        let positions = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(positions, vec![0.25]);
    }
}
