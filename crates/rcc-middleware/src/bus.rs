//! Headless, topic-partitioned publish/subscribe bus for the action protocol.
//!
//! The two action lanes are lossless: every subscriber owns an unbounded
//! [`tokio::sync::mpsc`] queue and sees every frame in publish order, however
//! far behind it falls. The joint state lane is a bounded
//! [`tokio::sync::broadcast`] channel where a slow subscriber skips old
//! frames instead. Receivers can be drained from async code
//! ([`TopicReceiver::recv`]) or from a plain OS thread
//! ([`TopicReceiver::blocking_recv`]).
//!
//! # Topics
//!
//! | Topic | Direction | Delivery | Typical traffic |
//! |---|---|---|---|
//! | [`Topic::GoalRequests`] | client → server | lossless | goal submissions, cancel requests |
//! | [`Topic::GoalUpdates`] | server → client | lossless | status changes, feedback, results |
//! | [`Topic::JointStates`] | publisher → anyone | latest wins | joint state broadcasts |
//!
//! The bus also keeps a registry of advertised action endpoints so that
//! clients can wait for a server to come up before sending goals.

use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use rcc_types::{ControlError, Frame};
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

/// Default joint state channel capacity (frames buffered before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Routing lanes of the action bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Goal submissions and cancel requests sent to action servers.
    GoalRequests,
    /// Status, feedback and result frames sent back by action servers.
    GoalUpdates,
    /// Joint state broadcasts.
    JointStates,
}

/// Fan-out to one unbounded queue per subscriber.
#[derive(Debug, Default)]
struct Lane {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<Frame>>>,
}

impl Lane {
    /// Hand `frame` to every live subscriber; returns how many took it.
    fn send(&self, frame: Frame) -> usize {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(frame.clone()).is_ok());
        subscribers.len()
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<Frame> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }
}

/// Endpoints currently served on the bus.
#[derive(Debug, Default)]
struct ServerRegistry {
    endpoints: Mutex<HashSet<String>>,
    changed: Condvar,
}

/// Shared action bus. Clone it cheaply – all clones share the same underlying
/// channels and server registry.
#[derive(Clone, Debug)]
pub struct ActionBus {
    goal_requests: Arc<Lane>,
    goal_updates: Arc<Lane>,
    joint_states: broadcast::Sender<Frame>,
    servers: Arc<ServerRegistry>,
}

impl ActionBus {
    /// Create a new bus whose joint state lane buffers `capacity` frames.
    pub fn new(capacity: usize) -> Self {
        let (joint_states, _) = broadcast::channel(capacity);
        Self {
            goal_requests: Arc::default(),
            goal_updates: Arc::default(),
            joint_states,
            servers: Arc::default(),
        }
    }

    // -----------------------------------------------------------------------
    // Publish / subscribe
    // -----------------------------------------------------------------------

    /// Publish `frame` to the given [`Topic`].
    ///
    /// Returns the number of receivers that were handed the frame, or
    /// [`ControlError::Transport`] when nobody is listening on the topic.
    pub fn publish_to(&self, topic: Topic, frame: Frame) -> Result<usize, ControlError> {
        let no_subscribers =
            || ControlError::Transport(format!("No subscribers for topic {topic:?}"));
        match self.action_lane(topic) {
            Some(lane) => match lane.send(frame) {
                0 => Err(no_subscribers()),
                n => Ok(n),
            },
            None => self.joint_states.send(frame).map_err(|_| no_subscribers()),
        }
    }

    /// Subscribe to a specific [`Topic`].
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        let receiver = match self.action_lane(topic) {
            Some(lane) => Receiver::Lossless(lane.subscribe()),
            None => Receiver::Lossy(self.joint_states.subscribe()),
        };
        TopicReceiver { topic, receiver }
    }

    fn action_lane(&self, topic: Topic) -> Option<&Lane> {
        match topic {
            Topic::GoalRequests => Some(&self.goal_requests),
            Topic::GoalUpdates => Some(&self.goal_updates),
            Topic::JointStates => None,
        }
    }

    // -----------------------------------------------------------------------
    // Server registry
    // -----------------------------------------------------------------------
    /// Mark `endpoint` as served and wake any client waiting for it.
    pub fn advertise(&self, endpoint: &str) {
        let mut endpoints = self
            .servers
            .endpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        endpoints.insert(endpoint.to_string());
        debug!(endpoint, "action server advertised");
        self.servers.changed.notify_all();
    }

    /// Remove `endpoint` from the registry.
    pub fn withdraw(&self, endpoint: &str) {
        let mut endpoints = self
            .servers
            .endpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if endpoints.remove(endpoint) {
            debug!(endpoint, "action server withdrawn");
        }
    }

    /// `true` when a server currently advertises `endpoint`.
    pub fn is_advertised(&self, endpoint: &str) -> bool {
        self.servers
            .endpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(endpoint)
    }

    /// Block until `endpoint` is advertised or `timeout` elapses.
    ///
    /// A zero timeout performs a single non-blocking check.
    pub fn wait_for_server(&self, endpoint: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut endpoints = self
            .servers
            .endpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        loop {
            if endpoints.contains(endpoint) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            endpoints = self
                .servers
                .changed
                .wait_timeout(endpoints, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

impl Default for ActionBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Topic receiver
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Receiver {
    Lossless(mpsc::UnboundedReceiver<Frame>),
    Lossy(broadcast::Receiver<Frame>),
}

/// A receiver bound to a single [`Topic`].
///
/// Obtained via [`ActionBus::subscribe_to`].
#[derive(Debug)]
pub struct TopicReceiver {
    topic: Topic,
    receiver: Receiver,
}

impl TopicReceiver {
    /// Wait for the next frame on this topic.
    ///
    /// Returns:
    /// * `Ok(frame)` – a successfully received frame.
    /// * `Err(RecvError::Lagged(n))` – joint states only: the subscriber fell
    ///   behind and `n` frames were dropped.
    /// * `Err(RecvError::Closed)` – the bus has shut down.
    pub async fn recv(&mut self) -> Result<Frame, broadcast::error::RecvError> {
        match &mut self.receiver {
            Receiver::Lossless(rx) => rx.recv().await.ok_or(broadcast::error::RecvError::Closed),
            Receiver::Lossy(rx) => rx.recv().await,
        }
    }

    /// Blocking variant of [`recv`](Self::recv) for dedicated OS threads.
    ///
    /// Must not be called from within an async runtime.
    pub fn blocking_recv(&mut self) -> Result<Frame, broadcast::error::RecvError> {
        match &mut self.receiver {
            Receiver::Lossless(rx) => rx.blocking_recv().ok_or(broadcast::error::RecvError::Closed),
            Receiver::Lossy(rx) => rx.blocking_recv(),
        }
    }

    /// The [`Topic`] this receiver is bound to.
    pub fn topic(&self) -> Topic {
        self.topic
    }
}
