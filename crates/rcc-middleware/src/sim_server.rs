//! [`SimActionServer`] – an in-process action server for demos and tests.
//!
//! The server listens for goal requests addressed to its endpoint and runs
//! each goal on its own worker thread through a [`GoalExecutor`]. Every goal
//! follows the protocol lifecycle: `PENDING`, then `ACTIVE`, then a terminal
//! result. A goal cancelled before it becomes active is `RECALLED` without
//! ever reaching the executor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use rcc_types::{ControlError, Frame, FrameBody, GoalId, GoalStatus};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::bus::{ActionBus, Topic, TopicReceiver};

/// How a goal ended, together with the result payload sent to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Succeeded(Value),
    Aborted(Value),
    Rejected(Value),
    Preempted(Value),
}

impl Verdict {
    fn status(&self) -> GoalStatus {
        match self {
            Verdict::Succeeded(_) => GoalStatus::Succeeded,
            Verdict::Aborted(_) => GoalStatus::Aborted,
            Verdict::Rejected(_) => GoalStatus::Rejected,
            Verdict::Preempted(_) => GoalStatus::Preempted,
        }
    }

    fn into_result(self) -> Value {
        match self {
            Verdict::Succeeded(v)
            | Verdict::Aborted(v)
            | Verdict::Rejected(v)
            | Verdict::Preempted(v) => v,
        }
    }
}

/// Executes one goal to completion.
pub trait GoalExecutor: Send + Sync {
    fn execute(&self, goal: &Value, ctx: &GoalContext) -> Verdict;
}

impl<F> GoalExecutor for F
where
    F: Fn(&Value, &GoalContext) -> Verdict + Send + Sync,
{
    fn execute(&self, goal: &Value, ctx: &GoalContext) -> Verdict {
        self(goal, ctx)
    }
}

/// Per-goal view handed to a [`GoalExecutor`].
pub struct GoalContext {
    goal_id: GoalId,
    endpoint: String,
    bus: ActionBus,
    cancel: Arc<AtomicBool>,
}

impl GoalContext {
    pub fn goal_id(&self) -> GoalId {
        self.goal_id
    }

    /// `true` once the client has asked for this goal to be cancelled.
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Block until a cancel request arrives or `timeout` elapses.
    ///
    /// Returns `true` when the goal was cancelled.
    pub fn wait_for_cancel(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.is_cancel_requested() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        true
    }

    /// Report progress to the client.
    pub fn publish_feedback(&self, feedback: Value) {
        self.publish(FrameBody::Feedback {
            goal_id: self.goal_id,
            status: GoalStatus::Active,
            feedback,
        });
    }

    fn publish(&self, body: FrameBody) {
        if let Err(e) = self
            .bus
            .publish_to(Topic::GoalUpdates, Frame::new(&self.endpoint, body))
        {
            debug!(endpoint = %self.endpoint, error = %e, "goal update dropped");
        }
    }
}

type CancelFlags = Arc<Mutex<HashMap<GoalId, Arc<AtomicBool>>>>;

/// Builder for [`SimActionServer`].
pub struct SimServerBuilder {
    endpoint: String,
    activation_delay: Duration,
}

impl SimServerBuilder {
    /// Hold each goal in `PENDING` for `delay` before activating it. A
    /// cancel arriving in that window recalls the goal.
    pub fn activation_delay(mut self, delay: Duration) -> Self {
        self.activation_delay = delay;
        self
    }

    /// Start serving on `bus`.
    pub fn spawn(
        self,
        bus: &ActionBus,
        executor: impl GoalExecutor + 'static,
    ) -> Result<SimActionServer, ControlError> {
        let requests = bus.subscribe_to(Topic::GoalRequests);
        let stop = Arc::new(AtomicBool::new(false));
        let worker = Worker {
            endpoint: self.endpoint.clone(),
            bus: bus.clone(),
            executor: Arc::new(executor),
            activation_delay: self.activation_delay,
            cancels: CancelFlags::default(),
            stop: stop.clone(),
        };

        thread::Builder::new()
            .name(format!("rcc-sim{}", self.endpoint))
            .spawn(move || worker.serve(requests))
            .map_err(|e| ControlError::Transport(format!("failed to spawn sim server: {e}")))?;

        bus.advertise(&self.endpoint);
        info!(endpoint = %self.endpoint, "sim action server started");
        Ok(SimActionServer {
            endpoint: self.endpoint,
            bus: bus.clone(),
            stop,
        })
    }
}

/// A running simulated action server. Dropping it withdraws the endpoint and
/// cancels every goal still in flight.
pub struct SimActionServer {
    endpoint: String,
    bus: ActionBus,
    stop: Arc<AtomicBool>,
}

impl SimActionServer {
    pub fn builder(endpoint: impl Into<String>) -> SimServerBuilder {
        SimServerBuilder {
            endpoint: endpoint.into(),
            activation_delay: Duration::ZERO,
        }
    }

    /// Start a server with default settings.
    pub fn spawn(
        bus: &ActionBus,
        endpoint: impl Into<String>,
        executor: impl GoalExecutor + 'static,
    ) -> Result<Self, ControlError> {
        Self::builder(endpoint).spawn(bus, executor)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Drop for SimActionServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.bus.withdraw(&self.endpoint);
        // Wakes the serve loop so it can observe the stop flag.
        let _ = self.bus.publish_to(
            Topic::GoalRequests,
            Frame::new(&self.endpoint, FrameBody::Cancel { goal_id: None }),
        );
    }
}

struct Worker {
    endpoint: String,
    bus: ActionBus,
    executor: Arc<dyn GoalExecutor>,
    activation_delay: Duration,
    cancels: CancelFlags,
    stop: Arc<AtomicBool>,
}

impl Worker {
    fn serve(self, mut requests: TopicReceiver) {
        loop {
            let frame = match requests.blocking_recv() {
                Ok(frame) => frame,
                Err(RecvError::Lagged(n)) => {
                    warn!(endpoint = %self.endpoint, lagged_by = n, "sim server lagged");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            if frame.endpoint != self.endpoint {
                continue;
            }
            match frame.body {
                FrameBody::Goal { goal_id, goal } => self.start_goal(goal_id, goal),
                FrameBody::Cancel { goal_id } => self.cancel(goal_id),
                _ => {}
            }
            if self.stop.load(Ordering::SeqCst) {
                break;
            }
        }
        debug!(endpoint = %self.endpoint, "sim server stopped");
    }

    fn cancel(&self, goal_id: Option<GoalId>) {
        let cancels = self.cancels.lock().unwrap_or_else(PoisonError::into_inner);
        match goal_id {
            Some(id) => {
                if let Some(flag) = cancels.get(&id) {
                    flag.store(true, Ordering::SeqCst);
                }
            }
            None => cancels
                .values()
                .for_each(|flag| flag.store(true, Ordering::SeqCst)),
        }
    }

    fn start_goal(&self, goal_id: GoalId, goal: Value) {
        let cancel = Arc::new(AtomicBool::new(false));
        self.cancels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(goal_id, cancel.clone());

        let ctx = GoalContext {
            goal_id,
            endpoint: self.endpoint.clone(),
            bus: self.bus.clone(),
            cancel,
        };
        let executor = self.executor.clone();
        let cancels = self.cancels.clone();
        let delay = self.activation_delay;

        let spawned = thread::Builder::new()
            .name(format!("rcc-goal-{goal_id}"))
            .spawn(move || {
                run_goal(&ctx, executor.as_ref(), goal, delay);
                cancels
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&goal_id);
            });
        if let Err(e) = spawned {
            warn!(endpoint = %self.endpoint, %goal_id, error = %e, "could not start goal worker");
        }
    }
}

fn run_goal(ctx: &GoalContext, executor: &dyn GoalExecutor, goal: Value, delay: Duration) {
    ctx.publish(FrameBody::Status {
        goal_id: ctx.goal_id,
        status: GoalStatus::Pending,
    });

    if ctx.wait_for_cancel(delay) {
        debug!(endpoint = %ctx.endpoint, goal_id = %ctx.goal_id, "goal recalled");
        ctx.publish(FrameBody::Result {
            goal_id: ctx.goal_id,
            status: GoalStatus::Recalled,
            result: Value::Null,
        });
        return;
    }

    ctx.publish(FrameBody::Status {
        goal_id: ctx.goal_id,
        status: GoalStatus::Active,
    });
    let verdict = executor.execute(&goal, ctx);
    let status = verdict.status();
    debug!(endpoint = %ctx.endpoint, goal_id = %ctx.goal_id, ?status, "goal finished");
    ctx.publish(FrameBody::Result {
        goal_id: ctx.goal_id,
        status,
        result: verdict.into_result(),
    });
}
