//! The generic command client.
//!
//! Every command the client can issue is a [`CommandKind`]: it names its
//! endpoint, builds its goal, tells success from failure and produces its
//! output. [`CommandClient`] does the rest – submission, the per-goal
//! [`TransitionBridge`] and the [`CommandClassifier`] that applies the
//! shared classification rules.

use std::marker::PhantomData;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rcc_middleware::ActionTransport;
use rcc_types::{CommandFailed, CommandPayload, ControlError, TerminalState};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::bridge::{Classification, Classifier, TransitionBridge};
use crate::future::ActionFuture;

/// A remote command reachable through the action protocol.
pub trait CommandKind: Send + Sync + 'static {
    /// Name used in failure messages and logs.
    const ACTION: &'static str;

    type Params;
    type Goal: Serialize;
    type Result: DeserializeOwned;
    type Output: Clone + Send + 'static;

    /// Fully qualified endpoint for `controller` under `namespace`.
    fn endpoint(namespace: &str, controller: &str) -> String;

    fn goal(params: &Self::Params) -> Self::Goal;

    /// What the caller asked for, echoed back in failures.
    fn requested(_params: &Self::Params) -> CommandPayload {
        CommandPayload::None
    }

    /// What has been executed before the server reports anything.
    fn initial_executed(_params: &Self::Params) -> CommandPayload {
        CommandPayload::None
    }

    /// Fold one feedback message into the executed payload.
    fn record_feedback(_feedback: &Value, _executed: &mut CommandPayload) {}

    /// Kind-specific success check for a `SUCCEEDED` goal.
    fn succeeded(result: &Self::Result) -> bool;

    /// Short description of a result for failure messages.
    fn describe(result: &Self::Result) -> String;

    fn output(result: Self::Result, executed: &CommandPayload) -> Self::Output;
}

/// Join a namespace and name segments into an endpoint name.
pub fn endpoint_name(namespace: &str, segments: &[&str]) -> String {
    let mut name = namespace.trim_end_matches('/').to_string();
    for segment in segments {
        name.push('/');
        name.push_str(segment.trim_matches('/'));
    }
    name
}

/// The standard classification rules, shared by every [`CommandKind`].
///
/// | Terminal state | Result | Outcome |
/// |---|---|---|
/// | `SUCCEEDED` | kind reports success | `Succeeded(output)` |
/// | `REJECTED`, `RECALLED`, `PREEMPTED` | any | `Cancelled` |
/// | anything else | any | `Failed` |
pub struct CommandClassifier<K: CommandKind> {
    requested: CommandPayload,
    executed: Mutex<CommandPayload>,
    _kind: PhantomData<fn() -> K>,
}

impl<K: CommandKind> CommandClassifier<K> {
    pub fn new(params: &K::Params) -> Self {
        Self {
            requested: K::requested(params),
            executed: Mutex::new(K::initial_executed(params)),
            _kind: PhantomData,
        }
    }

    /// Snapshot of what has been executed so far.
    pub fn executed(&self) -> CommandPayload {
        self.executed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn decode(result: Option<&Value>) -> Option<K::Result> {
        let value = result?;
        match serde_json::from_value(value.clone()) {
            Ok(result) => Some(result),
            Err(e) => {
                debug!(action = K::ACTION, error = %e, "undecodable result");
                None
            }
        }
    }
}

impl<K: CommandKind> Classifier for CommandClassifier<K> {
    type Output = K::Output;

    fn classify(
        &self,
        terminal: Option<TerminalState>,
        result: Option<&Value>,
    ) -> Classification<K::Output> {
        let terminal = terminal.unwrap_or(TerminalState::Lost);
        let result = Self::decode(result);
        let executed = self.executed();

        match result {
            Some(result) if terminal == TerminalState::Succeeded && K::succeeded(&result) => {
                Classification::Succeeded(K::output(result, &executed))
            }
            _ if terminal.is_cancellation() => Classification::Cancelled,
            result => {
                let description = result
                    .as_ref()
                    .map(K::describe)
                    .unwrap_or_else(|| "no result".to_string());
                Classification::Failed(CommandFailed {
                    message: format!("{} action failed ({terminal}): {description}", K::ACTION),
                    terminal_state: terminal,
                    requested: self.requested.clone(),
                    executed,
                })
            }
        }
    }

    fn on_feedback(&self, feedback: &Value) {
        let mut executed = self.executed.lock().unwrap_or_else(PoisonError::into_inner);
        K::record_feedback(feedback, &mut executed);
    }
}

/// Client for one command endpoint.
pub struct CommandClient<K: CommandKind> {
    transport: Arc<dyn ActionTransport>,
    endpoint: String,
    _kind: PhantomData<fn() -> K>,
}

impl<K: CommandKind> CommandClient<K> {
    /// Bind to `controller` under `namespace`, waiting up to `timeout` for
    /// its server.
    pub fn connect(
        transport: Arc<dyn ActionTransport>,
        namespace: &str,
        controller: &str,
        timeout: Duration,
    ) -> Result<Self, ControlError> {
        let endpoint = K::endpoint(namespace, controller);
        if !transport.wait_for_server(&endpoint, timeout) {
            return Err(ControlError::Connection { endpoint, timeout });
        }
        debug!(action = K::ACTION, endpoint = %endpoint, "connected");
        Ok(Self {
            transport,
            endpoint,
            _kind: PhantomData,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Submit the command and return its future without waiting.
    ///
    /// Errors here are synchronous ones (encoding, transport refusal); the
    /// command's own outcome is delivered through the future.
    #[instrument(skip(self, params), fields(action = K::ACTION, endpoint = %self.endpoint))]
    pub fn execute(&self, params: &K::Params) -> Result<ActionFuture<K::Output>, ControlError> {
        let goal = serde_json::to_value(K::goal(params))?;
        let future = ActionFuture::new(K::ACTION);
        let bridge = Arc::new(TransitionBridge::new(
            future.clone(),
            CommandClassifier::<K>::new(params),
        ));

        let handle = self.transport.send_goal(&self.endpoint, goal, bridge)?;
        info!(goal_id = %handle.goal_id(), "command submitted");
        future.attach(handle);
        Ok(future)
    }
}
