//! [`TransitionBridge`] – turns goal lifecycle notifications into exactly
//! one resolution of an [`ActionFuture`].
//!
//! One bridge is created per submitted goal and handed to the transport as
//! its [`GoalObserver`]. The bridge remembers the last comm state it saw:
//! repeated notifications are ignored and the first `DONE` is classified by
//! a [`Classifier`] and applied to the future. `DONE` is absorbing.

use std::sync::{Mutex, PoisonError};

use rcc_middleware::GoalObserver;
use rcc_types::{CommState, CommandFailed, TerminalState};
use serde_json::Value;
use tracing::debug;

use crate::future::ActionFuture;

/// Outcome of a finished goal as seen by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification<T> {
    Succeeded(T),
    Failed(CommandFailed),
    Cancelled,
}

/// Decides how a finished goal resolves its future.
pub trait Classifier: Send + Sync {
    type Output: Clone + Send + 'static;

    /// Classify a goal that reached `DONE`.
    ///
    /// `result` is the raw result payload, `None` if the server sent none.
    fn classify(
        &self,
        terminal: Option<TerminalState>,
        result: Option<&Value>,
    ) -> Classification<Self::Output>;

    /// Feedback received while the goal is still running.
    fn on_feedback(&self, _feedback: &Value) {}
}

pub struct TransitionBridge<C: Classifier> {
    future: ActionFuture<C::Output>,
    classifier: C,
    prev_state: Mutex<CommState>,
}

impl<C: Classifier> TransitionBridge<C> {
    pub fn new(future: ActionFuture<C::Output>, classifier: C) -> Self {
        Self {
            future,
            classifier,
            prev_state: Mutex::new(CommState::Pending),
        }
    }

    pub fn future(&self) -> &ActionFuture<C::Output> {
        &self.future
    }

    pub fn classifier(&self) -> &C {
        &self.classifier
    }

    fn is_done(&self) -> bool {
        *self.prev_state.lock().unwrap_or_else(PoisonError::into_inner) == CommState::Done
    }
}

impl<C: Classifier> GoalObserver for TransitionBridge<C> {
    fn on_transition(
        &self,
        state: CommState,
        terminal: Option<TerminalState>,
        result: Option<&Value>,
    ) {
        {
            let mut prev = self.prev_state.lock().unwrap_or_else(PoisonError::into_inner);
            if *prev == state || *prev == CommState::Done {
                return;
            }
            *prev = state;
        }
        debug!(command = %self.future.label(), %state, "goal transition");
        if state != CommState::Done {
            return;
        }

        let resolved = match self.classifier.classify(terminal, result) {
            Classification::Succeeded(output) => self.future.set_result(output),
            Classification::Failed(failure) => self.future.set_exception(failure),
            Classification::Cancelled => self.future.set_cancelled(),
        };
        if let Err(e) = resolved {
            debug!(command = %self.future.label(), error = %e, "future was resolved elsewhere");
        }
    }

    fn on_feedback(&self, feedback: &Value) {
        if !self.is_done() {
            self.classifier.on_feedback(feedback);
        }
    }
}
