//! [`ActionFuture`] – the eventual outcome of one remote command.
//!
//! A future starts `PENDING` and moves to exactly one of `SUCCEEDED`,
//! `FAILED` or `CANCELLED`. The move happens once, under the future's mutex;
//! waiters are woken through a [`Condvar`] and done-callbacks run afterwards,
//! with the lock released, on the resolving thread.
//!
//! # Example
//!
//! ```
//! use rcc_client::future::{ActionFuture, FutureState};
//!
//! let fut: ActionFuture<u32> = ActionFuture::new("Example");
//! let seen = fut.clone();
//! fut.set_result(7).unwrap();
//! assert_eq!(seen.state(), FutureState::Succeeded);
//! assert_eq!(seen.wait().unwrap(), 7);
//! ```

use std::any::Any;
use std::fmt;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use rcc_middleware::ActionHandle;
use rcc_types::{CommandFailed, ControlError, GoalId};
use tracing::{debug, error, warn};

/// Observable state of an [`ActionFuture`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutureState {
    Pending,
    Succeeded,
    Failed,
    Cancelled,
}

impl fmt::Display for FutureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FutureState::Pending => "PENDING",
            FutureState::Succeeded => "SUCCEEDED",
            FutureState::Failed => "FAILED",
            FutureState::Cancelled => "CANCELLED",
        };
        f.write_str(name)
    }
}

type DoneCallback<T> = Box<dyn FnOnce(&ActionFuture<T>) + Send>;

enum Slot<T> {
    Pending(Vec<DoneCallback<T>>),
    Succeeded(T),
    Failed(CommandFailed),
    Cancelled,
}

impl<T> Slot<T> {
    fn state(&self) -> FutureState {
        match self {
            Slot::Pending(_) => FutureState::Pending,
            Slot::Succeeded(_) => FutureState::Succeeded,
            Slot::Failed(_) => FutureState::Failed,
            Slot::Cancelled => FutureState::Cancelled,
        }
    }

    fn is_pending(&self) -> bool {
        matches!(self, Slot::Pending(_))
    }
}

impl<T: Clone> Slot<T> {
    /// The outcome of a resolved slot.
    fn outcome(&self) -> Option<Result<T, ControlError>> {
        match self {
            Slot::Pending(_) => None,
            Slot::Succeeded(value) => Some(Ok(value.clone())),
            Slot::Failed(failure) => Some(Err(ControlError::CommandFailed(failure.clone()))),
            Slot::Cancelled => Some(Err(ControlError::Cancelled)),
        }
    }
}

struct Shared<T> {
    label: String,
    slot: Mutex<Slot<T>>,
    resolved: Condvar,
    handle: OnceLock<ActionHandle>,
    observed: AtomicBool,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        if self.observed.load(Ordering::SeqCst) {
            return;
        }
        let slot = self.slot.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Slot::Failed(failure) = slot {
            warn!(
                command = %self.label,
                terminal_state = %failure.terminal_state,
                failure = %failure,
                "command failed but its outcome was never observed"
            );
        }
    }
}

/// Shared handle to the eventual outcome of a command. Clones refer to the
/// same outcome.
pub struct ActionFuture<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for ActionFuture<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> fmt::Debug for ActionFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionFuture")
            .field("command", &self.shared.label)
            .field("state", &self.shared.lock().state())
            .field("goal_id", &self.shared.handle.get().map(ActionHandle::goal_id))
            .finish()
    }
}

impl<T: Clone + Send + 'static> ActionFuture<T> {
    /// A pending future. `label` names the command in logs.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                label: label.into(),
                slot: Mutex::new(Slot::Pending(Vec::new())),
                resolved: Condvar::new(),
                handle: OnceLock::new(),
                observed: AtomicBool::new(false),
            }),
        }
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }

    // -----------------------------------------------------------------------
    // Goal handle
    // -----------------------------------------------------------------------

    /// Attach the transport handle of the submitted goal. Only the first
    /// attachment sticks.
    pub(crate) fn attach(&self, handle: ActionHandle) {
        if self.shared.handle.set(handle).is_err() {
            debug!(command = %self.shared.label, "goal handle already attached");
        }
    }

    /// The transport handle, once the goal has been submitted.
    pub fn handle(&self) -> Option<&ActionHandle> {
        self.shared.handle.get()
    }

    pub fn goal_id(&self) -> Option<GoalId> {
        self.handle().map(ActionHandle::goal_id)
    }

    /// Ask the remote side to cancel the command.
    ///
    /// Does not change the future's state: it becomes `CANCELLED` only if
    /// the server later confirms the cancellation.
    pub fn cancel(&self) -> Result<(), ControlError> {
        self.handle().ok_or(ControlError::NotSubmitted)?.cancel()
    }

    // -----------------------------------------------------------------------
    // State queries
    // -----------------------------------------------------------------------

    pub fn state(&self) -> FutureState {
        let state = self.shared.lock().state();
        if state != FutureState::Pending {
            self.mark_observed();
        }
        state
    }

    /// `true` once the future has left `PENDING`.
    pub fn done(&self) -> bool {
        self.state() != FutureState::Pending
    }

    pub fn cancelled(&self) -> bool {
        self.state() == FutureState::Cancelled
    }

    /// The outcome without blocking, or `None` while pending.
    pub fn try_result(&self) -> Option<Result<T, ControlError>> {
        let outcome = self.shared.lock().outcome();
        if outcome.is_some() {
            self.mark_observed();
        }
        outcome
    }

    /// Block until the future resolves.
    pub fn wait(&self) -> Result<T, ControlError> {
        self.mark_observed();
        let guard = self
            .shared
            .resolved
            .wait_while(self.shared.lock(), |slot| slot.is_pending())
            .unwrap_or_else(PoisonError::into_inner);
        guard.outcome().unwrap_or(Err(ControlError::Cancelled))
    }

    /// Block until the future resolves or `timeout` elapses, in which case
    /// [`ControlError::Timeout`] is returned and the future stays pending.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<T, ControlError> {
        let (guard, _) = self
            .shared
            .resolved
            .wait_timeout_while(self.shared.lock(), timeout, |slot| slot.is_pending())
            .unwrap_or_else(PoisonError::into_inner);
        let outcome = guard.outcome();
        drop(guard);
        match outcome {
            Some(outcome) => {
                self.mark_observed();
                outcome
            }
            None => Err(ControlError::Timeout(timeout)),
        }
    }

    /// Like [`wait_timeout`](Self::wait_timeout), but asks the server to
    /// cancel the command when the timeout expires.
    pub fn wait_or_cancel(&self, timeout: Duration) -> Result<T, ControlError> {
        let outcome = self.wait_timeout(timeout);
        if matches!(outcome, Err(ControlError::Timeout(_))) {
            if let Err(e) = self.cancel() {
                debug!(command = %self.shared.label, error = %e, "cancel after timeout failed");
            }
        }
        outcome
    }

    /// The failure the command ended with.
    ///
    /// Waits like [`wait`](Self::wait) (or [`wait_timeout`](Self::wait_timeout)
    /// when `timeout` is given). Returns `Ok(None)` for a successful command
    /// and `Err(ControlError::Cancelled)` for a cancelled one.
    pub fn exception(&self, timeout: Option<Duration>) -> Result<Option<CommandFailed>, ControlError> {
        let outcome = match timeout {
            Some(timeout) => self.wait_timeout(timeout),
            None => self.wait(),
        };
        match outcome {
            Ok(_) => Ok(None),
            Err(ControlError::CommandFailed(failure)) => Ok(Some(failure)),
            Err(other) => Err(other),
        }
    }

    // -----------------------------------------------------------------------
    // Resolution
    // -----------------------------------------------------------------------

    pub fn set_result(&self, value: T) -> Result<(), ControlError> {
        self.resolve(Slot::Succeeded(value))
    }

    pub fn set_exception(&self, failure: CommandFailed) -> Result<(), ControlError> {
        self.resolve(Slot::Failed(failure))
    }

    pub fn set_cancelled(&self) -> Result<(), ControlError> {
        self.resolve(Slot::Cancelled)
    }

    /// Run `callback` once the future resolves.
    ///
    /// If the future is already resolved the callback runs immediately on
    /// the calling thread.
    pub fn add_done_callback(&self, callback: impl FnOnce(&ActionFuture<T>) + Send + 'static) {
        let mut slot = self.shared.lock();
        if let Slot::Pending(callbacks) = &mut *slot {
            callbacks.push(Box::new(callback));
            return;
        }
        drop(slot);
        self.run_callback(Box::new(callback));
    }

    fn resolve(&self, resolved: Slot<T>) -> Result<(), ControlError> {
        let state = resolved.state();
        let callbacks = {
            let mut slot = self.shared.lock();
            let Slot::Pending(callbacks) = &mut *slot else {
                return Err(ControlError::AlreadyResolved);
            };
            let callbacks = mem::take(callbacks);
            *slot = resolved;
            callbacks
        };
        self.shared.resolved.notify_all();
        debug!(command = %self.shared.label, %state, "future resolved");

        for callback in callbacks {
            self.run_callback(callback);
        }
        Ok(())
    }

    fn run_callback(&self, callback: DoneCallback<T>) {
        self.mark_observed();
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(self))) {
            error!(
                command = %self.shared.label,
                panic = panic_message(payload.as_ref()),
                "done callback panicked"
            );
        }
    }

    fn mark_observed(&self) {
        self.shared.observed.store(true, Ordering::SeqCst);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic payload>")
}
