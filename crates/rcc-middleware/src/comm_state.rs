//! [`CommStateMachine`] – client-side comm state tracking for one goal.
//!
//! Server statuses may arrive late, out of order, or more than once. The
//! machine only ever moves forward (by [`CommState::rank`]) and only reaches
//! [`CommState::Done`] once the result itself has been received.

use rcc_types::{CommState, GoalStatus, TerminalState};

#[derive(Debug, Clone)]
pub struct CommStateMachine {
    state: CommState,
    terminal: Option<TerminalState>,
}

impl Default for CommStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl CommStateMachine {
    /// A machine for a goal that has just been sent.
    pub fn new() -> Self {
        Self {
            state: CommState::WaitingForGoalAck,
            terminal: None,
        }
    }

    pub fn state(&self) -> CommState {
        self.state
    }

    /// The terminal state, once [`CommState::Done`] has been reached.
    pub fn terminal(&self) -> Option<TerminalState> {
        self.terminal
    }

    /// Apply a status report. Returns the new comm state when it changed.
    pub fn on_status(&mut self, status: GoalStatus) -> Option<CommState> {
        self.advance(status.comm_state())
    }

    /// Record that the client asked for cancellation.
    pub fn on_cancel_requested(&mut self) -> Option<CommState> {
        match self.state {
            CommState::WaitingForGoalAck | CommState::Pending | CommState::Active => {
                self.state = CommState::WaitingForCancelAck;
                Some(self.state)
            }
            _ => None,
        }
    }

    /// Apply the goal's result. The first result moves the machine to
    /// [`CommState::Done`]; later ones are ignored.
    pub fn on_result(&mut self, status: GoalStatus) -> Option<(CommState, TerminalState)> {
        if self.state == CommState::Done {
            return None;
        }
        let terminal = status.terminal().unwrap_or(TerminalState::Lost);
        self.state = CommState::Done;
        self.terminal = Some(terminal);
        Some((self.state, terminal))
    }

    fn advance(&mut self, target: CommState) -> Option<CommState> {
        if self.state == CommState::Done || target.rank() <= self.state.rank() {
            return None;
        }
        self.state = target;
        Some(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_waiting_for_ack() {
        let machine = CommStateMachine::new();
        assert_eq!(machine.state(), CommState::WaitingForGoalAck);
        assert_eq!(machine.terminal(), None);
    }

    #[test]
    fn statuses_move_forward_only() {
        let mut machine = CommStateMachine::new();
        assert_eq!(machine.on_status(GoalStatus::Active), Some(CommState::Active));
        assert_eq!(machine.on_status(GoalStatus::Pending), None);
        assert_eq!(machine.on_status(GoalStatus::Active), None);
        assert_eq!(
            machine.on_status(GoalStatus::Succeeded),
            Some(CommState::WaitingForResult)
        );
        assert_eq!(machine.state(), CommState::WaitingForResult);
    }

    #[test]
    fn result_reaches_done_once() {
        let mut machine = CommStateMachine::new();
        assert_eq!(
            machine.on_result(GoalStatus::Aborted),
            Some((CommState::Done, TerminalState::Aborted))
        );
        assert_eq!(machine.on_result(GoalStatus::Succeeded), None);
        assert_eq!(machine.on_status(GoalStatus::Active), None);
        assert_eq!(machine.terminal(), Some(TerminalState::Aborted));
    }

    #[test]
    fn non_terminal_result_status_is_lost() {
        let mut machine = CommStateMachine::new();
        assert_eq!(
            machine.on_result(GoalStatus::Active),
            Some((CommState::Done, TerminalState::Lost))
        );
    }

    #[test]
    fn cancel_request_only_before_cancel_states() {
        let mut machine = CommStateMachine::new();
        machine.on_status(GoalStatus::Active);
        assert_eq!(
            machine.on_cancel_requested(),
            Some(CommState::WaitingForCancelAck)
        );
        assert_eq!(
            machine.on_status(GoalStatus::Preempting),
            Some(CommState::Preempting)
        );
        assert_eq!(machine.on_cancel_requested(), None);
    }
}
