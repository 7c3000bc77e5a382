//! Controller manager access and resource-aware controller switching.
//!
//! [`ControllerSwitcher`] starts a set of requested controllers and stops
//! exactly those running controllers that would fight them over hardware
//! resources. The switch can be reverted with
//! [`unswitch`](ControllerSwitcher::unswitch), or scoped with
//! [`engage`](ControllerSwitcher::engage), which reverts when the returned
//! [`SwitchGuard`] drops.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use rcc_middleware::ActionTransport;
use rcc_types::{ControlError, ControllerState, Strictness, TerminalState};
use tracing::{error, info};

use crate::commands::{ListControllersClient, SwitchControllersClient, SwitchRequest};

/// Default bound on a single controller manager call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

pub trait ControllerManager: Send + Sync {
    fn list_controllers(&self) -> Result<Vec<ControllerState>, ControlError>;

    /// Returns `false` when the manager refused the switch.
    fn switch_controllers(
        &self,
        start: &[String],
        stop: &[String],
        strictness: Strictness,
    ) -> Result<bool, ControlError>;
}

/// [`ControllerManager`] reached through the action protocol.
pub struct ControllerManagerClient {
    list: ListControllersClient,
    switch: SwitchControllersClient,
    call_timeout: Duration,
}

impl ControllerManagerClient {
    /// Connect to the controller manager under `namespace`.
    pub fn connect(
        transport: Arc<dyn ActionTransport>,
        namespace: &str,
        timeout: Duration,
    ) -> Result<Self, ControlError> {
        Ok(Self {
            list: ListControllersClient::connect(transport.clone(), namespace, "", timeout)?,
            switch: SwitchControllersClient::connect(transport, namespace, "", timeout)?,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        })
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// A switcher for `controllers`.
    pub fn request<S: Into<String>>(
        &self,
        controllers: impl IntoIterator<Item = S>,
    ) -> ControllerSwitcher<'_> {
        ControllerSwitcher::new(self, controllers)
    }
}

impl ControllerManager for ControllerManagerClient {
    fn list_controllers(&self) -> Result<Vec<ControllerState>, ControlError> {
        self.list.execute(&())?.wait_or_cancel(self.call_timeout)
    }

    fn switch_controllers(
        &self,
        start: &[String],
        stop: &[String],
        strictness: Strictness,
    ) -> Result<bool, ControlError> {
        let request = SwitchRequest {
            start: start.to_vec(),
            stop: stop.to_vec(),
            strictness,
        };
        match self.switch.execute(&request)?.wait_or_cancel(self.call_timeout) {
            Ok(result) => Ok(result.ok),
            // The manager answered, it just said no.
            Err(ControlError::CommandFailed(failure))
                if failure.terminal_state == TerminalState::Succeeded =>
            {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

/// Controllers to start and stop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwitchPlan {
    pub start: Vec<String>,
    pub stop: Vec<String>,
}

/// Work out how to bring `requested` up.
///
/// Start every requested controller that is not running. Stop every running,
/// non-requested controller that shares a resource with a requested one.
pub fn plan_switch(infos: &[ControllerState], requested: &[String]) -> SwitchPlan {
    let is_requested = |info: &&ControllerState| requested.contains(&info.name);
    let required: HashSet<&str> = infos
        .iter()
        .filter(is_requested)
        .flat_map(|info| info.resources.iter().map(String::as_str))
        .collect();

    let start = infos
        .iter()
        .filter(is_requested)
        .filter(|info| !info.is_running())
        .map(|info| info.name.clone())
        .collect();
    let stop = infos
        .iter()
        .filter(|info| !requested.contains(&info.name) && info.is_running())
        .filter(|info| info.resources.iter().any(|r| required.contains(r.as_str())))
        .map(|info| info.name.clone())
        .collect();
    SwitchPlan { start, stop }
}

/// Switches to a set of requested controllers and back.
pub struct ControllerSwitcher<'a> {
    manager: &'a dyn ControllerManager,
    requested: Vec<String>,
    applied: Option<SwitchPlan>,
}

impl<'a> ControllerSwitcher<'a> {
    pub fn new<S: Into<String>>(
        manager: &'a dyn ControllerManager,
        controllers: impl IntoIterator<Item = S>,
    ) -> Self {
        let mut requested: Vec<String> = Vec::new();
        for name in controllers.into_iter().map(Into::into) {
            if !requested.contains(&name) {
                requested.push(name);
            }
        }
        Self {
            manager,
            requested,
            applied: None,
        }
    }

    pub fn requested(&self) -> &[String] {
        &self.requested
    }

    /// The plan applied by the last successful [`switch`](Self::switch).
    pub fn applied(&self) -> Option<&SwitchPlan> {
        self.applied.as_ref()
    }

    /// Start the requested controllers, stopping conflicting ones, in one
    /// strict switch.
    pub fn switch(&mut self) -> Result<SwitchPlan, ControlError> {
        let infos = self.manager.list_controllers()?;
        let plan = plan_switch(&infos, &self.requested);
        if !self
            .manager
            .switch_controllers(&plan.start, &plan.stop, Strictness::Strict)?
        {
            return Err(ControlError::Switch("switching controllers failed".into()));
        }
        info!(start = ?plan.start, stop = ?plan.stop, "controllers switched");
        self.applied = Some(plan.clone());
        Ok(plan)
    }

    /// Revert the last [`switch`](Self::switch).
    pub fn unswitch(&mut self) -> Result<(), ControlError> {
        let plan = self
            .applied
            .take()
            .ok_or_else(|| ControlError::Switch("nothing to revert; switch was never applied".into()))?;
        if !self
            .manager
            .switch_controllers(&plan.stop, &plan.start, Strictness::Strict)?
        {
            return Err(ControlError::Switch("reverting controllers failed".into()));
        }
        info!(start = ?plan.stop, stop = ?plan.start, "controllers restored");
        Ok(())
    }

    /// Switch now and revert when the guard drops.
    pub fn engage(mut self) -> Result<SwitchGuard<'a>, ControlError> {
        self.switch()?;
        Ok(SwitchGuard { switcher: self })
    }
}

/// Reverts a controller switch on drop.
pub struct SwitchGuard<'a> {
    switcher: ControllerSwitcher<'a>,
}

impl SwitchGuard<'_> {
    pub fn plan(&self) -> Option<&SwitchPlan> {
        self.switcher.applied()
    }
}

impl Drop for SwitchGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.switcher.unswitch() {
            error!(error = %e, "failed to restore controllers");
        }
    }
}
