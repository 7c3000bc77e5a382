//! REPL – interactive shell over the command clients.
//!
//! Supported slash-commands:
//!   /help                          – show this list
//!   /state                         – print the latest joint state
//!   /trigger                       – trigger the configured controller
//!   /set <joint>=<pos> ...         – move joints to fixed positions
//!   /traj <joint>=<pos> ... [over=<secs>] – ramp joints along a trajectory
//!   /controllers                   – list loaded controllers
//!   /switch <controller> ...       – switch to the named controllers
//!   /cancel                        – cancel the running trajectory
//!   /resource <package> <path>     – locate a workspace resource
//!   /quit | /exit                  – leave the shell

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use colored::Colorize;
use rcc_client::{
    ActionFuture, ControllerManager, ControllerManagerClient, ControllerSwitcher, DenseSample,
    DenseTrajectory, JointStateClient, JointTable, RobotModel, SetPositionClient, TrajectoryClient,
    TriggerClient, find_resource, pad_trajectory, to_wire_trajectory,
};
use rcc_middleware::{ActionHandle, ActionTransport, BusTransport};
use rcc_types::{ControlError, JointState, JointTrajectory};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing::warn;

use crate::config::Config;

const DEFAULT_RAMP_SECS: f64 = 2.0;
const RAMP_SAMPLES: usize = 100;

/// One parsed line of input.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Empty,
    Help,
    State,
    Trigger,
    Set(Vec<(String, f64)>),
    Traj {
        targets: Vec<(String, f64)>,
        duration: f64,
    },
    Controllers,
    Switch(Vec<String>),
    Cancel,
    Resource {
        package: String,
        path: String,
    },
    Quit,
}

pub fn parse_command(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Ok(Command::Empty);
    };
    let args: Vec<&str> = words.collect();

    match head {
        "/help" => Ok(Command::Help),
        "/state" => Ok(Command::State),
        "/trigger" => Ok(Command::Trigger),
        "/set" => {
            let targets = parse_assignments(&args)?;
            if targets.is_empty() {
                return Err("usage: /set <joint>=<pos> ...".into());
            }
            Ok(Command::Set(targets))
        }
        "/traj" => {
            let mut duration = DEFAULT_RAMP_SECS;
            let mut targets = Vec::new();
            for (name, value) in parse_assignments(&args)? {
                if name == "over" {
                    duration = value;
                } else {
                    targets.push((name, value));
                }
            }
            if targets.is_empty() {
                return Err("usage: /traj <joint>=<pos> ... [over=<secs>]".into());
            }
            if !(duration.is_finite() && duration > 0.0) {
                return Err(format!("ramp duration must be positive, got {duration}"));
            }
            Ok(Command::Traj { targets, duration })
        }
        "/controllers" => Ok(Command::Controllers),
        "/switch" => {
            if args.is_empty() {
                return Err("usage: /switch <controller> ...".into());
            }
            Ok(Command::Switch(args.iter().map(|s| s.to_string()).collect()))
        }
        "/cancel" => Ok(Command::Cancel),
        "/resource" => match args.as_slice() {
            [package, path] => Ok(Command::Resource {
                package: package.to_string(),
                path: path.to_string(),
            }),
            _ => Err("usage: /resource <package> <path>".into()),
        },
        "/quit" | "/exit" => Ok(Command::Quit),
        other => Err(format!("unknown command '{other}'")),
    }
}

fn parse_assignments(args: &[&str]) -> Result<Vec<(String, f64)>, String> {
    args.iter()
        .map(|arg| {
            let (name, value) = arg
                .split_once('=')
                .ok_or_else(|| format!("expected <name>=<value>, got '{arg}'"))?;
            let value: f64 = value
                .parse()
                .map_err(|_| format!("'{value}' is not a number"))?;
            if name.is_empty() || !value.is_finite() {
                return Err(format!("invalid assignment '{arg}'"));
            }
            Ok((name.to_string(), value))
        })
        .collect()
}

/// Linear ramp from the current joint values to `targets`, sampled densely.
pub fn dense_ramp(
    robot: &JointTable,
    targets: &[(String, f64)],
    duration: f64,
    samples: usize,
) -> Result<DenseTrajectory, String> {
    let mut dofs = Vec::with_capacity(targets.len());
    let mut starts = Vec::with_capacity(targets.len());
    for (name, _) in targets {
        let dof = robot
            .dof_index(name)
            .ok_or_else(|| format!("unknown joint '{name}'"))?;
        dofs.push(dof);
        starts.push(robot.joint_value(name).unwrap_or_default());
    }
    let samples = samples.max(1);
    let dt = duration / samples as f64;
    let velocities: Vec<f64> = targets
        .iter()
        .zip(&starts)
        .map(|((_, goal), start)| (goal - start) / duration)
        .collect();

    let mut dense = DenseTrajectory::new(dofs);
    for k in 0..=samples {
        let s = k as f64 / samples as f64;
        let positions = targets
            .iter()
            .zip(&starts)
            .map(|((_, goal), start)| start + (goal - start) * s)
            .collect();
        let delta = if k == 0 { 0.0 } else { dt };
        dense.push(DenseSample::timed(delta, positions).with_velocities(velocities.clone()));
    }
    Ok(dense)
}

/// Connected clients plus the bits of state the shell keeps between lines.
pub struct Session {
    cfg: Config,
    model: Arc<JointTable>,
    joint_states: JointStateClient,
    trigger: TriggerClient,
    set_position: SetPositionClient,
    trajectory: TrajectoryClient,
    manager: ControllerManagerClient,
    running: Option<ActionHandle>,
}

impl Session {
    pub fn connect(
        transport: Arc<BusTransport>,
        model: Arc<JointTable>,
        cfg: Config,
    ) -> Result<Self, ControlError> {
        let timeout = cfg.connect_timeout();
        let actions: Arc<dyn ActionTransport> = transport.clone();
        let (ns, ctrl) = (cfg.namespace.as_str(), cfg.controller.as_str());

        let joint_states =
            JointStateClient::subscribe(transport.as_ref(), model.clone(), &cfg.joint_states_topic)?;
        let trigger = TriggerClient::connect(actions.clone(), ns, ctrl, timeout)?;
        let set_position = SetPositionClient::connect(actions.clone(), ns, ctrl, timeout)?;
        let trajectory = TrajectoryClient::connect(actions.clone(), ns, ctrl, timeout)?;
        let manager =
            ControllerManagerClient::connect(actions, ns, timeout)?.with_call_timeout(cfg.call_timeout());

        Ok(Self {
            cfg,
            model,
            joint_states,
            trigger,
            set_position,
            trajectory,
            manager,
            running: None,
        })
    }

    /// Run one command. Returns `false` when the shell should exit.
    pub fn dispatch(&mut self, command: Command) -> Result<bool, ControlError> {
        match command {
            Command::Empty => {}
            Command::Help => cmd_help(),
            Command::State => self.cmd_state(),
            Command::Trigger => {
                let result = self
                    .trigger
                    .execute(&())?
                    .wait_or_cancel(self.cfg.call_timeout())?;
                println!("  {} {}", "✓ triggered".green(), result.message.dimmed());
            }
            Command::Set(targets) => {
                let cmd = JointState::from_positions(targets);
                self.set_position
                    .execute(&cmd)?
                    .wait_or_cancel(self.cfg.call_timeout())?;
                println!("  {} {}", "✓ moved".green(), cmd.name.join(", "));
            }
            Command::Traj { targets, duration } => self.cmd_traj(&targets, duration)?,
            Command::Controllers => self.cmd_controllers()?,
            Command::Switch(names) => {
                let plan = ControllerSwitcher::new(&self.manager, names).switch()?;
                println!(
                    "  {} started [{}], stopped [{}]",
                    "✓".green(),
                    plan.start.join(", "),
                    plan.stop.join(", ")
                );
            }
            Command::Cancel => match self.running.take() {
                Some(handle) => {
                    handle.cancel()?;
                    println!("  cancel requested for goal {}", handle.goal_id());
                }
                None => println!("  {}", "Nothing to cancel.".dimmed()),
            },
            Command::Resource { package, path } => {
                let found = find_resource(&path, &package, &self.cfg.search_dirs())?;
                println!("  {}", found.display().to_string().bold());
            }
            Command::Quit => return Ok(false),
        }
        Ok(true)
    }

    fn cmd_state(&self) {
        let Some(latest) = self.joint_states.latest() else {
            println!("  {}", "No joint state received yet.".yellow());
            return;
        };
        let stamp = latest
            .header
            .stamp
            .map(|t| t.format("%H:%M:%S%.3f").to_string())
            .unwrap_or_else(|| "-".into());
        println!("  {} {}", self.joint_states.topic().bold(), stamp.dimmed());
        for (name, value) in self.model.joint_names().iter().zip(self.model.dof_values()) {
            println!("    {:<16} {:>9.4}", name, value);
        }
    }

    fn cmd_traj(&mut self, targets: &[(String, f64)], duration: f64) -> Result<(), ControlError> {
        let dense = dense_ramp(&self.model, targets, duration, RAMP_SAMPLES)
            .map_err(ControlError::MalformedTrajectory)?;
        let wire = to_wire_trajectory(self.model.as_ref(), &dense, None, self.cfg.time_tolerance)?;
        let wire = pad_trajectory(self.model.as_ref(), wire, self.model.joint_names())?;
        println!(
            "  sending {} waypoints over {:.2}s",
            wire.points.len(),
            wire.duration().as_secs_f64()
        );

        let future = self.trajectory.execute(&wire)?;
        future.add_done_callback(report_trajectory);
        self.running = future.handle().cloned();
        Ok(())
    }

    fn cmd_controllers(&self) -> Result<(), ControlError> {
        for info in self.manager.list_controllers()? {
            let state = if info.is_running() {
                info.state.green()
            } else {
                info.state.dimmed()
            };
            println!(
                "  {:<24} {:<10} {:<28} [{}]",
                info.name.bold(),
                state,
                info.controller_type,
                info.resources.join(", ")
            );
        }
        Ok(())
    }
}

fn report_trajectory(future: &ActionFuture<JointTrajectory>) {
    match future.try_result() {
        Some(Ok(executed)) => println!(
            "\n  {} trajectory finished ({} waypoints executed)",
            "✓".green(),
            executed.points.len()
        ),
        Some(Err(ControlError::Cancelled)) => println!("\n  {}", "trajectory cancelled".yellow()),
        Some(Err(e)) => println!("\n  {} {e}", "✗".red()),
        None => {}
    }
}

fn cmd_help() {
    println!();
    println!("  {}", "Commands".bold().underline());
    for (usage, what) in [
        ("/help", "show this list"),
        ("/state", "print the latest joint state"),
        ("/trigger", "trigger the configured controller"),
        ("/set <joint>=<pos> ...", "move joints to fixed positions"),
        ("/traj <joint>=<pos> ... [over=<s>]", "ramp joints along a trajectory"),
        ("/controllers", "list loaded controllers"),
        ("/switch <controller> ...", "switch to the named controllers"),
        ("/cancel", "cancel the running trajectory"),
        ("/resource <package> <path>", "locate a workspace resource"),
        ("/quit", "leave the shell"),
    ] {
        println!("    {:<36} {}", usage.cyan(), what);
    }
    println!();
}

fn history_path() -> PathBuf {
    crate::config::config_path().with_file_name("history")
}

/// Entry point for the interactive shell.
///
/// `shutdown` is polled each iteration; when set the shell exits cleanly.
pub fn run(mut session: Session, shutdown: Arc<AtomicBool>) {
    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("{}: {e}", "Failed to start line editor".red());
            return;
        }
    };
    let history = history_path();
    rl.load_history(&history).ok();

    while !shutdown.load(Ordering::SeqCst) {
        let line = match rl.readline("rcc> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("{}: {e}", "Read error".red());
                break;
            }
        };
        let line = line.trim();
        if !line.is_empty() {
            rl.add_history_entry(line).ok();
        }

        let command = match parse_command(line) {
            Ok(command) => command,
            Err(msg) => {
                println!("  {} {msg}. Type {} for available commands.", "✗".red(), "/help".bold());
                continue;
            }
        };
        match session.dispatch(command) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => println!("  {} {e}", "✗".red()),
        }
    }

    if let Some(handle) = session.running.take()
        && let Err(e) = handle.cancel()
    {
        warn!(error = %e, "failed to cancel running trajectory on exit");
    }
    if let Err(e) = rl.save_history(&history) {
        warn!(error = %e, "failed to save history");
    }
    println!("{}", "Goodbye.".green());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SIM_JOINTS, SimRobot};
    use rcc_middleware::ActionBus;

    fn targets(pairs: &[(&str, f64)]) -> Vec<(String, f64)> {
        pairs.iter().map(|(n, v)| (n.to_string(), *v)).collect()
    }

    #[test]
    fn parses_set_and_traj() {
        assert_eq!(
            parse_command("/set elbow=0.5 wrist=-1").unwrap(),
            Command::Set(targets(&[("elbow", 0.5), ("wrist", -1.0)]))
        );
        assert_eq!(
            parse_command("  /traj elbow=1 over=3.5 ").unwrap(),
            Command::Traj {
                targets: targets(&[("elbow", 1.0)]),
                duration: 3.5
            }
        );
        assert_eq!(parse_command("").unwrap(), Command::Empty);
        assert_eq!(parse_command("/exit").unwrap(), Command::Quit);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse_command("/set").is_err());
        assert!(parse_command("/set elbow").is_err());
        assert!(parse_command("/set elbow=abc").is_err());
        assert!(parse_command("/traj elbow=1 over=0").is_err());
        assert!(parse_command("/resource pkg").is_err());
        assert!(parse_command("/fly").unwrap_err().contains("/fly"));
    }

    #[test]
    fn ramp_starts_at_current_value_and_ends_at_target() {
        let robot = JointTable::with_values([("a", 1.0), ("b", 0.0)]);
        let dense = dense_ramp(&robot, &targets(&[("a", 3.0)]), 2.0, 4).unwrap();

        assert_eq!(dense.dof_indices, vec![0]);
        assert_eq!(dense.samples.len(), 5);
        assert_eq!(dense.samples[0].positions, Some(vec![1.0]));
        assert_eq!(dense.samples[4].positions, Some(vec![3.0]));
        assert!((dense.duration - 2.0).abs() < 1e-9);
        assert_eq!(dense.samples[2].velocities, Some(vec![1.0]));
        assert!(dense_ramp(&robot, &targets(&[("z", 1.0)]), 1.0, 4).is_err());
    }

    #[test]
    fn session_runs_commands_against_the_simulation() {
        let bus = ActionBus::default();
        let cfg = Config::default();
        let sim = SimRobot::start(&bus, &cfg).unwrap();
        let transport = Arc::new(BusTransport::new(bus).unwrap());
        let model = Arc::new(JointTable::new(SIM_JOINTS));
        let mut session = Session::connect(transport, model, cfg).unwrap();

        assert!(session.dispatch(Command::Trigger).unwrap());
        session
            .dispatch(Command::Set(targets(&[("shoulder_pan", 0.25)])))
            .unwrap();
        assert_eq!(sim.hardware().joint_value("shoulder_pan"), Some(0.25));

        let err = session
            .dispatch(Command::Set(targets(&[("tail", 1.0)])))
            .unwrap_err();
        assert!(matches!(err, ControlError::CommandFailed(_)));

        session
            .dispatch(Command::Traj {
                targets: targets(&[("elbow", 0.5)]),
                duration: 0.2,
            })
            .unwrap();
        assert!(session.running.is_some());

        assert!(!session.dispatch(Command::Quit).unwrap());
    }
}
