//! `rcc` – interactive remote controller client.
//!
//! The binary:
//!
//! 1. Loads `~/.rcc/config.toml`, writing the defaults on first run.
//! 2. Starts a simulated arm on an in-process action bus.
//! 3. Connects the command clients and drops into a REPL
//!    (`/state`, `/set`, `/traj`, `/switch`, `/help`, ...).
//! 4. Intercepts **Ctrl-C** so the shell can cancel running goals and exit.

mod config;
mod repl;
mod sim;
mod telemetry;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use colored::Colorize;
use rcc_client::JointTable;
use rcc_middleware::{ActionBus, BusTransport};
use tracing::warn;

use crate::config::Config;
use crate::repl::Session;
use crate::sim::{SIM_JOINTS, SimRobot};

fn main() {
    let _telemetry = telemetry::init_tracing("rcc");

    print_banner();

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler");
    }

    let cfg = load_config();

    let bus = ActionBus::default();
    let sim = match SimRobot::start(&bus, &cfg) {
        Ok(sim) => sim,
        Err(e) => fail("Failed to start simulated robot", e),
    };
    println!(
        "  Simulated arm up: {} joints, {} controllers",
        sim.hardware().dof_count(),
        sim.controllers().len()
    );
    let transport = match BusTransport::new(bus) {
        Ok(transport) => Arc::new(transport),
        Err(e) => fail("Failed to start transport", e),
    };
    let model = Arc::new(JointTable::new(SIM_JOINTS));

    print!("  Connecting to {} … ", cfg.namespace.bold());
    let session = match Session::connect(transport, model, cfg) {
        Ok(session) => session,
        Err(e) => {
            println!("{}", "failed".red());
            fail("Could not connect", e)
        }
    };
    println!("{}", "connected".green());
    println!("\n  Type {} for a list of commands.\n", "/help".bold().cyan());

    repl::run(session, shutdown);
    drop(sim);
}

fn load_config() -> Config {
    match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => {
            let mut cfg = Config::default();
            match config::save(&cfg) {
                Ok(()) => println!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    config::config_path().display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Error saving config".red(), e),
            }
            config::apply_env_overrides(&mut cfg);
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    }
}

fn fail(context: &str, err: impl std::fmt::Display) -> ! {
    eprintln!("{}: {}", context.red().bold(), err);
    std::process::exit(1);
}

fn print_banner() {
    println!();
    println!("{}", r#"   ________________ "#.bold().cyan());
    println!("{}", r#"  / ___/ ___/ ___/ "#.bold().cyan());
    println!("{}", r#" / /  / /__/ /__   "#.bold().cyan());
    println!("{}", r#"/_/   \___/\___/   "#.bold().cyan());
    println!();
    println!("  {}", "remote controller client".dimmed());
    println!();
}
