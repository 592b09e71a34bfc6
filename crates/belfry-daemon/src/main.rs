//! `belfryd` – the alarm-clock controller daemon.
//!
//! Wires the pieces together and keeps them running:
//!
//! 1. Reads `~/.belfry/config.toml` (writing defaults on first run).
//! 2. Opens the alarm database and the configured motor backend.
//! 3. Boots the Safety Gate, which forces both motors off before anything
//!    else may touch them.
//! 4. Spawns the 1 Hz scheduler loop and, on hardware, the STOP-button
//!    monitor.
//! 5. Intercepts **Ctrl-C** to stop both motors and exit cleanly.

mod config;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use colored::Colorize;
use tracing::{error, info, warn};

use belfry_bus::{EventBus, Topic};
use belfry_hal::{MotorDriver, SimMotorDriver, StopButton, WiringOpButton, WiringOpDriver};
use belfry_kernel::ClockController;
use belfry_scheduler::{Scheduler, StopButtonMonitor, telemetry};
use belfry_store::SqliteStore;
use belfry_types::{Event, EventPayload};

use config::{Backend, Config};

fn main() {
    // Hold the guard for the whole process so pending spans flush on exit.
    let _guard = telemetry::init_tracing("belfryd");

    print_banner();

    let cfg = load_config();
    info!(
        backend = %cfg.backend,
        database = %cfg.database.display(),
        duty = cfg.default_duty,
        "belfryd starting"
    );

    // The runtime is created only after `init_tracing`; see the note on the
    // simple span exporter in `belfry_scheduler::telemetry`.
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start tokio runtime");
            std::process::exit(1);
        }
    };
    std::process::exit(runtime.block_on(run(cfg)));
}

/// Load the config file, falling back to (and persisting) defaults.
fn load_config() -> Config {
    match config::load() {
        Ok(Some(cfg)) => {
            info!(path = %config::config_path().display(), "config loaded");
            cfg
        }
        Ok(None) => {
            let cfg = Config::default();
            match config::save(&cfg) {
                Ok(()) => {
                    info!(path = %config::config_path().display(), "wrote default config")
                }
                Err(e) => warn!(error = %e, "could not write default config"),
            }
            cfg
        }
        Err(e) => {
            error!(error = %e, "config unreadable; using defaults");
            Config::default()
        }
    }
}

async fn run(cfg: Config) -> i32 {
    let bus = EventBus::default();

    let store = match SqliteStore::open(&cfg.database) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e, "failed to open alarm database");
            return 1;
        }
    };

    // ── Motor backend ─────────────────────────────────────────────────────
    let (driver, button): (Box<dyn MotorDriver>, Option<Box<dyn StopButton>>) = match cfg.backend {
        Backend::Sim => {
            warn!("sim backend selected; no hardware will be driven");
            let (driver, _log) = SimMotorDriver::new();
            (Box::new(driver), None)
        }
        Backend::WiringOp => {
            let driver = match WiringOpDriver::open(cfg.pins) {
                Ok(driver) => driver,
                Err(e) => {
                    error!(error = %e, "failed to initialise gpio motor driver");
                    return 1;
                }
            };
            let button: Option<Box<dyn StopButton>> = if cfg.stop_button {
                match WiringOpButton::open(&cfg.pins) {
                    Ok(button) => Some(Box::new(button)),
                    Err(e) => {
                        // The latch can still be tripped through the API.
                        warn!(error = %e, "STOP button unavailable; continuing without it");
                        None
                    }
                }
            } else {
                None
            };
            (Box::new(driver), button)
        }
    };

    // Boot-safe: construction forces both channels off before anything else
    // can request a motor start.
    let gate = ClockController::new(driver, bus.clone());

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        let gate = gate.clone();
        let bus = bus.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            println!();
            println!(
                "{}",
                "⚠  Ctrl-C received – stopping motors and shutting down …"
                    .yellow()
                    .bold()
            );
            gate.all_off();
            let _ = bus.publish_to(
                Topic::SystemAlerts,
                Event::new(
                    "belfryd",
                    EventPayload::Fault {
                        component: "belfryd".to_string(),
                        message: "shutdown: operator Ctrl-C".to_string(),
                    },
                ),
            );
            shutdown.store(true, Ordering::SeqCst);
        }) {
            warn!(error = %e, "failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
        }
    }

    // ── Background tasks ──────────────────────────────────────────────────
    if let Some(button) = button {
        let monitor = StopButtonMonitor::new(button, gate.clone())
            .with_poll_interval(Duration::from_millis(cfg.button_poll_ms.max(1)));
        tokio::spawn(monitor.run());
    }
    let scheduler = Scheduler::new(
        Box::new(Arc::clone(&store)),
        gate.clone(),
        bus.clone(),
        cfg.default_duty,
    );
    tokio::spawn(scheduler.run());

    info!("belfryd running; press Ctrl-C to stop");
    while !shutdown.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    // The Ctrl-C handler already stopped the motors; re-assert in case a
    // timer fired between the handler and here.
    gate.all_off();
    info!("belfryd stopped");
    0
}

fn print_banner() {
    println!();
    println!("{}", "  🔔 Belfry – alarm clock controller".bold());
    println!("{}", "  ─────────────────────────────────".dimmed());
}
