//! Basic Usage Example
//!
//! This example demonstrates the core functionality of the knockrod library:
//! - Listing and selecting serial ports
//! - Bringing the controller up (alarm reset, servo on, homing)
//! - Watching state notifications
//! - Absolute and duration-bounded moves
//! - Reading alarm, input, force and movement diagnostics
//!
//! Usage:
//!   cargo run --example basic_usage                  # Interactive mode
//!   cargo run --example basic_usage -- COM3          # Specify port
//!   cargo run --example basic_usage -- /dev/ttyUSB0
//!
//! Set RUST_LOG environment variable to control logging:
//!   RUST_LOG=trace cargo run --example basic_usage   # raw frames
//!   RUST_LOG=info cargo run --example basic_usage

use inquire::Select;
use knockrod_protocol::{flag_names, KnockRod, Result, SessionConfig, SessionEvent};
use log::{info, warn};
use std::time::Duration;

/// Interactive serial port selection using inquire
fn select_port() -> Result<String> {
    let ports = KnockRod::list_ports()?;

    if ports.is_empty() {
        eprintln!("No serial ports found!");
        std::process::exit(1);
    }

    let port_names: Vec<String> = ports
        .iter()
        .map(|p| format!("{} - {:?}", p.port_name, p.port_type))
        .collect();

    let selection = Select::new("Select a serial port:", port_names)
        .prompt()
        .map_err(|e| knockrod_protocol::Error::Config(format!("Selection cancelled: {}", e)))?;

    // Extract just the port name (before " - ")
    let port_name = selection
        .split(" - ")
        .next()
        .unwrap_or(selection.as_str())
        .to_string();
    Ok(port_name)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger with default info level if RUST_LOG is not set
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Get port name from command line argument or interactive selection
    let port_name = std::env::args()
        .nth(1)
        .map(Ok)
        .unwrap_or_else(select_port)?;

    info!("Connecting to controller on {}...", port_name);
    let rod = KnockRod::connect(SessionConfig::for_port(port_name))?;

    let mut events = rod.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SessionEvent::StateChanged { old, new } => {
                    info!(
                        "Position {:>6}  DSS1 {:?}",
                        new.current_position,
                        flag_names(&new.device_status_register_1)
                    );
                    if new.is_moving() != old.is_moving() {
                        info!("{}", if new.is_moving() { "Moving" } else { "Stopped" });
                    }
                    if new.has_alarm() && !old.has_alarm() {
                        warn!("Alarm raised at position {}", new.current_position);
                    }
                }
                SessionEvent::PollingStopped { error } => warn!("Polling stopped: {}", error),
                other => info!("Event: {:?}", other),
            }
        }
    });

    if let Err(e) = rod.init().await {
        warn!("Initialization failed: {}", e);
        let alarm = rod.read_alarm_code().await?;
        if alarm != 0 || rod.state().has_alarm() {
            let detail = rod.read_alarm_detail().await?;
            warn!("Present alarm {:#06x}: {:?}", alarm, detail);
        }
        rod.disconnect().await;
        return Err(e);
    }

    info!("=== Movement ===");
    let half = rod.travel_range() / 2;
    rod.move_to(half, 5000, 30).await?;
    tokio::time::sleep(Duration::from_secs(3)).await;

    rod.move_to_within(0.25, Duration::from_secs(2), 30).await?;
    tokio::time::sleep(Duration::from_secs(3)).await;

    rod.move_retract().await?;
    tokio::time::sleep(Duration::from_secs(2)).await;

    info!("=== Diagnostics ===");
    info!(
        "Input status {:#06x}, force feedback {:.2} N",
        rod.read_input_status().await?,
        rod.read_force_feedback().await? as f64 / 100.0
    );
    let history = rod.read_movement_history().await?;
    info!(
        "Total moves: {}, total distance: {} m",
        history.total_moving_count, history.total_moving_distance
    );

    rod.set_servo(false).await?;
    rod.disconnect().await;

    info!("=== Basic Usage Complete ===");

    Ok(())
}
