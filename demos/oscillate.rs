//! Oscillation Example
//!
//! Strokes the actuator between two bounds, speeds it up halfway through and
//! stops on Ctrl-C or after the run time.
//!
//! Usage:
//!   cargo run --example oscillate -- /dev/ttyUSB0
//!   cargo run --example oscillate -- /dev/ttyUSB0 knockrod.toml
//!
//! The optional TOML file overrides session settings, e.g.
//!   actuator_size = 200
//!   max_speed = 20000

use knockrod_protocol::{KnockRod, Result, SessionConfig, SessionEvent};
use log::{info, warn};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

const RUN_TIME: Duration = Duration::from_secs(30);

fn load_config(port: String, path: Option<String>) -> Result<SessionConfig> {
    let mut config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(&path).map_err(|e| {
                knockrod_protocol::Error::Config(format!("Cannot read {}: {}", path, e))
            })?;
            SessionConfig::from_toml_str(&text)?
        }
        None => SessionConfig::default(),
    };
    config.port = port;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let port = match args.next() {
        Some(port) => port,
        None => {
            eprintln!("Usage: oscillate <port> [config.toml]");
            std::process::exit(2);
        }
    };
    let config = load_config(port, args.next())?;

    let rod = KnockRod::connect(config)?;
    let mut events = rod.subscribe();
    rod.init().await?;

    rod.set_safety_speed(false).await?;
    rod.oscillate(0.3, 0.1, 0.9, 30)?;

    let deadline = tokio::time::sleep(RUN_TIME);
    tokio::pin!(deadline);
    let speedup = tokio::time::sleep(RUN_TIME / 2);
    tokio::pin!(speedup);
    let mut sped_up = false;

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = &mut speedup, if !sped_up => {
                sped_up = true;
                info!("Speeding up");
                rod.oscillate(0.6, 0.1, 0.9, 50)?;
            }
            event = events.recv() => match event {
                Ok(SessionEvent::InputPressed) => {
                    info!("Hand switch pressed, stopping");
                    break;
                }
                Ok(SessionEvent::Disconnected) | Err(RecvError::Closed) => {
                    warn!("Session lost");
                    return Ok(());
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
            },
        }
    }

    rod.stop_oscillation();
    rod.stop().await?;
    rod.move_retract().await?;
    rod.disconnect().await;
    Ok(())
}
