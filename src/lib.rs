//! # KnockRod Protocol Library
//!
//! A Rust library for driving IAI RC-family linear actuator controllers
//! ("knock rods") over a Modbus-RTU serial line.
//!
//! ## Features
//!
//! - Build and parse the controller's Modbus-RTU frames (CRC-16/Modbus)
//! - Serialized command/response exchange with bounded retries
//! - Connection bring-up, homing and periodic status polling
//! - Position extrapolation between polls and duration-bounded moves
//! - Oscillation between two bounds at a configurable speed
//!
//! ## Example
//!
//! ```no_run
//! use knockrod_protocol::{KnockRod, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let rod = KnockRod::connect(SessionConfig::for_port("/dev/ttyUSB0"))?;
//!     rod.init().await?;
//!     rod.move_to(5000, 10000, 30).await?;
//!     println!("Position: {}", rod.state().current_position);
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod codec;
pub mod config;
pub mod constants;
pub mod error;
pub mod motion;
pub mod oscillation;
pub mod protocol;
pub mod types;

pub use channel::{CommandChannel, DynSerial, RetryPolicy};
pub use config::SessionConfig;
pub use error::{DecodeError, Error, ModbusException, Result};
pub use motion::MotionTrace;
pub use protocol::KnockRod;
pub use types::*;
