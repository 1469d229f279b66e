//! Protocol constants for RC controller communication.
//!
//! This module defines the register and coil map used by the controller
//! firmware, the Modbus function codes, timing parameters, and the serial
//! port configuration.

/// Unit (slave) address of the controller on the line
pub const UNIT_ADDRESS: u8 = 0x01;

/// Read holding registers function code
pub const FN_READ_HOLDING_REGISTERS: u8 = 0x03;

/// Force single coil function code
pub const FN_FORCE_SINGLE_COIL: u8 = 0x05;

/// Preset multiple registers function code
pub const FN_PRESET_MULTIPLE_REGISTERS: u8 = 0x10;

/// Bit set in the function code of an exception response
pub const EXCEPTION_FLAG: u8 = 0x80;

/// Coil data value for "on"
pub const COIL_ON: u16 = 0xFF00;

/// Coil data value for "off"
pub const COIL_OFF: u16 = 0x0000;

/// Status register block (PNOW .. STAT)
pub const STATUS_REGISTERS_ADDR: u16 = 0x9000;

/// Number of registers in the status block
pub const STATUS_REGISTERS_COUNT: u16 = 10;

/// Present alarm code register (ALMC)
pub const PRESENT_ALARM_CODE_ADDR: u16 = 0x9002;

/// Input port monitor register (DIPM)
pub const INPUT_SIGNAL_STATUS_ADDR: u16 = 0x9003;

/// Force feedback data register (FBFC), 0.01 N
pub const FORCE_FEEDBACK_ADDR: u16 = 0x901E;

/// Target position register (PCMD), start of the direct positioning block
pub const POSITION_WRITE_ADDR: u16 = 0x9900;

/// Alarm detail block
pub const ALARM_DETAIL_ADDR: u16 = 0x0500;

/// Number of registers in the alarm detail block
pub const ALARM_DETAIL_COUNT: u16 = 6;

/// Total moving count (TLMC) and distance (ODOM)
pub const MOVEMENT_HISTORY_ADDR: u16 = 0x8400;

/// Number of registers in the movement history block
pub const MOVEMENT_HISTORY_COUNT: u16 = 4;

/// Safety speed command coil (SFTY)
pub const SAFETY_SPEED_COIL: u16 = 0x0401;

/// Servo ON command coil (SON)
pub const SERVO_COIL: u16 = 0x0403;

/// Alarm reset command coil (ALRS)
pub const RESET_ALARM_COIL: u16 = 0x0407;

/// Brake forced-release command coil (BKRL)
pub const BRAKE_RELEASE_COIL: u16 = 0x0408;

/// Home return command coil (HOME)
pub const HOME_COIL: u16 = 0x040B;

/// PIO/Modbus switching coil (PMSL)
pub const PIO_MODBUS_SWITCH_COIL: u16 = 0x0427;

/// Deceleration stop command coil (STOP)
pub const DECELERATION_STOP_COIL: u16 = 0x042C;

/// Size of a single coil write echo or multiple register write response
pub const WRITE_RESPONSE_SIZE: usize = 8;

/// Size of an exception response: unit, function, code, CRC
pub const EXCEPTION_RESPONSE_SIZE: usize = 5;

/// Size of a status block response: header (3) + 20 data bytes + CRC (2)
pub const STATUS_RESPONSE_SIZE: usize = 25;

/// Minimum push-motion current limit (PPOW), ~20% of 255
pub const PUSH_CURRENT_MIN: u16 = 51;

/// Maximum push-motion current limit (PPOW), ~70% of 255
pub const PUSH_CURRENT_MAX: u16 = 178;

/// Default positioning band in 0.01 mm
pub const DEFAULT_POSITION_BAND: i32 = 10;

/// Default speed in 0.01 mm/s
pub const DEFAULT_SPEED: u32 = 1000;

/// Upper bound for commanded speeds in 0.01 mm/s
pub const MAX_SPEED: u32 = 30000;

/// Default acceleration in 0.01 G
pub const DEFAULT_ACCELERATION: u16 = 30;

/// Retract target position in 0.01 mm
pub const RETRACT_POSITION: i32 = 100;

/// Retract speed in 0.01 mm/s
pub const RETRACT_SPEED: u32 = 30000;

/// Baud rate (19200 bps)
pub const BAUD_RATE: u32 = 19200;

/// Data bits configuration
pub const DATA_BITS: serialport::DataBits = serialport::DataBits::Eight;

/// Stop bits configuration
pub const STOP_BITS: serialport::StopBits = serialport::StopBits::One;

/// Parity configuration
pub const PARITY: serialport::Parity = serialport::Parity::None;

/// Silent interval between frames: (10 × 3.5) bits at 19200 bps ≈ 1.8 ms
pub const SILENT_INTERVAL_MS: u64 = 2;

/// Settle time between the two alarm reset edges
pub const RESET_ALARM_SETTLE_MS: u64 = 20;

/// Read timeout for a single exchange
pub const READ_TIMEOUT_MS: u64 = 100;

/// Gate acquisition timeout for single shot commands
pub const COMMAND_ACQUIRE_TIMEOUT_MS: u64 = 100;

/// Gate acquisition timeout for retried queries
pub const QUERY_ACQUIRE_TIMEOUT_MS: u64 = 200;

/// Default number of attempts for retried exchanges
pub const DEFAULT_RETRY_COUNT: u32 = 3;

/// Default wait between retried attempts
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 100;

/// Interval between status polls
pub const POLL_INTERVAL_MS: u64 = 1000;

/// Time to let the homing status settle after issuing the home edges
pub const HOMING_SETTLE_MS: u64 = 200;

/// Maximum time to wait for the home-complete flag
pub const HOMING_TIMEOUT_MS: u64 = 12000;

/// Interval between home-complete checks
pub const HOMING_CHECK_INTERVAL_MS: u64 = 100;

/// Extra time added to each oscillation half-cycle
pub const OSCILLATION_MARGIN_MS: u64 = 50;

/// Capacity of the session event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 64;
