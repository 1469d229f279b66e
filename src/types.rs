use bitflags::bitflags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

bitflags! {
    /// Device status register 1 (DSS1, 0x9005)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Dss1: u16 {
        /// Position complete: the actuator entered the positioning band
        const PEND = 1 << 3;
        /// Home return complete
        const HEND = 1 << 4;
        /// Pause command active
        const STP = 1 << 5;
        /// Brake released
        const BKRL = 1 << 7;
        /// Absolute error present
        const ABER = 1 << 8;
        /// Minor failure (message level) alarm present
        const ALML = 1 << 9;
        /// Major failure alarm present
        const ALMH = 1 << 10;
        /// Missed work part in push-motion operation
        const PSFL = 1 << 11;
        /// Servo ON
        const SV = 1 << 12;
        /// Controller ready
        const PWR = 1 << 13;
        /// Safety speed enabled
        const SFTY = 1 << 14;
        /// Emergency stop actuated
        const EMGS = 1 << 15;
    }
}

bitflags! {
    /// Device status register 2 (DSS2, 0x9006)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Dss2: u16 {
        const PE0 = 1 << 0;
        const PE1 = 1 << 1;
        const PE2 = 1 << 2;
        const PE3 = 1 << 3;
        const PE4 = 1 << 4;
        const PE5 = 1 << 5;
        const PE6 = 1 << 6;
        const PE7 = 1 << 7;
        /// Jog- command active
        const JOG_NEGATIVE = 1 << 8;
        /// Jog+ command active
        const JOG_POSITIVE = 1 << 9;
        /// Position data load complete
        const TEAC = 1 << 10;
        /// Teaching mode
        const MODS = 1 << 11;
        /// Push torque level reached
        const TRQS = 1 << 12;
        /// Load output judgment
        const LOAD = 1 << 13;
        /// Enable switch condition
        const ENBS = 1 << 15;
    }
}

bitflags! {
    /// Expansion device status register (DSSE, 0x9007)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Dsse: u16 {
        /// Actuator is moving (homing and push-motion included)
        const MOVE = 1 << 5;
        /// PIO commands disabled, Modbus commands enabled
        const PMSS = 1 << 8;
        /// Excitation detection complete
        const PSNS = 1 << 9;
        /// Push-motion operation in progress
        const PUSH = 1 << 10;
        /// Home return in progress
        const GHMS = 1 << 11;
        /// MANU mode
        const RMDS = 1 << 13;
        /// Motor drive source cut off
        const MPUV = 1 << 14;
        /// Emergency stop input ON
        const EMGP = 1 << 15;
    }
}

bitflags! {
    /// System status register (STAT, 0x9008)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Stat: u32 {
        /// Drive source ON
        const MPOW = 1 << 0;
        /// Servo command status
        const SON = 1 << 1;
        /// Servo status
        const SV = 1 << 2;
        /// Home return complete
        const HEND = 1 << 3;
        /// MANU mode
        const RMDS = 1 << 4;
    }
}

bitflags! {
    /// Control flag specification register (CTLF) of a positioning command
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Ctlf: u16 {
        /// Push-motion operation
        const PUSH = 1 << 1;
        /// Push in the reverse direction after approach
        const DIR = 1 << 2;
        /// Incremental (pitch feed) operation
        const INC = 1 << 3;
        /// Motion profile select bit 0 (S-motion)
        const MOD0 = 1 << 6;
        /// Motion profile select bit 1 (primary delay filter)
        const MOD1 = 1 << 7;
    }
}

/// Symbolic names of every flag set in `flags`.
pub fn flag_names<F: bitflags::Flags>(flags: &F) -> Vec<&'static str> {
    flags.iter_names().map(|(name, _)| name).collect()
}

/// Decoded status register block (0x9000, 10 registers)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusRegisters {
    /// Current position (PNOW) in 0.01 mm
    pub pnow: i32,
    /// Present alarm code (ALMC)
    pub almc: u16,
    /// Input port monitor (DIPM)
    pub dipm: u16,
    /// Output port monitor (DIPO)
    pub dipo: u16,
    pub dss1: Dss1,
    pub dss2: Dss2,
    pub dsse: Dsse,
    pub stat: Stat,
}

/// Snapshot of the controller state, replaced on every successful poll
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceState {
    pub device_status_register_1: Dss1,
    pub device_status_register_2: Dss2,
    pub expansion_device_status: Dsse,
    pub system_status_register: Stat,
    /// Current position in 0.01 mm
    pub current_position: i32,
    /// Raw input port word
    pub input: u16,
    /// Time of the status query this snapshot was built from
    pub polled_at: Option<DateTime<Utc>>,
}

impl Default for DeviceState {
    fn default() -> Self {
        DeviceState {
            device_status_register_1: Dss1::empty(),
            device_status_register_2: Dss2::empty(),
            expansion_device_status: Dsse::empty(),
            system_status_register: Stat::empty(),
            current_position: 0,
            input: 0,
            polled_at: None,
        }
    }
}

impl DeviceState {
    pub fn from_registers(registers: &StatusRegisters, polled_at: DateTime<Utc>) -> Self {
        DeviceState {
            device_status_register_1: registers.dss1,
            device_status_register_2: registers.dss2,
            expansion_device_status: registers.dsse,
            system_status_register: registers.stat,
            current_position: registers.pnow,
            input: registers.dipm,
            polled_at: Some(polled_at),
        }
    }

    pub fn is_homed(&self) -> bool {
        self.device_status_register_1.contains(Dss1::HEND)
    }

    pub fn is_moving(&self) -> bool {
        self.expansion_device_status.contains(Dsse::MOVE)
    }

    pub fn has_alarm(&self) -> bool {
        self.device_status_register_1
            .intersects(Dss1::ALMH | Dss1::ALML)
    }

    /// State of input bit 0 (hand switch)
    pub fn input_pressed(&self) -> bool {
        self.input & 0x0001 == 1
    }
}

/// Alarm detail block (0x0500, 6 registers)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlarmDetail {
    pub detail_code: u16,
    pub address: u16,
    pub code: u32,
    pub occurrence_time: u32,
}

/// Movement history block (0x8400, 4 registers)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MovementHistory {
    /// Total moving count (TLMC)
    pub total_moving_count: u32,
    /// Total moving distance (ODOM) in meters
    pub total_moving_distance: u32,
}

/// Echo of a coil write or register block write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WriteAck {
    pub function: u8,
    pub address: u16,
    /// Coil data for single coil writes, register count for block writes
    pub value: u16,
}

/// Stroke length of the actuator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum ActuatorSize {
    FourInch,
    SixInch,
    EightInch,
    TenInch,
    TwelveInch,
}

impl ActuatorSize {
    /// Stroke in millimeters
    pub fn stroke_mm(self) -> u16 {
        match self {
            ActuatorSize::FourInch => 100,
            ActuatorSize::SixInch => 150,
            ActuatorSize::EightInch => 200,
            ActuatorSize::TenInch => 250,
            ActuatorSize::TwelveInch => 300,
        }
    }

    /// Travel range in 0.01 mm
    pub fn travel_range(self) -> i32 {
        self.stroke_mm() as i32 * 100
    }
}

impl TryFrom<u16> for ActuatorSize {
    type Error = crate::Error;

    fn try_from(mm: u16) -> Result<Self, Self::Error> {
        match mm {
            100 => Ok(ActuatorSize::FourInch),
            150 => Ok(ActuatorSize::SixInch),
            200 => Ok(ActuatorSize::EightInch),
            250 => Ok(ActuatorSize::TenInch),
            300 => Ok(ActuatorSize::TwelveInch),
            _ => Err(crate::Error::Config(format!("Unsupported actuator stroke: {} mm", mm))),
        }
    }
}

impl From<ActuatorSize> for u16 {
    fn from(size: ActuatorSize) -> u16 {
        size.stroke_mm()
    }
}

/// Lifecycle of a controller session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Disconnected,
    Initializing,
    Homing,
    Ready,
}

/// Notifications published by a session
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Bring-up commands were accepted and the first status was read
    Connected,
    /// Homing (if needed) finished and polling started
    Ready,
    /// A status query replaced the device state
    StateChanged {
        old: Arc<DeviceState>,
        new: Arc<DeviceState>,
    },
    /// Input bit 0 went from 0 to 1
    InputPressed,
    /// Input bit 0 went from 1 to 0
    InputReleased,
    /// The periodic poll gave up; carries the last error
    PollingStopped { error: String },
    /// The serial channel was lost or closed
    Disconnected,
}

/// Direction of the next oscillation stroke
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    /// Towards the upper bound
    Up,
    /// Towards the lower bound
    Down,
}

impl Direction {
    pub fn flipped(self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }
}

/// Parameters of the back-and-forth motion, last write wins
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OscillationParams {
    /// Lower bound as a fraction (0..1) of the travel range
    pub lower: f64,
    /// Upper bound as a fraction (0..1) of the travel range
    pub upper: f64,
    /// Speed as a fraction (0..1) of the maximum speed
    pub speed: f64,
    /// Acceleration in 0.01 G
    pub acceleration: u16,
    pub active: bool,
    pub direction: Direction,
}

impl Default for OscillationParams {
    fn default() -> Self {
        OscillationParams {
            lower: 0.0,
            upper: 1.0,
            speed: 0.0,
            acceleration: crate::constants::DEFAULT_ACCELERATION,
            active: false,
            direction: Direction::Up,
        }
    }
}
