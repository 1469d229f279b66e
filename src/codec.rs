//! Modbus-RTU frame encoding and decoding for RC controllers.
//!
//! Every builder returns a complete frame (`unit`, `function`, payload and a
//! little-endian CRC-16/Modbus trailer). Parsers validate the CRC before
//! looking at any field and never pad or truncate a frame.

use crate::constants::*;
use crate::error::{DecodeError, ModbusException};
use crate::types::*;
use crc::{Crc, CRC_16_MODBUS};

const CRC_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

const EXCEPTION_MESSAGES: [&str; 4] = [
    "Illegal Function",
    "Illegal Data Address",
    "Illegal Data Value",
    "Slave Device Failure",
];

/// CRC-16/Modbus (poly 0xA001 reflected, init 0xFFFF)
pub fn crc16(bytes: &[u8]) -> u16 {
    CRC_MODBUS.checksum(bytes)
}

/// Format bytes as uppercase hex without separators
pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}

/// Build a frame: header, payload and CRC trailer
pub fn build_frame(unit: u8, function: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 4);
    frame.push(unit);
    frame.push(function);
    frame.extend_from_slice(payload);
    let crc = crc16(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

fn force_single_coil(address: u16, data: u16) -> Vec<u8> {
    let mut payload = [0u8; 4];
    payload[..2].copy_from_slice(&address.to_be_bytes());
    payload[2..].copy_from_slice(&data.to_be_bytes());
    build_frame(UNIT_ADDRESS, FN_FORCE_SINGLE_COIL, &payload)
}

fn query_holding_registers(address: u16, count: u16) -> Vec<u8> {
    let mut payload = [0u8; 4];
    payload[..2].copy_from_slice(&address.to_be_bytes());
    payload[2..].copy_from_slice(&count.to_be_bytes());
    build_frame(UNIT_ADDRESS, FN_READ_HOLDING_REGISTERS, &payload)
}

fn preset_multiple_registers(address: u16, data: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(data.len() + 5);
    payload.extend_from_slice(&address.to_be_bytes());
    payload.extend_from_slice(&((data.len() / 2) as u16).to_be_bytes());
    payload.push(data.len() as u8);
    payload.extend_from_slice(data);
    build_frame(UNIT_ADDRESS, FN_PRESET_MULTIPLE_REGISTERS, &payload)
}

fn coil_value(on: bool) -> u16 {
    if on {
        COIL_ON
    } else {
        COIL_OFF
    }
}

/// Alarm reset (ALRS): the rising then falling edge, both must be sent in order
pub fn reset_alarm() -> [Vec<u8>; 2] {
    [
        force_single_coil(RESET_ALARM_COIL, COIL_ON),
        force_single_coil(RESET_ALARM_COIL, COIL_OFF),
    ]
}

/// Home return (HOME): clear then set the home coil
pub fn home_return() -> [Vec<u8>; 2] {
    [
        force_single_coil(HOME_COIL, COIL_OFF),
        force_single_coil(HOME_COIL, COIL_ON),
    ]
}

/// Servo ON/OFF (SON)
pub fn servo(on: bool) -> Vec<u8> {
    force_single_coil(SERVO_COIL, coil_value(on))
}

/// PIO/Modbus switching (PMSL); `true` enables Modbus commands
pub fn pio_modbus_switch(modbus: bool) -> Vec<u8> {
    force_single_coil(PIO_MODBUS_SWITCH_COIL, coil_value(modbus))
}

/// Safety speed command (SFTY)
pub fn safety_speed(on: bool) -> Vec<u8> {
    force_single_coil(SAFETY_SPEED_COIL, coil_value(on))
}

/// Brake forced release (BKRL)
pub fn brake_release(release: bool) -> Vec<u8> {
    force_single_coil(BRAKE_RELEASE_COIL, coil_value(release))
}

/// Deceleration stop (STOP): the actuator decelerates to a stop on the edge
pub fn deceleration_stop() -> Vec<u8> {
    force_single_coil(DECELERATION_STOP_COIL, COIL_ON)
}

/// Query the 10 status registers starting at 0x9000
pub fn query_status_registers() -> Vec<u8> {
    query_holding_registers(STATUS_REGISTERS_ADDR, STATUS_REGISTERS_COUNT)
}

/// Query the present alarm code (ALMC)
pub fn query_present_alarm_code() -> Vec<u8> {
    query_holding_registers(PRESENT_ALARM_CODE_ADDR, 1)
}

/// Query the alarm detail block
pub fn query_alarm_detail() -> Vec<u8> {
    query_holding_registers(ALARM_DETAIL_ADDR, ALARM_DETAIL_COUNT)
}

/// Query total moving count and total moving distance
pub fn query_movement_history() -> Vec<u8> {
    query_holding_registers(MOVEMENT_HISTORY_ADDR, MOVEMENT_HISTORY_COUNT)
}

/// Query the input port monitor register
pub fn query_input_signal_status() -> Vec<u8> {
    query_holding_registers(INPUT_SIGNAL_STATUS_ADDR, 2)
}

/// Query the force feedback data register
pub fn query_force_feedback() -> Vec<u8> {
    query_holding_registers(FORCE_FEEDBACK_ADDR, 2)
}

/// Direct write of the target position (PCMD) only, in 0.01 mm
pub fn position_command(target_position: i32) -> Vec<u8> {
    preset_multiple_registers(POSITION_WRITE_ADDR, &target_position.to_be_bytes())
}

/// Direct write of target position, band, velocity and acceleration
pub fn position_velocity_acceleration(
    target_position: i32,
    velocity: u32,
    acceleration: u16,
    position_band: i32,
) -> Vec<u8> {
    let mut data = Vec::with_capacity(14);
    data.extend_from_slice(&target_position.to_be_bytes());
    data.extend_from_slice(&position_band.to_be_bytes());
    data.extend_from_slice(&velocity.to_be_bytes());
    data.extend_from_slice(&acceleration.to_be_bytes());
    preset_multiple_registers(POSITION_WRITE_ADDR, &data)
}

/// Positioning data direct writing with push current and control flags.
///
/// * `target_position` - 0.01 mm
/// * `position_band` - 0.01 mm (10 = 0.1 mm)
/// * `velocity` - 0.01 mm/s
/// * `acceleration` - 0.01 G, valid range 1..=300
/// * `push_current_limit` - PPOW, 51..=178 or 0 for no limit
///
/// The controller answers with an 8 byte write response.
pub fn numerical_value_movement(
    target_position: i32,
    position_band: i32,
    velocity: u32,
    acceleration: u16,
    push_current_limit: u16,
    control_flags: Ctlf,
) -> crate::Result<Vec<u8>> {
    if push_current_limit != 0
        && !(PUSH_CURRENT_MIN..=PUSH_CURRENT_MAX).contains(&push_current_limit)
    {
        return Err(crate::Error::InvalidArgument(format!(
            "push current limit {} outside {}..={} (or 0)",
            push_current_limit, PUSH_CURRENT_MIN, PUSH_CURRENT_MAX
        )));
    }

    let mut data = Vec::with_capacity(18);
    data.extend_from_slice(&target_position.to_be_bytes());
    data.extend_from_slice(&position_band.to_be_bytes());
    data.extend_from_slice(&velocity.to_be_bytes());
    data.extend_from_slice(&acceleration.to_be_bytes());
    data.extend_from_slice(&push_current_limit.to_be_bytes());
    data.extend_from_slice(&control_flags.bits().to_be_bytes());
    Ok(preset_multiple_registers(POSITION_WRITE_ADDR, &data))
}

/// Combine control flags into the CTLF register value
pub fn number_from_flags(flags: &[Ctlf]) -> u16 {
    flags.iter().fold(Ctlf::empty(), |acc, f| acc | *f).bits()
}

fn check_crc(frame: &[u8]) -> Result<(), DecodeError> {
    if frame.len() < 4 {
        return Err(DecodeError::TooShort {
            expected: 4,
            actual: frame.len(),
        });
    }
    let split = frame.len() - 2;
    let computed = crc16(&frame[..split]);
    let presented = u16::from_le_bytes([frame[split], frame[split + 1]]);
    if computed != presented {
        return Err(DecodeError::CrcMismatch {
            presented,
            computed,
        });
    }
    Ok(())
}

/// Parse an exception response (function code with the high bit set)
pub fn parse_exception(frame: &[u8]) -> Result<ModbusException, DecodeError> {
    check_crc(frame)?;
    if frame.len() < 5 {
        return Err(DecodeError::TooShort {
            expected: 5,
            actual: frame.len(),
        });
    }
    let function = frame[1];
    if function & EXCEPTION_FLAG != EXCEPTION_FLAG {
        return Err(DecodeError::NotAnException(function));
    }
    let code = frame[2];
    let message = (code as usize)
        .checked_sub(1)
        .and_then(|i| EXCEPTION_MESSAGES.get(i))
        .copied()
        .unwrap_or("Unknown Exception Code");
    Ok(ModbusException {
        original_function: function ^ EXCEPTION_FLAG,
        code,
        message,
    })
}

/// Validate CRC, exception bit and function code of a response
fn check_response(frame: &[u8], expected_function: u8) -> Result<(), DecodeError> {
    check_crc(frame)?;
    let function = frame[1];
    if function & EXCEPTION_FLAG == EXCEPTION_FLAG {
        return Err(DecodeError::Exception(parse_exception(frame)?));
    }
    if function != expected_function {
        return Err(DecodeError::UnexpectedFunction {
            expected: expected_function,
            actual: function,
        });
    }
    Ok(())
}

/// Extract the register data of a read holding registers response
pub fn parse_holding_registers_response(frame: &[u8]) -> Result<&[u8], DecodeError> {
    check_response(frame, FN_READ_HOLDING_REGISTERS)?;
    if frame.len() < 5 {
        return Err(DecodeError::TooShort {
            expected: 5,
            actual: frame.len(),
        });
    }
    let declared = frame[2] as usize;
    let data = &frame[3..frame.len() - 2];
    if declared != data.len() {
        return Err(DecodeError::ByteCountMismatch {
            declared,
            actual: data.len(),
        });
    }
    Ok(data)
}

fn exact_length(data: &[u8], expected: usize) -> Result<(), DecodeError> {
    if data.len() != expected {
        return Err(DecodeError::UnexpectedLength {
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

fn be_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([data[offset], data[offset + 1]])
}

fn be_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// Map the status block data to its registers
pub fn parse_status_registers(data: &[u8]) -> Result<StatusRegisters, DecodeError> {
    if data.len() < 20 {
        return Err(DecodeError::TooShort {
            expected: 20,
            actual: data.len(),
        });
    }
    Ok(StatusRegisters {
        pnow: be_u32(data, 0) as i32,
        almc: be_u16(data, 4),
        dipm: be_u16(data, 6),
        dipo: be_u16(data, 8),
        dss1: Dss1::from_bits_truncate(be_u16(data, 10)),
        dss2: Dss2::from_bits_truncate(be_u16(data, 12)),
        dsse: Dsse::from_bits_truncate(be_u16(data, 14)),
        stat: Stat::from_bits_truncate(be_u32(data, 16)),
    })
}

/// Parse a full response to [`query_status_registers`]
pub fn parse_query_status_response(frame: &[u8]) -> Result<StatusRegisters, DecodeError> {
    parse_status_registers(parse_holding_registers_response(frame)?)
}

/// Parse the echo of a single coil write or the response of a block write
pub fn parse_write_response(frame: &[u8], expected_function: u8) -> Result<WriteAck, DecodeError> {
    check_response(frame, expected_function)?;
    exact_length(frame, WRITE_RESPONSE_SIZE)?;
    Ok(WriteAck {
        function: frame[1],
        address: be_u16(frame, 2),
        value: be_u16(frame, 4),
    })
}

/// Parse the response to [`query_present_alarm_code`]
pub fn parse_present_alarm_code_response(frame: &[u8]) -> Result<u16, DecodeError> {
    let data = parse_holding_registers_response(frame)?;
    exact_length(data, 2)?;
    Ok(be_u16(data, 0))
}

/// Parse the response to [`query_alarm_detail`]
pub fn parse_alarm_detail_response(frame: &[u8]) -> Result<AlarmDetail, DecodeError> {
    let data = parse_holding_registers_response(frame)?;
    exact_length(data, 12)?;
    Ok(AlarmDetail {
        detail_code: be_u16(data, 0),
        address: be_u16(data, 2),
        code: be_u32(data, 4),
        occurrence_time: be_u32(data, 8),
    })
}

/// Parse the response to [`query_movement_history`]
pub fn parse_movement_history_response(frame: &[u8]) -> Result<MovementHistory, DecodeError> {
    let data = parse_holding_registers_response(frame)?;
    exact_length(data, 8)?;
    Ok(MovementHistory {
        total_moving_count: be_u32(data, 0),
        total_moving_distance: be_u32(data, 4),
    })
}

/// Parse the response to [`query_input_signal_status`], returning DIPM
pub fn parse_input_signal_status_response(frame: &[u8]) -> Result<u16, DecodeError> {
    let data = parse_holding_registers_response(frame)?;
    exact_length(data, 4)?;
    Ok(be_u16(data, 0))
}

/// Parse the response to [`query_force_feedback`], in 0.01 N
pub fn parse_force_feedback_response(frame: &[u8]) -> Result<i32, DecodeError> {
    let data = parse_holding_registers_response(frame)?;
    exact_length(data, 4)?;
    Ok(be_u32(data, 0) as i32)
}

/// Expected response size of a read of `registers` holding registers
pub fn read_response_size(registers: u16) -> usize {
    5 + registers as usize * 2
}
