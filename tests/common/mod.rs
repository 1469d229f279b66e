//! Scripted controller on the far end of a `tokio::io::duplex` stream.

#![allow(dead_code)]

use knockrod_protocol::codec::build_frame;
use knockrod_protocol::constants::*;
use knockrod_protocol::{Dss1, DynSerial, SessionConfig, SessionEvent};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Register contents and behavior switches of the simulated controller
#[derive(Debug, Default)]
pub struct DeviceModel {
    pub position: i32,
    pub alarm_code: u16,
    pub input: u16,
    pub dss1: u16,
    pub dsse: u16,
    /// Force feedback in 0.01 N
    pub force: i32,
    /// Status queries after the home command until HEND is reported, `None` never
    pub home_completes_after: Option<u32>,
    pub home_started: bool,
    pub status_queries_since_home: u32,
    /// Answer nothing at all
    pub silent: bool,
    /// Corrupt the next N responses
    pub garble_next: u32,
    /// Every request frame received, in order
    pub frames: Vec<Vec<u8>>,
}

impl DeviceModel {
    pub fn homed() -> Self {
        DeviceModel {
            dss1: Dss1::HEND.bits() | Dss1::SV.bits(),
            ..Default::default()
        }
    }

    pub fn unhomed(completes_after: Option<u32>) -> Self {
        DeviceModel {
            dss1: Dss1::SV.bits(),
            home_completes_after: completes_after,
            ..Default::default()
        }
    }

    /// Frames written to a coil
    pub fn coil_writes(&self, coil: u16) -> Vec<u16> {
        self.frames
            .iter()
            .filter(|f| f[1] == FN_FORCE_SINGLE_COIL && u16::from_be_bytes([f[2], f[3]]) == coil)
            .map(|f| u16::from_be_bytes([f[4], f[5]]))
            .collect()
    }

    /// (target, velocity) of every positioning block write
    pub fn moves(&self) -> Vec<(i32, u32)> {
        self.frames
            .iter()
            .filter(|f| f[1] == FN_PRESET_MULTIPLE_REGISTERS && f.len() >= 19)
            .map(|f| {
                (
                    i32::from_be_bytes([f[7], f[8], f[9], f[10]]),
                    u32::from_be_bytes([f[15], f[16], f[17], f[18]]),
                )
            })
            .collect()
    }

    pub fn status_queries(&self) -> usize {
        self.frames
            .iter()
            .filter(|f| f[1] == FN_READ_HOLDING_REGISTERS && f[2..4] == [0x90, 0x00])
            .count()
    }

    fn respond(&mut self, request: &[u8]) -> Option<Vec<u8>> {
        match request[1] {
            FN_FORCE_SINGLE_COIL => {
                let coil = u16::from_be_bytes([request[2], request[3]]);
                let value = u16::from_be_bytes([request[4], request[5]]);
                if coil == HOME_COIL && value == COIL_ON {
                    self.home_started = true;
                    self.status_queries_since_home = 0;
                    self.position = 0;
                }
                Some(request.to_vec())
            }
            FN_PRESET_MULTIPLE_REGISTERS => {
                self.position = i32::from_be_bytes([request[7], request[8], request[9], request[10]]);
                Some(build_frame(UNIT_ADDRESS, FN_PRESET_MULTIPLE_REGISTERS, &request[2..6]))
            }
            FN_READ_HOLDING_REGISTERS => {
                let address = u16::from_be_bytes([request[2], request[3]]);
                let count = u16::from_be_bytes([request[4], request[5]]);
                let data = self.read_registers(address, count);
                let mut payload = vec![data.len() as u8];
                payload.extend_from_slice(&data);
                Some(build_frame(UNIT_ADDRESS, FN_READ_HOLDING_REGISTERS, &payload))
            }
            _ => None,
        }
    }

    fn read_registers(&mut self, address: u16, count: u16) -> Vec<u8> {
        let mut data = Vec::new();
        match address {
            STATUS_REGISTERS_ADDR => {
                if self.home_started {
                    self.status_queries_since_home += 1;
                    if let Some(after) = self.home_completes_after {
                        if self.status_queries_since_home >= after {
                            self.dss1 |= Dss1::HEND.bits();
                        }
                    }
                }
                data.extend_from_slice(&self.position.to_be_bytes());
                data.extend_from_slice(&self.alarm_code.to_be_bytes());
                data.extend_from_slice(&self.input.to_be_bytes());
                data.extend_from_slice(&0u16.to_be_bytes());
                data.extend_from_slice(&self.dss1.to_be_bytes());
                data.extend_from_slice(&0u16.to_be_bytes());
                data.extend_from_slice(&self.dsse.to_be_bytes());
                data.extend_from_slice(&0u32.to_be_bytes());
            }
            INPUT_SIGNAL_STATUS_ADDR => {
                data.extend_from_slice(&self.input.to_be_bytes());
                data.extend_from_slice(&0u16.to_be_bytes());
            }
            FORCE_FEEDBACK_ADDR => data.extend_from_slice(&self.force.to_be_bytes()),
            PRESENT_ALARM_CODE_ADDR => data.extend_from_slice(&self.alarm_code.to_be_bytes()),
            ALARM_DETAIL_ADDR => {
                data.extend_from_slice(&[0x00, 0x00, 0xFF, 0xFF]);
                data.extend_from_slice(&(self.alarm_code as u32).to_be_bytes());
                data.extend_from_slice(&0x172C_643Fu32.to_be_bytes());
            }
            MOVEMENT_HISTORY_ADDR => {
                data.extend_from_slice(&1234u32.to_be_bytes());
                data.extend_from_slice(&56u32.to_be_bytes());
            }
            _ => data.resize(count as usize * 2, 0),
        }
        data
    }
}

pub type SharedModel = Arc<Mutex<DeviceModel>>;

/// Read one request frame, sized by its function code
async fn read_request(stream: &mut DuplexStream) -> Option<Vec<u8>> {
    let mut frame = vec![0u8; 2];
    stream.read_exact(&mut frame).await.ok()?;
    let rest = match frame[1] {
        FN_PRESET_MULTIPLE_REGISTERS => {
            let mut header = [0u8; 5];
            stream.read_exact(&mut header).await.ok()?;
            frame.extend_from_slice(&header);
            header[4] as usize + 2
        }
        _ => 6,
    };
    let mut tail = vec![0u8; rest];
    stream.read_exact(&mut tail).await.ok()?;
    frame.extend_from_slice(&tail);
    Some(frame)
}

/// Start the simulated controller and return the host side of the line
pub fn spawn_device(model: SharedModel) -> (DynSerial, JoinHandle<()>) {
    let (host, mut device) = tokio::io::duplex(1024);
    let handle = tokio::spawn(async move {
        while let Some(request) = read_request(&mut device).await {
            let response = {
                let mut model = model.lock();
                model.frames.push(request.clone());
                if model.silent {
                    None
                } else {
                    let response = model.respond(&request);
                    if model.garble_next > 0 {
                        model.garble_next -= 1;
                        response.map(|mut r| {
                            let last = r.len() - 1;
                            r[last] ^= 0xFF;
                            r
                        })
                    } else {
                        response
                    }
                }
            };
            if let Some(response) = response {
                if device.write_all(&response).await.is_err() {
                    break;
                }
            }
        }
    });
    (Box::new(host), handle)
}

pub fn shared(model: DeviceModel) -> SharedModel {
    Arc::new(Mutex::new(model))
}

pub fn test_config() -> SessionConfig {
    SessionConfig::for_port("mock")
}

/// Every event currently queued
pub fn drain_events(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
