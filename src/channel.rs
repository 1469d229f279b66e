//! Exclusive command/response channel over a serial stream.
//!
//! All device I/O goes through a single gate. A caller acquires the gate with
//! a timeout, writes one frame and races the read of the expected response
//! against the read timeout. [`CommandChannel::exchange_with_retry`] is the one
//! place that tolerates a device that drops or garbles bytes.

use crate::codec::to_hex;
use crate::constants::*;
use crate::error::{Error, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, MutexGuard};

/// Trait for types that can be used as async serial streams.
pub trait SerialIo: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialIo for T {}

/// Dynamic serial stream type.
pub type DynSerial = Box<dyn SerialIo>;

/// Open a serial port with the controller line settings (8N1, no flow control).
pub fn open_serial_port(port_name: &str, baud_rate: u32) -> Result<DynSerial> {
    use tokio_serial::SerialPortBuilderExt;

    let port = tokio_serial::new(port_name, baud_rate)
        .data_bits(DATA_BITS)
        .stop_bits(STOP_BITS)
        .parity(PARITY)
        .flow_control(tokio_serial::FlowControl::None)
        .open_native_async()?;

    log::info!("Opened serial port {} at {} bps", port_name, baud_rate);
    Ok(Box::new(port))
}

/// List available serial ports
pub fn list_ports() -> Result<Vec<serialport::SerialPortInfo>> {
    Ok(serialport::available_ports()?)
}

/// Attempt budget of a retried exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Number of attempts, at least one is always made
    pub retry_count: u32,
    /// Wait between attempts, spent outside the gate
    pub retry_interval: Duration,
    /// Gate acquisition timeout of each attempt
    pub acquire_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            retry_count: DEFAULT_RETRY_COUNT,
            retry_interval: Duration::from_millis(DEFAULT_RETRY_INTERVAL_MS),
            acquire_timeout: Duration::from_millis(QUERY_ACQUIRE_TIMEOUT_MS),
        }
    }
}

impl RetryPolicy {
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }
}

/// Proof of exclusive access to the serial stream
pub struct ChannelGuard<'a> {
    port: MutexGuard<'a, Option<DynSerial>>,
}

/// Serializes every command/response exchange on one serial stream
pub struct CommandChannel {
    port: Mutex<Option<DynSerial>>,
    read_timeout: Duration,
    closed: AtomicBool,
    frames_written: AtomicUsize,
}

impl CommandChannel {
    pub fn new(port: DynSerial, read_timeout: Duration) -> Self {
        CommandChannel {
            port: Mutex::new(Some(port)),
            read_timeout,
            closed: AtomicBool::new(false),
            frames_written: AtomicUsize::new(0),
        }
    }

    /// Take the exclusive gate, failing with [`Error::Busy`] after `timeout`.
    pub async fn acquire(&self, timeout: Duration) -> Result<ChannelGuard<'_>> {
        if self.is_closed() {
            return Err(Error::ChannelClosed("channel is closed".to_string()));
        }
        let port = tokio::time::timeout(timeout, self.port.lock())
            .await
            .map_err(|_| Error::Busy { timeout })?;
        Ok(ChannelGuard { port })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of frames written since the channel was opened
    pub fn frames_written(&self) -> usize {
        self.frames_written.load(Ordering::SeqCst)
    }

    fn mark_closed(&self, guard: &mut ChannelGuard<'_>, reason: String) -> Error {
        self.closed.store(true, Ordering::SeqCst);
        guard.port.take();
        log::error!("Serial channel lost: {}", reason);
        Error::ChannelClosed(reason)
    }

    /// Write `frame`, then wait up to the read timeout for `expected_size` bytes.
    ///
    /// Returns `None` when nothing arrived in time. A short buffer is returned
    /// as-is when the stream ends or the timeout hits mid-frame; the caller's
    /// parser rejects it.
    pub async fn exchange_once(
        &self,
        guard: &mut ChannelGuard<'_>,
        frame: &[u8],
        expected_size: usize,
    ) -> Result<Option<Vec<u8>>> {
        let write_result = match guard.port.as_mut() {
            Some(port) => {
                drain_input(port).await;
                log::trace!("TX {}", to_hex(frame));
                match port.write_all(frame).await {
                    Ok(()) => port.flush().await,
                    Err(e) => Err(e),
                }
            }
            None => return Err(Error::ChannelClosed("channel is closed".to_string())),
        };
        if let Err(e) = write_result {
            return Err(self.mark_closed(guard, format!("write failed: {}", e)));
        }
        self.frames_written.fetch_add(1, Ordering::SeqCst);

        let port = match guard.port.as_mut() {
            Some(port) => port,
            None => return Err(Error::ChannelClosed("channel is closed".to_string())),
        };
        let deadline = tokio::time::Instant::now() + self.read_timeout;
        match read_bytes(port, expected_size, deadline).await {
            Ok(response) if response.is_empty() => {
                log::trace!("RX timeout after {:?}", self.read_timeout);
                Ok(None)
            }
            Ok(response) => {
                log::trace!("RX {}", to_hex(&response));
                Ok(Some(response))
            }
            Err(e) => Err(self.mark_closed(guard, format!("read failed: {}", e))),
        }
    }

    /// Send `frame` until `extractor` accepts a response.
    ///
    /// An extractor error or `Ok(None)` counts as a failed attempt. After
    /// `policy.retry_count` failed attempts the call fails with
    /// [`Error::CommandFailed`]. Gate timeouts and channel loss are returned
    /// immediately.
    pub async fn exchange_with_retry<T, F>(
        &self,
        command: &str,
        frame: &[u8],
        expected_size: usize,
        mut extractor: F,
        policy: &RetryPolicy,
    ) -> Result<T>
    where
        F: FnMut(&[u8]) -> Result<Option<T>>,
    {
        let attempts = policy.retry_count.max(1);

        for attempt in 1..=attempts {
            let response = {
                let mut guard = self.acquire(policy.acquire_timeout).await?;
                self.exchange_once(&mut guard, frame, expected_size).await?
            };

            match response {
                Some(bytes) => match extractor(&bytes) {
                    Ok(Some(value)) => return Ok(value),
                    Ok(None) => log::warn!(
                        "{}: response not accepted (attempt {}/{}): {}",
                        command,
                        attempt,
                        attempts,
                        to_hex(&bytes)
                    ),
                    Err(e) => log::warn!(
                        "{}: response extractor failed (attempt {}/{}): {} [{}]",
                        command,
                        attempt,
                        attempts,
                        e,
                        to_hex(&bytes)
                    ),
                },
                None => log::warn!(
                    "{}: no response (attempt {}/{})",
                    command,
                    attempt,
                    attempts
                ),
            }

            if attempt < attempts {
                tokio::time::sleep(policy.retry_interval).await;
            }
        }

        Err(Error::CommandFailed {
            command: command.to_string(),
            retries: attempts,
        })
    }

    /// Shut the stream down; later exchanges fail with [`Error::ChannelClosed`].
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let mut port = self.port.lock().await;
        if let Some(mut stream) = port.take() {
            if let Err(e) = stream.shutdown().await {
                log::debug!("Serial shutdown failed: {}", e);
            }
        }
    }
}

/// Read until `expected_size` bytes are collected, the stream ends or
/// `deadline` passes. Whatever arrived by then is returned.
///
/// An exception response is shorter than any regular one, so reading stops
/// once its header shows the exception bit.
async fn read_bytes(
    port: &mut DynSerial,
    expected_size: usize,
    deadline: tokio::time::Instant,
) -> std::io::Result<Vec<u8>> {
    let mut expected_size = expected_size;
    let mut response = Vec::with_capacity(expected_size);
    let mut buf = [0u8; 64];

    while response.len() < expected_size {
        let wanted = (expected_size - response.len()).min(buf.len());
        let read = match tokio::time::timeout_at(deadline, port.read(&mut buf[..wanted])).await {
            Ok(read) => read,
            Err(_) => break,
        };
        match read {
            Ok(0) => break,
            Ok(n) => response.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => break,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
        if response.len() >= 2 && response[1] & EXCEPTION_FLAG != 0 {
            expected_size = expected_size.min(EXCEPTION_RESPONSE_SIZE);
        }
    }
    Ok(response)
}

/// Discard bytes left over from an exchange that timed out
async fn drain_input(port: &mut DynSerial) {
    let mut discard = [0u8; 64];
    loop {
        match tokio::time::timeout(Duration::from_millis(1), port.read(&mut discard)).await {
            Ok(Ok(0)) | Ok(Err(_)) | Err(_) => break,
            Ok(Ok(n)) => log::trace!("Discarded {} stale bytes", n),
        }
    }
}
