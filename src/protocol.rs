use crate::channel::{open_serial_port, ChannelGuard, CommandChannel, DynSerial, RetryPolicy};
use crate::codec::{self, to_hex};
use crate::config::SessionConfig;
use crate::constants::*;
use crate::error::{DecodeError, Error, Result};
use crate::motion::{speed_for_duration, MotionTrace};
use crate::types::*;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub(crate) struct Inner {
    pub(crate) channel: CommandChannel,
    pub(crate) config: SessionConfig,
    state: RwLock<Arc<DeviceState>>,
    session_state: RwLock<SessionState>,
    pub(crate) trace: Mutex<MotionTrace>,
    events: broadcast::Sender<SessionEvent>,
    poller: Mutex<Option<BackgroundTask>>,
    pub(crate) oscillation: Mutex<Option<BackgroundTask>>,
    pub(crate) oscillation_params: Mutex<OscillationParams>,
}

/// Spawned loop that stops at its next await point outside an exchange.
///
/// Dropping the handle cancels the loop. A frame exchange that is already
/// running is finished first, so no partial frame is left on the line.
pub(crate) struct BackgroundTask {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundTask {
    pub(crate) fn spawn<F, Fut>(task: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(task(cancel.clone()));
        BackgroundTask {
            cancel,
            handle: Some(handle),
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
            && self
                .handle
                .as_ref()
                .map_or(false, |handle| !handle.is_finished())
    }

    /// Cancel and wait until the loop has returned
    pub(crate) async fn join(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                log::error!("Background task failed: {}", e);
            }
        }
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Session with one RC controller.
///
/// Cloning gives another handle to the same session.
#[derive(Clone)]
pub struct KnockRod {
    pub(crate) inner: Arc<Inner>,
}

impl KnockRod {
    /// Open the configured serial port. Call [`KnockRod::init`] afterwards.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let port = open_serial_port(&config.port, config.baud_rate)?;
        Self::with_stream(port, config)
    }

    /// Create a session on an already open byte stream
    pub fn with_stream(stream: DynSerial, config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let inner = Inner {
            channel: CommandChannel::new(stream, config.read_timeout()),
            state: RwLock::new(Arc::new(DeviceState::default())),
            session_state: RwLock::new(SessionState::Initializing),
            trace: Mutex::new(MotionTrace::new(Instant::now())),
            events,
            poller: Mutex::new(None),
            oscillation: Mutex::new(None),
            oscillation_params: Mutex::new(OscillationParams {
                acceleration: config.default_acceleration,
                ..Default::default()
            }),
            config,
        };
        Ok(KnockRod {
            inner: Arc::new(inner),
        })
    }

    /// List available serial ports
    pub fn list_ports() -> Result<Vec<serialport::SerialPortInfo>> {
        crate::channel::list_ports()
    }

    /// Bring the controller into command mode, home it if needed and start polling.
    ///
    /// Homing may take up to the configured homing timeout. On
    /// [`Error::HomingFailed`] the session stays open so alarms can be read.
    pub async fn init(&self) -> Result<()> {
        self.set_session_state(SessionState::Initializing);

        self.reset_alarm().await?;
        self.single_command("pio/modbus switch", &codec::pio_modbus_switch(true))
            .await?;
        self.set_servo(true).await?;

        let state = self.query_status().await?;
        self.emit(SessionEvent::Connected);
        log::info!("Connected, position {}", state.current_position);

        if state.is_homed() {
            log::info!("Home return already complete, skipping homing");
            self.inner.trace.lock().reference_position = state.current_position;
        } else {
            log::info!("Started homing, waiting for homing to complete...");
            self.set_session_state(SessionState::Homing);
            if let Err(e) = self.home().await {
                if !e.is_terminal() {
                    self.set_session_state(SessionState::Initializing);
                }
                return Err(e);
            }
            log::info!("Homing complete");
        }

        self.start_polling();
        self.set_session_state(SessionState::Ready);
        self.emit(SessionEvent::Ready);
        log::info!("Initialize complete");
        Ok(())
    }

    /// Run home return and wait until the home-complete flag is reported.
    pub async fn home(&self) -> Result<()> {
        let [release, start] = codec::home_return();
        {
            let mut guard = self.acquire_command_gate().await?;
            self.send_command(&mut guard, "home return", &release).await?;
            tokio::time::sleep(Duration::from_millis(SILENT_INTERVAL_MS)).await;
            self.send_command(&mut guard, "home return", &start).await?;
        }

        // let the homing status settle
        tokio::time::sleep(Duration::from_millis(HOMING_SETTLE_MS)).await;

        let timeout = self.inner.config.homing_timeout();
        let started = Instant::now();
        loop {
            match self.query_status().await {
                Ok(state) if state.is_homed() => break,
                Ok(_) => {}
                Err(e) if e.is_terminal() => return Err(e),
                Err(e) => log::debug!("Status query during homing failed: {}", e),
            }
            if started.elapsed() >= timeout {
                return Err(Error::HomingFailed {
                    waited: started.elapsed(),
                });
            }
            tokio::time::sleep(self.inner.config.homing_check_interval()).await;
        }

        self.inner.trace.lock().reset(Instant::now());
        Ok(())
    }

    /// Clear the present alarm (rising then falling edge on ALRS)
    pub async fn reset_alarm(&self) -> Result<()> {
        let [on, off] = codec::reset_alarm();
        let mut guard = self.acquire_command_gate().await?;
        self.send_command(&mut guard, "reset alarm", &on).await?;
        tokio::time::sleep(Duration::from_millis(RESET_ALARM_SETTLE_MS)).await;
        self.send_command(&mut guard, "reset alarm", &off).await?;
        Ok(())
    }

    pub async fn set_servo(&self, on: bool) -> Result<()> {
        log::info!("Setting servo {}", if on { "on" } else { "off" });
        self.single_command("servo", &codec::servo(on)).await
    }

    pub async fn set_safety_speed(&self, on: bool) -> Result<()> {
        self.single_command("safety speed", &codec::safety_speed(on))
            .await
    }

    /// Decelerate and stop the current move
    pub async fn stop(&self) -> Result<()> {
        self.single_command("deceleration stop", &codec::deceleration_stop())
            .await?;
        let now = Instant::now();
        let mut trace = self.inner.trace.lock();
        let position = trace.estimate(now);
        *trace = MotionTrace {
            reference_time: now,
            reference_position: position,
            destination: None,
        };
        Ok(())
    }

    /// Force the brake released (or engaged again)
    pub async fn release_brake(&self, release: bool) -> Result<()> {
        self.single_command("brake release", &codec::brake_release(release))
            .await
    }

    /// Move to an absolute position.
    ///
    /// * `position` - target in 0.01 mm, clamped to the travel range
    /// * `speed` - 0.01 mm/s, clamped to `1..=max_speed`
    /// * `acceleration` - 0.01 G
    pub async fn move_to(&self, position: i32, speed: u32, acceleration: u16) -> Result<()> {
        let now = Instant::now();
        let target = position.clamp(0, self.travel_range());
        let speed = speed.clamp(1, self.inner.config.max_speed);
        let frame = codec::numerical_value_movement(
            target,
            self.inner.config.position_band,
            speed,
            acceleration,
            0,
            Ctlf::empty(),
        )?;

        self.single_command("move", &frame).await?;
        self.inner.trace.lock().set_destination(now, target, speed);
        Ok(())
    }

    /// Move to an absolute position at the configured default speed and acceleration
    pub async fn move_to_position(&self, position: i32) -> Result<()> {
        self.move_to(
            position,
            self.inner.config.default_speed,
            self.inner.config.default_acceleration,
        )
        .await
    }

    /// Arrive at `relative_target` (0..1 of the travel range) in about `duration`.
    ///
    /// The speed is derived from the estimated current position. Nothing is
    /// sent when that speed comes out as zero.
    pub async fn move_to_within(
        &self,
        relative_target: f64,
        duration: Duration,
        acceleration: u16,
    ) -> Result<()> {
        if !(0.0..=1.0).contains(&relative_target) {
            return Err(Error::InvalidArgument(format!(
                "Relative target {} outside 0..1",
                relative_target
            )));
        }
        let target = (relative_target * self.travel_range() as f64).round() as i32;
        let estimate = self.estimated_position();
        let speed = speed_for_duration(target.saturating_sub(estimate), duration);
        if speed == 0 {
            log::debug!("Already at {}, skipping move", target);
            return Ok(());
        }
        self.move_to(target, speed, acceleration).await
    }

    /// Fast move back to the retract position
    pub async fn move_retract(&self) -> Result<()> {
        let frame = codec::numerical_value_movement(
            RETRACT_POSITION,
            self.inner.config.position_band,
            RETRACT_SPEED,
            DEFAULT_ACCELERATION,
            0,
            Ctlf::empty(),
        )?;
        let policy = self.inner.config.retry_policy().with_retry_count(1);
        let now = Instant::now();

        self.observe(
            self.inner
                .channel
                .exchange_with_retry(
                    "move retract",
                    &frame,
                    WRITE_RESPONSE_SIZE,
                    |bytes| Ok(Some(codec::parse_write_response(bytes, FN_PRESET_MULTIPLE_REGISTERS)?)),
                    &policy,
                )
                .await,
        )?;
        self.inner
            .trace
            .lock()
            .set_destination(now, RETRACT_POSITION, RETRACT_SPEED);
        Ok(())
    }

    /// Read the status block and replace the device state.
    pub async fn query_status(&self) -> Result<Arc<DeviceState>> {
        let registers = self
            .query(
                "query status",
                &codec::query_status_registers(),
                STATUS_RESPONSE_SIZE,
                codec::parse_query_status_response,
            )
            .await?;
        Ok(self.replace_state(&registers))
    }

    /// Present alarm code, 0 when no alarm is active
    pub async fn read_alarm_code(&self) -> Result<u16> {
        self.query(
            "query alarm code",
            &codec::query_present_alarm_code(),
            codec::read_response_size(1),
            codec::parse_present_alarm_code_response,
        )
        .await
    }

    pub async fn read_alarm_detail(&self) -> Result<AlarmDetail> {
        self.query(
            "query alarm detail",
            &codec::query_alarm_detail(),
            codec::read_response_size(ALARM_DETAIL_COUNT),
            codec::parse_alarm_detail_response,
        )
        .await
    }

    /// Input port monitor word (DIPM)
    pub async fn read_input_status(&self) -> Result<u16> {
        self.query(
            "query input status",
            &codec::query_input_signal_status(),
            codec::read_response_size(2),
            codec::parse_input_signal_status_response,
        )
        .await
    }

    /// Force feedback in 0.01 N
    pub async fn read_force_feedback(&self) -> Result<i32> {
        self.query(
            "query force feedback",
            &codec::query_force_feedback(),
            codec::read_response_size(2),
            codec::parse_force_feedback_response,
        )
        .await
    }

    pub async fn read_movement_history(&self) -> Result<MovementHistory> {
        self.query(
            "query movement history",
            &codec::query_movement_history(),
            codec::read_response_size(MOVEMENT_HISTORY_COUNT),
            codec::parse_movement_history_response,
        )
        .await
    }

    /// Stop polling and oscillating, then close the serial stream
    pub async fn disconnect(&self) {
        self.stop_polling();
        self.stop_oscillation();
        self.inner.channel.close().await;
        self.mark_disconnected();
    }

    /// Receive session notifications
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Most recent device state
    pub fn state(&self) -> Arc<DeviceState> {
        self.inner.state.read().clone()
    }

    pub fn session_state(&self) -> SessionState {
        *self.inner.session_state.read()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Travel range in 0.01 mm
    pub fn travel_range(&self) -> i32 {
        self.inner.config.travel_range()
    }

    /// Position extrapolated from the last commanded move, 0.01 mm
    pub fn estimated_position(&self) -> i32 {
        self.inner.trace.lock().estimate(Instant::now())
    }

    /// Exclusive command channel shared by every operation and the poller
    pub fn channel(&self) -> &CommandChannel {
        &self.inner.channel
    }

    pub fn is_polling(&self) -> bool {
        self.inner
            .poller
            .lock()
            .as_ref()
            .map_or(false, BackgroundTask::is_running)
    }

    /// Start the periodic status poll, replacing a running one
    pub fn start_polling(&self) {
        let session = Arc::downgrade(&self.inner);
        let interval = self.inner.config.poll_interval();
        let mut poller = self.inner.poller.lock();
        poller.take();
        *poller = Some(BackgroundTask::spawn(move |cancel| {
            poll_status(session, interval, cancel)
        }));
    }

    /// Stop the periodic poll once its current exchange, if any, is done
    pub fn stop_polling(&self) {
        self.inner.poller.lock().take();
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        // no subscribers is fine
        let _ = self.inner.events.send(event);
    }

    fn set_session_state(&self, state: SessionState) {
        let previous = std::mem::replace(&mut *self.inner.session_state.write(), state);
        if previous != state {
            log::debug!("Session state {:?} -> {:?}", previous, state);
        }
    }

    /// Drop the device state and notify subscribers, once
    fn mark_disconnected(&self) {
        let previous = std::mem::replace(
            &mut *self.inner.session_state.write(),
            SessionState::Disconnected,
        );
        if previous == SessionState::Disconnected {
            return;
        }
        *self.inner.state.write() = Arc::new(DeviceState::default());
        log::info!("Disconnected");
        self.emit(SessionEvent::Disconnected);
    }

    /// Tear the session down when `result` reports a lost channel.
    pub(crate) fn observe<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_terminal() {
                self.stop_polling();
                self.stop_oscillation();
                self.mark_disconnected();
            }
        }
        result
    }

    fn replace_state(&self, registers: &StatusRegisters) -> Arc<DeviceState> {
        let new = Arc::new(DeviceState::from_registers(registers, Utc::now()));
        let old = std::mem::replace(&mut *self.inner.state.write(), new.clone());

        match (old.input_pressed(), new.input_pressed()) {
            (false, true) => self.emit(SessionEvent::InputPressed),
            (true, false) => self.emit(SessionEvent::InputReleased),
            _ => {}
        }
        self.emit(SessionEvent::StateChanged {
            old,
            new: new.clone(),
        });
        new
    }

    async fn acquire_command_gate(&self) -> Result<ChannelGuard<'_>> {
        self.observe(
            self.inner
                .channel
                .acquire(self.inner.config.command_acquire_timeout())
                .await,
        )
    }

    /// Send one frame and log its echo. A missing or bad echo is not an error.
    async fn send_command(
        &self,
        guard: &mut ChannelGuard<'_>,
        name: &str,
        frame: &[u8],
    ) -> Result<Option<WriteAck>> {
        let response = self.observe(
            self.inner
                .channel
                .exchange_once(guard, frame, WRITE_RESPONSE_SIZE)
                .await,
        )?;
        let bytes = match response {
            Some(bytes) => bytes,
            None => {
                log::warn!("{}: no response", name);
                return Ok(None);
            }
        };

        match codec::parse_write_response(&bytes, frame[1]) {
            Ok(ack) => {
                log::debug!("{}: response {}", name, to_hex(&bytes));
                Ok(Some(ack))
            }
            Err(DecodeError::Exception(exception)) => {
                log::warn!("{}: controller exception: {}", name, exception);
                Ok(None)
            }
            Err(e) => {
                log::warn!("{}: unexpected response {}: {}", name, to_hex(&bytes), e);
                Ok(None)
            }
        }
    }

    async fn single_command(&self, name: &str, frame: &[u8]) -> Result<()> {
        let mut guard = self.acquire_command_gate().await?;
        self.send_command(&mut guard, name, frame).await?;
        Ok(())
    }

    async fn query<T>(
        &self,
        name: &str,
        frame: &[u8],
        expected_size: usize,
        parse: fn(&[u8]) -> std::result::Result<T, DecodeError>,
    ) -> Result<T> {
        let policy: RetryPolicy = self.inner.config.retry_policy();
        self.observe(
            self.inner
                .channel
                .exchange_with_retry(name, frame, expected_size, |bytes| Ok(Some(parse(bytes)?)), &policy)
                .await,
        )
    }
}

/// Periodic status poll, ends when cancelled, when the session is dropped or when polling gives up
async fn poll_status(session: Weak<Inner>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let rod = match session.upgrade() {
            Some(inner) => KnockRod { inner },
            None => break,
        };

        match rod.query_status().await {
            Ok(_) => {}
            Err(Error::Busy { .. }) => log::debug!("Channel busy, skipping status poll"),
            Err(e) if e.is_terminal() => break,
            Err(e) => {
                log::error!("Status query polling failed. Stopping now: {}", e);
                rod.emit(SessionEvent::PollingStopped {
                    error: e.to_string(),
                });
                break;
            }
        }
    }
}
