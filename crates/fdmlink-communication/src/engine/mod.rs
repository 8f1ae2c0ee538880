//! Connection and streaming engine
//!
//! [`PrinterEngine`] owns one link (serial or emulated) and exposes
//! connect/disconnect, queries, single commands and G-code streaming with
//! pause/resume and emergency stop. Two background tasks run alongside the
//! caller: the link monitor for the lifetime of a connection and the
//! streaming worker for the lifetime of a job.
//!
//! Locking:
//! - `state` (parking_lot) guards every piece of shared mutable state and is
//!   only held inside short closures, never across an await.
//! - `command_lock` (tokio) serialises whole request/ack exchanges so an
//!   interactive command never lands between a streamed line and its ack.

mod monitor;
mod progress;
mod state;
mod worker;

pub use state::{EngineState, EngineStatus};

use crate::communication::{
    emulated::EMULATOR_PORT, exchange, EmulatorLink, Reply, SerialLink, SharedLink,
};
use crate::emulator::DeviceEmulator;
use crate::firmware::{parse_line, FirmwareResponse, Identification};
use crate::gcode;
use crate::scanner::{DetectedDevice, PortProber, Scanner, SerialProber};
use chrono::Utc;
use fdmlink_core::event_bus::{
    ConnectionEvent, DisconnectReason, ErrorEvent, JobEvent, TemperatureEvent,
};
use fdmlink_core::{
    thread_safe, CommunicationError, ConnectionError, ConnectionStatus, EngineEvent, Error, EventBus, JobStatus,
    PrintJob, PrinterInfo, ProgressCallback, Result, StateError, StreamState,
    TemperatureSnapshot, ThreadSafe, ValidationError,
};
use fdmlink_devicedb::model::SUPPORTED_BAUD_RATES;
use fdmlink_devicedb::{DialectCommands, PrinterProfile, ProfileRegistry};
use fdmlink_settings::Config;
use parking_lot::{Mutex, RwLock};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Budget for each best-effort write during an emergency stop
const EMERGENCY_WRITE_TIMEOUT: Duration = Duration::from_millis(500);

/// Identification attempts during connect
const HANDSHAKE_ATTEMPTS: u32 = 2;

struct WorkerHandle {
    job_id: String,
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
    dispatcher: Option<JoinHandle<()>>,
}

struct MonitorHandle {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Tasks {
    worker: Option<WorkerHandle>,
    monitor: Option<MonitorHandle>,
    ticker: Option<JoinHandle<()>>,
}

/// Port and baud rate of the open link, kept for reconnects
#[derive(Debug, Clone)]
pub(crate) struct LinkTarget {
    port: String,
    baud_rate: u32,
    emulated: bool,
}

pub(crate) struct Inner {
    config: Config,
    registry: Arc<ProfileRegistry>,
    prober: Arc<dyn PortProber>,
    state: ThreadSafe<EngineState>,
    link: RwLock<Option<SharedLink>>,
    command_lock: tokio::sync::Mutex<()>,
    events: Arc<EventBus>,
    tasks: Mutex<Tasks>,
    emulator: Mutex<Option<Arc<DeviceEmulator>>>,
    target: Mutex<Option<LinkTarget>>,
}

impl Inner {
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut EngineState) -> R) -> R {
        f(&mut self.state.lock())
    }

    pub(crate) fn read_state<R>(&self, f: impl FnOnce(&EngineState) -> R) -> R {
        f(&self.state.lock())
    }

    pub(crate) fn publish(&self, event: EngineEvent) {
        tracing::trace!("event: {}", event.description());
        self.events.publish(event);
    }

    pub(crate) fn current_link(&self) -> Option<SharedLink> {
        self.link.read().clone()
    }

    pub(crate) fn commands(&self) -> DialectCommands {
        self.read_state(EngineState::commands)
    }

    /// One request/ack exchange on the current link. Callers hold
    /// `command_lock`.
    pub(crate) async fn exchange(&self, line: &str, timeout: Duration) -> Result<Reply> {
        let link = self.current_link().ok_or(StateError::NotConnected)?;
        exchange(link.as_ref(), line, timeout).await
    }

    /// Fold temperature and position reports from a reply into the state
    pub(crate) fn absorb_reply(&self, reply: &Reply) {
        for line in &reply.lines {
            match parse_line(line) {
                Some(FirmwareResponse::Temperature(temps)) => {
                    self.with_state(|s| s.temperatures = temps);
                    self.publish(EngineEvent::Temperature(TemperatureEvent::Updated(temps)));
                }
                Some(FirmwareResponse::Position(position)) => {
                    self.with_state(|s| s.position = position);
                }
                Some(FirmwareResponse::Error(message)) => {
                    tracing::warn!("Firmware error: {}", message);
                    self.with_state(|s| s.last_error = Some(message.clone()));
                    self.publish(EngineEvent::Error(ErrorEvent::Firmware { message }));
                }
                _ => {}
            }
        }
    }

    /// Bring the firmware back after an emergency stop. Callers hold
    /// `command_lock`.
    pub(crate) async fn clear_halt(&self) -> Result<()> {
        let command = self.commands().clear_halt;
        let reply = self
            .exchange(&command, self.config.connection.ack_timeout())
            .await?;
        if !reply.is_ok() {
            return Err(CommunicationError::Rejected {
                command,
                response: reply.text(),
            }
            .into());
        }
        tracing::info!("Cleared firmware halt with '{}'", command);
        self.with_state(|s| {
            s.halted = false;
            s.last_error = None;
        });
        Ok(())
    }

    /// Tell the streaming worker to stop
    pub(crate) fn signal_cancel(&self) {
        if let Some(worker) = self.tasks.lock().worker.as_ref() {
            let _ = worker.cancel.send(true);
        }
    }

    /// Fail the active job (sticky) and stop the worker
    pub(crate) fn fail_stream(&self, reason: &str) {
        let now = Utc::now();
        self.with_state(|s| {
            if s.stream == StreamState::Idle {
                return;
            }
            if let Some(job) = s.job.as_mut() {
                job.fail(reason, now);
            }
        });
        self.signal_cancel();
    }

    /// Wait for the streaming worker to exit, aborting it after
    /// `worker_join_timeout`. Leaves the stream Idle either way.
    async fn join_worker(&self) {
        let Some(worker) = self.tasks.lock().worker.take() else {
            return;
        };
        let _ = worker.cancel.send(true);
        let join_timeout = self.config.streaming.worker_join_timeout();
        let mut handle = worker.handle;
        let exited = tokio::time::timeout(join_timeout, &mut handle).await.is_ok();
        if !exited {
            tracing::warn!(
                "Streaming worker for {} did not stop within {:?}, aborting it",
                worker.job_id,
                join_timeout
            );
            handle.abort();
        }
        if let Some(mut dispatcher) = worker.dispatcher {
            if tokio::time::timeout(Duration::from_millis(200), &mut dispatcher)
                .await
                .is_err()
            {
                dispatcher.abort();
            }
        }

        let now = Utc::now();
        let limit = self.config.streaming.history_size;
        let orphaned = self.with_state(|s| {
            let mut orphaned = None;
            if let Some(job) = s.job.as_mut().filter(|j| j.id == worker.job_id) {
                if !job.is_terminal() {
                    job.finish(JobStatus::Cancelled, now);
                }
                if !exited {
                    orphaned = Some(job.status);
                }
            }
            s.release_stream();
            s.archive_job(limit);
            orphaned
        });
        if let Some(status) = orphaned {
            self.publish(EngineEvent::Job(JobEvent::Finished {
                job_id: worker.job_id,
                status,
            }));
        }
    }

    async fn stop_monitor(&self) {
        let Some(monitor) = self.tasks.lock().monitor.take() else {
            return;
        };
        let _ = monitor.stop.send(true);
        let mut handle = monitor.handle;
        let join_timeout = self.config.streaming.worker_join_timeout();
        if tokio::time::timeout(join_timeout, &mut handle).await.is_err() {
            tracing::warn!("Link monitor did not stop within {:?}, aborting it", join_timeout);
            handle.abort();
        }
    }

    fn stop_ticker(&self) {
        if let Some(ticker) = self.tasks.lock().ticker.take() {
            ticker.abort();
        }
    }

    /// Send the identification command until the device acknowledges it
    async fn handshake(&self, link: &dyn crate::communication::Link) -> Result<String> {
        let identify = DialectCommands::default().identify;
        let timeout = self.config.connection.handshake_timeout();
        let mut last_error = None;
        for attempt in 1..=HANDSHAKE_ATTEMPTS {
            match exchange(link, &identify, timeout).await {
                Ok(reply) if reply.is_ok() => return Ok(reply.text()),
                Ok(reply) => {
                    last_error = Some(format!("unexpected reply: {}", reply.text()));
                }
                Err(e) if e.is_link_failure() => return Err(e),
                Err(e) => last_error = Some(e.to_string()),
            }
            tracing::debug!("Handshake attempt {} on {} failed", attempt, link.name());
        }
        Err(ConnectionError::HandshakeFailed {
            port: link.name().to_string(),
            reason: last_error.unwrap_or_else(|| "no reply".to_string()),
        }
        .into())
    }

    /// Open the link for `target` and identify the printer on it
    async fn open_link(
        &self,
        target: &LinkTarget,
    ) -> Result<(SharedLink, Identification, Option<Arc<DeviceEmulator>>)> {
        let (link, emulator): (SharedLink, _) = if target.emulated {
            let emulator = Arc::new(DeviceEmulator::new(self.config.emulator.clone()));
            (
                Arc::new(EmulatorLink::new(Arc::clone(&emulator))),
                Some(emulator),
            )
        } else {
            (
                Arc::new(SerialLink::open(&target.port, target.baud_rate).await?),
                None,
            )
        };

        match self.handshake(link.as_ref()).await {
            Ok(response) => {
                let identification = Identification::from_response(&response, &self.registry);
                Ok((link, identification, emulator))
            }
            Err(e) => {
                let _ = link.close().await;
                Err(e)
            }
        }
    }

    /// Reopen the link after the monitor lost it. Holds `command_lock` so
    /// no exchange runs against a half-swapped link.
    pub(crate) async fn reopen(&self) -> Result<()> {
        let target = self
            .target
            .lock()
            .clone()
            .ok_or(StateError::NotConnected)?;
        let _guard = self.command_lock.lock().await;

        if target.emulated {
            let link = self.current_link().ok_or(StateError::NotConnected)?;
            self.handshake(link.as_ref()).await?;
            return Ok(());
        }

        let old = self.link.write().take();
        if let Some(old) = old {
            let _ = old.close().await;
        }
        let (link, _, _) = self.open_link(&target).await?;
        *self.link.write() = Some(link);
        Ok(())
    }

    pub(crate) fn port_name(&self) -> String {
        self.target
            .lock()
            .as_ref()
            .map(|t| t.port.clone())
            .unwrap_or_default()
    }
}

/// Drives one printer
#[derive(Clone)]
pub struct PrinterEngine {
    inner: Arc<Inner>,
}

impl PrinterEngine {
    /// Engine with the built-in profile catalog and real serial scanning
    pub fn new(config: Config) -> Self {
        Self::with_components(config, Arc::new(ProfileRegistry::new()), Arc::new(SerialProber))
    }

    pub fn with_components(
        config: Config,
        registry: Arc<ProfileRegistry>,
        prober: Arc<dyn PortProber>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                registry,
                prober,
                state: thread_safe(EngineState::default()),
                link: RwLock::new(None),
                command_lock: tokio::sync::Mutex::new(()),
                events: Arc::new(EventBus::new()),
                tasks: Mutex::new(Tasks::default()),
                emulator: Mutex::new(None),
                target: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<ProfileRegistry> {
        &self.inner.registry
    }

    /// Event bus carrying connection, job, temperature and error events
    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.inner.events)
    }

    /// The emulator behind the current link, if any
    pub fn emulator(&self) -> Option<Arc<DeviceEmulator>> {
        self.inner.emulator.lock().clone()
    }

    /// Profile chosen for the connected printer
    pub fn profile(&self) -> Option<PrinterProfile> {
        self.inner.read_state(|s| s.profile.clone())
    }

    /// Open a link and identify the printer.
    ///
    /// `port` defaults to the configured port; "Auto" scans and takes the
    /// best match, "emulator" (or `use_emulator`) connects to the built-in
    /// emulator. Already connected: returns the current printer.
    pub async fn connect(&self, port: Option<&str>, baud_rate: Option<u32>) -> Result<PrinterInfo> {
        let (status, current) = self.inner.read_state(|s| (s.status, s.printer.clone()));
        if status.is_connected() {
            if let Some(info) = current {
                return Ok(info);
            }
        }
        if status != ConnectionStatus::Disconnected {
            self.disconnect().await?;
        }

        let settings = &self.inner.config.connection;
        let baud_rate = baud_rate.unwrap_or(settings.baud_rate);
        let requested = port.unwrap_or(&settings.port).to_string();
        let emulated = settings.use_emulator || requested.eq_ignore_ascii_case(EMULATOR_PORT);
        if !emulated && !SUPPORTED_BAUD_RATES.contains(&baud_rate) {
            return Err(ConnectionError::UnsupportedBaudRate { baud: baud_rate }.into());
        }

        self.inner
            .with_state(|s| s.set_status(ConnectionStatus::Connecting));
        self.inner
            .publish(EngineEvent::Connection(ConnectionEvent::Connecting {
                port: requested.clone(),
            }));
        tracing::info!("Connecting to {}", requested);

        match self.establish(&requested, baud_rate, emulated).await {
            Ok(info) => Ok(info),
            Err(e) => {
                tracing::error!("Connection to {} failed: {}", requested, e);
                self.inner.with_state(|s| {
                    s.set_status(ConnectionStatus::Error);
                    s.last_error = Some(e.to_string());
                });
                self.inner
                    .publish(EngineEvent::Connection(ConnectionEvent::ConnectionFailed {
                        port: requested,
                        error: e.to_string(),
                    }));
                Err(e)
            }
        }
    }

    async fn establish(&self, requested: &str, baud_rate: u32, emulated: bool) -> Result<PrinterInfo> {
        let target = if emulated {
            LinkTarget {
                port: EMULATOR_PORT.to_string(),
                baud_rate,
                emulated: true,
            }
        } else if requested.eq_ignore_ascii_case(fdmlink_settings::AUTO_PORT) {
            let device = self
                .scan_devices(false)
                .await?
                .into_iter()
                .next()
                .ok_or(ConnectionError::NoDeviceFound)?;
            tracing::info!("Auto-selected {} at {} baud", device.port, device.baud_rate);
            LinkTarget {
                port: device.port,
                baud_rate: device.baud_rate,
                emulated: false,
            }
        } else {
            LinkTarget {
                port: requested.to_string(),
                baud_rate,
                emulated: false,
            }
        };

        let (link, identification, emulator) = self.inner.open_link(&target).await?;
        let profile = identification.profile.profile.clone();
        let info = identification.into_printer_info(&target.port, target.baud_rate);

        *self.inner.link.write() = Some(link);
        *self.inner.target.lock() = Some(target.clone());
        if let Some(emulator) = emulator {
            self.inner.tasks.lock().ticker = Some(emulator.spawn_ticker());
            *self.inner.emulator.lock() = Some(emulator);
        }

        self.inner.with_state(|s| {
            s.printer = Some(info.clone());
            s.profile = Some(profile);
            s.last_error = None;
            s.halted = false;
            s.set_status(ConnectionStatus::Connected);
        });

        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(monitor::run(Arc::clone(&self.inner), stop_rx));
        self.inner.tasks.lock().monitor = Some(MonitorHandle { stop, handle });

        tracing::info!(
            "Connected to {} on {} ({}, profile {}{})",
            info.name,
            info.port,
            info.dialect,
            info.profile_name,
            if info.profile_fallback { ", fallback" } else { "" }
        );
        self.inner
            .publish(EngineEvent::Connection(ConnectionEvent::Connected {
                port: info.port.clone(),
                firmware: info.firmware.clone(),
                dialect: info.dialect,
            }));
        Ok(info)
    }

    /// Stop the monitor and any stream, close the link and forget the
    /// printer. A no-op when already disconnected.
    pub async fn disconnect(&self) -> Result<()> {
        let status = self.inner.read_state(|s| s.status);
        let has_link = self.inner.current_link().is_some();
        if status == ConnectionStatus::Disconnected && !has_link {
            return Ok(());
        }
        let port = self.inner.port_name();

        self.inner.join_worker().await;
        self.inner.stop_monitor().await;
        self.inner.stop_ticker();

        let link = self.inner.link.write().take();
        if let Some(link) = link {
            if let Err(e) = link.close().await {
                tracing::warn!("Closing {} failed: {}", port, e);
            }
        }
        *self.inner.emulator.lock() = None;
        *self.inner.target.lock() = None;

        self.inner.with_state(|s| {
            s.printer = None;
            s.profile = None;
            s.temperatures = TemperatureSnapshot::default();
            s.release_stream();
            s.set_status(ConnectionStatus::Disconnected);
        });
        tracing::info!("Disconnected from {}", port);
        self.inner
            .publish(EngineEvent::Connection(ConnectionEvent::Disconnected {
                port,
                reason: DisconnectReason::UserRequested,
            }));
        Ok(())
    }

    pub fn get_status(&self) -> EngineStatus {
        self.inner.read_state(EngineState::snapshot)
    }

    /// Cached temperatures; refreshed from the emulator when emulated
    pub fn get_temperatures(&self) -> TemperatureSnapshot {
        if let Some(emulator) = self.emulator() {
            let snapshot = emulator.snapshot();
            self.inner.with_state(|s| s.temperatures = snapshot);
            return snapshot;
        }
        self.inner.read_state(|s| s.temperatures)
    }

    fn check_accepts_commands(&self) -> Result<()> {
        let status = self.inner.read_state(|s| s.status);
        if status.accepts_commands() {
            return Ok(());
        }
        if status.is_connected() {
            Err(StateError::CommandNotAllowed {
                status: status.to_string(),
            }
            .into())
        } else {
            Err(StateError::NotConnected.into())
        }
    }

    /// Send one command and return the raw reply text
    pub async fn send_command(&self, command: &str) -> Result<String> {
        let command = command.trim();
        if command.is_empty() {
            return Err(ValidationError::EmptyCommand.into());
        }
        self.check_accepts_commands()?;

        let reply = {
            let _guard = self.inner.command_lock.lock().await;
            self.inner
                .exchange(command, self.inner.config.connection.ack_timeout())
                .await?
        };
        self.inner.absorb_reply(&reply);
        Ok(reply.text())
    }

    /// Set heater targets. `Ok(false)` when the device did not acknowledge
    /// every command.
    pub async fn set_temperatures(&self, hotend: Option<f64>, bed: Option<f64>) -> Result<bool> {
        if hotend.is_none() && bed.is_none() {
            return Err(ValidationError::InvalidParameter {
                param: "temperature".to_string(),
                reason: "neither hotend nor bed given".to_string(),
            }
            .into());
        }
        self.check_accepts_commands()?;

        let (commands, limits) = self.inner.read_state(|s| {
            (
                s.commands(),
                s.profile
                    .as_ref()
                    .map(|p| p.temperature_limits)
                    .unwrap_or_default(),
            )
        });
        for (heater, value, max) in [
            ("hotend", hotend, limits.hotend_max),
            ("bed", bed, limits.bed_max),
        ] {
            if let Some(value) = value {
                if !(0.0..=max).contains(&value) {
                    return Err(ValidationError::TemperatureOutOfRange {
                        heater: heater.to_string(),
                        value,
                        max,
                    }
                    .into());
                }
            }
        }

        let mut all_ok = true;
        let timeout = self.inner.config.connection.ack_timeout();
        let _guard = self.inner.command_lock.lock().await;
        if let Some(t) = hotend {
            let reply = self.inner.exchange(&commands.set_hotend(t), timeout).await?;
            if reply.is_ok() {
                self.inner.with_state(|s| s.temperatures.hotend_target = t);
            } else {
                tracing::warn!("Hotend target {} not acknowledged: {}", t, reply.text());
                all_ok = false;
            }
        }
        if let Some(t) = bed {
            let reply = self.inner.exchange(&commands.set_bed(t), timeout).await?;
            if reply.is_ok() {
                self.inner.with_state(|s| s.temperatures.bed_target = t);
            } else {
                tracing::warn!("Bed target {} not acknowledged: {}", t, reply.text());
                all_ok = false;
            }
        }
        self.inner
            .publish(EngineEvent::Temperature(TemperatureEvent::TargetsSet { hotend, bed }));
        Ok(all_ok)
    }

    /// Scan serial ports; `enhanced` goes straight to the slow pass
    pub async fn scan_devices(&self, enhanced: bool) -> Result<Vec<DetectedDevice>> {
        let scanner = Scanner::with_prober(
            self.inner.config.scan.clone(),
            Arc::clone(&self.inner.registry),
            Arc::clone(&self.inner.prober),
        );
        if enhanced {
            scanner.scan_enhanced().await
        } else {
            scanner.scan_with_fallback().await
        }
    }

    /// Start streaming a G-code file. Returns the job id without waiting
    /// for the job to finish.
    pub async fn stream_gcode(
        &self,
        path: impl AsRef<Path>,
        callback: Option<ProgressCallback>,
    ) -> Result<String> {
        let path = path.as_ref().to_path_buf();
        if !path.is_file() {
            return Err(ValidationError::FileNotFound {
                path: path.display().to_string(),
            }
            .into());
        }
        if let Some(job_id) = self.inner.read_state(EngineState::active_job_id) {
            return Err(StateError::AlreadyStreaming { job_id }.into());
        }
        if !self.inner.read_state(|s| s.status.is_connected()) {
            return Err(StateError::NotConnected.into());
        }
        if self.inner.read_state(|s| s.halted) {
            let _guard = self.inner.command_lock.lock().await;
            self.inner.clear_halt().await?;
        }

        let checksums = self.inner.config.streaming.checksums;
        let load_path = path.clone();
        let program = tokio::task::spawn_blocking(move || gcode::prepare_file(&load_path, checksums))
            .await
            .map_err(|e| Error::other(format!("G-code loader failed: {}", e)))??;
        if program.is_empty() {
            return Err(ValidationError::EmptyProgram {
                path: path.display().to_string(),
            }
            .into());
        }

        let mut job = PrintJob::new(&path, program.len(), program.total_layers());
        job.start(Utc::now());
        let job_id = job.id.clone();
        let total_lines = job.total_lines;

        // Admission is re-checked under the lock; a concurrent call may have won.
        self.inner.with_state(|s| -> Result<()> {
            if let Some(active) = s.active_job_id() {
                return Err(StateError::AlreadyStreaming { job_id: active }.into());
            }
            if !s.status.is_connected() {
                return Err(StateError::NotConnected.into());
            }
            s.set_stream(StreamState::Streaming)?;
            s.set_status(ConnectionStatus::Printing);
            s.job = Some(job);
            Ok(())
        })?;

        tracing::info!("Streaming {} ({} lines) as job {}", path.display(), total_lines, job_id);
        self.inner.publish(EngineEvent::Job(JobEvent::Started {
            job_id: job_id.clone(),
            total_lines,
        }));

        let dispatcher =
            callback.map(|cb| progress::spawn_dispatcher(&self.inner.events, job_id.clone(), cb));
        let (cancel, cancel_rx) = watch::channel(false);
        let handle = tokio::spawn(worker::run(
            Arc::clone(&self.inner),
            job_id.clone(),
            program,
            cancel_rx,
        ));
        self.inner.tasks.lock().worker = Some(WorkerHandle {
            job_id: job_id.clone(),
            cancel,
            handle,
            dispatcher,
        });
        Ok(job_id)
    }

    /// Hold the stream between lines
    pub async fn pause(&self) -> Result<()> {
        let _guard = self.inner.command_lock.lock().await;
        let now = Utc::now();
        let job_id = self.inner.with_state(|s| -> Result<String> {
            if !s.stream.status().can_pause {
                return Err(match s.stream {
                    StreamState::Idle => StateError::NoActiveJob,
                    state => StateError::CannotPause {
                        state: state.to_string(),
                    },
                }
                .into());
            }
            s.set_stream(StreamState::Paused)?;
            s.set_status(ConnectionStatus::Paused);
            let job = s.job.as_mut().ok_or(StateError::NoActiveJob)?;
            job.pause(now);
            Ok(job.id.clone())
        })?;

        let command = self.inner.commands().pause;
        self.notify_device(&command, "pause").await;
        tracing::info!("Job {} paused", job_id);
        self.inner
            .publish(EngineEvent::Job(JobEvent::Paused { job_id }));
        Ok(())
    }

    /// Continue a paused stream
    pub async fn resume(&self) -> Result<()> {
        let _guard = self.inner.command_lock.lock().await;
        let now = Utc::now();
        let job_id = self.inner.with_state(|s| -> Result<String> {
            if !s.stream.status().can_resume {
                return Err(match s.stream {
                    StreamState::Idle => StateError::NoActiveJob,
                    state => StateError::NotPaused {
                        state: state.to_string(),
                    },
                }
                .into());
            }
            s.set_stream(StreamState::Streaming)?;
            s.set_status(ConnectionStatus::Printing);
            let job = s.job.as_mut().ok_or(StateError::NoActiveJob)?;
            job.resume(now);
            Ok(job.id.clone())
        })?;

        let command = self.inner.commands().resume;
        self.notify_device(&command, "resume").await;
        tracing::info!("Job {} resumed", job_id);
        self.inner
            .publish(EngineEvent::Job(JobEvent::Resumed { job_id }));
        Ok(())
    }

    /// Best-effort device notification; the engine-side state is authoritative
    async fn notify_device(&self, command: &str, what: &str) {
        let timeout = self.inner.config.connection.ack_timeout();
        match self.inner.exchange(command, timeout).await {
            Ok(reply) if reply.is_ok() => {}
            Ok(reply) => tracing::warn!("Device rejected {} command: {}", what, reply.text()),
            Err(e) => tracing::warn!("Could not send {} command: {}", what, e),
        }
    }

    /// Stop everything now. Always succeeds: the cancellation is applied
    /// even if the stop and heaters-off writes fail.
    pub async fn emergency_stop(&self) -> Result<()> {
        let now = Utc::now();
        let commands = self.inner.commands();
        let job_id = self.inner.with_state(|s| {
            if s.stream.is_active() {
                let _ = s.set_stream(StreamState::Stopping);
            }
            let job_id = s.job.as_mut().filter(|j| !j.is_terminal()).map(|job| {
                job.finish(JobStatus::Cancelled, now);
                job.id.clone()
            });
            s.temperatures.hotend_target = 0.0;
            s.temperatures.bed_target = 0.0;
            if s.temperatures.chamber_target.is_some() {
                s.temperatures.chamber_target = Some(0.0);
            }
            if matches!(
                s.status,
                ConnectionStatus::Printing | ConnectionStatus::Paused
            ) {
                s.set_status(ConnectionStatus::Idle);
            }
            job_id
        });
        self.inner.signal_cancel();
        tracing::warn!(
            "Emergency stop{}",
            job_id
                .as_deref()
                .map(|id| format!(", cancelling job {}", id))
                .unwrap_or_default()
        );

        let mut delivered = false;
        if let Some(link) = self.inner.current_link() {
            delivered = true;
            let sequence =
                std::iter::once(commands.emergency_stop.clone()).chain(commands.heaters_off());
            for command in sequence {
                match tokio::time::timeout(EMERGENCY_WRITE_TIMEOUT, link.write_line(&command)).await
                {
                    Ok(Ok(())) => tracing::debug!(">> {}", command),
                    Ok(Err(e)) => {
                        tracing::warn!("Emergency write '{}' failed: {}", command, e);
                        delivered = false;
                    }
                    Err(_) => {
                        tracing::warn!("Emergency write '{}' timed out", command);
                        delivered = false;
                    }
                }
            }
            self.inner.with_state(|s| s.halted = true);
        }

        self.inner.join_worker().await;
        self.inner.with_state(|s| {
            s.temperatures.hotend_target = 0.0;
            s.temperatures.bed_target = 0.0;
        });
        self.inner
            .publish(EngineEvent::Error(ErrorEvent::EmergencyStop { delivered }));
        Ok(())
    }

    /// Current (or last) job with live timing
    pub fn get_progress(&self) -> Option<PrintJob> {
        let now = Utc::now();
        self.inner.read_state(|s| {
            s.job.clone().map(|mut job| {
                if !job.is_terminal() {
                    job.refresh(now);
                }
                job
            })
        })
    }

    /// Current or archived job by id
    pub fn get_job(&self, id: &str) -> Option<PrintJob> {
        self.inner.read_state(|s| s.find_job(id))
    }

    /// Finished jobs, oldest first
    pub fn job_history(&self) -> Vec<PrintJob> {
        self.inner.read_state(|s| s.history.iter().cloned().collect())
    }

    /// Wait until the job with `id` reaches a terminal status or `timeout`
    /// passes; returns the last seen record.
    pub async fn wait_for_job(&self, id: &str, timeout: Duration) -> Option<PrintJob> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let job = self.get_job(id);
            let done = job.as_ref().is_none_or(|j| j.is_terminal());
            if done || tokio::time::Instant::now() >= deadline {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}
