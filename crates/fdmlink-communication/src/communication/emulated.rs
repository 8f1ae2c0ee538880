//! [`Link`] backed by the in-process emulator.

use super::Link;
use crate::emulator::DeviceEmulator;
use async_trait::async_trait;
use fdmlink_core::{CommunicationError, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Pseudo port name used for the emulator
pub const EMULATOR_PORT: &str = "emulator";

const IDLE_READ: Duration = Duration::from_millis(5);

/// Queues the emulator's reply lines for [`Link::read_line`]
pub struct EmulatorLink {
    emulator: Arc<DeviceEmulator>,
    pending: Mutex<VecDeque<String>>,
    closed: AtomicBool,
}

impl EmulatorLink {
    pub fn new(emulator: Arc<DeviceEmulator>) -> Self {
        Self {
            emulator,
            pending: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn emulator(&self) -> &Arc<DeviceEmulator> {
        &self.emulator
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CommunicationError::LinkClosed.into());
        }
        Ok(())
    }
}

#[async_trait]
impl Link for EmulatorLink {
    fn name(&self) -> &str {
        EMULATOR_PORT
    }

    fn is_emulated(&self) -> bool {
        true
    }

    async fn write_line(&self, line: &str) -> Result<()> {
        self.ensure_open()?;
        let reply = self.emulator.respond(line).await;
        self.pending
            .lock()
            .extend(reply.lines().map(str::to_string));
        Ok(())
    }

    async fn read_line(&self, timeout: Duration) -> Result<Option<String>> {
        self.ensure_open()?;
        if let Some(line) = self.pending.lock().pop_front() {
            return Ok(Some(line));
        }
        tokio::time::sleep(timeout.min(IDLE_READ)).await;
        Ok(self.pending.lock().pop_front())
    }

    async fn discard_input(&self) -> Result<()> {
        self.ensure_open()?;
        self.pending.lock().clear();
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        self.pending.lock().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communication::exchange;

    #[tokio::test]
    async fn test_exchange_collects_identification() {
        let link = EmulatorLink::new(Arc::new(DeviceEmulator::marlin()));
        let reply = exchange(&link, "M115", Duration::from_millis(200))
            .await
            .unwrap();
        assert!(reply.is_ok());
        assert!(reply.lines[0].starts_with("FIRMWARE_NAME:Marlin"));
    }

    #[tokio::test]
    async fn test_closed_link_fails() {
        let link = EmulatorLink::new(Arc::new(DeviceEmulator::marlin()));
        link.close().await.unwrap();
        let err = link.write_line("M105").await.unwrap_err();
        assert!(err.is_link_failure());
    }
}
