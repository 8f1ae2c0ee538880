//! The engine's single mutable state container.
//!
//! Everything the monitor, the streaming worker and callers share lives in
//! [`EngineState`]. The engine keeps it behind one `parking_lot::Mutex` and
//! only touches it through closure accessors, so no lock is ever held
//! across an await point.

use fdmlink_core::{
    ConnectionStatus, PrintJob, PrinterInfo, Position, StateError, StreamState, StreamingStatus,
    TemperatureSnapshot,
};
use fdmlink_devicedb::{DialectCommands, PrinterProfile};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Default)]
pub struct EngineState {
    pub status: ConnectionStatus,
    pub printer: Option<PrinterInfo>,
    pub profile: Option<PrinterProfile>,
    pub temperatures: TemperatureSnapshot,
    pub position: Position,
    pub stream: StreamState,
    /// Current job, or the most recently finished one
    pub job: Option<PrintJob>,
    /// Finished jobs, newest last
    pub history: VecDeque<PrintJob>,
    pub last_error: Option<String>,
    /// An emergency stop went out; the firmware must be cleared before the
    /// next job
    pub halted: bool,
}

impl EngineState {
    /// Move to `target` if the transition table allows it
    pub fn set_status(&mut self, target: ConnectionStatus) -> bool {
        if self.status.can_transition_to(target) {
            if self.status != target {
                tracing::debug!("Status {} -> {}", self.status, target);
            }
            self.status = target;
            true
        } else {
            tracing::warn!("Ignoring status change {} -> {}", self.status, target);
            false
        }
    }

    /// Validated stream transition
    pub fn set_stream(&mut self, target: StreamState) -> Result<(), StateError> {
        self.stream = self.stream.transition(target)?;
        Ok(())
    }

    /// Force the stream back to Idle from wherever it is
    pub fn release_stream(&mut self) {
        if self.stream != StreamState::Idle {
            self.stream = StreamState::Idle;
        }
        if matches!(
            self.status,
            ConnectionStatus::Printing | ConnectionStatus::Paused
        ) {
            self.set_status(ConnectionStatus::Idle);
        }
    }

    /// Live status matching the stream after a reconnect
    pub fn restore_live_status(&mut self) {
        self.set_status(ConnectionStatus::Idle);
        match self.stream {
            StreamState::Streaming => {
                self.set_status(ConnectionStatus::Printing);
            }
            StreamState::Paused => {
                self.set_status(ConnectionStatus::Printing);
                self.set_status(ConnectionStatus::Paused);
            }
            _ => {}
        }
    }

    /// Id of the job holding the stream
    pub fn active_job_id(&self) -> Option<String> {
        if self.stream == StreamState::Idle {
            return None;
        }
        self.job.as_ref().map(|j| j.id.clone())
    }

    /// Copy a finished job into the bounded history
    pub fn archive_job(&mut self, limit: usize) {
        let Some(job) = self.job.as_ref().filter(|j| j.is_terminal()) else {
            return;
        };
        if self.history.iter().any(|h| h.id == job.id) {
            return;
        }
        self.history.push_back(job.clone());
        while self.history.len() > limit {
            self.history.pop_front();
        }
    }

    /// Current or archived job by id
    pub fn find_job(&self, id: &str) -> Option<PrintJob> {
        self.job
            .iter()
            .chain(self.history.iter().rev())
            .find(|j| j.id == id)
            .cloned()
    }

    /// Command set of the active profile
    pub fn commands(&self) -> DialectCommands {
        self.profile
            .as_ref()
            .map(|p| p.commands.clone())
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> EngineStatus {
        EngineStatus {
            status: self.status,
            printer: self.printer.clone(),
            profile_name: self.profile.as_ref().map(|p| p.name.clone()),
            temperatures: self.temperatures,
            position: self.position,
            streaming: self.stream.status(),
            job: self.job.clone(),
            last_error: self.last_error.clone(),
            halted: self.halted,
        }
    }
}

/// Read-only view returned by `get_status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub status: ConnectionStatus,
    pub printer: Option<PrinterInfo>,
    pub profile_name: Option<String>,
    pub temperatures: TemperatureSnapshot,
    pub position: Position,
    pub streaming: StreamingStatus,
    pub job: Option<PrintJob>,
    pub last_error: Option<String>,
    pub halted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fdmlink_core::JobStatus;

    fn finished_job(name: &str) -> PrintJob {
        let mut job = PrintJob::new(name, 1, None);
        job.finish(JobStatus::Completed, Utc::now());
        job
    }

    #[test]
    fn test_history_is_bounded() {
        let mut state = EngineState::default();
        for i in 0..5 {
            state.job = Some(finished_job(&format!("{}.gcode", i)));
            state.archive_job(3);
            state.archive_job(3);
        }
        assert_eq!(state.history.len(), 3);
        let newest = state.job.as_ref().unwrap().id.clone();
        assert_eq!(state.history.back().unwrap().id, newest);
        assert!(state.find_job(&newest).is_some());
        assert!(state.find_job("missing").is_none());
    }

    #[test]
    fn test_release_stream_returns_to_idle() {
        let mut state = EngineState {
            status: ConnectionStatus::Idle,
            ..Default::default()
        };
        state.set_stream(StreamState::Streaming).unwrap();
        assert!(state.set_status(ConnectionStatus::Printing));
        state.set_stream(StreamState::Paused).unwrap();
        assert!(state.set_status(ConnectionStatus::Paused));

        state.release_stream();
        assert_eq!(state.stream, StreamState::Idle);
        assert_eq!(state.status, ConnectionStatus::Idle);
        assert!(state.set_stream(StreamState::Paused).is_err());
    }

    #[test]
    fn test_restore_after_reconnect() {
        let mut state = EngineState {
            status: ConnectionStatus::Offline,
            stream: StreamState::Paused,
            ..Default::default()
        };
        state.restore_live_status();
        assert_eq!(state.status, ConnectionStatus::Paused);
    }
}
