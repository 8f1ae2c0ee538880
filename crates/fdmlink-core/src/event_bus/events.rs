//! Event type definitions for the engine event bus.
//!
//! Events are cloneable and serializable so they can be logged or forwarded
//! as JSON by front ends.

use serde::{Deserialize, Serialize};

use crate::data::{Dialect, JobStatus, PrintJob, TemperatureSnapshot};

/// Root event enum for everything the engine publishes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineEvent {
    /// Link lifecycle
    Connection(ConnectionEvent),
    /// Print job lifecycle and progress
    Job(JobEvent),
    /// Heater readings and targets
    Temperature(TemperatureEvent),
    /// Errors and emergency stops
    Error(ErrorEvent),
}

impl EngineEvent {
    /// Get the category of this event
    pub fn category(&self) -> EventCategory {
        match self {
            EngineEvent::Connection(_) => EventCategory::Connection,
            EngineEvent::Job(_) => EventCategory::Job,
            EngineEvent::Temperature(_) => EventCategory::Temperature,
            EngineEvent::Error(_) => EventCategory::Error,
        }
    }

    /// Short description for logging
    pub fn description(&self) -> String {
        match self {
            EngineEvent::Connection(e) => e.description(),
            EngineEvent::Job(e) => e.description(),
            EngineEvent::Temperature(e) => e.description(),
            EngineEvent::Error(e) => e.description(),
        }
    }
}

/// Event category for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventCategory {
    /// Link lifecycle events.
    Connection,
    /// Print job events.
    Job,
    /// Temperature events.
    Temperature,
    /// Error events.
    Error,
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventCategory::Connection => write!(f, "Connection"),
            EventCategory::Job => write!(f, "Job"),
            EventCategory::Temperature => write!(f, "Temperature"),
            EventCategory::Error => write!(f, "Error"),
        }
    }
}

/// Reason for disconnection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DisconnectReason {
    /// Caller asked for it
    UserRequested,
    /// Reconnect attempts were exhausted
    ConnectionLost,
    /// Emergency stop tore the link down
    EmergencyStop,
}

/// Connection-related events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConnectionEvent {
    /// Opening a link.
    Connecting {
        /// Port being opened.
        port: String,
    },
    /// Handshake complete.
    Connected {
        /// Port in use.
        port: String,
        /// Raw firmware identification.
        firmware: String,
        /// Classified dialect.
        dialect: Dialect,
    },
    /// Link closed.
    Disconnected {
        /// Port that was closed.
        port: String,
        /// Why.
        reason: DisconnectReason,
    },
    /// Connect attempt failed.
    ConnectionFailed {
        /// Port that failed.
        port: String,
        /// Error message.
        error: String,
    },
    /// Monitor stopped hearing from the device.
    Offline {
        /// Port that went quiet.
        port: String,
    },
    /// Monitor re-established the link.
    Reconnected {
        /// Port that came back.
        port: String,
        /// Attempt number that succeeded.
        attempt: u32,
    },
}

impl ConnectionEvent {
    fn description(&self) -> String {
        match self {
            ConnectionEvent::Connecting { port } => format!("Connecting to {}", port),
            ConnectionEvent::Connected {
                port,
                firmware,
                dialect,
            } => format!("Connected to {} ({}, {})", port, dialect, firmware),
            ConnectionEvent::Disconnected { port, reason } => {
                format!("Disconnected from {}: {:?}", port, reason)
            }
            ConnectionEvent::ConnectionFailed { port, error } => {
                format!("Connection failed to {}: {}", port, error)
            }
            ConnectionEvent::Offline { port } => format!("{} went offline", port),
            ConnectionEvent::Reconnected { port, attempt } => {
                format!("Reconnected to {} on attempt {}", port, attempt)
            }
        }
    }
}

/// Print job events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobEvent {
    /// Streaming began.
    Started {
        /// Job id.
        job_id: String,
        /// Prepared line count.
        total_lines: usize,
    },
    /// Progress snapshot.
    Progress(Box<PrintJob>),
    /// A layer marker was passed.
    LayerChanged {
        /// Job id.
        job_id: String,
        /// New layer number.
        layer: u32,
    },
    /// A line was not acknowledged.
    LineFailed {
        /// Job id.
        job_id: String,
        /// Line number within the job.
        line_number: usize,
        /// Error message.
        error: String,
    },
    /// Job paused.
    Paused {
        /// Job id.
        job_id: String,
    },
    /// Job resumed.
    Resumed {
        /// Job id.
        job_id: String,
    },
    /// Job reached a terminal status.
    Finished {
        /// Job id.
        job_id: String,
        /// Terminal status.
        status: JobStatus,
    },
}

impl JobEvent {
    fn description(&self) -> String {
        match self {
            JobEvent::Started {
                job_id,
                total_lines,
            } => format!("Job {} started ({} lines)", job_id, total_lines),
            JobEvent::Progress(job) => {
                format!("Job {} at {:.1}%", job.id, job.progress_percent)
            }
            JobEvent::LayerChanged { job_id, layer } => {
                format!("Job {} reached layer {}", job_id, layer)
            }
            JobEvent::LineFailed {
                job_id,
                line_number,
                error,
            } => format!("Job {} line {} failed: {}", job_id, line_number, error),
            JobEvent::Paused { job_id } => format!("Job {} paused", job_id),
            JobEvent::Resumed { job_id } => format!("Job {} resumed", job_id),
            JobEvent::Finished { job_id, status } => format!("Job {} {}", job_id, status),
        }
    }
}

/// Temperature events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TemperatureEvent {
    /// New readings parsed from a report.
    Updated(TemperatureSnapshot),
    /// Targets requested by the caller.
    TargetsSet {
        /// Hotend target, if changed.
        hotend: Option<f64>,
        /// Bed target, if changed.
        bed: Option<f64>,
    },
}

impl TemperatureEvent {
    fn description(&self) -> String {
        match self {
            TemperatureEvent::Updated(t) => format!(
                "Hotend {:.1}/{:.1} Bed {:.1}/{:.1}",
                t.hotend_current, t.hotend_target, t.bed_current, t.bed_target
            ),
            TemperatureEvent::TargetsSet { hotend, bed } => {
                format!("Targets set: hotend {:?} bed {:?}", hotend, bed)
            }
        }
    }
}

/// Error events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ErrorEvent {
    /// Emergency stop was issued.
    EmergencyStop {
        /// Whether M112 reached the device.
        delivered: bool,
    },
    /// The device answered with an `Error` line.
    Firmware {
        /// Raw line.
        message: String,
    },
    /// Link-level failure.
    Communication {
        /// Error message.
        message: String,
    },
}

impl ErrorEvent {
    fn description(&self) -> String {
        match self {
            ErrorEvent::EmergencyStop { delivered } => {
                format!("Emergency stop (M112 delivered: {})", delivered)
            }
            ErrorEvent::Firmware { message } => format!("Firmware error: {}", message),
            ErrorEvent::Communication { message } => format!("Communication error: {}", message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        let event = EngineEvent::Job(JobEvent::Paused {
            job_id: "j1".to_string(),
        });
        assert_eq!(event.category(), EventCategory::Job);
        assert_eq!(event.description(), "Job j1 paused");

        let event = EngineEvent::Error(ErrorEvent::EmergencyStop { delivered: true });
        assert_eq!(event.category(), EventCategory::Error);
    }

    #[test]
    fn test_event_serializes() {
        let event = EngineEvent::Connection(ConnectionEvent::Connected {
            port: "/dev/ttyUSB0".to_string(),
            firmware: "Marlin 2.1.2".to_string(),
            dialect: Dialect::Marlin,
        });
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("ttyUSB0"));
        assert!(json.contains("Marlin"));
    }
}
