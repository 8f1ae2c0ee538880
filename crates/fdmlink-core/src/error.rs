//! Error handling for fdmlink
//!
//! Provides the error taxonomy used by every layer of the engine:
//! - Connection errors (cannot open a link or complete the handshake)
//! - Communication errors (write/read failures on an open link, ack timeouts)
//! - Validation errors (bad paths, empty commands, malformed parameters)
//! - State errors (operation not valid in the current engine state)
//!
//! All error types use `thiserror` for ergonomic error handling.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Connection error type
///
/// Raised when a link cannot be opened or the device does not answer the
/// identification handshake.
#[derive(Error, Debug, Clone)]
pub enum ConnectionError {
    /// Port not found
    #[error("Port not found: {port}")]
    PortNotFound {
        /// The name of the port that was not found.
        port: String,
    },

    /// Failed to open port
    #[error("Failed to open port {port}: {reason}")]
    FailedToOpen {
        /// The name of the port that failed to open.
        port: String,
        /// The reason the port failed to open.
        reason: String,
    },

    /// The device did not answer the identification handshake
    #[error("Handshake with {port} failed: {reason}")]
    HandshakeFailed {
        /// The port the handshake was attempted on.
        port: String,
        /// Why the handshake failed.
        reason: String,
    },

    /// Scanning found nothing to connect to
    #[error("No printer detected on any serial port")]
    NoDeviceFound,

    /// Connection timeout
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// The timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// Connection lost
    #[error("Connection lost: {reason}")]
    ConnectionLost {
        /// The reason the connection was lost.
        reason: String,
    },

    /// Baud rate not supported
    #[error("Baud rate {baud} not supported")]
    UnsupportedBaudRate {
        /// The unsupported baud rate.
        baud: u32,
    },
}

/// Communication error type
///
/// Raised for failures on an otherwise-open link. A missing acknowledgement
/// is reported as [`CommunicationError::Timeout`].
#[derive(Error, Debug, Clone)]
pub enum CommunicationError {
    /// No acknowledgement arrived within the budget
    #[error("No acknowledgement within {timeout_ms}ms")]
    Timeout {
        /// The timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// Writing to the link failed
    #[error("Write failed: {reason}")]
    WriteFailed {
        /// The reason for the failure.
        reason: String,
    },

    /// Reading from the link failed
    #[error("Read failed: {reason}")]
    ReadFailed {
        /// The reason for the failure.
        reason: String,
    },

    /// The device answered with an `Error` line
    #[error("Command '{command}' rejected: {response}")]
    Rejected {
        /// The command that was rejected.
        command: String,
        /// The raw rejection line.
        response: String,
    },

    /// The link has been closed underneath the caller
    #[error("Link is closed")]
    LinkClosed,
}

/// Validation error type
///
/// Raised for caller-supplied input that cannot be acted on.
#[derive(Error, Debug, Clone)]
pub enum ValidationError {
    /// G-code file does not exist
    #[error("File not found: {path}")]
    FileNotFound {
        /// The missing path.
        path: String,
    },

    /// G-code file contained nothing to send
    #[error("No printable lines in {path}")]
    EmptyProgram {
        /// The file that was empty after preparation.
        path: String,
    },

    /// Empty command text
    #[error("Command is empty")]
    EmptyCommand,

    /// Invalid parameter value
    #[error("Invalid parameter '{param}': {reason}")]
    InvalidParameter {
        /// The parameter name.
        param: String,
        /// The reason the parameter is invalid.
        reason: String,
    },

    /// Requested temperature is outside the printer's limits
    #[error("{heater} temperature {value} outside 0..={max}")]
    TemperatureOutOfRange {
        /// Heater name ("hotend" or "bed").
        heater: String,
        /// Requested temperature.
        value: f64,
        /// Maximum allowed temperature.
        max: f64,
    },
}

/// State error type
///
/// Raised when an operation is not valid in the engine's current state.
#[derive(Error, Debug, Clone)]
pub enum StateError {
    /// No printer is connected
    #[error("Printer not connected")]
    NotConnected,

    /// Commands are refused while the engine is in this status
    #[error("Command not allowed while {status}")]
    CommandNotAllowed {
        /// The status that refused the command.
        status: String,
    },

    /// A job is already streaming
    #[error("Job {job_id} is already streaming")]
    AlreadyStreaming {
        /// The job that holds the stream.
        job_id: String,
    },

    /// No job is streaming
    #[error("No active print job")]
    NoActiveJob,

    /// Pause requested while not pausable
    #[error("Cannot pause: stream is {state}")]
    CannotPause {
        /// The current stream state.
        state: String,
    },

    /// Resume requested while not paused
    #[error("Cannot resume: stream is {state}")]
    NotPaused {
        /// The current stream state.
        state: String,
    },

    /// Invalid state transition
    #[error("Invalid state transition from {current} to {requested}")]
    InvalidTransition {
        /// The current state name.
        current: String,
        /// The requested state name.
        requested: String,
    },
}

/// Coarse error classification carried across the caller boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// See [`ConnectionError`].
    Connection,
    /// See [`CommunicationError`].
    Communication,
    /// See [`ValidationError`].
    Validation,
    /// See [`StateError`].
    State,
    /// I/O or anything else.
    Internal,
}

/// Main error type for fdmlink
///
/// A unified error type that can represent any error from all layers.
/// This is the primary error type used in public APIs.
#[derive(Error, Debug)]
pub enum Error {
    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Communication error
    #[error(transparent)]
    Communication(#[from] CommunicationError),

    /// Validation error
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// State error
    #[error(transparent)]
    State(#[from] StateError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Classify this error for callers
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Connection(_) => ErrorKind::Connection,
            Error::Communication(_) => ErrorKind::Communication,
            Error::Validation(_) => ErrorKind::Validation,
            Error::State(_) => ErrorKind::State,
            Error::Io(_) | Error::Other(_) => ErrorKind::Internal,
        }
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Error::Communication(CommunicationError::Timeout { .. })
                | Error::Connection(ConnectionError::ConnectionTimeout { .. })
        )
    }

    /// Check if this is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    /// Check if this is a communication error
    pub fn is_communication_error(&self) -> bool {
        matches!(self, Error::Communication(_))
    }

    /// Check if this is a validation error
    pub fn is_validation_error(&self) -> bool {
        matches!(self, Error::Validation(_))
    }

    /// Check if this is a state error
    pub fn is_state_error(&self) -> bool {
        matches!(self, Error::State(_))
    }

    /// Whether the link itself is gone, as opposed to one bad exchange
    pub fn is_link_failure(&self) -> bool {
        matches!(
            self,
            Error::Communication(CommunicationError::LinkClosed)
                | Error::Connection(ConnectionError::ConnectionLost { .. })
                | Error::Io(_)
        )
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_communication_error() {
        let err: Error = CommunicationError::Timeout { timeout_ms: 500 }.into();
        assert!(err.is_timeout());
        assert!(err.is_communication_error());
        assert_eq!(err.kind(), ErrorKind::Communication);
        assert_eq!(err.to_string(), "No acknowledgement within 500ms");
    }

    #[test]
    fn test_error_kinds() {
        let err: Error = StateError::NoActiveJob.into();
        assert_eq!(err.kind(), ErrorKind::State);
        assert!(err.is_state_error());

        let err: Error = ValidationError::EmptyCommand.into();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err: Error = ConnectionError::NoDeviceFound.into();
        assert!(err.is_connection_error());
        assert!(!err.is_link_failure());

        let err: Error = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone").into();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(err.is_link_failure());
    }

    #[test]
    fn test_state_error_display() {
        let err = StateError::AlreadyStreaming {
            job_id: "abc".to_string(),
        };
        assert_eq!(err.to_string(), "Job abc is already streaming");

        let err = ValidationError::TemperatureOutOfRange {
            heater: "hotend".to_string(),
            value: 400.0,
            max: 275.0,
        };
        assert_eq!(err.to_string(), "hotend temperature 400 outside 0..=275");
    }
}
