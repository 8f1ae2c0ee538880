//! # fdmlink Core
//!
//! Core types, errors, and utilities shared by the fdmlink crates.
//! Provides the error taxonomy, the printer/job data model, the
//! streaming state machine, and the engine event bus.

pub mod data;
pub mod error;
pub mod event_bus;
pub mod types;

pub use data::{
    ConnectionStatus, Dialect, JobStatus, Position, PrintJob, PrinterInfo, StreamState,
    StreamingStatus, TemperatureSnapshot,
};

pub use error::{
    CommunicationError, ConnectionError, Error, ErrorKind, Result, StateError, ValidationError,
};

pub use event_bus::{
    EngineEvent, EventBus, EventBusConfig, EventCategory, EventFilter, SubscriptionId,
};

pub use types::{thread_safe, ProgressCallback, ThreadSafe};
