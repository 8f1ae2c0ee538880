//! Caller-facing operation results
//!
//! [`PrinterService`] wraps a [`PrinterEngine`] and turns every outcome into
//! an [`OperationResult`]: a success flag, optional data, a readable message
//! and, on failure, the error's kind. Nothing crosses this boundary as an
//! `Err` or a panic.

use crate::engine::{EngineStatus, PrinterEngine};
use crate::scanner::DetectedDevice;
use fdmlink_core::{
    Error, ErrorKind, PrintJob, PrinterInfo, ProgressCallback, Result, StateError,
    TemperatureSnapshot,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Uniform result of one operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl<T> OperationResult<T> {
    /// Successful result carrying `data`
    pub fn ok(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: message.into(),
            error_kind: None,
        }
    }

    /// Failed result describing `error`
    pub fn failure(error: &Error) -> Self {
        Self {
            success: false,
            data: None,
            message: error.to_string(),
            error_kind: Some(error.kind()),
        }
    }

    pub fn from_result(result: Result<T>, message: impl Into<String>) -> Self {
        match result {
            Ok(data) => Self::ok(data, message),
            Err(e) => {
                tracing::debug!("Operation failed: {}", e);
                Self::failure(&e)
            }
        }
    }
}

/// Operation interface over one engine
#[derive(Clone)]
pub struct PrinterService {
    engine: PrinterEngine,
}

impl PrinterService {
    pub fn new(engine: PrinterEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &PrinterEngine {
        &self.engine
    }

    pub async fn connect(&self, port: Option<&str>, baud_rate: Option<u32>) -> OperationResult<PrinterInfo> {
        let result = self.engine.connect(port, baud_rate).await;
        let message = match &result {
            Ok(info) => format!("Connected to {} on {}", info.name, info.port),
            Err(_) => String::new(),
        };
        OperationResult::from_result(result, message)
    }

    pub async fn disconnect(&self) -> OperationResult<()> {
        OperationResult::from_result(self.engine.disconnect().await, "Disconnected")
    }

    pub fn get_status(&self) -> OperationResult<EngineStatus> {
        let status = self.engine.get_status();
        let message = format!("Status: {}", status.status);
        OperationResult::ok(status, message)
    }

    pub fn get_temperatures(&self) -> OperationResult<TemperatureSnapshot> {
        OperationResult::ok(self.engine.get_temperatures(), "Temperatures")
    }

    /// `data` is false when the device did not acknowledge every target
    pub async fn set_temperatures(&self, hotend: Option<f64>, bed: Option<f64>) -> OperationResult<bool> {
        match self.engine.set_temperatures(hotend, bed).await {
            Ok(true) => OperationResult::ok(true, "Temperature targets set"),
            Ok(false) => OperationResult {
                success: false,
                data: Some(false),
                message: "Device did not acknowledge every temperature command".to_string(),
                error_kind: None,
            },
            Err(e) => OperationResult::failure(&e),
        }
    }

    pub async fn send_command(&self, command: &str) -> OperationResult<String> {
        OperationResult::from_result(self.engine.send_command(command).await, "Command sent")
    }

    pub async fn scan_devices(&self, enhanced: bool) -> OperationResult<Vec<DetectedDevice>> {
        let result = self.engine.scan_devices(enhanced).await;
        let message = match &result {
            Ok(devices) => format!("Found {} device(s)", devices.len()),
            Err(_) => String::new(),
        };
        OperationResult::from_result(result, message)
    }

    pub async fn stream_gcode(
        &self,
        path: impl AsRef<Path>,
        callback: Option<ProgressCallback>,
    ) -> OperationResult<String> {
        OperationResult::from_result(
            self.engine.stream_gcode(path, callback).await,
            "Streaming started",
        )
    }

    pub async fn pause(&self) -> OperationResult<()> {
        OperationResult::from_result(self.engine.pause().await, "Paused")
    }

    pub async fn resume(&self) -> OperationResult<()> {
        OperationResult::from_result(self.engine.resume().await, "Resumed")
    }

    pub async fn emergency_stop(&self) -> OperationResult<()> {
        OperationResult::from_result(self.engine.emergency_stop().await, "Emergency stop issued")
    }

    pub fn get_progress(&self) -> OperationResult<PrintJob> {
        match self.engine.get_progress() {
            Some(job) => {
                let message = format!("Job {}: {:.1}%", job.status, job.progress_percent);
                OperationResult::ok(job, message)
            }
            None => OperationResult::failure(&StateError::NoActiveJob.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fdmlink_core::ValidationError;
    use fdmlink_settings::Config;

    #[test]
    fn test_failure_carries_kind_and_message() {
        let result: OperationResult<()> =
            OperationResult::failure(&ValidationError::EmptyCommand.into());
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Validation));
        assert!(!result.message.is_empty());

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["error_kind"], "validation");
    }

    #[tokio::test]
    async fn test_operations_before_connect_fail_cleanly() {
        let service = PrinterService::new(PrinterEngine::new(Config::default()));

        let sent = service.send_command("M105").await;
        assert!(!sent.success);
        assert_eq!(sent.error_kind, Some(ErrorKind::State));

        let progress = service.get_progress();
        assert!(!progress.success);
        assert_eq!(progress.error_kind, Some(ErrorKind::State));

        assert!(service.disconnect().await.success);
        assert!(service.emergency_stop().await.success);
        assert!(!service.pause().await.success);
    }
}
