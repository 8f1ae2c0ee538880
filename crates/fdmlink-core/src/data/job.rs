//! Print job record and progress bookkeeping

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Lifecycle of a print job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    /// Created, not yet started
    Queued,
    /// Worker is starting up
    Starting,
    /// Lines are being streamed
    Printing,
    /// Streaming is paused
    Paused,
    /// Every line was sent
    Completed,
    /// Aborted by a systemic failure
    Failed,
    /// Stopped by the caller
    Cancelled,
}

impl JobStatus {
    /// Completed, Failed and Cancelled are terminal
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "Queued"),
            Self::Starting => write!(f, "Starting"),
            Self::Printing => write!(f, "Printing"),
            Self::Paused => write!(f, "Paused"),
            Self::Completed => write!(f, "Completed"),
            Self::Failed => write!(f, "Failed"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// One print job and its progress.
///
/// Timing methods take `now` explicitly so the worker decides the clock and
/// tests can replay exact timelines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrintJob {
    /// Job identifier
    pub id: String,
    /// Current status
    pub status: JobStatus,
    /// Source G-code file
    pub file_path: PathBuf,
    /// Number of prepared lines
    pub total_lines: usize,
    /// Lines handed to the device (acknowledged or not)
    pub lines_sent: usize,
    /// Lines whose acknowledgement failed or timed out
    pub failed_lines: usize,
    /// Last layer marker seen
    pub current_layer: u32,
    /// Number of layer markers in the file, if any
    pub total_layers: Option<u32>,
    /// 0.0..=100.0
    pub progress_percent: f64,
    /// When streaming started
    pub started_at: Option<DateTime<Utc>>,
    /// When the current (or last) pause began
    pub paused_at: Option<DateTime<Utc>>,
    /// When the last resume happened
    pub resumed_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal status
    pub finished_at: Option<DateTime<Utc>>,
    /// Total time spent paused in completed pause spans, in seconds
    pub paused_seconds: f64,
    /// Printing time in seconds, paused spans excluded
    pub elapsed_time: f64,
    /// Linear extrapolation of remaining seconds
    pub estimated_remaining: Option<f64>,
    /// Last line handed to the device
    pub last_command: Option<String>,
    /// Reason for a Failed status
    pub error: Option<String>,
}

impl PrintJob {
    /// Create a queued job for a prepared file
    pub fn new(file_path: impl Into<PathBuf>, total_lines: usize, total_layers: Option<u32>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            status: JobStatus::Queued,
            file_path: file_path.into(),
            total_lines,
            lines_sent: 0,
            failed_lines: 0,
            current_layer: 0,
            total_layers,
            progress_percent: 0.0,
            started_at: None,
            paused_at: None,
            resumed_at: None,
            finished_at: None,
            paused_seconds: 0.0,
            elapsed_time: 0.0,
            estimated_remaining: None,
            last_command: None,
            error: None,
        }
    }

    /// Whether the job reached a terminal status
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Queued → Starting
    pub fn start(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Starting;
        self.started_at = Some(now);
    }

    /// Starting → Printing, once the first line goes out
    pub fn mark_printing(&mut self) {
        if matches!(self.status, JobStatus::Queued | JobStatus::Starting) {
            self.status = JobStatus::Printing;
        }
    }

    /// Record the start of a pause span
    pub fn pause(&mut self, now: DateTime<Utc>) {
        if self.is_terminal() {
            return;
        }
        self.refresh(now);
        self.status = JobStatus::Paused;
        self.paused_at = Some(now);
    }

    /// Close the current pause span
    pub fn resume(&mut self, now: DateTime<Utc>) {
        if self.status != JobStatus::Paused {
            return;
        }
        if let Some(paused_at) = self.paused_at {
            self.paused_seconds += seconds_between(paused_at, now);
        }
        self.resumed_at = Some(now);
        self.status = JobStatus::Printing;
        self.refresh(now);
    }

    /// Account for one line handed to the device
    pub fn record_line(&mut self, command: &str, acknowledged: bool) {
        self.lines_sent += 1;
        if !acknowledged {
            self.failed_lines += 1;
        }
        self.last_command = Some(command.to_string());
    }

    /// Record a layer marker
    pub fn set_layer(&mut self, layer: u32) {
        self.current_layer = layer;
    }

    /// Recompute percent, elapsed and remaining time
    pub fn refresh(&mut self, now: DateTime<Utc>) {
        self.progress_percent = if self.total_lines == 0 {
            0.0
        } else {
            (self.lines_sent as f64 / self.total_lines as f64 * 100.0).min(100.0)
        };

        let Some(started_at) = self.started_at else {
            return;
        };
        let mut paused = self.paused_seconds;
        if self.status == JobStatus::Paused {
            if let Some(paused_at) = self.paused_at {
                paused += seconds_between(paused_at, now);
            }
        }
        self.elapsed_time = (seconds_between(started_at, now) - paused).max(0.0);

        self.estimated_remaining = if self.progress_percent > 0.0 {
            Some(self.elapsed_time * (100.0 - self.progress_percent) / self.progress_percent)
        } else {
            None
        };
    }

    /// Move to a terminal status. Completed pins progress at 100%.
    pub fn finish(&mut self, status: JobStatus, now: DateTime<Utc>) {
        if self.is_terminal() {
            return;
        }
        if self.status == JobStatus::Paused {
            if let Some(paused_at) = self.paused_at {
                self.paused_seconds += seconds_between(paused_at, now);
            }
        }
        self.status = status;
        self.refresh(now);
        if status == JobStatus::Completed {
            self.progress_percent = 100.0;
            self.estimated_remaining = Some(0.0);
        }
        self.finished_at = Some(now);
    }

    /// Mark as Failed with a reason
    pub fn fail(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        self.error = Some(reason.into());
        self.finish(JobStatus::Failed, now);
    }
}

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds().max(0) as f64 / 1000.0
}
