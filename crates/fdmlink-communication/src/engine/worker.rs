//! Streaming worker
//!
//! Walks a prepared program one line at a time: waits while paused, sends
//! each command under the command lock and waits for its acknowledgement,
//! retries rejected lines, and keeps the job record current. A cancel
//! signal is honoured between lines.

use super::Inner;
use crate::gcode::{LayerMarker, PreparedLine, PreparedProgram};
use chrono::Utc;
use fdmlink_core::event_bus::JobEvent;
use fdmlink_core::{EngineEvent, Error, JobStatus, Result, StreamState};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::Instrument;

enum Gate {
    Go,
    Cancelled,
}

enum LineOutcome {
    Acknowledged,
    Failed(String),
}

pub(crate) async fn run(
    inner: Arc<Inner>,
    job_id: String,
    program: PreparedProgram,
    cancel: watch::Receiver<bool>,
) {
    let span = tracing::info_span!("stream", job_id = %job_id);
    async move {
        let outcome = stream(&inner, &job_id, &program, cancel).await;
        finish(&inner, &job_id, outcome);
    }
    .instrument(span)
    .await
}

async fn stream(
    inner: &Inner,
    job_id: &str,
    program: &PreparedProgram,
    mut cancel: watch::Receiver<bool>,
) -> Result<JobStatus> {
    let settings = inner.config.streaming.clone();
    let ack_timeout = inner.config.connection.ack_timeout();
    let commands = inner.commands();
    let total = program.len();
    let chunk = settings.chunk_size.max(1);

    if program.checksums {
        let _guard = inner.command_lock.lock().await;
        let reply = inner.exchange(&commands.reset_line_number, ack_timeout).await?;
        if !reply.is_ok() {
            tracing::warn!("Line number reset not acknowledged: {}", reply.text());
        }
    }

    for (index, line) in program.lines.iter().enumerate() {
        let guard = loop {
            if let Gate::Cancelled = wait_while_paused(inner, &settings, &mut cancel).await {
                return Ok(JobStatus::Cancelled);
            }
            let guard = inner.command_lock.lock().await;
            if *cancel.borrow() {
                return Ok(JobStatus::Cancelled);
            }
            // pause() or a stop may have landed while this task waited for the lock
            match inner.read_state(|s| s.stream) {
                StreamState::Streaming => break guard,
                StreamState::Paused => {
                    drop(guard);
                    continue;
                }
                StreamState::Stopping | StreamState::Idle => return Ok(JobStatus::Cancelled),
            }
        };

        match line {
            PreparedLine::Layer { marker, text } => {
                let layer = inner.with_state(|s| {
                    let job = s.job.as_mut()?;
                    let layer = match marker {
                        LayerMarker::Index(n) => *n,
                        LayerMarker::Next => job.current_layer + 1,
                    };
                    job.mark_printing();
                    job.set_layer(layer);
                    job.record_line(text, true);
                    job.refresh(Utc::now());
                    Some(layer)
                });
                drop(guard);
                if let Some(layer) = layer {
                    tracing::debug!("Layer {}", layer);
                    inner.publish(EngineEvent::Job(JobEvent::LayerChanged {
                        job_id: job_id.to_string(),
                        layer,
                    }));
                }
            }
            PreparedLine::Command {
                number,
                command,
                wire,
            } => {
                let outcome = send_line(inner, *number, wire, &settings, ack_timeout).await?;
                drop(guard);
                let acknowledged = matches!(outcome, LineOutcome::Acknowledged);
                inner.with_state(|s| {
                    if let Some(job) = s.job.as_mut() {
                        job.mark_printing();
                        job.record_line(command, acknowledged);
                        job.refresh(Utc::now());
                    }
                });
                if let LineOutcome::Failed(error) = outcome {
                    tracing::warn!("Line {} ({}) failed: {}", index + 1, command, error);
                    inner.publish(EngineEvent::Job(JobEvent::LineFailed {
                        job_id: job_id.to_string(),
                        line_number: index + 1,
                        error,
                    }));
                }
            }
        }

        let sent = index + 1;
        if sent % chunk == 0 || sent == total {
            publish_progress(inner);
        }
        let delay = settings.line_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
    Ok(JobStatus::Completed)
}

/// Block between lines while the stream is paused. Returns early on cancel.
async fn wait_while_paused(
    inner: &Inner,
    settings: &fdmlink_settings::StreamingSettings,
    cancel: &mut watch::Receiver<bool>,
) -> Gate {
    loop {
        if *cancel.borrow() {
            return Gate::Cancelled;
        }
        match inner.read_state(|s| s.stream) {
            StreamState::Paused => {}
            StreamState::Stopping | StreamState::Idle => return Gate::Cancelled,
            StreamState::Streaming => return Gate::Go,
        }
        tokio::select! {
            changed = cancel.changed() => {
                if changed.is_err() {
                    return Gate::Cancelled;
                }
            }
            _ = tokio::time::sleep(settings.pause_poll()) => {}
        }
    }
}

/// Send one command and wait for its acknowledgement, retrying rejections.
///
/// With line numbers on, the device's expected number is rewound before a
/// retry and moved past the line after giving up, so the next line is
/// accepted in sequence. Link failures abort the job.
async fn send_line(
    inner: &Inner,
    number: Option<u32>,
    wire: &str,
    settings: &fdmlink_settings::StreamingSettings,
    ack_timeout: std::time::Duration,
) -> Result<LineOutcome> {
    let attempts = 1 + settings.max_line_retries;
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        if attempt > 1 {
            tracing::debug!("Retrying '{}' (attempt {}/{})", wire, attempt, attempts);
            if let Some(n) = number {
                resync(inner, n.saturating_sub(1), ack_timeout).await?;
            }
        }
        match inner.exchange(wire, ack_timeout).await {
            Ok(reply) if reply.is_ok() => {
                inner.absorb_reply(&reply);
                return Ok(LineOutcome::Acknowledged);
            }
            Ok(reply) => {
                inner.absorb_reply(&reply);
                last_error = reply.text();
            }
            Err(e) if e.is_link_failure() || e.is_state_error() => return Err(e),
            Err(e) => last_error = e.to_string(),
        }
    }

    if let Some(n) = number {
        resync(inner, n, ack_timeout).await?;
    }
    Ok(LineOutcome::Failed(last_error))
}

async fn resync(inner: &Inner, last_line: u32, ack_timeout: std::time::Duration) -> Result<()> {
    match inner
        .exchange(&format!("M110 N{}", last_line), ack_timeout)
        .await
    {
        Ok(_) => Ok(()),
        Err(e) if e.is_link_failure() || e.is_state_error() => Err(e),
        Err(e) => {
            tracing::warn!("Line number resync failed: {}", e);
            Ok(())
        }
    }
}

fn publish_progress(inner: &Inner) {
    let job = inner.read_state(|s| s.job.clone());
    if let Some(job) = job {
        inner.publish(EngineEvent::Job(JobEvent::Progress(Box::new(job))));
    }
}

/// Settle the job record, free the stream and announce the outcome
fn finish(inner: &Inner, job_id: &str, outcome: Result<JobStatus>) {
    let now = Utc::now();
    let limit = inner.config.streaming.history_size;
    let status = inner.with_state(|s| {
        let job = s.job.as_mut().filter(|j| j.id == job_id)?;
        match &outcome {
            Ok(status) => job.finish(*status, now),
            Err(e) => job.fail(e.to_string(), now),
        }
        let status = job.status;
        s.release_stream();
        s.archive_job(limit);
        Some(status)
    });
    let Some(status) = status else {
        return;
    };

    publish_progress(inner);
    inner.publish(EngineEvent::Job(JobEvent::Finished {
        job_id: job_id.to_string(),
        status,
    }));
    log_outcome(job_id, status, outcome.err());
}

fn log_outcome(job_id: &str, status: JobStatus, error: Option<Error>) {
    match status {
        JobStatus::Completed => tracing::info!("Job {} completed", job_id),
        JobStatus::Cancelled => tracing::warn!("Job {} cancelled", job_id),
        _ => match error {
            Some(e) => tracing::error!("Job {} {}: {}", job_id, status, e),
            None => tracing::error!("Job {} {}", job_id, status),
        },
    }
}
