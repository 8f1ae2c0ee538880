//! Delivers progress snapshots to a caller-supplied callback.
//!
//! The callback runs on its own task fed by the event bus, so a slow or
//! panicking observer never stalls the streaming worker or holds an engine
//! lock.

use fdmlink_core::event_bus::JobEvent;
use fdmlink_core::{EngineEvent, EventBus, ProgressCallback};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// Forward `job_id`'s progress events to `callback` until the job finishes.
///
/// The receiver is taken before the task is spawned so no event published
/// after this call returns is missed.
pub(crate) fn spawn_dispatcher(
    events: &EventBus,
    job_id: String,
    callback: ProgressCallback,
) -> JoinHandle<()> {
    let mut rx = events.receiver();
    tokio::spawn(async move {
        let mut panics = 0u32;
        loop {
            match rx.recv().await {
                Ok(EngineEvent::Job(JobEvent::Progress(job))) if job.id == job_id => {
                    if catch_unwind(AssertUnwindSafe(|| callback(&job))).is_err() {
                        panics += 1;
                        tracing::warn!("Progress callback for job {} panicked", job_id);
                    }
                }
                Ok(EngineEvent::Job(JobEvent::Finished { job_id: id, .. })) if id == job_id => {
                    break;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        "Progress callback for job {} fell behind, {} event(s) skipped",
                        job_id,
                        skipped
                    );
                }
                Err(RecvError::Closed) => break,
            }
        }
        if panics > 0 {
            tracing::debug!("Progress dispatcher for {} saw {} panic(s)", job_id, panics);
        }
    })
}
