use chrono::{DateTime, Duration, Utc};
use fdmlink_core::{
    ConnectionStatus, EngineEvent, EventBus, EventCategory, EventFilter, JobStatus, PrintJob,
    StreamState,
};
use fdmlink_core::event_bus::JobEvent;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
        + Duration::seconds(secs)
}

#[test]
fn test_full_job_with_pause_and_resume() {
    let mut job = PrintJob::new("benchy.gcode", 4, Some(2));
    assert_eq!(job.status, JobStatus::Queued);

    let mut stream = StreamState::Idle.transition(StreamState::Streaming).unwrap();
    job.start(at(0));
    job.mark_printing();
    job.record_line("N1 G28*18", true);
    job.set_layer(1);
    job.refresh(at(10));
    assert_eq!(job.progress_percent, 25.0);

    stream = stream.transition(StreamState::Paused).unwrap();
    job.pause(at(10));
    assert!(stream.status().can_resume);
    assert!(!stream.status().can_pause);

    stream = stream.transition(StreamState::Streaming).unwrap();
    job.resume(at(70));
    assert_eq!(job.paused_seconds, 60.0);

    for line in ["G1 X1", "G1 X2", "G1 X3"] {
        job.record_line(line, true);
    }
    job.set_layer(2);
    stream = stream.transition(StreamState::Idle).unwrap();
    job.finish(JobStatus::Completed, at(100));

    assert_eq!(stream, StreamState::Idle);
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress_percent, 100.0);
    assert_eq!(job.elapsed_time, 40.0);
    assert_eq!(job.current_layer, 2);
    assert_eq!(job.last_command.as_deref(), Some("G1 X3"));
}

#[test]
fn test_cancel_while_paused_closes_pause_span() {
    let mut job = PrintJob::new("cube.gcode", 10, None);
    job.start(at(0));
    job.mark_printing();
    job.pause(at(5));
    job.finish(JobStatus::Cancelled, at(15));

    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.paused_seconds, 10.0);
    assert_eq!(job.elapsed_time, 5.0);
    assert_eq!(job.finished_at, Some(at(15)));
}

#[test]
fn test_status_follows_stream() {
    assert!(ConnectionStatus::Idle.can_transition_to(ConnectionStatus::Printing));
    assert!(ConnectionStatus::Printing.can_transition_to(ConnectionStatus::Paused));
    assert!(!ConnectionStatus::Disconnected.can_transition_to(ConnectionStatus::Paused));
}

#[test]
fn test_job_events_reach_filtered_subscriber() {
    let bus = EventBus::new();
    let finished = Arc::new(AtomicUsize::new(0));
    let f = finished.clone();
    bus.subscribe(EventFilter::Categories(vec![EventCategory::Job]), move |event| {
        if let EngineEvent::Job(JobEvent::Finished { status, .. }) = event {
            assert_eq!(status, JobStatus::Completed);
            f.fetch_add(1, Ordering::SeqCst);
        }
    });

    let job = PrintJob::new("cube.gcode", 1, None);
    bus.publish(EngineEvent::Job(JobEvent::Progress(Box::new(job.clone()))));
    bus.publish(EngineEvent::Job(JobEvent::Finished {
        job_id: job.id,
        status: JobStatus::Completed,
    }));
    assert_eq!(finished.load(Ordering::SeqCst), 1);
}
