//! Link monitor
//!
//! Polls temperatures at a fixed interval while connected, including between
//! the lines of a running print. Consecutive failures (or a single hard link
//! failure) take the engine Offline and start reconnect attempts; when those
//! run out the active job is failed and the engine reports the connection as
//! lost.

use super::Inner;
use fdmlink_core::event_bus::{ConnectionEvent, DisconnectReason, ErrorEvent};
use fdmlink_core::{ConnectionStatus, EngineEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::Instrument;

/// Soft failures in a row before the link is treated as lost
const FAILURE_THRESHOLD: u32 = 2;

pub(crate) async fn run(inner: Arc<Inner>, stop: watch::Receiver<bool>) {
    let span = tracing::info_span!("monitor", port = %inner.port_name());
    watch_link(inner, stop).instrument(span).await
}

async fn watch_link(inner: Arc<Inner>, mut stop: watch::Receiver<bool>) {
    let interval = inner.config.connection.monitor_interval();
    let ack_timeout = inner.config.connection.ack_timeout();
    let lock_wait = lock_wait(&inner);
    let mut failures = 0u32;

    loop {
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
            _ = tokio::time::sleep(interval) => {}
        }
        if *stop.borrow() {
            break;
        }

        // Queue behind the line in flight; the lock is FIFO so the poll slots
        // in between streamed lines.
        let guard = tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
                continue;
            }
            locked = tokio::time::timeout(lock_wait, inner.command_lock.lock()) => match locked {
                Ok(guard) => guard,
                Err(_) => {
                    tracing::debug!("Link busy for {:?}, skipping poll", lock_wait);
                    continue;
                }
            },
        };
        let command = inner.commands().temperature_report;
        let result = inner.exchange(&command, ack_timeout).await;
        drop(guard);

        let lost = match result {
            Ok(reply) => {
                inner.absorb_reply(&reply);
                failures = 0;
                false
            }
            Err(e) if e.is_link_failure() => {
                tracing::warn!("Link failure: {}", e);
                true
            }
            Err(e) => {
                failures += 1;
                tracing::debug!("Temperature poll failed ({}/{}): {}", failures, FAILURE_THRESHOLD, e);
                failures >= FAILURE_THRESHOLD
            }
        };

        if lost {
            failures = 0;
            if !recover(&inner, &mut stop).await {
                break;
            }
        }
    }
    tracing::debug!("Monitor stopped");
}

/// Longest a streamed line can hold the command lock: every attempt and its
/// resync, plus one ack window
fn lock_wait(inner: &Inner) -> Duration {
    let attempts = inner.config.streaming.max_line_retries.saturating_add(1);
    inner.config.connection.ack_timeout() * attempts.saturating_mul(2).saturating_add(1)
}

/// Go Offline and try to reopen the link. Returns false when the monitor
/// should exit.
async fn recover(inner: &Inner, stop: &mut watch::Receiver<bool>) -> bool {
    let port = inner.port_name();
    inner.with_state(|s| s.set_status(ConnectionStatus::Offline));
    inner.publish(EngineEvent::Connection(ConnectionEvent::Offline {
        port: port.clone(),
    }));
    inner.publish(EngineEvent::Error(ErrorEvent::Communication {
        message: format!("lost contact with {}", port),
    }));

    let attempts = inner.config.connection.reconnect_attempts;
    let delay = inner.config.connection.reconnect_delay();
    for attempt in 1..=attempts {
        tokio::select! {
            _ = stop.changed() => return false,
            _ = tokio::time::sleep(delay) => {}
        }
        match inner.reopen().await {
            Ok(()) => {
                inner.with_state(|s| s.restore_live_status());
                tracing::info!("Reconnected to {} on attempt {}", port, attempt);
                inner.publish(EngineEvent::Connection(ConnectionEvent::Reconnected {
                    port,
                    attempt,
                }));
                return true;
            }
            Err(e) => {
                tracing::warn!("Reconnect attempt {}/{} failed: {}", attempt, attempts, e);
            }
        }
    }

    tracing::error!("Giving up on {} after {} reconnect attempt(s)", port, attempts);
    inner.with_state(|s| {
        s.set_status(ConnectionStatus::Error);
        s.last_error = Some("connection lost".to_string());
    });
    inner.fail_stream("connection lost");
    inner.publish(EngineEvent::Connection(ConnectionEvent::Disconnected {
        port,
        reason: DisconnectReason::ConnectionLost,
    }));
    false
}
