//! Type aliases for commonly used shared-state and callback types.
//!
//! Engine state is shared between the caller, the streaming worker and the
//! monitor task, so it always lives behind `Arc` with a `parking_lot` lock.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::data::PrintJob;

/// A thread-safe, mutex-protected wrapper for cross-task sharing.
///
/// Uses `parking_lot::Mutex`; guards must never be held across `.await`.
pub type ThreadSafe<T> = Arc<Mutex<T>>;

/// Caller-supplied progress observer.
///
/// Invoked with a snapshot of the job after every line and on each
/// status change. It runs on a dispatcher task, never under an engine
/// lock, and a panic inside it is contained.
pub type ProgressCallback = Arc<dyn Fn(&PrintJob) + Send + Sync>;

/// Create a new `ThreadSafe<T>` from a value.
#[inline]
pub fn thread_safe<T>(value: T) -> ThreadSafe<T> {
    Arc::new(Mutex::new(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_safe_creation() {
        let value: ThreadSafe<i32> = thread_safe(42);
        assert_eq!(*value.lock(), 42);

        *value.lock() = 100;
        assert_eq!(*value.lock(), 100);
    }

    #[test]
    fn test_progress_callback_is_shareable() {
        let seen = thread_safe(Vec::new());
        let sink = seen.clone();
        let cb: ProgressCallback = Arc::new(move |job: &PrintJob| {
            sink.lock().push(job.lines_sent);
        });
        let other = cb.clone();

        let mut job = PrintJob::new("a.gcode", 2, None);
        cb(&job);
        job.record_line("G28", true);
        other(&job);
        assert_eq!(*seen.lock(), vec![0, 1]);
    }
}
