//! Link abstraction shared by real serial ports and the in-process emulator.
//!
//! A [`Link`] moves newline-terminated ASCII lines. [`exchange`] layers the
//! request/acknowledgement protocol on top: write one line, then collect
//! replies until one starts with `ok` or `Error`, or the budget runs out.

pub mod emulated;
pub mod serial;

use async_trait::async_trait;
use fdmlink_core::{CommunicationError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub use emulated::EmulatorLink;
pub use serial::{list_ports, SerialLink, SerialPortInfo};

/// A bidirectional line-oriented connection to a printer
#[async_trait]
pub trait Link: Send + Sync {
    /// Port name, or a pseudo-name for the emulator
    fn name(&self) -> &str;

    /// Whether this link talks to the in-process emulator
    fn is_emulated(&self) -> bool {
        false
    }

    /// Write one line; the newline is appended here
    async fn write_line(&self, line: &str) -> Result<()>;

    /// Next complete line, or `None` when nothing arrived within `timeout`
    async fn read_line(&self, timeout: Duration) -> Result<Option<String>>;

    /// Drop anything received but not yet read
    async fn discard_input(&self) -> Result<()>;

    /// Close the link; further I/O fails with `LinkClosed`
    async fn close(&self) -> Result<()>;
}

/// Shared handle to a link
pub type SharedLink = Arc<dyn Link>;

/// Everything a device sent back for one command
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reply {
    /// Lines in arrival order, the terminating `ok`/`Error` line last
    pub lines: Vec<String>,
}

impl Reply {
    /// The terminating line
    pub fn status_line(&self) -> Option<&str> {
        self.lines.last().map(String::as_str)
    }

    /// Positive acknowledgement
    pub fn is_ok(&self) -> bool {
        self.status_line().is_some_and(is_ack)
    }

    /// Rejection
    pub fn is_error(&self) -> bool {
        self.status_line().is_some_and(is_rejection)
    }

    /// Raw text as received, one line per row
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

/// A line starting with `ok`
pub fn is_ack(line: &str) -> bool {
    line.trim_start().starts_with("ok")
}

/// A line starting with `Error`, in any case
pub fn is_rejection(line: &str) -> bool {
    line.trim_start()
        .get(..5)
        .is_some_and(|p| p.eq_ignore_ascii_case("error"))
}

/// Send one line and wait for its acknowledgement.
///
/// Stale input is discarded first so an earlier unanswered write cannot be
/// mistaken for this command's reply. Lines that are neither ack nor
/// rejection are collected as unsolicited messages.
pub async fn exchange(link: &dyn Link, line: &str, timeout: Duration) -> Result<Reply> {
    link.discard_input().await?;
    tracing::debug!(">> {}", line);
    link.write_line(line).await?;

    let deadline = Instant::now() + timeout;
    let mut reply = Reply::default();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(CommunicationError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }
            .into());
        }
        let Some(received) = link.read_line(remaining).await? else {
            continue;
        };
        let received = received.trim().to_string();
        if received.is_empty() {
            continue;
        }
        tracing::debug!("<< {}", received);
        let done = is_ack(&received) || is_rejection(&received);
        reply.lines.push(received);
        if done {
            return Ok(reply);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_classification() {
        assert!(is_ack("ok"));
        assert!(is_ack("ok T:20.00/0.00 B:20.00/0.00"));
        assert!(!is_ack("echo:busy: processing"));
        assert!(is_rejection("Error:checksum mismatch, Last Line: 3"));
        assert!(is_rejection("error: unknown command"));
        assert!(!is_rejection("err"));
    }

    #[test]
    fn test_reply_accessors() {
        let reply = Reply {
            lines: vec!["FIRMWARE_NAME:Marlin".to_string(), "ok".to_string()],
        };
        assert!(reply.is_ok());
        assert!(!reply.is_error());
        assert_eq!(reply.text(), "FIRMWARE_NAME:Marlin\nok");
        assert!(!Reply::default().is_ok());
    }
}
