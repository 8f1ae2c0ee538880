//! Streaming state machine
//!
//! The four streaming flags (`is_streaming`, `is_paused`, `can_pause`,
//! `can_resume`) are a projection of one [`StreamState`]; they are never
//! stored independently.

use crate::error::StateError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// State of the streaming worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StreamState {
    /// No job streaming
    #[default]
    Idle,
    /// Lines are flowing
    Streaming,
    /// Worker is holding between lines
    Paused,
    /// Cancellation signalled, teardown in progress
    Stopping,
}

impl StreamState {
    /// Check if a transition from this state to `target` is valid.
    ///
    /// - Idle → Streaming
    /// - Streaming ⇄ Paused
    /// - Streaming/Paused → Stopping
    /// - Streaming/Paused/Stopping → Idle
    pub fn can_transition_to(&self, target: StreamState) -> bool {
        use StreamState::*;
        matches!(
            (self, target),
            (Idle, Streaming)
                | (Streaming, Paused)
                | (Paused, Streaming)
                | (Streaming | Paused, Stopping)
                | (Streaming | Paused | Stopping, Idle)
        )
    }

    /// Validated transition
    pub fn transition(self, target: StreamState) -> Result<StreamState, StateError> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(StateError::InvalidTransition {
                current: self.to_string(),
                requested: target.to_string(),
            })
        }
    }

    /// Whether a job is holding the stream (streaming or paused)
    pub fn is_active(&self) -> bool {
        matches!(self, StreamState::Streaming | StreamState::Paused)
    }

    /// Flag view of this state
    pub fn status(&self) -> StreamingStatus {
        StreamingStatus::from(*self)
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Streaming => write!(f, "Streaming"),
            Self::Paused => write!(f, "Paused"),
            Self::Stopping => write!(f, "Stopping"),
        }
    }
}

/// Flag bundle reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamingStatus {
    /// A job holds the stream
    pub is_streaming: bool,
    /// The job is paused
    pub is_paused: bool,
    /// `pause()` would be accepted
    pub can_pause: bool,
    /// `resume()` would be accepted
    pub can_resume: bool,
    /// `emergency_stop()` is accepted from every state
    pub emergency_stop_available: bool,
}

impl From<StreamState> for StreamingStatus {
    fn from(state: StreamState) -> Self {
        let is_streaming = state.is_active();
        let is_paused = state == StreamState::Paused;
        Self {
            is_streaming,
            is_paused,
            can_pause: is_streaming && !is_paused,
            can_resume: is_paused,
            emergency_stop_available: true,
        }
    }
}

impl Default for StreamingStatus {
    fn default() -> Self {
        StreamState::default().into()
    }
}
