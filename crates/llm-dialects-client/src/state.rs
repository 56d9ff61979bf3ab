//! Per-request lifecycle.

use std::fmt;

/// Where a request is in its lifecycle.
///
/// ```text
/// Idle -> Sending -> Receiving -> Completed | Failed
///                 -> Streaming -> Completed | Cancelled | Failed
///                 -> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestState {
    /// Not started.
    #[default]
    Idle,
    /// The request is being sent.
    Sending,
    /// Waiting for a blocking response body.
    Receiving,
    /// Reading a streamed response.
    Streaming,
    /// Finished normally.
    Completed,
    /// Stopped by the caller.
    Cancelled,
    /// Ended with an error.
    Failed,
}

impl RequestState {
    /// Whether moving from `self` to `next` is allowed.
    pub fn can_transition_to(self, next: Self) -> bool {
        use RequestState::{Cancelled, Completed, Failed, Idle, Receiving, Sending, Streaming};
        matches!(
            (self, next),
            (Idle, Sending)
                | (Sending, Receiving | Streaming | Failed)
                | (Receiving, Completed | Failed)
                | (Streaming, Completed | Cancelled | Failed)
        )
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    /// Moves to `next` if the transition is allowed. A disallowed
    /// transition is logged and leaves the state unchanged.
    pub(crate) fn advance(&mut self, next: Self) {
        if self.can_transition_to(next) {
            tracing::debug!(from = %self, to = %next, "request state");
            *self = next;
        } else {
            tracing::warn!(from = %self, to = %next, "ignoring invalid request state transition");
        }
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Sending => "sending",
            Self::Receiving => "receiving",
            Self::Streaming => "streaming",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocking_path() {
        let mut state = RequestState::default();
        for next in [RequestState::Sending, RequestState::Receiving, RequestState::Completed] {
            state.advance(next);
        }
        assert_eq!(state, RequestState::Completed);
        assert!(state.is_terminal());
    }

    #[test]
    fn test_blocking_request_cannot_be_cancelled() {
        assert!(!RequestState::Receiving.can_transition_to(RequestState::Cancelled));
        assert!(RequestState::Streaming.can_transition_to(RequestState::Cancelled));
    }

    #[test]
    fn test_terminal_states_stay_put() {
        let mut state = RequestState::Cancelled;
        state.advance(RequestState::Completed);
        assert_eq!(state, RequestState::Cancelled);
    }

    #[test]
    fn test_send_failure() {
        let mut state = RequestState::Idle;
        state.advance(RequestState::Sending);
        state.advance(RequestState::Failed);
        assert_eq!(state, RequestState::Failed);
    }
}
