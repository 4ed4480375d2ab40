//! Session lifecycle state machine

use serde::Serialize;
use std::fmt;
use tokio::sync::watch;
use tracing::debug;

/// Lifecycle of one playback attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SessionState {
    Idle,
    Connecting,
    AwaitingFormat,
    AwaitingStreamId,
    Streaming,
    Stopped,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Stopped | SessionState::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Idle, Connecting)
            | (Connecting, AwaitingFormat)
            | (AwaitingFormat, AwaitingStreamId)
            | (AwaitingStreamId, Streaming) => true,
            (from, Stopped | Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Shared, observable state cell. Transitions out of a terminal state are
/// refused, so whichever of stop and failure lands first wins.
#[derive(Debug)]
pub struct StateCell {
    tx: watch::Sender<SessionState>,
}

impl StateCell {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionState::Idle);
        Self { tx }
    }

    pub fn get(&self) -> SessionState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    /// Apply `next` if allowed; returns whether the state changed
    pub fn transition(&self, next: SessionState) -> bool {
        let mut from = SessionState::Idle;
        let changed = self.tx.send_if_modified(|state| {
            from = *state;
            if state.can_transition(next) {
                *state = next;
                true
            } else {
                false
            }
        });
        if changed {
            debug!("session state {} -> {}", from, next);
        }
        changed
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionState::*;

    #[test]
    fn test_happy_path() {
        let cell = StateCell::new();
        for next in [Connecting, AwaitingFormat, AwaitingStreamId, Streaming, Stopped] {
            assert!(cell.transition(next), "transition to {next}");
        }
        assert_eq!(cell.get(), Stopped);
    }

    #[test]
    fn test_terminal_states_are_sticky() {
        let cell = StateCell::new();
        assert!(cell.transition(Connecting));
        assert!(cell.transition(Failed));
        assert!(!cell.transition(Stopped));
        assert!(!cell.transition(Connecting));
        assert_eq!(cell.get(), Failed);
    }

    #[test]
    fn test_no_skipping_handshake_steps() {
        assert!(!Connecting.can_transition(Streaming));
        assert!(!Idle.can_transition(AwaitingFormat));
        assert!(AwaitingFormat.can_transition(Failed));
        assert!(Idle.can_transition(Stopped));
    }

    #[tokio::test]
    async fn test_subscribers_observe_transitions() {
        let cell = StateCell::new();
        let mut rx = cell.subscribe();
        cell.transition(Connecting);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), Connecting);
    }
}
