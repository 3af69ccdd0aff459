// Playback state machine states and the authoritative state cell

use crate::error::{EngineError, Result};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PlaybackState {
    /// Nothing has been played yet
    Idle = 0,
    /// Session set up, waiting for the first rendered frames
    Starting = 1,
    /// Audio is being rendered
    Playing = 2,
    /// Decode loop is being suspended and output drained
    Pausing = 3,
    /// Audio is paused, buffered audio is retained
    Paused = 4,
    /// Buffer is being flushed and the source repositioned
    Seeking = 5,
    /// Session is being torn down
    Stopping = 6,
    /// Playback has been stopped by a command
    Stopped = 7,
    /// Playback reached the end of the stream
    Finished = 8,
    /// Playback ended with an unrecoverable error
    Failed = 9,
}

impl PlaybackState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PlaybackState::Idle,
            1 => PlaybackState::Starting,
            2 => PlaybackState::Playing,
            3 => PlaybackState::Pausing,
            4 => PlaybackState::Paused,
            5 => PlaybackState::Seeking,
            6 => PlaybackState::Stopping,
            7 => PlaybackState::Stopped,
            8 => PlaybackState::Finished,
            _ => PlaybackState::Failed,
        }
    }

    /// Stopped, Finished and Failed end a playback session
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PlaybackState::Stopped | PlaybackState::Finished | PlaybackState::Failed
        )
    }

    /// States in which a session (decode loop and sink) exists
    pub fn has_session(self) -> bool {
        matches!(
            self,
            PlaybackState::Starting
                | PlaybackState::Playing
                | PlaybackState::Pausing
                | PlaybackState::Paused
                | PlaybackState::Seeking
                | PlaybackState::Stopping
        )
    }

    pub fn can_transition_to(self, to: PlaybackState) -> bool {
        use PlaybackState::*;

        match (self, to) {
            // From Idle
            (Idle, Starting) => true,

            // From Starting
            (Starting, Playing) => true,
            (Starting, Seeking) => true,
            (Starting, Stopping) => true,
            (Starting, Failed) => true,

            // From Playing
            (Playing, Pausing) => true,
            (Playing, Seeking) => true,
            (Playing, Stopping) => true,
            (Playing, Finished) => true,
            (Playing, Failed) => true,

            // From Pausing
            (Pausing, Paused) => true,
            (Pausing, Failed) => true,

            // From Paused
            (Paused, Starting) => true,
            (Paused, Seeking) => true,
            (Paused, Stopping) => true,
            (Paused, Failed) => true,

            // From Seeking
            (Seeking, Starting) => true,
            (Seeking, Failed) => true,

            // From Stopping
            (Stopping, Stopped) => true,

            // A fresh session may start from any terminal state
            (Stopped, Starting) | (Finished, Starting) | (Failed, Starting) => true,

            _ => false,
        }
    }
}

/// Authoritative playback state of one engine instance
///
/// Reads are lock-free so the render context can consult the state; writes
/// happen only on the control context.
#[derive(Clone)]
pub struct StateCell {
    state: Arc<AtomicU8>,
}

impl StateCell {
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(PlaybackState::Idle as u8)),
        }
    }

    pub fn get(&self) -> PlaybackState {
        PlaybackState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Apply a transition, rejecting it if the table does not allow it
    pub fn transition(&self, to: PlaybackState) -> Result<PlaybackState> {
        let from = self.get();
        if !from.can_transition_to(to) {
            return Err(EngineError::InvalidState(format!(
                "Invalid state transition from {:?} to {:?}",
                from, to
            )));
        }

        self.state.store(to as u8, Ordering::Release);
        log::debug!("Playback state changed: {:?} -> {:?}", from, to);
        Ok(from)
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

    #[test]
    fn test_pause_resume_cycle() {
        let cell = StateCell::new();
        for next in [
            PlaybackState::Starting,
            PlaybackState::Playing,
            PlaybackState::Pausing,
            PlaybackState::Paused,
            PlaybackState::Starting,
            PlaybackState::Playing,
        ] {
            assert!(cell.transition(next).is_ok(), "rejected {:?}", next);
        }
        assert_eq!(cell.get(), PlaybackState::Playing);
    }

    #[test]
    fn test_rejects_pause_from_idle() {
        let cell = StateCell::new();
        let err = cell.transition(PlaybackState::Pausing).unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
        assert_eq!(cell.get(), PlaybackState::Idle);
    }

    #[test]
    fn test_terminal_states_restart_only_through_starting() {
        for terminal in [
            PlaybackState::Stopped,
            PlaybackState::Finished,
            PlaybackState::Failed,
        ] {
            assert!(terminal.is_terminal());
            assert!(terminal.can_transition_to(PlaybackState::Starting));
            assert!(!terminal.can_transition_to(PlaybackState::Playing));
            assert!(!terminal.can_transition_to(PlaybackState::Stopping));
        }
    }

    #[test]
    fn test_stopping_only_reaches_stopped() {
        assert!(PlaybackState::Stopping.can_transition_to(PlaybackState::Stopped));
        assert!(!PlaybackState::Stopping.can_transition_to(PlaybackState::Paused));
        assert!(!PlaybackState::Stopping.can_transition_to(PlaybackState::Failed));
    }
}
