//! # Player State Machine
//!
//! ```text
//!            play               pause
//!   Idle ───────────> Started ─────────> Paused
//!                      │  ▲ <───────────  │
//!                      │  │    resume     │
//!          stream end  │  │ play / next   │ stop
//!                      ▼  │               ▼
//!                  Completed ────────> Stopped
//!                           no next       │
//!                      Started <──────────┘ play
//! ```
//!
//! There is no terminal state: `Stopped` and `Completed` accept a new play.
//! The machine only validates; side effects belong to the coordinator.

use crate::error::{PlaybackError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PlayerState {
    #[default]
    Idle,
    Started,
    Paused,
    Stopped,
    Completed,
}

impl PlayerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlayerState::Idle => "idle",
            PlayerState::Started => "started",
            PlayerState::Paused => "paused",
            PlayerState::Stopped => "stopped",
            PlayerState::Completed => "completed",
        }
    }

    /// Something is loaded and either playing or ready to continue.
    pub fn is_active(&self) -> bool {
        matches!(self, PlayerState::Started | PlayerState::Paused)
    }

    pub fn can_transition_to(&self, next: PlayerState) -> bool {
        use PlayerState::*;
        matches!(
            (self, next),
            (Idle, Started)
                | (Started, Paused)
                | (Started, Stopped)
                | (Started, Completed)
                | (Paused, Started)
                | (Paused, Stopped)
                | (Stopped, Started)
                | (Completed, Started)
                | (Completed, Stopped)
        )
    }
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observed transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub previous: PlayerState,
    pub state: PlayerState,
}

#[derive(Debug, Default)]
pub struct PlayerStateMachine {
    state: PlayerState,
}

impl PlayerStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn transition(&mut self, next: PlayerState) -> Result<Transition> {
        if !self.state.can_transition_to(next) {
            return Err(PlaybackError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        let previous = std::mem::replace(&mut self.state, next);
        Ok(Transition {
            previous,
            state: next,
        })
    }

    /// Leave whatever is playing and start again, passing through `Stopped`
    /// when something was loaded.
    pub fn restart(&mut self) -> Vec<Transition> {
        let mut transitions = Vec::with_capacity(2);
        if self.state.can_transition_to(PlayerState::Stopped) {
            if let Ok(t) = self.transition(PlayerState::Stopped) {
                transitions.push(t);
            }
        }
        if let Ok(t) = self.transition(PlayerState::Started) {
            transitions.push(t);
        }
        transitions
    }

    /// Move to `Stopped` if something was loaded; otherwise nothing happens.
    pub fn stop(&mut self) -> Option<Transition> {
        self.transition(PlayerState::Stopped).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_only_starts() {
        let mut machine = PlayerStateMachine::new();
        assert!(machine.transition(PlayerState::Paused).is_err());
        assert!(machine.transition(PlayerState::Completed).is_err());
        assert!(machine.stop().is_none());
        assert_eq!(machine.state(), PlayerState::Idle);

        let t = machine.transition(PlayerState::Started).unwrap();
        assert_eq!(t.previous, PlayerState::Idle);
    }

    #[test]
    fn pause_and_resume_toggle() {
        let mut machine = PlayerStateMachine::new();
        machine.transition(PlayerState::Started).unwrap();
        machine.transition(PlayerState::Paused).unwrap();
        assert!(machine.transition(PlayerState::Completed).is_err());
        machine.transition(PlayerState::Started).unwrap();
        assert_eq!(machine.state(), PlayerState::Started);
    }

    #[test]
    fn restart_passes_through_stopped() {
        let mut machine = PlayerStateMachine::new();
        assert_eq!(machine.restart().len(), 1);

        let transitions = machine.restart();
        assert_eq!(
            transitions,
            vec![
                Transition {
                    previous: PlayerState::Started,
                    state: PlayerState::Stopped
                },
                Transition {
                    previous: PlayerState::Stopped,
                    state: PlayerState::Started
                },
            ]
        );
    }

    #[test]
    fn completed_accepts_play_or_stop() {
        let mut machine = PlayerStateMachine::new();
        machine.transition(PlayerState::Started).unwrap();
        machine.transition(PlayerState::Completed).unwrap();
        assert!(PlayerState::Completed.can_transition_to(PlayerState::Started));
        machine.transition(PlayerState::Stopped).unwrap();
        machine.transition(PlayerState::Started).unwrap();
    }
}
