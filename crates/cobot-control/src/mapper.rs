//! [`CommandMapper`] – symbolic state → wire command.
//!
//! Two policies live side by side:
//!
//! - **Movement** is a heartbeat.  Every positional state maps to a command
//!   and the caller resends it on a fixed cadence whether or not it changed;
//!   the firmware relies on the stream as a liveness signal.
//! - **Emotion** is edge-triggered.  A reaction command is produced only when
//!   the emotion differs from the last one sent.  A neutral or sleeping state
//!   clears the memory so the same emotion can fire again later.
//! - **Gestures** are edge-triggered too: an open palm is greeted once when
//!   it appears, not on every frame it is held.
//!
//! # Example
//!
//! ```
//! use cobot_control::mapper::CommandMapper;
//! use cobot_types::{Command, Emotion, SymbolicState};
//!
//! let mut mapper = CommandMapper::default();
//! let angry = SymbolicState::Emotion(Emotion::Angry);
//! assert_eq!(mapper.map_to_command(&angry, None), Some(Command::Angry));
//! assert_eq!(mapper.map_to_command(&angry, None), None);
//! ```

use cobot_perception::Subject;
use cobot_types::{Command, Distance, Emotion, Gesture, Position, SymbolicState};
use tracing::trace;

/// How a mapped command is meant to be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Resent every heartbeat tick.
    Heartbeat,
    /// Sent once, on change.
    EdgeTriggered,
}

impl CommandKind {
    pub fn of(state: &SymbolicState) -> Self {
        match state {
            SymbolicState::Position(_) => CommandKind::Heartbeat,
            SymbolicState::Emotion(_) => CommandKind::EdgeTriggered,
        }
    }
}

/// Safety gate in front of movement commands.
///
/// A direction is only driven when a person is framed well enough to follow
/// and is further away than `stop_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FollowGate {
    pub stop_at: Distance,
}

impl Default for FollowGate {
    fn default() -> Self {
        Self {
            stop_at: Distance::VeryClose,
        }
    }
}

impl FollowGate {
    pub fn admits(&self, subject: Option<&Subject>) -> bool {
        match subject {
            Some(s) => !s.too_small && s.distance != self.stop_at,
            None => false,
        }
    }
}

/// Movement token for a position, before gating.
pub fn movement_command(position: Position) -> Command {
    match position {
        Position::Right => Command::ForwardRight,
        Position::Left => Command::ForwardLeft,
        Position::Center => Command::Forward,
        Position::NotVisible => Command::Stop,
    }
}

/// Reaction token for an emotion.  Neutral and sleeping have none.
pub fn emotion_command(emotion: Emotion) -> Option<Command> {
    match emotion {
        Emotion::Happy => Some(Command::Happy),
        Emotion::Angry => Some(Command::Angry),
        Emotion::Sad => Some(Command::Sad),
        Emotion::Surprised => Some(Command::Surprised),
        Emotion::Neutral | Emotion::Sleeping => None,
    }
}

/// Reaction token for a hand gesture.
pub fn gesture_command(gesture: Gesture) -> Option<Command> {
    match gesture {
        Gesture::OpenPalm => Some(Command::Greet),
        _ => None,
    }
}

/// Stateful mapper; remembers the last emotion command it produced and the
/// last gesture it saw.
#[derive(Debug, Clone, Default)]
pub struct CommandMapper {
    gate: FollowGate,
    last_emotion_sent: Option<Emotion>,
    last_gesture: Option<Gesture>,
}

impl CommandMapper {
    pub fn new(gate: FollowGate) -> Self {
        Self {
            gate,
            last_emotion_sent: None,
            last_gesture: None,
        }
    }

    pub fn last_emotion_sent(&self) -> Option<Emotion> {
        self.last_emotion_sent
    }

    /// Map one symbolic state.
    ///
    /// Positional states always yield a command (`Stop` when the gate is
    /// closed).  Emotional states yield a command only on change.
    pub fn map_to_command(
        &mut self,
        state: &SymbolicState,
        subject: Option<&Subject>,
    ) -> Option<Command> {
        match *state {
            SymbolicState::Position(position) => {
                let command = if self.gate.admits(subject) {
                    movement_command(position)
                } else {
                    Command::Stop
                };
                Some(command)
            }
            SymbolicState::Emotion(emotion) => {
                let Some(command) = emotion_command(emotion) else {
                    self.last_emotion_sent = None;
                    return None;
                };
                if self.last_emotion_sent == Some(emotion) {
                    trace!(%emotion, "emotion unchanged, command suppressed");
                    return None;
                }
                self.last_emotion_sent = Some(emotion);
                Some(command)
            }
        }
    }

    /// Map the gesture of one frame.  A command is produced only when the
    /// gesture differs from the previous frame's; frames without a gesture
    /// re-arm the trigger.
    pub fn map_gesture(&mut self, gesture: Option<Gesture>) -> Option<Command> {
        let previous = std::mem::replace(&mut self.last_gesture, gesture);
        match gesture {
            Some(g) if previous != Some(g) => gesture_command(g),
            _ => None,
        }
    }

    /// Forget the last emotion sent and gesture seen, e.g. after a reconnect.
    pub fn reset(&mut self) {
        self.last_emotion_sent = None;
        self.last_gesture = None;
    }
}
