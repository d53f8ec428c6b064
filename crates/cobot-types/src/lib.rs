//! `cobot-types` – shared vocabulary for the perception → decision → command
//! loop.
//!
//! Every other crate in the workspace speaks in these types: the geometric
//! output of an inference call ([`Observation`]), the discrete state the
//! decision engine settles on ([`SymbolicState`]), the closed wire-command
//! table understood by the robot firmware ([`Command`]), the BLE link
//! lifecycle ([`ConnectionState`]), and the events routed over the internal
//! bus ([`Event`]).

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Fixed anatomical indices of the upstream pose model's 33-point schema.
pub mod pose {
    pub const NOSE: usize = 0;
    pub const LEFT_SHOULDER: usize = 11;
    pub const RIGHT_SHOULDER: usize = 12;
    pub const LEFT_HIP: usize = 23;
    pub const RIGHT_HIP: usize = 24;

    /// Landmarks used to frame a person's torso.
    pub const TORSO: [usize; 5] = [NOSE, LEFT_SHOULDER, RIGHT_SHOULDER, LEFT_HIP, RIGHT_HIP];
}

// ────────────────────────────────────────────────────────────────────────────
// Geometry
// ────────────────────────────────────────────────────────────────────────────

/// A normalized keypoint: `x` and `y` are fractions of the frame size, `z` is
/// relative depth.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Ordered landmarks, addressed by the indices in [`pose`].
///
/// An empty set means "nothing detected"; a set is never partially indexed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LandmarkSet {
    points: Vec<Landmark>,
}

impl LandmarkSet {
    pub fn new(points: Vec<Landmark>) -> Self {
        Self { points }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Landmark at anatomical `index`, if the model produced one.
    pub fn get(&self, index: usize) -> Option<&Landmark> {
        self.points.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Landmark> {
        self.points.iter()
    }
}

/// A normalized rectangle.  The constructor enforces `left ≤ right` and
/// `top ≤ bottom`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl BoundingBox {
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            left: left.min(right),
            top: top.min(bottom),
            right: left.max(right),
            bottom: top.max(bottom),
        }
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    pub fn center_x(&self) -> f32 {
        (self.left + self.right) / 2.0
    }

    /// Zero-area boxes carry no usable detection.
    pub fn is_degenerate(&self) -> bool {
        !(self.width() > 0.0 && self.height() > 0.0)
    }
}

/// One object-detector hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Class label, e.g. `"person"`.
    pub label: String,
    pub confidence: f32,
    pub bounding_box: BoundingBox,
}

/// Named facial-action scores produced by a face model.
///
/// Not every identifier is guaranteed to be present; [`score`][Self::score]
/// returns `0.0` for missing keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlendshapeScores {
    scores: HashMap<String, f32>,
}

impl BlendshapeScores {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, score: f32) {
        self.scores.insert(name.into(), score);
    }

    /// Score for `name`, clamped into `[0, 1]`.  Missing or NaN scores read as 0.
    pub fn score(&self, name: &str) -> f32 {
        match self.scores.get(name) {
            Some(s) if s.is_finite() => s.clamp(0.0, 1.0),
            _ => 0.0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, f32)> for BlendshapeScores {
    fn from_iter<I: IntoIterator<Item = (S, f32)>>(iter: I) -> Self {
        Self {
            scores: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// The single structured result of one inference call.
///
/// Adapters return exactly one variant; there is no partially populated
/// result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Observation {
    /// Pose landmarks for the most prominent person.
    Pose(LandmarkSet),
    /// Object-detector output for the frame.
    Objects(Vec<Detection>),
    /// Face blendshape scores for the most prominent face, plus the hand
    /// gesture recognised in the same frame, if any.
    Face {
        scores: BlendshapeScores,
        gesture: Option<Gesture>,
    },
    /// A hand gesture with no face in view.
    Hand(Gesture),
    /// The model ran but found nothing.
    Nothing,
}

impl Observation {
    /// Face observation without a gesture.
    pub fn face(scores: BlendshapeScores) -> Self {
        Observation::Face {
            scores,
            gesture: None,
        }
    }

    /// Gesture carried by this observation.
    pub fn gesture(&self) -> Option<Gesture> {
        match self {
            Observation::Face { gesture, .. } => *gesture,
            Observation::Hand(gesture) => Some(*gesture),
            Observation::Pose(_) | Observation::Objects(_) | Observation::Nothing => None,
        }
    }
}

/// Hand gesture categories of the gesture recognizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gesture {
    OpenPalm,
    ClosedFist,
    PointingUp,
    ThumbUp,
    ThumbDown,
    Victory,
    ILoveYou,
}

impl Gesture {
    const CATEGORIES: [(Gesture, &'static str); 7] = [
        (Gesture::OpenPalm, "Open_Palm"),
        (Gesture::ClosedFist, "Closed_Fist"),
        (Gesture::PointingUp, "Pointing_Up"),
        (Gesture::ThumbUp, "Thumb_Up"),
        (Gesture::ThumbDown, "Thumb_Down"),
        (Gesture::Victory, "Victory"),
        (Gesture::ILoveYou, "ILoveYou"),
    ];

    /// Parse a recognizer category name, ignoring case.  `"None"` and
    /// unknown names yield `None`.
    pub fn parse(category: &str) -> Option<Self> {
        let wanted = category.trim();
        Self::CATEGORIES
            .iter()
            .find(|(_, name)| name.eq_ignore_ascii_case(wanted))
            .map(|(gesture, _)| *gesture)
    }

    pub fn category(&self) -> &'static str {
        Self::CATEGORIES
            .iter()
            .find(|(gesture, _)| gesture == self)
            .map(|(_, name)| *name)
            .unwrap_or("None")
    }
}

impl fmt::Display for Gesture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.category())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Symbolic state
// ────────────────────────────────────────────────────────────────────────────

/// Where the tracked person stands relative to the robot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Position {
    Left,
    Right,
    Center,
    NotVisible,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Left => write!(f, "LEFT"),
            Position::Right => write!(f, "RIGHT"),
            Position::Center => write!(f, "CENTER"),
            Position::NotVisible => write!(f, "NOT_VISIBLE"),
        }
    }
}

/// Expressed emotion of the person facing the robot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Emotion {
    Neutral,
    Happy,
    Sad,
    Angry,
    Surprised,
    Sleeping,
}

impl Emotion {
    /// `true` for the emotions that trigger a dwell lock and a robot reaction.
    pub fn is_expressive(&self) -> bool {
        matches!(
            self,
            Emotion::Happy | Emotion::Sad | Emotion::Angry | Emotion::Surprised
        )
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Emotion::Neutral => write!(f, "NEUTRAL"),
            Emotion::Happy => write!(f, "HAPPY"),
            Emotion::Sad => write!(f, "SAD"),
            Emotion::Angry => write!(f, "ANGRY"),
            Emotion::Surprised => write!(f, "SURPRISED"),
            Emotion::Sleeping => write!(f, "SLEEPING"),
        }
    }
}

/// The stabilized output of one decision cycle.  Exactly one category is
/// active per cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SymbolicState {
    Position(Position),
    Emotion(Emotion),
}

impl fmt::Display for SymbolicState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymbolicState::Position(p) => write!(f, "position={p}"),
            SymbolicState::Emotion(e) => write!(f, "emotion={e}"),
        }
    }
}

/// Coarse distance bucket derived from a person's bounding-box height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Distance {
    VeryClose,
    Close,
    Medium,
    Far,
    VeryFar,
}

// ────────────────────────────────────────────────────────────────────────────
// Wire commands
// ────────────────────────────────────────────────────────────────────────────

/// Line terminator expected by the firmware's line-oriented parser.
pub const LINE_TERMINATOR: &str = "\r\n";

/// Highest accepted speed percentage.
pub const MAX_SPEED: u8 = 100;

/// Closed table of commands understood by the robot firmware.
///
/// Fixed commands are ASCII opcodes (two letters, except the one-letter
/// [`Command::Greet`]) followed by [`LINE_TERMINATOR`].
/// [`Command::Speed`] is the `"V\r\n"` header followed by one byte whose
/// ordinal value is the percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    Forward,
    ForwardRight,
    ForwardLeft,
    Backward,
    BackwardRight,
    BackwardLeft,
    Right,
    Left,
    Stop,
    ObstacleAvoidanceOn,
    ObstacleAvoidanceOff,
    Pump,
    Arm,
    LedOff,
    LedBlue,
    LedRed,
    LedGreen,
    LedBlack,
    AutoOn,
    AutoOff,
    Happy,
    Angry,
    Sad,
    Surprised,
    /// Wave back at an open palm.
    Greet,
    Speed(u8),
}

impl Command {
    const TABLE: [(Command, &'static str); 25] = [
        (Command::Forward, "FF"),
        (Command::ForwardRight, "FR"),
        (Command::ForwardLeft, "FL"),
        (Command::Backward, "BB"),
        (Command::BackwardRight, "BR"),
        (Command::BackwardLeft, "BL"),
        (Command::Right, "RR"),
        (Command::Left, "LL"),
        (Command::Stop, "SS"),
        (Command::ObstacleAvoidanceOn, "NO"),
        (Command::ObstacleAvoidanceOff, "YE"),
        (Command::Pump, "CZ"),
        (Command::Arm, "AR"),
        (Command::LedOff, "CO"),
        (Command::LedBlue, "CB"),
        (Command::LedRed, "CR"),
        (Command::LedGreen, "CG"),
        (Command::LedBlack, "CA"),
        (Command::AutoOn, "AO"),
        (Command::AutoOff, "AF"),
        (Command::Happy, "HA"),
        (Command::Angry, "AN"),
        (Command::Sad, "SD"),
        (Command::Surprised, "SP"),
        (Command::Greet, "H"),
    ];

    /// Speed command for `percent`, clamped into `[0, 100]`.
    pub fn speed(percent: i32) -> Self {
        Command::Speed(percent.clamp(0, MAX_SPEED as i32) as u8)
    }

    /// Opcode letters without the terminator (`"V"` for speed).
    pub fn opcode(&self) -> &'static str {
        if let Command::Speed(_) = self {
            return "V";
        }
        Self::TABLE
            .iter()
            .find(|(cmd, _)| cmd == self)
            .map(|(_, op)| *op)
            .unwrap_or("SS")
    }

    /// Look up a fixed command by its opcode (case-insensitive).
    pub fn from_opcode(opcode: &str) -> Option<Self> {
        let wanted = opcode.trim().to_ascii_uppercase();
        Self::TABLE
            .iter()
            .find(|(_, op)| *op == wanted)
            .map(|(cmd, _)| *cmd)
    }

    /// Bytes written to the characteristic.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4);
        bytes.extend_from_slice(self.opcode().as_bytes());
        bytes.extend_from_slice(LINE_TERMINATOR.as_bytes());
        if let Command::Speed(percent) = self {
            bytes.push((*percent).min(MAX_SPEED));
        }
        bytes
    }

    pub fn is_stop(&self) -> bool {
        matches!(self, Command::Stop)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Speed(p) => write!(f, "V{p}"),
            other => write!(f, "{}", other.opcode()),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Link state
// ────────────────────────────────────────────────────────────────────────────

/// Lifecycle of the BLE link to the robot.  Only the link manager writes it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Error(String),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "idle"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Error(reason) => write!(f, "error: {reason}"),
        }
    }
}

/// Operating mode announced by the robot over the notification channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteMode {
    /// Autonomous person following (`-AON`).
    Follow,
    /// Emotion mirroring (`-AFF`).
    Emotion,
}

impl RemoteMode {
    /// Scan inbound text for a mode marker.
    ///
    /// `-AON` / `AON` select [`RemoteMode::Follow`]; `-AFF` / `AOF` select
    /// [`RemoteMode::Emotion`].
    pub fn detect(text: &str) -> Option<Self> {
        let upper = text.trim().to_ascii_uppercase();
        if upper.contains("AON") {
            Some(RemoteMode::Follow)
        } else if upper.contains("AFF") || upper.contains("AOF") {
            Some(RemoteMode::Emotion)
        } else {
            None
        }
    }
}

impl fmt::Display for RemoteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteMode::Follow => write!(f, "follow"),
            RemoteMode::Emotion => write!(f, "emotion"),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Bus events
// ────────────────────────────────────────────────────────────────────────────

/// Unified event wrapper for the internal event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. `"cobot-link::manager"`
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data routed over the internal event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// The decision engine settled on a new symbolic state.
    StateChanged(SymbolicState),
    /// A command was written to the robot.
    CommandSent(String),
    /// A command could not be written; the link stays up.
    CommandFailed { command: String, reason: String },
    /// The link manager moved to a new connection state.
    LinkState(ConnectionState),
    /// Verbatim text of one inbound notification.
    Received(String),
    /// The robot announced a mode change.
    ModeChanged(RemoteMode),
    /// A perception cycle failed and was skipped.
    PerceptionFault(String),
    /// Operator-initiated safety event, e.g. an emergency stop.
    Alert(String),
}

/// Workspace-wide error type.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CobotError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Service discovery failed: {0}")]
    Discovery(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
