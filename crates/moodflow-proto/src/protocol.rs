use serde::{Deserialize, Serialize};

use crate::mood::Mood;

/// Commands into the player core, from the HTTP API or any other
/// front-end.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    SelectMood { mood: String },
    TogglePause,
    Stop,
    SetCredential { token: String },
    GetState,
}

/// Messages on the status/UI broadcast channel.  Front-ends render
/// these; the core never renders anything itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum StatusMessage {
    /// The player snapshot changed; re-read it.
    StateUpdated,
    /// Transient human-readable progress line.
    Status { message: String },
    /// An error worth surfacing.  `needs_credential` tells the
    /// front-end to open its credential-capture flow.
    Error {
        message: String,
        guidance: String,
        needs_credential: bool,
    },
    /// Forwarded log line (WARN and above).
    Log { message: String },
}

/// Mutually exclusive top-level player states.  A background prefetch
/// may be in flight during `Playing`/`Paused`; that sub-state is the
/// separate `fetching_next` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Phase {
    /// No mood selected.
    #[default]
    Idle,
    /// A generation or track load is in flight for the session.
    Loading,
    Playing,
    Paused,
}

/// The serializable session record served by `GET /api/state`.
/// `rev` is a monotonically increasing counter bumped on every change,
/// so clients can detect missed updates.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlayerSnapshot {
    #[serde(default)]
    pub rev: u64,
    pub mood: Option<Mood>,
    pub mood_label: Option<String>,
    pub phase: Phase,
    pub is_playing: bool,
    /// True when the single-slot queue holds the next track.
    pub pending_ready: bool,
    /// True while a next-track generation is in flight.
    pub fetching_next: bool,
    pub position_secs: Option<f64>,
    pub duration_secs: Option<f64>,
    pub credential_set: bool,
}
