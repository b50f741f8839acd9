//! Playback events and their wire format.
//!
//! An [`Event`] is the single unit of traffic in this program: constructed
//! once per session tick on the simulator side, serialized as a JSON text
//! frame, and relayed unmodified into the broker by the ingestion bridge.
//! Field names below are the wire contract and must not drift.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// The kind of playback action a viewer took.
pub enum EventKind {
    /// Playback started or resumed.
    Play,
    /// Playback paused.
    Pause,
    /// The viewer jumped to another position.
    Seek,
    /// Playback stalled waiting on data.
    Buffering,
    /// The viewer gave up on this session. Terminal.
    Stop,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Play => "play",
            EventKind::Pause => "pause",
            EventKind::Seek => "seek",
            EventKind::Buffering => "buffering",
            EventKind::Stop => "stop",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// One playback event, attributable to exactly one session.
///
/// Never mutated after construction. Serializes to the JSON object accepted
/// by the ingestion endpoint.
pub struct Event {
    /// Identity of the emitting viewer, `User-{workerId}`.
    pub user_id: String,
    /// Catalog id of the item being watched.
    pub video_id: String,
    /// Title of the item being watched.
    pub video_title: String,
    /// What the viewer did.
    #[serde(rename = "event")]
    pub kind: EventKind,
    /// Playback position in seconds at the time of the event.
    pub time_seconds: u32,
}
