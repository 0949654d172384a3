//! Engine notifications published on the [`EventBus`](super::event_bus::EventBus)
//!
//! Emitted from the engine's command thread (with the session lock held),
//! except `WorkerFaultEvent` which comes from a worker thread. Callbacks must
//! not call engine commands; use `poll()` or `subscribe_channel()` for that.

use std::time::Duration;
use uuid::Uuid;

use super::engine_state::PlaybackState;

/// A container opened successfully
#[derive(Clone, Debug)]
pub struct MediaOpenedEvent {
    pub session: Uuid,
    pub source: String,
}

/// Open failed; the engine is back to Closed
#[derive(Clone, Debug)]
pub struct MediaFailedEvent {
    pub source: String,
    pub error: String,
}

#[derive(Clone, Debug)]
pub struct MediaClosedEvent {
    pub session: Uuid,
}

#[derive(Clone, Debug)]
pub struct PlaybackStateChangedEvent {
    pub old: PlaybackState,
    pub new: PlaybackState,
}

/// A worker cycle failed or panicked; the worker keeps running
#[derive(Clone, Debug)]
pub struct WorkerFaultEvent {
    pub worker: &'static str,
    pub message: String,
}

/// Clock reached the end of decoded media
#[derive(Clone, Debug)]
pub struct MediaEndedEvent {
    pub session: Uuid,
    pub position: Duration,
}

#[derive(Clone, Debug)]
pub struct SeekCompletedEvent {
    pub target: Duration,
    pub position: Duration,
}
