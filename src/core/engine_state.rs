//! Published engine state
//!
//! Every field is its own atomic cell. Readers (UI, renderer) poll single
//! fields; there is no cross-field snapshot guarantee. `snapshot()` is a
//! convenience that reads each field independently.
//!
//! **Used by**: workers (buffer stats, bit rate), engine (state, position,
//! buffering, end of media), hosts (polling).

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Media playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PlaybackState {
    Closed = 0,
    Opening = 1,
    Playing = 2,
    Paused = 3,
    Stopped = 4,
}

impl PlaybackState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => PlaybackState::Opening,
            2 => PlaybackState::Playing,
            3 => PlaybackState::Paused,
            4 => PlaybackState::Stopped,
            _ => PlaybackState::Closed,
        }
    }

    /// A container is open (or being opened)
    pub fn is_open(self) -> bool {
        !matches!(self, PlaybackState::Closed | PlaybackState::Opening)
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PlaybackState::Closed => "closed",
            PlaybackState::Opening => "opening",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
            PlaybackState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Point-in-time copy of the published fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub playback_state: PlaybackState,
    pub position: Duration,
    pub is_buffering: bool,
    pub has_media_ended: bool,
    pub decoding_bit_rate: u64,
    pub packet_buffer_length: u64,
    pub packet_buffer_count: usize,
    pub source: Option<String>,
}

#[derive(Debug)]
pub struct EngineState {
    playback_state: AtomicU8,
    position_nanos: AtomicU64,
    is_buffering: AtomicBool,
    has_media_ended: AtomicBool,
    decoding_bit_rate: AtomicU64,
    packet_buffer_length: AtomicU64,
    packet_buffer_count: AtomicUsize,
    source: Mutex<Option<String>>,
}

impl Default for EngineState {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineState {
    pub fn new() -> Self {
        Self {
            playback_state: AtomicU8::new(PlaybackState::Closed as u8),
            position_nanos: AtomicU64::new(0),
            is_buffering: AtomicBool::new(false),
            has_media_ended: AtomicBool::new(false),
            decoding_bit_rate: AtomicU64::new(0),
            packet_buffer_length: AtomicU64::new(0),
            packet_buffer_count: AtomicUsize::new(0),
            source: Mutex::new(None),
        }
    }

    /// Back to a closed, empty state (start of every open)
    pub fn reset_all(&self) {
        self.playback_state.store(PlaybackState::Closed as u8, Ordering::Release);
        self.position_nanos.store(0, Ordering::Release);
        self.is_buffering.store(false, Ordering::Release);
        self.has_media_ended.store(false, Ordering::Release);
        self.decoding_bit_rate.store(0, Ordering::Relaxed);
        self.packet_buffer_length.store(0, Ordering::Relaxed);
        self.packet_buffer_count.store(0, Ordering::Relaxed);
        *self.source.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn playback_state(&self) -> PlaybackState {
        PlaybackState::from_u8(self.playback_state.load(Ordering::Acquire))
    }

    /// Publish `state`, returning the previous one
    pub fn set_playback_state(&self, state: PlaybackState) -> PlaybackState {
        PlaybackState::from_u8(self.playback_state.swap(state as u8, Ordering::AcqRel))
    }

    pub fn position(&self) -> Duration {
        Duration::from_nanos(self.position_nanos.load(Ordering::Acquire))
    }

    pub fn set_position(&self, position: Duration) {
        let nanos = u64::try_from(position.as_nanos()).unwrap_or(u64::MAX);
        self.position_nanos.store(nanos, Ordering::Release);
    }

    pub fn is_buffering(&self) -> bool {
        self.is_buffering.load(Ordering::Acquire)
    }

    pub fn set_buffering(&self, buffering: bool) {
        self.is_buffering.store(buffering, Ordering::Release);
    }

    pub fn has_media_ended(&self) -> bool {
        self.has_media_ended.load(Ordering::Acquire)
    }

    /// Returns the previous value
    pub fn set_media_ended(&self, ended: bool) -> bool {
        self.has_media_ended.swap(ended, Ordering::AcqRel)
    }

    pub fn decoding_bit_rate(&self) -> u64 {
        self.decoding_bit_rate.load(Ordering::Relaxed)
    }

    pub fn set_decoding_bit_rate(&self, bits_per_second: u64) {
        self.decoding_bit_rate.store(bits_per_second, Ordering::Relaxed);
    }

    /// Queued packet bytes across all streams
    pub fn packet_buffer_length(&self) -> u64 {
        self.packet_buffer_length.load(Ordering::Relaxed)
    }

    pub fn packet_buffer_count(&self) -> usize {
        self.packet_buffer_count.load(Ordering::Relaxed)
    }

    pub fn set_packet_buffer_stats(&self, length: u64, count: usize) {
        self.packet_buffer_length.store(length, Ordering::Relaxed);
        self.packet_buffer_count.store(count, Ordering::Relaxed);
    }

    pub fn source(&self) -> Option<String> {
        self.source.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_source(&self, source: Option<String>) {
        *self.source.lock().unwrap_or_else(|e| e.into_inner()) = source;
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            playback_state: self.playback_state(),
            position: self.position(),
            is_buffering: self.is_buffering(),
            has_media_ended: self.has_media_ended(),
            decoding_bit_rate: self.decoding_bit_rate(),
            packet_buffer_length: self.packet_buffer_length(),
            packet_buffer_count: self.packet_buffer_count(),
            source: self.source(),
        }
    }
}
