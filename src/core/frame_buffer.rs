//! Bounded staging queue of raw decoded frames
//!
//! Decouples decode rate from materialization rate with bounded memory.
//! Backpressure policy: when full, the *incoming* frame is released and
//! dropped. The producer never blocks.
//!
//! `read_all()` drains the queue under the lock, so a concurrent `add` lands
//! either in the drained batch or in the queue left behind, never both.

use log::{debug, trace};
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::entities::{FrameInfo, MediaType, RawFrame};

#[derive(Debug)]
struct StagingState {
    frames: VecDeque<RawFrame>,
    dropped: u64,
    disposed: bool,
}

/// Thread-safe FIFO of raw frames for one media type
#[derive(Debug)]
pub struct FrameBuffer {
    media_type: MediaType,
    capacity: usize,
    state: Mutex<StagingState>,
}

impl FrameBuffer {
    pub fn new(capacity: usize, media_type: MediaType) -> Self {
        let capacity = capacity.max(1);
        debug!("FrameBuffer created: type={}, capacity={}", media_type, capacity);
        Self {
            media_type,
            capacity,
            state: Mutex::new(StagingState {
                frames: VecDeque::with_capacity(capacity),
                dropped: 0,
                disposed: false,
            }),
        }
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Enqueue `frame`, or release it if the buffer is full or disposed
    pub fn add(&self, frame: RawFrame) -> Option<FrameInfo> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.disposed || state.frames.len() >= self.capacity {
            state.dropped += 1;
            trace!(
                "{} staging full ({}), dropping frame at {:?}",
                self.media_type,
                state.frames.len(),
                frame.start_time()
            );
            frame.release();
            return None;
        }
        let info = frame.info();
        state.frames.push_back(frame);
        Some(info)
    }

    /// Drain every staged frame in FIFO order
    pub fn read_all(&self) -> Vec<RawFrame> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.frames.drain(..).collect()
    }

    /// Release every staged frame; later adds are dropped
    pub fn dispose(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.disposed {
            return;
        }
        state.disposed = true;
        for frame in state.frames.drain(..) {
            frame.release();
        }
    }

    /// Release staged frames but keep accepting new ones
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        for frame in state.frames.drain(..) {
            frame.release();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).disposed
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Frames dropped by backpressure since creation
    pub fn dropped(&self) -> u64 {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).dropped
    }
}
