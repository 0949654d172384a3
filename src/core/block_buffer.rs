//! Pooled playback buffer of renderable blocks for one media type
//!
//! **Why**: Decoding allocates nothing per frame once a buffer is warm. All
//! blocks are created up front and move between two sides:
//! - `pool`: empty blocks ready to be filled (FIFO)
//! - `playback`: filled blocks sorted by start time, consumed by the renderer
//!
//! `|pool| + |playback| == capacity` holds after every operation. When the
//! pool runs dry, the earliest playback block is recycled (strict FIFO
//! eviction) so `add` always makes progress.
//!
//! **Used by**: Frame decoding worker (producer), renderer (indexed reads,
//! `use_first`), engine (clear on seek, recycle on clock updates, dispose on close).
//!
//! # Locking
//!
//! One coarse mutex guards both sides, reads included. Capacities are small
//! (tens of blocks) so the O(n) re-sort and relink after each insert is cheap.

use log::{debug, trace};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::entities::{Block, BlockConverter, BlockInfo, MediaType, Neighbors, RawFrame};

/// Block buffer construction errors
#[derive(Debug, Clone, PartialEq)]
pub enum BufferError {
    UnsupportedMediaType(MediaType),
}

impl std::fmt::Display for BufferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BufferError::UnsupportedMediaType(t) => {
                write!(f, "No block representation for media type '{}'", t)
            }
        }
    }
}

impl std::error::Error for BufferError {}

#[derive(Debug)]
struct BufferState {
    pool: VecDeque<Block>,
    playback: Vec<Block>,
    disposed: bool,
}

impl BufferState {
    /// Re-sort playback by start time and recompute index/neighbors
    fn relink(&mut self) {
        self.playback.sort_by_key(|b| b.start_time());
        let last = self.playback.len().saturating_sub(1);
        for (i, block) in self.playback.iter_mut().enumerate() {
            let neighbors = Neighbors {
                previous: i.checked_sub(1),
                next: (i < last).then_some(i + 1),
            };
            block.set_placement(i, neighbors);
        }
    }
}

/// Thread-safe pool + playback block buffer
#[derive(Debug)]
pub struct BlockBuffer {
    media_type: MediaType,
    capacity: usize,
    state: Mutex<BufferState>,
}

impl BlockBuffer {
    /// Allocate `capacity` empty blocks of `media_type` (min 1)
    pub fn new(capacity: usize, media_type: MediaType) -> Result<Self, BufferError> {
        let capacity = capacity.max(1);
        let mut pool = VecDeque::with_capacity(capacity);
        for id in 0..capacity {
            let block =
                Block::new(id, media_type).ok_or(BufferError::UnsupportedMediaType(media_type))?;
            pool.push_back(block);
        }

        debug!("BlockBuffer created: type={}, capacity={}", media_type, capacity);

        Ok(Self {
            media_type,
            capacity,
            state: Mutex::new(BufferState {
                pool,
                playback: Vec::with_capacity(capacity),
                disposed: false,
            }),
        })
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Materialize `frame` into a pooled block and insert it into playback.
    ///
    /// Recycles the earliest playback block if the pool is empty. Returns
    /// None if conversion fails (the block goes back to the pool) or the
    /// buffer is disposed. The frame is consumed in every case.
    pub fn add(&self, frame: RawFrame, converter: &dyn BlockConverter) -> Option<BlockInfo> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.disposed {
            frame.release();
            return None;
        }

        if state.pool.is_empty() && !state.playback.is_empty() {
            let evicted = state.playback.remove(0);
            trace!(
                "{} buffer full, recycling block {} at {:?}",
                self.media_type,
                evicted.id(),
                evicted.start_time()
            );
            state.pool.push_back(evicted);
        }

        let Some(mut block) = state.pool.pop_front() else {
            frame.release();
            return None;
        };

        match converter.convert(frame, &mut block) {
            Ok(()) => {
                let id = block.id();
                state.playback.push(block);
                state.relink();
                state.playback.iter().find(|b| b.id() == id).map(Block::info)
            }
            Err(e) => {
                debug!("{} conversion failed: {}", self.media_type, e);
                state.pool.push_back(block);
                // Eviction above may have shifted positions
                state.relink();
                None
            }
        }
    }

    /// Return every playback block to the pool, keeping identities
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let BufferState { pool, playback, .. } = &mut *state;
        pool.extend(playback.drain(..));
    }

    /// Return playback blocks that ended at or before `position` to the pool.
    ///
    /// The block covering `position` (and anything after it) stays. Returns
    /// how many blocks were recycled.
    pub fn recycle_before(&self, position: Duration) -> usize {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let stale = state
            .playback
            .iter()
            .take_while(|b| b.end_time() <= position && !b.contains(position))
            .count();
        if stale == 0 {
            return 0;
        }
        let recycled: Vec<Block> = state.playback.drain(..stale).collect();
        state.pool.extend(recycled);
        state.relink();
        stale
    }

    /// Release every block; the buffer accepts nothing afterwards
    pub fn dispose(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.disposed {
            return;
        }
        state.disposed = true;
        state.pool.clear();
        state.playback.clear();
        debug!("BlockBuffer disposed: type={}", self.media_type);
    }

    pub fn is_disposed(&self) -> bool {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).disposed
    }

    /// Number of playback blocks
    pub fn len(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).playback.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of free blocks
    pub fn pool_len(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).pool.len()
    }

    /// All blocks are in playback
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Snapshot of the playback block at `index`
    pub fn get(&self, index: usize) -> Option<BlockInfo> {
        self.with_block(index, Block::info)
    }

    /// Run `f` against the playback block at `index` under the buffer lock
    pub fn with_block<R>(&self, index: usize, f: impl FnOnce(&Block) -> R) -> Option<R> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.playback.get(index).map(f)
    }

    /// Run `f` against the earliest playback block under the buffer lock
    pub fn use_first<R>(&self, f: impl FnOnce(&Block) -> R) -> Option<R> {
        self.with_block(0, f)
    }

    /// Snapshot of the whole playback sequence
    pub fn snapshot(&self) -> Vec<BlockInfo> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.playback.iter().map(Block::info).collect()
    }

    /// Start of the earliest playback block
    pub fn range_start_time(&self) -> Option<Duration> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.playback.first().map(Block::start_time)
    }

    /// End of the latest playback block
    pub fn range_end_time(&self) -> Option<Duration> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.playback.last().map(Block::end_time)
    }

    /// Start of the latest playback block
    pub fn last_start_time(&self) -> Option<Duration> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.playback.last().map(Block::start_time)
    }

    /// Index of the block covering `position`
    pub fn index_of(&self, position: Duration) -> Option<usize> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.playback.iter().position(|b| b.contains(position))
    }

    pub fn is_in_range(&self, position: Duration) -> bool {
        self.index_of(position).is_some()
    }
}
