//! Media engine: the command surface over one open container.
//!
//! Owns the container, the reader/decoder [`WorkerSet`] and the per-type
//! buffers of the current session, and publishes [`EngineState`].
//!
//! Commands: `open`, `close`, `play`, `pause`, `stop`, `seek`.
//! Renderer hooks: `update_clock` (drives position, sync-buffering, end of
//! media and block recycling), `blocks`, `read_frames`.
//!
//! Commands serialize on the session lock. Workers never take it: they only
//! see the container, their sinks and the shared atomics.

use anyhow::{Context, Result, bail};
use indexmap::IndexMap;
use log::{debug, error, info, trace, warn};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

use super::block_buffer::BlockBuffer;
use super::engine_state::{EngineState, PlaybackState};
use super::event_bus::EventBus;
use super::events::{
    MediaClosedEvent, MediaEndedEvent, MediaFailedEvent, MediaOpenedEvent,
    PlaybackStateChangedEvent, SeekCompletedEvent,
};
use super::frame_buffer::FrameBuffer;
use super::frame_decoder::{DecodeSink, FrameDecoder};
use super::packet_reader::PacketReader;
use super::scheduler::SchedulerContext;
use super::workers::WorkerSet;
use crate::config::{EngineConfig, OutputMode};
use crate::entities::{ContainerFactory, MediaContainer, MediaType, RawFrame, ResolvedSource};

/// Per-type buffers of one session
#[derive(Debug, Default)]
struct MediaBuffers {
    blocks: IndexMap<MediaType, Arc<BlockBuffer>>,
    frames: IndexMap<MediaType, Arc<FrameBuffer>>,
}

impl MediaBuffers {
    /// Buffers for every active stream, plus the decoder sinks feeding them
    fn build(container: &dyn MediaContainer, config: &EngineConfig) -> Result<(Self, Vec<DecodeSink>)> {
        let mut buffers = Self::default();
        let mut sinks = Vec::new();
        let active = container.media_types();
        for media_type in MediaType::ALL.into_iter().filter(|t| active.contains(t)) {
            match config.output_mode {
                OutputMode::Blocks if media_type.has_blocks() => {
                    let buffer = Arc::new(BlockBuffer::new(config.block_capacity(media_type), media_type)?);
                    sinks.push(DecodeSink::Blocks(Arc::clone(&buffer)));
                    buffers.blocks.insert(media_type, buffer);
                }
                OutputMode::Blocks => {
                    debug!("No block buffer for {} stream", media_type);
                }
                OutputMode::Frames => {
                    let buffer = Arc::new(FrameBuffer::new(config.frame_buffer_capacity, media_type));
                    sinks.push(DecodeSink::Frames(Arc::clone(&buffer)));
                    buffers.frames.insert(media_type, buffer);
                }
            }
        }
        Ok((buffers, sinks))
    }

    /// Route a frame to its type's buffer, releasing it if there is none
    fn push(&self, frame: RawFrame, container: &dyn MediaContainer) {
        let media_type = frame.media_type();
        if let Some(buffer) = self.blocks.get(&media_type) {
            buffer.add(frame, container.converter());
        } else if let Some(buffer) = self.frames.get(&media_type) {
            buffer.add(frame);
        } else {
            frame.release();
        }
    }

    fn clear_all(&self) {
        self.blocks.values().for_each(|b| b.clear());
        self.frames.values().for_each(|f| f.clear());
    }

    fn dispose_all(&self) {
        self.blocks.values().for_each(|b| b.dispose());
        self.frames.values().for_each(|f| f.dispose());
    }
}

/// One open container and everything built around it
struct Session {
    id: Uuid,
    source: String,
    container: Arc<dyn MediaContainer>,
    workers: WorkerSet,
    buffers: MediaBuffers,
}

pub struct MediaEngine {
    config: EngineConfig,
    factory: Arc<dyn ContainerFactory>,
    scheduler: SchedulerContext,
    state: Arc<EngineState>,
    events: EventBus,
    session: Mutex<Option<Session>>,
    sync_buffering: AtomicBool,
    has_decoding_ended: Arc<AtomicBool>,
    /// Latest main-block end seen by `update_clock` (nanos); survives recycling
    last_block_end: AtomicU64,
}

impl MediaEngine {
    pub fn new(config: EngineConfig, factory: Arc<dyn ContainerFactory>) -> Self {
        let config = config.validated();
        let scheduler = SchedulerContext::new("mediacore", config.cycle_period());
        info!(
            "MediaEngine created: output={:?}, period={:?}",
            config.output_mode,
            config.cycle_period()
        );
        Self {
            config,
            factory,
            scheduler,
            state: Arc::new(EngineState::new()),
            events: EventBus::new(),
            session: Mutex::new(None),
            sync_buffering: AtomicBool::new(false),
            has_decoding_ended: Arc::new(AtomicBool::new(false)),
            last_block_end: AtomicU64::new(0),
        }
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish_state(&self, new: PlaybackState) {
        let old = self.state.set_playback_state(new);
        if old != new {
            debug!("Playback state: {} -> {}", old, new);
            self.events.emit(PlaybackStateChangedEvent { old, new });
        }
    }

    // ========== Commands ==========

    /// Open `source`, closing any current media first.
    ///
    /// On failure everything built so far is torn down, the engine is Closed
    /// and a `MediaFailedEvent` is emitted.
    pub fn open(&self, source: &str) -> Result<Uuid> {
        let mut guard = self.lock_session();
        if let Some(session) = guard.take() {
            self.teardown(session);
        }

        self.state.reset_all();
        self.sync_buffering.store(false, Ordering::Release);
        self.has_decoding_ended.store(false, Ordering::Release);
        self.last_block_end.store(0, Ordering::Release);
        self.state.set_source(Some(source.to_string()));
        self.publish_state(PlaybackState::Opening);

        match self.open_session(source) {
            Ok(session) => {
                let id = session.id;
                info!("Opened '{}' (session {})", source, id);
                *guard = Some(session);
                self.publish_state(PlaybackState::Stopped);
                self.events.emit(MediaOpenedEvent {
                    session: id,
                    source: source.to_string(),
                });
                Ok(id)
            }
            Err(e) => {
                error!("Failed to open '{}': {:#}", source, e);
                self.state.set_source(None);
                self.publish_state(PlaybackState::Closed);
                self.events.emit(MediaFailedEvent {
                    source: source.to_string(),
                    error: format!("{:#}", e),
                });
                Err(e)
            }
        }
    }

    fn open_session(&self, source: &str) -> Result<Session> {
        let mut container_config = self.config.container.clone();
        let resolved = ResolvedSource::resolve(source, &mut container_config)
            .with_context(|| format!("invalid media source '{}'", source))?;
        let container = self
            .factory
            .open(&resolved, &container_config)
            .with_context(|| format!("failed to open '{}'", resolved.url))?;

        self.start_session(Arc::clone(&container), source).inspect_err(|_| {
            container.signal_abort_reads(true);
            if let Err(e) = container.close() {
                warn!("Rollback: container close failed: {}", e);
            }
        })
    }

    fn start_session(&self, container: Arc<dyn MediaContainer>, source: &str) -> Result<Session> {
        let (buffers, sinks) = MediaBuffers::build(container.as_ref(), &self.config)?;

        let reader = PacketReader::new(
            Arc::clone(&container),
            Arc::clone(&self.state),
            self.config.network_buffer_max,
        )
        .with_events(self.events.emitter());
        let decoder = FrameDecoder::new(
            Arc::clone(&container),
            sinks,
            Arc::clone(&self.state),
            Arc::clone(&self.has_decoding_ended),
            self.config.network_buffer_max,
        )
        .with_events(self.events.emitter());

        let workers = WorkerSet::new(&self.scheduler, reader, decoder, self.config.pause_timeout())
            .inspect_err(|_| buffers.dispose_all())?;
        workers.start();

        Ok(Session {
            id: Uuid::new_v4(),
            source: source.to_string(),
            container,
            workers,
            buffers,
        })
    }

    /// Close the current media. Idempotent; teardown always runs to the end.
    pub fn close(&self) {
        let session = self.lock_session().take();
        if let Some(session) = session {
            self.teardown(session);
        }
        self.sync_buffering.store(false, Ordering::Release);
        self.state.set_buffering(false);
        self.publish_state(PlaybackState::Closed);
    }

    fn teardown(&self, mut session: Session) {
        let id = session.id;
        debug!("Closing session {} ('{}')", id, session.source);
        let container = Arc::clone(&session.container);

        teardown_stage("abort reads", || container.signal_abort_reads(false));
        teardown_stage("dispose workers", || session.workers.dispose());
        teardown_stage("close container", || {
            if let Err(e) = container.close() {
                warn!("Container close failed: {}", e);
            }
        });
        teardown_stage("dispose buffers", || session.buffers.dispose_all());

        info!("Closed session {}", id);
        self.events.emit(MediaClosedEvent { session: id });
    }

    /// Resume reading/decoding and publish Playing
    pub fn play(&self) -> Result<()> {
        let guard = self.lock_session();
        let session = guard.as_ref().context("play: no media open")?;
        session.workers.resume_all();
        self.publish_state(PlaybackState::Playing);
        Ok(())
    }

    /// Pause workers; position and buffered blocks are kept
    pub fn pause(&self) -> Result<()> {
        let guard = self.lock_session();
        let session = guard.as_ref().context("pause: no media open")?;
        session.workers.pause_all();
        self.publish_state(PlaybackState::Paused);
        Ok(())
    }

    /// Publish Stopped; buffers and workers are left as they are
    pub fn stop(&self) -> Result<()> {
        let guard = self.lock_session();
        if guard.is_none() {
            bail!("stop: no media open");
        }
        self.publish_state(PlaybackState::Stopped);
        Ok(())
    }

    /// Seek the clock to `target`; returns the published position.
    ///
    /// - live or unseekable sources are rejected
    /// - a target already covered by the main block buffer only moves the clock
    /// - otherwise workers pause, queued packets are flushed, the container
    ///   seeks and the main buffer is refilled until it covers `target`, the
    ///   stream ends or `seek_max_reads` packets were read
    /// - an uncovered target is clamped into the buffered range
    /// - workers that miss the pause timeout fail the seek before the
    ///   container is touched
    ///
    /// A completed seek clears the end-of-decoding and media-ended latches.
    pub fn seek(&self, target: Duration) -> Result<Duration> {
        let guard = self.lock_session();
        let session = guard.as_ref().context("seek: no media open")?;
        let container = session.container.as_ref();
        if container.is_live_stream() || !container.is_seekable() {
            bail!("seek: source '{}' is not seekable", session.source);
        }

        let main = container.seekable_media_type();
        let main_buffer = session.buffers.blocks.get(&main);

        if main_buffer.is_some_and(|b| b.is_in_range(target)) {
            trace!("Seek to {:?} inside buffered range", target);
            self.finish_seek(target, target);
            return Ok(target);
        }

        let previous = session.workers.wanted_state();
        if !session.workers.pause_read_decode() {
            // A worker is still mid-cycle: the container and buffers stay untouched
            session.workers.restore(previous);
            bail!("seek to {:?}: workers did not pause within {:?}", target, self.config.pause_timeout());
        }
        container.clear_queued_packets(true);
        self.last_block_end.store(0, Ordering::Release);

        let first = match container.seek(target) {
            Ok(first) => first,
            Err(e) => {
                session.workers.restore(previous);
                return Err(e).with_context(|| format!("seek to {:?} failed", target));
            }
        };
        session.buffers.clear_all();
        if let Some(frame) = first {
            session.buffers.push(frame, container);
        }

        let position = match main_buffer {
            Some(buffer) => self.refill(buffer, container, target),
            // Frames mode: nothing to cover, the host drains from the new position
            None => target,
        };

        self.finish_seek(target, position);
        session.workers.restore(previous);
        Ok(position)
    }

    /// Decode into `buffer` until it covers `target`; returns the position to publish
    fn refill(&self, buffer: &BlockBuffer, container: &dyn MediaContainer, target: Duration) -> Duration {
        let media_type = buffer.media_type();
        let mut reads = 0usize;

        while !buffer.is_in_range(target) {
            if buffer.last_start_time().is_some_and(|last| last > target) {
                break;
            }
            if let Some(frame) = container.receive_next_frame(media_type) {
                buffer.add(frame, container.converter());
                continue;
            }
            if reads >= self.config.seek_max_reads
                || container.is_at_end_of_stream()
                || container.is_read_aborted()
            {
                break;
            }
            match container.read() {
                Ok(_) => reads += 1,
                Err(e) => {
                    debug!("Seek refill stopped after {} reads: {}", reads, e);
                    break;
                }
            }
        }

        if buffer.is_in_range(target) {
            return target;
        }
        match (buffer.range_start_time(), buffer.last_start_time()) {
            (Some(start), Some(last)) => {
                let clamped = target.clamp(start, last);
                debug!("Seek target {:?} not covered, clamped to {:?}", target, clamped);
                clamped
            }
            _ => {
                warn!("Seek to {:?} produced no {} blocks", target, media_type);
                self.state.position()
            }
        }
    }

    fn finish_seek(&self, target: Duration, position: Duration) {
        self.has_decoding_ended.store(false, Ordering::Release);
        self.state.set_media_ended(false);
        self.state.set_position(position);
        self.sync_buffering.store(false, Ordering::Release);
        self.state.set_buffering(false);
        debug!("Seek {:?} -> {:?}", target, position);
        self.events.emit(SeekCompletedEvent { target, position });
    }

    // ========== Renderer hooks ==========

    /// Advance the clock; returns the published position.
    ///
    /// - clock covered by the main block buffer (or before its first block):
    ///   position follows the clock, sync-buffering clears
    /// - not covered and decoding ended: media ended, position stops at the
    ///   end of the last block
    /// - not covered otherwise: sync-buffering latches and position holds
    ///
    /// Blocks that ended before the clock go back to their pools.
    pub fn update_clock(&self, clock: Duration) -> Duration {
        let guard = self.lock_session();
        let Some(session) = guard.as_ref() else {
            return self.state.position();
        };

        let main = session.container.seekable_media_type();
        let Some(buffer) = session.buffers.blocks.get(&main) else {
            self.state.set_position(clock);
            return clock;
        };

        let start = buffer.range_start_time();
        if let Some(end) = buffer.range_end_time() {
            self.last_block_end.fetch_max(duration_nanos(end), Ordering::AcqRel);
        }
        let covered = buffer.is_in_range(clock) || start.is_some_and(|s| clock < s);

        if covered {
            self.leave_sync_buffering();
            self.state.set_position(clock);
        } else if self.has_decoding_ended.load(Ordering::Acquire) {
            self.leave_sync_buffering();
            let end = Duration::from_nanos(self.last_block_end.load(Ordering::Acquire));
            self.state.set_position(clock.min(end).max(self.state.position()));
            if !self.state.set_media_ended(true) {
                info!("Media ended at {:?}", end);
                self.events.emit(MediaEndedEvent {
                    session: session.id,
                    position: end,
                });
            }
        } else if !self.sync_buffering.swap(true, Ordering::AcqRel) {
            debug!("Sync-buffering: no {} block covers {:?}", main, clock);
            self.state.set_buffering(true);
        }

        for buffer in session.buffers.blocks.values() {
            buffer.recycle_before(clock);
        }
        self.state.position()
    }

    fn leave_sync_buffering(&self) {
        if self.sync_buffering.swap(false, Ordering::AcqRel) {
            debug!("Sync-buffering cleared");
            self.state.set_buffering(false);
        }
    }

    /// Block buffer of `media_type` in the current session
    pub fn blocks(&self, media_type: MediaType) -> Option<Arc<BlockBuffer>> {
        self.lock_session()
            .as_ref()
            .and_then(|s| s.buffers.blocks.get(&media_type).cloned())
    }

    /// Staging buffer of `media_type` (Frames mode)
    pub fn frames(&self, media_type: MediaType) -> Option<Arc<FrameBuffer>> {
        self.lock_session()
            .as_ref()
            .and_then(|s| s.buffers.frames.get(&media_type).cloned())
    }

    /// Drain staged frames of `media_type`; empty in Blocks mode
    pub fn read_frames(&self, media_type: MediaType) -> Vec<RawFrame> {
        self.frames(media_type).map(|f| f.read_all()).unwrap_or_default()
    }

    // ========== Queries ==========

    pub fn state(&self) -> &Arc<EngineState> {
        &self.state
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.lock_session().is_some()
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.lock_session().as_ref().map(|s| s.id)
    }

    pub fn media_types(&self) -> Vec<MediaType> {
        self.lock_session()
            .as_ref()
            .map(|s| s.container.media_types())
            .unwrap_or_default()
    }

    pub fn is_sync_buffering(&self) -> bool {
        self.sync_buffering.load(Ordering::Acquire)
    }

    pub fn has_decoding_ended(&self) -> bool {
        self.has_decoding_ended.load(Ordering::Acquire)
    }

    pub fn is_playing(&self) -> bool {
        self.state.playback_state() == PlaybackState::Playing
    }
}

impl Drop for MediaEngine {
    fn drop(&mut self) {
        self.close();
        self.scheduler.shutdown();
    }
}

fn duration_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

/// Run one teardown step; a panic is logged and teardown continues
fn teardown_stage(stage: &str, f: impl FnOnce()) {
    if panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!("Close: '{}' panicked, continuing teardown", stage);
    }
}
