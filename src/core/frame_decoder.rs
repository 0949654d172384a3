//! Frame decoding worker
//!
//! Each cycle, for every sink (one per decoded media type): pull ready frames
//! from the container and push them into the sink until it is full, the
//! container has nothing ready, or the worker is asked to stop.
//!
//! After a complete cycle it evaluates the end-of-decoding latch:
//! `ended = decoded == 0 && !can_read_more(seekable type)`. The engine clears
//! the latch on open and seek.

use log::{debug, error, trace};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::block_buffer::BlockBuffer;
use super::engine_state::EngineState;
use super::event_bus::EventEmitter;
use super::events::WorkerFaultEvent;
use super::frame_buffer::FrameBuffer;
use super::packet_reader::should_read_more_packets;
use super::scheduler::{CycleContext, WorkerCycle};
use crate::entities::{MediaContainer, MediaType, RawFrame};

/// Where decoded frames of one media type go
#[derive(Debug, Clone)]
pub enum DecodeSink {
    /// Materialize straight into renderable blocks
    Blocks(Arc<BlockBuffer>),
    /// Stage raw frames for the host to drain
    Frames(Arc<FrameBuffer>),
}

impl DecodeSink {
    pub fn media_type(&self) -> MediaType {
        match self {
            DecodeSink::Blocks(b) => b.media_type(),
            DecodeSink::Frames(f) => f.media_type(),
        }
    }

    pub fn is_full(&self) -> bool {
        match self {
            DecodeSink::Blocks(b) => b.is_full(),
            DecodeSink::Frames(f) => f.is_full(),
        }
    }

    /// True if the frame was kept
    fn push(&self, frame: RawFrame, container: &dyn MediaContainer) -> bool {
        match self {
            DecodeSink::Blocks(b) => b.add(frame, container.converter()).is_some(),
            DecodeSink::Frames(f) => f.add(frame).is_some(),
        }
    }
}

pub struct FrameDecoder {
    container: Arc<dyn MediaContainer>,
    sinks: Vec<DecodeSink>,
    state: Arc<EngineState>,
    has_decoding_ended: Arc<AtomicBool>,
    network_max: u64,
    events: Option<EventEmitter>,
}

impl FrameDecoder {
    pub fn new(
        container: Arc<dyn MediaContainer>,
        sinks: Vec<DecodeSink>,
        state: Arc<EngineState>,
        has_decoding_ended: Arc<AtomicBool>,
        network_max: u64,
    ) -> Self {
        Self {
            container,
            sinks,
            state,
            has_decoding_ended,
            network_max,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = Some(events);
        self
    }

    /// Queued bytes, codec backlog, or more packets still to read
    fn can_read_more(&self, media_type: MediaType) -> bool {
        self.container.buffer_length(media_type) > 0
            || self.container.has_packets_in_codec(media_type)
            || should_read_more_packets(self.container.as_ref(), self.network_max)
    }

    /// Decode into one sink; None if interrupted
    fn fill_sink(&self, sink: &DecodeSink, ctx: &CycleContext<'_>) -> Option<usize> {
        let media_type = sink.media_type();
        let mut added = 0;
        while !sink.is_full() {
            if !ctx.should_continue() {
                return None;
            }
            let Some(frame) = self.container.receive_next_frame(media_type) else {
                break;
            };
            if !sink.push(frame, self.container.as_ref()) {
                break;
            }
            added += 1;
        }
        Some(added)
    }
}

impl WorkerCycle for FrameDecoder {
    fn name(&self) -> &'static str {
        "frame-decoder"
    }

    fn execute_cycle(&mut self, ctx: &CycleContext<'_>) -> anyhow::Result<()> {
        let mut decoded = 0;
        for sink in &self.sinks {
            match self.fill_sink(sink, ctx) {
                Some(n) => decoded += n,
                // Partial cycle: no latch decision
                None => return Ok(()),
            }
        }

        let seekable = self.container.seekable_media_type();
        let ended = decoded == 0 && !self.can_read_more(seekable);
        if self.has_decoding_ended.swap(ended, Ordering::AcqRel) != ended {
            debug!("{}: decoding ended = {}", self.name(), ended);
        }
        if decoded > 0 {
            trace!("{}: decoded {} frames", self.name(), decoded);
        }

        self.state.set_decoding_bit_rate(self.container.decoding_bit_rate());
        Ok(())
    }

    fn on_cycle_error(&mut self, err: &anyhow::Error) {
        error!("{}: {:#}", self.name(), err);
        if let Some(events) = &self.events {
            events.emit(WorkerFaultEvent {
                worker: self.name(),
                message: format!("{:#}", err),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::packet_reader::BUFFER_LENGTH_MAX;
    use crate::core::scheduler::SchedulerContext;
    use crate::core::test_support::MockContainer;
    use std::thread;
    use std::time::{Duration, Instant};

    fn wait_until(timeout: Duration, f: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if f() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        f()
    }

    fn fill_packets(c: &MockContainer, n: usize) {
        for _ in 0..n {
            if c.read().is_err() {
                break;
            }
        }
    }

    struct Rig {
        container: Arc<MockContainer>,
        video: Arc<BlockBuffer>,
        audio: Arc<BlockBuffer>,
        ended: Arc<AtomicBool>,
        state: Arc<EngineState>,
    }

    fn rig(container: MockContainer, capacity: usize) -> (Rig, FrameDecoder) {
        let container = Arc::new(container);
        let video = Arc::new(BlockBuffer::new(capacity, MediaType::Video).unwrap());
        let audio = Arc::new(BlockBuffer::new(capacity, MediaType::Audio).unwrap());
        let ended = Arc::new(AtomicBool::new(false));
        let state = Arc::new(EngineState::new());
        let decoder = FrameDecoder::new(
            container.clone(),
            vec![DecodeSink::Blocks(video.clone()), DecodeSink::Blocks(audio.clone())],
            state.clone(),
            ended.clone(),
            BUFFER_LENGTH_MAX,
        );
        (
            Rig {
                container,
                video,
                audio,
                ended,
                state,
            },
            decoder,
        )
    }

    #[test]
    fn test_decodes_until_blocks_full() {
        let (rig, decoder) = rig(MockContainer::audio_video(2), 4);
        fill_packets(&rig.container, 40);

        let ctx = SchedulerContext::new("test", Duration::from_millis(1));
        let worker = ctx.spawn(decoder, ctx.token()).unwrap();
        worker.start();

        assert!(wait_until(Duration::from_secs(2), || rig.video.is_full() && rig.audio.is_full()));
        // Full buffers are left alone: backlog stays queued in the container
        thread::sleep(Duration::from_millis(10));
        assert_eq!(rig.video.len(), 4);
        assert!(rig.container.ready_len(MediaType::Audio) > 0);
        assert!(!rig.ended.load(Ordering::SeqCst));
        assert_eq!(rig.state.decoding_bit_rate(), 1_000_000);

        // Blocks are the earliest frames in time order
        let starts: Vec<_> = rig.video.snapshot().iter().map(|b| b.start_time).collect();
        assert_eq!(
            starts,
            (0..4).map(|i| Duration::from_millis(i * 40)).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_latch_set_at_end_of_stream() {
        let (rig, decoder) = rig(MockContainer::audio_video(1), 64);
        // Whole file read: at end of stream
        fill_packets(&rig.container, 1_000);
        assert!(rig.container.is_at_end_of_stream());

        let ctx = SchedulerContext::new("test", Duration::from_millis(1));
        let worker = ctx.spawn(decoder, ctx.token()).unwrap();
        worker.start();

        assert!(wait_until(Duration::from_secs(2), || rig.ended.load(Ordering::SeqCst)));
        assert_eq!(rig.video.len(), 25);
        assert_eq!(rig.audio.len(), 50);

        // No further input: stays latched
        thread::sleep(Duration::from_millis(10));
        assert!(rig.ended.load(Ordering::SeqCst));
    }

    #[test]
    fn test_latch_not_set_while_more_can_be_read() {
        let (rig, decoder) = rig(MockContainer::audio_video(5), 64);
        let ctx = SchedulerContext::new("test", Duration::from_millis(1));
        let worker = ctx.spawn(decoder, ctx.token()).unwrap();
        worker.start();

        // Nothing decoded (no packets read yet) but the reader could still read
        thread::sleep(Duration::from_millis(20));
        assert!(worker.cycle_count() > 0);
        assert!(!rig.ended.load(Ordering::SeqCst));
        assert!(rig.video.is_empty());
    }

    #[test]
    fn test_frame_sink_stages_raw_frames() {
        let container = Arc::new(MockContainer::audio_video(1));
        fill_packets(&container, 10);
        let staging = Arc::new(FrameBuffer::new(3, MediaType::Audio));
        let decoder = FrameDecoder::new(
            container.clone(),
            vec![DecodeSink::Frames(staging.clone())],
            Arc::new(EngineState::new()),
            Arc::new(AtomicBool::new(false)),
            BUFFER_LENGTH_MAX,
        );

        let ctx = SchedulerContext::new("test", Duration::from_millis(1));
        let worker = ctx.spawn(decoder, ctx.token()).unwrap();
        worker.start();

        assert!(wait_until(Duration::from_secs(2), || staging.is_full()));
        let drained = staging.read_all();
        assert_eq!(drained.len(), 3);
        assert_eq!(drained[0].start_time(), Duration::ZERO);
        // Never overflowed: the decoder stops at capacity
        assert_eq!(staging.dropped(), 0);
    }
}
