//! Scripted container and factory for worker and engine tests.
//!
//! The script is a timeline of `(type, start, duration)` packets. `read()`
//! moves the next packet into that type's ready queue; `receive_next_frame()`
//! decodes one ready packet into a small frame the default converter accepts.
//! Live containers never run out: they synthesize packets forever.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::entities::{
    ContainerConfig, ContainerError, ContainerFactory, MediaContainer, MediaType, PixelFormat,
    RawFrame, ResolvedSource,
};

/// Bytes reported per queued packet
pub const PACKET_BYTES: u64 = 1_000;

type ReadHook = Box<dyn Fn(usize) + Send + Sync>;

#[derive(Debug, Clone, Copy)]
pub struct Packet {
    pub media_type: MediaType,
    pub start: Duration,
    pub duration: Duration,
}

pub fn make_frame(media_type: MediaType, start: Duration, duration: Duration) -> RawFrame {
    match media_type {
        MediaType::Video => RawFrame::video(start, duration, vec![0; 16], 2, 2, PixelFormat::Rgba8),
        _ => RawFrame::audio(start, duration, vec![0; 8], 48_000, 2),
    }
}

/// Interleaved audio (20ms) and video (40ms) timeline of `secs` seconds
pub fn av_script(secs: u64) -> Vec<Packet> {
    let mut packets = Vec::new();
    for ms in (0..secs * 1000).step_by(20) {
        if ms % 40 == 0 {
            packets.push(Packet {
                media_type: MediaType::Video,
                start: Duration::from_millis(ms),
                duration: Duration::from_millis(40),
            });
        }
        packets.push(Packet {
            media_type: MediaType::Audio,
            start: Duration::from_millis(ms),
            duration: Duration::from_millis(20),
        });
    }
    packets
}

pub struct MockContainer {
    types: Vec<MediaType>,
    seekable: MediaType,
    script: Vec<Packet>,
    cursor: AtomicUsize,
    ready: Mutex<HashMap<MediaType, VecDeque<Packet>>>,
    pub live: AtomicBool,
    pub network: AtomicBool,
    /// Ready packets per type that count as "enough"
    pub enough_packets: usize,
    aborted: AtomicBool,
    reads: AtomicUsize,
    read_hook: Mutex<Option<ReadHook>>,
    fail_next_read: Mutex<Option<ContainerError>>,
    pub seeks: Mutex<Vec<Duration>>,
    pub clears: AtomicUsize,
    pub closed: AtomicBool,
    pub fail_close: AtomicBool,
}

impl MockContainer {
    pub fn new(types: Vec<MediaType>, seekable: MediaType, script: Vec<Packet>) -> Self {
        Self {
            types,
            seekable,
            script,
            cursor: AtomicUsize::new(0),
            ready: Mutex::new(HashMap::new()),
            live: AtomicBool::new(false),
            network: AtomicBool::new(false),
            enough_packets: 8,
            aborted: AtomicBool::new(false),
            reads: AtomicUsize::new(0),
            read_hook: Mutex::new(None),
            fail_next_read: Mutex::new(None),
            seeks: Mutex::new(Vec::new()),
            clears: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            fail_close: AtomicBool::new(false),
        }
    }

    pub fn audio_video(secs: u64) -> Self {
        Self::new(
            vec![MediaType::Video, MediaType::Audio],
            MediaType::Video,
            av_script(secs),
        )
    }

    pub fn live_audio() -> Self {
        let c = Self::new(vec![MediaType::Audio], MediaType::Audio, Vec::new());
        c.live.store(true, Ordering::SeqCst);
        c
    }

    /// Successful reads so far
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Called with the read count after every successful read
    pub fn on_read(&self, hook: impl Fn(usize) + Send + Sync + 'static) {
        *self.read_hook.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn fail_next_read(&self, err: ContainerError) {
        *self.fail_next_read.lock().unwrap() = Some(err);
    }

    pub fn ready_len(&self, media_type: MediaType) -> usize {
        self.ready.lock().unwrap().get(&media_type).map_or(0, |q| q.len())
    }

    fn next_packet(&self) -> Option<Packet> {
        let i = self.cursor.fetch_add(1, Ordering::SeqCst);
        if self.live.load(Ordering::SeqCst) {
            return Some(Packet {
                media_type: self.seekable,
                start: Duration::from_millis(i as u64 * 20),
                duration: Duration::from_millis(20),
            });
        }
        match self.script.get(i) {
            Some(p) => Some(*p),
            None => {
                self.cursor.store(self.script.len(), Ordering::SeqCst);
                None
            }
        }
    }
}

impl MediaContainer for MockContainer {
    fn media_types(&self) -> Vec<MediaType> {
        self.types.clone()
    }

    fn seekable_media_type(&self) -> MediaType {
        self.seekable
    }

    fn read(&self) -> Result<MediaType, ContainerError> {
        if let Some(err) = self.fail_next_read.lock().unwrap().take() {
            return Err(err);
        }
        if self.aborted.load(Ordering::SeqCst) {
            return Err(ContainerError::Aborted);
        }
        let packet = self.next_packet().ok_or(ContainerError::EndOfStream)?;
        self.ready
            .lock()
            .unwrap()
            .entry(packet.media_type)
            .or_default()
            .push_back(packet);
        let n = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(hook) = self.read_hook.lock().unwrap().as_ref() {
            hook(n);
        }
        Ok(packet.media_type)
    }

    fn receive_next_frame(&self, media_type: MediaType) -> Option<RawFrame> {
        let packet = self.ready.lock().unwrap().get_mut(&media_type)?.pop_front()?;
        Some(make_frame(packet.media_type, packet.start, packet.duration))
    }

    fn buffer_length(&self, media_type: MediaType) -> u64 {
        self.ready_len(media_type) as u64 * PACKET_BYTES
    }

    fn total_packet_count(&self) -> usize {
        self.ready.lock().unwrap().values().map(|q| q.len()).sum()
    }

    fn has_packets_in_codec(&self, _media_type: MediaType) -> bool {
        false
    }

    fn has_enough_packets(&self) -> bool {
        self.types.iter().all(|t| self.ready_len(*t) >= self.enough_packets)
    }

    fn is_at_end_of_stream(&self) -> bool {
        !self.live.load(Ordering::SeqCst) && self.cursor.load(Ordering::SeqCst) >= self.script.len()
    }

    fn is_read_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    fn is_live_stream(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn is_network_stream(&self) -> bool {
        self.network.load(Ordering::SeqCst)
    }

    fn signal_abort_reads(&self, _immediate: bool) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    fn clear_queued_packets(&self, _flush_codecs: bool) {
        self.ready.lock().unwrap().clear();
        self.clears.fetch_add(1, Ordering::SeqCst);
    }

    /// Repositions at the last seekable-type packet starting at or before `target`
    fn seek(&self, target: Duration) -> Result<Option<RawFrame>, ContainerError> {
        self.seeks.lock().unwrap().push(target);
        self.ready.lock().unwrap().clear();
        let key = self
            .script
            .iter()
            .rposition(|p| p.media_type == self.seekable && p.start <= target)
            .unwrap_or(0);
        match self.script.get(key) {
            Some(p) => {
                self.cursor.store(key + 1, Ordering::SeqCst);
                Ok(Some(make_frame(p.media_type, p.start, p.duration)))
            }
            None => Ok(None),
        }
    }

    fn decoding_bit_rate(&self) -> u64 {
        1_000_000
    }

    fn close(&self) -> Result<(), ContainerError> {
        self.closed.store(true, Ordering::SeqCst);
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(ContainerError::Other("close failed".into()));
        }
        Ok(())
    }
}

/// Factory handing out containers built by a closure
pub struct MockFactory {
    build: Box<dyn Fn() -> MockContainer + Send + Sync>,
    pub fail: AtomicBool,
    pub last: Mutex<Option<Arc<MockContainer>>>,
    pub opened: Mutex<Vec<ResolvedSource>>,
}

impl MockFactory {
    pub fn new(build: impl Fn() -> MockContainer + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            build: Box::new(build),
            fail: AtomicBool::new(false),
            last: Mutex::new(None),
            opened: Mutex::new(Vec::new()),
        })
    }

    pub fn last(&self) -> Arc<MockContainer> {
        self.last.lock().unwrap().clone().expect("no container opened")
    }
}

impl ContainerFactory for MockFactory {
    fn open(
        &self,
        source: &ResolvedSource,
        _config: &ContainerConfig,
    ) -> Result<Arc<dyn MediaContainer>, ContainerError> {
        self.opened.lock().unwrap().push(source.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(ContainerError::Open(format!("cannot open {}", source.url)));
        }
        let container = Arc::new((self.build)());
        *self.last.lock().unwrap() = Some(Arc::clone(&container));
        Ok(container)
    }
}
