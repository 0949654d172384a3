//! Renderable media blocks and the frame-to-block conversion seam
//!
//! A [`Block`] is owned by exactly one side of a
//! [`BlockBuffer`](crate::core::block_buffer::BlockBuffer): the free pool or
//! the ordered playback sequence. Neighbors are stored as positions in that
//! sequence (`Neighbors`), recomputed on every structural change, so blocks
//! never point at each other.
//!
//! Payloads are an explicit tagged union. Only audio and video materialize
//! into blocks; subtitle and data streams stay raw.

use std::time::Duration;

use super::frame::{FramePayload, PixelFormat, RawFrame};
use super::media_type::MediaType;

/// Interleaved 16-bit PCM ready for an audio device
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioBlock {
    samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioBlock {
    /// Interleaved samples
    pub fn samples_i16(&self) -> &[i16] {
        &self.samples
    }

    /// Same samples as raw native-endian bytes (device upload)
    pub fn samples_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.samples)
    }

    /// Samples per channel
    pub fn sample_count(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    fn fill(&mut self, bytes: &[u8], sample_rate: u32, channels: u16) -> Result<(), ConvertError> {
        if bytes.len() % 2 != 0 {
            return Err(ConvertError::InvalidPayload(format!(
                "odd PCM byte count: {}",
                bytes.len()
            )));
        }
        // Reuse the pooled allocation
        self.samples.resize(bytes.len() / 2, 0);
        bytemuck::cast_slice_mut::<i16, u8>(&mut self.samples).copy_from_slice(bytes);
        self.sample_rate = sample_rate;
        self.channels = channels;
        Ok(())
    }
}

/// Packed pixels ready for texture upload
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoBlock {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub stride: usize,
    pub format: Option<PixelFormat>,
}

impl VideoBlock {
    fn fill(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        stride: usize,
        format: PixelFormat,
    ) -> Result<(), ConvertError> {
        let needed = format.frame_len(width, height);
        if pixels.len() < needed {
            return Err(ConvertError::InvalidPayload(format!(
                "{}x{} {:?} needs {} bytes, got {}",
                width,
                height,
                format,
                needed,
                pixels.len()
            )));
        }
        self.pixels.clear();
        self.pixels.extend_from_slice(pixels);
        self.width = width;
        self.height = height;
        self.stride = stride;
        self.format = Some(format);
        Ok(())
    }
}

/// Block payload, matched on media type at construction and conversion
#[derive(Debug, Clone, PartialEq)]
pub enum BlockPayload {
    Audio(AudioBlock),
    Video(VideoBlock),
}

/// Positions of the adjacent blocks in the playback sequence
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Neighbors {
    pub previous: Option<usize>,
    pub next: Option<usize>,
}

/// Copy of a block's identity and placement, valid at the time it was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub id: usize,
    pub media_type: MediaType,
    pub index: usize,
    pub start_time: Duration,
    pub duration: Duration,
    pub neighbors: Neighbors,
}

impl BlockInfo {
    pub fn end_time(&self) -> Duration {
        self.start_time + self.duration
    }
}

/// A renderable unit of one media type
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    id: usize,
    start_time: Duration,
    duration: Duration,
    index: usize,
    neighbors: Neighbors,
    payload: BlockPayload,
}

impl Block {
    /// Allocate an empty block. Returns None for types without a block form.
    pub fn new(id: usize, media_type: MediaType) -> Option<Self> {
        let payload = match media_type {
            MediaType::Audio => BlockPayload::Audio(AudioBlock::default()),
            MediaType::Video => BlockPayload::Video(VideoBlock::default()),
            MediaType::Subtitle | MediaType::Data => return None,
        };
        Some(Self {
            id,
            start_time: Duration::ZERO,
            duration: Duration::ZERO,
            index: 0,
            neighbors: Neighbors::default(),
            payload,
        })
    }

    /// Stable identity within the owning buffer
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn media_type(&self) -> MediaType {
        match self.payload {
            BlockPayload::Audio(_) => MediaType::Audio,
            BlockPayload::Video(_) => MediaType::Video,
        }
    }

    pub fn start_time(&self) -> Duration {
        self.start_time
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn end_time(&self) -> Duration {
        self.start_time + self.duration
    }

    /// Position in the playback sequence
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn previous(&self) -> Option<usize> {
        self.neighbors.previous
    }

    pub fn next(&self) -> Option<usize> {
        self.neighbors.next
    }

    pub fn neighbors(&self) -> Neighbors {
        self.neighbors
    }

    pub fn payload(&self) -> &BlockPayload {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut BlockPayload {
        &mut self.payload
    }

    pub fn set_timing(&mut self, start_time: Duration, duration: Duration) {
        self.start_time = start_time;
        self.duration = duration;
    }

    /// True if `position` falls in `[start, end)`; zero-length blocks cover their start only
    pub fn contains(&self, position: Duration) -> bool {
        if self.duration.is_zero() {
            position == self.start_time
        } else {
            position >= self.start_time && position < self.end_time()
        }
    }

    pub(crate) fn set_placement(&mut self, index: usize, neighbors: Neighbors) {
        self.index = index;
        self.neighbors = neighbors;
    }

    pub fn info(&self) -> BlockInfo {
        BlockInfo {
            id: self.id,
            media_type: self.media_type(),
            index: self.index,
            start_time: self.start_time,
            duration: self.duration,
            neighbors: self.neighbors,
        }
    }
}

/// Conversion failures
#[derive(Debug)]
pub enum ConvertError {
    TypeMismatch { block: MediaType, frame: MediaType },
    InvalidPayload(String),
}

impl std::fmt::Display for ConvertError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConvertError::TypeMismatch { block, frame } => {
                write!(f, "Cannot convert {} frame into {} block", frame, block)
            }
            ConvertError::InvalidPayload(e) => write!(f, "Invalid payload: {}", e),
        }
    }
}

impl std::error::Error for ConvertError {}

/// Materializes a raw frame into a pooled block.
///
/// The frame is consumed whether or not conversion succeeds.
pub trait BlockConverter: Send + Sync {
    fn convert(&self, frame: RawFrame, block: &mut Block) -> Result<(), ConvertError>;
}

/// Copies the decode output straight into the block payload
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConverter;

impl BlockConverter for DefaultConverter {
    fn convert(&self, frame: RawFrame, block: &mut Block) -> Result<(), ConvertError> {
        let start_time = frame.start_time();
        let duration = frame.duration();
        let frame_type = frame.media_type();
        let block_type = block.media_type();

        match (block.payload_mut(), frame.into_payload()) {
            (
                BlockPayload::Audio(audio),
                FramePayload::Audio {
                    samples,
                    sample_rate,
                    channels,
                },
            ) => audio.fill(&samples, sample_rate, channels)?,
            (
                BlockPayload::Video(video),
                FramePayload::Video {
                    pixels,
                    width,
                    height,
                    stride,
                    format,
                },
            ) => video.fill(&pixels, width, height, stride, format)?,
            _ => {
                return Err(ConvertError::TypeMismatch {
                    block: block_type,
                    frame: frame_type,
                });
            }
        }

        block.set_timing(start_time, duration);
        Ok(())
    }
}
