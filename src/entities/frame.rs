//! Raw decoded frames awaiting materialization
//!
//! **Why**: The codec hands out decoded frames in its own layout. A `RawFrame`
//! owns that decode output until it is either converted into a renderable
//! [`Block`](super::block::Block) or released (dropped).
//!
//! **Used by**: Frame staging buffers, block buffers (conversion input),
//! the frame decoding worker and the seek refill path.
//!
//! # Payloads
//!
//! - `FramePayload::Audio`: interleaved signed 16-bit PCM bytes
//! - `FramePayload::Video`: packed pixel rows with explicit stride
//! - `FramePayload::Subtitle` / `FramePayload::Data`: opaque side streams

use log::trace;
use std::time::Duration;

use super::media_type::MediaType;

/// Pixel layout of a decoded video frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PixelFormat {
    Rgba8,
    Bgra8,
    Yuv420p,
}

impl PixelFormat {
    /// Bytes needed for one frame of `width` x `height`
    pub fn frame_len(self, width: u32, height: u32) -> usize {
        let px = width as usize * height as usize;
        match self {
            PixelFormat::Rgba8 | PixelFormat::Bgra8 => px * 4,
            PixelFormat::Yuv420p => px + px / 2,
        }
    }
}

/// Decode output, tagged by stream kind
#[derive(Debug, Clone, PartialEq)]
pub enum FramePayload {
    Audio {
        samples: Vec<u8>,
        sample_rate: u32,
        channels: u16,
    },
    Video {
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        stride: usize,
        format: PixelFormat,
    },
    Subtitle {
        text: String,
    },
    Data(Vec<u8>),
}

impl FramePayload {
    pub fn media_type(&self) -> MediaType {
        match self {
            FramePayload::Audio { .. } => MediaType::Audio,
            FramePayload::Video { .. } => MediaType::Video,
            FramePayload::Subtitle { .. } => MediaType::Subtitle,
            FramePayload::Data(_) => MediaType::Data,
        }
    }

    /// Payload size in bytes
    pub fn len(&self) -> usize {
        match self {
            FramePayload::Audio { samples, .. } => samples.len(),
            FramePayload::Video { pixels, .. } => pixels.len(),
            FramePayload::Subtitle { text } => text.len(),
            FramePayload::Data(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lightweight copy of a frame's timing, safe to hand out after the frame moved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub media_type: MediaType,
    pub start_time: Duration,
    pub duration: Duration,
    pub size: usize,
}

/// A decoded, not-yet-renderable unit of media
#[derive(Debug, PartialEq)]
pub struct RawFrame {
    start_time: Duration,
    duration: Duration,
    payload: FramePayload,
}

impl RawFrame {
    pub fn new(start_time: Duration, duration: Duration, payload: FramePayload) -> Self {
        Self {
            start_time,
            duration,
            payload,
        }
    }

    /// Interleaved s16 PCM audio frame
    pub fn audio(
        start_time: Duration,
        duration: Duration,
        samples: Vec<u8>,
        sample_rate: u32,
        channels: u16,
    ) -> Self {
        Self::new(
            start_time,
            duration,
            FramePayload::Audio {
                samples,
                sample_rate,
                channels,
            },
        )
    }

    /// Packed video frame; stride is derived from the pixel format
    pub fn video(
        start_time: Duration,
        duration: Duration,
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Self {
        let stride = match format {
            PixelFormat::Rgba8 | PixelFormat::Bgra8 => width as usize * 4,
            PixelFormat::Yuv420p => width as usize,
        };
        Self::new(
            start_time,
            duration,
            FramePayload::Video {
                pixels,
                width,
                height,
                stride,
                format,
            },
        )
    }

    pub fn media_type(&self) -> MediaType {
        self.payload.media_type()
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

    pub fn payload(&self) -> &FramePayload {
        &self.payload
    }

    /// Take ownership of the decode output (used by conversion)
    pub fn into_payload(self) -> FramePayload {
        self.payload
    }

    /// Memory held by this frame (bytes)
    pub fn mem(&self) -> usize {
        self.payload.len()
    }

    pub fn info(&self) -> FrameInfo {
        FrameInfo {
            media_type: self.media_type(),
            start_time: self.start_time,
            duration: self.duration,
            size: self.mem(),
        }
    }

    /// Explicitly release the decode output without materializing it
    pub fn release(self) {
        trace!(
            "Released {} frame at {:?} ({} bytes)",
            self.media_type(),
            self.start_time,
            self.mem()
        );
    }
}
