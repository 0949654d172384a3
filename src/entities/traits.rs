//! Abstract traits for dependency inversion.
//!
//! These traits define what the pipeline needs from the demuxer/codec
//! container without knowing its implementation (FFmpeg bindings, a capture
//! device, a test script). Workers and the engine only see `dyn MediaContainer`.

use std::sync::Arc;
use std::time::Duration;

use super::block::{BlockConverter, DefaultConverter};
use super::frame::RawFrame;
use super::media_type::MediaType;
use super::source::{ContainerConfig, ResolvedSource};

/// Container-level errors
#[derive(Debug, Clone, PartialEq)]
pub enum ContainerError {
    /// Input could not be opened or probed
    Open(String),
    /// A single packet read failed; the next read may succeed
    Read(String),
    EndOfStream,
    Seek(String),
    /// Reads were aborted by `signal_abort_reads`
    Aborted,
    Disposed,
    Other(String),
}

impl ContainerError {
    /// Errors the packet reader swallows and retries on the next cycle
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ContainerError::Read(_) | ContainerError::EndOfStream | ContainerError::Aborted
        )
    }
}

impl std::fmt::Display for ContainerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerError::Open(e) => write!(f, "Open error: {}", e),
            ContainerError::Read(e) => write!(f, "Read error: {}", e),
            ContainerError::EndOfStream => write!(f, "End of stream"),
            ContainerError::Seek(e) => write!(f, "Seek error: {}", e),
            ContainerError::Aborted => write!(f, "Reads aborted"),
            ContainerError::Disposed => write!(f, "Container disposed"),
            ContainerError::Other(e) => write!(f, "Container error: {}", e),
        }
    }
}

impl std::error::Error for ContainerError {}

/// Demuxer + codec collaborator.
///
/// Shared by the packet reading and frame decoding threads, so every method
/// takes `&self`; implementations guard their own state.
pub trait MediaContainer: Send + Sync {
    /// Active streams, in the order the decoder visits them
    fn media_types(&self) -> Vec<MediaType>;

    /// The stream that drives the clock and end-of-media detection
    fn seekable_media_type(&self) -> MediaType;

    /// Read one demuxed packet into its stream queue
    fn read(&self) -> Result<MediaType, ContainerError>;

    /// Decode the next frame of `media_type`, if one is ready
    fn receive_next_frame(&self, media_type: MediaType) -> Option<RawFrame>;

    /// Queued packet bytes for one stream
    fn buffer_length(&self, media_type: MediaType) -> u64;

    /// Queued packet bytes across all streams
    fn total_buffer_length(&self) -> u64 {
        self.media_types().into_iter().map(|t| self.buffer_length(t)).sum()
    }

    /// Queued packet count across all streams
    fn total_packet_count(&self) -> usize {
        0
    }

    /// Packets sent to the codec that have not produced frames yet
    fn has_packets_in_codec(&self, media_type: MediaType) -> bool;

    /// Every active stream has enough queued packets to keep decoding
    fn has_enough_packets(&self) -> bool;

    fn is_at_end_of_stream(&self) -> bool;
    fn is_read_aborted(&self) -> bool;
    fn is_live_stream(&self) -> bool;
    fn is_network_stream(&self) -> bool;

    fn is_seekable(&self) -> bool {
        !self.is_live_stream()
    }

    /// Ask in-flight and future reads to stop
    fn signal_abort_reads(&self, immediate: bool);

    /// Drop queued packets; `flush_codecs` also flushes decoder state
    fn clear_queued_packets(&self, flush_codecs: bool);

    /// Reposition the input and return the first decoded frame at or before `target`
    fn seek(&self, target: Duration) -> Result<Option<RawFrame>, ContainerError>;

    /// Current decoding bit rate (bits per second)
    fn decoding_bit_rate(&self) -> u64 {
        0
    }

    /// Codec-specific materialization; defaults to a plain payload copy
    fn converter(&self) -> &dyn BlockConverter {
        &DefaultConverter
    }

    /// Release native resources. Called once on engine close.
    fn close(&self) -> Result<(), ContainerError> {
        Ok(())
    }
}

/// Builds and opens containers for resolved sources
pub trait ContainerFactory: Send + Sync {
    fn open(
        &self,
        source: &ResolvedSource,
        config: &ContainerConfig,
    ) -> Result<Arc<dyn MediaContainer>, ContainerError>;
}

/// Blanket impl: Arc<T> implements ContainerFactory if T does
impl<T: ContainerFactory + ?Sized> ContainerFactory for Arc<T> {
    fn open(
        &self,
        source: &ResolvedSource,
        config: &ContainerConfig,
    ) -> Result<Arc<dyn MediaContainer>, ContainerError> {
        (**self).open(source, config)
    }
}
