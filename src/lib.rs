//! mediacore - decode-buffer-render pipeline core
//!
//! A packet reading worker and a frame decoding worker fill per-media-type
//! block buffers from an external demuxer/codec container; a renderer reads
//! the blocks on its own clock. [`MediaEngine`] owns the pipeline and exposes
//! open/close/play/pause/stop/seek plus an atomically published state.

// Pipeline: buffers, workers, engine
pub mod core;

// Data types and collaborator traits
pub mod entities;

pub mod config;
pub mod logging;

pub use config::{EngineConfig, OutputMode};
pub use core::block_buffer::BlockBuffer;
pub use core::engine::MediaEngine;
pub use core::engine_state::{EngineState, PlaybackState, StateSnapshot};
pub use core::event_bus::{BoxedEvent, EventBus, EventEmitter, downcast_event};
pub use core::frame_buffer::FrameBuffer;
pub use entities::{
    Block, BlockConverter, BlockInfo, ContainerConfig, ContainerError, ContainerFactory,
    MediaContainer, MediaType, RawFrame,
};
