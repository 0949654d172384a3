//! Entities module - pipeline data types and collaborator interfaces
//!
//! Plain data (frames, blocks, media types, sources) plus the traits the
//! engine consumes from the outside world (container, factory, converter).
//! Nothing here spawns threads or holds locks.

pub mod block;
pub mod frame;
pub mod media_type;
pub mod source;
pub mod traits;

pub use block::{
    AudioBlock, Block, BlockConverter, BlockInfo, BlockPayload, ConvertError, DefaultConverter,
    Neighbors, VideoBlock,
};
pub use frame::{FrameInfo, FramePayload, PixelFormat, RawFrame};
pub use media_type::MediaType;
pub use source::{ContainerConfig, ResolvedSource, SourceKind};
pub use traits::{ContainerError, ContainerFactory, MediaContainer};
