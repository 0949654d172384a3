//! Core pipeline modules - buffers, scheduler, workers, engine
//!
//! Leaves first: buffers and the scheduler know nothing about the engine;
//! the workers see only the container, their sinks and `EngineState`.

pub mod block_buffer;
pub mod engine;
pub mod engine_state;
pub mod event_bus;
pub mod events;
pub mod frame_buffer;
pub mod frame_decoder;
pub mod packet_reader;
pub mod scheduler;
pub mod workers;

#[cfg(test)]
pub(crate) mod test_support;

// Re-exports for convenience
pub use block_buffer::{BlockBuffer, BufferError};
pub use engine::MediaEngine;
pub use engine_state::{EngineState, PlaybackState, StateSnapshot};
pub use event_bus::{EventBus, EventEmitter};
pub use frame_buffer::FrameBuffer;
pub use frame_decoder::{DecodeSink, FrameDecoder};
pub use packet_reader::{BUFFER_LENGTH_MAX, PacketReader, should_read_more_packets};
pub use scheduler::{CancellationToken, IntervalWorker, SchedulerContext, WorkerCycle, WorkerState};
pub use workers::WorkerSet;
