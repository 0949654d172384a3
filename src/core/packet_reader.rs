//! Packet reading worker
//!
//! Each cycle pulls demuxed packets into the container's per-stream queues
//! while [`should_read_more_packets`] allows it. Transient read errors end the
//! cycle quietly and are retried on the next one; anything else goes to the
//! scheduler's error hook.

use anyhow::Context;
use log::{error, trace};
use std::sync::Arc;

use super::engine_state::EngineState;
use super::event_bus::EventEmitter;
use super::events::WorkerFaultEvent;
use super::scheduler::{CycleContext, WorkerCycle};
use crate::entities::MediaContainer;

/// Queued-bytes ceiling for network sources (16 MiB)
pub const BUFFER_LENGTH_MAX: u64 = 16 * 1024 * 1024;

/// Read-more predicate shared by the reader and the decoder's end-of-stream check.
///
/// - aborted or at end of stream: never
/// - live: always
/// - network: while queued bytes are below `network_max`
/// - otherwise: while some stream lacks queued packets
pub fn should_read_more_packets(container: &dyn MediaContainer, network_max: u64) -> bool {
    if container.is_read_aborted() || container.is_at_end_of_stream() {
        return false;
    }
    if container.is_live_stream() {
        return true;
    }
    if container.is_network_stream() && container.total_buffer_length() < network_max {
        return true;
    }
    !container.has_enough_packets()
}

pub struct PacketReader {
    container: Arc<dyn MediaContainer>,
    state: Arc<EngineState>,
    network_max: u64,
    events: Option<EventEmitter>,
}

impl PacketReader {
    pub fn new(container: Arc<dyn MediaContainer>, state: Arc<EngineState>, network_max: u64) -> Self {
        Self {
            container,
            state,
            network_max,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = Some(events);
        self
    }

    fn publish_stats(&self) {
        self.state.set_packet_buffer_stats(
            self.container.total_buffer_length(),
            self.container.total_packet_count(),
        );
    }
}

impl WorkerCycle for PacketReader {
    fn name(&self) -> &'static str {
        "packet-reader"
    }

    fn execute_cycle(&mut self, ctx: &CycleContext<'_>) -> anyhow::Result<()> {
        let mut reads = 0usize;
        while ctx.should_continue()
            && should_read_more_packets(self.container.as_ref(), self.network_max)
        {
            match self.container.read() {
                Ok(_) => reads += 1,
                Err(e) if e.is_transient() => {
                    trace!("{}: {} (retrying next cycle)", self.name(), e);
                    break;
                }
                Err(e) => {
                    self.publish_stats();
                    return Err(e).context("packet read failed");
                }
            }
        }

        if reads > 0 {
            trace!("{}: read {} packets", self.name(), reads);
        }
        self.publish_stats();
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
