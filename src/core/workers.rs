//! The reader/decoder worker pair owned by one open session.
//!
//! Both workers share one cancellation token (a child of the engine's
//! scheduler context). Created on open, paused/resumed by play/pause,
//! disposed on close. Dropping the set disposes it.

use anyhow::Context;
use log::{debug, trace, warn};
use std::time::Duration;

use super::frame_decoder::FrameDecoder;
use super::packet_reader::PacketReader;
use super::scheduler::{CancellationToken, IntervalWorker, SchedulerContext, WorkerState};

pub struct WorkerSet {
    reader: IntervalWorker,
    decoder: IntervalWorker,
    token: CancellationToken,
    pause_timeout: Duration,
    disposed: bool,
}

impl WorkerSet {
    /// Spawn both workers paused.
    ///
    /// If the decoder fails to spawn, the already spawned reader is stopped
    /// on drop before the error is returned.
    pub fn new(
        scheduler: &SchedulerContext,
        reader: PacketReader,
        decoder: FrameDecoder,
        pause_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let token = scheduler.token();
        let reader = scheduler
            .spawn(reader, token.clone())
            .context("failed to spawn packet reader thread")?;
        let decoder = scheduler
            .spawn(decoder, token.clone())
            .context("failed to spawn frame decoder thread")?;
        trace!("WorkerSet created");
        Ok(Self {
            reader,
            decoder,
            token,
            pause_timeout,
            disposed: false,
        })
    }

    pub fn start(&self) {
        self.resume_all();
    }

    pub fn resume_all(&self) {
        if self.disposed {
            return;
        }
        self.reader.resume();
        self.decoder.resume();
    }

    /// Request a pause at the next cycle boundary; does not wait
    pub fn pause_all(&self) {
        self.reader.pause();
        self.decoder.pause();
    }

    /// Pause both workers and wait until neither is mid-cycle.
    ///
    /// Returns false if a worker did not acknowledge within the pause timeout.
    pub fn pause_read_decode(&self) -> bool {
        self.pause_all();
        let reader = self.reader.wait_for_state(WorkerState::Paused, self.pause_timeout);
        let decoder = self.decoder.wait_for_state(WorkerState::Paused, self.pause_timeout);
        if !(reader && decoder) {
            warn!(
                "Workers did not pause within {:?} (reader: {}, decoder: {})",
                self.pause_timeout, reader, decoder
            );
        }
        reader && decoder
    }

    /// Re-apply a wanted state captured before `pause_read_decode`
    pub fn restore(&self, wanted: WorkerState) {
        match wanted {
            WorkerState::Running => self.resume_all(),
            WorkerState::Paused => self.pause_all(),
            WorkerState::Stopped => {}
        }
    }

    /// Both workers are wanted Running
    pub fn is_running(&self) -> bool {
        self.reader.wanted_state() == WorkerState::Running
            && self.decoder.wanted_state() == WorkerState::Running
    }

    pub fn wanted_state(&self) -> WorkerState {
        self.reader.wanted_state()
    }

    pub fn reader_state(&self) -> WorkerState {
        self.reader.worker_state()
    }

    pub fn decoder_state(&self) -> WorkerState {
        self.decoder.worker_state()
    }

    /// Cancel, stop and join both workers. Idempotent.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.token.cancel();
        self.reader.stop();
        self.decoder.stop();
        debug!(
            "WorkerSet disposed ({} reader cycles, {} decoder cycles)",
            self.reader.cycle_count(),
            self.decoder.cycle_count()
        );
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

impl Drop for WorkerSet {
    fn drop(&mut self) {
        self.dispose();
    }
}
