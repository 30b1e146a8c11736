//! Gapless playback scheduling
//!
//! Chunks are laid end to end on the output device clock. The scheduler
//! keeps the next free start time and the set of chunks that have not yet
//! finished, so a barge-in can silence everything at once.

use std::collections::BTreeMap;

use tokio::sync::mpsc;

use super::codec::DecodedChunk;
use super::device::{AudioOutput, Completion, PlaybackId};
use crate::Result;

/// One scheduled chunk
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackHandle {
    /// Scheduler-assigned id
    pub id: PlaybackId,
    /// Device time the chunk starts at, in seconds
    pub start: f64,
    /// Chunk length in seconds
    pub duration: f64,
}

impl PlaybackHandle {
    /// Device time the chunk ends at
    #[must_use]
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Schedules decoded chunks for back-to-back playback
pub struct PlaybackScheduler {
    output: Box<dyn AudioOutput>,
    clock: f64,
    live: BTreeMap<PlaybackId, PlaybackHandle>,
    next_id: PlaybackId,
    completions: mpsc::UnboundedSender<PlaybackId>,
}

impl PlaybackScheduler {
    /// Wrap an output sink
    ///
    /// The returned receiver yields ids of chunks that finished naturally;
    /// feed them back through [`PlaybackScheduler::complete`].
    #[must_use]
    pub fn new(output: Box<dyn AudioOutput>) -> (Self, mpsc::UnboundedReceiver<PlaybackId>) {
        let (completions, rx) = mpsc::unbounded_channel();
        (
            Self {
                output,
                clock: 0.0,
                live: BTreeMap::new(),
                next_id: 1,
                completions,
            },
            rx,
        )
    }

    /// Schedule a chunk right after everything already scheduled
    ///
    /// # Errors
    ///
    /// Returns error if the output sink refuses the chunk; the clock is left
    /// untouched in that case
    pub fn enqueue(&mut self, chunk: DecodedChunk) -> Result<PlaybackHandle> {
        let start = self.clock.max(self.output.now());
        let handle = PlaybackHandle {
            id: self.next_id,
            start,
            duration: chunk.duration(),
        };
        self.next_id += 1;

        self.output.schedule_at(
            handle.id,
            start,
            chunk,
            Completion::new(handle.id, self.completions.clone()),
        )?;

        self.live.insert(handle.id, handle);
        self.clock = handle.end();

        tracing::trace!(
            id = handle.id,
            start = handle.start,
            duration = handle.duration,
            live = self.live.len(),
            "chunk scheduled"
        );
        Ok(handle)
    }

    /// Drop a chunk that finished playing from the live set
    pub fn complete(&mut self, id: PlaybackId) -> bool {
        self.live.remove(&id).is_some()
    }

    /// Stop every live chunk and reset the clock
    ///
    /// Returns the number of chunks that were stopped.
    pub fn interrupt(&mut self) -> usize {
        let stopped = self.live.len();
        for id in self.live.keys() {
            self.output.stop(*id);
        }
        self.live.clear();
        self.clock = 0.0;

        if stopped > 0 {
            tracing::debug!(stopped, "playback interrupted");
        }
        stopped
    }

    /// Interrupt and release the output device
    pub fn shutdown(&mut self) {
        self.interrupt();
        self.output.close();
    }

    /// Next free start time in seconds
    #[must_use]
    pub const fn clock(&self) -> f64 {
        self.clock
    }

    /// Number of chunks scheduled or playing
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Whether a chunk is still scheduled or playing
    #[must_use]
    pub fn is_live(&self, id: PlaybackId) -> bool {
        self.live.contains_key(&id)
    }
}
