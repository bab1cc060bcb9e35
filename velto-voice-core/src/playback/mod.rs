//! Gapless playback of inbound model audio.
//!
//! The scheduler owns timing; the sink owns the device. A sink exposes a
//! monotonic clock in seconds and accepts buffers stamped with an absolute
//! start time on that clock.

pub mod scheduler;

pub use scheduler::{PlaybackScheduler, ScheduledBuffer};

use tokio::sync::mpsc::UnboundedSender;

use crate::{buffering::chunk::AudioChunk, error::Result};

/// Reference playback rate of model audio (Hz).
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// Out-of-band notifications from a sink to its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackNotice {
    /// A scheduled buffer finished rendering.
    BufferEnded,
}

/// Host audio output with its own playback clock.
pub trait PlaybackSink: Send {
    /// Playback clock in seconds. Never decreases while the sink is open.
    fn current_time(&self) -> f64;

    fn is_open(&self) -> bool;

    /// Queue `chunk` to start at `start_at` on the sink's clock.
    ///
    /// # Errors
    /// `PlaybackClosed` once the sink is closed; `OutputDevice` if the device
    /// side refuses the buffer.
    fn schedule(&mut self, chunk: &AudioChunk, start_at: f64) -> Result<()>;

    /// Stop output and release the device. Idempotent.
    fn close(&mut self);
}

/// Factory for playback sinks, one per session.
pub trait OutputBackend: Send + Sync + 'static {
    /// Open an output sink rendering mono audio at `sample_rate`.
    ///
    /// # Errors
    /// `OutputDevice` if no output device can be opened.
    fn open(
        &self,
        sample_rate: u32,
        notices: UnboundedSender<PlaybackNotice>,
    ) -> Result<Box<dyn PlaybackSink>>;
}
