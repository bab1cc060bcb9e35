use tracing::{debug, info};

use super::PlaybackSink;
use crate::{
    buffering::chunk::AudioChunk,
    codec::AudioEnvelope,
    error::{Result, VoiceError},
};

/// Slack applied when deciding that the last scheduled buffer has drained.
const DRAIN_EPSILON_SECS: f64 = 0.1;

/// Where a chunk landed on the playback clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledBuffer {
    pub start: f64,
    pub duration: f64,
}

impl ScheduledBuffer {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Places inbound chunks back-to-back on the sink's clock.
///
/// `next_start_time` only moves forward, except through [`interrupt`], which
/// resets it to zero so the next chunk starts at the current clock time.
///
/// [`interrupt`]: PlaybackScheduler::interrupt
pub struct PlaybackScheduler {
    sink: Box<dyn PlaybackSink>,
    sample_rate: u32,
    next_start_time: f64,
    is_speaking: bool,
}

impl PlaybackScheduler {
    pub fn new(sink: Box<dyn PlaybackSink>, sample_rate: u32) -> Self {
        let next_start_time = sink.current_time();
        Self {
            sink,
            sample_rate,
            next_start_time,
            is_speaking: false,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_speaking(&self) -> bool {
        self.is_speaking
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn is_open(&self) -> bool {
        self.sink.is_open()
    }

    /// Schedule `chunk` immediately after everything already queued, or now
    /// if the queue has drained.
    ///
    /// Returns `None` for an empty chunk.
    ///
    /// # Errors
    /// - `PlaybackClosed` if the sink is closed.
    /// - `MalformedAudio` if the chunk's rate differs from the playback rate.
    pub fn enqueue(&mut self, chunk: &AudioChunk) -> Result<Option<ScheduledBuffer>> {
        if !self.sink.is_open() {
            return Err(VoiceError::PlaybackClosed);
        }
        if chunk.sample_rate() != self.sample_rate {
            return Err(VoiceError::MalformedAudio(format!(
                "chunk rate {} does not match playback rate {}",
                chunk.sample_rate(),
                self.sample_rate
            )));
        }
        if chunk.is_empty() {
            return Ok(None);
        }

        let start = self.sink.current_time().max(self.next_start_time);
        self.sink.schedule(chunk, start)?;

        let scheduled = ScheduledBuffer {
            start,
            duration: chunk.duration_secs(),
        };
        self.next_start_time = scheduled.end();
        self.is_speaking = true;
        debug!(
            start,
            duration = scheduled.duration,
            next = self.next_start_time,
            "playback chunk scheduled"
        );
        Ok(Some(scheduled))
    }

    /// Decode an inbound envelope and schedule it.
    pub fn enqueue_envelope(&mut self, envelope: &AudioEnvelope) -> Result<Option<ScheduledBuffer>> {
        let chunk = envelope.decode(self.sample_rate)?;
        self.enqueue(&chunk)
    }

    /// Called when the sink reports a finished buffer. Returns true when this
    /// call cleared the speaking flag.
    pub fn on_buffer_ended(&mut self) -> bool {
        if !self.is_speaking {
            return false;
        }
        if self.sink.current_time() >= self.next_start_time - DRAIN_EPSILON_SECS {
            self.is_speaking = false;
            return true;
        }
        false
    }

    /// The user barged in: forget the queue position so the next response
    /// starts immediately. Audio already handed to the sink keeps playing.
    pub fn interrupt(&mut self) {
        info!(discarded_until = self.next_start_time, "playback interrupted");
        self.next_start_time = 0.0;
        self.is_speaking = false;
    }

    pub fn close(&mut self) {
        self.sink.close();
        self.is_speaking = false;
    }
}
