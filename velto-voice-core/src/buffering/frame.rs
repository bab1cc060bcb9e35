//! Fixed-size framing of a continuous sample stream.

use super::chunk::AudioChunk;

/// Reference capture frame: 4096 samples (256 ms at 16 kHz).
pub const DEFAULT_FRAME_SIZE: usize = 4096;

/// Cuts an arbitrary sequence of pushes into equal frames.
///
/// Samples that do not fill a whole frame stay pending until the next push.
#[derive(Debug)]
pub struct FrameAssembler {
    frame_size: usize,
    sample_rate: u32,
    pending: Vec<f32>,
}

impl FrameAssembler {
    pub fn new(frame_size: usize, sample_rate: u32) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            frame_size,
            sample_rate,
            pending: Vec::with_capacity(frame_size * 2),
        }
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Samples waiting for the next full frame.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Append samples and return every frame completed by them, in order.
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioChunk> {
        self.pending.extend_from_slice(samples);
        let complete = self.pending.len() / self.frame_size;
        if complete == 0 {
            return Vec::new();
        }
        let consumed = complete * self.frame_size;
        let frames = self.pending[..consumed]
            .chunks_exact(self.frame_size)
            .map(|frame| AudioChunk::new(frame.to_vec(), self.sample_rate))
            .collect();
        self.pending.drain(..consumed);
        frames
    }

    /// Drop any partial frame.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
