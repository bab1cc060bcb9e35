//! Streaming sample-rate conversion on top of rubato's `FastFixedIn`.
//!
//! Used in both directions: device rate → 16 kHz on the capture pump, and
//! 24 kHz → device rate in the playback sink. rubato consumes fixed blocks,
//! so input that does not fill a block waits in `pending` for the next call.
//! The converter keeps its filter state across calls; callers feeding one
//! continuous signal in pieces get one continuous output.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::{error, info};

use crate::error::{Result, VoiceError};

/// Mono f32 rate converter. Passthrough when both rates are equal.
pub struct RateConverter {
    engine: Option<FastFixedIn<f32>>,
    from_rate: u32,
    to_rate: u32,
    block: usize,
    pending: Vec<f32>,
    /// Single-channel output block, sized for rubato's worst case.
    block_out: Vec<Vec<f32>>,
}

impl RateConverter {
    /// # Errors
    /// `VoiceError::AudioStream` if rubato rejects the ratio or block size.
    pub fn new(from_rate: u32, to_rate: u32, block: usize) -> Result<Self> {
        let block = block.max(1);
        let engine = if from_rate == to_rate {
            None
        } else {
            let engine = FastFixedIn::<f32>::new(
                f64::from(to_rate) / f64::from(from_rate),
                1.0,
                PolynomialDegree::Cubic,
                block,
                1,
            )
            .map_err(|e| {
                VoiceError::AudioStream(format!(
                    "cannot convert {from_rate} Hz to {to_rate} Hz: {e}"
                ))
            })?;
            info!(from_rate, to_rate, block, "rate conversion enabled");
            Some(engine)
        };
        let block_out = match engine.as_ref() {
            Some(engine) => vec![vec![0f32; engine.output_frames_max()]],
            None => Vec::new(),
        };

        Ok(Self {
            engine,
            from_rate,
            to_rate,
            block,
            pending: Vec::with_capacity(block * 2),
            block_out,
        })
    }

    /// Append the converted form of `input` to `out` and return how many
    /// samples were appended. Fewer than expected (or none) come back while a
    /// block is still filling.
    pub fn convert_into(&mut self, input: &[f32], out: &mut Vec<f32>) -> usize {
        let before = out.len();
        let Some(engine) = self.engine.as_mut() else {
            out.extend_from_slice(input);
            return input.len();
        };

        self.pending.extend_from_slice(input);
        let full_blocks = self.pending.len() / self.block;
        for block in self.pending.chunks_exact(self.block).take(full_blocks) {
            match engine.process_into_buffer(&[block], &mut self.block_out, None) {
                Ok((_, produced)) => out.extend_from_slice(&self.block_out[0][..produced]),
                Err(e) => error!(
                    from_rate = self.from_rate,
                    to_rate = self.to_rate,
                    "rate conversion failed: {e}"
                ),
            }
        }
        self.pending.drain(..full_blocks * self.block);
        out.len() - before
    }

    /// Convenience wrapper around `convert_into` returning a fresh `Vec`.
    pub fn convert(&mut self, input: &[f32]) -> Vec<f32> {
        let mut out = Vec::new();
        self.convert_into(input, &mut out);
        out
    }

    /// Forget buffered input and filter history; the next call starts a new
    /// signal.
    pub fn reset(&mut self) {
        self.pending.clear();
        if let Some(engine) = self.engine.as_mut() {
            engine.reset();
        }
    }

    /// Input samples waiting for a full block.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn is_passthrough(&self) -> bool {
        self.engine.is_none()
    }
}
