//! Typed audio chunk passed between capture, codec and playback.

/// A contiguous block of mono samples at a fixed sample rate.
///
/// The rate is set at construction and cannot change afterwards; chunks of
/// different rates are never mixed without explicit resampling.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// Mono f32 samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioChunk {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Sample rate in Hz (16000 for capture, 24000 for playback).
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns true if the chunk contains no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration of this chunk in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Root-mean-square level of the samples.
    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = self.samples.iter().map(|s| s * s).sum();
        (sum_sq / self.samples.len() as f32).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_follows_rate() {
        assert_eq!(AudioChunk::new(vec![0.0; 2400], 24_000).duration_secs(), 0.1);
        assert_eq!(AudioChunk::new(vec![0.0; 4096], 16_000).duration_secs(), 0.256);
    }

    #[test]
    fn zero_rate_has_zero_duration() {
        assert_eq!(AudioChunk::new(vec![0.0; 10], 0).duration_secs(), 0.0);
    }

    #[test]
    fn rms_of_square_wave() {
        let samples: Vec<f32> = (0..256)
            .map(|i| if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect();
        let rms = AudioChunk::new(samples, 16_000).rms();
        assert!((rms - 0.5).abs() < 1e-5, "rms={rms}");
    }

    #[test]
    fn empty_chunk_is_silent() {
        let chunk = AudioChunk::new(vec![], 16_000);
        assert!(chunk.is_empty());
        assert_eq!(chunk.rms(), 0.0);
    }
}
