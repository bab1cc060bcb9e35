//! Capture pump.
//!
//! ## Stages (per iteration)
//!
//! ```text
//! 1. Drain ring buffer (device rate, mono f32)
//! 2. Resample to the capture rate
//! 3. Cut into fixed frames
//! 4. Per frame: RMS → volume level → activity event
//! 5. Gate check; when Active, encode and queue for the transport
//! ```
//!
//! Runs on the `velto-capture` thread, which also owns the device stream.
//! Nothing here blocks on the network: a full outbound queue drops the frame.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use super::gate::SessionGate;
use crate::{
    audio::resample::RateConverter,
    buffering::{chunk::AudioChunk, frame::FrameAssembler, AudioConsumer, Consumer},
    codec::AudioEnvelope,
    error::Result,
    ipc::events::AudioActivityEvent,
};

/// Samples drained from the ring per iteration, and the resampler block.
const DRAIN_CHUNK: usize = 1024;

/// Sleep when the ring is empty.
const EMPTY_SLEEP: Duration = Duration::from_millis(5);

/// Upper bound of the display volume level.
pub const MAX_VOLUME_LEVEL: f32 = 100.0;

/// Display level for a frame: `min(100, rms * gain)`.
pub fn volume_level(rms: f32, gain: f32) -> f32 {
    (rms * gain).clamp(0.0, MAX_VOLUME_LEVEL)
}

#[derive(Default)]
pub struct SessionDiagnostics {
    pub frames_captured: AtomicUsize,
    pub frames_gated: AtomicUsize,
    pub frames_queued: AtomicUsize,
    pub frames_dropped: AtomicUsize,
    pub frames_sent: AtomicUsize,
    pub send_failures: AtomicUsize,
    pub chunks_scheduled: AtomicUsize,
    pub chunks_dropped: AtomicUsize,
    pub interruptions: AtomicUsize,
}

impl SessionDiagnostics {
    pub fn reset(&self) {
        for counter in self.counters() {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_gated: self.frames_gated.load(Ordering::Relaxed),
            frames_queued: self.frames_queued.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            chunks_scheduled: self.chunks_scheduled.load(Ordering::Relaxed),
            chunks_dropped: self.chunks_dropped.load(Ordering::Relaxed),
            interruptions: self.interruptions.load(Ordering::Relaxed),
        }
    }

    fn counters(&self) -> [&AtomicUsize; 9] {
        [
            &self.frames_captured,
            &self.frames_gated,
            &self.frames_queued,
            &self.frames_dropped,
            &self.frames_sent,
            &self.send_failures,
            &self.chunks_scheduled,
            &self.chunks_dropped,
            &self.interruptions,
        ]
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub frames_captured: usize,
    pub frames_gated: usize,
    pub frames_queued: usize,
    pub frames_dropped: usize,
    pub frames_sent: usize,
    pub send_failures: usize,
    pub chunks_scheduled: usize,
    pub chunks_dropped: usize,
    pub interruptions: usize,
}

/// Everything the pump needs, handed over in one piece.
pub struct CaptureContext {
    pub consumer: AudioConsumer,
    pub running: Arc<AtomicBool>,
    pub gate: Arc<SessionGate>,
    pub capture_rate: u32,
    pub frame_size: usize,
    pub volume_gain: f32,
    pub outbound: mpsc::Sender<AudioEnvelope>,
    pub activity_tx: broadcast::Sender<AudioActivityEvent>,
    /// Latest display level, stored as `f32` bits.
    pub volume: Arc<AtomicU32>,
    pub diagnostics: Arc<SessionDiagnostics>,
}

pub struct CapturePump {
    ctx: CaptureContext,
    resampler: RateConverter,
    assembler: FrameAssembler,
    raw: Vec<f32>,
    resampled: Vec<f32>,
    seq: u64,
}

impl CapturePump {
    /// Prepare a pump for a device delivering `device_rate`.
    ///
    /// # Errors
    /// `AudioStream` if the rate conversion cannot be set up.
    pub fn new(ctx: CaptureContext, device_rate: u32) -> Result<Self> {
        let resampler = RateConverter::new(device_rate, ctx.capture_rate, DRAIN_CHUNK)?;
        let assembler = FrameAssembler::new(ctx.frame_size, ctx.capture_rate);
        Ok(Self {
            ctx,
            resampler,
            assembler,
            raw: vec![0f32; DRAIN_CHUNK],
            resampled: Vec::with_capacity(DRAIN_CHUNK * 4),
            seq: 0,
        })
    }

    /// Pump until `running` is cleared.
    pub fn run(&mut self) {
        info!(
            capture_rate = self.ctx.capture_rate,
            frame_size = self.assembler.frame_size(),
            passthrough = self.resampler.is_passthrough(),
            "capture pump started"
        );

        while self.ctx.running.load(Ordering::Relaxed) {
            let n = self.ctx.consumer.pop_slice(&mut self.raw);
            if n == 0 {
                thread::sleep(EMPTY_SLEEP);
                continue;
            }
            self.resampled.clear();
            if self.resampler.convert_into(&self.raw[..n], &mut self.resampled) == 0 {
                continue;
            }
            for frame in self.assembler.push(&self.resampled) {
                self.handle_frame(&frame);
            }
        }

        info!(frames = self.seq, "capture pump stopped");
    }

    fn handle_frame(&mut self, frame: &AudioChunk) {
        let seq = self.seq;
        self.seq += 1;
        self.ctx
            .diagnostics
            .frames_captured
            .fetch_add(1, Ordering::Relaxed);

        let rms = frame.rms();
        let level = volume_level(rms, self.ctx.volume_gain);
        self.ctx.volume.store(level.to_bits(), Ordering::Relaxed);
        let _ = self.ctx.activity_tx.send(AudioActivityEvent { seq, rms, level });

        if !self.ctx.gate.is_active() {
            self.ctx
                .diagnostics
                .frames_gated
                .fetch_add(1, Ordering::Relaxed);
            return;
        }

        match self.ctx.outbound.try_send(AudioEnvelope::encode(frame)) {
            Ok(()) => {
                self.ctx
                    .diagnostics
                    .frames_queued
                    .fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.ctx
                    .diagnostics
                    .frames_dropped
                    .fetch_add(1, Ordering::Relaxed);
                warn!(seq, "outbound queue full, dropping frame");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.ctx
                    .diagnostics
                    .frames_dropped
                    .fetch_add(1, Ordering::Relaxed);
                debug!(seq, "outbound queue closed, dropping frame");
            }
        }
    }
}
