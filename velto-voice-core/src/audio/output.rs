//! cpal speaker output.
//!
//! The output stream lives on a dedicated `velto-playback` thread because
//! `cpal::Stream` is `!Send`. Scheduled buffers are resampled to the device
//! rate on the caller's thread and handed to the callback through a bounded
//! channel. Back-to-back chunks go through one rubato converter and are laid
//! end to end on the device frame clock, so a run of chunks plays as one
//! continuous signal. The callback mixes every buffer that overlaps the current period
//! at its absolute start frame and sends finished buffers back, so no
//! allocation or deallocation happens on the audio thread in steady state.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        mpsc as std_mpsc, Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    BuildStreamError, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig,
};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

use super::resample::RateConverter;
use crate::{
    buffering::chunk::AudioChunk,
    error::{Result, VoiceError},
    playback::{OutputBackend, PlaybackNotice, PlaybackSink},
};

/// Buffers in flight between the scheduler and the callback.
const BUFFER_QUEUE_CAPACITY: usize = 256;

/// rubato input block for playback conversion (10 ms at 24 kHz).
const CONVERSION_BLOCK: usize = 240;

/// Start times closer than this to the previous end continue the same run.
const CONTIGUOUS_EPSILON: f64 = 1e-6;

/// How often the playback thread checks for shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Default-host cpal speaker.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalOutput;

/// A buffer positioned on the device's frame clock.
struct PendingBuffer {
    start_frame: u64,
    samples: Vec<f32>,
}

impl PendingBuffer {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

struct OutputShared {
    frames_rendered: AtomicU64,
    open: AtomicBool,
}

/// Maps scheduled chunks onto device frames.
///
/// A chunk starting where the previous one ended continues the current run:
/// its converted samples start at the run's write cursor. Any other start
/// time begins a new run at `round(start_at * device_rate)` with fresh
/// converter state. Input still waiting for a full conversion block when a
/// run ends is dropped (under 10 ms).
struct FrameTimeline {
    converter: RateConverter,
    source_rate: u32,
    device_rate: u32,
    /// Source-clock end of the last chunk, in seconds.
    run_end: Option<f64>,
    /// Device frame where the next converted sample lands.
    cursor: u64,
}

impl FrameTimeline {
    fn new(source_rate: u32, device_rate: u32) -> Result<Self> {
        Ok(Self {
            converter: RateConverter::new(source_rate, device_rate, CONVERSION_BLOCK)
                .map_err(|e| VoiceError::OutputDevice(e.to_string()))?,
            source_rate,
            device_rate,
            run_end: None,
            cursor: 0,
        })
    }

    fn place(&mut self, chunk: &AudioChunk, start_at: f64) -> Result<PendingBuffer> {
        if chunk.sample_rate() != self.source_rate {
            return Err(VoiceError::MalformedAudio(format!(
                "playback expects {} Hz, got {} Hz",
                self.source_rate,
                chunk.sample_rate()
            )));
        }
        let start_at = start_at.max(0.0);
        let continues = self
            .run_end
            .is_some_and(|end| (start_at - end).abs() < CONTIGUOUS_EPSILON);
        if !continues {
            self.converter.reset();
            self.cursor = (start_at * f64::from(self.device_rate)).round() as u64;
        }
        self.run_end = Some(start_at + chunk.duration_secs());

        let samples = self.converter.convert(&chunk.samples);
        let buffer = PendingBuffer {
            start_frame: self.cursor,
            samples,
        };
        self.cursor = buffer.end_frame();
        Ok(buffer)
    }
}

struct CpalSink {
    shared: Arc<OutputShared>,
    device_rate: u32,
    timeline: FrameTimeline,
    buffers: Sender<PendingBuffer>,
    thread: Option<JoinHandle<()>>,
}

impl OutputBackend for CpalOutput {
    fn open(
        &self,
        sample_rate: u32,
        notices: UnboundedSender<PlaybackNotice>,
    ) -> Result<Box<dyn PlaybackSink>> {
        let shared = Arc::new(OutputShared {
            frames_rendered: AtomicU64::new(0),
            open: AtomicBool::new(true),
        });
        let (buf_tx, buf_rx) = bounded::<PendingBuffer>(BUFFER_QUEUE_CAPACITY);
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<u32>>(1);

        let thread_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("velto-playback".into())
            .spawn(move || playback_thread(thread_shared, buf_rx, notices, ready_tx))
            .map_err(|e| VoiceError::OutputDevice(format!("failed to spawn playback thread: {e}")))?;

        let device_rate = match ready_rx.recv() {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(VoiceError::OutputDevice(
                    "playback thread exited before opening the device".into(),
                ));
            }
        };
        info!(source_rate = sample_rate, device_rate, "playback sink open");

        let timeline = match FrameTimeline::new(sample_rate, device_rate) {
            Ok(timeline) => timeline,
            Err(e) => {
                shared.open.store(false, Ordering::Release);
                let _ = thread.join();
                return Err(e);
            }
        };

        Ok(Box::new(CpalSink {
            shared,
            device_rate,
            timeline,
            buffers: buf_tx,
            thread: Some(thread),
        }))
    }
}

impl PlaybackSink for CpalSink {
    fn current_time(&self) -> f64 {
        self.shared.frames_rendered.load(Ordering::Acquire) as f64 / self.device_rate as f64
    }

    fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::Acquire)
    }

    fn schedule(&mut self, chunk: &AudioChunk, start_at: f64) -> Result<()> {
        if !self.is_open() {
            return Err(VoiceError::PlaybackClosed);
        }
        let buffer = self.timeline.place(chunk, start_at)?;
        match self.buffers.try_send(buffer) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                Err(VoiceError::OutputDevice("playback queue is full".into()))
            }
            Err(TrySendError::Disconnected(_)) => Err(VoiceError::PlaybackClosed),
        }
    }

    fn close(&mut self) {
        self.shared.open.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("playback thread panicked during shutdown");
            }
        }
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.close();
    }
}

fn playback_thread(
    shared: Arc<OutputShared>,
    buffers: Receiver<PendingBuffer>,
    notices: UnboundedSender<PlaybackNotice>,
    ready: std_mpsc::SyncSender<Result<u32>>,
) {
    let (finished_tx, finished_rx) = bounded::<PendingBuffer>(BUFFER_QUEUE_CAPACITY);

    let (stream, device_rate) = match open_stream(Arc::clone(&shared), buffers, finished_tx) {
        Ok(opened) => opened,
        Err(e) => {
            shared.open.store(false, Ordering::Release);
            let _ = ready.send(Err(e));
            return;
        }
    };
    if ready.send(Ok(device_rate)).is_err() {
        return;
    }

    loop {
        if !shared.open.load(Ordering::Acquire) {
            break;
        }
        match finished_rx.recv_timeout(POLL_INTERVAL) {
            Ok(done) => {
                drop(done);
                if notices.send(PlaybackNotice::BufferEnded).is_err() {
                    debug!("playback notice receiver gone");
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    drop(stream);
    info!("playback stream released");
}

fn open_stream(
    shared: Arc<OutputShared>,
    buffers: Receiver<PendingBuffer>,
    finished: Sender<PendingBuffer>,
) -> Result<(Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| VoiceError::OutputDevice("no output device available".into()))?;
    info!(
        device = device.name().unwrap_or_default().as_str(),
        "opening output device"
    );

    let supported = device
        .default_output_config()
        .map_err(|e| VoiceError::OutputDevice(e.to_string()))?;
    let format = supported.sample_format();
    let config = supported.config();
    let device_rate = config.sample_rate.0;

    let stream = match format {
        SampleFormat::F32 => build_output::<f32>(&device, &config, shared, buffers, finished),
        SampleFormat::I16 => build_output::<i16>(&device, &config, shared, buffers, finished),
        SampleFormat::U16 => build_output::<u16>(&device, &config, shared, buffers, finished),
        other => {
            return Err(VoiceError::OutputDevice(format!(
                "unsupported sample format: {other:?}"
            )))
        }
    }
    .map_err(|e| VoiceError::OutputDevice(e.to_string()))?;

    stream
        .play()
        .map_err(|e| VoiceError::OutputDevice(e.to_string()))?;
    Ok((stream, device_rate))
}

fn build_output<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    shared: Arc<OutputShared>,
    buffers: Receiver<PendingBuffer>,
    finished: Sender<PendingBuffer>,
) -> std::result::Result<Stream, BuildStreamError>
where
    T: SizedSample + FromSample<f32> + Send + 'static,
{
    let channels = usize::from(config.channels.max(1));
    let mut active: Vec<PendingBuffer> = Vec::with_capacity(BUFFER_QUEUE_CAPACITY);
    let mut mix: Vec<f32> = Vec::with_capacity(8192);

    device.build_output_stream(
        config,
        move |data: &mut [T], _info: &cpal::OutputCallbackInfo| {
            let frames = data.len() / channels;
            let now = shared.frames_rendered.load(Ordering::Acquire);

            while let Ok(mut buffer) = buffers.try_recv() {
                // Late buffers play from their first sample.
                buffer.start_frame = buffer.start_frame.max(now);
                active.push(buffer);
            }

            mix.clear();
            mix.resize(frames, 0.0);
            mix_into(&mut mix, now, &active);

            for (frame, &sample) in data.chunks_exact_mut(channels).zip(&mix) {
                let value = T::from_sample(sample.clamp(-1.0, 1.0));
                frame.iter_mut().for_each(|out| *out = value);
            }

            let end = now + frames as u64;
            shared.frames_rendered.store(end, Ordering::Release);

            let mut i = 0;
            while i < active.len() {
                if active[i].end_frame() <= end {
                    let done = active.swap_remove(i);
                    let _ = finished.try_send(done);
                } else {
                    i += 1;
                }
            }
        },
        |err| error!("output stream error: {err}"),
        None,
    )
}

/// Add the part of each buffer that overlaps `[now, now + mix.len())`.
fn mix_into(mix: &mut [f32], now: u64, active: &[PendingBuffer]) {
    let end = now + mix.len() as u64;
    for buffer in active {
        let from = buffer.start_frame.max(now);
        let to = buffer.end_frame().min(end);
        if from >= to {
            continue;
        }
        let out_offset = (from - now) as usize;
        let src_offset = (from - buffer.start_frame) as usize;
        let n = (to - from) as usize;
        for (out, sample) in mix[out_offset..out_offset + n]
            .iter_mut()
            .zip(&buffer.samples[src_offset..src_offset + n])
        {
            *out += sample;
        }
    }
}
