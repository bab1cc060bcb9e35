//! `VoiceSession`: the single owner of everything a live conversation holds.
//!
//! ## Lifecycle
//!
//! ```text
//! VoiceSession::new()
//!     └─► start(transport)  → teardown, Idle → Connecting,
//!                             speaker, microphone + pump, transport, loop
//!         └─► Opened         → Connecting → Active, frames flow
//!             └─► stop() / Closed / Error / drop
//!                            → Closing: capture, playback, transport, flags
//!                            → Idle
//! ```
//!
//! `start()` always runs a full teardown first, so a second microphone is
//! never acquired while one is held. Teardown is idempotent and infallible.
//!
//! ## Threading
//!
//! The capture pump and its `!Send` device stream live on the `velto-capture`
//! thread. Transport events, outbound frames and playback notices meet in one
//! Tokio task, the session loop. Shared resources sit behind a
//! `parking_lot::Mutex` that is never held across an `.await`.

pub mod capture;
pub mod gate;

use std::{
    ops::ControlFlow,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use self::{
    capture::{CaptureContext, CapturePump, DiagnosticsSnapshot, SessionDiagnostics},
    gate::SessionGate,
};
use crate::{
    audio::{CaptureRequest, InputBackend},
    buffering::{create_audio_ring, frame::DEFAULT_FRAME_SIZE},
    codec::AudioEnvelope,
    error::{Result, VoiceError},
    ipc::events::{
        AudioActivityEvent, SessionPhase, SessionSnapshot, SessionStatusEvent, SpeakingEvent,
    },
    playback::{OutputBackend, PlaybackNotice, PlaybackScheduler, PLAYBACK_SAMPLE_RATE},
    transport::{Transport, TransportEvent},
};

/// Broadcast channel capacity for observers.
const BROADCAST_CAP: usize = 256;

/// Configuration for `VoiceSession`.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Rate of outbound microphone audio (Hz). Default: 16000.
    pub capture_sample_rate: u32,
    /// Rate of inbound model audio (Hz). Default: 24000.
    pub playback_sample_rate: u32,
    /// Samples per outbound frame. Default: 4096.
    pub frame_size: usize,
    /// Display gain applied to frame RMS. Default: 500.
    pub volume_gain: f32,
    /// Frames buffered between the pump and the session loop. Default: 32.
    pub outbound_queue: usize,
    /// Transport events buffered for the session loop. Default: 64.
    pub inbound_queue: usize,
    /// Input device name to prefer over the system default.
    pub preferred_input_device: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capture_sample_rate: 16_000,
            playback_sample_rate: PLAYBACK_SAMPLE_RATE,
            frame_size: DEFAULT_FRAME_SIZE,
            volume_gain: 500.0,
            outbound_queue: 32,
            inbound_queue: 64,
            preferred_input_device: None,
        }
    }
}

impl SessionConfig {
    /// Defaults overridden by `VELTO_VOLUME_GAIN`, `VELTO_FRAME_SIZE` and
    /// `VELTO_INPUT_DEVICE`. Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(gain) = env_parse::<f32>("VELTO_VOLUME_GAIN") {
            config.volume_gain = gain.clamp(1.0, 10_000.0);
        }
        if let Some(size) = env_parse::<usize>("VELTO_FRAME_SIZE") {
            config.frame_size = size.clamp(256, 16_384);
        }
        if let Ok(device) = std::env::var("VELTO_INPUT_DEVICE") {
            let device = device.trim();
            if !device.is_empty() {
                config.preferred_input_device = Some(device.to_string());
            }
        }
        config
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.trim().parse().ok()
}

struct CaptureResources {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureResources {
    /// Stop the pump and wait for the capture thread, which drops the device
    /// stream before the converter and ring.
    fn release(mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("capture thread panicked");
            }
        }
    }
}

#[derive(Default)]
struct LiveResources {
    capture: Option<CaptureResources>,
    playback: Option<PlaybackScheduler>,
    transport: Option<Box<dyn Transport>>,
    loop_stop: Option<oneshot::Sender<()>>,
}

impl LiveResources {
    fn is_empty(&self) -> bool {
        self.capture.is_none()
            && self.playback.is_none()
            && self.transport.is_none()
            && self.loop_stop.is_none()
    }
}

#[derive(Default)]
struct SessionResources {
    /// Bumped by every `start()`; stale loops compare against it.
    generation: u64,
    live: LiveResources,
}

struct SessionShared {
    config: SessionConfig,
    gate: Arc<SessionGate>,
    resources: Mutex<SessionResources>,
    /// Held for the whole release sequence; a second caller waits for the
    /// first to finish instead of reporting `Idle` early.
    teardown_lock: Mutex<()>,
    is_speaking: AtomicBool,
    is_listening: AtomicBool,
    volume: Arc<AtomicU32>,
    last_error: Mutex<Option<String>>,
    status_tx: broadcast::Sender<SessionStatusEvent>,
    activity_tx: broadcast::Sender<AudioActivityEvent>,
    speaking_tx: broadcast::Sender<SpeakingEvent>,
    diagnostics: Arc<SessionDiagnostics>,
}

/// A duplex voice session. `Send + Sync`; share behind an `Arc` if needed.
pub struct VoiceSession {
    shared: Arc<SessionShared>,
    input: Arc<dyn InputBackend>,
    output: Arc<dyn OutputBackend>,
}

impl VoiceSession {
    pub fn new(
        config: SessionConfig,
        input: Arc<dyn InputBackend>,
        output: Arc<dyn OutputBackend>,
    ) -> Self {
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (activity_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (speaking_tx, _) = broadcast::channel(BROADCAST_CAP);

        Self {
            shared: Arc::new(SessionShared {
                config,
                gate: Arc::new(SessionGate::default()),
                resources: Mutex::new(SessionResources::default()),
                teardown_lock: Mutex::new(()),
                is_speaking: AtomicBool::new(false),
                is_listening: AtomicBool::new(false),
                volume: Arc::new(AtomicU32::new(0)),
                last_error: Mutex::new(None),
                status_tx,
                activity_tx,
                speaking_tx,
                diagnostics: Arc::new(SessionDiagnostics::default()),
            }),
            input,
            output,
        }
    }

    /// Acquire speaker, microphone and transport, then wait for the remote
    /// side in the background.
    ///
    /// Returns once everything is acquired; the session becomes `Active` when
    /// the transport reports `Opened`. Any failure releases whatever was
    /// acquired and records a user-facing message in `last_error`.
    ///
    /// # Errors
    /// - `PermissionDenied` / `DeviceUnavailable` / `AudioStream` from the microphone.
    /// - `OutputDevice` from the speaker.
    /// - `Transport` if the connection cannot be attempted.
    /// - `Cancelled` if `stop()` ran while starting.
    /// - `AlreadyRunning` if another `start()` won a race.
    pub async fn start(&self, transport: Box<dyn Transport>) -> Result<()> {
        self.shared.teardown(None, None);
        let generation = {
            let mut res = self.shared.resources.lock();
            self.shared.gate.begin_connect()?;
            res.generation += 1;
            res.generation
        };
        *self.shared.last_error.lock() = None;
        self.shared.diagnostics.reset();
        self.shared.publish_status(SessionPhase::Connecting, None);
        info!(generation, "voice session starting");

        match self.acquire(generation, transport).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let message = e.user_message();
                if !matches!(e, VoiceError::Cancelled) {
                    warn!("voice session failed to start: {e}");
                    *self.shared.last_error.lock() = Some(message.clone());
                }
                self.shared.teardown(Some(generation), Some(message));
                Err(e)
            }
        }
    }

    async fn acquire(&self, generation: u64, mut transport: Box<dyn Transport>) -> Result<()> {
        let config = &self.shared.config;

        // Speaker.
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        let sink = self.output.open(config.playback_sample_rate, notice_tx)?;
        let mut playback = PlaybackScheduler::new(sink, config.playback_sample_rate);
        {
            let mut res = self.shared.resources.lock();
            if !self.shared.is_current(&res, generation) {
                drop(res);
                playback.close();
                return Err(VoiceError::Cancelled);
            }
            res.live.playback = Some(playback);
        }

        // Microphone and pump.
        let (frame_tx, frame_rx) = mpsc::channel(config.outbound_queue.max(1));
        let (ready_tx, ready_rx) = oneshot::channel::<Result<u32>>();
        {
            let mut res = self.shared.resources.lock();
            if !self.shared.is_current(&res, generation) {
                return Err(VoiceError::Cancelled);
            }
            let running = Arc::new(AtomicBool::new(true));
            let thread = self.spawn_capture(Arc::clone(&running), frame_tx, ready_tx)?;
            res.live.capture = Some(CaptureResources {
                running,
                thread: Some(thread),
            });
        }
        let device_rate = ready_rx.await.map_err(|_| {
            VoiceError::AudioStream("capture thread exited before reporting".into())
        })??;
        info!(device_rate, "microphone acquired");
        if !self.shared.is_current(&self.shared.resources.lock(), generation) {
            return Err(VoiceError::Cancelled);
        }

        // Transport.
        let (event_tx, event_rx) = mpsc::channel(config.inbound_queue.max(1));
        if let Err(e) = transport.open(event_tx) {
            transport.close();
            return Err(e);
        }
        let (stop_tx, stop_rx) = oneshot::channel();
        {
            let mut res = self.shared.resources.lock();
            if !self.shared.is_current(&res, generation) {
                drop(res);
                transport.close();
                return Err(VoiceError::Cancelled);
            }
            res.live.transport = Some(transport);
            res.live.loop_stop = Some(stop_tx);
        }

        tokio::spawn(session_loop(
            Arc::clone(&self.shared),
            generation,
            stop_rx,
            event_rx,
            frame_rx,
            notice_rx,
        ));
        Ok(())
    }

    fn spawn_capture(
        &self,
        running: Arc<AtomicBool>,
        outbound: mpsc::Sender<AudioEnvelope>,
        ready: oneshot::Sender<Result<u32>>,
    ) -> Result<JoinHandle<()>> {
        let input = Arc::clone(&self.input);
        let shared = &self.shared;
        let request = CaptureRequest {
            sample_rate: shared.config.capture_sample_rate,
            preferred_device: shared.config.preferred_input_device.clone(),
        };
        let (producer, consumer) = create_audio_ring();
        let ctx = CaptureContext {
            consumer,
            running: Arc::clone(&running),
            gate: Arc::clone(&shared.gate),
            capture_rate: shared.config.capture_sample_rate,
            frame_size: shared.config.frame_size,
            volume_gain: shared.config.volume_gain,
            outbound,
            activity_tx: shared.activity_tx.clone(),
            volume: Arc::clone(&shared.volume),
            diagnostics: Arc::clone(&shared.diagnostics),
        };

        thread::Builder::new()
            .name("velto-capture".into())
            .spawn(move || {
                let stream = match input.open(producer, running, &request) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready.send(Err(e));
                        return;
                    }
                };
                let device_rate = stream.sample_rate();
                let mut pump = match CapturePump::new(ctx, device_rate) {
                    Ok(pump) => pump,
                    Err(e) => {
                        drop(stream);
                        let _ = ready.send(Err(e));
                        return;
                    }
                };
                if ready.send(Ok(device_rate)).is_err() {
                    return;
                }
                pump.run();
                drop(stream);
                drop(pump);
            })
            .map_err(VoiceError::Io)
    }

    /// Tear the session down. Idempotent; never fails.
    pub fn stop(&self) {
        self.shared.teardown(None, None);
    }

    pub fn phase(&self) -> SessionPhase {
        self.shared.gate.phase()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let shared = &self.shared;
        SessionSnapshot {
            phase: shared.gate.phase(),
            is_speaking: shared.is_speaking.load(Ordering::Relaxed),
            is_listening: shared.is_listening.load(Ordering::Relaxed),
            volume: f32::from_bits(shared.volume.load(Ordering::Relaxed)),
            last_error: shared.last_error.lock().clone(),
        }
    }

    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.shared.diagnostics.snapshot()
    }

    /// Whether any device, thread or connection is still held.
    pub fn has_live_resources(&self) -> bool {
        !self.shared.resources.lock().live.is_empty()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.shared.status_tx.subscribe()
    }

    pub fn subscribe_activity(&self) -> broadcast::Receiver<AudioActivityEvent> {
        self.shared.activity_tx.subscribe()
    }

    pub fn subscribe_speaking(&self) -> broadcast::Receiver<SpeakingEvent> {
        self.shared.speaking_tx.subscribe()
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        self.shared.teardown(None, None);
    }
}

impl SessionShared {
    fn is_current(&self, res: &SessionResources, generation: u64) -> bool {
        res.generation == generation && self.gate.phase() == SessionPhase::Connecting
    }

    fn publish_status(&self, phase: SessionPhase, detail: Option<String>) {
        let _ = self.status_tx.send(SessionStatusEvent { phase, detail });
    }

    fn set_speaking(&self, speaking: bool) {
        if self.is_speaking.swap(speaking, Ordering::AcqRel) != speaking {
            let _ = self.speaking_tx.send(SpeakingEvent {
                is_speaking: speaking,
            });
        }
    }

    /// Release everything, in order: session loop, capture (stream, then
    /// converter and ring), playback, transport, observable flags.
    ///
    /// With `expected` set, only tears down if that generation is still the
    /// current one. Concurrent callers are serialized: the second returns only
    /// after the first has released every handle.
    fn teardown(&self, expected: Option<u64>, detail: Option<String>) {
        let _serialized = self.teardown_lock.lock();
        let live = {
            let mut res = self.resources.lock();
            if expected.is_some_and(|g| g != res.generation) {
                debug!(?expected, current = res.generation, "stale teardown ignored");
                return;
            }
            if self.gate.phase() == SessionPhase::Idle && res.live.is_empty() {
                return;
            }
            let previous = self.gate.begin_close();
            info!(?previous, generation = res.generation, "voice session closing");
            std::mem::take(&mut res.live)
        };
        self.publish_status(SessionPhase::Closing, None);

        let LiveResources {
            capture,
            playback,
            transport,
            loop_stop,
        } = live;

        if let Some(stop) = loop_stop {
            let _ = stop.send(());
        }
        if let Some(capture) = capture {
            capture.release();
            info!("microphone released");
        }
        if let Some(mut playback) = playback {
            playback.close();
            info!("playback closed");
        }
        if let Some(mut transport) = transport {
            transport.close();
            info!("transport closed");
        }

        self.set_speaking(false);
        self.is_listening.store(false, Ordering::Release);
        self.volume.store(0f32.to_bits(), Ordering::Relaxed);

        self.gate.finish_close();
        self.publish_status(SessionPhase::Idle, detail);
        info!("voice session idle");
    }

    fn handle_transport_event(
        &self,
        generation: u64,
        event: TransportEvent,
    ) -> ControlFlow<Option<String>> {
        match event {
            TransportEvent::Opened => {
                if self.gate.mark_active() {
                    self.is_listening.store(true, Ordering::Release);
                    self.publish_status(SessionPhase::Active, None);
                    info!(generation, "voice session active");
                } else {
                    debug!(phase = ?self.gate.phase(), "ignoring late open");
                }
            }
            TransportEvent::Audio(envelope) => self.play(generation, &envelope),
            TransportEvent::Interrupted => {
                let mut res = self.resources.lock();
                if res.generation == generation {
                    if let Some(playback) = res.live.playback.as_mut() {
                        playback.interrupt();
                    }
                }
                drop(res);
                self.diagnostics.interruptions.fetch_add(1, Ordering::Relaxed);
                self.set_speaking(false);
            }
            TransportEvent::TurnComplete => debug!("model turn complete"),
            TransportEvent::Closed(reason) => {
                info!(?reason, "transport closed by remote");
                return ControlFlow::Break(reason);
            }
            TransportEvent::Error(message) => {
                warn!("transport error: {message}");
                let user = VoiceError::Transport(message).user_message();
                *self.last_error.lock() = Some(user.clone());
                return ControlFlow::Break(Some(user));
            }
        }
        ControlFlow::Continue(())
    }

    fn play(&self, generation: u64, envelope: &AudioEnvelope) {
        if !self.gate.is_active() {
            self.diagnostics.chunks_dropped.fetch_add(1, Ordering::Relaxed);
            debug!(phase = ?self.gate.phase(), "dropping inbound audio outside active phase");
            return;
        }
        let mut res = self.resources.lock();
        if res.generation != generation {
            return;
        }
        let Some(playback) = res.live.playback.as_mut() else {
            debug!("dropping inbound audio: {}", VoiceError::PlaybackClosed);
            return;
        };
        match playback.enqueue_envelope(envelope) {
            Ok(Some(_)) => {
                drop(res);
                self.diagnostics
                    .chunks_scheduled
                    .fetch_add(1, Ordering::Relaxed);
                self.set_speaking(true);
            }
            Ok(None) => {}
            Err(VoiceError::PlaybackClosed) => {
                self.diagnostics.chunks_dropped.fetch_add(1, Ordering::Relaxed);
                debug!("dropping inbound audio: playback closed");
            }
            Err(e) => {
                self.diagnostics.chunks_dropped.fetch_add(1, Ordering::Relaxed);
                warn!("dropping inbound audio: {e}");
            }
        }
    }

    fn forward_frame(&self, generation: u64, envelope: AudioEnvelope) {
        if !self.gate.is_active() {
            self.diagnostics.frames_gated.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let mut res = self.resources.lock();
        if res.generation != generation {
            return;
        }
        let Some(transport) = res.live.transport.as_mut() else {
            return;
        };
        match transport.send(envelope) {
            Ok(()) => {
                self.diagnostics.frames_sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.diagnostics.send_failures.fetch_add(1, Ordering::Relaxed);
                debug!("frame send failed: {e}");
            }
        }
    }

    fn handle_playback_notice(&self, generation: u64, notice: PlaybackNotice) {
        match notice {
            PlaybackNotice::BufferEnded => {
                let mut res = self.resources.lock();
                if res.generation != generation {
                    return;
                }
                let drained = res
                    .live
                    .playback
                    .as_mut()
                    .is_some_and(|playback| playback.on_buffer_ended());
                drop(res);
                if drained {
                    self.set_speaking(false);
                }
            }
        }
    }
}

async fn session_loop(
    shared: Arc<SessionShared>,
    generation: u64,
    mut stop: oneshot::Receiver<()>,
    mut events: mpsc::Receiver<TransportEvent>,
    mut frames: mpsc::Receiver<AudioEnvelope>,
    mut notices: mpsc::UnboundedReceiver<PlaybackNotice>,
) {
    debug!(generation, "session loop started");
    let detail = loop {
        tokio::select! {
            _ = &mut stop => {
                debug!(generation, "session loop stopped");
                return;
            }
            event = events.recv() => match event {
                Some(event) => {
                    if let ControlFlow::Break(detail) = shared.handle_transport_event(generation, event) {
                        break detail;
                    }
                }
                None => break Some("transport event stream ended".to_string()),
            },
            Some(envelope) = frames.recv() => shared.forward_frame(generation, envelope),
            Some(notice) = notices.recv() => shared.handle_playback_notice(generation, notice),
        }
    };
    // Joins the capture and playback threads; keep that off the async workers.
    let closing = tokio::task::spawn_blocking(move || shared.teardown(Some(generation), detail));
    if closing.await.is_err() {
        warn!(generation, "session teardown panicked");
    }
}
