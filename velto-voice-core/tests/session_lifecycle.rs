use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use approx::assert_relative_eq;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use velto_voice_core::audio::{CaptureRequest, CaptureStream, InputBackend};
use velto_voice_core::buffering::{AudioProducer, Producer};
use velto_voice_core::codec::{bytes_to_transport_text, float_to_pcm16, pcm16_to_le_bytes};
use velto_voice_core::playback::{OutputBackend, PlaybackNotice, PlaybackSink};
use velto_voice_core::{
    AudioChunk, AudioEnvelope, Result, SessionConfig, SessionPhase, Transport, TransportEvent,
    VoiceError, VoiceSession,
};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct FakeInput {
    producer: Arc<Mutex<Option<AudioProducer>>>,
    opened: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
    deny: bool,
    /// How long dropping the stream blocks, like a driver slow to let go.
    release_delay: Duration,
}

impl FakeInput {
    fn denied() -> Self {
        Self {
            deny: true,
            ..Self::default()
        }
    }

    fn push(&self, samples: &[f32]) {
        let mut slot = self.producer.lock();
        let producer = slot.as_mut().expect("microphone not open");
        assert_eq!(producer.push_slice(samples), samples.len());
    }

    /// Push without checking that the ring took everything.
    fn offer(&self, samples: &[f32]) {
        if let Some(producer) = self.producer.lock().as_mut() {
            producer.push_slice(samples);
        }
    }

    fn is_held(&self) -> bool {
        self.opened.load(Ordering::SeqCst) > self.released.load(Ordering::SeqCst)
    }
}

struct FakeStream {
    released: Arc<AtomicUsize>,
    release_delay: Duration,
}

impl CaptureStream for FakeStream {
    fn sample_rate(&self) -> u32 {
        16_000
    }
}

impl Drop for FakeStream {
    fn drop(&mut self) {
        if !self.release_delay.is_zero() {
            std::thread::sleep(self.release_delay);
        }
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

impl InputBackend for FakeInput {
    fn open(
        &self,
        producer: AudioProducer,
        _running: Arc<AtomicBool>,
        request: &CaptureRequest,
    ) -> Result<Box<dyn CaptureStream>> {
        assert_eq!(request.sample_rate, 16_000);
        if self.deny {
            return Err(VoiceError::PermissionDenied("denied by OS".into()));
        }
        *self.producer.lock() = Some(producer);
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeStream {
            released: Arc::clone(&self.released),
            release_delay: self.release_delay,
        }))
    }
}

#[derive(Clone, Default)]
struct FakeOutput {
    clock: Arc<Mutex<f64>>,
    scheduled: Arc<Mutex<Vec<(usize, f64)>>>,
    closed: Arc<AtomicBool>,
    notices: Arc<Mutex<Option<mpsc::UnboundedSender<PlaybackNotice>>>>,
}

impl FakeOutput {
    fn set_time(&self, t: f64) {
        *self.clock.lock() = t;
    }

    fn buffer_ended(&self) {
        if let Some(tx) = self.notices.lock().as_ref() {
            let _ = tx.send(PlaybackNotice::BufferEnded);
        }
    }

    fn starts(&self) -> Vec<f64> {
        self.scheduled.lock().iter().map(|(_, start)| *start).collect()
    }
}

impl PlaybackSink for FakeOutput {
    fn current_time(&self) -> f64 {
        *self.clock.lock()
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    fn schedule(&mut self, chunk: &AudioChunk, start_at: f64) -> Result<()> {
        self.scheduled.lock().push((chunk.len(), start_at));
        Ok(())
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl OutputBackend for FakeOutput {
    fn open(
        &self,
        sample_rate: u32,
        notices: mpsc::UnboundedSender<PlaybackNotice>,
    ) -> Result<Box<dyn PlaybackSink>> {
        assert_eq!(sample_rate, 24_000);
        self.closed.store(false, Ordering::SeqCst);
        *self.notices.lock() = Some(notices);
        Ok(Box::new(self.clone()))
    }
}

#[derive(Clone, Default)]
struct FakeTransport {
    sent: Arc<Mutex<Vec<AudioEnvelope>>>,
    events: Arc<Mutex<Option<mpsc::Sender<TransportEvent>>>>,
    closed: Arc<AtomicBool>,
    refuse: bool,
}

impl FakeTransport {
    async fn emit(&self, event: TransportEvent) {
        let tx = self.events.lock().clone().expect("transport not open");
        tx.send(event).await.expect("session loop gone");
    }

    fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }
}

impl Transport for FakeTransport {
    fn open(&mut self, events: mpsc::Sender<TransportEvent>) -> Result<()> {
        if self.refuse {
            return Err(VoiceError::Transport("connection refused".into()));
        }
        *self.events.lock() = Some(events);
        Ok(())
    }

    fn send(&mut self, envelope: AudioEnvelope) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(VoiceError::Send("closed".into()));
        }
        self.sent.lock().push(envelope);
        Ok(())
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Rig {
    session: VoiceSession,
    input: FakeInput,
    output: FakeOutput,
    transport: FakeTransport,
}

fn rig_with(input: FakeInput) -> Rig {
    let output = FakeOutput::default();
    let session = VoiceSession::new(
        SessionConfig::default(),
        Arc::new(input.clone()),
        Arc::new(output.clone()),
    );
    Rig {
        session,
        input,
        output,
        transport: FakeTransport::default(),
    }
}

fn rig() -> Rig {
    rig_with(FakeInput::default())
}

async fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

async fn start_active(rig: &Rig) {
    rig.session
        .start(Box::new(rig.transport.clone()))
        .await
        .expect("session should start");
    assert_eq!(rig.session.phase(), SessionPhase::Connecting);
    rig.transport.emit(TransportEvent::Opened).await;
    assert!(wait_for(|| rig.session.phase() == SessionPhase::Active).await);
}

fn model_audio(samples: usize) -> AudioEnvelope {
    let pcm = vec![4_000i16; samples];
    AudioEnvelope::new(
        "audio/pcm;rate=24000",
        bytes_to_transport_text(&pcm16_to_le_bytes(&pcm)),
    )
}

fn sine(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| 0.8 * (i as f32 * 0.05).sin())
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn three_frames_become_three_envelopes() {
    let rig = rig();
    start_active(&rig).await;
    assert!(rig.session.snapshot().is_listening);

    let samples = sine(4096 * 3);
    rig.input.push(&samples);

    assert!(wait_for(|| rig.transport.sent_count() == 3).await);
    let sent = rig.transport.sent.lock().clone();
    for (i, envelope) in sent.iter().enumerate() {
        assert_eq!(envelope.mime_type, "audio/pcm;rate=16000");
        let expected = float_to_pcm16(&samples[i * 4096..(i + 1) * 4096]);
        assert_eq!(envelope.pcm16().unwrap(), expected);
    }
    assert!(rig.session.snapshot().volume > 0.0);
    assert_eq!(rig.session.diagnostics_snapshot().frames_sent, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn frames_outside_active_phase_are_never_sent() {
    let rig = rig();
    rig.session
        .start(Box::new(rig.transport.clone()))
        .await
        .unwrap();

    rig.input.push(&vec![0.3; 4096]);
    assert!(
        wait_for(|| rig.session.diagnostics_snapshot().frames_gated >= 1).await,
        "frame should reach the gate"
    );
    assert_eq!(rig.transport.sent_count(), 0);

    rig.transport.emit(TransportEvent::Opened).await;
    assert!(wait_for(|| rig.session.phase() == SessionPhase::Active).await);
    rig.session.stop();

    assert!(!rig.input.is_held());
    assert_eq!(rig.transport.sent_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_while_streaming_sends_nothing_afterwards() {
    let rig = rig();
    start_active(&rig).await;

    let streaming = Arc::new(AtomicBool::new(true));
    let pusher = {
        let input = rig.input.clone();
        let streaming = Arc::clone(&streaming);
        std::thread::spawn(move || {
            let block = sine(1024);
            while streaming.load(Ordering::SeqCst) {
                input.offer(&block);
                std::thread::sleep(Duration::from_millis(2));
            }
        })
    };

    assert!(wait_for(|| rig.transport.sent_count() >= 3).await);
    rig.session.stop();
    let sent_at_stop = rig.transport.sent_count();
    let frames_sent_at_stop = rig.session.diagnostics_snapshot().frames_sent;

    // The microphone keeps producing after the gate closed.
    tokio::time::sleep(Duration::from_millis(150)).await;
    streaming.store(false, Ordering::SeqCst);
    pusher.join().unwrap();

    assert_eq!(rig.transport.sent_count(), sent_at_stop);
    let diagnostics = rig.session.diagnostics_snapshot();
    assert_eq!(diagnostics.frames_sent, frames_sent_at_stop);
    assert_eq!(diagnostics.send_failures, 0);
    assert!(!rig.input.is_held());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn inbound_chunks_play_back_to_back() {
    let rig = rig();
    start_active(&rig).await;
    rig.output.set_time(0.5);

    rig.transport.emit(TransportEvent::Audio(model_audio(2400))).await;
    rig.transport.emit(TransportEvent::Audio(model_audio(2400))).await;

    assert!(wait_for(|| rig.output.scheduled.lock().len() == 2).await);
    let starts = rig.output.starts();
    assert_relative_eq!(starts[0], 0.5);
    assert_relative_eq!(starts[1], starts[0] + 0.1, epsilon = 1e-9);
    assert!(rig.session.snapshot().is_speaking);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn interruption_restarts_playback_at_current_time() {
    let rig = rig();
    start_active(&rig).await;

    for _ in 0..10 {
        rig.transport.emit(TransportEvent::Audio(model_audio(2400))).await;
    }
    assert!(wait_for(|| rig.output.scheduled.lock().len() == 10).await);
    assert_relative_eq!(rig.output.starts()[9], 0.9, epsilon = 1e-9);

    rig.transport.emit(TransportEvent::Interrupted).await;
    assert!(wait_for(|| rig.session.diagnostics_snapshot().interruptions == 1).await);
    assert!(!rig.session.snapshot().is_speaking);

    rig.output.set_time(0.35);
    rig.transport.emit(TransportEvent::Audio(model_audio(2400))).await;
    assert!(wait_for(|| rig.output.scheduled.lock().len() == 11).await);
    assert_relative_eq!(rig.output.starts()[10], 0.35);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn speaking_clears_once_playback_drains() {
    let rig = rig();
    start_active(&rig).await;

    rig.transport.emit(TransportEvent::Audio(model_audio(2400))).await;
    rig.transport.emit(TransportEvent::Audio(model_audio(2400))).await;
    assert!(wait_for(|| rig.session.snapshot().is_speaking).await);

    rig.output.set_time(0.05);
    rig.output.buffer_ended();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rig.session.snapshot().is_speaking);

    rig.output.set_time(0.2);
    rig.output.buffer_ended();
    assert!(wait_for(|| !rig.session.snapshot().is_speaking).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_twice_releases_everything_once() {
    let rig = rig();
    let mut status = rig.session.subscribe_status();
    start_active(&rig).await;

    rig.session.stop();
    rig.session.stop();

    assert_eq!(rig.session.phase(), SessionPhase::Idle);
    assert!(!rig.session.has_live_resources());
    assert!(!rig.input.is_held());
    assert!(rig.output.closed.load(Ordering::SeqCst));
    assert!(rig.transport.closed.load(Ordering::SeqCst));

    let snap = rig.session.snapshot();
    assert!(!snap.is_speaking);
    assert!(!snap.is_listening);
    assert_eq!(snap.volume, 0.0);

    let mut phases = Vec::new();
    while let Ok(event) = status.try_recv() {
        phases.push(event.phase);
    }
    assert_eq!(
        phases,
        vec![
            SessionPhase::Connecting,
            SessionPhase::Active,
            SessionPhase::Closing,
            SessionPhase::Idle,
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_stops_both_wait_for_the_microphone() {
    let rig = rig_with(FakeInput {
        release_delay: Duration::from_millis(300),
        ..FakeInput::default()
    });
    start_active(&rig).await;
    let mut status = rig.session.subscribe_status();

    std::thread::scope(|scope| {
        let first = scope.spawn(|| rig.session.stop());
        std::thread::sleep(Duration::from_millis(50));
        rig.session.stop();
        assert_eq!(rig.session.phase(), SessionPhase::Idle);
        assert!(!rig.input.is_held());
        first.join().unwrap();
    });

    rig.session
        .start(Box::new(FakeTransport::default()))
        .await
        .unwrap();
    assert_eq!(rig.input.opened.load(Ordering::SeqCst), 2);
    assert_eq!(rig.input.released.load(Ordering::SeqCst), 1);

    let mut phases = Vec::new();
    while let Ok(event) = status.try_recv() {
        phases.push(event.phase);
    }
    assert_eq!(
        phases,
        vec![
            SessionPhase::Closing,
            SessionPhase::Idle,
            SessionPhase::Connecting,
        ]
    );
    rig.session.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn restart_does_not_hold_two_microphones() {
    let rig = rig();
    start_active(&rig).await;

    let second = FakeTransport::default();
    rig.session.start(Box::new(second.clone())).await.unwrap();

    assert_eq!(rig.input.opened.load(Ordering::SeqCst), 2);
    assert_eq!(rig.input.released.load(Ordering::SeqCst), 1);
    assert!(rig.transport.closed.load(Ordering::SeqCst));
    assert_eq!(rig.session.phase(), SessionPhase::Connecting);

    second.emit(TransportEvent::Opened).await;
    assert!(wait_for(|| rig.session.phase() == SessionPhase::Active).await);
    rig.session.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn denied_microphone_fails_cleanly() {
    let rig = rig_with(FakeInput::denied());

    let err = rig
        .session
        .start(Box::new(rig.transport.clone()))
        .await
        .unwrap_err();

    assert!(matches!(err, VoiceError::PermissionDenied(_)));
    assert_eq!(rig.session.phase(), SessionPhase::Idle);
    assert!(!rig.session.has_live_resources());
    assert!(rig.output.closed.load(Ordering::SeqCst));
    assert!(rig.transport.events.lock().is_none());

    let message = rig.session.snapshot().last_error.expect("error recorded");
    assert!(message.contains("Microphone access"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn refused_connection_reports_network_error() {
    let rig = rig();
    let transport = FakeTransport {
        refuse: true,
        ..FakeTransport::default()
    };

    let err = rig.session.start(Box::new(transport)).await.unwrap_err();

    assert!(err.is_network());
    assert!(!rig.input.is_held());
    assert_eq!(rig.session.phase(), SessionPhase::Idle);
    let message = rig.session.snapshot().last_error.unwrap();
    assert!(message.starts_with("Failed to connect to Voice Agent."));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn transport_error_tears_the_session_down() {
    let rig = rig();
    start_active(&rig).await;

    rig.transport
        .emit(TransportEvent::Error("socket reset".into()))
        .await;

    assert!(wait_for(|| rig.session.phase() == SessionPhase::Idle).await);
    assert!(wait_for(|| !rig.session.has_live_resources()).await);
    assert!(!rig.input.is_held());
    assert!(rig.output.closed.load(Ordering::SeqCst));
    let message = rig.session.snapshot().last_error.unwrap();
    assert!(message.contains("socket reset"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn audio_before_open_is_dropped() {
    let rig = rig();
    rig.session
        .start(Box::new(rig.transport.clone()))
        .await
        .unwrap();

    rig.transport.emit(TransportEvent::Audio(model_audio(2400))).await;
    assert!(wait_for(|| rig.session.diagnostics_snapshot().chunks_dropped == 1).await);
    assert!(rig.output.scheduled.lock().is_empty());
    rig.session.stop();
}
