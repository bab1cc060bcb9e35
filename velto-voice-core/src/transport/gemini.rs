//! Gemini Live over a WebSocket.
//!
//! One Tokio task owns the socket. Outbound envelopes reach it through a
//! bounded queue, so `send` never blocks the session loop. A full queue or a
//! dead task surfaces as a transient `Send` error.

use futures_util::{SinkExt, StreamExt};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use super::{
    protocol::{parse_server_message, realtime_input_json, setup_message, LiveConfig},
    Transport, TransportEvent,
};
use crate::{
    codec::AudioEnvelope,
    error::{Result, VoiceError},
};

pub struct GeminiLiveTransport {
    config: LiveConfig,
    outbound: Option<mpsc::Sender<AudioEnvelope>>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl GeminiLiveTransport {
    pub fn new(config: LiveConfig) -> Self {
        Self {
            config,
            outbound: None,
            shutdown: None,
            task: None,
        }
    }
}

impl Transport for GeminiLiveTransport {
    fn open(&mut self, events: mpsc::Sender<TransportEvent>) -> Result<()> {
        if !self.config.has_api_key() {
            return Err(VoiceError::Transport(
                "no API key configured (set GEMINI_API_KEY)".into(),
            ));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| VoiceError::Transport(format!("no async runtime: {e}")))?;

        let (out_tx, out_rx) = mpsc::channel(self.config.outbound_queue.max(1));
        let (stop_tx, stop_rx) = oneshot::channel();
        self.task = Some(runtime.spawn(run_connection(
            self.config.clone(),
            out_rx,
            stop_rx,
            events,
        )));
        self.outbound = Some(out_tx);
        self.shutdown = Some(stop_tx);
        Ok(())
    }

    fn send(&mut self, envelope: AudioEnvelope) -> Result<()> {
        let queue = self
            .outbound
            .as_ref()
            .ok_or_else(|| VoiceError::Send("transport is not open".into()))?;
        queue.try_send(envelope).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => VoiceError::Send("outbound queue full".into()),
            mpsc::error::TrySendError::Closed(_) => {
                VoiceError::Send("connection already closed".into())
            }
        })
    }

    fn close(&mut self) {
        self.outbound = None;
        if let Some(stop) = self.shutdown.take() {
            let _ = stop.send(());
        }
        // The task sends a close frame and exits on its own.
        self.task.take();
    }
}

impl Drop for GeminiLiveTransport {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_connection(
    config: LiveConfig,
    mut outbound: mpsc::Receiver<AudioEnvelope>,
    mut stop: oneshot::Receiver<()>,
    events: mpsc::Sender<TransportEvent>,
) {
    info!(model = config.model.as_str(), "connecting to live endpoint");
    let connected = tokio::select! {
        _ = &mut stop => {
            info!("live connection abandoned before the handshake finished");
            return;
        }
        connected = connect_async(config.url()) => connected,
    };
    let socket = match connected {
        Ok((socket, _response)) => socket,
        Err(e) => {
            let _ = events
                .send(TransportEvent::Error(format!("connection failed: {e}")))
                .await;
            return;
        }
    };
    let (mut write, mut read) = socket.split();

    let setup = match serde_json::to_string(&setup_message(&config)) {
        Ok(json) => json,
        Err(e) => {
            let _ = events
                .send(TransportEvent::Error(format!("setup encoding failed: {e}")))
                .await;
            return;
        }
    };
    if let Err(e) = write.send(Message::Text(setup)).await {
        let _ = events
            .send(TransportEvent::Error(format!("setup send failed: {e}")))
            .await;
        return;
    }
    debug!("setup sent, waiting for setupComplete");

    loop {
        tokio::select! {
            _ = &mut stop => {
                let _ = write.send(Message::Close(None)).await;
                info!("live connection closed locally");
                break;
            }
            Some(envelope) = outbound.recv() => {
                let json = match realtime_input_json(&envelope) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("failed to encode realtime input: {e}");
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::Text(json)).await {
                    let _ = events.send(TransportEvent::Error(e.to_string())).await;
                    break;
                }
            }
            frame = read.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(_) => {
                            debug!("ignoring non-UTF-8 binary frame");
                            continue;
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .filter(|r| !r.is_empty());
                        info!(?reason, "live connection closed by server");
                        let _ = events.send(TransportEvent::Closed(reason)).await;
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        let _ = events.send(TransportEvent::Error(e.to_string())).await;
                        break;
                    }
                    None => {
                        let _ = events.send(TransportEvent::Closed(None)).await;
                        break;
                    }
                };

                for event in parse_server_message(&text) {
                    if events.send(event).await.is_err() {
                        debug!("session loop gone, dropping live connection");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc::error::TryRecvError;

    use super::*;

    #[tokio::test]
    async fn close_during_handshake_abandons_the_connection() {
        // Accepts TCP but never answers the WebSocket upgrade.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
            drop(socket);
        });

        let mut transport = GeminiLiveTransport::new(LiveConfig {
            api_key: "test-key".into(),
            endpoint: format!("ws://{addr}/live"),
            ..LiveConfig::default()
        });
        let (events_tx, mut events_rx) = mpsc::channel(4);
        transport.open(events_tx).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let task = transport.task.take().unwrap();
        transport.close();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("connection task should exit after close")
            .unwrap();

        assert_eq!(events_rx.try_recv(), Err(TryRecvError::Disconnected));
        server.abort();
    }

    #[test]
    fn open_without_api_key_fails() {
        let mut transport = GeminiLiveTransport::new(LiveConfig::default());
        let (events_tx, _events_rx) = mpsc::channel(1);
        let err = transport.open(events_tx).unwrap_err();
        assert!(err.is_network());
    }

    #[test]
    fn send_before_open_is_a_transient_error() {
        let mut transport = GeminiLiveTransport::new(LiveConfig::default());
        let envelope = AudioEnvelope::new("audio/pcm;rate=16000", String::new());
        assert!(matches!(transport.send(envelope), Err(VoiceError::Send(_))));
    }
}
