//! Events published by a running voice session.
//!
//! `VoiceSession` broadcasts each type on its own channel; see
//! `subscribe_status`, `subscribe_activity` and `subscribe_speaking`.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Session status
// ---------------------------------------------------------------------------

/// Lifecycle phase of a voice session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    /// No resources held.
    Idle,
    /// Devices acquired, waiting for the remote side to confirm.
    Connecting,
    /// Remote side confirmed; microphone frames are being sent.
    Active,
    /// Teardown in progress.
    Closing,
}

/// Broadcast on every phase change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusEvent {
    pub phase: SessionPhase,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

// ---------------------------------------------------------------------------
// Audio activity
// ---------------------------------------------------------------------------

/// Broadcast for each captured frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioActivityEvent {
    /// Monotonically increasing frame sequence number.
    pub seq: u64,
    /// Root-mean-square level of the frame.
    pub rms: f32,
    /// Display level in [0, 100].
    pub level: f32,
}

/// Broadcast when model playback starts or drains.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeakingEvent {
    pub is_speaking: bool,
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Point-in-time view of the observable session state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub is_speaking: bool,
    pub is_listening: bool,
    pub volume: f32,
    /// User-facing message of the most recent failure.
    pub last_error: Option<String>,
}
