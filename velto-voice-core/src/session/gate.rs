//! Atomic session phase.
//!
//! The phase doubles as the capture send gate: frames leave the process only
//! while the gate reads `Active`, and flipping away from `Active` takes effect
//! for every thread on its next read.

use std::sync::atomic::{AtomicU8, Ordering};

use crate::{
    error::{Result, VoiceError},
    ipc::events::SessionPhase,
};

const IDLE: u8 = 0;
const CONNECTING: u8 = 1;
const ACTIVE: u8 = 2;
const CLOSING: u8 = 3;

fn encode(phase: SessionPhase) -> u8 {
    match phase {
        SessionPhase::Idle => IDLE,
        SessionPhase::Connecting => CONNECTING,
        SessionPhase::Active => ACTIVE,
        SessionPhase::Closing => CLOSING,
    }
}

fn decode(raw: u8) -> SessionPhase {
    match raw {
        CONNECTING => SessionPhase::Connecting,
        ACTIVE => SessionPhase::Active,
        CLOSING => SessionPhase::Closing,
        _ => SessionPhase::Idle,
    }
}

#[derive(Debug)]
pub struct SessionGate(AtomicU8);

impl Default for SessionGate {
    fn default() -> Self {
        Self(AtomicU8::new(IDLE))
    }
}

impl SessionGate {
    pub fn phase(&self) -> SessionPhase {
        decode(self.0.load(Ordering::Acquire))
    }

    /// Whether captured frames may be sent right now.
    pub fn is_active(&self) -> bool {
        self.0.load(Ordering::Acquire) == ACTIVE
    }

    /// `Idle → Connecting`.
    ///
    /// # Errors
    /// `AlreadyRunning` from any other phase.
    pub fn begin_connect(&self) -> Result<()> {
        self.transition(SessionPhase::Idle, SessionPhase::Connecting)
            .then_some(())
            .ok_or(VoiceError::AlreadyRunning)
    }

    /// `Connecting → Active`. Returns false when the session is not
    /// connecting, e.g. a late confirmation after teardown began.
    pub fn mark_active(&self) -> bool {
        self.transition(SessionPhase::Connecting, SessionPhase::Active)
    }

    /// Any phase `→ Closing`; returns the phase it replaced.
    pub fn begin_close(&self) -> SessionPhase {
        decode(self.0.swap(CLOSING, Ordering::AcqRel))
    }

    /// `Closing → Idle`.
    pub fn finish_close(&self) {
        self.transition(SessionPhase::Closing, SessionPhase::Idle);
    }

    fn transition(&self, from: SessionPhase, to: SessionPhase) -> bool {
        self.0
            .compare_exchange(encode(from), encode(to), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_cycle() {
        let gate = SessionGate::default();
        assert_eq!(gate.phase(), SessionPhase::Idle);
        gate.begin_connect().unwrap();
        assert!(!gate.is_active());
        assert!(gate.mark_active());
        assert!(gate.is_active());
        assert_eq!(gate.begin_close(), SessionPhase::Active);
        assert!(!gate.is_active());
        gate.finish_close();
        assert_eq!(gate.phase(), SessionPhase::Idle);
    }

    #[test]
    fn second_connect_is_rejected() {
        let gate = SessionGate::default();
        gate.begin_connect().unwrap();
        assert!(matches!(gate.begin_connect(), Err(VoiceError::AlreadyRunning)));
    }

    #[test]
    fn late_open_after_close_does_not_reactivate() {
        let gate = SessionGate::default();
        gate.begin_connect().unwrap();
        gate.begin_close();
        assert!(!gate.mark_active());
        gate.finish_close();
        assert!(!gate.mark_active());
        assert_eq!(gate.phase(), SessionPhase::Idle);
    }
}
