// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Deterministic session state machine.
//!
//! Transport notifications are fed in as typed [`TransportEvent`]s and
//! inbound protocol messages are dispatched one at a time, in delivery order.
//!
//! Design constraints:
//! - No I/O, no timers, no runtime dependency
//! - Side effects are returned as [`SessionAction`]s for the driver to execute

use tracing::{debug, info, warn};

use crate::error::PostureAgentError;
use crate::realtime::protocol::{InboundMessage, Landmarks, PostureResult, SessionSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Connecting,
    Open,
    Calibrating,
    Active,
    Ended,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Normal,
    AuthFailed,
    Error,
}

/// Observable session state
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub session_id: Option<String>,
    pub phase: SessionPhase,
    pub close_reason: Option<CloseReason>,
    /// In [0, 1]
    pub calibration_progress: f64,
    pub ideal_landmarks: Option<Landmarks>,
    pub latest_result: Option<PostureResult>,
    pub summary: Option<SessionSummary>,
    pub last_error: Option<PostureAgentError>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            session_id: None,
            phase: SessionPhase::Idle,
            close_reason: None,
            calibration_progress: 0.0,
            ideal_landmarks: None,
            latest_result: None,
            summary: None,
            last_error: None,
        }
    }
}

impl SessionSnapshot {
    /// Transport is open (sends are transmitted)
    pub fn is_open(&self) -> bool {
        matches!(
            self.phase,
            SessionPhase::Open | SessionPhase::Calibrating | SessionPhase::Active | SessionPhase::Ended
        )
    }

    pub fn is_calibrating(&self) -> bool {
        self.phase == SessionPhase::Calibrating
    }
}

/// Transport notification
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Opened,
    Message(String),
    Failed(String),
    Closed { code: Option<u16>, expected: bool },
}

/// Side effect requested by a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    StopFrameLoop,
}

#[derive(Debug, Clone)]
pub struct SessionStateMachine {
    auth_failed_close_code: u16,
    state: SessionSnapshot,
}

impl SessionStateMachine {
    pub fn new(auth_failed_close_code: u16) -> Self {
        Self {
            auth_failed_close_code,
            state: SessionSnapshot::default(),
        }
    }

    pub fn snapshot(&self) -> &SessionSnapshot {
        &self.state
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.phase
    }

    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }

    /// Fresh session for a new connection attempt
    pub fn begin_connect(&mut self) {
        self.state = SessionSnapshot {
            phase: SessionPhase::Connecting,
            ..SessionSnapshot::default()
        };
    }

    /// Back to initial values
    pub fn reset(&mut self) {
        self.state = SessionSnapshot::default();
    }

    /// Apply one transport notification
    pub fn step(&mut self, event: TransportEvent) -> Vec<SessionAction> {
        match event {
            TransportEvent::Opened => {
                if self.state.phase == SessionPhase::Connecting {
                    self.state.phase = SessionPhase::Open;
                    self.state.last_error = None;
                }
                Vec::new()
            }
            TransportEvent::Message(text) => {
                if !self.is_open() {
                    debug!("[SESSION] Ignoring message outside an open session");
                    return Vec::new();
                }
                match InboundMessage::parse(&text) {
                    Ok(message) => self.dispatch(message),
                    Err(e) => {
                        warn!("[SESSION] {}", e);
                        self.state.last_error = Some(e);
                    }
                }
                Vec::new()
            }
            TransportEvent::Failed(reason) => {
                if matches!(self.state.phase, SessionPhase::Idle | SessionPhase::Closed) {
                    return Vec::new();
                }
                warn!("[SESSION] Transport error: {}", reason);
                self.state.last_error = Some(PostureAgentError::Network(reason));
                Vec::new()
            }
            TransportEvent::Closed { code, expected } => self.on_closed(code, expected),
        }
    }

    fn on_closed(&mut self, code: Option<u16>, expected: bool) -> Vec<SessionAction> {
        if matches!(self.state.phase, SessionPhase::Idle | SessionPhase::Closed) {
            return Vec::new();
        }

        let reason = if code == Some(self.auth_failed_close_code) {
            self.state.last_error = Some(PostureAgentError::AuthFailed(
                "Authentication failed".to_string(),
            ));
            CloseReason::AuthFailed
        } else if expected || self.state.phase == SessionPhase::Ended {
            CloseReason::Normal
        } else {
            CloseReason::Error
        };

        info!("[SESSION] Closed ({:?}, code {:?})", reason, code);
        self.state.phase = SessionPhase::Closed;
        self.state.close_reason = Some(reason);
        vec![SessionAction::StopFrameLoop]
    }

    /// Apply one inbound protocol message
    pub fn dispatch(&mut self, message: InboundMessage) {
        debug!("[SESSION] <- {}", message.kind());
        match message {
            InboundMessage::SessionStarted { session_id } => {
                info!("[SESSION] Session {} started", session_id);
                self.state.session_id = Some(session_id);
                if self.state.phase == SessionPhase::Open {
                    self.state.phase = SessionPhase::Active;
                }
            }
            InboundMessage::CalibrationStarted => {
                self.state.phase = SessionPhase::Calibrating;
                self.state.calibration_progress = 0.0;
            }
            InboundMessage::CalibrationProgress {
                progress,
                landmarks,
            } => {
                self.state.calibration_progress = clamp_progress(progress);
                if let Some(landmarks) = landmarks {
                    self.state.latest_result = Some(PostureResult::landmarks_only(landmarks));
                }
            }
            InboundMessage::CalibrationComplete { ideal_landmarks } => {
                if matches!(self.state.phase, SessionPhase::Open | SessionPhase::Calibrating) {
                    self.state.phase = SessionPhase::Active;
                }
                self.state.calibration_progress = 1.0;
                self.state.ideal_landmarks = ideal_landmarks;
                info!("[SESSION] Calibration complete");
            }
            InboundMessage::PostureResult(result) => {
                if let Some(ideal) = &result.ideal_landmarks {
                    self.state.ideal_landmarks = Some(ideal.clone());
                }
                self.state.latest_result = Some(result);
            }
            InboundMessage::SessionEnded { summary } => {
                info!("[SESSION] Session {} ended", summary.session_id);
                self.state.phase = SessionPhase::Ended;
                self.state.summary = Some(summary);
            }
            InboundMessage::Error { message } => {
                warn!("[SESSION] Server error: {}", message);
                self.state.last_error = Some(PostureAgentError::Upstream(message));
            }
            InboundMessage::Unknown => {}
        }
    }
}

fn clamp_progress(progress: f64) -> f64 {
    if progress.is_nan() {
        0.0
    } else {
        progress.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_machine() -> SessionStateMachine {
        let mut machine = SessionStateMachine::new(4001);
        machine.begin_connect();
        machine.step(TransportEvent::Opened);
        machine
    }

    #[test]
    fn test_opened_only_from_connecting() {
        let mut machine = SessionStateMachine::new(4001);
        machine.step(TransportEvent::Opened);
        assert_eq!(machine.phase(), SessionPhase::Idle);

        machine.begin_connect();
        machine.step(TransportEvent::Opened);
        assert_eq!(machine.phase(), SessionPhase::Open);
    }

    #[test]
    fn test_progress_is_clamped() {
        let mut machine = open_machine();
        machine.dispatch(InboundMessage::CalibrationProgress {
            progress: 1.7,
            landmarks: None,
        });
        assert_eq!(machine.snapshot().calibration_progress, 1.0);
        machine.dispatch(InboundMessage::CalibrationProgress {
            progress: -0.2,
            landmarks: None,
        });
        assert_eq!(machine.snapshot().calibration_progress, 0.0);
    }

    #[test]
    fn test_messages_ignored_when_not_open() {
        let mut machine = SessionStateMachine::new(4001);
        machine.step(TransportEvent::Message(
            r#"{"type":"session_started","session_id":"s1"}"#.to_string(),
        ));
        assert_eq!(machine.snapshot(), &SessionSnapshot::default());
    }

    #[test]
    fn test_close_only_once() {
        let mut machine = open_machine();
        let first = machine.step(TransportEvent::Closed {
            code: Some(1000),
            expected: true,
        });
        let second = machine.step(TransportEvent::Closed {
            code: Some(4001),
            expected: false,
        });
        assert_eq!(first, vec![SessionAction::StopFrameLoop]);
        assert!(second.is_empty());
        assert_eq!(machine.snapshot().close_reason, Some(CloseReason::Normal));
    }
}
