// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Realtime analysis sessions: wire protocol, state machine, frame loop and
//! the WebSocket connection tying them together

pub mod connection;
pub mod frame;
pub mod protocol;
pub mod scheduler;
pub mod state;

pub use connection::{session_url, SessionConnection};
pub use frame::{DirectoryFrameSource, EncodedFrame, FrameSource};
pub use protocol::{
    InboundMessage, Issue, Landmark, Landmarks, OutboundMessage, PostureResult, ScoreDetails,
    SessionSummary,
};
pub use scheduler::{frame_period, FrameScheduler, FrameSink};
pub use state::{
    CloseReason, SessionAction, SessionPhase, SessionSnapshot, SessionStateMachine,
    TransportEvent,
};
