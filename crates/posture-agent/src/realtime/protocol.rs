// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Wire messages of the realtime analysis channel
//!
//! Outbound: `{"action": "start_session" | "calibrate" | "frame" | "end_session", "frame"?: <base64 JPEG>}`
//! Inbound: `{"type": "...", ...}`; unrecognized types decode to [`InboundMessage::Unknown`].

use std::collections::BTreeMap;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{PostureAgentError, Result};
use crate::realtime::frame::EncodedFrame;

/// Normalized 2-D body keypoint
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f64,
    pub y: f64,
}

/// Named keypoints (`left_ear`, `right_shoulder`, `left_hip`, ...)
pub type Landmarks = BTreeMap<String, Landmark>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreDetails {
    pub head_position: f64,
    pub shoulder_levelness: f64,
    pub shoulder_rounding: f64,
    pub spine_alignment: f64,
}

/// Posture problem reported alongside a score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub component: String,
    pub severity: String,
    pub message: String,
}

/// Per-frame analysis result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostureResult {
    #[serde(default)]
    pub landmarks_detected: bool,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub details: Option<ScoreDetails>,
    #[serde(default)]
    pub issues: Vec<Issue>,
    #[serde(default)]
    pub landmarks: Option<Landmarks>,
    #[serde(default)]
    pub ideal_landmarks: Option<Landmarks>,
    #[serde(default)]
    pub message: Option<String>,
}

impl PostureResult {
    /// Overlay-only result published while calibrating
    pub fn landmarks_only(landmarks: Landmarks) -> Self {
        Self {
            landmarks_detected: true,
            landmarks: Some(landmarks),
            ..Self::default()
        }
    }
}

/// Totals reported when a session ends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    #[serde(deserialize_with = "id_as_string")]
    pub session_id: String,
    #[serde(default)]
    pub duration_seconds: f64,
    #[serde(default)]
    pub average_score: Option<f64>,
    #[serde(default)]
    pub total_frames_analyzed: u64,
    #[serde(default)]
    pub scores_recorded: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum OutboundMessage {
    StartSession,
    Calibrate,
    Frame { frame: String },
    EndSession,
}

impl OutboundMessage {
    pub fn frame(frame: &EncodedFrame) -> Self {
        OutboundMessage::Frame {
            frame: frame.to_base64(),
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            OutboundMessage::StartSession => "start_session",
            OutboundMessage::Calibrate => "calibrate",
            OutboundMessage::Frame { .. } => "frame",
            OutboundMessage::EndSession => "end_session",
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    SessionStarted {
        #[serde(deserialize_with = "id_as_string")]
        session_id: String,
    },
    CalibrationStarted,
    CalibrationProgress {
        #[serde(default)]
        progress: f64,
        #[serde(default)]
        landmarks: Option<Landmarks>,
    },
    CalibrationComplete {
        #[serde(default)]
        ideal_landmarks: Option<Landmarks>,
    },
    PostureResult(PostureResult),
    SessionEnded {
        summary: SessionSummary,
    },
    Error {
        #[serde(default)]
        message: String,
    },
    #[serde(other)]
    Unknown,
}

impl InboundMessage {
    /// Decode one text frame
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| PostureAgentError::Protocol(format!("malformed inbound message: {}", e)))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::SessionStarted { .. } => "session_started",
            InboundMessage::CalibrationStarted => "calibration_started",
            InboundMessage::CalibrationProgress { .. } => "calibration_progress",
            InboundMessage::CalibrationComplete { .. } => "calibration_complete",
            InboundMessage::PostureResult(_) => "posture_result",
            InboundMessage::SessionEnded { .. } => "session_ended",
            InboundMessage::Error { .. } => "error",
            InboundMessage::Unknown => "unknown",
        }
    }
}

/// Session ids arrive as JSON numbers from the server; keep them as strings
fn id_as_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(id) => Ok(id),
        Value::Number(id) => Ok(id.to_string()),
        other => Err(D::Error::custom(format!(
            "session id must be a string or number, got {}",
            other
        ))),
    }
}
