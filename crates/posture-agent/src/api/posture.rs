// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Session history and statistics

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::http::{ApiRequest, RequestPipeline};
use crate::realtime::protocol::Issue;

pub const SESSIONS_PATH: &str = "posture/sessions/";
pub const STATS_PATH: &str = "posture/stats/";

/// Completed session as listed in history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: u64,
    pub started_at: String,
    #[serde(default)]
    pub ended_at: Option<String>,
    #[serde(default)]
    pub average_score: Option<f64>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub score_count: u32,
}

/// One persisted score sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub id: u64,
    pub timestamp: String,
    pub overall_score: f64,
    pub head_position_score: f64,
    pub shoulder_levelness_score: f64,
    pub shoulder_rounding_score: f64,
    pub spine_alignment_score: f64,
    #[serde(default)]
    pub issues: Vec<Issue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDetail {
    pub id: u64,
    pub started_at: String,
    #[serde(default)]
    pub ended_at: Option<String>,
    #[serde(default)]
    pub average_score: Option<f64>,
    /// Ideal landmarks captured during calibration, as stored by the server
    #[serde(default)]
    pub calibration_data: Option<Value>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub scores: Vec<ScoreRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyScore {
    pub day: String,
    #[serde(default)]
    pub avg: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostureStats {
    pub period_days: u32,
    pub total_sessions: u32,
    #[serde(default)]
    pub average_score: Option<f64>,
    #[serde(default)]
    pub daily_scores: Vec<DailyScore>,
}

/// List endpoints may or may not be paginated
#[derive(Deserialize)]
#[serde(untagged)]
enum SessionList {
    Paginated { results: Vec<SessionRecord> },
    Bare(Vec<SessionRecord>),
}

pub struct PostureApi {
    pipeline: Arc<RequestPipeline>,
}

impl PostureApi {
    pub fn new(pipeline: Arc<RequestPipeline>) -> Self {
        Self { pipeline }
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionRecord>> {
        let list: SessionList = self
            .pipeline
            .send_json(&ApiRequest::get(SESSIONS_PATH))
            .await?;
        Ok(match list {
            SessionList::Paginated { results } => results,
            SessionList::Bare(records) => records,
        })
    }

    pub async fn session(&self, id: &str) -> Result<SessionDetail> {
        let path = format!("{}{}/", SESSIONS_PATH, id);
        self.pipeline.send_json(&ApiRequest::get(path)).await
    }

    /// Aggregates over the last `days` days (server default when `None`)
    pub async fn stats(&self, days: Option<u32>) -> Result<PostureStats> {
        let mut request = ApiRequest::get(STATS_PATH);
        if let Some(days) = days {
            request = request.with_query("days", days);
        }
        self.pipeline.send_json(&request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_list_accepts_both_shapes() {
        let record = r#"{"id":3,"started_at":"2025-01-01T10:00:00Z","ended_at":null,"average_score":81.5,"is_active":false,"score_count":12}"#;

        let paginated: SessionList =
            serde_json::from_str(&format!(r#"{{"count":1,"next":null,"results":[{}]}}"#, record))
                .unwrap();
        assert!(matches!(paginated, SessionList::Paginated { ref results } if results.len() == 1));

        let bare: SessionList = serde_json::from_str(&format!("[{}]", record)).unwrap();
        match bare {
            SessionList::Bare(records) => assert_eq!(records[0].average_score, Some(81.5)),
            SessionList::Paginated { .. } => panic!("expected bare list"),
        }
    }

    #[test]
    fn test_stats_with_null_average() {
        let stats: PostureStats = serde_json::from_str(
            r#"{"period_days":7,"total_sessions":0,"average_score":null,"daily_scores":[]}"#,
        )
        .unwrap();
        assert_eq!(stats.average_score, None);
        assert!(stats.daily_scores.is_empty());
    }
}
